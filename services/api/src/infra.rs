use loan_screening::config::AppConfig;
use loan_screening::integrations::{AbacusCbsClient, LocalAssetStore, WpsGeoClient};
use loan_screening::workflows::screening::domain::{AccountId, Actor, Capability};
use loan_screening::workflows::screening::{
    seed_standard_template, FormCatalog, InMemoryScreeningStore, ScreeningError, ScreeningService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Store plus every collaborator the configuration enables.
pub(crate) fn build_service(
    config: &AppConfig,
    store: Arc<InMemoryScreeningStore>,
) -> Result<ScreeningService<InMemoryScreeningStore>, ScreeningError> {
    if config.screening.seed_template {
        let catalog = FormCatalog::new(store.as_ref());
        if let Some(form) = seed_standard_template(&catalog, Some(system_account()))? {
            info!(form = %form.id, "standard screening template installed");
        }
    }

    let mut service = ScreeningService::new(store, config.screening)
        .with_assets(Arc::new(LocalAssetStore::from_config(&config.assets)));
    if let Some(cbs) = config.cbs.clone() {
        info!(url = %cbs.url, "core banking push enabled");
        service = service.with_core_banking(Arc::new(AbacusCbsClient::new(cbs)));
    }
    if let Some(geo) = config.geo.as_ref() {
        info!(url = %geo.url, "parcel validation enabled");
        service = service.with_geo(Arc::new(WpsGeoClient::new(geo)));
    }
    Ok(service)
}

pub(crate) fn system_account() -> AccountId {
    AccountId::from("system")
}

pub(crate) fn demo_officer() -> Actor {
    Actor::new(
        AccountId::from("demo-officer"),
        [Capability::Create, Capability::Update, Capability::View],
    )
}

pub(crate) fn demo_supervisor() -> Actor {
    Actor::new(
        AccountId::from("demo-supervisor"),
        [
            Capability::Update,
            Capability::View,
            Capability::Authorize,
        ],
    )
}
