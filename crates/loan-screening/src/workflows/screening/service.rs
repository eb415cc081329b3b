use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::catalog::FormCatalog;
use super::cloner::{ClonedForm, FormCloner, FormOutline};
use super::coordinator::{ScreeningUpdate, WorkflowCoordinator};
use super::domain::{
    Actor, CbsStatus, Client, ClientId, ClientStatus, FormTemplate, FormType, GeoPolygon,
    HistoryEntry, Screening, ScreeningId, ScreeningStatus,
};
use super::error::ScreeningError;
use super::history::{ApplicationRef, HistoryLedger, HistoryQuery, HistorySearchResult};
use super::intake::{ClientIntake, IntakeDocument};
use super::repository::{Page, PageRequest, ScreeningRepository};
use super::views::{Populator, ScreeningView};
use crate::config::ScreeningConfig;
use crate::integrations::{
    AssetStore, CbsCustomer, CbsRequestError, CoreBankingGateway, GeoValidationService,
    UploadError, UpstreamServiceError,
};

/// Outcome of `POST /screenings/clients/create`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRegistration {
    pub client: Client,
    pub screening: ScreeningView,
    pub history: HistoryEntry,
}

/// Entities created by one multi-step write, removed again when a later step fails.
/// `ledger` and `client_record` hold the state to write back.
#[derive(Debug, Default)]
struct Compensation {
    client: Option<ClientId>,
    cloned: Option<ClonedForm>,
    screening: Option<ScreeningId>,
    ledger: Option<HistoryEntry>,
    client_record: Option<Client>,
}

impl Compensation {
    fn run<R>(self, repository: &R, config: &ScreeningConfig)
    where
        R: ScreeningRepository + ?Sized,
    {
        if let Some(ledger) = self.ledger {
            let client = ledger.client.clone();
            if let Err(err) = repository.update_history(ledger) {
                warn!(client = %client, error = %err, "failed to restore loan cycle history");
            }
        }
        if let Some(record) = self.client_record {
            let client = record.id.clone();
            if let Err(err) = repository.update_client(record) {
                warn!(client = %client, error = %err, "failed to restore client");
            }
        }
        if let Some(screening) = &self.screening {
            if let Err(err) = repository.delete_screening(screening) {
                warn!(screening = %screening, error = %err, "failed to remove screening");
            }
        }
        if let Some(cloned) = &self.cloned {
            FormCloner::new(repository, config.relink_strategy).discard(cloned);
        }
        if let Some(client) = &self.client {
            if let Err(err) = repository.delete_client(client) {
                warn!(client = %client, error = %err, "failed to remove client");
            }
        }
    }
}

/// Entry point for the screening workflow: client intake, cycle start, status
/// updates, history lookups and the core banking push.
pub struct ScreeningService<R> {
    repository: Arc<R>,
    assets: Option<Arc<dyn AssetStore>>,
    core_banking: Option<Arc<dyn CoreBankingGateway>>,
    geo: Option<Arc<dyn GeoValidationService>>,
    config: ScreeningConfig,
    client_locks: Mutex<HashMap<ClientId, Arc<Mutex<()>>>>,
}

impl<R> ScreeningService<R>
where
    R: ScreeningRepository + 'static,
{
    pub fn new(repository: Arc<R>, config: ScreeningConfig) -> Self {
        Self {
            repository,
            assets: None,
            core_banking: None,
            geo: None,
            config,
            client_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn with_core_banking(mut self, gateway: Arc<dyn CoreBankingGateway>) -> Self {
        self.core_banking = Some(gateway);
        self
    }

    pub fn with_geo(mut self, geo: Arc<dyn GeoValidationService>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn catalog(&self) -> FormCatalog<'_, R> {
        FormCatalog::new(self.repository.as_ref())
    }

    fn cloner(&self) -> FormCloner<'_, R> {
        FormCloner::new(self.repository.as_ref(), self.config.relink_strategy)
    }

    fn ledger(&self) -> HistoryLedger<'_, R> {
        HistoryLedger::new(self.repository.as_ref())
    }

    fn populate(&self, screening: Screening) -> Result<ScreeningView, ScreeningError> {
        Ok(Populator::new(self.repository.as_ref()).screening(screening)?)
    }

    fn client_lock(&self, client: &ClientId) -> Arc<Mutex<()>> {
        let mut locks = self.client_locks.lock().expect("client lock table poisoned");
        // Entries only the table references are idle; clones are handed out under this lock.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(client.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn tracked_client_locks(&self) -> usize {
        self.client_locks
            .lock()
            .expect("client lock table poisoned")
            .len()
    }

    fn fetch_client(&self, id: &ClientId) -> Result<Client, ScreeningError> {
        self.repository
            .fetch_client(id)?
            .ok_or_else(|| ScreeningError::not_found("client", id))
    }

    fn fetch_screening(&self, id: &ScreeningId) -> Result<Screening, ScreeningError> {
        self.repository
            .fetch_screening(id)?
            .ok_or_else(|| ScreeningError::not_found("screening", id))
    }

    /// Register a client, open its first screening from the `SCREENING` template
    /// and seed the loan cycle ledger.
    pub fn register_client(
        &self,
        mut intake: ClientIntake,
        actor: &Actor,
    ) -> Result<ClientRegistration, ScreeningError> {
        intake
            .created_by
            .get_or_insert_with(|| actor.account.clone());
        intake.validate()?;

        let phone = intake.phone.trim();
        if !phone.is_empty() && self.repository.find_client_by_phone(phone)?.is_some() {
            return Err(ScreeningError::Conflict(
                "Client with those details already exists!!".to_string(),
            ));
        }

        let template = self
            .repository
            .find_form_by_type(FormType::Screening)?
            .ok_or_else(|| ScreeningError::not_found("form", "SCREENING"))?;

        let national_id_card = self.host_document(intake.national_id_card.take())?;
        let picture = self.host_document(intake.picture.take())?;
        let geolocation = intake.geolocation.clone();
        let (Some(branch), Some(created_by)) = (intake.branch.clone(), intake.created_by.clone())
        else {
            return Err(ScreeningError::Validation(vec![
                "Client Related Branch is Empty".to_string(),
            ]));
        };

        let client = self.repository.insert_client(intake.into_client(
            branch,
            created_by,
            national_id_card,
            picture,
        ))?;
        info!(client = %client.id, branch = %client.branch, "client registered");

        let mut journal = Compensation {
            client: Some(client.id.clone()),
            ..Compensation::default()
        };
        match self.open_first_screening(&client, &template, actor, &mut journal) {
            Ok((screening, history)) => {
                let client = self.fetch_client(&client.id)?;
                let client = self.submit_parcel(client, geolocation.as_ref());
                let screening = self.populate(screening)?;
                Ok(ClientRegistration {
                    client,
                    screening,
                    history,
                })
            }
            Err(err) => {
                warn!(client = %client.id, error = %err, "client registration rolled back");
                journal.run(self.repository.as_ref(), &self.config);
                Err(err)
            }
        }
    }

    fn open_first_screening(
        &self,
        client: &Client,
        template: &FormTemplate,
        actor: &Actor,
        journal: &mut Compensation,
    ) -> Result<(Screening, HistoryEntry), ScreeningError> {
        let cloned = self.cloner().clone_form(&FormOutline::from(template))?;
        journal.cloned = Some(cloned.clone());

        let now = Utc::now();
        let screening = self.repository.insert_screening(Screening {
            id: ScreeningId::generate(),
            client: client.id.clone(),
            branch: client.branch.clone(),
            created_by: actor.account.clone(),
            status: ScreeningStatus::New,
            title: template.title.clone(),
            subtitle: template.subtitle.clone(),
            purpose: template.purpose.clone(),
            layout: template.layout,
            has_sections: template.has_sections,
            disclaimer: template.disclaimer.clone(),
            signatures: template.signatures.clone(),
            questions: cloned.questions,
            sections: cloned.sections,
            comment: String::new(),
            date_created: now,
            last_modified: now,
        })?;
        journal.screening = Some(screening.id.clone());

        let history =
            self.ledger()
                .seed(&client.id, &client.branch, &screening.id, &actor.account)?;
        info!(client = %client.id, screening = %screening.id, "first screening opened");
        Ok((screening, history))
    }

    fn host_document(
        &self,
        document: Option<IntakeDocument>,
    ) -> Result<Option<String>, ScreeningError> {
        match document {
            None => Ok(None),
            Some(IntakeDocument::Link(url)) => Ok(Some(url)),
            Some(IntakeDocument::Upload(upload)) => {
                let store = self
                    .assets
                    .as_ref()
                    .ok_or(UpstreamServiceError::Upload(UploadError::NotConfigured))?;
                let url = store.store(&upload).map_err(UpstreamServiceError::from)?;
                Ok(Some(url))
            }
        }
    }

    /// Parcel validation never fails registration.
    fn submit_parcel(&self, mut client: Client, polygon: Option<&GeoPolygon>) -> Client {
        let (Some(geo), Some(polygon)) = (self.geo.as_ref(), polygon) else {
            return client;
        };
        match geo.submit_parcel(polygon, client.id.as_str()) {
            Ok(Some(result)) => {
                client.parcel_result = Some(result);
                client.last_modified = Utc::now();
                if let Err(err) = self.repository.update_client(client.clone()) {
                    warn!(client = %client.id, error = %err, "failed to store parcel result");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(client = %client.id, error = %err, "parcel validation failed"),
        }
        client
    }

    /// Start the next loan cycle for an existing client by cloning its latest screening.
    pub fn start_cycle(
        &self,
        client_id: &ClientId,
        actor: &Actor,
    ) -> Result<ScreeningView, ScreeningError> {
        let lock = self.client_lock(client_id);
        let _guard = lock.lock().expect("client lock poisoned");

        self.fetch_client(client_id)?;
        let source = self.ledger().validate_can_start_new_cycle(client_id)?;

        let mut journal = Compensation::default();
        match self.open_next_screening(client_id, &source, actor, &mut journal) {
            Ok(screening) => self.populate(screening),
            Err(err) => {
                warn!(client = %client_id, error = %err, "cycle start rolled back");
                journal.run(self.repository.as_ref(), &self.config);
                Err(err)
            }
        }
    }

    fn open_next_screening(
        &self,
        client_id: &ClientId,
        source: &Screening,
        actor: &Actor,
        journal: &mut Compensation,
    ) -> Result<Screening, ScreeningError> {
        journal.ledger = self.repository.history_for_client(client_id)?;
        journal.client_record = Some(self.fetch_client(client_id)?);

        let cloned = self.cloner().clone_form(&FormOutline::from(source))?;
        journal.cloned = Some(cloned.clone());

        let now = Utc::now();
        let screening = self.repository.insert_screening(Screening {
            id: ScreeningId::generate(),
            client: client_id.clone(),
            branch: source.branch.clone(),
            created_by: actor.account.clone(),
            status: ScreeningStatus::New,
            title: source.title.clone(),
            subtitle: source.subtitle.clone(),
            purpose: source.purpose.clone(),
            layout: source.layout,
            has_sections: source.has_sections,
            disclaimer: source.disclaimer.clone(),
            signatures: source.signatures.clone(),
            questions: cloned.questions,
            sections: cloned.sections,
            comment: String::new(),
            date_created: now,
            last_modified: now,
        })?;
        journal.screening = Some(screening.id.clone());

        let history = self
            .ledger()
            .append_cycle(client_id, &screening.id, &actor.account)?;

        let mut client = self.fetch_client(client_id)?;
        client.status = ClientStatus::New;
        client.last_modified = Utc::now();
        self.repository.update_client(client)?;

        info!(
            client = %client_id,
            screening = %screening.id,
            source = %source.id,
            cycle = history.cycle_number,
            "loan cycle started"
        );
        Ok(screening)
    }

    pub fn update_screening(
        &self,
        id: &ScreeningId,
        update: ScreeningUpdate,
        actor: &Actor,
    ) -> Result<ScreeningView, ScreeningError> {
        let client = self.fetch_screening(id)?.client;
        let lock = self.client_lock(&client);
        let _guard = lock.lock().expect("client lock poisoned");

        let screening =
            WorkflowCoordinator::new(self.repository.as_ref()).apply_update(id, update, actor)?;
        self.populate(screening)
    }

    pub fn get_screening(&self, id: &ScreeningId) -> Result<ScreeningView, ScreeningError> {
        let screening = self.fetch_screening(id)?;
        self.populate(screening)
    }

    /// Most recent screening of a client.
    pub fn latest_screening(&self, client: &ClientId) -> Result<ScreeningView, ScreeningError> {
        let screening = self
            .repository
            .screenings_for_client(client)?
            .into_iter()
            .max_by_key(|screening| screening.date_created)
            .ok_or_else(|| ScreeningError::NoScreeningHistory(client.clone()))?;
        self.populate(screening)
    }

    pub fn list_screenings(
        &self,
        request: PageRequest,
    ) -> Result<Page<ScreeningView>, ScreeningError> {
        let page = Page::newest_first(self.repository.list_screenings()?, request);
        let populator = Populator::new(self.repository.as_ref());
        Ok(page.try_map(|screening| populator.screening(screening))?)
    }

    pub fn delete_screening(&self, id: &ScreeningId) -> Result<Screening, ScreeningError> {
        let client = self.fetch_screening(id)?.client;
        let lock = self.client_lock(&client);
        let _guard = lock.lock().expect("client lock poisoned");

        WorkflowCoordinator::new(self.repository.as_ref()).delete_screening(id)
    }

    pub fn search_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<HistorySearchResult, ScreeningError> {
        self.ledger().search(query)
    }

    pub fn get_history(&self, client: &ClientId) -> Result<HistoryEntry, ScreeningError> {
        self.ledger().history(client)
    }

    pub fn list_histories(
        &self,
        request: PageRequest,
    ) -> Result<Page<HistoryEntry>, ScreeningError> {
        Ok(Page::newest_first(
            self.repository.list_histories()?,
            request,
        ))
    }

    /// Record a loan or ACAT application against the client's current cycle.
    pub fn attach_application(
        &self,
        client: &ClientId,
        application: ApplicationRef,
        actor: &Actor,
    ) -> Result<HistoryEntry, ScreeningError> {
        let lock = self.client_lock(client);
        let _guard = lock.lock().expect("client lock poisoned");

        let owner = match &application {
            ApplicationRef::Loan(id) => {
                self.repository
                    .fetch_loan(id)?
                    .ok_or_else(|| ScreeningError::not_found("loan", id))?
                    .client
            }
            ApplicationRef::Acat(id) => {
                self.repository
                    .fetch_acat(id)?
                    .ok_or_else(|| ScreeningError::not_found("acat", id))?
                    .client
            }
        };
        if &owner != client {
            return Err(ScreeningError::Validation(vec![format!(
                "application belongs to client {owner}, not {client}"
            )]));
        }

        self.ledger()
            .attach_application(client, application, &actor.account)
    }

    /// Onboard an eligible client in the core banking system. A failed push is
    /// recorded as `cbs_status = DENIED`.
    pub fn push_client_to_cbs(
        &self,
        client_id: &ClientId,
        actor: &Actor,
    ) -> Result<Client, ScreeningError> {
        let lock = self.client_lock(client_id);
        let _guard = lock.lock().expect("client lock poisoned");

        let mut client = self.fetch_client(client_id)?;
        if !client.status.is_cbs_eligible() {
            return Err(ScreeningError::Conflict(format!(
                "client {client_id} is {}; only eligible clients can be pushed to core banking",
                client.status.label()
            )));
        }
        if client.cbs_status == Some(CbsStatus::Accepted) {
            return Err(ScreeningError::Conflict(format!(
                "client {client_id} is already registered in core banking"
            )));
        }
        let gateway = self
            .core_banking
            .as_ref()
            .ok_or(UpstreamServiceError::Cbs(CbsRequestError::NotConfigured))?;

        let picture = self.local_document(client.picture.as_deref(), "Client picture")?;
        let card = self.local_document(
            client.national_id_card.as_deref(),
            "Client National Id Card",
        )?;

        let outcome = gateway.login().and_then(|()| {
            let picture_id = gateway.upload_picture(&picture)?;
            let card_id = gateway.upload_id(&card)?;
            gateway.create_client(&CbsCustomer::from_client(&client, picture_id, card_id))
        });

        client.last_modified = Utc::now();
        match outcome {
            Ok(reference) => {
                client.cbs_status = Some(CbsStatus::Accepted);
                client.cbs_reference = Some(reference);
                self.repository.update_client(client.clone())?;
                info!(client = %client.id, actor = %actor.account, "client pushed to core banking");
                Ok(client)
            }
            Err(err) => {
                client.cbs_status = Some(CbsStatus::Denied);
                self.repository.update_client(client)?;
                warn!(client = %client_id, error = %err, "core banking push failed");
                Err(UpstreamServiceError::from(err).into())
            }
        }
    }

    fn local_document(
        &self,
        url: Option<&str>,
        label: &str,
    ) -> Result<PathBuf, ScreeningError> {
        let assets = self
            .assets
            .as_ref()
            .ok_or(UpstreamServiceError::Upload(UploadError::NotConfigured))?;
        url.and_then(|url| assets.locate(url))
            .ok_or_else(|| ScreeningError::Validation(vec![format!("{label} is not available")]))
    }
}

