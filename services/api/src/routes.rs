use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use loan_screening::workflows::screening::{
    screening_router, ScreeningRepository, ScreeningService,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_service_routes<R>(service: Arc<ScreeningService<R>>) -> axum::Router
where
    R: ScreeningRepository + 'static,
{
    screening_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_service, demo_officer};
    use axum::body::Body;
    use axum::http::Request;
    use loan_screening::config::{
        AppConfig, AppEnvironment, AssetConfig, ScreeningConfig, ServerConfig, TelemetryConfig,
    };
    use loan_screening::workflows::screening::InMemoryScreeningStore;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn config(seed_template: bool) -> AppConfig {
        AppConfig {
            environment: AppEnvironment::Test,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            telemetry: TelemetryConfig {
                log_level: "warn".to_string(),
                ansi: false,
            },
            assets: AssetConfig {
                directory: std::env::temp_dir().join("loan-screening-api-tests"),
                public_url: "http://assets.test/".to_string(),
                max_file_size: 1024,
            },
            screening: ScreeningConfig {
                seed_template,
                ..ScreeningConfig::default()
            },
            cbs: None,
            geo: None,
        }
    }

    fn app(seed_template: bool) -> (axum::Router, AppState) {
        let store = Arc::new(InMemoryScreeningStore::new());
        let service = build_service(&config(seed_template), store).expect("service builds");
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let router = with_service_routes(Arc::new(service)).layer(Extension(state.clone()));
        (router, state)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-account-id", demo_officer().account.as_str())
            .header("x-capabilities", "VIEW")
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn readiness_follows_the_startup_flag() {
        let (router, state) = app(true);

        let response = router.clone().oneshot(get("/ready")).await.expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.readiness.store(true, Ordering::Release);
        let response = router.oneshot(get("/ready")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn seeded_service_exposes_the_screening_template() {
        let (router, _) = app(true);

        let response = router
            .clone()
            .oneshot(get("/screenings/forms/search?type=SCREENING"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.oneshot(get("/health")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unseeded_service_has_no_template() {
        let (router, _) = app(false);

        let response = router
            .oneshot(get("/screenings/forms/search?type=SCREENING"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
