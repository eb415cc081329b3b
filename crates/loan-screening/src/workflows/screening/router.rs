use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, Multipart, Path, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use super::catalog::{
    FormDraft, FormPatch, QuestionDraft, QuestionPatch, SectionDraft, SectionPatch,
};
use super::coordinator::ScreeningUpdate;
use super::domain::{
    AcatId, AccountId, Actor, ApplicationKind, Capability, ClientId, FormId, FormType, LoanId,
    QuestionId, ScreeningId, SectionId,
};
use super::error::ScreeningError;
use super::history::{ApplicationRef, HistoryQuery};
use super::intake::{ClientIntakeBody, IntakePayload};
use super::repository::{PageRequest, ScreeningRepository};
use super::service::ScreeningService;
use crate::integrations::AssetUpload;

pub const ACCOUNT_HEADER: &str = "x-account-id";
pub const CAPABILITIES_HEADER: &str = "x-capabilities";

type SharedService<R> = Arc<ScreeningService<R>>;

/// Router exposing the screening, history and template endpoints.
pub fn screening_router<R>(service: SharedService<R>) -> Router
where
    R: ScreeningRepository + 'static,
{
    Router::new()
        .route("/screenings/clients/create", post(register_client_handler::<R>))
        .route(
            "/screenings/clients/{client}/screenings",
            get(latest_screening_handler::<R>),
        )
        .route("/screenings/clients/{client}/cbs", post(push_to_cbs_handler::<R>))
        .route("/screenings/create", post(start_cycle_handler::<R>))
        .route("/screenings/paginate", get(list_screenings_handler::<R>))
        .route("/screenings/histories/search", get(search_history_handler::<R>))
        .route("/screenings/histories/paginate", get(list_histories_handler::<R>))
        .route("/screenings/histories/{client}", get(get_history_handler::<R>))
        .route(
            "/screenings/histories/{client}/applications",
            post(attach_application_handler::<R>),
        )
        .route("/screenings/questions/create", post(create_question_handler::<R>))
        .route("/screenings/questions/paginate", get(list_questions_handler::<R>))
        .route(
            "/screenings/questions/{id}",
            get(get_question_handler::<R>)
                .put(update_question_handler::<R>)
                .delete(delete_question_handler::<R>),
        )
        .route("/screenings/forms/create", post(create_form_handler::<R>))
        .route("/screenings/forms/paginate", get(list_forms_handler::<R>))
        .route("/screenings/forms/search", get(find_form_handler::<R>))
        .route(
            "/screenings/forms/{id}",
            get(get_form_handler::<R>)
                .put(update_form_handler::<R>)
                .delete(delete_form_handler::<R>),
        )
        .route(
            "/screenings/forms/{id}/sections",
            post(create_section_handler::<R>),
        )
        .route(
            "/screenings/sections/{id}",
            get(get_section_handler::<R>)
                .put(update_section_handler::<R>)
                .delete(delete_section_handler::<R>),
        )
        .route(
            "/screenings/{id}",
            get(get_screening_handler::<R>)
                .put(update_screening_handler::<R>)
                .delete(delete_screening_handler::<R>),
        )
        .with_state(service)
}

/// Error envelope returned by every screening route.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub operation: &'static str,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

pub(crate) fn error_response(operation: &'static str, err: ScreeningError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(operation, error = %err, "screening request failed");
    } else {
        warn!(operation, error = %err, "screening request rejected");
    }

    let body = ApiError {
        operation,
        kind: err.kind(),
        message: err.to_string(),
        errors: err.messages().to_vec(),
    };
    (status, Json(body)).into_response()
}

fn task_failed(operation: &'static str, join_error: &tokio::task::JoinError) -> Response {
    error!(operation, error = %join_error, "blocking screening task failed");
    let body = ApiError {
        operation,
        kind: "INTERNAL_ERROR",
        message: join_error.to_string(),
        errors: Vec::new(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

fn respond<T: Serialize>(
    operation: &'static str,
    status: StatusCode,
    outcome: Result<T, ScreeningError>,
) -> Response {
    match outcome {
        Ok(body) => (status, Json(body)).into_response(),
        Err(err) => error_response(operation, err),
    }
}

/// Caller identity as forwarded by the auth gateway.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ScreeningError> {
    let account = headers
        .get(ACCOUNT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ScreeningError::Validation(vec![format!("{ACCOUNT_HEADER} header is required")])
        })?;

    let mut capabilities = Vec::new();
    let raw = headers
        .get(CAPABILITIES_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    for token in raw.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        let capability = Capability::parse(token).ok_or_else(|| {
            ScreeningError::Validation(vec![format!("unknown capability '{token}'")])
        })?;
        capabilities.push(capability);
    }

    Ok(Actor::new(AccountId::from(account), capabilities))
}

macro_rules! actor_or_reject {
    ($operation:expr, $headers:expr) => {
        match actor_from_headers(&$headers) {
            Ok(actor) => actor,
            Err(err) => return error_response($operation, err),
        }
    };
}

macro_rules! extracted_or_reject {
    ($operation:expr, $extracted:expr) => {
        match $extracted {
            Ok(extracted) => extracted.0,
            Err(rejection) => {
                return error_response(
                    $operation,
                    ScreeningError::Validation(vec![rejection.body_text()]),
                )
            }
        }
    };
}

async fn read_intake(request: Request) -> Result<IntakePayload, ScreeningError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if !is_multipart {
        let Json(body) = Json::<ClientIntakeBody>::from_request(request, &())
            .await
            .map_err(|rejection| ScreeningError::Validation(vec![rejection.body_text()]))?;
        return Ok(IntakePayload::Json(body));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| ScreeningError::Validation(vec![rejection.body_text()]))?;
    let mut fields = BTreeMap::new();
    let mut files = BTreeMap::new();
    let malformed = |err: axum::extract::multipart::MultipartError| {
        ScreeningError::Validation(vec![format!("malformed multipart body: {}", err.body_text())])
    };

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(malformed)?;
                files.insert(
                    name,
                    AssetUpload {
                        owner: String::new(),
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    },
                );
            }
            None => {
                let text = field.text().await.map_err(malformed)?;
                fields.insert(name, text);
            }
        }
    }

    Ok(IntakePayload::Multipart { fields, files })
}

pub(crate) async fn register_client_handler<R>(
    State(service): State<SharedService<R>>,
    headers: HeaderMap,
    request: Request,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    const OPERATION: &str = "CLIENT_CREATION_ERROR";
    let actor = actor_or_reject!(OPERATION, headers);
    let intake = match read_intake(request).await.and_then(IntakePayload::normalize) {
        Ok(intake) => intake,
        Err(err) => return error_response(OPERATION, err),
    };
    // Stores assets on disk and calls the storage service.
    let registered =
        tokio::task::spawn_blocking(move || service.register_client(intake, &actor)).await;
    match registered {
        Ok(outcome) => respond(OPERATION, StatusCode::CREATED, outcome),
        Err(join_error) => task_failed(OPERATION, &join_error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartCycleRequest {
    client: ClientId,
}

pub(crate) async fn start_cycle_handler<R>(
    State(service): State<SharedService<R>>,
    headers: HeaderMap,
    body: Result<Json<StartCycleRequest>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    const OPERATION: &str = "SCREENING_CREATION_ERROR";
    let actor = actor_or_reject!(OPERATION, headers);
    let body = extracted_or_reject!(OPERATION, body);
    respond(
        OPERATION,
        StatusCode::CREATED,
        service.start_cycle(&body.client, &actor),
    )
}

pub(crate) async fn update_screening_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    update: Result<Json<ScreeningUpdate>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    const OPERATION: &str = "UPDATE_SCREENING_ERROR";
    let actor = actor_or_reject!(OPERATION, headers);
    let update = extracted_or_reject!(OPERATION, update);
    respond(
        OPERATION,
        StatusCode::OK,
        service.update_screening(&ScreeningId(id), update, &actor),
    )
}

async fn get_screening_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    respond(
        "SCREENING_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.get_screening(&ScreeningId(id)),
    )
}

async fn delete_screening_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    respond(
        "DELETE_SCREENING_ERROR",
        StatusCode::OK,
        service.delete_screening(&ScreeningId(id)),
    )
}

async fn list_screenings_handler<R>(
    State(service): State<SharedService<R>>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let page = extracted_or_reject!("SCREENING_RETRIEVAL_ERROR", page);
    respond(
        "SCREENING_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.list_screenings(page),
    )
}

async fn latest_screening_handler<R>(
    State(service): State<SharedService<R>>,
    Path(client): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    respond(
        "SCREENING_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.latest_screening(&ClientId(client)),
    )
}

pub(crate) async fn push_to_cbs_handler<R>(
    State(service): State<SharedService<R>>,
    Path(client): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    const OPERATION: &str = "CBS_PUSH_ERROR";
    let actor = actor_or_reject!(OPERATION, headers);
    let client = ClientId(client);
    let pushed =
        tokio::task::spawn_blocking(move || service.push_client_to_cbs(&client, &actor)).await;
    match pushed {
        Ok(outcome) => respond(OPERATION, StatusCode::OK, outcome),
        Err(join_error) => task_failed(OPERATION, &join_error),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistorySearchParams {
    client: ClientId,
    #[serde(rename = "loanCycle", alias = "loan_cycle")]
    loan_cycle: Option<u32>,
    application: Option<String>,
}

impl HistorySearchParams {
    fn into_query(self) -> Result<HistoryQuery, ScreeningError> {
        let application = match self.application.as_deref() {
            Some(raw) => Some(ApplicationKind::parse(raw).ok_or_else(|| {
                ScreeningError::Validation(vec![format!(
                    "application must be screening, loan or acat (found '{raw}')"
                )])
            })?),
            None => None,
        };
        Ok(HistoryQuery {
            client: self.client,
            loan_cycle: self.loan_cycle,
            application,
        })
    }
}

async fn search_history_handler<R>(
    State(service): State<SharedService<R>>,
    params: Result<Query<HistorySearchParams>, QueryRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let params = extracted_or_reject!("HISTORY_RETRIEVAL_ERROR", params);
    let outcome = params
        .into_query()
        .and_then(|query| service.search_history(&query));
    respond("HISTORY_RETRIEVAL_ERROR", StatusCode::OK, outcome)
}

async fn get_history_handler<R>(
    State(service): State<SharedService<R>>,
    Path(client): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    respond(
        "HISTORY_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.get_history(&ClientId(client)),
    )
}

async fn list_histories_handler<R>(
    State(service): State<SharedService<R>>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let page = extracted_or_reject!("HISTORY_RETRIEVAL_ERROR", page);
    respond(
        "HISTORY_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.list_histories(page),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttachApplicationRequest {
    loan: Option<LoanId>,
    acat: Option<AcatId>,
}

async fn attach_application_handler<R>(
    State(service): State<SharedService<R>>,
    Path(client): Path<String>,
    headers: HeaderMap,
    body: Result<Json<AttachApplicationRequest>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    const OPERATION: &str = "HISTORY_UPDATE_ERROR";
    let actor = actor_or_reject!(OPERATION, headers);
    let body = extracted_or_reject!(OPERATION, body);
    let application = match (body.loan, body.acat) {
        (Some(loan), None) => ApplicationRef::Loan(loan),
        (None, Some(acat)) => ApplicationRef::Acat(acat),
        _ => {
            return error_response(
                OPERATION,
                ScreeningError::Validation(vec![
                    "exactly one of loan or acat is required".to_string(),
                ]),
            )
        }
    };
    respond(
        OPERATION,
        StatusCode::OK,
        service.attach_application(&ClientId(client), application, &actor),
    )
}

fn deleted(id: impl ToString) -> serde_json::Value {
    json!({ "_id": id.to_string(), "deleted": true })
}

async fn create_question_handler<R>(
    State(service): State<SharedService<R>>,
    draft: Result<Json<QuestionDraft>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let draft = extracted_or_reject!("QUESTION_CREATION_ERROR", draft);
    respond(
        "QUESTION_CREATION_ERROR",
        StatusCode::CREATED,
        service.catalog().create_question(draft),
    )
}

async fn get_question_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    respond(
        "QUESTION_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.catalog().get_question(&QuestionId(id)),
    )
}

async fn update_question_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
    patch: Result<Json<QuestionPatch>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let patch = extracted_or_reject!("QUESTION_UPDATE_ERROR", patch);
    respond(
        "QUESTION_UPDATE_ERROR",
        StatusCode::OK,
        service.catalog().update_question(&QuestionId(id), patch),
    )
}

async fn delete_question_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let id = QuestionId(id);
    let outcome = service.catalog().delete_question(&id).map(|()| deleted(&id));
    respond("QUESTION_DELETE_ERROR", StatusCode::OK, outcome)
}

async fn list_questions_handler<R>(
    State(service): State<SharedService<R>>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let page = extracted_or_reject!("QUESTION_RETRIEVAL_ERROR", page);
    respond(
        "QUESTION_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.catalog().list_questions(page),
    )
}

async fn create_form_handler<R>(
    State(service): State<SharedService<R>>,
    headers: HeaderMap,
    draft: Result<Json<FormDraft>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    const OPERATION: &str = "FORM_CREATION_ERROR";
    let actor = actor_or_reject!(OPERATION, headers);
    let draft = extracted_or_reject!(OPERATION, draft);
    respond(
        OPERATION,
        StatusCode::CREATED,
        service.catalog().create_form(draft, Some(actor.account)),
    )
}

async fn get_form_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    respond(
        "FORM_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.catalog().get_form(&FormId(id)),
    )
}

#[derive(Debug, Deserialize)]
pub(crate) struct FormSearchParams {
    #[serde(rename = "type")]
    form_type: FormType,
}

async fn find_form_handler<R>(
    State(service): State<SharedService<R>>,
    params: Result<Query<FormSearchParams>, QueryRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let params = extracted_or_reject!("FORM_RETRIEVAL_ERROR", params);
    respond(
        "FORM_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.catalog().find_form(params.form_type),
    )
}

async fn update_form_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
    patch: Result<Json<FormPatch>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let patch = extracted_or_reject!("FORM_UPDATE_ERROR", patch);
    respond(
        "FORM_UPDATE_ERROR",
        StatusCode::OK,
        service.catalog().update_form(&FormId(id), patch),
    )
}

async fn delete_form_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let id = FormId(id);
    let outcome = service.catalog().delete_form(&id).map(|()| deleted(&id));
    respond("FORM_DELETE_ERROR", StatusCode::OK, outcome)
}

async fn list_forms_handler<R>(
    State(service): State<SharedService<R>>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let page = extracted_or_reject!("FORM_RETRIEVAL_ERROR", page);
    respond(
        "FORM_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.catalog().list_forms(page),
    )
}

async fn create_section_handler<R>(
    State(service): State<SharedService<R>>,
    Path(form): Path<String>,
    draft: Result<Json<SectionDraft>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let draft = extracted_or_reject!("SECTION_CREATION_ERROR", draft);
    respond(
        "SECTION_CREATION_ERROR",
        StatusCode::CREATED,
        service.catalog().create_section(&FormId(form), draft),
    )
}

async fn get_section_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    respond(
        "SECTION_RETRIEVAL_ERROR",
        StatusCode::OK,
        service.catalog().get_section(&SectionId(id)),
    )
}

async fn update_section_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
    patch: Result<Json<SectionPatch>, JsonRejection>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let patch = extracted_or_reject!("SECTION_UPDATE_ERROR", patch);
    respond(
        "SECTION_UPDATE_ERROR",
        StatusCode::OK,
        service.catalog().update_section(&SectionId(id), patch),
    )
}

async fn delete_section_handler<R>(
    State(service): State<SharedService<R>>,
    Path(id): Path<String>,
) -> Response
where
    R: ScreeningRepository + 'static,
{
    let id = SectionId(id);
    let outcome = service.catalog().delete_section(&id).map(|()| deleted(&id));
    respond("SECTION_DELETE_ERROR", StatusCode::OK, outcome)
}
