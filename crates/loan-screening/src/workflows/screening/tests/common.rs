use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::config::ScreeningConfig;
use crate::integrations::{
    CbsCustomer, CbsRequestError, CoreBankingGateway, GeoServiceError, GeoValidationService,
};
use crate::workflows::screening::domain::{
    AcatId, AcatStatus, AcatSummary, AccountId, Actor, BranchId, Capability, Client, ClientId,
    FormId, FormTemplate, FormType, GeoPolygon, HistoryEntry, LoanId, LoanStatus, LoanSummary,
    Notification, Prerequisite, Question, QuestionId, QuestionType, Screening, ScreeningId,
    Section, SectionId, Spouse, Task,
};
use crate::workflows::screening::history::{ApplicationRef, HistoryLedger};
use crate::workflows::screening::intake::ClientIntake;
use crate::workflows::screening::repository::{
    ApplicationDirectory, ClientDirectory, FormTemplateStore, HistoryStore, NotificationStore,
    QuestionStore, RepositoryError, ScreeningStore, SectionStore, TaskStore,
};
use crate::workflows::screening::{
    seed_standard_template, ClientRegistration, FormCatalog, InMemoryScreeningStore,
    ScreeningService,
};

pub(super) fn officer() -> Actor {
    Actor::new(
        AccountId::from("officer-1"),
        [Capability::Create, Capability::Update, Capability::View],
    )
}

pub(super) fn supervisor() -> Actor {
    Actor::new(
        AccountId::from("supervisor-1"),
        [
            Capability::Create,
            Capability::Update,
            Capability::View,
            Capability::Authorize,
        ],
    )
}

pub(super) fn intake(phone: &str) -> ClientIntake {
    ClientIntake {
        first_name: "Almaz".to_string(),
        last_name: "Bekele".to_string(),
        grandfather_name: "Tadesse".to_string(),
        gender: "female".to_string(),
        national_id_no: "ET-4471".to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(1988, 4, 2),
        civil_status: "married".to_string(),
        woreda: "Meki".to_string(),
        kebele: "04".to_string(),
        house_no: "117".to_string(),
        phone: phone.to_string(),
        email: None,
        household_members_count: Some(5),
        spouse: Some(Spouse {
            first_name: "Kebede".to_string(),
            last_name: "Alemu".to_string(),
            grandfather_name: String::new(),
            national_id_no: String::new(),
        }),
        branch: Some(BranchId::from("branch-meki")),
        created_by: None,
        national_id_card: None,
        picture: None,
        geolocation: None,
    }
}

/// Store a question tree directly, bypassing the catalog.
pub(super) fn seed_question<S>(
    store: &S,
    text: &str,
    sub_questions: Vec<QuestionId>,
    prerequisites: Vec<(&QuestionId, &str)>,
) -> QuestionId
where
    S: QuestionStore + ?Sized,
{
    let mut question = Question::new(text, QuestionType::YesNo);
    question.sub_questions = sub_questions;
    question.prerequisites = prerequisites
        .into_iter()
        .map(|(question, answer)| Prerequisite {
            question: question.clone(),
            answer: answer.to_string(),
        })
        .collect();
    store.insert_question(question).expect("question stored").id
}

pub(super) fn seed_section<S>(
    store: &S,
    title: &str,
    number: u32,
    questions: Vec<QuestionId>,
) -> SectionId
where
    S: SectionStore + ?Sized,
{
    let mut section = Section::new(title, number);
    section.questions = questions;
    store.insert_section(section).expect("section stored").id
}

pub(super) fn seeded_store() -> Arc<InMemoryScreeningStore> {
    let store = Arc::new(InMemoryScreeningStore::new());
    seed_standard_template(&FormCatalog::new(store.as_ref()), None)
        .expect("template seeded")
        .expect("template created");
    store
}

pub(super) fn build_service() -> (
    ScreeningService<InMemoryScreeningStore>,
    Arc<InMemoryScreeningStore>,
) {
    let store = seeded_store();
    let service = ScreeningService::new(store.clone(), ScreeningConfig::default());
    (service, store)
}

pub(super) fn register<R>(service: &ScreeningService<R>, phone: &str) -> ClientRegistration
where
    R: crate::workflows::screening::ScreeningRepository + 'static,
{
    service
        .register_client(intake(phone), &officer())
        .expect("client registered")
}

/// Close the client's current cycle the way the loan and ACAT modules would.
pub(super) fn complete_current_cycle(store: &InMemoryScreeningStore, client: &ClientId) {
    let now = Utc::now();
    let loan = LoanSummary {
        id: LoanId::generate(),
        client: client.clone(),
        status: LoanStatus::Closed,
        date_created: now,
    };
    let acat = AcatSummary {
        id: AcatId::generate(),
        client: client.clone(),
        status: AcatStatus::Closed,
        date_created: now,
    };
    store.upsert_loan(loan.clone());
    store.upsert_acat(acat.clone());

    let ledger = HistoryLedger::new(store);
    let actor = AccountId::from("loan-officer");
    ledger
        .attach_application(client, ApplicationRef::Loan(loan.id), &actor)
        .expect("loan attached");
    ledger
        .attach_application(client, ApplicationRef::Acat(acat.id), &actor)
        .expect("acat attached");
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Where [`FailingStore`] starts refusing writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FailPoint {
    /// Every question insert after this many succeeded.
    QuestionInsertsAfter(usize),
    ScreeningInsert,
    HistoryInsert,
    HistoryUpdate,
    /// One client update, once armed with [`FailingStore::fail_client_update_after`].
    ClientUpdate,
}

/// In-memory store that fails one kind of write, for compensation tests.
pub(super) struct FailingStore {
    pub(super) inner: InMemoryScreeningStore,
    fail_point: FailPoint,
    question_inserts: AtomicUsize,
    client_updates_left: Mutex<Option<usize>>,
}

impl FailingStore {
    pub(super) fn new(inner: InMemoryScreeningStore, fail_point: FailPoint) -> Self {
        Self {
            inner,
            fail_point,
            question_inserts: AtomicUsize::new(0),
            client_updates_left: Mutex::new(None),
        }
    }

    /// Let `allowed` client updates through, then fail exactly one.
    pub(super) fn fail_client_update_after(&self, allowed: usize) {
        *self.client_updates_left.lock().expect("fail point poisoned") = Some(allowed);
    }

    fn fails(&self, point: FailPoint) -> bool {
        self.fail_point == point
    }
}

fn offline() -> RepositoryError {
    RepositoryError::Unavailable("store offline".to_string())
}

impl QuestionStore for FailingStore {
    fn insert_question(&self, question: Question) -> Result<Question, RepositoryError> {
        if let FailPoint::QuestionInsertsAfter(limit) = self.fail_point {
            if self.question_inserts.fetch_add(1, Ordering::SeqCst) >= limit {
                return Err(offline());
            }
        }
        self.inner.insert_question(question)
    }

    fn update_question(&self, question: Question) -> Result<(), RepositoryError> {
        self.inner.update_question(question)
    }

    fn fetch_question(&self, id: &QuestionId) -> Result<Option<Question>, RepositoryError> {
        self.inner.fetch_question(id)
    }

    fn delete_question(&self, id: &QuestionId) -> Result<(), RepositoryError> {
        self.inner.delete_question(id)
    }

    fn list_questions(&self) -> Result<Vec<Question>, RepositoryError> {
        self.inner.list_questions()
    }
}

impl SectionStore for FailingStore {
    fn insert_section(&self, section: Section) -> Result<Section, RepositoryError> {
        self.inner.insert_section(section)
    }

    fn update_section(&self, section: Section) -> Result<(), RepositoryError> {
        self.inner.update_section(section)
    }

    fn fetch_section(&self, id: &SectionId) -> Result<Option<Section>, RepositoryError> {
        self.inner.fetch_section(id)
    }

    fn delete_section(&self, id: &SectionId) -> Result<(), RepositoryError> {
        self.inner.delete_section(id)
    }

    fn list_sections(&self) -> Result<Vec<Section>, RepositoryError> {
        self.inner.list_sections()
    }
}

impl FormTemplateStore for FailingStore {
    fn insert_form(&self, form: FormTemplate) -> Result<FormTemplate, RepositoryError> {
        self.inner.insert_form(form)
    }

    fn update_form(&self, form: FormTemplate) -> Result<(), RepositoryError> {
        self.inner.update_form(form)
    }

    fn fetch_form(&self, id: &FormId) -> Result<Option<FormTemplate>, RepositoryError> {
        self.inner.fetch_form(id)
    }

    fn delete_form(&self, id: &FormId) -> Result<(), RepositoryError> {
        self.inner.delete_form(id)
    }

    fn list_forms(&self) -> Result<Vec<FormTemplate>, RepositoryError> {
        self.inner.list_forms()
    }

    fn find_form_by_type(
        &self,
        form_type: FormType,
    ) -> Result<Option<FormTemplate>, RepositoryError> {
        self.inner.find_form_by_type(form_type)
    }
}

impl ScreeningStore for FailingStore {
    fn insert_screening(&self, screening: Screening) -> Result<Screening, RepositoryError> {
        if self.fails(FailPoint::ScreeningInsert) {
            return Err(offline());
        }
        self.inner.insert_screening(screening)
    }

    fn update_screening(&self, screening: Screening) -> Result<(), RepositoryError> {
        self.inner.update_screening(screening)
    }

    fn fetch_screening(&self, id: &ScreeningId) -> Result<Option<Screening>, RepositoryError> {
        self.inner.fetch_screening(id)
    }

    fn delete_screening(&self, id: &ScreeningId) -> Result<(), RepositoryError> {
        self.inner.delete_screening(id)
    }

    fn list_screenings(&self) -> Result<Vec<Screening>, RepositoryError> {
        self.inner.list_screenings()
    }

    fn screenings_for_client(&self, client: &ClientId) -> Result<Vec<Screening>, RepositoryError> {
        self.inner.screenings_for_client(client)
    }
}

impl HistoryStore for FailingStore {
    fn insert_history(&self, entry: HistoryEntry) -> Result<HistoryEntry, RepositoryError> {
        if self.fails(FailPoint::HistoryInsert) {
            return Err(offline());
        }
        self.inner.insert_history(entry)
    }

    fn update_history(&self, entry: HistoryEntry) -> Result<(), RepositoryError> {
        if self.fails(FailPoint::HistoryUpdate) {
            return Err(offline());
        }
        self.inner.update_history(entry)
    }

    fn history_for_client(
        &self,
        client: &ClientId,
    ) -> Result<Option<HistoryEntry>, RepositoryError> {
        self.inner.history_for_client(client)
    }

    fn delete_history(&self, client: &ClientId) -> Result<(), RepositoryError> {
        self.inner.delete_history(client)
    }

    fn list_histories(&self) -> Result<Vec<HistoryEntry>, RepositoryError> {
        self.inner.list_histories()
    }
}

impl ClientDirectory for FailingStore {
    fn insert_client(&self, client: Client) -> Result<Client, RepositoryError> {
        self.inner.insert_client(client)
    }

    fn update_client(&self, client: Client) -> Result<(), RepositoryError> {
        if self.fails(FailPoint::ClientUpdate) {
            let mut left = self.client_updates_left.lock().expect("fail point poisoned");
            match *left {
                Some(0) => {
                    *left = None;
                    return Err(offline());
                }
                Some(allowed) => *left = Some(allowed - 1),
                None => {}
            }
        }
        self.inner.update_client(client)
    }

    fn fetch_client(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        self.inner.fetch_client(id)
    }

    fn delete_client(&self, id: &ClientId) -> Result<(), RepositoryError> {
        self.inner.delete_client(id)
    }

    fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>, RepositoryError> {
        self.inner.find_client_by_phone(phone)
    }
}

impl ApplicationDirectory for FailingStore {
    fn loans_for_client(&self, client: &ClientId) -> Result<Vec<LoanSummary>, RepositoryError> {
        self.inner.loans_for_client(client)
    }

    fn acats_for_client(&self, client: &ClientId) -> Result<Vec<AcatSummary>, RepositoryError> {
        self.inner.acats_for_client(client)
    }

    fn fetch_loan(&self, id: &LoanId) -> Result<Option<LoanSummary>, RepositoryError> {
        self.inner.fetch_loan(id)
    }

    fn fetch_acat(&self, id: &AcatId) -> Result<Option<AcatSummary>, RepositoryError> {
        self.inner.fetch_acat(id)
    }
}

impl TaskStore for FailingStore {
    fn insert_task(&self, task: Task) -> Result<Task, RepositoryError> {
        self.inner.insert_task(task)
    }

    fn update_task(&self, task: Task) -> Result<(), RepositoryError> {
        self.inner.update_task(task)
    }

    fn pending_task_for(&self, entity_ref: &str) -> Result<Option<Task>, RepositoryError> {
        self.inner.pending_task_for(entity_ref)
    }

    fn tasks_for_entity(&self, entity_ref: &str) -> Result<Vec<Task>, RepositoryError> {
        self.inner.tasks_for_entity(entity_ref)
    }
}

impl NotificationStore for FailingStore {
    fn insert_notification(
        &self,
        notification: Notification,
    ) -> Result<Notification, RepositoryError> {
        self.inner.insert_notification(notification)
    }

    fn notifications_for(&self, account: &AccountId) -> Result<Vec<Notification>, RepositoryError> {
        self.inner.notifications_for(account)
    }

    fn list_notifications(&self) -> Result<Vec<Notification>, RepositoryError> {
        self.inner.list_notifications()
    }
}

/// Core banking double recording every call.
#[derive(Debug, Default)]
pub(super) struct RecordingGateway {
    pub(super) fail_create: bool,
    calls: Mutex<Vec<String>>,
}

impl RecordingGateway {
    pub(super) fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub(super) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("gateway mutex poisoned").clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .expect("gateway mutex poisoned")
            .push(call.into());
    }
}

impl CoreBankingGateway for RecordingGateway {
    fn login(&self) -> Result<(), CbsRequestError> {
        self.record("login");
        Ok(())
    }

    fn upload_picture(&self, path: &Path) -> Result<String, CbsRequestError> {
        self.record(format!("picture:{}", path.display()));
        Ok("pic-77".to_string())
    }

    fn upload_id(&self, path: &Path) -> Result<String, CbsRequestError> {
        self.record(format!("id:{}", path.display()));
        Ok("card-78".to_string())
    }

    fn create_client(&self, customer: &CbsCustomer) -> Result<String, CbsRequestError> {
        self.record(format!("customer:{}", customer.first_name));
        if self.fail_create {
            return Err(CbsRequestError::Transport {
                endpoint: "/customer",
                message: "connection reset".to_string(),
            });
        }
        Ok("CBS-000451".to_string())
    }
}

/// Parcel service double returning a fixed verdict or failing.
#[derive(Debug)]
pub(super) struct StaticGeo {
    pub(super) verdict: Option<Value>,
    pub(super) fail: bool,
}

impl GeoValidationService for StaticGeo {
    fn submit_parcel(
        &self,
        _polygon: &GeoPolygon,
        _tag: &str,
    ) -> Result<Option<Value>, GeoServiceError> {
        if self.fail {
            return Err(GeoServiceError::Transport("wps offline".to_string()));
        }
        Ok(self.verdict.clone())
    }
}
