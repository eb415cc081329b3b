//! End-to-end loan cycle scenarios driven through the public service facade and
//! the HTTP router.

mod common {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};

    use loan_screening::config::ScreeningConfig;
    use loan_screening::workflows::screening::domain::{
        AccountId, Actor, BranchId, Capability, ClientId, LoanId, LoanStatus, LoanSummary,
        Spouse,
    };
    use loan_screening::workflows::screening::{
        seed_standard_template, ClientIntake, FormCatalog, InMemoryScreeningStore,
        ScreeningService,
    };

    pub(super) fn officer() -> Actor {
        Actor::new(
            AccountId::from("officer-7"),
            [Capability::Create, Capability::Update, Capability::View],
        )
    }

    pub(super) fn supervisor() -> Actor {
        Actor::new(
            AccountId::from("supervisor-2"),
            [Capability::Update, Capability::View, Capability::Authorize],
        )
    }

    pub(super) fn intake() -> ClientIntake {
        ClientIntake {
            first_name: "Tsion".to_string(),
            last_name: "Mekonnen".to_string(),
            grandfather_name: "Haile".to_string(),
            gender: "female".to_string(),
            national_id_no: "ET-99120".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1991, 11, 23),
            civil_status: "married".to_string(),
            woreda: "Adami Tulu".to_string(),
            kebele: "11".to_string(),
            house_no: "42".to_string(),
            phone: "0916554433".to_string(),
            household_members_count: Some(6),
            spouse: Some(Spouse {
                first_name: "Dawit".to_string(),
                last_name: "Girma".to_string(),
                grandfather_name: String::new(),
                national_id_no: String::new(),
            }),
            branch: Some(BranchId::from("branch-ziway")),
            ..ClientIntake::default()
        }
    }

    pub(super) fn service() -> (
        Arc<ScreeningService<InMemoryScreeningStore>>,
        Arc<InMemoryScreeningStore>,
    ) {
        let store = Arc::new(InMemoryScreeningStore::new());
        seed_standard_template(&FormCatalog::new(store.as_ref()), None)
            .expect("template seeded");
        let service = ScreeningService::new(store.clone(), ScreeningConfig::default());
        (Arc::new(service), store)
    }

    pub(super) fn loan(client: &ClientId, status: LoanStatus) -> LoanSummary {
        LoanSummary {
            id: LoanId::generate(),
            client: client.clone(),
            status,
            date_created: Utc::now(),
        }
    }
}

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::json;
use tower::ServiceExt;

use common::*;
use loan_screening::workflows::screening::domain::{
    AcatId, AcatStatus, AcatSummary, ApplicationKind, ClientStatus, LoanStatus, ScreeningStatus,
    TaskType,
};
use loan_screening::workflows::screening::repository::{
    ClientDirectory, NotificationStore, TaskStore,
};
use loan_screening::workflows::screening::{
    screening_router, ApplicationRef, ScreeningError, ScreeningUpdate,
};

fn status(raw: &str) -> ScreeningUpdate {
    ScreeningUpdate {
        status: Some(raw.to_string()),
        ..ScreeningUpdate::default()
    }
}

#[test]
fn new_client_starts_on_cycle_one() {
    let (service, _) = service();

    let registration = service
        .register_client(intake(), &officer())
        .expect("registered");

    assert_eq!(registration.client.loan_cycle_number, 1);
    assert_eq!(registration.history.cycles.len(), 1);
    let cycle = &registration.history.cycles[0];
    assert!(cycle.loan.is_none());
    assert!(cycle.acat.is_none());
    assert_eq!(registration.screening.status, ScreeningStatus::New);
}

#[test]
fn submission_creates_exactly_one_approval_task() {
    let (service, store) = service();
    let registration = service.register_client(intake(), &officer()).unwrap();

    service
        .update_screening(&registration.screening.id, status("submitted"), &officer())
        .expect("submitted");

    let client = store.fetch_client(&registration.client.id).unwrap().unwrap();
    assert_eq!(client.status, ClientStatus::ScreeningInprogress);
    let tasks = store
        .tasks_for_entity(registration.screening.id.as_str())
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::Approve);
}

#[tokio::test]
async fn approval_without_authorize_changes_nothing() {
    let (service, store) = service();
    let registration = service.register_client(intake(), &officer()).unwrap();
    service
        .update_screening(&registration.screening.id, status("submitted"), &officer())
        .unwrap();

    let response = screening_router(service.clone())
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/screenings/{}", registration.screening.id))
                .header("x-account-id", "officer-7")
                .header("x-capabilities", "UPDATE,VIEW")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "status": "approved" }).to_string()))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let task = store
        .pending_task_for(registration.screening.id.as_str())
        .unwrap();
    assert!(task.is_some(), "approval task still pending");
    assert!(store.list_notifications().unwrap().is_empty());
    assert_eq!(
        service
            .get_screening(&registration.screening.id)
            .unwrap()
            .status,
        ScreeningStatus::Submitted
    );
}

#[test]
fn second_cycle_waits_for_the_first_to_close() {
    let (service, store) = service();
    let registration = service.register_client(intake(), &officer()).unwrap();
    let client = registration.client.id.clone();
    let screening = registration.screening.id.clone();

    service
        .update_screening(&screening, status("submitted"), &officer())
        .unwrap();
    service
        .update_screening(&screening, status("approved"), &supervisor())
        .unwrap();

    let mut loan = loan(&client, LoanStatus::Inprogress);
    store.upsert_loan(loan.clone());
    service
        .attach_application(&client, ApplicationRef::Loan(loan.id.clone()), &officer())
        .expect("loan recorded");
    let acat = AcatSummary {
        id: AcatId::generate(),
        client: client.clone(),
        status: AcatStatus::Authorized,
        date_created: Utc::now(),
    };
    store.upsert_acat(acat.clone());
    service
        .attach_application(&client, ApplicationRef::Acat(acat.id), &officer())
        .expect("acat recorded");

    let err = service
        .start_cycle(&client, &officer())
        .expect_err("loan still running");
    assert!(matches!(
        err,
        ScreeningError::CycleInProgress {
            application: ApplicationKind::Loan,
            ..
        }
    ));

    loan.status = LoanStatus::Closed;
    store.upsert_loan(loan);
    let next = service.start_cycle(&client, &officer()).expect("cycle 2");

    let history = service.get_history(&client).unwrap();
    assert_eq!(history.cycle_number, 2);
    assert_eq!(history.cycles[1].screening.as_ref(), Some(&next.id));
    assert_eq!(
        store.fetch_client(&client).unwrap().unwrap().loan_cycle_number,
        2
    );
}
