use crate::infra::{demo_officer, demo_supervisor, system_account};
use chrono::{NaiveDate, Utc};
use clap::Args;
use loan_screening::config::ScreeningConfig;
use loan_screening::error::AppError;
use loan_screening::workflows::screening::domain::{
    AcatId, AcatStatus, AcatSummary, Actor, BranchId, ClientId, FormType, LoanId, LoanStatus,
    LoanSummary, ScreeningId, Spouse,
};
use loan_screening::workflows::screening::repository::{NotificationStore, TaskStore};
use loan_screening::workflows::screening::{
    seed_standard_template, AnswerUpdate, ApplicationRef, ClientIntake, FormCatalog,
    InMemoryScreeningStore, ScreeningError, ScreeningService, ScreeningUpdate,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Phone number of the demo client
    #[arg(long, default_value = "0911223344")]
    pub(crate) phone: String,
    /// Branch the demo client is registered at
    #[arg(long, default_value = "branch-meki")]
    pub(crate) branch: String,
    /// Stop after the first screening is approved
    #[arg(long)]
    pub(crate) single_cycle: bool,
    /// Print the registration and final history as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct TemplateArgs {
    /// Emit single-line JSON instead of pretty output
    #[arg(long)]
    pub(crate) compact: bool,
}

pub(crate) fn run_template_preview(args: TemplateArgs) -> Result<(), AppError> {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    seed_standard_template(&catalog, Some(system_account()))?;
    let form = catalog.find_form(FormType::Screening)?;

    let rendered = if args.compact {
        serde_json::to_string(&form)?
    } else {
        serde_json::to_string_pretty(&form)?
    };
    println!("{rendered}");
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        phone,
        branch,
        single_cycle,
        json,
    } = args;

    let store = Arc::new(InMemoryScreeningStore::new());
    seed_standard_template(&FormCatalog::new(store.as_ref()), Some(system_account()))?;
    let service = ScreeningService::new(store.clone(), ScreeningConfig::default());
    let officer = demo_officer();
    let supervisor = demo_supervisor();

    println!("Loan screening demo");
    let registration = service.register_client(demo_intake(phone, branch), &officer)?;
    let client = registration.client.id.clone();
    let screening = registration.screening.id.clone();
    println!(
        "- Registered {} {} ({}) -> cycle {}, screening {} [{}]",
        registration.client.first_name,
        registration.client.last_name,
        client,
        registration.client.loan_cycle_number,
        screening,
        registration.screening.status.label()
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&registration)?);
    }

    let first_question = registration
        .screening
        .questions
        .first()
        .map(|question| (question.id.clone(), question.question_text.clone()));
    if let Some((id, text)) = first_question {
        service.update_screening(
            &screening,
            ScreeningUpdate {
                questions: vec![AnswerUpdate {
                    id,
                    values: Some(vec!["yes".to_string()]),
                    remark: None,
                    show: None,
                    sub_questions: Vec::new(),
                }],
                ..ScreeningUpdate::default()
            },
            &officer,
        )?;
        println!("- Answered '{text}' with 'yes'");
    }

    drive(&service, &screening, "submitted", None, &officer)?;
    if let Some(task) = store
        .pending_task_for(screening.as_str())
        .map_err(ScreeningError::from)?
    {
        println!("  Pending task: {} ({:?})", task.task, task.task_type);
    }
    drive(
        &service,
        &screening,
        "approved",
        Some("Household visit confirmed"),
        &supervisor,
    )?;
    for notification in store
        .notifications_for(&officer.account)
        .map_err(ScreeningError::from)?
    {
        println!("  Notification to {}: {}", officer.account, notification.message);
    }

    if single_cycle {
        return Ok(());
    }

    println!("\nClosing cycle 1 and opening cycle 2");
    close_cycle(&service, &store, &client)?;
    let next = service.start_cycle(&client, &officer)?;
    println!(
        "- Cycle 2 screening {} cloned with {} questions and {} sections",
        next.id,
        next.questions.len(),
        next.sections.len()
    );

    let history = service.get_history(&client)?;
    println!("Loan cycle ledger:");
    for cycle in &history.cycles {
        println!(
            "  - cycle {}: screening {} | loan {} | acat {}",
            cycle.cycle_number,
            display(cycle.screening.as_ref()),
            display(cycle.loan.as_ref()),
            display(cycle.acat.as_ref())
        );
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    }
    Ok(())
}

fn drive(
    service: &ScreeningService<InMemoryScreeningStore>,
    screening: &ScreeningId,
    status: &str,
    comment: Option<&str>,
    actor: &Actor,
) -> Result<(), AppError> {
    let updated = service.update_screening(
        screening,
        ScreeningUpdate {
            status: Some(status.to_string()),
            comment: comment.map(str::to_string),
            ..ScreeningUpdate::default()
        },
        actor,
    )?;
    println!(
        "- {} moved screening to {}",
        actor.account,
        updated.status.label()
    );
    Ok(())
}

/// Stands in for the loan and ACAT services, which own those records.
fn close_cycle(
    service: &ScreeningService<InMemoryScreeningStore>,
    store: &InMemoryScreeningStore,
    client: &ClientId,
) -> Result<(), AppError> {
    let officer = demo_officer();
    let loan = LoanSummary {
        id: LoanId::generate(),
        client: client.clone(),
        status: LoanStatus::Closed,
        date_created: Utc::now(),
    };
    store.upsert_loan(loan.clone());
    service.attach_application(client, ApplicationRef::Loan(loan.id), &officer)?;

    let acat = AcatSummary {
        id: AcatId::generate(),
        client: client.clone(),
        status: AcatStatus::Authorized,
        date_created: Utc::now(),
    };
    store.upsert_acat(acat.clone());
    service.attach_application(client, ApplicationRef::Acat(acat.id), &officer)?;
    Ok(())
}

fn display<T: std::fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "-".to_string(), ToString::to_string)
}

fn demo_intake(phone: String, branch: String) -> ClientIntake {
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
        phone,
        household_members_count: Some(5),
        spouse: Some(Spouse {
            first_name: "Kebede".to_string(),
            last_name: "Alemu".to_string(),
            grandfather_name: String::new(),
            national_id_no: String::new(),
        }),
        branch: Some(BranchId::from(branch.as_str())),
        ..ClientIntake::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_runs_both_cycles() {
        run_demo(DemoArgs {
            phone: "0911000001".to_string(),
            branch: "branch-ziway".to_string(),
            single_cycle: false,
            json: true,
        })
        .expect("demo completes");
    }

    #[test]
    fn template_preview_renders() {
        run_template_preview(TemplateArgs { compact: true }).expect("template renders");
    }
}
