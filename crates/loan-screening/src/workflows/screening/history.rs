use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    AcatId, AcatSummary, AccountId, ApplicationKind, BranchId, ClientId, HistoryEntry, HistoryId,
    LoanCycle, LoanId, LoanSummary, Screening, ScreeningId,
};
use super::error::ScreeningError;
use super::repository::ScreeningRepository;
use super::views::{Populator, ScreeningView};

/// Loan or ACAT application reported back into the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationRef {
    Loan(LoanId),
    Acat(AcatId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub client: ClientId,
    pub loan_cycle: Option<u32>,
    pub application: Option<ApplicationKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HistorySearchResult {
    Ledger(HistoryEntry),
    Cycle(LoanCycle),
    Screening(Box<ScreeningView>),
    Loan(LoanSummary),
    Acat(AcatSummary),
}

/// Per-client cycle ledger and the gate deciding when a new cycle may start.
pub struct HistoryLedger<'a, R: ?Sized> {
    repository: &'a R,
}

impl<'a, R> HistoryLedger<'a, R>
where
    R: ScreeningRepository + ?Sized,
{
    pub fn new(repository: &'a R) -> Self {
        Self { repository }
    }

    /// Decide whether `client` may start another cycle and return the screening
    /// to clone from. Performs no writes.
    pub fn validate_can_start_new_cycle(
        &self,
        client: &ClientId,
    ) -> Result<Screening, ScreeningError> {
        let mut screenings = self.repository.screenings_for_client(client)?;
        if screenings.is_empty() {
            return Err(ScreeningError::NoScreeningHistory(client.clone()));
        }

        if let Some(live) = screenings.iter().find(|screening| screening.status.is_live()) {
            return Err(ScreeningError::CycleInProgress {
                application: ApplicationKind::Screening,
                status: live.status.label(),
            });
        }

        let loans = self.repository.loans_for_client(client)?;
        if let Some(loan) = loans.iter().find(|loan| loan.status.is_in_progress()) {
            return Err(ScreeningError::CycleInProgress {
                application: ApplicationKind::Loan,
                status: loan.status.label(),
            });
        }

        let acats = self.repository.acats_for_client(client)?;
        if let Some(acat) = acats.iter().find(|acat| acat.status.is_in_progress()) {
            return Err(ScreeningError::CycleInProgress {
                application: ApplicationKind::Acat,
                status: acat.status.label(),
            });
        }

        let history = self
            .repository
            .history_for_client(client)?
            .ok_or_else(|| ScreeningError::NoHistoryRecord(client.clone()))?;
        ensure_cycles_complete(&history)?;

        screenings.sort_by(|left, right| right.date_created.cmp(&left.date_created));
        screenings
            .into_iter()
            .next()
            .ok_or_else(|| ScreeningError::NoScreeningHistory(client.clone()))
    }

    /// Open the ledger with cycle 1 for a freshly registered client.
    pub fn seed(
        &self,
        client: &ClientId,
        branch: &BranchId,
        screening: &ScreeningId,
        actor: &AccountId,
    ) -> Result<HistoryEntry, ScreeningError> {
        if self.repository.history_for_client(client)?.is_some() {
            return Err(ScreeningError::Conflict(format!(
                "loan cycle history for client {client} already exists"
            )));
        }

        let now = Utc::now();
        let entry = self.repository.insert_history(HistoryEntry {
            id: HistoryId::generate(),
            client: client.clone(),
            branch: branch.clone(),
            cycle_number: 1,
            cycles: vec![open_cycle(1, screening, actor)],
            date_created: now,
            last_modified: now,
        })?;

        if let Err(err) = self.set_client_cycle(client, 1) {
            if let Err(undo) = self.repository.delete_history(client) {
                warn!(client = %client, error = %undo, "failed to remove seeded history");
            }
            return Err(err);
        }
        info!(client = %client, screening = %screening, "loan cycle history seeded");
        Ok(entry)
    }

    /// Record the next cycle. Every earlier cycle must be complete.
    pub fn append_cycle(
        &self,
        client: &ClientId,
        screening: &ScreeningId,
        actor: &AccountId,
    ) -> Result<HistoryEntry, ScreeningError> {
        let mut entry = self
            .repository
            .history_for_client(client)?
            .ok_or_else(|| ScreeningError::NoHistoryRecord(client.clone()))?;
        ensure_cycles_complete(&entry)?;
        let previous = entry.clone();

        entry.cycle_number += 1;
        entry
            .cycles
            .push(open_cycle(entry.cycle_number, screening, actor));
        entry.last_modified = Utc::now();
        self.repository.update_history(entry.clone())?;

        if let Err(err) = self.set_client_cycle(client, entry.cycle_number) {
            if let Err(undo) = self.repository.update_history(previous) {
                warn!(client = %client, error = %undo, "failed to restore loan cycle history");
            }
            return Err(err);
        }
        info!(
            client = %client,
            screening = %screening,
            cycle = entry.cycle_number,
            "loan cycle appended"
        );
        Ok(entry)
    }

    /// Fill the current cycle's loan or ACAT reference.
    pub fn attach_application(
        &self,
        client: &ClientId,
        application: ApplicationRef,
        actor: &AccountId,
    ) -> Result<HistoryEntry, ScreeningError> {
        let mut entry = self
            .repository
            .history_for_client(client)?
            .ok_or_else(|| ScreeningError::NoHistoryRecord(client.clone()))?;
        let current = entry.cycle_number;
        let cycle = entry
            .cycles
            .iter_mut()
            .find(|cycle| cycle.cycle_number == current)
            .ok_or_else(|| ScreeningError::not_found("loan cycle", current))?;

        let (kind, already_set) = match &application {
            ApplicationRef::Loan(_) => (ApplicationKind::Loan, cycle.loan.is_some()),
            ApplicationRef::Acat(_) => (ApplicationKind::Acat, cycle.acat.is_some()),
        };
        if already_set {
            return Err(ScreeningError::Conflict(format!(
                "loan cycle {current} already has a {kind} application"
            )));
        }

        match application {
            ApplicationRef::Loan(loan) => cycle.loan = Some(loan),
            ApplicationRef::Acat(acat) => cycle.acat = Some(acat),
        }
        cycle.last_edit_by = actor.clone();
        entry.last_modified = Utc::now();
        self.repository.update_history(entry.clone())?;

        info!(
            client = %client,
            cycle = current,
            application = %kind,
            "application attached to cycle"
        );
        Ok(entry)
    }

    pub fn history(&self, client: &ClientId) -> Result<HistoryEntry, ScreeningError> {
        self.repository
            .history_for_client(client)?
            .ok_or_else(|| ScreeningError::not_found("history", client))
    }

    pub fn search(&self, query: &HistoryQuery) -> Result<HistorySearchResult, ScreeningError> {
        let entry = self.history(&query.client)?;

        let Some(cycle_number) = query.loan_cycle else {
            if query.application.is_some() {
                return Err(ScreeningError::Validation(vec![
                    "loanCycle is required when application is given".to_string(),
                ]));
            }
            return Ok(HistorySearchResult::Ledger(entry));
        };

        let cycle = entry
            .cycle(cycle_number)
            .cloned()
            .ok_or_else(|| ScreeningError::not_found("loan cycle", cycle_number))?;

        match query.application {
            None => Ok(HistorySearchResult::Cycle(cycle)),
            Some(ApplicationKind::Screening) => {
                let id = cycle
                    .screening
                    .ok_or_else(|| missing_application(ApplicationKind::Screening, cycle_number))?;
                let screening = self
                    .repository
                    .fetch_screening(&id)?
                    .ok_or_else(|| ScreeningError::not_found("screening", &id))?;
                let view = Populator::new(self.repository).screening(screening)?;
                Ok(HistorySearchResult::Screening(Box::new(view)))
            }
            Some(ApplicationKind::Loan) => {
                let id = cycle
                    .loan
                    .ok_or_else(|| missing_application(ApplicationKind::Loan, cycle_number))?;
                self.repository
                    .fetch_loan(&id)?
                    .map(HistorySearchResult::Loan)
                    .ok_or_else(|| ScreeningError::not_found("loan", &id))
            }
            Some(ApplicationKind::Acat) => {
                let id = cycle
                    .acat
                    .ok_or_else(|| missing_application(ApplicationKind::Acat, cycle_number))?;
                self.repository
                    .fetch_acat(&id)?
                    .map(HistorySearchResult::Acat)
                    .ok_or_else(|| ScreeningError::not_found("acat", &id))
            }
        }
    }

    fn set_client_cycle(
        &self,
        client: &ClientId,
        cycle_number: u32,
    ) -> Result<(), ScreeningError> {
        let mut record = self
            .repository
            .fetch_client(client)?
            .ok_or_else(|| ScreeningError::not_found("client", client))?;
        record.loan_cycle_number = cycle_number;
        record.last_modified = Utc::now();
        self.repository.update_client(record)?;
        Ok(())
    }
}

fn open_cycle(cycle_number: u32, screening: &ScreeningId, actor: &AccountId) -> LoanCycle {
    LoanCycle {
        cycle_number,
        screening: Some(screening.clone()),
        loan: None,
        acat: None,
        started_by: actor.clone(),
        last_edit_by: actor.clone(),
    }
}

fn ensure_cycles_complete(entry: &HistoryEntry) -> Result<(), ScreeningError> {
    for cycle in &entry.cycles {
        if let Some(missing) = cycle.first_missing() {
            return Err(ScreeningError::IncompleteCycle {
                cycle_number: cycle.cycle_number,
                missing,
            });
        }
    }
    Ok(())
}

fn missing_application(kind: ApplicationKind, cycle_number: u32) -> ScreeningError {
    ScreeningError::not_found(kind.label(), format!("for loan cycle {cycle_number}"))
}
