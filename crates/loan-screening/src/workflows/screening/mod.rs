//! Client screening for microfinance loan origination: questionnaire templates,
//! per-cycle screening clones, the loan cycle ledger and the approval workflow.

pub mod catalog;
pub mod cloner;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod history;
pub mod intake;
pub mod memory;
pub mod repository;
pub mod router;
pub mod service;
pub mod templates;
pub mod views;

#[cfg(test)]
mod tests;

pub use catalog::{FormCatalog, FormDraft, QuestionDraft, SectionDraft};
pub use cloner::{ClonedForm, FormCloner, FormOutline, PrerequisiteLedger, RelinkStrategy};
pub use coordinator::{check_transition, AnswerUpdate, ScreeningUpdate, WorkflowCoordinator};
pub use error::ScreeningError;
pub use history::{ApplicationRef, HistoryLedger, HistoryQuery, HistorySearchResult};
pub use intake::{ClientIntake, IntakeDocument, IntakePayload};
pub use memory::InMemoryScreeningStore;
pub use repository::{Page, PageRequest, RepositoryError, ScreeningRepository};
pub use router::screening_router;
pub use service::{ClientRegistration, ScreeningService};
pub use templates::{seed_standard_template, standard_screening_template};
pub use views::{Populator, QuestionView, ScreeningView};
