//! Screening questionnaires, loan-cycle history and the approval workflow backing
//! microfinance loan origination.

pub mod config;
pub mod error;
pub mod integrations;
pub mod telemetry;
pub mod workflows;
