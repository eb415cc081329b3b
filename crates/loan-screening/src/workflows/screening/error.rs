use axum::http::StatusCode;

use super::domain::{ApplicationKind, Capability, ClientId, ScreeningStatus};
use super::repository::RepositoryError;
use crate::integrations::UpstreamServiceError;

/// Failure of a screening workflow operation.
#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("actor lacks the {} capability", .capability.label())]
    PermissionDenied { capability: Capability },
    #[error("{0}")]
    Conflict(String),
    #[error("{application} application is still in progress ({status})")]
    CycleInProgress {
        application: ApplicationKind,
        status: &'static str,
    },
    #[error("screening is already {0}")]
    RedundantTransition(ScreeningStatus),
    #[error("screening cannot move from {from} to {to}")]
    InvalidTransition {
        from: ScreeningStatus,
        to: ScreeningStatus,
    },
    #[error("loan cycle {cycle_number} is incomplete: {missing} application is missing")]
    IncompleteCycle {
        cycle_number: u32,
        missing: ApplicationKind,
    },
    #[error("client {0} has no loan cycle history record")]
    NoHistoryRecord(ClientId),
    #[error("client {0} has no previous screening")]
    NoScreeningHistory(ClientId),
    #[error(transparent)]
    Upstream(#[from] UpstreamServiceError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ScreeningError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable tag callers branch on.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND_ERROR",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED_ERROR",
            Self::Conflict(_) => "CONFLICT_ERROR",
            Self::CycleInProgress { .. } => "CYCLE_IN_PROGRESS_ERROR",
            Self::RedundantTransition(_) => "REDUNDANT_TRANSITION_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION_ERROR",
            Self::IncompleteCycle { .. } => "INCOMPLETE_CYCLE_ERROR",
            Self::NoHistoryRecord(_) => "NO_HISTORY_RECORD_ERROR",
            Self::NoScreeningHistory(_) => "NO_SCREENING_HISTORY_ERROR",
            Self::Upstream(_) => "UPSTREAM_SERVICE_ERROR",
            Self::Repository(_) => "REPOSITORY_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict(_)
            | Self::CycleInProgress { .. }
            | Self::RedundantTransition(_)
            | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::IncompleteCycle { .. }
            | Self::NoHistoryRecord(_)
            | Self::NoScreeningHistory(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            Self::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            Self::Repository(RepositoryError::Unavailable(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn messages(&self) -> &[String] {
        match self {
            Self::Validation(messages) => messages,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_errors_name_the_missing_application() {
        let err = ScreeningError::IncompleteCycle {
            cycle_number: 1,
            missing: ApplicationKind::Acat,
        };
        assert_eq!(
            err.to_string(),
            "loan cycle 1 is incomplete: ACAT application is missing"
        );
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn conflict_family_maps_to_409() {
        let redundant = ScreeningError::RedundantTransition(ScreeningStatus::Submitted);
        let in_progress = ScreeningError::CycleInProgress {
            application: ApplicationKind::Loan,
            status: "inprogress",
        };
        assert_eq!(redundant.status_code(), StatusCode::CONFLICT);
        assert_eq!(in_progress.status_code(), StatusCode::CONFLICT);
        assert_eq!(in_progress.kind(), "CYCLE_IN_PROGRESS_ERROR");
    }
}
