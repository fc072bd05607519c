use std::{future::Future, time::Duration};

use shared::domain::{SuggestionLabel, UnitId};
use thiserror::Error;

/// Errors surfaced by the session controller.
///
/// Everything except [`ControllerError::SessionStart`] leaves the controller usable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControllerError {
    #[error("no session is active; start a session first")]
    NotStarted,
    #[error("failed to start session: {0}")]
    SessionStart(String),
    #[error("session is already completed")]
    SessionCompleted,
    #[error("another operation is in progress")]
    Busy,
    #[error("no unit is selected")]
    NoActiveUnit,
    #[error("no suggestions are loaded for unit {0}")]
    NoSuggestions(UnitId),
    #[error("suggestion set for unit {unit_id} has no '{label}' variant")]
    UnknownVariant {
        unit_id: UnitId,
        label: SuggestionLabel,
    },
    #[error("custom draft is empty")]
    EmptyDraft,
    #[error("custom draft must be validated before it can be applied")]
    ValidationRequired,
    #[error("custom draft failed validation: {0}")]
    ValidationFailed(String),
    #[error("completion requires {required:.0}% of units reviewed and at least one applied rewrite (reviewed {reviewed:.0}%, processed {processed})")]
    CompletionGate {
        required: f64,
        reviewed: f64,
        processed: u32,
    },
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("{operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },
}

impl ControllerError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ControllerError::SessionStart(_))
    }

    pub(crate) fn service(operation: &'static str, err: anyhow::Error) -> Self {
        ControllerError::Service {
            operation,
            message: format!("{err:#}"),
        }
    }
}

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

/// Run one collaborator call under `timeout`, mapping failures into controller errors.
pub(crate) async fn bounded<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> ControllerResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ControllerError::service(operation, err)),
        Err(_) => Err(ControllerError::Timeout { operation }),
    }
}
