//! Command queue in front of the controller, for callers that should not hold it directly.
//!
//! Navigation-style commands run concurrently so a slow fetch never blocks the
//! queue; the controller's arbiter decides which result is shown. Mutations run
//! in arrival order.

use std::sync::Arc;

use shared::{
    domain::{DocumentId, SuggestionLabel},
    protocol::{SentenceUnit, SessionConfig},
};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{controller::SessionController, error::ControllerResult};

#[derive(Debug, Clone)]
pub enum ControllerCommand {
    Start {
        document_id: DocumentId,
        config: SessionConfig,
    },
    SelectUnit(SentenceUnit),
    LoadSuggestions(SentenceUnit),
    RequestAnalysis(SentenceUnit),
    RefreshUnits,
    Advance,
    Skip,
    Flag,
    ApplySuggestion(SuggestionLabel),
    EditDraft(String),
    ValidateCustom(String),
    ApplyCustom,
    Complete,
    Shutdown,
}

impl ControllerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerCommand::Start { .. } => "start",
            ControllerCommand::SelectUnit(_) => "select_unit",
            ControllerCommand::LoadSuggestions(_) => "load_suggestions",
            ControllerCommand::RequestAnalysis(_) => "request_analysis",
            ControllerCommand::RefreshUnits => "refresh_units",
            ControllerCommand::Advance => "advance",
            ControllerCommand::Skip => "skip",
            ControllerCommand::Flag => "flag",
            ControllerCommand::ApplySuggestion(_) => "apply_suggestion",
            ControllerCommand::EditDraft(_) => "edit_draft",
            ControllerCommand::ValidateCustom(_) => "validate_custom",
            ControllerCommand::ApplyCustom => "apply_custom",
            ControllerCommand::Complete => "complete",
            ControllerCommand::Shutdown => "shutdown",
        }
    }

    fn runs_concurrently(&self) -> bool {
        matches!(
            self,
            ControllerCommand::SelectUnit(_)
                | ControllerCommand::LoadSuggestions(_)
                | ControllerCommand::RequestAnalysis(_)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("command queue is full; please retry")]
    QueueFull,
    #[error("command worker stopped")]
    Disconnected,
}

pub fn dispatch_command(
    commands: &mpsc::Sender<ControllerCommand>,
    command: ControllerCommand,
) -> Result<(), DispatchError> {
    let name = command.name();
    match commands.try_send(command) {
        Ok(()) => {
            debug!(command = name, "queued controller command");
            Ok(())
        }
        Err(TrySendError::Full(_)) => Err(DispatchError::QueueFull),
        Err(TrySendError::Closed(_)) => Err(DispatchError::Disconnected),
    }
}

/// Spawn the worker that drains `commands` into `controller`. Results reach the
/// caller through the controller's event stream. The worker stops after
/// [`ControllerCommand::Shutdown`] or when every sender is dropped, shutting the
/// controller down either way.
pub fn spawn_command_worker(
    controller: Arc<SessionController>,
    mut commands: mpsc::Receiver<ControllerCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if matches!(command, ControllerCommand::Shutdown) {
                break;
            }
            if command.runs_concurrently() {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    run_command(&controller, command).await;
                });
            } else {
                run_command(&controller, command).await;
            }
        }
        controller.shutdown().await;
    })
}

async fn run_command(controller: &SessionController, command: ControllerCommand) {
    let name = command.name();
    if let Err(err) = execute(controller, command).await {
        warn!(command = name, error = %err, "controller command failed");
    }
}

async fn execute(controller: &SessionController, command: ControllerCommand) -> ControllerResult<()> {
    match command {
        ControllerCommand::Start {
            document_id,
            config,
        } => controller.start(document_id, config).await.map(drop),
        ControllerCommand::SelectUnit(unit) => controller.select_unit(unit).await.map(drop),
        ControllerCommand::LoadSuggestions(unit) => {
            controller.load_suggestions(unit).await.map(drop)
        }
        ControllerCommand::RequestAnalysis(unit) => {
            controller.request_analysis(&unit).await.map(drop)
        }
        ControllerCommand::RefreshUnits => controller.refresh_units().await.map(drop),
        ControllerCommand::Advance => controller.advance().await.map(drop),
        ControllerCommand::Skip => controller.skip().await.map(drop),
        ControllerCommand::Flag => controller.flag().await.map(drop),
        ControllerCommand::ApplySuggestion(label) => {
            controller.apply_suggestion(label).await.map(drop)
        }
        ControllerCommand::EditDraft(text) => controller.edit_draft(text).await,
        ControllerCommand::ValidateCustom(text) => {
            controller.validate_custom(&text).await.map(drop)
        }
        ControllerCommand::ApplyCustom => controller.apply_custom().await.map(drop),
        ControllerCommand::Complete => controller.complete().await,
        ControllerCommand::Shutdown => {
            controller.shutdown().await;
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
