//! Client-side orchestration for sentence-by-sentence rewrite review.
//!
//! [`SessionController`] owns the review session, the per-unit caches and the
//! suggestion view. Remote collaborators are reached through the traits in
//! [`services`]; [`transport::HttpServices`] implements all of them over HTTP.

pub mod arbiter;
pub mod cache;
pub mod config;
pub mod controller;
pub mod drafts;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod services;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use arbiter::{RequestArbiter, RequestToken};
pub use config::ControllerSettings;
pub use controller::{
    AnalysisOutcome, ControllerEvent, ControllerPhase, ControllerSnapshot, LoadOutcome,
    SessionController,
};
pub use error::{ControllerError, ControllerResult};
pub use runtime::{dispatch_command, spawn_command_worker, ControllerCommand, DispatchError};
pub use services::{
    AnalysisService, Collaborators, DraftPersistence, SessionService, SuggestionService,
    ValidationService,
};
pub use transport::HttpServices;
