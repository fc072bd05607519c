//! Apply/commit: persist one chosen rewrite, then reload the authoritative session.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::{SessionId, SuggestionLabel, UnitId},
    protocol::Session,
};
use tracing::info;

use crate::{
    error::{bounded, ControllerResult},
    services::SessionService,
};

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub session_id: SessionId,
    pub unit_id: UnitId,
    pub label: SuggestionLabel,
    pub text: String,
}

pub struct CommitPipeline {
    sessions: Arc<dyn SessionService>,
    timeout: Duration,
}

impl CommitPipeline {
    pub fn new(sessions: Arc<dyn SessionService>, timeout: Duration) -> Self {
        Self { sessions, timeout }
    }

    /// Calls `apply_choice` exactly once, then re-fetches the session. Counters are
    /// never adjusted locally; the returned session is the server's view.
    pub async fn commit(&self, request: &CommitRequest) -> ControllerResult<Session> {
        bounded(
            "apply choice",
            self.timeout,
            self.sessions.apply_choice(
                request.session_id,
                request.unit_id,
                request.label,
                &request.text,
            ),
        )
        .await?;

        let session = bounded(
            "refresh session",
            self.timeout,
            self.sessions.get_current(request.session_id),
        )
        .await?;

        info!(
            session_id = request.session_id.0,
            unit_id = request.unit_id.0,
            label = %request.label,
            processed = session.processed_count,
            position = session.position,
            "pipeline: committed rewrite"
        );
        Ok(session)
    }
}
