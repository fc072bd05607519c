//! Collaborator seams consumed by the controller.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{DocumentId, SessionId, SuggestionLabel, UnitId},
    protocol::{
        AnalysisResult, SentenceUnit, Session, SessionConfig, SuggestionContext, SuggestionSet,
        ValidationResult,
    },
};

#[async_trait]
pub trait SessionService: Send + Sync {
    async fn start(&self, document_id: DocumentId, config: &SessionConfig) -> Result<Session>;
    async fn get_current(&self, session_id: SessionId) -> Result<Session>;
    async fn advance(&self, session_id: SessionId) -> Result<Session>;
    async fn skip(&self, session_id: SessionId) -> Result<Session>;
    async fn flag(&self, session_id: SessionId) -> Result<Session>;
    async fn apply_choice(
        &self,
        session_id: SessionId,
        unit_id: UnitId,
        label: SuggestionLabel,
        text: &str,
    ) -> Result<()>;
    async fn complete(&self, session_id: SessionId) -> Result<()>;
    async fn list_units(&self, session_id: SessionId) -> Result<Vec<SentenceUnit>>;
}

#[async_trait]
pub trait SuggestionService: Send + Sync {
    async fn get_suggestions(
        &self,
        unit_text: &str,
        context: &SuggestionContext,
    ) -> Result<SuggestionSet>;
}

#[async_trait]
pub trait ValidationService: Send + Sync {
    async fn validate_custom(
        &self,
        session_id: SessionId,
        unit_id: UnitId,
        draft_text: &str,
    ) -> Result<ValidationResult>;
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, unit_text: &str) -> Result<AnalysisResult>;
}

#[async_trait]
pub trait DraftPersistence: Send + Sync {
    async fn save_draft(&self, session_id: SessionId, unit_id: UnitId, text: &str) -> Result<()>;
}

pub struct MissingSessionService;

#[async_trait]
impl SessionService for MissingSessionService {
    async fn start(&self, document_id: DocumentId, _config: &SessionConfig) -> Result<Session> {
        Err(anyhow!(
            "session service unavailable; cannot start document {}",
            document_id.0
        ))
    }

    async fn get_current(&self, session_id: SessionId) -> Result<Session> {
        Err(anyhow!("session service unavailable for session {}", session_id.0))
    }

    async fn advance(&self, session_id: SessionId) -> Result<Session> {
        Err(anyhow!("session service unavailable for session {}", session_id.0))
    }

    async fn skip(&self, session_id: SessionId) -> Result<Session> {
        Err(anyhow!("session service unavailable for session {}", session_id.0))
    }

    async fn flag(&self, session_id: SessionId) -> Result<Session> {
        Err(anyhow!("session service unavailable for session {}", session_id.0))
    }

    async fn apply_choice(
        &self,
        session_id: SessionId,
        _unit_id: UnitId,
        _label: SuggestionLabel,
        _text: &str,
    ) -> Result<()> {
        Err(anyhow!("session service unavailable for session {}", session_id.0))
    }

    async fn complete(&self, session_id: SessionId) -> Result<()> {
        Err(anyhow!("session service unavailable for session {}", session_id.0))
    }

    async fn list_units(&self, session_id: SessionId) -> Result<Vec<SentenceUnit>> {
        Err(anyhow!("session service unavailable for session {}", session_id.0))
    }
}

pub struct MissingSuggestionService;

#[async_trait]
impl SuggestionService for MissingSuggestionService {
    async fn get_suggestions(
        &self,
        _unit_text: &str,
        context: &SuggestionContext,
    ) -> Result<SuggestionSet> {
        Err(anyhow!(
            "suggestion service unavailable for unit {}",
            context.unit_id.0
        ))
    }
}

pub struct MissingValidationService;

#[async_trait]
impl ValidationService for MissingValidationService {
    async fn validate_custom(
        &self,
        _session_id: SessionId,
        unit_id: UnitId,
        _draft_text: &str,
    ) -> Result<ValidationResult> {
        Err(anyhow!("validation service unavailable for unit {}", unit_id.0))
    }
}

pub struct MissingAnalysisService;

#[async_trait]
impl AnalysisService for MissingAnalysisService {
    async fn analyze(&self, _unit_text: &str) -> Result<AnalysisResult> {
        Err(anyhow!("analysis service unavailable"))
    }
}

/// Drops drafts on the floor; the local draft cache still holds them.
pub struct DiscardDrafts;

#[async_trait]
impl DraftPersistence for DiscardDrafts {
    async fn save_draft(&self, _session_id: SessionId, _unit_id: UnitId, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// The full set of remote collaborators a controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionService>,
    pub suggestions: Arc<dyn SuggestionService>,
    pub validation: Arc<dyn ValidationService>,
    pub analysis: Arc<dyn AnalysisService>,
    pub drafts: Arc<dyn DraftPersistence>,
}

impl Collaborators {
    pub fn missing() -> Self {
        Self {
            sessions: Arc::new(MissingSessionService),
            suggestions: Arc::new(MissingSuggestionService),
            validation: Arc::new(MissingValidationService),
            analysis: Arc::new(MissingAnalysisService),
            drafts: Arc::new(DiscardDrafts),
        }
    }

    /// Use one backend for every collaborator, e.g. a single HTTP gateway.
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: SessionService
            + SuggestionService
            + ValidationService
            + AnalysisService
            + DraftPersistence
            + 'static,
    {
        Self {
            sessions: backend.clone(),
            suggestions: backend.clone(),
            validation: backend.clone(),
            analysis: backend.clone(),
            drafts: backend,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionService>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Arc<dyn SuggestionService>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_validation(mut self, validation: Arc<dyn ValidationService>) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_analysis(mut self, analysis: Arc<dyn AnalysisService>) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn with_drafts(mut self, drafts: Arc<dyn DraftPersistence>) -> Self {
        self.drafts = drafts;
        self
    }
}
