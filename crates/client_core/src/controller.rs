//! The session controller: one owner for session state, caches and the display view.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use shared::{
    domain::{DocumentId, SessionId, SuggestionLabel, UnitId},
    protocol::{
        AnalysisResult, SentenceUnit, Session, SessionConfig, SuggestionContext, SuggestionSet,
        ValidationResult,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    arbiter::RequestArbiter,
    cache::{AnalysisCache, UnitCache},
    config::ControllerSettings,
    drafts::{DraftCache, DraftDebouncer},
    error::{bounded, ControllerError, ControllerResult},
    pipeline::{CommitPipeline, CommitRequest},
    services::Collaborators,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    LoadingSession,
    Ready,
    LoadingSuggestions,
    Applying,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Served from the unit cache without a network call.
    Cached(Arc<SuggestionSet>),
    Fetched(Arc<SuggestionSet>),
    /// The request was overtaken by a newer one; its result was discarded.
    Superseded,
    /// The unit was already selected; nothing was requested.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Cached(Arc<AnalysisResult>),
    Fetched(Arc<AnalysisResult>),
    /// A fetch for this unit is already running.
    Pending,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    PhaseChanged(ControllerPhase),
    SessionUpdated(Session),
    SuggestionsReady {
        unit_id: UnitId,
        suggestions: Arc<SuggestionSet>,
        from_cache: bool,
    },
    ValidationUpdated {
        unit_id: UnitId,
        result: ValidationResult,
    },
    AnalysisReady {
        unit_id: UnitId,
        analysis: Arc<AnalysisResult>,
    },
    Error(ControllerError),
}

/// Read-only view of everything a caller needs to render.
#[derive(Debug, Clone)]
pub struct ControllerSnapshot {
    pub phase: ControllerPhase,
    pub session: Option<Session>,
    pub active_unit: Option<SentenceUnit>,
    pub suggestions: Option<Arc<SuggestionSet>>,
    pub validation: Option<ValidationResult>,
    pub draft: String,
    pub analysis: Option<Arc<AnalysisResult>>,
    pub last_error: Option<ControllerError>,
}

#[derive(Debug, Clone, Copy)]
enum Mutation {
    Advance,
    Skip,
    Flag,
}

impl Mutation {
    fn operation(self) -> &'static str {
        match self {
            Mutation::Advance => "advance",
            Mutation::Skip => "skip",
            Mutation::Flag => "flag",
        }
    }
}

struct ValidatedDraft {
    unit_id: UnitId,
    text: String,
    result: ValidationResult,
}

struct ControllerState {
    phase: ControllerPhase,
    epoch: u64,
    session: Option<Session>,
    mutation_in_flight: bool,
    active_unit: Option<SentenceUnit>,
    displayed: Option<Arc<SuggestionSet>>,
    validation: Option<ValidatedDraft>,
    units: Vec<SentenceUnit>,
    unit_cache: UnitCache,
    analysis_cache: AnalysisCache,
    drafts: DraftCache,
    last_error: Option<ControllerError>,
}

impl ControllerState {
    fn new() -> Self {
        Self {
            phase: ControllerPhase::Idle,
            epoch: 0,
            session: None,
            mutation_in_flight: false,
            active_unit: None,
            displayed: None,
            validation: None,
            units: Vec::new(),
            unit_cache: UnitCache::new(),
            analysis_cache: AnalysisCache::new(),
            drafts: DraftCache::default(),
            last_error: None,
        }
    }

    fn session_id(&self) -> ControllerResult<SessionId> {
        match (&self.session, self.phase) {
            (_, ControllerPhase::Completed) => Err(ControllerError::SessionCompleted),
            (Some(session), _) => Ok(session.session_id),
            (None, _) => Err(self
                .last_error
                .clone()
                .filter(|err| !err.is_recoverable())
                .unwrap_or(ControllerError::NotStarted)),
        }
    }

    fn session_id_for_mutation(&self) -> ControllerResult<SessionId> {
        let session_id = self.session_id()?;
        if self.mutation_in_flight {
            return Err(ControllerError::Busy);
        }
        Ok(session_id)
    }

    fn active_unit(&self) -> ControllerResult<&SentenceUnit> {
        self.active_unit.as_ref().ok_or(ControllerError::NoActiveUnit)
    }

    fn is_active(&self, unit_id: UnitId) -> bool {
        self.active_unit
            .as_ref()
            .is_some_and(|unit| unit.unit_id == unit_id)
    }

    fn clear_transient_view(&mut self) {
        self.displayed = None;
        self.validation = None;
    }
}

/// Units whose analysis is being fetched, tagged with the session epoch that asked.
type AnalysisRegistry = StdMutex<HashMap<UnitId, u64>>;

/// Marks one analysis fetch as running until dropped, even when the caller's
/// future is cancelled mid-fetch.
struct InFlightAnalysis<'a> {
    registry: &'a AnalysisRegistry,
    unit_id: UnitId,
    epoch: u64,
}

impl Drop for InFlightAnalysis<'_> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.get(&self.unit_id) == Some(&self.epoch) {
            registry.remove(&self.unit_id);
        }
    }
}

pub struct SessionController {
    collaborators: Collaborators,
    settings: ControllerSettings,
    arbiter: RequestArbiter,
    debouncer: DraftDebouncer,
    pipeline: CommitPipeline,
    inner: Mutex<ControllerState>,
    analysis_in_flight: AnalysisRegistry,
    events: broadcast::Sender<ControllerEvent>,
}

impl SessionController {
    pub fn new(collaborators: Collaborators, settings: ControllerSettings) -> Arc<Self> {
        let (events, _) = broadcast::channel(settings.event_capacity);
        Arc::new(Self {
            debouncer: DraftDebouncer::new(
                settings.draft_debounce,
                Arc::clone(&collaborators.drafts),
            ),
            pipeline: CommitPipeline::new(
                Arc::clone(&collaborators.sessions),
                settings.request_timeout,
            ),
            arbiter: RequestArbiter::new(),
            inner: Mutex::new(ControllerState::new()),
            analysis_in_flight: StdMutex::new(HashMap::new()),
            collaborators,
            settings,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        let guard = self.inner.lock().await;
        let active_id = guard.active_unit.as_ref().map(|unit| unit.unit_id);
        ControllerSnapshot {
            phase: guard.phase,
            session: guard.session.clone(),
            active_unit: guard.active_unit.clone(),
            suggestions: guard.displayed.clone(),
            validation: guard
                .validation
                .as_ref()
                .filter(|validated| Some(validated.unit_id) == active_id)
                .map(|validated| validated.result.clone()),
            draft: active_id
                .map(|unit_id| guard.drafts.get(unit_id).to_string())
                .unwrap_or_default(),
            analysis: active_id.and_then(|unit_id| guard.analysis_cache.get(unit_id)),
            last_error: guard.last_error.clone(),
        }
    }

    pub async fn draft(&self, unit_id: UnitId) -> String {
        self.inner.lock().await.drafts.get(unit_id).to_string()
    }

    pub async fn cached_suggestions(&self, unit_id: UnitId) -> Option<Arc<SuggestionSet>> {
        self.inner.lock().await.unit_cache.get(unit_id)
    }

    pub async fn units(&self) -> Vec<SentenceUnit> {
        self.inner.lock().await.units.clone()
    }

    /// Begin a session for `document_id`. Drafts still pending from a previous
    /// session are flushed before the caches are cleared.
    pub async fn start(
        &self,
        document_id: DocumentId,
        config: SessionConfig,
    ) -> ControllerResult<Session> {
        self.debouncer.flush_all().await;
        let epoch = {
            let mut guard = self.inner.lock().await;
            self.arbiter.supersede();
            let epoch = guard.epoch + 1;
            *guard = ControllerState::new();
            guard.epoch = epoch;
            self.set_phase(&mut guard, ControllerPhase::LoadingSession);
            epoch
        };

        let started = bounded(
            "start session",
            self.settings.request_timeout,
            self.collaborators.sessions.start(document_id, &config),
        )
        .await;

        let mut guard = self.inner.lock().await;
        if guard.epoch != epoch {
            return Err(ControllerError::NotStarted);
        }
        match started {
            Ok(session) => {
                info!(
                    session_id = session.session_id.0,
                    document_id = document_id.0,
                    total_units = session.total_units,
                    "controller: session started"
                );
                guard.session = Some(session.clone());
                self.set_phase(&mut guard, ControllerPhase::Ready);
                let _ = self.events.send(ControllerEvent::SessionUpdated(session.clone()));
                Ok(session)
            }
            Err(err) => {
                let err = ControllerError::SessionStart(err.to_string());
                warn!(document_id = document_id.0, error = %err, "controller: session start failed");
                self.set_phase(&mut guard, ControllerPhase::Error);
                Err(self.record_error(&mut guard, err))
            }
        }
    }

    /// Navigate to `unit`. Suggestions are requested only when the unit identity
    /// changes; selecting the unit already shown does nothing.
    pub async fn select_unit(&self, unit: SentenceUnit) -> ControllerResult<LoadOutcome> {
        {
            let guard = self.inner.lock().await;
            guard.session_id()?;
            if guard.is_active(unit.unit_id) {
                return Ok(LoadOutcome::Unchanged);
            }
        }
        self.load_suggestions(unit).await
    }

    /// Show suggestions for `unit`, fetching them only on a unit cache miss.
    pub async fn load_suggestions(&self, unit: SentenceUnit) -> ControllerResult<LoadOutcome> {
        let unit_id = unit.unit_id;

        // Focus change, cache lookup and token issue happen under one lock so the
        // most recently focused unit always holds the current token.
        let (left, lookup) = {
            let mut guard = self.inner.lock().await;
            let session_id = guard.session_id()?;
            let left = Self::focus(&mut guard, &unit);

            match guard.unit_cache.get(unit_id) {
                Some(hit) => {
                    // A hit owns the display now, so any older fetch must lose.
                    self.arbiter.supersede();
                    guard.displayed = Some(Arc::clone(&hit));
                    if matches!(
                        guard.phase,
                        ControllerPhase::LoadingSuggestions | ControllerPhase::Error
                    ) {
                        self.set_phase(&mut guard, ControllerPhase::Ready);
                    }
                    debug!(unit_id = unit_id.0, "controller: unit cache hit");
                    let _ = self.events.send(ControllerEvent::SuggestionsReady {
                        unit_id,
                        suggestions: Arc::clone(&hit),
                        from_cache: true,
                    });
                    (left, Err(hit))
                }
                None => {
                    let token = self.arbiter.issue();
                    if !guard.mutation_in_flight {
                        self.set_phase(&mut guard, ControllerPhase::LoadingSuggestions);
                    }
                    (left, Ok((token, session_id)))
                }
            }
        };

        if let Some(left) = left {
            self.debouncer.flush(left).await;
        }
        let (token, session_id) = match lookup {
            Ok(fetch) => fetch,
            Err(hit) => return Ok(LoadOutcome::Cached(hit)),
        };

        debug!(unit_id = unit_id.0, token = token.value(), "controller: fetching suggestions");
        let context = SuggestionContext {
            session_id,
            unit_id,
            index: unit.index,
            risk_level: unit.metrics.risk_level,
            required_terms: unit.metrics.required_terms.clone(),
        };
        let suggestions = Arc::clone(&self.collaborators.suggestions);
        let timeout = self.settings.request_timeout;
        let text = unit.text;
        let fetch = tokio::spawn(async move {
            bounded(
                "fetch suggestions",
                timeout,
                suggestions.get_suggestions(&text, &context),
            )
            .await
        });
        self.arbiter.track(token, fetch.abort_handle());
        let joined = fetch.await;
        self.arbiter.finish(token);

        let mut guard = self.inner.lock().await;
        if !self.arbiter.is_current(token) {
            debug!(
                unit_id = unit_id.0,
                token = token.value(),
                "controller: discarding stale suggestion response"
            );
            return Ok(LoadOutcome::Superseded);
        }

        let fetched = match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => return Ok(LoadOutcome::Superseded),
            Err(join_err) => Err(ControllerError::Service {
                operation: "fetch suggestions",
                message: join_err.to_string(),
            }),
        };
        let fetched = fetched.and_then(|set| {
            if set.unit_id == unit_id {
                Ok(set)
            } else {
                Err(ControllerError::Service {
                    operation: "fetch suggestions",
                    message: format!(
                        "received suggestions for unit {} while requesting unit {}",
                        set.unit_id, unit_id
                    ),
                })
            }
        });

        match fetched {
            Ok(set) => {
                let set = guard.unit_cache.put(unit_id, set);
                if guard.is_active(unit_id) {
                    guard.displayed = Some(Arc::clone(&set));
                }
                if guard.phase == ControllerPhase::LoadingSuggestions {
                    self.set_phase(&mut guard, ControllerPhase::Ready);
                }
                guard.last_error = None;
                let _ = self.events.send(ControllerEvent::SuggestionsReady {
                    unit_id,
                    suggestions: Arc::clone(&set),
                    from_cache: false,
                });
                Ok(LoadOutcome::Fetched(set))
            }
            Err(err) => {
                warn!(unit_id = unit_id.0, error = %err, "controller: suggestion fetch failed");
                if !guard.mutation_in_flight {
                    self.set_phase(&mut guard, ControllerPhase::Error);
                }
                Err(self.record_error(&mut guard, err))
            }
        }
    }

    pub async fn advance(&self) -> ControllerResult<Session> {
        self.mutate(Mutation::Advance).await
    }

    pub async fn skip(&self) -> ControllerResult<Session> {
        self.mutate(Mutation::Skip).await
    }

    pub async fn flag(&self) -> ControllerResult<Session> {
        self.mutate(Mutation::Flag).await
    }

    /// Commit the displayed variant labelled `label` for the active unit.
    pub async fn apply_suggestion(&self, label: SuggestionLabel) -> ControllerResult<Session> {
        let (request, epoch) = {
            let mut guard = self.inner.lock().await;
            let prepared = Self::prepare_suggestion_commit(&guard, label);
            let request = match prepared {
                Ok(request) => request,
                Err(err) => return Err(self.record_error(&mut guard, err)),
            };
            guard.mutation_in_flight = true;
            self.set_phase(&mut guard, ControllerPhase::Applying);
            (request, guard.epoch)
        };
        self.commit(request, epoch).await
    }

    /// Record a keystroke-level edit of the custom draft for the active unit.
    pub async fn edit_draft(&self, text: impl Into<String>) -> ControllerResult<()> {
        let text = text.into();
        let (session_id, unit_id) = {
            let mut guard = self.inner.lock().await;
            let session_id = guard.session_id()?;
            let unit_id = guard.active_unit()?.unit_id;
            Self::write_draft(&mut guard, unit_id, &text);
            (session_id, unit_id)
        };
        self.debouncer.schedule(session_id, unit_id, text).await;
        Ok(())
    }

    /// Validate `draft_text` as the custom rewrite of the active unit. A failing
    /// result is returned as a value; only transport problems are errors.
    pub async fn validate_custom(&self, draft_text: &str) -> ControllerResult<ValidationResult> {
        let (session_id, unit_id, epoch, edited) = {
            let mut guard = self.inner.lock().await;
            let session_id = guard.session_id()?;
            let unit_id = guard.active_unit()?.unit_id;
            if draft_text.trim().is_empty() {
                return Err(self.record_error(&mut guard, ControllerError::EmptyDraft));
            }
            let edited = guard.drafts.get(unit_id) != draft_text;
            if edited {
                Self::write_draft(&mut guard, unit_id, draft_text);
            }
            (session_id, unit_id, guard.epoch, edited)
        };
        if edited {
            self.debouncer
                .schedule(session_id, unit_id, draft_text.to_string())
                .await;
        }

        let validated = bounded(
            "validate custom rewrite",
            self.settings.request_timeout,
            self.collaborators
                .validation
                .validate_custom(session_id, unit_id, draft_text),
        )
        .await;

        let mut guard = self.inner.lock().await;
        match validated {
            Ok(result) => {
                let still_current = guard.epoch == epoch
                    && guard.is_active(unit_id)
                    && guard.drafts.get(unit_id) == draft_text;
                if still_current {
                    guard.validation = Some(ValidatedDraft {
                        unit_id,
                        text: draft_text.to_string(),
                        result: result.clone(),
                    });
                    guard.last_error = None;
                    let _ = self.events.send(ControllerEvent::ValidationUpdated {
                        unit_id,
                        result: result.clone(),
                    });
                } else {
                    debug!(unit_id = unit_id.0, "controller: draft changed during validation");
                }
                Ok(result)
            }
            Err(err) => Err(self.record_error(&mut guard, err)),
        }
    }

    /// Commit the active unit's custom draft. Requires a passing validation of the
    /// exact current text; otherwise nothing is sent to the session service.
    pub async fn apply_custom(&self) -> ControllerResult<Session> {
        let (request, epoch) = {
            let mut guard = self.inner.lock().await;
            let prepared = Self::prepare_custom_commit(&guard);
            let request = match prepared {
                Ok(request) => request,
                Err(err) => return Err(self.record_error(&mut guard, err)),
            };
            guard.mutation_in_flight = true;
            self.set_phase(&mut guard, ControllerPhase::Applying);
            (request, guard.epoch)
        };
        self.debouncer.flush(request.unit_id).await;
        self.commit(request, epoch).await
    }

    /// Fetch the structural analysis of `unit` unless it is cached or already running.
    pub async fn request_analysis(&self, unit: &SentenceUnit) -> ControllerResult<AnalysisOutcome> {
        let unit_id = unit.unit_id;
        let in_flight = {
            let mut guard = self.inner.lock().await;
            guard.session_id()?;
            if let Some(hit) = guard.analysis_cache.get(unit_id) {
                return Ok(AnalysisOutcome::Cached(hit));
            }
            let epoch = guard.epoch;
            let mut registry = self
                .analysis_in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if registry.get(&unit_id) == Some(&epoch) {
                return Ok(AnalysisOutcome::Pending);
            }
            registry.insert(unit_id, epoch);
            InFlightAnalysis {
                registry: &self.analysis_in_flight,
                unit_id,
                epoch,
            }
        };

        let analyzed = bounded(
            "analyze unit",
            self.settings.request_timeout,
            self.collaborators.analysis.analyze(&unit.text),
        )
        .await;

        let mut guard = self.inner.lock().await;
        if guard.epoch != in_flight.epoch {
            return Err(ControllerError::NotStarted);
        }
        drop(in_flight);
        match analyzed {
            Ok(analysis) => {
                let analysis = guard.analysis_cache.put(unit_id, analysis);
                let _ = self.events.send(ControllerEvent::AnalysisReady {
                    unit_id,
                    analysis: Arc::clone(&analysis),
                });
                Ok(AnalysisOutcome::Fetched(analysis))
            }
            Err(err) => Err(self.record_error(&mut guard, err)),
        }
    }

    /// Re-read the session from the service.
    pub async fn refresh_session(&self) -> ControllerResult<Session> {
        let (session_id, epoch) = {
            let guard = self.inner.lock().await;
            (guard.session_id()?, guard.epoch)
        };
        let refreshed = bounded(
            "refresh session",
            self.settings.request_timeout,
            self.collaborators.sessions.get_current(session_id),
        )
        .await;

        let mut guard = self.inner.lock().await;
        if guard.epoch != epoch {
            return Err(ControllerError::NotStarted);
        }
        match refreshed {
            Ok(session) => {
                self.store_session(&mut guard, session.clone());
                Ok(session)
            }
            Err(err) => Err(self.record_error(&mut guard, err)),
        }
    }

    /// Re-fetch the unit list used for navigation.
    pub async fn refresh_units(&self) -> ControllerResult<Vec<SentenceUnit>> {
        let (session_id, epoch) = {
            let guard = self.inner.lock().await;
            (guard.session_id()?, guard.epoch)
        };
        let listed = bounded(
            "list units",
            self.settings.request_timeout,
            self.collaborators.sessions.list_units(session_id),
        )
        .await;

        let mut guard = self.inner.lock().await;
        if guard.epoch != epoch {
            return Err(ControllerError::NotStarted);
        }
        match listed {
            Ok(units) => {
                check_status_transitions(&guard.units, &units);
                guard.units = units.clone();
                Ok(units)
            }
            Err(err) => Err(self.record_error(&mut guard, err)),
        }
    }

    /// Finish the session once enough of the document has been reviewed.
    pub async fn complete(&self) -> ControllerResult<()> {
        let (session_id, epoch) = {
            let mut guard = self.inner.lock().await;
            let gate = self.completion_gate(&guard);
            let session_id = match gate {
                Ok(session_id) => session_id,
                Err(err) => return Err(self.record_error(&mut guard, err)),
            };
            guard.mutation_in_flight = true;
            self.set_phase(&mut guard, ControllerPhase::Applying);
            (session_id, guard.epoch)
        };
        self.debouncer.flush_all().await;

        let completed = bounded(
            "complete session",
            self.settings.request_timeout,
            self.collaborators.sessions.complete(session_id),
        )
        .await;

        let mut guard = self.inner.lock().await;
        if guard.epoch != epoch {
            debug!(session_id = session_id.0, "controller: completion reply for a replaced session");
            return Err(ControllerError::NotStarted);
        }
        guard.mutation_in_flight = false;
        match completed {
            Ok(()) => {
                info!(session_id = session_id.0, "controller: session completed");
                guard.clear_transient_view();
                guard.active_unit = None;
                guard.last_error = None;
                self.set_phase(&mut guard, ControllerPhase::Completed);
                Ok(())
            }
            Err(err) => {
                self.set_phase(&mut guard, ControllerPhase::Ready);
                Err(self.record_error(&mut guard, err))
            }
        }
    }

    /// Tear down: cancel the in-flight fetch and persist every pending draft.
    pub async fn shutdown(&self) {
        {
            let _guard = self.inner.lock().await;
            self.arbiter.supersede();
        }
        let flushed = self.debouncer.flush_all().await;
        debug!(flushed, "controller: shut down");
    }

    async fn mutate(&self, mutation: Mutation) -> ControllerResult<Session> {
        let (session_id, left, epoch) = {
            let mut guard = self.inner.lock().await;
            let session_id = match guard.session_id_for_mutation() {
                Ok(session_id) => session_id,
                Err(err) => return Err(self.record_error(&mut guard, err)),
            };
            guard.mutation_in_flight = true;
            self.set_phase(&mut guard, ControllerPhase::Applying);
            let left = guard.active_unit.as_ref().map(|unit| unit.unit_id);
            (session_id, left, guard.epoch)
        };
        if let Some(left) = left {
            self.debouncer.flush(left).await;
        }

        let sessions = &self.collaborators.sessions;
        let call = match mutation {
            Mutation::Advance => sessions.advance(session_id),
            Mutation::Skip => sessions.skip(session_id),
            Mutation::Flag => sessions.flag(session_id),
        };
        let mutated = bounded(mutation.operation(), self.settings.request_timeout, call).await;

        let mut guard = self.inner.lock().await;
        if guard.epoch != epoch {
            debug!(
                session_id = session_id.0,
                operation = mutation.operation(),
                "controller: mutation reply for a replaced session"
            );
            return Err(ControllerError::NotStarted);
        }
        guard.mutation_in_flight = false;
        match mutated {
            Ok(session) => {
                info!(
                    session_id = session_id.0,
                    operation = mutation.operation(),
                    position = session.position,
                    "controller: session mutated"
                );
                // No auto-navigation: the caller selects the next unit explicitly.
                // A unit selected while the call was running keeps its focus.
                if left.is_some_and(|left| guard.is_active(left)) {
                    guard.clear_transient_view();
                    guard.active_unit = None;
                }
                guard.last_error = None;
                self.store_session(&mut guard, session.clone());
                self.set_phase(&mut guard, ControllerPhase::Ready);
                Ok(session)
            }
            Err(err) => {
                self.set_phase(&mut guard, ControllerPhase::Ready);
                Err(self.record_error(&mut guard, err))
            }
        }
    }

    async fn commit(&self, request: CommitRequest, epoch: u64) -> ControllerResult<Session> {
        let committed = self.pipeline.commit(&request).await;

        let (session, refresh_units) = {
            let mut guard = self.inner.lock().await;
            if guard.epoch != epoch {
                debug!(
                    unit_id = request.unit_id.0,
                    "controller: commit reply for a replaced session"
                );
                return Err(ControllerError::NotStarted);
            }
            guard.mutation_in_flight = false;
            let session = match committed {
                Ok(session) => session,
                Err(err) => {
                    // The unit stays selected with its draft so the user can retry.
                    self.set_phase(&mut guard, ControllerPhase::Ready);
                    return Err(self.record_error(&mut guard, err));
                }
            };
            if guard.is_active(request.unit_id) {
                guard.clear_transient_view();
                guard.active_unit = None;
            }
            guard.last_error = None;
            self.store_session(&mut guard, session.clone());
            self.set_phase(&mut guard, ControllerPhase::Ready);
            (session, !guard.units.is_empty())
        };

        if refresh_units {
            if let Err(err) = self.refresh_units().await {
                warn!(error = %err, "controller: unit list refresh after commit failed");
            }
        }
        Ok(session)
    }

    /// Make `unit` the active unit. Returns the unit that lost focus, if any.
    fn focus(state: &mut ControllerState, unit: &SentenceUnit) -> Option<UnitId> {
        if state.is_active(unit.unit_id) {
            return None;
        }
        let left = state.active_unit.replace(unit.clone()).map(|left| left.unit_id);
        state.clear_transient_view();
        left
    }

    fn prepare_suggestion_commit(
        state: &ControllerState,
        label: SuggestionLabel,
    ) -> ControllerResult<CommitRequest> {
        let session_id = state.session_id_for_mutation()?;
        let unit_id = state.active_unit()?.unit_id;
        let set = state
            .displayed
            .as_ref()
            .filter(|set| set.unit_id == unit_id)
            .ok_or(ControllerError::NoSuggestions(unit_id))?;
        let variant = set
            .variant(label)
            .ok_or(ControllerError::UnknownVariant { unit_id, label })?;
        Ok(CommitRequest {
            session_id,
            unit_id,
            label,
            text: variant.text.clone(),
        })
    }

    fn prepare_custom_commit(state: &ControllerState) -> ControllerResult<CommitRequest> {
        let session_id = state.session_id_for_mutation()?;
        let unit_id = state.active_unit()?.unit_id;
        let draft = state.drafts.get(unit_id);
        if draft.trim().is_empty() {
            return Err(ControllerError::EmptyDraft);
        }
        match &state.validation {
            Some(validated) if validated.unit_id == unit_id && validated.text == draft => {
                if !validated.result.passed {
                    return Err(ControllerError::ValidationFailed(
                        validated.result.message.clone(),
                    ));
                }
            }
            _ => return Err(ControllerError::ValidationRequired),
        }
        Ok(CommitRequest {
            session_id,
            unit_id,
            label: SuggestionLabel::Custom,
            text: draft.to_string(),
        })
    }

    fn completion_gate(&self, state: &ControllerState) -> ControllerResult<SessionId> {
        let session_id = state.session_id_for_mutation()?;
        let Some(session) = state.session.as_ref() else {
            return Err(ControllerError::NotStarted);
        };
        let required = self.settings.min_completion_fraction;
        let reviewed = session.reviewed_fraction();
        if session.processed_count == 0 || reviewed < required {
            return Err(ControllerError::CompletionGate {
                required: required * 100.0,
                reviewed: reviewed * 100.0,
                processed: session.processed_count,
            });
        }
        Ok(session_id)
    }

    /// Any edit that changes the text invalidates a prior validation.
    fn write_draft(state: &mut ControllerState, unit_id: UnitId, text: &str) {
        state.drafts.set(unit_id, text);
        let invalidated = state
            .validation
            .as_ref()
            .is_some_and(|validated| validated.unit_id == unit_id && validated.text != text);
        if invalidated {
            state.validation = None;
        }
    }

    fn store_session(&self, state: &mut ControllerState, session: Session) {
        state.session = Some(session.clone());
        let _ = self.events.send(ControllerEvent::SessionUpdated(session));
    }

    fn set_phase(&self, state: &mut ControllerState, phase: ControllerPhase) {
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "controller: phase change");
            state.phase = phase;
            let _ = self.events.send(ControllerEvent::PhaseChanged(phase));
        }
    }

    fn record_error(&self, state: &mut ControllerState, err: ControllerError) -> ControllerError {
        state.last_error = Some(err.clone());
        let _ = self.events.send(ControllerEvent::Error(err.clone()));
        err
    }
}

fn check_status_transitions(previous: &[SentenceUnit], next: &[SentenceUnit]) {
    let before = previous
        .iter()
        .map(|unit| (unit.unit_id, unit.status))
        .collect::<HashMap<_, _>>();
    for unit in next {
        if let Some(old) = before.get(&unit.unit_id) {
            if !old.can_transition_to(unit.status) {
                warn!(
                    unit_id = unit.unit_id.0,
                    from = ?old,
                    to = ?unit.status,
                    "controller: service reported an unexpected unit status transition"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
