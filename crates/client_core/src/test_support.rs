//! In-memory collaborators for controller tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{DocumentId, RiskLevel, SessionId, SuggestionLabel, UnitId, UnitStatus},
    protocol::{
        AnalysisResult, RiskMetrics, SentenceUnit, Session, SessionConfig, SuggestionContext,
        SuggestionSet, SuggestionVariant, ValidationResult,
    },
};

use crate::{
    config::ControllerSettings,
    services::{
        AnalysisService, Collaborators, DraftPersistence, SessionService, SuggestionService,
        ValidationService,
    },
};

pub(crate) const SESSION_ID: SessionId = SessionId(77);

pub(crate) fn unit(id: i64, text: &str) -> SentenceUnit {
    SentenceUnit {
        unit_id: UnitId(id),
        index: (id - 1) as u32,
        text: text.to_string(),
        metrics: RiskMetrics {
            risk_score: 0.7,
            risk_level: RiskLevel::High,
            required_terms: vec!["tenant".to_string()],
        },
        status: UnitStatus::Pending,
    }
}

pub(crate) fn document_units() -> Vec<SentenceUnit> {
    vec![
        unit(1, "The tenant shall pay all fees immediately."),
        unit(2, "The tenant waives every right to object."),
        unit(3, "Late payments by the tenant incur penalties."),
        unit(4, "The tenant accepts the premises as is."),
    ]
}

pub(crate) fn test_settings() -> ControllerSettings {
    ControllerSettings {
        draft_debounce: Duration::from_millis(30),
        request_timeout: Duration::from_secs(2),
        min_completion_fraction: 0.25,
        ..ControllerSettings::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppliedChoice {
    pub unit_id: UnitId,
    pub label: SuggestionLabel,
    pub text: String,
}

struct BackendState {
    units: Vec<SentenceUnit>,
    position: u32,
    processed: u32,
    skipped: u32,
    flagged: u32,
    completed: bool,
    suggestion_calls: HashMap<UnitId, usize>,
    suggestion_completions: HashMap<UnitId, usize>,
    suggestion_delays: HashMap<UnitId, Duration>,
    failing_suggestions: HashSet<UnitId>,
    applied: Vec<AppliedChoice>,
    mutations: usize,
    validations: usize,
    analyses: usize,
    analysis_delay: Duration,
    mutation_delay: Duration,
    saved_drafts: Vec<(UnitId, String)>,
    fail_start: bool,
    fail_apply: bool,
}

/// Scripted stand-in for every remote service, with call counters for assertions.
pub(crate) struct ScriptedBackend {
    state: Mutex<BackendState>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Arc<Self> {
        let mut units = document_units();
        units[0].status = UnitStatus::Current;
        Arc::new(Self {
            state: Mutex::new(BackendState {
                units,
                position: 0,
                processed: 0,
                skipped: 0,
                flagged: 0,
                completed: false,
                suggestion_calls: HashMap::new(),
                suggestion_completions: HashMap::new(),
                suggestion_delays: HashMap::new(),
                failing_suggestions: HashSet::new(),
                applied: Vec::new(),
                mutations: 0,
                validations: 0,
                analyses: 0,
                analysis_delay: Duration::ZERO,
                mutation_delay: Duration::ZERO,
                saved_drafts: Vec::new(),
                fail_start: false,
                fail_apply: false,
            }),
        })
    }

    pub(crate) fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators::from_backend(Arc::clone(self))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BackendState) -> T) -> T {
        let mut guard = self.state.lock().expect("backend state");
        f(&mut guard)
    }

    pub(crate) fn delay_suggestions(&self, unit_id: UnitId, delay: Duration) {
        self.with_state(|state| {
            state.suggestion_delays.insert(unit_id, delay);
        });
    }

    pub(crate) fn fail_suggestions(&self, unit_id: UnitId) {
        self.with_state(|state| {
            state.failing_suggestions.insert(unit_id);
        });
    }

    pub(crate) fn heal_suggestions(&self, unit_id: UnitId) {
        self.with_state(|state| {
            state.failing_suggestions.remove(&unit_id);
        });
    }

    pub(crate) fn delay_analysis(&self, delay: Duration) {
        self.with_state(|state| state.analysis_delay = delay);
    }

    /// Hold every session mutation (advance, skip, flag, apply) for `delay`.
    pub(crate) fn delay_mutations(&self, delay: Duration) {
        self.with_state(|state| state.mutation_delay = delay);
    }

    pub(crate) fn fail_start(&self) {
        self.with_state(|state| state.fail_start = true);
    }

    pub(crate) fn fail_apply(&self, fail: bool) {
        self.with_state(|state| state.fail_apply = fail);
    }

    pub(crate) fn suggestion_calls(&self, unit_id: UnitId) -> usize {
        self.with_state(|state| state.suggestion_calls.get(&unit_id).copied().unwrap_or(0))
    }

    pub(crate) fn suggestion_completions(&self, unit_id: UnitId) -> usize {
        self.with_state(|state| {
            state
                .suggestion_completions
                .get(&unit_id)
                .copied()
                .unwrap_or(0)
        })
    }

    pub(crate) fn applied(&self) -> Vec<AppliedChoice> {
        self.with_state(|state| state.applied.clone())
    }

    pub(crate) fn mutations(&self) -> usize {
        self.with_state(|state| state.mutations)
    }

    pub(crate) fn validations(&self) -> usize {
        self.with_state(|state| state.validations)
    }

    pub(crate) fn analyses(&self) -> usize {
        self.with_state(|state| state.analyses)
    }

    pub(crate) fn saved_drafts(&self) -> Vec<(UnitId, String)> {
        self.with_state(|state| state.saved_drafts.clone())
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.with_state(|state| state.completed)
    }

    fn session(state: &BackendState) -> Session {
        Session {
            session_id: SESSION_ID,
            document_id: DocumentId(5),
            total_units: state.units.len() as u32,
            processed_count: state.processed,
            skipped_count: state.skipped,
            flagged_count: state.flagged,
            position: state.position,
            current_unit: state.units.get(state.position as usize).cloned(),
            updated_at: Utc::now(),
        }
    }

    /// Resolve the unit at the current position with `status` and move past it.
    fn resolve_current(state: &mut BackendState, status: UnitStatus) {
        let position = state.position as usize;
        let Some(unit) = state.units.get_mut(position) else {
            return;
        };
        if !unit.status.is_resolved() {
            unit.status = status;
            match status {
                UnitStatus::Processed => state.processed += 1,
                UnitStatus::Skipped => state.skipped += 1,
                UnitStatus::Flagged => state.flagged += 1,
                UnitStatus::Pending | UnitStatus::Current => {}
            }
        }
        state.position += 1;
        if let Some(next) = state.units.get_mut(state.position as usize) {
            if next.status == UnitStatus::Pending {
                next.status = UnitStatus::Current;
            }
        }
    }

    async fn hold_mutation(&self) {
        let delay = self.with_state(|state| state.mutation_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn mutate(&self, status: UnitStatus) -> Session {
        self.hold_mutation().await;
        self.with_state(|state| {
            state.mutations += 1;
            Self::resolve_current(state, status);
            Self::session(state)
        })
    }
}

fn suggestion_set(unit_id: UnitId, text: &str) -> SuggestionSet {
    SuggestionSet {
        unit_id,
        variants: vec![
            SuggestionVariant {
                label: SuggestionLabel::Generated,
                text: format!("{text} (softened)"),
                predicted_risk: 0.2,
                similarity: 0.86,
                explanation: "reduced obligation strength".to_string(),
            },
            SuggestionVariant {
                label: SuggestionLabel::RuleBased,
                text: format!("{text} (where permitted)"),
                predicted_risk: 0.4,
                similarity: 0.93,
                explanation: "added qualifier".to_string(),
            },
        ],
    }
}

#[async_trait]
impl SessionService for ScriptedBackend {
    async fn start(&self, document_id: DocumentId, _config: &SessionConfig) -> Result<Session> {
        self.with_state(|state| {
            if state.fail_start {
                return Err(anyhow!("document {} is not analysed yet", document_id.0));
            }
            Ok(Self::session(state))
        })
    }

    async fn get_current(&self, _session_id: SessionId) -> Result<Session> {
        Ok(self.with_state(|state| Self::session(state)))
    }

    async fn advance(&self, _session_id: SessionId) -> Result<Session> {
        Ok(self.mutate(UnitStatus::Skipped).await)
    }

    async fn skip(&self, _session_id: SessionId) -> Result<Session> {
        Ok(self.mutate(UnitStatus::Skipped).await)
    }

    async fn flag(&self, _session_id: SessionId) -> Result<Session> {
        Ok(self.mutate(UnitStatus::Flagged).await)
    }

    async fn apply_choice(
        &self,
        _session_id: SessionId,
        unit_id: UnitId,
        label: SuggestionLabel,
        text: &str,
    ) -> Result<()> {
        self.hold_mutation().await;
        self.with_state(|state| {
            if state.fail_apply {
                return Err(anyhow!("session store unavailable"));
            }
            state.mutations += 1;
            state.applied.push(AppliedChoice {
                unit_id,
                label,
                text: text.to_string(),
            });
            let at_position = state
                .units
                .get(state.position as usize)
                .is_some_and(|unit| unit.unit_id == unit_id);
            if at_position {
                Self::resolve_current(state, UnitStatus::Processed);
            } else if let Some(unit) = state.units.iter_mut().find(|unit| unit.unit_id == unit_id)
            {
                if unit.status != UnitStatus::Processed {
                    unit.status = UnitStatus::Processed;
                    state.processed += 1;
                }
            }
            Ok(())
        })
    }

    async fn complete(&self, _session_id: SessionId) -> Result<()> {
        self.with_state(|state| state.completed = true);
        Ok(())
    }

    async fn list_units(&self, _session_id: SessionId) -> Result<Vec<SentenceUnit>> {
        Ok(self.with_state(|state| state.units.clone()))
    }
}

#[async_trait]
impl SuggestionService for ScriptedBackend {
    async fn get_suggestions(
        &self,
        unit_text: &str,
        context: &SuggestionContext,
    ) -> Result<SuggestionSet> {
        let unit_id = context.unit_id;
        let (delay, fail) = self.with_state(|state| {
            *state.suggestion_calls.entry(unit_id).or_default() += 1;
            (
                state
                    .suggestion_delays
                    .get(&unit_id)
                    .copied()
                    .unwrap_or(Duration::ZERO),
                state.failing_suggestions.contains(&unit_id),
            )
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|state| {
            *state.suggestion_completions.entry(unit_id).or_default() += 1;
        });
        if fail {
            return Err(anyhow!("generator overloaded"));
        }
        Ok(suggestion_set(unit_id, unit_text))
    }
}

#[async_trait]
impl ValidationService for ScriptedBackend {
    async fn validate_custom(
        &self,
        _session_id: SessionId,
        unit_id: UnitId,
        draft_text: &str,
    ) -> Result<ValidationResult> {
        let required = self.with_state(|state| {
            state.validations += 1;
            state
                .units
                .iter()
                .find(|unit| unit.unit_id == unit_id)
                .map(|unit| unit.metrics.required_terms.clone())
                .unwrap_or_default()
        });
        let missing_terms = required
            .into_iter()
            .filter(|term| !draft_text.contains(term.as_str()))
            .collect::<Vec<_>>();
        let passed = missing_terms.is_empty();
        Ok(ValidationResult {
            passed,
            similarity: if passed { 0.88 } else { 0.41 },
            message: if passed {
                "meaning preserved".to_string()
            } else {
                format!("missing required terms: {}", missing_terms.join(", "))
            },
            missing_terms,
        })
    }
}

#[async_trait]
impl AnalysisService for ScriptedBackend {
    async fn analyze(&self, unit_text: &str) -> Result<AnalysisResult> {
        let delay = self.with_state(|state| {
            state.analyses += 1;
            state.analysis_delay
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(AnalysisResult {
            summary: format!("{} words", unit_text.split_whitespace().count()),
            clauses: unit_text.split(',').map(|clause| clause.trim().to_string()).collect(),
            complexity: 0.5,
        })
    }
}

#[async_trait]
impl DraftPersistence for ScriptedBackend {
    async fn save_draft(&self, _session_id: SessionId, unit_id: UnitId, text: &str) -> Result<()> {
        self.with_state(|state| state.saved_drafts.push((unit_id, text.to_string())));
        Ok(())
    }
}
