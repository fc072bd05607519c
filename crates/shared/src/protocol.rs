use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    DocumentId, RiskLevel, SessionId, SuggestionLabel, UnitId, UnitStatus,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskMetrics {
    pub risk_score: f32,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_terms: Vec<String>,
}

/// Snapshot of one sentence as produced by the analysis collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceUnit {
    pub unit_id: UnitId,
    pub index: u32,
    pub text: String,
    #[serde(default)]
    pub metrics: RiskMetrics,
    pub status: UnitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub document_id: DocumentId,
    pub total_units: u32,
    pub processed_count: u32,
    pub skipped_count: u32,
    pub flagged_count: u32,
    pub position: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_unit: Option<SentenceUnit>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn is_terminal(&self) -> bool {
        self.position >= self.total_units
    }

    /// Fraction of units the reviewer has moved past, in `[0, 1]`.
    pub fn reviewed_fraction(&self) -> f64 {
        if self.total_units == 0 {
            return 1.0;
        }
        (f64::from(self.position) / f64::from(self.total_units)).min(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub min_risk_level: RiskLevel,
    #[serde(default = "default_include_rule_based")]
    pub include_rule_based: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_risk_level: RiskLevel::Low,
            include_rule_based: true,
        }
    }
}

fn default_include_rule_based() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionVariant {
    pub label: SuggestionLabel,
    pub text: String,
    pub predicted_risk: f32,
    pub similarity: f32,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionSet {
    pub unit_id: UnitId,
    #[serde(default)]
    pub variants: Vec<SuggestionVariant>,
}

impl SuggestionSet {
    pub fn variant(&self, label: SuggestionLabel) -> Option<&SuggestionVariant> {
        self.variants.iter().find(|variant| variant.label == label)
    }
}

/// Context forwarded to the suggestion service alongside the sentence text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionContext {
    pub session_id: SessionId,
    pub unit_id: UnitId,
    pub index: u32,
    pub risk_level: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub similarity: f32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_terms: Vec<String>,
}

/// Structural breakdown of a sentence, fetched only on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub clauses: Vec<String>,
    pub complexity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub document_id: DocumentId,
    #[serde(default)]
    pub config: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyChoiceRequest {
    pub unit_id: UnitId,
    pub label: SuggestionLabel,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRequest {
    pub text: String,
    pub context: SuggestionContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateCustomRequest {
    pub draft_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveDraftRequest {
    pub text: String,
}
