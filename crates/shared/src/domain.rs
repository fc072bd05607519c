use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(DocumentId);
id_newtype!(UnitId);

/// Review status of one sentence as reported by the session service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Current,
    Processed,
    Skipped,
    Flagged,
}

impl UnitStatus {
    /// Whether the service may legally move a unit from `self` to `next`.
    ///
    /// Skipped and flagged units can be revisited and later committed; a
    /// processed unit is final.
    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (UnitStatus::Pending, UnitStatus::Current)
                | (UnitStatus::Current, UnitStatus::Processed)
                | (UnitStatus::Current, UnitStatus::Skipped)
                | (UnitStatus::Current, UnitStatus::Flagged)
                | (UnitStatus::Flagged, UnitStatus::Current)
                | (UnitStatus::Flagged, UnitStatus::Processed)
                | (UnitStatus::Skipped, UnitStatus::Current)
                | (UnitStatus::Skipped, UnitStatus::Processed)
        )
    }

    pub fn is_resolved(self) -> bool {
        matches!(
            self,
            UnitStatus::Processed | UnitStatus::Skipped | UnitStatus::Flagged
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// Source of a rewrite variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionLabel {
    Generated,
    RuleBased,
    Custom,
}

impl SuggestionLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionLabel::Generated => "generated",
            SuggestionLabel::RuleBased => "rule_based",
            SuggestionLabel::Custom => "custom",
        }
    }
}

impl fmt::Display for SuggestionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SuggestionLabel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "generated" => Ok(SuggestionLabel::Generated),
            "rule_based" | "rules" => Ok(SuggestionLabel::RuleBased),
            "custom" => Ok(SuggestionLabel::Custom),
            other => Err(format!("unknown suggestion label '{other}'")),
        }
    }
}
