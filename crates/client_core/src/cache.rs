//! Session-scoped result caches keyed by sentence id.
//!
//! Entries never expire; the controller clears them when a session starts. A cache
//! therefore never holds more entries than the session has units.

use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::UnitId,
    protocol::{AnalysisResult, SuggestionSet},
};

#[derive(Debug)]
pub struct UnitKeyedCache<V> {
    entries: HashMap<UnitId, Arc<V>>,
}

impl<V> Default for UnitKeyedCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> UnitKeyedCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit_id: UnitId) -> Option<Arc<V>> {
        self.entries.get(&unit_id).cloned()
    }

    /// Store a freshly fetched value. An existing entry is replaced, never mutated.
    pub fn put(&mut self, unit_id: UnitId, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.entries.insert(unit_id, Arc::clone(&value));
        value
    }
}

/// Suggestion sets already fetched this session.
pub type UnitCache = UnitKeyedCache<SuggestionSet>;

/// Deep analyses fetched on request.
pub type AnalysisCache = UnitKeyedCache<AnalysisResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{domain::SuggestionLabel, protocol::SuggestionVariant};

    fn suggestion_set(unit_id: i64, text: &str) -> SuggestionSet {
        SuggestionSet {
            unit_id: UnitId(unit_id),
            variants: vec![SuggestionVariant {
                label: SuggestionLabel::Generated,
                text: text.to_string(),
                predicted_risk: 0.1,
                similarity: 0.9,
                explanation: String::new(),
            }],
        }
    }

    #[test]
    fn miss_is_none_not_error() {
        let cache = UnitCache::new();
        assert!(cache.get(UnitId(1)).is_none());
    }

    #[test]
    fn put_replaces_without_touching_previous_handle() {
        let mut cache = UnitCache::new();
        let first = cache.put(UnitId(1), suggestion_set(1, "first"));
        let second = cache.put(UnitId(1), suggestion_set(1, "second"));

        assert_eq!(first.variants[0].text, "first");
        assert_eq!(second.variants[0].text, "second");
        assert_eq!(
            cache.get(UnitId(1)).expect("cached").variants[0].text,
            "second"
        );
    }

    #[test]
    fn entries_are_keyed_per_unit() {
        let mut cache = UnitCache::new();
        cache.put(UnitId(1), suggestion_set(1, "a"));
        cache.put(UnitId(2), suggestion_set(2, "b"));
        assert_eq!(cache.get(UnitId(1)).expect("unit 1").unit_id, UnitId(1));
        assert_eq!(cache.get(UnitId(2)).expect("unit 2").variants[0].text, "b");
    }
}
