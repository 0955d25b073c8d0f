//! ThresholdResolver: maps query shape to adaptive similarity thresholds
//! (§4.6), grounded on `original_source/src/retrieval/threshold_resolver.py`.

use crate::{RetrievalMode, ThresholdSet};
use once_cell::sync::Lazy;
use regex::Regex;

struct Cues {
    exact_recall: Regex,
    conceptual_explore: Regex,
    troubleshoot: Regex,
    compare: Regex,
}

static CUES: Lazy<Cues> = Lazy::new(|| Cues {
    exact_recall: Regex::new(r"(?i)\b(what was the exact|command i used|exact command)\b").unwrap(),
    conceptual_explore: Regex::new(r"(?i)\b(what do i know about|anything on)\b").unwrap(),
    troubleshoot: Regex::new(r"(?i)\b(why is|why does|error:|failing|exception)\b").unwrap(),
    compare: Regex::new(r"(?i)\b(difference between|\bvs\.?\b|compared to)\b").unwrap(),
});

fn has_literal_quote(query: &str) -> bool {
    query.contains('"') || query.contains('`')
}

#[derive(Debug, Clone, Default)]
pub struct ThresholdResolver;

impl ThresholdResolver {
    pub fn new() -> Self {
        Self
    }

    /// Classify query shape into a [`RetrievalMode`]. `hint`, when present,
    /// overrides heuristic classification (e.g. from conversation state).
    pub fn mode(&self, query: &str, hint: Option<RetrievalMode>) -> RetrievalMode {
        if let Some(hint) = hint {
            return hint;
        }
        let cues = &*CUES;
        if cues.exact_recall.is_match(query) || has_literal_quote(query) {
            RetrievalMode::ExactRecall
        } else if cues.troubleshoot.is_match(query) {
            RetrievalMode::Troubleshoot
        } else if cues.compare.is_match(query) {
            RetrievalMode::Compare
        } else if cues.conceptual_explore.is_match(query) {
            RetrievalMode::ConceptualExplore
        } else {
            RetrievalMode::Default
        }
    }

    /// Resolve a [`ThresholdSet`] for `query`. Always satisfies
    /// `cache >= raw >= knowledge` (P9).
    pub fn resolve(&self, query: &str, hint: Option<RetrievalMode>) -> ThresholdSet {
        thresholds_for(self.mode(query, hint))
    }
}

/// Closed table from §4.6.
pub fn thresholds_for(mode: RetrievalMode) -> ThresholdSet {
    match mode {
        RetrievalMode::ExactRecall => ThresholdSet { cache: 0.96, raw: 0.90, knowledge: 0.80 },
        RetrievalMode::ConceptualExplore => ThresholdSet { cache: 0.92, raw: 0.75, knowledge: 0.55 },
        RetrievalMode::Troubleshoot => ThresholdSet { cache: 0.94, raw: 0.82, knowledge: 0.65 },
        RetrievalMode::Compare => ThresholdSet { cache: 0.93, raw: 0.78, knowledge: 0.60 },
        RetrievalMode::Default => ThresholdSet { cache: 0.95, raw: 0.85, knowledge: 0.60 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_recall_classification() {
        let resolver = ThresholdResolver::new();
        let mode = resolver.mode("What was the exact command I used to start the server?", None);
        assert_eq!(mode, RetrievalMode::ExactRecall);
        let thresholds = resolver.resolve("What was the exact command I used to start the server?", None);
        assert_eq!(thresholds, ThresholdSet { cache: 0.96, raw: 0.90, knowledge: 0.80 });
    }

    #[test]
    fn test_conceptual_explore_classification() {
        let resolver = ThresholdResolver::new();
        let mode = resolver.mode("What do I know about Kubernetes?", None);
        assert_eq!(mode, RetrievalMode::ConceptualExplore);
        let thresholds = resolver.resolve("What do I know about Kubernetes?", None);
        assert_eq!(thresholds, ThresholdSet { cache: 0.92, raw: 0.75, knowledge: 0.55 });
    }

    #[test]
    fn test_hint_overrides_heuristic() {
        let resolver = ThresholdResolver::new();
        let mode = resolver.mode("hello there", Some(RetrievalMode::Compare));
        assert_eq!(mode, RetrievalMode::Compare);
    }

    #[test]
    fn test_all_modes_are_ordered() {
        for mode in [
            RetrievalMode::ExactRecall,
            RetrievalMode::ConceptualExplore,
            RetrievalMode::Troubleshoot,
            RetrievalMode::Compare,
            RetrievalMode::Default,
        ] {
            assert!(thresholds_for(mode).is_ordered());
        }
    }

    proptest::proptest! {
        /// P9: every resolved `ThresholdSet`, for any query shape and
        /// optional hint, satisfies `cache >= raw >= knowledge`.
        #[test]
        fn prop_resolve_is_always_ordered(query in ".{0,200}", hint_idx in 0u8..6) {
            let hint = match hint_idx {
                0 => Some(RetrievalMode::ExactRecall),
                1 => Some(RetrievalMode::ConceptualExplore),
                2 => Some(RetrievalMode::Troubleshoot),
                3 => Some(RetrievalMode::Compare),
                4 => Some(RetrievalMode::Default),
                _ => None,
            };
            let resolver = ThresholdResolver::new();
            prop_assert!(resolver.resolve(&query, hint).is_ordered());
        }
    }
}
