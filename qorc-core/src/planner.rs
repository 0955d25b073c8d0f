//! QueryPlanner: intent classification, web-search decision, query
//! augmentation (§4.9).

use crate::traits::{IntentClassifier, QueryAugmenter, SearchNeedDetector};
use crate::{Intent, TraceId};
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::sync::Arc;

/// Phrases that identify the system's own data; disable web search even
/// when the detector would otherwise fire (§4.9 step 2).
static INTERNAL_CONTEXT_EXCLUSIONS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bmy (memory|memories|notes|history)\b",
        r"(?i)\bwhat (did|have) i (say|told|asked)\b",
        r"(?i)\bour (conversation|previous chat)\b",
    ])
    .unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub original_query: String,
    pub sanitized_query: String,
    pub augmented_queries: Vec<String>,
    pub intent: Intent,
    pub intent_confidence: f32,
    pub allow_web_search: bool,
    pub needs_web_search: bool,
    pub web_search_reason: Option<String>,
    pub trace_id: TraceId,
}

pub struct QueryPlannerConfig {
    pub enable_web_search: bool,
}

impl Default for QueryPlannerConfig {
    fn default() -> Self {
        Self { enable_web_search: true }
    }
}

pub struct QueryPlanner {
    config: QueryPlannerConfig,
    classifier: Arc<dyn IntentClassifier>,
    augmenter: Arc<dyn QueryAugmenter>,
    detector: Arc<dyn SearchNeedDetector>,
}

impl QueryPlanner {
    pub fn new(
        config: QueryPlannerConfig,
        classifier: Arc<dyn IntentClassifier>,
        augmenter: Arc<dyn QueryAugmenter>,
        detector: Arc<dyn SearchNeedDetector>,
    ) -> Self {
        Self { config, classifier, augmenter, detector }
    }

    /// Produce a [`QueryPlan`] from a sanitized query (post-preflight) and
    /// whether the preflight gate itself allowed web search.
    pub async fn plan(
        &self,
        original_query: &str,
        sanitized_query: &str,
        preflight_allows_web_search: bool,
        history: Option<&str>,
        trace_id: TraceId,
    ) -> QueryPlan {
        let (intent, intent_confidence) = match self.classifier.classify(sanitized_query).await {
            Ok(result) => result,
            Err(_) => (Intent::General, 0.5),
        };

        let (needs_web_search, web_search_reason) = if preflight_allows_web_search
            && self.config.enable_web_search
            && !INTERNAL_CONTEXT_EXCLUSIONS.is_match(sanitized_query)
        {
            match self.detector.should_search(sanitized_query).await {
                Ok((true, reason)) => (true, Some(reason)),
                Ok((false, _)) => (false, None),
                Err(_) => (false, None),
            }
        } else {
            (false, None)
        };

        let augmented_queries = match self.augmenter.augment(sanitized_query, intent, history).await {
            Ok(mut variations) => {
                if variations.is_empty() || variations[0] != sanitized_query {
                    variations.insert(0, sanitized_query.to_string());
                }
                variations
            }
            Err(_) => vec![sanitized_query.to_string()],
        };

        QueryPlan {
            original_query: original_query.to_string(),
            sanitized_query: sanitized_query.to_string(),
            augmented_queries,
            intent,
            intent_confidence,
            allow_web_search: preflight_allows_web_search,
            needs_web_search,
            web_search_reason,
            trace_id,
        }
    }

    /// Augmentation mode per §4.9 step 3: decompose for long queries
    /// (> 15 words), full otherwise. Used by augmenter implementations to
    /// decide their own strategy; exposed here since it's query-shape-only.
    pub fn augmentation_mode(query: &str) -> &'static str {
        if query.split_whitespace().count() > 15 {
            "decompose"
        } else {
            "full"
        }
    }
}
