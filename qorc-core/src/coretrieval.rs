//! CoRetrievalTracker: Hebbian co-activation edges with log-decay strength
//! (§4.8). Constants grounded on
//! `original_source/src/retrieval/coretrieval_graph.py`.

use crate::{CoRetrievalEdge, Timestamp};
use std::collections::HashMap;
use std::sync::Mutex;

/// Tunable constants, defaulted from the original implementation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoRetrievalConfig {
    pub decay_rate: f64,
    pub min_strength_threshold: f64,
    pub max_associated_items: usize,
    pub min_count_threshold: u32,
    pub auto_flush_threshold: usize,
    pub max_edges_per_recording: usize,
    pub max_ids_per_recording: usize,
}

impl Default for CoRetrievalConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.05,
            min_strength_threshold: 0.01,
            max_associated_items: 10,
            min_count_threshold: 2,
            auto_flush_threshold: 100,
            max_edges_per_recording: 50,
            max_ids_per_recording: 20,
        }
    }
}

/// Recompute strength at `now` from count and the last co-retrieval time.
/// `log(count+1) * exp(-decay_rate * days_since_last)`.
pub fn strength_at(count: u32, last_co_retrieval: Timestamp, now: Timestamp, decay_rate: f64) -> f64 {
    let days_since_last = (now - last_co_retrieval).num_seconds() as f64 / 86400.0;
    ((count as f64) + 1.0).ln() * (-decay_rate * days_since_last.max(0.0)).exp()
}

/// A pending, not-yet-flushed co-retrieval edge update.
#[derive(Debug, Clone)]
struct PendingEdge {
    count: u32,
    last_co_retrieval: Timestamp,
    context_topics: HashMap<String, u32>,
}

/// Process-wide tracker. Pending edges are buffered in memory and
/// periodically `flush()`ed to the persistent store (out of scope here: the
/// store itself is a pluggable sink).
pub struct CoRetrievalTracker {
    config: CoRetrievalConfig,
    pending: Mutex<HashMap<(String, String), PendingEdge>>,
}

impl CoRetrievalTracker {
    pub fn new(config: CoRetrievalConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Generate all unordered pairs from `retrieved_ids` (capped per event),
    /// increment counts, and bump the per-topic counter. Returns the number
    /// of edges newly buffered, and whether an auto-flush is now due.
    pub fn record_co_retrieval(&self, retrieved_ids: &[String], topic: &str, now: Timestamp) -> (usize, bool) {
        let ids: Vec<&String> = retrieved_ids
            .iter()
            .take(self.config.max_ids_per_recording)
            .collect();

        let mut pending = self.pending.lock().unwrap();
        let mut edges_touched = 0;
        'outer: for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                if edges_touched >= self.config.max_edges_per_recording {
                    break 'outer;
                }
                let (a, b) = CoRetrievalEdge::normalize_pair(ids[i], ids[j]);
                let entry = pending.entry((a, b)).or_insert_with(|| PendingEdge {
                    count: 0,
                    last_co_retrieval: now,
                    context_topics: HashMap::new(),
                });
                entry.count += 1;
                entry.last_co_retrieval = now;
                *entry.context_topics.entry(topic.to_string()).or_insert(0) += 1;
                edges_touched += 1;
            }
        }
        let due = pending.len() >= self.config.auto_flush_threshold;
        (edges_touched, due)
    }

    /// Drain all buffered edges, recomputing strength at `now`. Idempotent:
    /// may run concurrently with `record_co_retrieval`, which only adds new
    /// pending entries.
    pub fn flush(&self, now: Timestamp) -> Vec<CoRetrievalEdge> {
        let mut pending = self.pending.lock().unwrap();
        let drained: Vec<_> = pending.drain().collect();
        drained
            .into_iter()
            .map(|((a, b), edge)| CoRetrievalEdge {
                strength: strength_at(edge.count, edge.last_co_retrieval, now, self.config.decay_rate),
                item_a: a,
                item_b: b,
                count: edge.count,
                last_co_retrieval: edge.last_co_retrieval,
                context_topics: edge.context_topics,
            })
            .collect()
    }

    /// Non-draining read of the currently pending edges, recomputed at
    /// `now`. Used to feed [`Self::get_associated_items`] real edges without
    /// forcing a flush on every retrieval call.
    pub fn pending_snapshot(&self, now: Timestamp) -> Vec<CoRetrievalEdge> {
        let pending = self.pending.lock().unwrap();
        pending
            .iter()
            .map(|((a, b), edge)| CoRetrievalEdge {
                strength: strength_at(edge.count, edge.last_co_retrieval, now, self.config.decay_rate),
                item_a: a.clone(),
                item_b: b.clone(),
                count: edge.count,
                last_co_retrieval: edge.last_co_retrieval,
                context_topics: edge.context_topics.clone(),
            })
            .collect()
    }

    /// Rank `edges` incident to `item_id` by recomputed strength, filtering
    /// below `min_strength` and below `min_count_threshold`, returning the
    /// top `limit`.
    pub fn get_associated_items(
        &self,
        item_id: &str,
        edges: &[CoRetrievalEdge],
        now: Timestamp,
        min_strength: Option<f64>,
        limit: Option<usize>,
    ) -> Vec<(String, f64)> {
        let min_strength = min_strength.unwrap_or(self.config.min_strength_threshold);
        let limit = limit.unwrap_or(self.config.max_associated_items);

        let mut scored: Vec<(String, f64)> = edges
            .iter()
            .filter(|e| e.item_a == item_id || e.item_b == item_id)
            .filter(|e| e.count >= self.config.min_count_threshold)
            .map(|e| {
                let other = if e.item_a == item_id { &e.item_b } else { &e.item_a };
                let strength = strength_at(e.count, e.last_co_retrieval, now, self.config.decay_rate);
                (other.clone(), strength)
            })
            .filter(|(_, s)| *s >= min_strength)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_pairs_normalized_and_collapsed() {
        let tracker = CoRetrievalTracker::new(CoRetrievalConfig::default());
        let now = Utc::now();
        tracker.record_co_retrieval(&["b".into(), "a".into()], "topic", now);
        tracker.record_co_retrieval(&["a".into(), "b".into()], "topic", now);
        let edges = tracker.flush(now);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].count, 2);
    }

    #[test]
    fn test_strength_monotone_in_count_and_age() {
        let now = Utc::now();
        let s_low_count = strength_at(1, now, now, 0.05);
        let s_high_count = strength_at(10, now, now, 0.05);
        assert!(s_high_count > s_low_count);

        let s_recent = strength_at(5, now, now, 0.05);
        let s_stale = strength_at(5, now - ChronoDuration::days(30), now, 0.05);
        assert!(s_recent > s_stale);
    }

    proptest::proptest! {
        /// P10: holding `days_since_last` constant, strength is
        /// non-decreasing in `count`; holding `count` constant, strength is
        /// non-increasing in `days_since_last`.
        #[test]
        fn prop_strength_monotone(count_low in 0u32..500, count_delta in 0u32..500, days in 0i64..3650, day_delta in 0i64..3650) {
            let now = Utc::now();
            let count_high = count_low + count_delta;
            let s_low = strength_at(count_low, now, now, 0.05);
            let s_high = strength_at(count_high, now, now, 0.05);
            prop_assert!(s_high >= s_low);

            let later = now - ChronoDuration::days(days);
            let earlier = now - ChronoDuration::days(days + day_delta);
            let s_recent = strength_at(7, later, now, 0.05);
            let s_older = strength_at(7, earlier, now, 0.05);
            prop_assert!(s_recent >= s_older);
        }
    }

    #[test]
    fn test_get_associated_items_sorted_and_limited() {
        let tracker = CoRetrievalTracker::new(CoRetrievalConfig {
            max_associated_items: 1,
            min_count_threshold: 1,
            ..CoRetrievalConfig::default()
        });
        let now = Utc::now();
        let edges = vec![
            CoRetrievalEdge {
                item_a: "x".into(),
                item_b: "y".into(),
                count: 2,
                last_co_retrieval: now,
                strength: 0.0,
                context_topics: HashMap::new(),
            },
            CoRetrievalEdge {
                item_a: "x".into(),
                item_b: "z".into(),
                count: 10,
                last_co_retrieval: now,
                strength: 0.0,
                context_topics: HashMap::new(),
            },
        ];
        let result = tracker.get_associated_items("x", &edges, now, Some(0.0), None);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, "z");
    }

    #[test]
    fn test_edges_per_recording_capped() {
        let tracker = CoRetrievalTracker::new(CoRetrievalConfig {
            max_edges_per_recording: 2,
            ..CoRetrievalConfig::default()
        });
        let now = Utc::now();
        let ids: Vec<String> = (0..5).map(|i| format!("id{i}")).collect();
        let (touched, _) = tracker.record_co_retrieval(&ids, "topic", now);
        assert_eq!(touched, 2);
    }
}
