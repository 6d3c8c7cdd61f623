//! Node metrics.
//!
//! [`SessionStats`] accumulates counters as sessions finish;
//! [`MetricsSnapshot`] is the read-only view returned by
//! `DedupNode::metrics`.

use crate::config::DedupConfig;
use serde::Serialize;

/// Running session counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub failed_sessions: u64,
    pub duplicates_detected: u64,
    /// Mean result confidence over completed sessions
    pub average_confidence: f64,
}

impl SessionStats {
    pub fn record_completed(&mut self, confidence: f64, is_duplicate: bool) {
        self.total_sessions += 1;
        self.completed_sessions += 1;
        if is_duplicate {
            self.duplicates_detected += 1;
        }
        // Incremental mean
        let n = self.completed_sessions as f64;
        self.average_confidence += (confidence - self.average_confidence) / n;
    }

    pub fn record_failed(&mut self) {
        self.total_sessions += 1;
        self.failed_sessions += 1;
    }
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub shard_id: String,
    pub local_set_size: usize,
    pub max_set_size: usize,
    pub registered_shards: usize,
    pub active_shards: usize,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub failed_sessions: u64,
    pub duplicates_detected: u64,
    pub average_confidence: f64,
    pub audit_entries: usize,
    pub stored_templates: usize,
    pub config: DedupConfig,
}
