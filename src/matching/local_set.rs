//! Local Match Set
//!
//! Bounded, insertion-ordered set of fingerprints for this node's
//! `primary` partition.
//!
//! ## Semantics
//!
//! - **Order**: insertion order is kept; re-inserting a present fingerprint
//!   does not move it
//! - **Eviction**: oldest by insertion (not access) until `len <= max_size`
//! - **Exact lookup**: confidence 1.0, always tried first
//! - **Fuzzy lookup**: Hamming similarity, floor [`FUZZY_FLOOR`], best
//!   candidate reported only if it clears the dedup threshold

use super::similarity::hamming_similarity;
use crate::pipeline::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Partition name for this node's own enrollments.
pub const PRIMARY_PARTITION: &str = "primary";

/// Fuzzy candidates below this similarity are discarded before ranking.
pub const FUZZY_FLOOR: f64 = 0.8;

/// How a match was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => f.write_str("exact"),
            MatchType::Fuzzy => f.write_str("fuzzy"),
        }
    }
}

/// Outcome of a lookup against one match set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intersection {
    pub found: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_hash_prefix: Option<String>,
}

impl Intersection {
    /// Nothing matched.
    pub fn none() -> Self {
        Self {
            found: false,
            confidence: 0.0,
            match_type: None,
            matched_hash_prefix: None,
        }
    }

    pub fn exact() -> Self {
        Self {
            found: true,
            confidence: 1.0,
            match_type: Some(MatchType::Exact),
            matched_hash_prefix: None,
        }
    }

    pub fn fuzzy(confidence: f64, matched: &Fingerprint) -> Self {
        Self {
            found: true,
            confidence,
            match_type: Some(MatchType::Fuzzy),
            matched_hash_prefix: Some(matched.prefix().to_string()),
        }
    }
}

/// Bounded insertion-ordered fingerprint set.
#[derive(Debug, Clone)]
pub struct LocalMatchSet {
    partition: String,
    max_size: usize,
    order: VecDeque<Fingerprint>,
    members: HashSet<Fingerprint>,
}

impl LocalMatchSet {
    /// Create the primary partition with capacity `max_size` (at least 1).
    pub fn new(max_size: usize) -> Self {
        Self {
            partition: PRIMARY_PARTITION.to_string(),
            max_size: max_size.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.members.contains(fingerprint)
    }

    /// Fingerprints oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Fingerprint> {
        self.order.iter()
    }

    /// Insert and evict; returns the evicted fingerprints, oldest first.
    pub fn insert(&mut self, fingerprint: Fingerprint) -> Vec<Fingerprint> {
        if self.members.contains(&fingerprint) {
            return Vec::new();
        }
        self.members.insert(fingerprint.clone());
        self.order.push_back(fingerprint);

        let mut evicted = Vec::new();
        while self.order.len() > self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn lookup_exact(&self, fingerprint: &Fingerprint) -> Intersection {
        if self.contains(fingerprint) {
            Intersection::exact()
        } else {
            Intersection::none()
        }
    }

    /// Best fuzzy match at or above `threshold`.
    pub fn lookup_fuzzy(&self, fingerprint: &Fingerprint, threshold: f64) -> Intersection {
        let mut candidates: Vec<(f64, &Fingerprint)> = self
            .order
            .iter()
            .map(|stored| (hamming_similarity(fingerprint.as_str(), stored.as_str()), stored))
            .filter(|(similarity, _)| *similarity >= FUZZY_FLOOR)
            .collect();

        // Stable sort keeps the oldest first among equal scores
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        match candidates.first() {
            Some((similarity, stored)) if *similarity >= threshold => {
                Intersection::fuzzy(*similarity, stored)
            }
            _ => Intersection::none(),
        }
    }

    /// Exact lookup, falling back to fuzzy only on a miss.
    pub fn lookup(&self, fingerprint: &Fingerprint, threshold: f64) -> Intersection {
        let exact = self.lookup_exact(fingerprint);
        if exact.found {
            return exact;
        }
        self.lookup_fuzzy(fingerprint, threshold)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}
