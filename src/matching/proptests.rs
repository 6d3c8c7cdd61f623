//! Property-based tests for local matching
//!
//! Tests for:
//! - Bounded set: size never exceeds capacity, most recent entries retained
//! - Similarity: symmetric, bounded, identity scores 1.0
//! - Fuzzy lookup: raising the threshold never creates a match
//! - Pipeline: hashing is deterministic for a fixed noise seed

use super::local_set::LocalMatchSet;
use super::similarity::hamming_similarity;
use crate::config::HashFunction;
use crate::pipeline::{extract, Fingerprint, FingerprintHasher, Modality, PrivacyTransform, RawTemplate};
use proptest::prelude::*;
use std::collections::{BTreeMap, VecDeque};

fn hex_string(len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(0u8..16, len).prop_map(|nibbles| {
        nibbles
            .into_iter()
            .map(|n| std::char::from_digit(u32::from(n), 16).unwrap_or('0'))
            .collect()
    })
}

// ============================================================================
// BOUNDED SET
// ============================================================================

proptest! {
    /// Property: size <= capacity after every insert
    #[test]
    fn set_never_exceeds_capacity(
        capacity in 1usize..20,
        inserts in prop::collection::vec(hex_string(8), 0..100),
    ) {
        let mut set = LocalMatchSet::new(capacity);
        for s in &inserts {
            set.insert(Fingerprint::parse(s).unwrap());
            prop_assert!(set.len() <= capacity);
        }
    }

    /// Property: the retained entries are the most recent fresh insertions
    #[test]
    fn set_retains_most_recent(
        capacity in 1usize..20,
        inserts in prop::collection::vec(hex_string(2), 0..100),
    ) {
        let mut set = LocalMatchSet::new(capacity);
        let mut model: VecDeque<String> = VecDeque::new();

        for s in &inserts {
            if !model.contains(s) {
                model.push_back(s.clone());
                while model.len() > capacity {
                    model.pop_front();
                }
            }
            set.insert(Fingerprint::parse(s).unwrap());
        }

        let actual: Vec<String> = set.iter().map(|f| f.as_str().to_string()).collect();
        let expected: Vec<String> = model.into_iter().collect();
        prop_assert_eq!(actual, expected);
    }
}

// ============================================================================
// SIMILARITY
// ============================================================================

proptest! {
    /// Property: similarity is symmetric and within [0, 1]
    #[test]
    fn similarity_symmetric_and_bounded(a in hex_string(64), b in hex_string(64)) {
        let ab = hamming_similarity(&a, &b);
        let ba = hamming_similarity(&b, &a);
        prop_assert_eq!(ab, ba);
        prop_assert!((0.0..=1.0).contains(&ab));
    }

    /// Property: a fingerprint is fully similar to itself
    #[test]
    fn similarity_identity(a in hex_string(64)) {
        prop_assert_eq!(hamming_similarity(&a, &a), 1.0);
    }

    /// Property: raising the threshold can only remove a fuzzy match
    #[test]
    fn fuzzy_threshold_monotonic(
        stored in prop::collection::vec(hex_string(16), 1..10),
        candidate in hex_string(16),
        low in 0.0f64..1.0,
        delta in 0.0f64..0.5,
    ) {
        let high = (low + delta).min(1.0);
        let mut set = LocalMatchSet::new(64);
        for s in &stored {
            set.insert(Fingerprint::parse(s).unwrap());
        }
        let candidate = Fingerprint::parse(&candidate).unwrap();

        let at_high = set.lookup_fuzzy(&candidate, high);
        let at_low = set.lookup_fuzzy(&candidate, low);
        if at_high.found {
            prop_assert!(at_low.found);
        }
    }
}

// ============================================================================
// PIPELINE DETERMINISM
// ============================================================================

proptest! {
    /// Property: same template + same seed → same fingerprint
    #[test]
    fn hash_deterministic_for_fixed_seed(
        seed in any::<u64>(),
        values in prop::collection::vec(0.0f64..1000.0, 1..50),
    ) {
        let mut timings = BTreeMap::new();
        timings.insert("dwell".to_string(), values);
        let template = RawTemplate::Behavioral { timings };

        let transform = PrivacyTransform::new(Some(seed));
        let hasher = FingerprintHasher::new(HashFunction::Sha256, [5u8; 32]);

        let a = hasher.hash(&transform.transform(extract(&template, Modality::Behavioral).unwrap()).unwrap());
        let b = hasher.hash(&transform.transform(extract(&template, Modality::Behavioral).unwrap()).unwrap());
        prop_assert_eq!(a, b);
    }
}
