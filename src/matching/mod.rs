//! Local fingerprint matching.
//!
//! A bounded match set for enrollments made on this node, with exact and
//! Hamming-similarity fuzzy lookup.

pub mod local_set;
pub mod similarity;

#[cfg(test)]
mod proptests;

pub use local_set::{Intersection, LocalMatchSet, MatchType, FUZZY_FLOOR, PRIMARY_PARTITION};
pub use similarity::hamming_similarity;
