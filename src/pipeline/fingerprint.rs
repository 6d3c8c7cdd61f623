//! Salted fingerprints
//!
//! A fingerprint is the hex HMAC of a feature set's canonical string,
//! keyed by a salt derived from the node public key. It is the only form
//! of a biometric that is ever compared, stored in the match set, or sent
//! to a peer.

use super::features::FeatureSet;
use crate::config::HashFunction;
use crate::error::ValidationError;
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Hex characters shown wherever a fingerprint must be truncated.
pub const FINGERPRINT_PREFIX_LEN: usize = 8;

/// Longest accepted fingerprint (sha512 hex).
const MAX_FINGERPRINT_LEN: usize = 128;

/// Lowercase hex fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Validate and normalize a hex fingerprint.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        if value.is_empty() {
            return Err(ValidationError::InvalidFingerprint(
                "fingerprint is empty".to_string(),
            ));
        }
        if value.len() > MAX_FINGERPRINT_LEN {
            return Err(ValidationError::InvalidFingerprint(format!(
                "fingerprint longer than {} characters",
                MAX_FINGERPRINT_LEN
            )));
        }
        if value.len() % 2 != 0 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidFingerprint(
                "fingerprint must be an even-length hex string".to_string(),
            ));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Privacy-truncated form for logs, audit payloads and results.
    pub fn prefix(&self) -> &str {
        &self.0[..self.0.len().min(FINGERPRINT_PREFIX_LEN)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// Truncate an arbitrary (possibly malformed) fingerprint string.
pub fn truncate_fingerprint(raw: &str) -> String {
    raw.chars().take(FINGERPRINT_PREFIX_LEN).collect()
}

/// Keyed hasher for feature sets.
pub struct FingerprintHasher {
    key: hmac::Key,
}

impl FingerprintHasher {
    /// Build a hasher; the salt is consumed and wiped.
    pub fn new(hash_function: HashFunction, mut salt: [u8; 32]) -> Self {
        let key = hmac::Key::new(hash_function.hmac_algorithm(), &salt);
        salt.zeroize();
        Self { key }
    }

    /// Fingerprint of the canonical serialization of `features`.
    pub fn hash(&self, features: &FeatureSet) -> Fingerprint {
        let canonical = features.canonical_string();
        let tag = hmac::sign(&self.key, canonical.as_bytes());
        Fingerprint(hex::encode(tag.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher(hash_function: HashFunction) -> FingerprintHasher {
        FingerprintHasher::new(hash_function, [9u8; 32])
    }

    #[test]
    fn test_hash_is_deterministic() {
        let set = FeatureSet::new().with("a", 0.5).with("b", 0.25);
        let h = hasher(HashFunction::Sha256);
        assert_eq!(h.hash(&set), h.hash(&set));
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = FeatureSet::new().with("x", 1.0).with("y", 2.0);
        let b = FeatureSet::new().with("y", 2.0).with("x", 1.0);
        let h = hasher(HashFunction::Sha256);
        assert_eq!(h.hash(&a), h.hash(&b));
    }

    #[test]
    fn test_salt_changes_fingerprint() {
        let set = FeatureSet::new().with("a", 0.5);
        let a = FingerprintHasher::new(HashFunction::Sha256, [1u8; 32]).hash(&set);
        let b = FingerprintHasher::new(HashFunction::Sha256, [2u8; 32]).hash(&set);
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_lengths() {
        let set = FeatureSet::new().with("a", 0.5);
        for hf in [HashFunction::Sha256, HashFunction::Sha384, HashFunction::Sha512] {
            let fp = hasher(hf).hash(&set);
            assert_eq!(fp.len(), hf.hex_len());
            assert!(Fingerprint::parse(fp.as_str()).is_ok());
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Fingerprint::parse("").is_err());
        assert!(Fingerprint::parse("abc").is_err());
        assert!(Fingerprint::parse("zz").is_err());
        assert!(Fingerprint::parse(&"a".repeat(130)).is_err());
        assert_eq!(Fingerprint::parse("ABCD").unwrap().as_str(), "abcd");
    }

    #[test]
    fn test_prefix() {
        let fp = Fingerprint::parse("0123456789abcdef").unwrap();
        assert_eq!(fp.prefix(), "01234567");
        assert_eq!(Fingerprint::parse("ab").unwrap().prefix(), "ab");
        assert_eq!(truncate_fingerprint("not-hex-at-all"), "not-hex-");
    }
}
