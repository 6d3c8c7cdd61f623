//! Node configuration
//!
//! Every tunable of the deduplication engine lives in [`DedupConfig`].
//! The struct is validated once when a node is constructed and never
//! changes afterwards; a node that needs different settings is a new node.
//!
//! Defaults:
//!
//! | field                     | default         |
//! |---------------------------|-----------------|
//! | `deduplication_threshold` | 0.95            |
//! | `hash_function`           | `sha256`        |
//! | `key_size`                | 256 bits        |
//! | `max_set_size`            | 10 000          |
//! | `cross_shard_enabled`     | true            |
//! | `audit_retention_days`    | 90              |
//! | `shard_id`                | `local-shard`   |
//! | `shard_timeout_ms`        | 5000            |
//! | `noise_seed`              | none (entropy)  |

use ring::hmac;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_THRESHOLD: f64 = 0.95;
const DEFAULT_KEY_SIZE: u32 = 256;
const DEFAULT_MAX_SET_SIZE: usize = 10_000;
const DEFAULT_RETENTION_DAYS: u32 = 90;
const DEFAULT_SHARD_ID: &str = "local-shard";
const DEFAULT_SHARD_TIMEOUT_MS: u64 = 5_000;

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid deduplication threshold {0}: must be between 0.0 and 1.0")]
    InvalidThreshold(f64),

    #[error("Unsupported hash function: {0}")]
    UnsupportedHashFunction(String),

    #[error("Invalid key size {0}: must be a multiple of 8 between 128 and 4096 bits")]
    InvalidKeySize(u32),

    #[error("max_set_size must be at least 1")]
    InvalidMaxSetSize,

    #[error("shard_id must be non-empty printable text")]
    InvalidShardId,

    #[error("shard_timeout_ms must be at least 1")]
    InvalidShardTimeout,
}

/// Digest used for fingerprint HMACs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HashFunction {
    Sha256,
    Sha384,
    Sha512,
}

impl HashFunction {
    /// Identifier as used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            HashFunction::Sha256 => "sha256",
            HashFunction::Sha384 => "sha384",
            HashFunction::Sha512 => "sha512",
        }
    }

    /// Matching ring HMAC algorithm.
    pub fn hmac_algorithm(&self) -> hmac::Algorithm {
        match self {
            HashFunction::Sha256 => hmac::HMAC_SHA256,
            HashFunction::Sha384 => hmac::HMAC_SHA384,
            HashFunction::Sha512 => hmac::HMAC_SHA512,
        }
    }

    /// Fingerprint length in hex characters.
    pub fn hex_len(&self) -> usize {
        match self {
            HashFunction::Sha256 => 64,
            HashFunction::Sha384 => 96,
            HashFunction::Sha512 => 128,
        }
    }
}

impl fmt::Display for HashFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashFunction::Sha256),
            "sha384" => Ok(HashFunction::Sha384),
            "sha512" => Ok(HashFunction::Sha512),
            _ => Err(ConfigError::UnsupportedHashFunction(s.to_string())),
        }
    }
}

impl TryFrom<String> for HashFunction {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HashFunction> for String {
    fn from(value: HashFunction) -> Self {
        value.name().to_string()
    }
}

/// Deduplication engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum confidence to declare a duplicate
    pub deduplication_threshold: f64,

    /// Digest for fingerprint HMACs
    pub hash_function: HashFunction,

    /// Node key material size in bits
    pub key_size: u32,

    /// Capacity of the local match set
    pub max_set_size: usize,

    /// Fan dedup checks out to registered shards
    pub cross_shard_enabled: bool,

    /// Audit entries older than this are pruned
    pub audit_retention_days: u32,

    /// This node's shard identifier (stamped on audit entries and responses)
    pub shard_id: String,

    /// Per-shard intersection request timeout
    pub shard_timeout_ms: u64,

    /// Fixed seed for privacy noise; entropy-seeded when absent
    pub noise_seed: Option<u64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            deduplication_threshold: DEFAULT_THRESHOLD,
            hash_function: HashFunction::Sha256,
            key_size: DEFAULT_KEY_SIZE,
            max_set_size: DEFAULT_MAX_SET_SIZE,
            cross_shard_enabled: true,
            audit_retention_days: DEFAULT_RETENTION_DAYS,
            shard_id: DEFAULT_SHARD_ID.to_string(),
            shard_timeout_ms: DEFAULT_SHARD_TIMEOUT_MS,
            noise_seed: None,
        }
    }
}

impl DedupConfig {
    /// Check every field; called once by `DedupNode::new`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.deduplication_threshold) {
            return Err(ConfigError::InvalidThreshold(self.deduplication_threshold));
        }

        if self.key_size % 8 != 0 || !(128..=4096).contains(&self.key_size) {
            return Err(ConfigError::InvalidKeySize(self.key_size));
        }

        if self.max_set_size == 0 {
            return Err(ConfigError::InvalidMaxSetSize);
        }

        if self.shard_id.trim().is_empty() || self.shard_id.chars().any(char::is_control) {
            return Err(ConfigError::InvalidShardId);
        }

        if self.shard_timeout_ms == 0 {
            return Err(ConfigError::InvalidShardTimeout);
        }

        Ok(())
    }

    /// Key material length in bytes.
    pub fn key_bytes(&self) -> usize {
        (self.key_size / 8) as usize
    }

    /// Retention window in milliseconds.
    pub fn retention_millis(&self) -> u64 {
        u64::from(self.audit_retention_days) * crate::clock::MILLIS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DedupConfig::default();
        assert_eq!(config.deduplication_threshold, 0.95);
        assert_eq!(config.hash_function, HashFunction::Sha256);
        assert_eq!(config.key_size, 256);
        assert_eq!(config.max_set_size, 10_000);
        assert!(config.cross_shard_enabled);
        assert_eq!(config.audit_retention_days, 90);
        assert!(config.noise_seed.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_threshold() {
        let config = DedupConfig {
            deduplication_threshold: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidThreshold(1.5)));

        let config = DedupConfig {
            deduplication_threshold: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_key_size() {
        for bits in [0, 64, 100, 8192] {
            let config = DedupConfig {
                key_size: bits,
                ..Default::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::InvalidKeySize(bits)));
        }
    }

    #[test]
    fn test_zero_max_set_size_rejected() {
        let config = DedupConfig {
            max_set_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSetSize));
    }

    #[test]
    fn test_hash_function_parsing() {
        assert_eq!("sha256".parse::<HashFunction>().unwrap(), HashFunction::Sha256);
        assert_eq!("SHA-384".parse::<HashFunction>().unwrap(), HashFunction::Sha384);
        assert_eq!("sha512".parse::<HashFunction>().unwrap(), HashFunction::Sha512);
        assert!(matches!(
            "md5".parse::<HashFunction>(),
            Err(ConfigError::UnsupportedHashFunction(_))
        ));
    }

    #[test]
    fn test_retention_millis() {
        let config = DedupConfig {
            audit_retention_days: 2,
            ..Default::default()
        };
        assert_eq!(config.retention_millis(), 172_800_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DedupConfig = toml::from_str(
            r#"
            deduplication_threshold = 0.9
            hash_function = "sha512"
            "#,
        )
        .unwrap();

        assert_eq!(config.deduplication_threshold, 0.9);
        assert_eq!(config.hash_function, HashFunction::Sha512);
        assert_eq!(config.max_set_size, 10_000);
    }

    #[test]
    fn test_unknown_hash_function_in_toml_rejected() {
        let result: Result<DedupConfig, _> = toml::from_str(r#"hash_function = "md5""#);
        assert!(result.is_err());
    }
}
