//! Node key pair and purpose-specific key derivation
//!
//! Each node owns one static key pair. Every other secret is derived from
//! the private half with domain separation:
//!
//! ```text
//! private key (key_size bits, random)
//!         │
//!         ├─► SHA-256(private || PUBLIC_DOMAIN)          → public key
//!         │           └─► SHA-256(public key)            → fingerprint salt
//!         ├─► PBKDF2-HMAC-SHA256(salt = subject id)       → per-subject template key
//!         └─► HKDF-SHA256(salt = AUDIT_SALT, AUDIT_INFO)  → audit log key
//! ```
//!
//! Nodes of one federation share the key pair so their fingerprints are
//! comparable. Key material is zeroized on drop and on explicit teardown.

use hkdf::Hkdf;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Domain string for public key derivation
const PUBLIC_DOMAIN: &[u8] = b"biodedup-public-key-v1";

/// HKDF salt and info for the audit log key
const AUDIT_SALT: &[u8] = b"biodedup-audit-v1";
const AUDIT_INFO: &[u8] = b"audit-log-encryption";

/// PBKDF2 rounds for per-subject template keys
const SUBJECT_KEY_ITERATIONS: u32 = 10_000;

/// Errors that can occur while creating or using node keys
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to generate random key: {0}")]
    KeyGeneration(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Invalid key material: expected at least 16 bytes, got {0}")]
    InvalidKeyMaterial(usize),

    #[error("Key material has been zeroized")]
    Zeroized,
}

/// Static key pair owned by one node.
pub struct NodeKeyPair {
    private_key: Zeroizing<Vec<u8>>,
    public_key: Vec<u8>,
}

impl std::fmt::Debug for NodeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeyPair")
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

impl NodeKeyPair {
    /// Generate a fresh key pair with `key_bytes` of private key material.
    pub fn generate(key_bytes: usize) -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let mut private_key = Zeroizing::new(vec![0u8; key_bytes]);
        rng.fill(&mut private_key)
            .map_err(|e| KeyError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(&private_key)
    }

    /// Rebuild a key pair from existing private key material.
    pub fn from_private_key(private_key: &[u8]) -> Result<Self, KeyError> {
        if private_key.len() < 16 {
            return Err(KeyError::InvalidKeyMaterial(private_key.len()));
        }

        let mut hasher = Sha256::new();
        hasher.update(private_key);
        hasher.update(PUBLIC_DOMAIN);
        let public_key = hasher.finalize().to_vec();

        Ok(Self {
            private_key: Zeroizing::new(private_key.to_vec()),
            public_key,
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// SHA-256 of the public key; the HMAC salt for fingerprints.
    pub fn fingerprint_salt(&self) -> Result<[u8; 32], KeyError> {
        self.ensure_live()?;
        Ok(Sha256::digest(&self.public_key).into())
    }

    /// Derive the symmetric key protecting one subject's template.
    pub fn derive_subject_key(&self, subject_id: &str) -> Result<Zeroizing<[u8; 32]>, KeyError> {
        self.ensure_live()?;
        let iterations = NonZeroU32::new(SUBJECT_KEY_ITERATIONS)
            .ok_or_else(|| KeyError::DerivationFailed("zero PBKDF2 iterations".to_string()))?;

        let mut key = Zeroizing::new([0u8; 32]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            subject_id.as_bytes(),
            &self.private_key,
            &mut key[..],
        );
        Ok(key)
    }

    /// Derive the audit log encryption key.
    pub fn derive_audit_key(&self) -> Result<Zeroizing<[u8; 32]>, KeyError> {
        self.ensure_live()?;
        let hkdf = Hkdf::<Sha256>::new(Some(AUDIT_SALT), &self.private_key);
        let mut key = Zeroizing::new([0u8; 32]);
        hkdf.expand(AUDIT_INFO, &mut key[..])
            .map_err(|e| KeyError::DerivationFailed(format!("HKDF expand failed: {}", e)))?;
        Ok(key)
    }

    /// Overwrite all key material. The pair is unusable afterwards.
    pub fn zeroize(&mut self) {
        self.private_key.zeroize();
        self.public_key.zeroize();
        self.private_key.clear();
        self.public_key.clear();
    }

    pub fn is_zeroized(&self) -> bool {
        self.private_key.is_empty()
    }

    fn ensure_live(&self) -> Result<(), KeyError> {
        if self.is_zeroized() {
            return Err(KeyError::Zeroized);
        }
        Ok(())
    }
}
