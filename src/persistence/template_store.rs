//! Encrypted Template Store
//!
//! Holds privacy-transformed feature sets (never raw templates) for later
//! audited retrieval. The dedup path only writes here.
//!
//! ## Design
//!
//! - **Key**: PBKDF2-HMAC-SHA256 over node key material, salted by subject id
//! - **Cipher**: AES-256-GCM, fresh nonce per template
//! - **Binding**: the storage handle is the AAD, so a record cannot be
//!   moved to another handle without failing authentication
//! - **Handle**: `{subject_id}-{modality}-{timestamp}`, with `-1`, `-2`, ...
//!   appended when a subject re-enrolls a modality within one millisecond
//!
//! Records are immutable; the only deletion path is teardown.

use crate::clock::Millis;
use crate::crypto::aead::{self, CryptoError, Sealed, ALGORITHM_ID};
use crate::crypto::{KeyError, NodeKeyPair};
use crate::pipeline::{FeatureSet, Modality};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur in the template store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No template under handle {0}")]
    NotFound(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// One stored template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedTemplate {
    /// AES-256-GCM ciphertext of the JSON feature set
    pub ciphertext: Vec<u8>,

    /// GCM nonce (12 bytes, unique per template)
    pub initialization_vector: [u8; 12],

    /// GCM authentication tag
    pub integrity_tag: Vec<u8>,

    pub algorithm_id: String,

    pub modality: Modality,

    pub stored_at: Millis,
}

/// Storage handle for a subject's template.
pub fn storage_handle(subject_id: &str, modality: Modality, timestamp: Millis) -> String {
    format!("{}-{}-{}", subject_id, modality, timestamp)
}

/// In-memory encrypted template store.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: HashMap<String, EncryptedTemplate>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encrypt `features` for `subject_id` and store them.
    ///
    /// Returns the storage handle. Never overwrites an existing record.
    pub fn store(
        &mut self,
        keys: &NodeKeyPair,
        features: &FeatureSet,
        subject_id: &str,
        modality: Modality,
        now: Millis,
    ) -> Result<String, StoreError> {
        let handle = self.free_handle(storage_handle(subject_id, modality, now));

        let plaintext = serde_json::to_vec(features)
            .map_err(|e| StoreError::SerializationFailed(e.to_string()))?;
        let key = keys.derive_subject_key(subject_id)?;
        let sealed = aead::seal(&key, &plaintext, handle.as_bytes())?;

        self.templates.insert(
            handle.clone(),
            EncryptedTemplate {
                ciphertext: sealed.ciphertext,
                initialization_vector: sealed.nonce,
                integrity_tag: sealed.tag,
                algorithm_id: ALGORITHM_ID.to_string(),
                modality,
                stored_at: now,
            },
        );
        Ok(handle)
    }

    /// Decrypt a stored template (audited retrieval path).
    pub fn open(
        &self,
        keys: &NodeKeyPair,
        handle: &str,
        subject_id: &str,
    ) -> Result<FeatureSet, StoreError> {
        let record = self
            .templates
            .get(handle)
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))?;
        if record.algorithm_id != ALGORITHM_ID {
            return Err(StoreError::UnsupportedAlgorithm(record.algorithm_id.clone()));
        }

        let key = keys.derive_subject_key(subject_id)?;
        let sealed = Sealed {
            ciphertext: record.ciphertext.clone(),
            nonce: record.initialization_vector,
            tag: record.integrity_tag.clone(),
        };
        let plaintext = aead::open(&key, &sealed, handle.as_bytes())?;

        serde_json::from_slice(&plaintext).map_err(|e| StoreError::SerializationFailed(e.to_string()))
    }

    fn free_handle(&self, base: String) -> String {
        if !self.templates.contains_key(&base) {
            return base;
        }
        let mut suffix = 1u64;
        loop {
            let candidate = format!("{}-{}", base, suffix);
            if !self.templates.contains_key(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    pub fn get(&self, handle: &str) -> Option<&EncryptedTemplate> {
        self.templates.get(handle)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }
}
