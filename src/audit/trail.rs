//! Audit Trail
//!
//! ## Design
//!
//! - **Append-only**: entries are never mutated; pruning is the only deletion
//! - **Encryption**: AES-256-GCM, fresh nonce per entry, key from
//!   HKDF-SHA256 over node key material; the entry id and event type are
//!   bound as AAD
//! - **Chain**: each entry carries `previous_hash`, the SHA-256 of the entry
//!   before it. Pruning drops the oldest links, so verification covers the
//!   retained window plus the head
//! - **Retention**: after each append, entries strictly older than
//!   `now - retention` are dropped
//!
//! ## Query
//!
//! [`AuditQuery`] filters by event type and time, newest first, with a limit.

use crate::clock::Millis;
use crate::crypto::aead::{self, CryptoError, Sealed};
use crate::crypto::{KeyError, NodeKeyPair};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

/// AES-GCM tag length appended to each payload.
const TAG_LEN: usize = 16;

/// Errors that can occur in the audit trail
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Payload serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Malformed audit entry {0}")]
    MalformedEntry(String),

    #[error("Chain integrity violation at entry {0}")]
    ChainIntegrityViolation(String),

    #[error("Audit log key has been destroyed")]
    Destroyed,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Lifecycle events recorded in the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditEventType {
    BiometricRegistered,
    BiometricRegistrationFailed,
    PsiDeduplicationCompleted,
    PsiDeduplicationFailed,
    PsiIntersectionHandled,
    PsiIntersectionRejected,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::BiometricRegistered => "biometricRegistered",
            AuditEventType::BiometricRegistrationFailed => "biometricRegistrationFailed",
            AuditEventType::PsiDeduplicationCompleted => "psiDeduplicationCompleted",
            AuditEventType::PsiDeduplicationFailed => "psiDeduplicationFailed",
            AuditEventType::PsiIntersectionHandled => "psiIntersectionHandled",
            AuditEventType::PsiIntersectionRejected => "psiIntersectionRejected",
        }
    }

    /// Failure events, one per rejected operation.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEventType::BiometricRegistrationFailed
                | AuditEventType::PsiDeduplicationFailed
                | AuditEventType::PsiIntersectionRejected
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record. The payload is only readable with the node's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub event_type: AuditEventType,
    /// Ciphertext followed by the GCM tag
    pub encrypted_payload: Vec<u8>,
    pub nonce: [u8; 12],
    pub timestamp: Millis,
    pub shard_id: String,
    /// SHA-256 of the preceding entry; zero for the first entry ever written
    pub previous_hash: [u8; 32],
}

impl AuditEntry {
    /// Hash covers: entry_id || event_type || payload || nonce || timestamp ||
    /// shard_id || previous_hash
    pub fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.entry_id.as_bytes());
        hasher.update(self.event_type.as_str().as_bytes());
        hasher.update(&self.encrypted_payload);
        hasher.update(self.nonce);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.shard_id.as_bytes());
        hasher.update(self.previous_hash);
        hasher.finalize().into()
    }

    fn aad(&self) -> Vec<u8> {
        aad_for(&self.entry_id, self.event_type)
    }
}

fn aad_for(entry_id: &str, event_type: AuditEventType) -> Vec<u8> {
    let mut aad = Vec::with_capacity(entry_id.len() + 32);
    aad.extend_from_slice(entry_id.as_bytes());
    aad.push(b'|');
    aad.extend_from_slice(event_type.as_str().as_bytes());
    aad
}

/// Query options for the audit trail.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    /// Filter by event type.
    pub event_type: Option<AuditEventType>,
    /// Only entries strictly after this timestamp.
    pub after_timestamp: Option<Millis>,
    /// Limit number of results (most recent first).
    pub limit: Option<usize>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            after_timestamp: None,
            limit: Some(50),
        }
    }
}

impl AuditQuery {
    /// Every retained entry.
    pub fn all() -> Self {
        Self {
            limit: None,
            ..Default::default()
        }
    }

    pub fn of_type(event_type: AuditEventType) -> Self {
        Self {
            event_type: Some(event_type),
            limit: None,
            ..Default::default()
        }
    }
}

/// Encrypted append-only audit log for one shard.
pub struct AuditLog {
    key: Zeroizing<[u8; 32]>,
    shard_id: String,
    retention_millis: u64,
    entries: VecDeque<AuditEntry>,
    /// Hash of the most recently appended entry (survives pruning)
    head_hash: [u8; 32],
    destroyed: bool,
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("shard_id", &self.shard_id)
            .field("retention_millis", &self.retention_millis)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Create an empty log keyed from `keys`.
    pub fn new(
        keys: &NodeKeyPair,
        shard_id: impl Into<String>,
        retention_millis: u64,
    ) -> Result<Self, AuditError> {
        Ok(Self {
            key: keys.derive_audit_key()?,
            shard_id: shard_id.into(),
            retention_millis,
            entries: VecDeque::new(),
            head_hash: [0u8; 32],
            destroyed: false,
        })
    }

    /// Encrypt and append one entry, then apply retention.
    ///
    /// # Returns
    ///
    /// The id of the new entry.
    pub fn record(
        &mut self,
        event_type: AuditEventType,
        payload: &serde_json::Value,
        now: Millis,
    ) -> Result<String, AuditError> {
        if self.destroyed {
            return Err(AuditError::Destroyed);
        }

        let plaintext = serde_json::to_vec(payload)
            .map_err(|e| AuditError::SerializationFailed(e.to_string()))?;
        let entry_id = Uuid::new_v4().to_string();
        let sealed = aead::seal(&self.key, &plaintext, &aad_for(&entry_id, event_type))?;

        let mut encrypted_payload = sealed.ciphertext;
        encrypted_payload.extend_from_slice(&sealed.tag);

        let entry = AuditEntry {
            entry_id: entry_id.clone(),
            event_type,
            encrypted_payload,
            nonce: sealed.nonce,
            timestamp: now,
            shard_id: self.shard_id.clone(),
            previous_hash: self.head_hash,
        };
        self.head_hash = entry.compute_hash();
        self.entries.push_back(entry);

        self.prune(now);
        Ok(entry_id)
    }

    /// Drop entries strictly older than `now - retention`.
    ///
    /// Returns the number removed.
    pub fn prune(&mut self, now: Millis) -> usize {
        let cutoff = now.saturating_sub(self.retention_millis);
        let before = self.entries.len();
        self.entries.retain(|entry| entry.timestamp >= cutoff);
        before - self.entries.len()
    }

    /// Check that every retained entry links to its predecessor and the
    /// newest entry matches the head.
    pub fn verify_chain(&self) -> Result<(), AuditError> {
        for pair in self.entries.iter().collect::<Vec<_>>().windows(2) {
            if pair[1].previous_hash != pair[0].compute_hash() {
                return Err(AuditError::ChainIntegrityViolation(pair[1].entry_id.clone()));
            }
        }
        if let Some(last) = self.entries.back() {
            if last.compute_hash() != self.head_hash {
                return Err(AuditError::ChainIntegrityViolation(last.entry_id.clone()));
            }
        }
        Ok(())
    }

    /// Filtered entries, most recent first.
    pub fn query(&self, query: &AuditQuery) -> Vec<&AuditEntry> {
        let mut filtered: Vec<&AuditEntry> = self
            .entries
            .iter()
            .filter(|entry| {
                if let Some(event_type) = query.event_type {
                    if entry.event_type != event_type {
                        return false;
                    }
                }
                if let Some(after) = query.after_timestamp {
                    if entry.timestamp <= after {
                        return false;
                    }
                }
                true
            })
            .collect();

        // Appended in time order, so reversing gives newest first with ties
        // broken by append order
        filtered.reverse();

        if let Some(limit) = query.limit {
            filtered.truncate(limit);
        }
        filtered
    }

    /// Decrypt one entry's payload (authorized inspection).
    pub fn decrypt_payload(&self, entry: &AuditEntry) -> Result<serde_json::Value, AuditError> {
        if self.destroyed {
            return Err(AuditError::Destroyed);
        }
        if entry.encrypted_payload.len() < TAG_LEN {
            return Err(AuditError::MalformedEntry(entry.entry_id.clone()));
        }

        let split = entry.encrypted_payload.len() - TAG_LEN;
        let sealed = Sealed {
            ciphertext: entry.encrypted_payload[..split].to_vec(),
            nonce: entry.nonce,
            tag: entry.encrypted_payload[split..].to_vec(),
        };
        let plaintext = aead::open(&self.key, &sealed, &entry.aad())?;
        serde_json::from_slice(&plaintext).map_err(|e| AuditError::SerializationFailed(e.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retention_millis(&self) -> u64 {
        self.retention_millis
    }

    /// Remove every entry and zeroize the key.
    pub fn destroy(&mut self) {
        self.entries.clear();
        self.key.zeroize();
        self.head_hash = [0u8; 32];
        self.destroyed = true;
    }
}
