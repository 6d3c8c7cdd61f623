//! Error taxonomy for the deduplication node
//!
//! - [`ValidationError`]: rejected input, raised before any state mutation
//! - [`DedupError::NotFound`]: unknown target shard
//! - [`DedupError::Protocol`]: a peer misbehaved (isolated per shard, never
//!   aborts a session; see `coordinator::session`)
//! - [`DedupError::SessionFailure`]: unexpected failure while a session
//!   was being aggregated

use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::crypto::KeyError;
use crate::persistence::StoreError;
use thiserror::Error;

/// Input rejected at the edge of the node.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Unsupported modality: {0}")]
    UnsupportedModality(String),

    #[error("Template shape {actual} does not match modality {expected}")]
    TemplateMismatch { expected: String, actual: String },

    #[error("Invalid subject id: {0}")]
    InvalidSubjectId(String),

    #[error("Template too large: {0}")]
    TemplateTooLarge(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Missing privacy parameters on feature set")]
    MissingPrivacyParameters,

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Invalid intersection request: {0}")]
    InvalidRequest(String),
}

/// Top-level error returned by `DedupNode` operations.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Shard not found: {0}")]
    NotFound(String),

    #[error("Protocol error from shard {shard_id}: {reason}")]
    Protocol { shard_id: String, reason: String },

    #[error("Session {session_id} failed: {reason}")]
    SessionFailure { session_id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Template store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Node has been torn down")]
    TornDown,
}
