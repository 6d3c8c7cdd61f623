//! Encrypted, retention-bounded audit trail.
//!
//! Every registration, dedup session and inbound intersection request
//! lands here as one entry. Payloads are AES-256-GCM encrypted under a key
//! derived from the node key pair, so the log itself cannot be mined for
//! identity correlation. Entries are hash-chained for tamper evidence and
//! pruned by age on every append.

pub mod trail;

pub use trail::{AuditEntry, AuditError, AuditEventType, AuditLog, AuditQuery};
