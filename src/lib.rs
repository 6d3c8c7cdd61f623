//! biodedup - Privacy-Preserving Biometric Deduplication
//!
//! Decides whether a newly submitted biometric template matches an identity
//! already enrolled on this node or on any peer shard of the federation,
//! without persisting or transmitting the raw biometric.
//!
//! Key principles:
//! - Raw templates never leave the feature pipeline
//! - Only salted fingerprints are compared or shared with peers
//! - Cross-shard checks tolerate partial failure
//! - Every decision lands in an encrypted, retention-bounded audit trail
//!
//! ```text
//! pipeline ──► persistence / matching ──► coordinator ──► audit / metrics
//!                                            │
//!                                            ▼
//!                                 federation (peer transport)
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod events;
pub mod federation;
pub mod matching;
pub mod metrics;
pub mod persistence;
pub mod pipeline;

pub use config::{DedupConfig, HashFunction};
pub use coordinator::{
    DedupNode, DedupNodeBuilder, DedupResult, DedupSession, IntersectionResponder,
    RegistrationReceipt, SessionStatus,
};
pub use error::{DedupError, ValidationError};
pub use pipeline::{Fingerprint, Modality, RawTemplate};
