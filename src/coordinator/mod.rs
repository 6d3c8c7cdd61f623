//! Cross-shard deduplication coordinator.
//!
//! [`DedupNode`] owns a shard's state: pipeline, template store, local match
//! set, shard registry, session directory and audit log. It runs dedup
//! sessions (local lookup first, then concurrent fan-out to peers).
//! Inbound intersection requests are answered through an
//! [`IntersectionResponder`], which shares the local set and audit log with
//! the node but none of its session state.

pub mod node;
pub mod responder;
pub mod session;

pub use node::{DedupNode, DedupNodeBuilder, RegistrationReceipt};
pub use responder::IntersectionResponder;
pub use session::{
    analyze_intersection_results, validate_response, DedupResult, DedupSession, Evidence,
    SessionDirectory, SessionQuery, SessionStatus, ShardIntersection, LOCAL_SHARD,
};
