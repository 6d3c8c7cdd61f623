//! Federation of independently-operated shards.
//!
//! ## Components
//!
//! - [`registry`]: known peer shards and their externally-maintained status
//! - [`protocol`]: intersection request/response wire types (JSON, camelCase)
//! - [`transport`]: the [`PeerTransport`] seam the coordinator fans out
//!   through, plus simulated and in-process implementations
//!
//! ## Wire Flow
//!
//! ```text
//! coordinator ──IntersectionRequest──► PeerTransport ──► peer node
//!      ▲                                                    │
//!      └──────────────IntersectionResponse──────────────────┘
//! ```
//!
//! Peers only ever see salted fingerprints. Shards of one federation share
//! the fingerprint salt, so the candidate is passed to peers as-is.

pub mod protocol;
pub mod registry;
pub mod transport;

pub use protocol::{IntersectionRequest, IntersectionResponse, PROTOCOL_TAG};
pub use registry::{ShardDescriptor, ShardInfo, ShardRegistry, ShardStatus};
pub use transport::{
    LoopbackTransport, NoopTransport, PeerTransport, SimulatedTransport, SimulationProfile,
    TransportError,
};
