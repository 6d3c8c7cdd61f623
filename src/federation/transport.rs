//! Peer transport abstraction.
//!
//! The coordinator reaches peer shards only through [`PeerTransport`], so
//! tests and the simulator can swap the physical channel:
//!
//! - [`NoopTransport`]: every peer answers "no match"
//! - [`LoopbackTransport`]: in-process responders, JSON-encoded in both
//!   directions
//! - [`SimulatedTransport`]: wraps another transport with a bounded random
//!   delay and independent per-request failures

use super::protocol::{IntersectionRequest, IntersectionResponse};
use super::registry::ShardDescriptor;
use crate::coordinator::IntersectionResponder;
use crate::matching::Intersection;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from a single peer round trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Shard {0} is unreachable")]
    Unreachable(String),

    #[error("Shard {shard_id} timed out after {timeout_ms}ms")]
    Timeout { shard_id: String, timeout_ms: u64 },

    #[error("Simulated failure contacting shard {0}")]
    SimulatedFailure(String),

    #[error("Shard {shard_id} rejected the request: {reason}")]
    Rejected { shard_id: String, reason: String },

    #[error("Wire encoding failed: {0}")]
    Serialization(String),
}

/// Request/response channel to peer shards.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver one intersection request to `shard` and await its reply.
    async fn send_intersection_request(
        &self,
        shard: &ShardDescriptor,
        request: IntersectionRequest,
    ) -> Result<IntersectionResponse, TransportError>;
}

/// Transport whose peers never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

#[async_trait]
impl PeerTransport for NoopTransport {
    async fn send_intersection_request(
        &self,
        shard: &ShardDescriptor,
        request: IntersectionRequest,
    ) -> Result<IntersectionResponse, TransportError> {
        Ok(IntersectionResponse {
            session_id: request.session_id,
            responding_shard_id: shard.shard_id.clone(),
            result: Intersection::none(),
            timestamp: request.timestamp,
        })
    }
}

/// In-process transport to other nodes' [`IntersectionResponder`]s.
///
/// Requests and responses go through `serde_json` so peers see exactly
/// what a networked shard would. Clones share one peer table, so peers can
/// be attached after the transport was handed to a node.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    peers: Arc<RwLock<HashMap<String, IntersectionResponder>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer reachable under its own shard id.
    pub fn with_peer(self, responder: IntersectionResponder) -> Self {
        self.add_peer(responder);
        self
    }

    /// Attach (or replace) a peer reachable under its own shard id.
    pub fn add_peer(&self, responder: IntersectionResponder) {
        self.peers
            .write()
            .insert(responder.shard_id().to_string(), responder);
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn send_intersection_request(
        &self,
        shard: &ShardDescriptor,
        request: IntersectionRequest,
    ) -> Result<IntersectionResponse, TransportError> {
        let peer = self
            .peers
            .read()
            .get(&shard.shard_id)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(shard.shard_id.clone()))?;

        let wire = serde_json::to_vec(&request)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        let decoded: IntersectionRequest = serde_json::from_slice(&wire)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;

        let response = peer
            .handle_intersection_request(decoded)
            .map_err(|e| TransportError::Rejected {
                shard_id: shard.shard_id.clone(),
                reason: e.to_string(),
            })?;

        let wire = serde_json::to_vec(&response)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        serde_json::from_slice(&wire).map_err(|e| TransportError::Serialization(e.to_string()))
    }
}

/// Latency and failure injection for [`SimulatedTransport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationProfile {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Independent per-request failure probability in `[0, 1]`
    pub failure_rate: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            min_delay_ms: 5,
            max_delay_ms: 50,
            failure_rate: 0.1,
        }
    }
}

impl SimulationProfile {
    /// No delay and no failures.
    pub fn reliable() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            failure_rate: 0.0,
        }
    }
}

/// Wraps a transport with a simulated network round trip.
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<dyn PeerTransport>,
    profile: SimulationProfile,
}

impl SimulatedTransport {
    pub fn new(inner: Arc<dyn PeerTransport>, profile: SimulationProfile) -> Self {
        Self { inner, profile }
    }

    /// Draw this round trip's delay and failure outcome.
    fn roll(&self) -> (u64, bool) {
        let mut rng = rand::thread_rng();
        let low = self.profile.min_delay_ms.min(self.profile.max_delay_ms);
        let high = self.profile.min_delay_ms.max(self.profile.max_delay_ms);
        let delay = rng.gen_range(low..=high);
        let fails = rng.gen_bool(self.profile.failure_rate.clamp(0.0, 1.0));
        (delay, fails)
    }
}

#[async_trait]
impl PeerTransport for SimulatedTransport {
    async fn send_intersection_request(
        &self,
        shard: &ShardDescriptor,
        request: IntersectionRequest,
    ) -> Result<IntersectionResponse, TransportError> {
        let (delay_ms, fails) = self.roll();
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if fails {
            return Err(TransportError::SimulatedFailure(shard.shard_id.clone()));
        }
        self.inner.send_intersection_request(shard, request).await
    }
}
