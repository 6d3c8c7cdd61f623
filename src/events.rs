//! Node lifecycle events.
//!
//! The node reports what it did to an [`EventSink`] supplied at
//! construction. Events never carry raw templates or full fingerprints.

use crate::matching::MatchType;
use serde::Serialize;
use tokio::sync::mpsc;

/// Observable node event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum NodeEvent {
    #[serde(rename_all = "camelCase")]
    BiometricRegistered {
        storage_handle: String,
        fingerprint_prefix: String,
    },

    #[serde(rename_all = "camelCase")]
    ShardRegistered { shard_id: String },

    #[serde(rename_all = "camelCase")]
    DedupCompleted {
        session_id: String,
        is_duplicate: bool,
        confidence: f64,
    },

    #[serde(rename_all = "camelCase")]
    DuplicateDetected {
        session_id: String,
        confidence: f64,
        match_type: Option<MatchType>,
    },

    #[serde(rename_all = "camelCase")]
    DedupFailed { session_id: String, error: String },

    #[serde(rename_all = "camelCase")]
    IntersectionHandled {
        session_id: String,
        requesting_shard_id: String,
        found: bool,
    },

    TornDown,
}

/// Receiver of node events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: NodeEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: NodeEvent) {}
}

/// Forwards events into a tokio channel.
///
/// A dropped receiver is not an error for the node; events are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiving half of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: NodeEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}
