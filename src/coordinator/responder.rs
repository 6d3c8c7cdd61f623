//! Inbound intersection handling.
//!
//! [`IntersectionResponder`] is a cloneable handle onto the part of a node
//! that peers reach: the local match set, the audit log and the event sink.
//! Each lock is held for one lookup or one append and never across an
//! `.await`, so a node keeps answering peers while one of its own sessions
//! is waiting on the network.

use crate::audit::{AuditEventType, AuditLog};
use crate::clock::{Clock, Millis};
use crate::error::{DedupError, ValidationError};
use crate::events::{EventSink, NodeEvent};
use crate::federation::{IntersectionRequest, IntersectionResponse};
use crate::matching::{Intersection, LocalMatchSet};
use crate::pipeline::{truncate_fingerprint, Fingerprint};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// State owned by one node and shared with its responders.
pub(crate) struct SharedState {
    pub(crate) shard_id: String,
    pub(crate) threshold: f64,
    pub(crate) local_set: RwLock<LocalMatchSet>,
    pub(crate) audit: Mutex<AuditLog>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) torn_down: AtomicBool,
}

impl SharedState {
    pub(crate) fn now(&self) -> Millis {
        self.clock.now_millis()
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), DedupError> {
        if self.is_torn_down() {
            return Err(DedupError::TornDown);
        }
        Ok(())
    }

    pub(crate) fn record_audit(
        &self,
        event_type: AuditEventType,
        payload: &serde_json::Value,
        now: Millis,
    ) -> Result<String, DedupError> {
        Ok(self.audit.lock().record(event_type, payload, now)?)
    }

    /// Audit a failure without masking the error being reported.
    pub(crate) fn record_failure(&self, event_type: AuditEventType, payload: serde_json::Value) {
        let now = self.now();
        let recorded = self.audit.lock().record(event_type, &payload, now);
        if let Err(audit_err) = recorded {
            warn!(event = %event_type, error = %audit_err, "failed to record audit entry");
        }
    }
}

/// Peer-facing handle to a [`DedupNode`](super::DedupNode).
///
/// Obtained from `DedupNode::responder`; clones share the node's state.
#[derive(Clone)]
pub struct IntersectionResponder {
    shared: Arc<SharedState>,
}

impl fmt::Debug for IntersectionResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntersectionResponder")
            .field("shard_id", &self.shared.shard_id)
            .finish_non_exhaustive()
    }
}

impl IntersectionResponder {
    pub(crate) fn new(shared: Arc<SharedState>) -> Self {
        Self { shared }
    }

    /// Shard id stamped on every response.
    pub fn shard_id(&self) -> &str {
        &self.shared.shard_id
    }

    /// Answer a peer's intersection request from the local set only.
    ///
    /// Never fans out further, so a request cannot recurse across the
    /// shard graph. A rejected request leaves one
    /// `psiIntersectionRejected` audit entry.
    pub fn handle_intersection_request(
        &self,
        request: IntersectionRequest,
    ) -> Result<IntersectionResponse, DedupError> {
        self.shared.ensure_live()?;
        let now = self.shared.now();

        match self.answer(&request) {
            Ok(result) => {
                self.shared.record_audit(
                    AuditEventType::PsiIntersectionHandled,
                    &json!({
                        "sessionId": request.session_id,
                        "requestingShardId": request.requesting_shard_id,
                        "candidatePrefix": truncate_fingerprint(&request.candidate_fingerprint),
                        "found": result.found,
                        "confidence": result.confidence,
                        "matchType": result.match_type,
                    }),
                    now,
                )?;
                self.shared.events.emit(NodeEvent::IntersectionHandled {
                    session_id: request.session_id.clone(),
                    requesting_shard_id: request.requesting_shard_id.clone(),
                    found: result.found,
                });
                debug!(
                    session_id = %request.session_id,
                    requester = %request.requesting_shard_id,
                    found = result.found,
                    "intersection request handled"
                );

                Ok(IntersectionResponse {
                    session_id: request.session_id,
                    responding_shard_id: self.shared.shard_id.clone(),
                    result,
                    timestamp: now,
                })
            }
            Err(err) => {
                self.shared.record_failure(
                    AuditEventType::PsiIntersectionRejected,
                    json!({
                        "sessionId": request.session_id,
                        "requestingShardId": request.requesting_shard_id,
                        "error": err.to_string(),
                    }),
                );
                warn!(
                    requester = %request.requesting_shard_id,
                    error = %err,
                    "intersection request rejected"
                );
                Err(err)
            }
        }
    }

    fn answer(&self, request: &IntersectionRequest) -> Result<Intersection, DedupError> {
        request.validate()?;
        let candidate = Fingerprint::parse(&request.candidate_fingerprint)
            .map_err(|e| ValidationError::InvalidRequest(e.to_string()))?;
        Ok(self
            .shared
            .local_set
            .read()
            .lookup(&candidate, self.shared.threshold))
    }
}
