//! Intersection protocol wire types.
//!
//! A request carries one candidate fingerprint; the response reports
//! whether the responding shard's local set intersects it. Field names are
//! camelCase on the wire.

use crate::clock::Millis;
use crate::error::ValidationError;
use crate::matching::Intersection;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Protocol tag every request must carry.
pub const PROTOCOL_TAG: &str = "psi-ca";

/// Outbound intersection query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionRequest {
    pub session_id: String,
    /// Sent as-is. Peers of one federation derive the same fingerprint salt
    /// from the shared key, so only they can compare it against their sets.
    pub candidate_fingerprint: String,
    pub requesting_shard_id: String,
    pub timestamp: Millis,
    pub protocol_tag: String,
    pub nonce: String,
}

impl IntersectionRequest {
    /// Build a request with a fresh random nonce.
    pub fn new(
        session_id: impl Into<String>,
        candidate_fingerprint: impl Into<String>,
        requesting_shard_id: impl Into<String>,
        timestamp: Millis,
    ) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        Self {
            session_id: session_id.into(),
            candidate_fingerprint: candidate_fingerprint.into(),
            requesting_shard_id: requesting_shard_id.into(),
            timestamp,
            protocol_tag: PROTOCOL_TAG.to_string(),
            nonce: hex::encode(nonce),
        }
    }

    /// Reject requests missing a required field or carrying a foreign tag.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.session_id.trim().is_empty() {
            return Err(ValidationError::InvalidRequest("missing session id".to_string()));
        }
        if self.candidate_fingerprint.trim().is_empty() {
            return Err(ValidationError::InvalidRequest(
                "missing candidate fingerprint".to_string(),
            ));
        }
        if self.requesting_shard_id.trim().is_empty() {
            return Err(ValidationError::InvalidRequest(
                "missing requesting shard id".to_string(),
            ));
        }
        if self.protocol_tag != PROTOCOL_TAG {
            return Err(ValidationError::InvalidRequest(format!(
                "unsupported protocol tag: {}",
                self.protocol_tag
            )));
        }
        Ok(())
    }
}

/// Reply from a peer shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionResponse {
    pub session_id: String,
    pub responding_shard_id: String,
    pub result: Intersection,
    pub timestamp: Millis,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> IntersectionRequest {
        IntersectionRequest::new("session-1", "abcd", "shard-a", 42)
    }

    #[test]
    fn test_new_request_is_valid() {
        let req = request();
        assert_eq!(req.protocol_tag, "psi-ca");
        assert_eq!(req.nonce.len(), 32);
        req.validate().unwrap();
    }

    #[test]
    fn test_nonce_is_fresh() {
        assert_ne!(request().nonce, request().nonce);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut req = request();
        req.session_id.clear();
        assert!(matches!(req.validate(), Err(ValidationError::InvalidRequest(_))));

        let mut req = request();
        req.candidate_fingerprint = "  ".to_string();
        assert!(req.validate().is_err());

        let mut req = request();
        req.requesting_shard_id.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_foreign_protocol_tag_rejected() {
        let mut req = request();
        req.protocol_tag = "plain".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["sessionId"], "session-1");
        assert_eq!(json["candidateFingerprint"], "abcd");
        assert_eq!(json["requestingShardId"], "shard-a");
        assert_eq!(json["protocolTag"], "psi-ca");

        let response = IntersectionResponse {
            session_id: "session-1".to_string(),
            responding_shard_id: "shard-b".to_string(),
            result: Intersection::exact(),
            timestamp: 43,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["respondingShardId"], "shard-b");
        assert_eq!(json["result"]["found"], true);
        assert_eq!(json["result"]["matchType"], "exact");

        let back: IntersectionResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
