//! Dedup sessions and result aggregation.
//!
//! A session moves `initiated → completed` or `initiated → failed`; both
//! end states are terminal and a failed check must be re-issued as a new
//! session.

use crate::clock::Millis;
use crate::error::DedupError;
use crate::federation::IntersectionResponse;
use crate::matching::{Intersection, MatchType};
use crate::pipeline::truncate_fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Shard id recorded for the node's own lookup.
pub const LOCAL_SHARD: &str = "local";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initiated,
    Completed,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Initiated => f.write_str("initiated"),
            SessionStatus::Completed => f.write_str("completed"),
            SessionStatus::Failed => f.write_str("failed"),
        }
    }
}

/// One shard's contribution to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardIntersection {
    pub shard_id: String,
    pub intersection: Intersection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShardIntersection {
    pub fn answered(shard_id: impl Into<String>, intersection: Intersection) -> Self {
        Self {
            shard_id: shard_id.into(),
            intersection,
            error: None,
        }
    }

    /// A shard that could not answer counts as `found: false`.
    pub fn failed(shard_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            intersection: Intersection::none(),
            error: Some(error.into()),
        }
    }

    pub fn is_local(&self) -> bool {
        self.shard_id == LOCAL_SHARD
    }
}

/// A shard whose match contributed to the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub shard_id: String,
    pub confidence: f64,
    pub match_type: Option<MatchType>,
}

/// Outcome of a dedup check. Holds only a fingerprint prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupResult {
    pub candidate_fingerprint_prefix: String,
    pub is_duplicate: bool,
    pub confidence: f64,
    /// Remote shards queried; the local lookup is not counted
    pub shard_count: usize,
    /// Found intersections, local included
    pub match_count: usize,
    pub evidence: Vec<Evidence>,
}

/// State of one dedup check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupSession {
    pub session_id: String,
    pub candidate_fingerprint: String,
    pub requesting_shard_id: Option<String>,
    pub status: SessionStatus,
    pub intersections: Vec<ShardIntersection>,
    pub started_at: Millis,
    pub ended_at: Option<Millis>,
    pub result: Option<DedupResult>,
    pub error: Option<String>,
}

impl DedupSession {
    /// Open a session with a fresh UUID v4 id.
    pub fn new(candidate: &str, requesting_shard_id: Option<&str>, now: Millis) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            candidate_fingerprint: candidate.to_string(),
            requesting_shard_id: requesting_shard_id.map(str::to_string),
            status: SessionStatus::Initiated,
            intersections: Vec::new(),
            started_at: now,
            ended_at: None,
            result: None,
            error: None,
        }
    }

    pub fn candidate_prefix(&self) -> String {
        truncate_fingerprint(&self.candidate_fingerprint)
    }

    pub fn complete(&mut self, result: DedupResult, now: Millis) {
        self.status = SessionStatus::Completed;
        self.ended_at = Some(now);
        self.result = Some(result);
    }

    pub fn fail(&mut self, error: &DedupError, now: Millis) {
        self.status = SessionStatus::Failed;
        self.ended_at = Some(now);
        self.error = Some(error.to_string());
    }

    pub fn is_terminal(&self) -> bool {
        self.status != SessionStatus::Initiated
    }

    /// Milliseconds from start to end (or to `now` while still open).
    pub fn elapsed_ms(&self, now: Millis) -> u64 {
        self.ended_at.unwrap_or(now).saturating_sub(self.started_at)
    }
}

/// Aggregate a session's intersections into one decision.
///
/// Only `found` intersections contribute; their confidences are averaged
/// without weighting. `remote_shards` is the number of remote shards that
/// were queried.
///
/// # Errors
///
/// `SessionFailure` if a contributing confidence is not a finite value in
/// `[0, 1]`.
pub fn analyze_intersection_results(
    session_id: &str,
    candidate: &str,
    intersections: &[ShardIntersection],
    remote_shards: usize,
    threshold: f64,
) -> Result<DedupResult, DedupError> {
    let found: Vec<&ShardIntersection> = intersections
        .iter()
        .filter(|entry| entry.intersection.found)
        .collect();

    for entry in &found {
        let confidence = entry.intersection.confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(DedupError::SessionFailure {
                session_id: session_id.to_string(),
                reason: format!(
                    "shard {} reported confidence {} outside [0, 1]",
                    entry.shard_id, confidence
                ),
            });
        }
    }

    let candidate_fingerprint_prefix = truncate_fingerprint(candidate);
    if found.is_empty() {
        return Ok(DedupResult {
            candidate_fingerprint_prefix,
            is_duplicate: false,
            confidence: 0.0,
            shard_count: remote_shards,
            match_count: 0,
            evidence: Vec::new(),
        });
    }

    let confidence =
        found.iter().map(|e| e.intersection.confidence).sum::<f64>() / found.len() as f64;
    let evidence = found
        .iter()
        .map(|e| Evidence {
            shard_id: e.shard_id.clone(),
            confidence: e.intersection.confidence,
            match_type: e.intersection.match_type,
        })
        .collect();

    Ok(DedupResult {
        candidate_fingerprint_prefix,
        is_duplicate: confidence >= threshold,
        confidence,
        shard_count: remote_shards,
        match_count: found.len(),
        evidence,
    })
}

/// Check a peer's response against the request that produced it.
///
/// # Errors
///
/// `Protocol` when the session id or responder does not match, or the
/// reported result is malformed.
pub fn validate_response(
    session_id: &str,
    shard_id: &str,
    response: IntersectionResponse,
) -> Result<Intersection, DedupError> {
    let protocol = |reason: String| DedupError::Protocol {
        shard_id: shard_id.to_string(),
        reason,
    };

    if response.session_id != session_id {
        return Err(protocol(format!(
            "response for session {} does not match {}",
            response.session_id, session_id
        )));
    }
    if response.responding_shard_id != shard_id {
        return Err(protocol(format!(
            "response signed by {} instead of {}",
            response.responding_shard_id, shard_id
        )));
    }

    let result = response.result;
    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        return Err(protocol(format!(
            "confidence {} outside [0, 1]",
            result.confidence
        )));
    }
    if result.found && result.match_type.is_none() {
        return Err(protocol("match reported without a match type".to_string()));
    }
    Ok(result)
}

/// Filters for [`SessionDirectory::query`].
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    pub status: Option<SessionStatus>,
    pub duplicates_only: bool,
    pub limit: Option<usize>,
}

/// Finished sessions keyed by id, queryable newest first.
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
    sessions: HashMap<String, DedupSession>,
    order: Vec<String>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: DedupSession) {
        if !self.sessions.contains_key(&session.session_id) {
            self.order.push(session.session_id.clone());
        }
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<&DedupSession> {
        self.sessions.get(session_id)
    }

    /// Result of a completed session.
    pub fn result(&self, session_id: &str) -> Option<&DedupResult> {
        self.get(session_id).and_then(|s| s.result.as_ref())
    }

    pub fn query(&self, query: &SessionQuery) -> Vec<&DedupSession> {
        let mut matched: Vec<&DedupSession> = self
            .order
            .iter()
            .rev()
            .filter_map(|id| self.sessions.get(id))
            .filter(|session| query.status.map_or(true, |status| session.status == status))
            .filter(|session| {
                !query.duplicates_only
                    || session.result.as_ref().is_some_and(|r| r.is_duplicate)
            })
            .collect();

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Fingerprint;

    const CANDIDATE: &str = "0123456789abcdef0123456789abcdef";

    fn fuzzy(confidence: f64) -> Intersection {
        Intersection::fuzzy(confidence, &Fingerprint::parse(CANDIDATE).unwrap())
    }

    #[test]
    fn test_no_matches() {
        let intersections = vec![
            ShardIntersection::answered(LOCAL_SHARD, Intersection::none()),
            ShardIntersection::failed("shard-b", "timeout"),
        ];
        let result = analyze_intersection_results("s", CANDIDATE, &intersections, 1, 0.95).unwrap();

        assert!(!result.is_duplicate);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.shard_count, 1);
        assert_eq!(result.match_count, 0);
        assert!(result.evidence.is_empty());
        assert_eq!(result.candidate_fingerprint_prefix, "01234567");
    }

    #[test]
    fn test_unweighted_mean() {
        let intersections = vec![
            ShardIntersection::answered(LOCAL_SHARD, Intersection::exact()),
            ShardIntersection::answered("shard-b", fuzzy(0.9)),
            ShardIntersection::answered("shard-c", Intersection::none()),
        ];
        let result = analyze_intersection_results("s", CANDIDATE, &intersections, 2, 0.9).unwrap();

        assert!((result.confidence - 0.95).abs() < 1e-12);
        assert!(result.is_duplicate);
        assert_eq!(result.match_count, 2);
        assert_eq!(result.shard_count, 2);
        assert_eq!(result.evidence[0].shard_id, "local");
        assert_eq!(result.evidence[1].match_type, Some(MatchType::Fuzzy));
    }

    #[test]
    fn test_threshold_monotonicity() {
        let intersections = vec![ShardIntersection::answered("shard-b", fuzzy(0.9))];
        let mut previous = true;
        for threshold in [0.0, 0.5, 0.89, 0.9, 0.91, 1.0] {
            let dup = analyze_intersection_results("s", CANDIDATE, &intersections, 1, threshold)
                .unwrap()
                .is_duplicate;
            // Once a higher threshold rejects, it never accepts again
            assert!(previous || !dup);
            previous = dup;
        }
    }

    #[test]
    fn test_out_of_range_confidence_fails_session() {
        let mut bogus = Intersection::exact();
        bogus.confidence = f64::NAN;
        let intersections = vec![ShardIntersection::answered("shard-b", bogus)];

        assert!(matches!(
            analyze_intersection_results("s-1", CANDIDATE, &intersections, 1, 0.95),
            Err(DedupError::SessionFailure { session_id, .. }) if session_id == "s-1"
        ));
    }

    fn response(session: &str, responder: &str, result: Intersection) -> IntersectionResponse {
        IntersectionResponse {
            session_id: session.to_string(),
            responding_shard_id: responder.to_string(),
            result,
            timestamp: 0,
        }
    }

    #[test]
    fn test_validate_response() {
        assert!(validate_response("s", "b", response("s", "b", Intersection::exact())).is_ok());

        assert!(matches!(
            validate_response("s", "b", response("other", "b", Intersection::exact())),
            Err(DedupError::Protocol { .. })
        ));
        assert!(validate_response("s", "b", response("s", "c", Intersection::none())).is_err());

        let mut bad = Intersection::exact();
        bad.confidence = 1.5;
        assert!(validate_response("s", "b", response("s", "b", bad)).is_err());

        let mut untyped = Intersection::exact();
        untyped.match_type = None;
        assert!(validate_response("s", "b", response("s", "b", untyped)).is_err());
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = DedupSession::new(CANDIDATE, Some("shard-a"), 100);
        assert_eq!(session.status, SessionStatus::Initiated);
        assert!(!session.is_terminal());
        assert_eq!(session.elapsed_ms(150), 50);

        let err = DedupError::NotFound("shard-z".to_string());
        session.fail(&err, 175);
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.ended_at, Some(175));
        assert_eq!(session.error.as_deref(), Some("Shard not found: shard-z"));
        assert_eq!(session.elapsed_ms(999), 75);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = DedupSession::new(CANDIDATE, None, 0);
        let b = DedupSession::new(CANDIDATE, None, 0);
        assert_ne!(a.session_id, b.session_id);
        assert!(Uuid::parse_str(&a.session_id).is_ok());
    }

    #[test]
    fn test_directory_query() {
        let mut directory = SessionDirectory::new();

        let mut dup = DedupSession::new(CANDIDATE, None, 1);
        let mut result =
            analyze_intersection_results(&dup.session_id.clone(), CANDIDATE, &[], 0, 0.95).unwrap();
        result.is_duplicate = true;
        dup.complete(result, 2);
        let dup_id = dup.session_id.clone();
        directory.insert(dup);

        let mut failed = DedupSession::new(CANDIDATE, None, 3);
        failed.fail(&DedupError::TornDown, 4);
        let failed_id = failed.session_id.clone();
        directory.insert(failed);

        let all = directory.query(&SessionQuery::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, failed_id);

        let dups = directory.query(&SessionQuery {
            duplicates_only: true,
            ..Default::default()
        });
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].session_id, dup_id);

        let failures = directory.query(&SessionQuery {
            status: Some(SessionStatus::Failed),
            ..Default::default()
        });
        assert_eq!(failures.len(), 1);

        assert!(directory.result(&dup_id).is_some());
        assert!(directory.result(&failed_id).is_none());
    }
}
