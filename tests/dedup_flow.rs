//! Single-node dedup flow
//!
//! Registration, local exact/fuzzy matching, eviction, audit retention and
//! completeness, validation failures and teardown, driven through the
//! public `DedupNode` API with a manual clock.

use biodedup::audit::{AuditEventType, AuditQuery};
use biodedup::clock::{ManualClock, MILLIS_PER_DAY};
use biodedup::events::{ChannelEventSink, NodeEvent};
use biodedup::federation::ShardInfo;
use biodedup::matching::MatchType;
use biodedup::pipeline::Landmark;
use biodedup::{DedupConfig, DedupError, DedupNode, RawTemplate, SessionStatus, ValidationError};
use std::collections::BTreeMap;
use std::sync::Arc;

const KEY: [u8; 32] = [7u8; 32];
const H1: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

fn config() -> DedupConfig {
    DedupConfig {
        noise_seed: Some(1234),
        ..Default::default()
    }
}

fn node_with(config: DedupConfig, clock: &ManualClock) -> DedupNode {
    DedupNode::builder(config)
        .key_material(&KEY)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

fn face(offset: f64) -> RawTemplate {
    RawTemplate::Face {
        landmarks: (0..12)
            .map(|i| {
                let t = f64::from(i);
                Landmark::new(t.cos() * 10.0 + offset, t.sin() * 12.0)
            })
            .collect(),
    }
}

fn voice() -> RawTemplate {
    RawTemplate::Voice {
        samples: (0..512u32).map(|i| (128.0 + 100.0 * (f64::from(i) / 9.0).sin()) as u8).collect(),
    }
}

/// `base` with the first `flipped` hex digits inverted (4 bits each).
fn variant(base: &str, flipped: usize) -> String {
    base.chars()
        .enumerate()
        .map(|(i, c)| {
            if i < flipped {
                std::char::from_digit(c.to_digit(16).unwrap() ^ 0xF, 16).unwrap()
            } else {
                c
            }
        })
        .collect()
}

#[tokio::test]
async fn test_exact_duplicate_without_cross_shard() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(
        DedupConfig {
            cross_shard_enabled: false,
            ..config()
        },
        &clock,
    );
    // Registered shards are ignored while cross-shard is off
    node.register_shard("shard-b", ShardInfo::new("mem://shard-b"))
        .unwrap();

    let receipt = node.register_biometric("subject-1", &face(0.0), "face").unwrap();
    let result = node
        .perform_dedup_check(receipt.fingerprint.as_str(), None)
        .await
        .unwrap();

    assert!(result.is_duplicate);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.shard_count, 0);
    assert_eq!(result.match_count, 1);
    assert_eq!(result.evidence.len(), 1);
    assert_eq!(result.evidence[0].shard_id, "local");
    assert_eq!(result.evidence[0].match_type, Some(MatchType::Exact));
    assert_eq!(result.candidate_fingerprint_prefix, receipt.fingerprint.prefix());
}

#[tokio::test]
async fn test_same_template_same_fingerprint() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);

    let first = node.register_biometric("subject-1", &voice(), "voice").unwrap();
    clock.advance(1);
    let second = node.register_biometric("subject-1", &voice(), "voice").unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_ne!(first.storage_handle, second.storage_handle);
    assert_eq!(node.local_set().len(), 1);
    assert_eq!(node.template_store().len(), 2);
    assert_eq!(first.fingerprint.len(), 64);
}

#[tokio::test]
async fn test_different_templates_do_not_match() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.register_biometric("subject-1", &face(0.0), "face").unwrap();

    let other = node.fingerprint_template(&face(500.0), "face").unwrap();
    let result = node.perform_dedup_check(other.as_str(), None).await.unwrap();

    assert!(!result.is_duplicate);
    assert_eq!(result.match_count, 0);
}

#[tokio::test]
async fn test_fuzzy_near_miss_below_floor() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.enroll_fingerprint(H1).unwrap();

    // 16 of 64 digits inverted: similarity 0.75 < 0.8
    let result = node
        .perform_dedup_check(&variant(H1, 16), None)
        .await
        .unwrap();

    assert!(!result.is_duplicate);
    assert_eq!(result.confidence, 0.0);
    assert!(result.evidence.is_empty());
}

#[tokio::test]
async fn test_fuzzy_match_above_threshold() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.enroll_fingerprint(H1).unwrap();

    // One digit inverted: similarity 1 - 4/256
    let result = node.perform_dedup_check(&variant(H1, 1), None).await.unwrap();

    assert!(result.is_duplicate);
    assert!((result.confidence - 0.984375).abs() < 1e-12);
    assert_eq!(result.evidence[0].match_type, Some(MatchType::Fuzzy));
}

#[tokio::test]
async fn test_raising_threshold_rejects_fuzzy_match() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(
        DedupConfig {
            deduplication_threshold: 0.99,
            ..config()
        },
        &clock,
    );
    node.enroll_fingerprint(H1).unwrap();

    let result = node.perform_dedup_check(&variant(H1, 1), None).await.unwrap();
    assert!(!result.is_duplicate);
}

#[tokio::test]
async fn test_exact_match_takes_precedence() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.enroll_fingerprint(&variant(H1, 1)).unwrap();
    node.enroll_fingerprint(H1).unwrap();

    let result = node.perform_dedup_check(H1, None).await.unwrap();
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.evidence[0].match_type, Some(MatchType::Exact));
}

#[tokio::test]
async fn test_eviction_keeps_most_recent_three() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(
        DedupConfig {
            max_set_size: 3,
            ..config()
        },
        &clock,
    );

    let [a, b, c, d] = ["aa", "bb", "cc", "dd"].map(|p| p.repeat(32));
    for fp in [&a, &b, &c] {
        assert!(node.enroll_fingerprint(fp).unwrap().is_empty());
    }
    let evicted = node.enroll_fingerprint(&d).unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].as_str(), a);

    let remaining: Vec<String> = node
        .local_set()
        .iter()
        .map(|f| f.as_str().to_string())
        .collect();
    assert_eq!(remaining, vec![b, c, d]);

    let result = node.perform_dedup_check(&a, None).await.unwrap();
    assert!(!result.is_duplicate);
}

#[tokio::test]
async fn test_audit_retention_zero_days() {
    let clock = ManualClock::new(10 * MILLIS_PER_DAY);
    let mut node = node_with(
        DedupConfig {
            audit_retention_days: 0,
            ..config()
        },
        &clock,
    );

    node.enroll_fingerprint(H1).unwrap();
    assert_eq!(node.audit_log().len(), 1);

    clock.advance(1);
    node.enroll_fingerprint(&variant(H1, 2)).unwrap();

    let log = node.audit_log();
    assert_eq!(log.len(), 1);
    let remaining = log.entries().next().unwrap();
    assert_eq!(remaining.timestamp, 10 * MILLIS_PER_DAY + 1);
    log.verify_chain().unwrap();
}

#[tokio::test]
async fn test_audit_retention_window() {
    let clock = ManualClock::new(0);
    let mut node = node_with(
        DedupConfig {
            audit_retention_days: 1,
            ..config()
        },
        &clock,
    );

    node.enroll_fingerprint(H1).unwrap();
    clock.advance(MILLIS_PER_DAY);
    node.perform_dedup_check(H1, None).await.unwrap();
    // Exactly at the cutoff: kept
    assert_eq!(node.audit_log().len(), 2);

    clock.advance(1);
    node.perform_dedup_check(H1, None).await.unwrap();
    assert_eq!(node.audit_log().len(), 2);
}

#[tokio::test]
async fn test_every_check_has_one_terminal_audit_entry() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.enroll_fingerprint(H1).unwrap();

    let candidates = [H1.to_string(), variant(H1, 20), "not-hex".to_string(), String::new()];
    let mut failures = 0;
    for candidate in &candidates {
        clock.advance(5);
        if node.perform_dedup_check(candidate, None).await.is_err() {
            failures += 1;
        }
    }
    assert_eq!(failures, 2);

    let (completed, failed) = {
        let log = node.audit_log();
        (
            log.query(&AuditQuery::of_type(AuditEventType::PsiDeduplicationCompleted))
                .len(),
            log.query(&AuditQuery::of_type(AuditEventType::PsiDeduplicationFailed))
                .len(),
        )
    };
    assert_eq!(completed, 2);
    assert_eq!(failed, 2);

    let metrics = node.metrics();
    assert_eq!(metrics.total_sessions, 4);
    assert_eq!(metrics.failed_sessions, 2);
}

#[tokio::test]
async fn test_failed_session_is_recorded_as_failed() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);

    let err = node.perform_dedup_check("xyz", None).await.unwrap_err();
    assert!(matches!(
        err,
        DedupError::Validation(ValidationError::InvalidFingerprint(_))
    ));

    let failed = node.sessions().query(&biodedup::coordinator::SessionQuery {
        status: Some(SessionStatus::Failed),
        ..Default::default()
    });
    assert_eq!(failed.len(), 1);
    assert!(failed[0].ended_at.is_some());
    assert!(failed[0].error.is_some());
    assert!(failed[0].result.is_none());

    let entry = node
        .audit_log()
        .query(&AuditQuery::of_type(AuditEventType::PsiDeduplicationFailed))[0]
        .clone();
    let payload = node.audit_log().decrypt_payload(&entry).unwrap();
    assert_eq!(payload["candidatePrefix"], "xyz");
    assert_eq!(payload["sessionId"], failed[0].session_id.as_str());
}

#[tokio::test]
async fn test_audit_payloads_only_carry_prefixes() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    let receipt = node.register_biometric("subject-1", &face(0.0), "face").unwrap();
    clock.advance(1);
    node.perform_dedup_check(receipt.fingerprint.as_str(), None)
        .await
        .unwrap();

    let log = node.audit_log();
    assert_eq!(log.len(), 2);
    for entry in log.entries() {
        let payload = log.decrypt_payload(entry).unwrap().to_string();
        assert!(!payload.contains(receipt.fingerprint.as_str()));
        assert!(payload.contains(receipt.fingerprint.prefix()));
    }
}

#[tokio::test]
async fn test_completed_audit_payload() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.enroll_fingerprint(H1).unwrap();
    node.perform_dedup_check(H1, None).await.unwrap();

    let log = node.audit_log();
    let entry = log.query(&AuditQuery::of_type(AuditEventType::PsiDeduplicationCompleted))[0];
    let payload = log.decrypt_payload(entry).unwrap();

    assert_eq!(payload["isDuplicate"], true);
    assert_eq!(payload["matchCount"], 1);
    assert_eq!(payload["shardCount"], 0);
    assert_eq!(payload["candidatePrefix"], "01234567");
    assert_eq!(payload["elapsedMs"], 0);
    assert_eq!(entry.shard_id, "local-shard");
}

#[tokio::test]
async fn test_registration_validation_failures() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);

    let err = node
        .register_biometric("subject-1", &face(0.0), "iris")
        .unwrap_err();
    assert!(matches!(
        err,
        DedupError::Validation(ValidationError::UnsupportedModality(_))
    ));

    let err = node
        .register_biometric("subject-1", &voice(), "face")
        .unwrap_err();
    assert!(matches!(
        err,
        DedupError::Validation(ValidationError::TemplateMismatch { .. })
    ));

    let err = node.register_biometric("", &face(0.0), "face").unwrap_err();
    assert!(matches!(
        err,
        DedupError::Validation(ValidationError::InvalidSubjectId(_))
    ));

    let too_many = RawTemplate::Face {
        landmarks: vec![Landmark::new(1.0, 2.0); 1_001],
    };
    assert!(node.register_biometric("subject-1", &too_many, "face").is_err());

    let oversized = RawTemplate::Voice {
        samples: vec![0u8; 1_048_577],
    };
    assert!(node.register_biometric("subject-1", &oversized, "voice").is_err());

    let mut timings = BTreeMap::new();
    timings.insert("dwell".to_string(), vec![f64::NAN]);
    let non_finite = RawTemplate::Behavioral { timings };
    assert!(node.register_biometric("subject-1", &non_finite, "behavioral").is_err());

    // Nothing was written, only failure entries
    assert!(node.local_set().is_empty());
    assert!(node.template_store().is_empty());
    let log = node.audit_log();
    assert_eq!(log.len(), 6);
    assert!(log
        .entries()
        .all(|e| e.event_type == AuditEventType::BiometricRegistrationFailed));
}

#[tokio::test]
async fn test_events_are_emitted() {
    let clock = ManualClock::new(1_000);
    let (sink, mut rx) = ChannelEventSink::new();
    let mut node = DedupNode::builder(config())
        .key_material(&KEY)
        .clock(Arc::new(clock.clone()))
        .event_sink(Arc::new(sink))
        .build()
        .unwrap();

    let receipt = node.register_biometric("subject-1", &face(0.0), "face").unwrap();
    node.register_shard("shard-b", ShardInfo::new("mem://shard-b"))
        .unwrap();
    node.perform_dedup_check(receipt.fingerprint.as_str(), None)
        .await
        .unwrap();

    assert!(matches!(
        rx.recv().await,
        Some(NodeEvent::BiometricRegistered { .. })
    ));
    assert_eq!(
        rx.recv().await,
        Some(NodeEvent::ShardRegistered {
            shard_id: "shard-b".to_string()
        })
    );
    assert!(matches!(
        rx.recv().await,
        Some(NodeEvent::DedupCompleted { is_duplicate: true, .. })
    ));
    assert!(matches!(
        rx.recv().await,
        Some(NodeEvent::DuplicateDetected { .. })
    ));
}

#[tokio::test]
async fn test_metrics_snapshot() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.enroll_fingerprint(H1).unwrap();
    node.register_biometric("subject-1", &voice(), "voice").unwrap();
    node.register_shard("shard-b", ShardInfo::new("mem://b")).unwrap();
    node.register_shard("shard-c", ShardInfo::new("mem://c")).unwrap();
    node.set_shard_status("shard-c", biodedup::federation::ShardStatus::Inactive)
        .unwrap();

    node.perform_dedup_check(H1, None).await.unwrap();
    node.perform_dedup_check(&variant(H1, 32), None).await.unwrap();

    let metrics = node.metrics();
    assert_eq!(metrics.local_set_size, 2);
    assert_eq!(metrics.registered_shards, 2);
    assert_eq!(metrics.active_shards, 1);
    assert_eq!(metrics.total_sessions, 2);
    assert_eq!(metrics.duplicates_detected, 1);
    assert!((metrics.average_confidence - 0.5).abs() < 1e-12);
    assert_eq!(metrics.stored_templates, 1);
    assert_eq!(metrics.audit_entries, 4);
    assert_eq!(metrics.config, config());

    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["localSetSize"], 2);
}

#[tokio::test]
async fn test_teardown() {
    let clock = ManualClock::new(1_000);
    let mut node = node_with(config(), &clock);
    node.enroll_fingerprint(H1).unwrap();
    node.teardown();

    assert!(matches!(
        node.perform_dedup_check(H1, None).await,
        Err(DedupError::TornDown)
    ));
    assert!(matches!(
        node.enroll_fingerprint(H1),
        Err(DedupError::TornDown)
    ));
    assert_eq!(node.metrics().local_set_size, 0);
    assert_eq!(node.metrics().audit_entries, 0);
}
