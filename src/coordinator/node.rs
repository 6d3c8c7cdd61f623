//! Dedup Node
//!
//! ## Session Flow
//!
//! ```text
//! perform_dedup_check(candidate)
//!   1. open session (initiated)
//!   2. local lookup, exact then fuzzy          ── recorded before any I/O
//!   3. fan out to target shards concurrently   ── per-shard timeout, isolated
//!   4. aggregate (unweighted mean of matches)
//!   5. completed | failed, exactly one terminal audit entry
//! ```
//!
//! ## Ownership
//!
//! Outbound state (registry, sessions, store, keys) is mutated through
//! `&mut self`. The local set, the audit log and the event sink live in a
//! shared core that [`DedupNode::responder`] hands to peers, so inbound
//! requests are answered while a session of this node is still waiting on
//! its fan-out. Locks on the shared core are never held across an `.await`.
//!
//! ## Privacy
//!
//! Raw templates stop at [`DedupNode::register_biometric`]. Logs, events,
//! results and audit payloads only carry fingerprint prefixes.

use super::responder::{IntersectionResponder, SharedState};
use super::session::{
    analyze_intersection_results, validate_response, DedupResult, DedupSession, SessionDirectory,
    ShardIntersection, LOCAL_SHARD,
};
use crate::audit::{AuditEventType, AuditLog};
use crate::clock::{Clock, Millis, SystemClock};
use crate::config::DedupConfig;
use crate::crypto::NodeKeyPair;
use crate::error::{DedupError, ValidationError};
use crate::events::{EventSink, NodeEvent, NoopEventSink};
use crate::federation::{
    IntersectionRequest, IntersectionResponse, NoopTransport, PeerTransport, ShardDescriptor,
    ShardInfo, ShardRegistry, ShardStatus, TransportError,
};
use crate::matching::LocalMatchSet;
use crate::metrics::{MetricsSnapshot, SessionStats};
use crate::persistence::TemplateStore;
use crate::pipeline::{
    extract, Fingerprint, FingerprintHasher, Modality, PrivacyTransform, RawTemplate,
};
use futures::future::join_all;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

const MAX_SUBJECT_ID_LEN: usize = 128;

/// Returned by a successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationReceipt {
    pub storage_handle: String,
    pub fingerprint: Fingerprint,
    pub modality: Modality,
    /// Fingerprints evicted from the local set by this insert
    pub evicted: usize,
}

/// Which remote shards a session queries.
enum Targets {
    AllActive,
    Shard(String),
    FirstRegistered,
}

/// Builder for [`DedupNode`].
pub struct DedupNodeBuilder {
    config: DedupConfig,
    key_material: Option<Zeroizing<Vec<u8>>>,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn PeerTransport>,
    events: Arc<dyn EventSink>,
}

impl DedupNodeBuilder {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            key_material: None,
            clock: Arc::new(SystemClock),
            transport: Arc::new(NoopTransport),
            events: Arc::new(NoopEventSink),
        }
    }

    /// Use existing private key material instead of generating `key_size`
    /// bits. Shards of one federation share this material.
    pub fn key_material(mut self, private_key: &[u8]) -> Self {
        self.key_material = Some(Zeroizing::new(private_key.to_vec()));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Validate the configuration and derive all keys.
    pub fn build(self) -> Result<DedupNode, DedupError> {
        self.config.validate()?;

        let keys = match &self.key_material {
            Some(material) => NodeKeyPair::from_private_key(material)?,
            None => NodeKeyPair::generate(self.config.key_bytes())?,
        };
        let hasher = FingerprintHasher::new(self.config.hash_function, keys.fingerprint_salt()?);
        let audit = AuditLog::new(
            &keys,
            self.config.shard_id.clone(),
            self.config.retention_millis(),
        )?;

        info!(
            shard_id = %self.config.shard_id,
            hash_function = %self.config.hash_function.name(),
            max_set_size = self.config.max_set_size,
            cross_shard = self.config.cross_shard_enabled,
            "dedup node initialized"
        );

        let shared = Arc::new(SharedState {
            shard_id: self.config.shard_id.clone(),
            threshold: self.config.deduplication_threshold,
            local_set: RwLock::new(LocalMatchSet::new(self.config.max_set_size)),
            audit: Mutex::new(audit),
            clock: self.clock,
            events: self.events,
            torn_down: AtomicBool::new(false),
        });

        Ok(DedupNode {
            hasher: Some(hasher),
            privacy: PrivacyTransform::new(self.config.noise_seed),
            store: TemplateStore::new(),
            registry: ShardRegistry::new(),
            sessions: SessionDirectory::new(),
            stats: SessionStats::default(),
            keys,
            config: self.config,
            transport: self.transport,
            shared,
        })
    }
}

/// One shard of the deduplication federation.
pub struct DedupNode {
    config: DedupConfig,
    keys: NodeKeyPair,
    /// `None` once torn down; the salt inside is key material.
    hasher: Option<FingerprintHasher>,
    privacy: PrivacyTransform,
    store: TemplateStore,
    registry: ShardRegistry,
    sessions: SessionDirectory,
    stats: SessionStats,
    transport: Arc<dyn PeerTransport>,
    shared: Arc<SharedState>,
}

impl std::fmt::Debug for DedupNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupNode")
            .field("shard_id", &self.config.shard_id)
            .field("local_set", &self.shared.local_set.read().len())
            .field("shards", &self.registry.len())
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

impl DedupNode {
    /// Node with generated keys, the system clock and no peers.
    pub fn new(config: DedupConfig) -> Result<Self, DedupError> {
        DedupNodeBuilder::new(config).build()
    }

    pub fn builder(config: DedupConfig) -> DedupNodeBuilder {
        DedupNodeBuilder::new(config)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Enroll a subject: extract, transform, hash, store, insert.
    ///
    /// Validation happens before any state is touched; a rejected template
    /// leaves only a `biometricRegistrationFailed` audit entry.
    pub fn register_biometric(
        &mut self,
        subject_id: &str,
        template: &RawTemplate,
        modality: &str,
    ) -> Result<RegistrationReceipt, DedupError> {
        self.ensure_live()?;

        match self.enroll(subject_id, template, modality) {
            Ok(receipt) => {
                let now = self.shared.now();
                self.record_audit(
                    AuditEventType::BiometricRegistered,
                    &json!({
                        "storageHandle": receipt.storage_handle,
                        "modality": receipt.modality.as_str(),
                        "fingerprintPrefix": receipt.fingerprint.prefix(),
                        "evicted": receipt.evicted,
                    }),
                    now,
                )?;
                self.shared.events.emit(NodeEvent::BiometricRegistered {
                    storage_handle: receipt.storage_handle.clone(),
                    fingerprint_prefix: receipt.fingerprint.prefix().to_string(),
                });
                info!(
                    modality = %receipt.modality,
                    fingerprint = %receipt.fingerprint.prefix(),
                    evicted = receipt.evicted,
                    "biometric registered"
                );
                Ok(receipt)
            }
            Err(err) => {
                self.record_failure(
                    AuditEventType::BiometricRegistrationFailed,
                    json!({ "modality": modality, "error": err.to_string() }),
                );
                warn!(error = %err, "biometric registration rejected");
                Err(err)
            }
        }
    }

    /// Insert an already-computed fingerprint into the local set.
    ///
    /// Returns the fingerprints evicted by the insert.
    pub fn enroll_fingerprint(&mut self, fingerprint: &str) -> Result<Vec<Fingerprint>, DedupError> {
        self.ensure_live()?;

        let fingerprint = match Fingerprint::parse(fingerprint) {
            Ok(fp) => fp,
            Err(err) => {
                let err = DedupError::from(err);
                self.record_failure(
                    AuditEventType::BiometricRegistrationFailed,
                    json!({ "source": "fingerprint", "error": err.to_string() }),
                );
                return Err(err);
            }
        };

        let evicted = self.shared.local_set.write().insert(fingerprint.clone());
        let now = self.shared.now();
        self.record_audit(
            AuditEventType::BiometricRegistered,
            &json!({
                "source": "fingerprint",
                "fingerprintPrefix": fingerprint.prefix(),
                "evicted": evicted.len(),
            }),
            now,
        )?;
        debug!(fingerprint = %fingerprint.prefix(), "fingerprint enrolled");
        Ok(evicted)
    }

    /// Run a template through the pipeline without enrolling it.
    pub fn fingerprint_template(
        &self,
        template: &RawTemplate,
        modality: &str,
    ) -> Result<Fingerprint, DedupError> {
        self.ensure_live()?;
        let modality: Modality = modality.parse()?;
        let features = self.privacy.transform(extract(template, modality)?)?;
        Ok(self.hasher()?.hash(&features))
    }

    fn enroll(
        &mut self,
        subject_id: &str,
        template: &RawTemplate,
        modality: &str,
    ) -> Result<RegistrationReceipt, DedupError> {
        validate_subject_id(subject_id)?;
        let modality: Modality = modality.parse()?;
        let features = self.privacy.transform(extract(template, modality)?)?;
        let fingerprint = self.hasher()?.hash(&features);

        let now = self.shared.now();
        let storage_handle = self
            .store
            .store(&self.keys, &features, subject_id, modality, now)?;
        let evicted = self.shared.local_set.write().insert(fingerprint.clone());

        Ok(RegistrationReceipt {
            storage_handle,
            fingerprint,
            modality,
            evicted: evicted.len(),
        })
    }

    // ------------------------------------------------------------------
    // Shards
    // ------------------------------------------------------------------

    /// Register (or re-register) a peer shard as active.
    pub fn register_shard(
        &mut self,
        shard_id: &str,
        info: ShardInfo,
    ) -> Result<ShardDescriptor, DedupError> {
        self.ensure_live()?;
        if shard_id.trim().is_empty() || shard_id.chars().any(char::is_control) {
            return Err(
                ValidationError::InvalidRequest(format!("invalid shard id: {:?}", shard_id)).into(),
            );
        }

        let descriptor = self.registry.register(shard_id, info, self.shared.now());
        self.shared.events.emit(NodeEvent::ShardRegistered {
            shard_id: shard_id.to_string(),
        });
        info!(shard_id = %shard_id, endpoint = %descriptor.endpoint, "shard registered");
        Ok(descriptor)
    }

    pub fn set_shard_status(&mut self, shard_id: &str, status: ShardStatus) -> Result<(), DedupError> {
        self.ensure_live()?;
        if !self.registry.set_status(shard_id, status) {
            return Err(DedupError::NotFound(shard_id.to_string()));
        }
        debug!(shard_id = %shard_id, status = %status, "shard status changed");
        Ok(())
    }

    pub fn shard_heartbeat(&mut self, shard_id: &str) -> Result<(), DedupError> {
        self.ensure_live()?;
        let now = self.shared.now();
        if !self.registry.heartbeat(shard_id, now) {
            return Err(DedupError::NotFound(shard_id.to_string()));
        }
        Ok(())
    }

    pub fn remove_shard(&mut self, shard_id: &str) -> Result<ShardDescriptor, DedupError> {
        self.ensure_live()?;
        self.registry
            .remove(shard_id)
            .ok_or_else(|| DedupError::NotFound(shard_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Dedup sessions
    // ------------------------------------------------------------------

    /// Check `candidate` locally and against every active shard except the
    /// requester.
    pub async fn perform_dedup_check(
        &mut self,
        candidate: &str,
        requesting_shard_id: Option<&str>,
    ) -> Result<DedupResult, DedupError> {
        self.run_session(candidate, requesting_shard_id, Targets::AllActive)
            .await
    }

    /// Check `candidate` locally and against one named shard.
    ///
    /// # Errors
    ///
    /// `NotFound` if `shard_id` is not registered (the session still ends
    /// with a failure audit entry).
    pub async fn perform_targeted_dedup_check(
        &mut self,
        candidate: &str,
        shard_id: &str,
    ) -> Result<DedupResult, DedupError> {
        self.run_session(candidate, None, Targets::Shard(shard_id.to_string()))
            .await
    }

    /// Check `candidate` locally and against the earliest-registered shard.
    pub async fn perform_first_shard_dedup_check(
        &mut self,
        candidate: &str,
    ) -> Result<DedupResult, DedupError> {
        self.run_session(candidate, None, Targets::FirstRegistered)
            .await
    }

    async fn run_session(
        &mut self,
        candidate: &str,
        requesting_shard_id: Option<&str>,
        targets: Targets,
    ) -> Result<DedupResult, DedupError> {
        self.ensure_live()?;

        let mut session = DedupSession::new(candidate, requesting_shard_id, self.shared.now());
        debug!(
            session_id = %session.session_id,
            candidate = %session.candidate_prefix(),
            "dedup session initiated"
        );

        let outcome = self.drive_session(&mut session, targets).await;
        let now = self.shared.now();
        let session_id = session.session_id.clone();
        let candidate_prefix = session.candidate_prefix();

        match outcome {
            Ok(result) => {
                session.complete(result.clone(), now);
                let elapsed_ms = session.elapsed_ms(now);
                self.stats
                    .record_completed(result.confidence, result.is_duplicate);
                self.sessions.insert(session);

                self.record_audit(
                    AuditEventType::PsiDeduplicationCompleted,
                    &json!({
                        "sessionId": session_id,
                        "candidatePrefix": candidate_prefix,
                        "isDuplicate": result.is_duplicate,
                        "confidence": result.confidence,
                        "shardCount": result.shard_count,
                        "matchCount": result.match_count,
                        "evidence": result.evidence,
                        "elapsedMs": elapsed_ms,
                    }),
                    now,
                )?;

                self.shared.events.emit(NodeEvent::DedupCompleted {
                    session_id: session_id.clone(),
                    is_duplicate: result.is_duplicate,
                    confidence: result.confidence,
                });
                if result.is_duplicate {
                    self.shared.events.emit(NodeEvent::DuplicateDetected {
                        session_id: session_id.clone(),
                        confidence: result.confidence,
                        match_type: result.evidence.first().and_then(|e| e.match_type),
                    });
                }

                info!(
                    session_id = %session_id,
                    candidate = %candidate_prefix,
                    duplicate = result.is_duplicate,
                    confidence = result.confidence,
                    shards = result.shard_count,
                    matches = result.match_count,
                    elapsed_ms,
                    "dedup session completed"
                );
                Ok(result)
            }
            Err(err) => {
                session.fail(&err, now);
                let elapsed_ms = session.elapsed_ms(now);
                self.stats.record_failed();
                self.sessions.insert(session);

                self.record_failure(
                    AuditEventType::PsiDeduplicationFailed,
                    json!({
                        "sessionId": session_id,
                        "candidatePrefix": candidate_prefix,
                        "error": err.to_string(),
                        "elapsedMs": elapsed_ms,
                    }),
                );
                self.shared.events.emit(NodeEvent::DedupFailed {
                    session_id: session_id.clone(),
                    error: err.to_string(),
                });

                warn!(
                    session_id = %session_id,
                    candidate = %candidate_prefix,
                    error = %err,
                    "dedup session failed"
                );
                Err(err)
            }
        }
    }

    async fn drive_session(
        &mut self,
        session: &mut DedupSession,
        targets: Targets,
    ) -> Result<DedupResult, DedupError> {
        let candidate = Fingerprint::parse(&session.candidate_fingerprint)?;
        let threshold = self.config.deduplication_threshold;

        let local = self.shared.local_set.read().lookup(&candidate, threshold);
        if local.found {
            session
                .intersections
                .push(ShardIntersection::answered(LOCAL_SHARD, local));
        }

        let shards = self.resolve_targets(&targets, session.requesting_shard_id.as_deref())?;
        let remote_shards = shards.len();

        if !shards.is_empty() {
            let now = self.shared.now();
            let timeout = Duration::from_millis(self.config.shard_timeout_ms);
            let transport = Arc::clone(&self.transport);

            let requests: Vec<_> = shards
                .into_iter()
                .map(|shard| {
                    let request = IntersectionRequest::new(
                        session.session_id.clone(),
                        candidate.as_str(),
                        self.config.shard_id.clone(),
                        now,
                    );
                    query_shard(transport.as_ref(), shard, request, timeout)
                })
                .collect();

            let outcomes = join_all(requests).await;
            session.intersections.extend(outcomes);
        }

        analyze_intersection_results(
            &session.session_id,
            &session.candidate_fingerprint,
            &session.intersections,
            remote_shards,
            threshold,
        )
    }

    fn resolve_targets(
        &self,
        targets: &Targets,
        requesting_shard_id: Option<&str>,
    ) -> Result<Vec<ShardDescriptor>, DedupError> {
        if !self.config.cross_shard_enabled {
            return Ok(Vec::new());
        }

        match targets {
            Targets::AllActive => Ok(self
                .registry
                .list_active()
                .into_iter()
                .filter(|shard| Some(shard.shard_id.as_str()) != requesting_shard_id)
                .collect()),
            Targets::Shard(shard_id) => self
                .registry
                .get(shard_id)
                .cloned()
                .map(|shard| vec![shard])
                .ok_or_else(|| DedupError::NotFound(shard_id.clone())),
            Targets::FirstRegistered => Ok(self
                .registry
                .first_registered()
                .cloned()
                .into_iter()
                .collect()),
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Peer-facing handle sharing this node's local set and audit log.
    ///
    /// Hand it to a transport so peers can be answered while this node's
    /// own sessions are in flight.
    pub fn responder(&self) -> IntersectionResponder {
        IntersectionResponder::new(Arc::clone(&self.shared))
    }

    /// Answer a peer's intersection request from the local set only.
    ///
    /// Same as going through [`DedupNode::responder`].
    pub fn handle_intersection_request(
        &self,
        request: IntersectionRequest,
    ) -> Result<IntersectionResponse, DedupError> {
        self.responder().handle_intersection_request(request)
    }

    // ------------------------------------------------------------------
    // Observability and lifecycle
    // ------------------------------------------------------------------

    pub fn metrics(&self) -> MetricsSnapshot {
        let (local_set_size, max_set_size) = {
            let local_set = self.shared.local_set.read();
            (local_set.len(), local_set.max_size())
        };
        let audit_entries = self.shared.audit.lock().len();

        MetricsSnapshot {
            shard_id: self.config.shard_id.clone(),
            local_set_size,
            max_set_size,
            registered_shards: self.registry.len(),
            active_shards: self.registry.active_count(),
            total_sessions: self.stats.total_sessions,
            completed_sessions: self.stats.completed_sessions,
            failed_sessions: self.stats.failed_sessions,
            duplicates_detected: self.stats.duplicates_detected,
            average_confidence: self.stats.average_confidence,
            audit_entries,
            stored_templates: self.store.len(),
            config: self.config.clone(),
        }
    }

    /// Zeroize key material and drop all state. Later calls fail with
    /// [`DedupError::TornDown`].
    pub fn teardown(&mut self) {
        if self.shared.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.keys.zeroize();
        self.hasher = None;
        self.shared.local_set.write().clear();
        self.registry.clear();
        self.sessions.clear();
        self.store.clear();
        self.shared.audit.lock().destroy();

        self.shared.events.emit(NodeEvent::TornDown);
        info!(shard_id = %self.config.shard_id, "dedup node torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.is_torn_down()
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn shard_id(&self) -> &str {
        &self.config.shard_id
    }

    /// Read access to the local set. Drop the guard before enrolling.
    pub fn local_set(&self) -> RwLockReadGuard<'_, LocalMatchSet> {
        self.shared.local_set.read()
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    pub fn session(&self, session_id: &str) -> Option<&DedupSession> {
        self.sessions.get(session_id)
    }

    pub fn template_store(&self) -> &TemplateStore {
        &self.store
    }

    /// The audit log. Inbound requests block on this lock while the guard
    /// is held.
    pub fn audit_log(&self) -> MutexGuard<'_, AuditLog> {
        self.shared.audit.lock()
    }

    pub fn key_pair(&self) -> &NodeKeyPair {
        &self.keys
    }

    fn ensure_live(&self) -> Result<(), DedupError> {
        self.shared.ensure_live()
    }

    fn hasher(&self) -> Result<&FingerprintHasher, DedupError> {
        self.hasher.as_ref().ok_or(DedupError::TornDown)
    }

    fn record_audit(
        &self,
        event_type: AuditEventType,
        payload: &serde_json::Value,
        now: Millis,
    ) -> Result<String, DedupError> {
        self.shared.record_audit(event_type, payload, now)
    }

    fn record_failure(&self, event_type: AuditEventType, payload: serde_json::Value) {
        self.shared.record_failure(event_type, payload)
    }
}

/// One isolated round trip; every failure becomes that shard's entry.
async fn query_shard(
    transport: &dyn PeerTransport,
    shard: ShardDescriptor,
    request: IntersectionRequest,
    timeout: Duration,
) -> ShardIntersection {
    let session_id = request.session_id.clone();
    let outcome =
        tokio::time::timeout(timeout, transport.send_intersection_request(&shard, request)).await;

    let intersection = match outcome {
        Err(_) => Err(DedupError::Protocol {
            shard_id: shard.shard_id.clone(),
            reason: TransportError::Timeout {
                shard_id: shard.shard_id.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }
            .to_string(),
        }),
        Ok(Err(transport_err)) => Err(DedupError::Protocol {
            shard_id: shard.shard_id.clone(),
            reason: transport_err.to_string(),
        }),
        Ok(Ok(response)) => validate_response(&session_id, &shard.shard_id, response),
    };

    match intersection {
        Ok(intersection) => {
            debug!(shard_id = %shard.shard_id, found = intersection.found, "shard answered");
            ShardIntersection::answered(shard.shard_id, intersection)
        }
        Err(err) => {
            warn!(shard_id = %shard.shard_id, error = %err, "shard query failed");
            ShardIntersection::failed(shard.shard_id, err.to_string())
        }
    }
}

fn validate_subject_id(subject_id: &str) -> Result<(), ValidationError> {
    if subject_id.trim().is_empty() {
        return Err(ValidationError::InvalidSubjectId("subject id is empty".to_string()));
    }
    if subject_id.chars().count() > MAX_SUBJECT_ID_LEN {
        return Err(ValidationError::InvalidSubjectId(format!(
            "subject id longer than {} characters",
            MAX_SUBJECT_ID_LEN
        )));
    }
    if subject_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidSubjectId(
            "subject id contains control characters".to_string(),
        ));
    }
    Ok(())
}
