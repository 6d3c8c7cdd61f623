//! `biodedup simulate`
//!
//! Builds `shards` peer nodes sharing one federation key and noise seed,
//! enrolls `subjects` synthetic behavioral templates across them, then has
//! a coordinator node check every enrolled subject plus as many fresh ones
//! through a [`SimulatedTransport`]. Prints a JSON report.

use biodedup::federation::{LoopbackTransport, ShardInfo, SimulatedTransport, SimulationProfile};
use biodedup::metrics::MetricsSnapshot;
use biodedup::{DedupConfig, DedupError, DedupNode, RawTemplate};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

const COORDINATOR_ID: &str = "coordinator";
const TIMING_SAMPLES: usize = 24;

/// Options for one simulation run
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub shards: usize,
    pub subjects: usize,
    pub profile: SimulationProfile,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub shards: usize,
    pub enrolled_subjects: usize,
    pub checks: usize,
    /// Enrolled subjects flagged as duplicates
    pub duplicates_found: usize,
    /// Fresh subjects flagged as duplicates
    pub false_positives: usize,
    /// Shard round trips that ended in an error
    pub shard_failures: usize,
    pub coordinator: MetricsSnapshot,
}

pub async fn execute(
    config: DedupConfig,
    shards: usize,
    subjects: usize,
    failure_rate: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    if !(0.0..=1.0).contains(&failure_rate) {
        return Err(format!("failure rate {} outside [0, 1]", failure_rate).into());
    }

    let options = SimulationOptions {
        shards,
        subjects,
        profile: SimulationProfile {
            failure_rate,
            ..SimulationProfile::default()
        },
    };
    let report = run(config, &options).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the simulated federation and return the report
pub async fn run(
    mut config: DedupConfig,
    options: &SimulationOptions,
) -> Result<SimulationReport, DedupError> {
    // Shards must agree on the noise seed for fingerprints to line up
    let noise_seed = config.noise_seed.unwrap_or_else(|| rand::thread_rng().next_u64());
    config.noise_seed = Some(noise_seed);

    let mut key_material = Zeroizing::new(vec![0u8; config.key_bytes()]);
    rand::thread_rng().fill_bytes(&mut key_material);

    let loopback = LoopbackTransport::new();
    let mut peers = Vec::with_capacity(options.shards);
    for index in 0..options.shards {
        let node = DedupNode::builder(DedupConfig {
            shard_id: format!("shard-{}", index + 1),
            ..config.clone()
        })
        .key_material(&key_material)
        .build()?;
        loopback.add_peer(node.responder());
        peers.push(node);
    }

    // Round-robin; with no shards nothing is enrolled
    let mut enrolled_subjects = 0;
    let shard_count = peers.len();
    for subject in 0..options.subjects {
        if let Some(peer) = peers.get_mut(subject % shard_count.max(1)) {
            let template = synthetic_template(subject as u64);
            peer.register_biometric(&subject_id(subject), &template, "behavioral")?;
            enrolled_subjects += 1;
        }
    }

    let transport = SimulatedTransport::new(Arc::new(loopback), options.profile);
    let mut coordinator = DedupNode::builder(DedupConfig {
        shard_id: COORDINATOR_ID.to_string(),
        ..config.clone()
    })
    .key_material(&key_material)
    .transport(Arc::new(transport))
    .build()?;

    for peer in &peers {
        let shard_id = peer.shard_id();
        coordinator.register_shard(shard_id, ShardInfo::new(format!("loopback://{}", shard_id)))?;
    }

    let mut duplicates_found = 0;
    let mut false_positives = 0;
    let mut checks = 0;

    // Enrolled subjects first, then the same number of never-enrolled ones
    for subject in 0..options.subjects * 2 {
        let enrolled = subject < enrolled_subjects;
        let fingerprint =
            coordinator.fingerprint_template(&synthetic_template(subject as u64), "behavioral")?;
        let result = coordinator
            .perform_dedup_check(fingerprint.as_str(), None)
            .await?;
        checks += 1;

        match (enrolled, result.is_duplicate) {
            (true, true) => duplicates_found += 1,
            (false, true) => false_positives += 1,
            _ => {}
        }
    }

    let shard_failures = coordinator
        .sessions()
        .query(&Default::default())
        .iter()
        .flat_map(|session| session.intersections.iter())
        .filter(|entry| entry.error.is_some())
        .count();

    info!(
        checks,
        duplicates_found,
        false_positives,
        shard_failures,
        "simulation finished"
    );

    Ok(SimulationReport {
        shards: options.shards,
        enrolled_subjects,
        checks,
        duplicates_found,
        false_positives,
        shard_failures,
        coordinator: coordinator.metrics(),
    })
}

fn subject_id(index: usize) -> String {
    format!("subject-{:04}", index)
}

/// Keystroke dwell and flight timings, deterministic per subject
fn synthetic_template(subject: u64) -> RawTemplate {
    let mut rng = StdRng::seed_from_u64(subject);
    let base_dwell = rng.gen_range(60.0..140.0);
    let base_flight = rng.gen_range(90.0..260.0);

    let mut timings = BTreeMap::new();
    timings.insert(
        "dwell".to_string(),
        (0..TIMING_SAMPLES)
            .map(|_| base_dwell + rng.gen_range(-15.0..15.0))
            .collect(),
    );
    timings.insert(
        "flight".to_string(),
        (0..TIMING_SAMPLES)
            .map(|_| base_flight + rng.gen_range(-40.0..40.0))
            .collect(),
    );
    RawTemplate::Behavioral { timings }
}
