//! Shard Registry
//!
//! Known peer shards for cross-shard deduplication.
//!
//! ## Semantics
//!
//! - **Upsert**: registering an existing shard id overwrites it and resets
//!   it to active with fresh timestamps
//! - **Status**: maintained externally (operator or health checks); the
//!   registry never expires shards on its own
//! - **Order**: listing follows registration order, so fan-out and the
//!   "first registered" convenience path are deterministic

use crate::clock::Millis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Availability of a peer shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Active,
    Inactive,
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardStatus::Active => f.write_str("active"),
            ShardStatus::Inactive => f.write_str("inactive"),
        }
    }
}

/// Caller-supplied connection details for a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub endpoint: String,
}

impl ShardInfo {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

/// Registry entry for one peer shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDescriptor {
    pub shard_id: String,
    pub endpoint: String,
    pub status: ShardStatus,
    pub registered_at: Millis,
    pub last_heartbeat: Millis,
}

impl ShardDescriptor {
    pub fn is_active(&self) -> bool {
        self.status == ShardStatus::Active
    }
}

#[derive(Debug, Clone)]
struct Slot {
    /// Registration sequence (monotonic, reassigned on re-registration)
    sequence: u64,
    descriptor: ShardDescriptor,
}

/// Registry of peer shards keyed by shard id.
///
/// # Example
///
/// ```ignore
/// let mut registry = ShardRegistry::new();
/// registry.register("shard-b", ShardInfo::new("mem://shard-b"), now);
/// assert_eq!(registry.list_active().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShardRegistry {
    shards: HashMap<String, Slot>,
    next_sequence: u64,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a shard.
    ///
    /// # Returns
    ///
    /// The descriptor as stored.
    pub fn register(&mut self, shard_id: &str, info: ShardInfo, now: Millis) -> ShardDescriptor {
        let descriptor = ShardDescriptor {
            shard_id: shard_id.to_string(),
            endpoint: info.endpoint,
            status: ShardStatus::Active,
            registered_at: now,
            last_heartbeat: now,
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.shards.insert(
            shard_id.to_string(),
            Slot {
                sequence,
                descriptor: descriptor.clone(),
            },
        );
        descriptor
    }

    /// Active shards in registration order.
    pub fn list_active(&self) -> Vec<ShardDescriptor> {
        self.ordered()
            .into_iter()
            .filter(|d| d.is_active())
            .cloned()
            .collect()
    }

    /// All shards in registration order, regardless of status.
    pub fn list_all(&self) -> Vec<ShardDescriptor> {
        self.ordered().into_iter().cloned().collect()
    }

    pub fn get(&self, shard_id: &str) -> Option<&ShardDescriptor> {
        self.shards.get(shard_id).map(|slot| &slot.descriptor)
    }

    pub fn remove(&mut self, shard_id: &str) -> Option<ShardDescriptor> {
        self.shards.remove(shard_id).map(|slot| slot.descriptor)
    }

    /// Change a shard's status. Returns `false` for an unknown shard.
    pub fn set_status(&mut self, shard_id: &str, status: ShardStatus) -> bool {
        match self.shards.get_mut(shard_id) {
            Some(slot) => {
                slot.descriptor.status = status;
                true
            }
            None => false,
        }
    }

    /// Record liveness. Returns `false` for an unknown shard.
    pub fn heartbeat(&mut self, shard_id: &str, now: Millis) -> bool {
        match self.shards.get_mut(shard_id) {
            Some(slot) => {
                slot.descriptor.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Earliest-registered shard, regardless of status.
    pub fn first_registered(&self) -> Option<&ShardDescriptor> {
        self.shards
            .values()
            .min_by_key(|slot| slot.sequence)
            .map(|slot| &slot.descriptor)
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.shards
            .values()
            .filter(|slot| slot.descriptor.is_active())
            .count()
    }

    pub fn clear(&mut self) {
        self.shards.clear();
    }

    fn ordered(&self) -> Vec<&ShardDescriptor> {
        let mut slots: Vec<&Slot> = self.shards.values().collect();
        slots.sort_by_key(|slot| slot.sequence);
        slots.into_iter().map(|slot| &slot.descriptor).collect()
    }
}
