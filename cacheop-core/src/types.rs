//! Data model for desired and observed cache state.
//!
//! A `DesiredSpec` is the owner-declared target configuration; every field is
//! optional and absence means "no preference", never "reset to default". An
//! `ObservedState` is the most recently fetched remote state and is discarded
//! after each reconcile pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single key/value tag on a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Per-shard desired configuration: replica count plus availability-zone
/// placement for the primary and each replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardSpec {
    pub shard_id: Option<String>,
    pub replica_count: Option<i64>,
    pub primary_availability_zone: Option<String>,
    pub replica_availability_zones: Option<Vec<String>>,
}

/// One log-delivery destination configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogDeliveryConfig {
    pub log_type: Option<String>,
    pub destination_type: Option<String>,
    pub destination_name: Option<String>,
    pub log_format: Option<String>,
    pub enabled: Option<bool>,
}

/// Owner-declared target configuration for a sharded cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredSpec {
    pub cache_id: Option<String>,
    pub description: Option<String>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub capacity_class: Option<String>,
    /// Uniform shard count; mutually exclusive with per-shard config.
    pub shard_count: Option<i64>,
    /// Per-shard configuration; when set, the shard count is its length.
    pub shard_config: Option<Vec<ShardSpec>>,
    /// Uniform replica count across all shards.
    pub replicas_per_shard: Option<i64>,
    pub automatic_failover_enabled: Option<bool>,
    pub multi_az_enabled: Option<bool>,
    pub preferred_maintenance_window: Option<String>,
    pub snapshot_window: Option<String>,
    pub security_group_ids: Option<Vec<String>>,
    pub parameter_group_name: Option<String>,
    pub log_delivery: Option<Vec<LogDeliveryConfig>>,
    pub primary_cluster_id: Option<String>,
    pub tags: Option<Vec<Tag>>,
}

impl DesiredSpec {
    /// Effective desired shard count: the explicit count, or the length of
    /// the per-shard configuration when only that is given.
    pub fn desired_shard_count(&self) -> Option<i64> {
        self.shard_count
            .or_else(|| self.shard_config.as_ref().map(|c| c.len() as i64))
    }
}

/// Remote-owned lifecycle status of the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifecycleStatus {
    Creating,
    Available,
    Modifying,
    Deleting,
    CreateFailed,
    Snapshotting,
    Other(String),
}

impl From<String> for LifecycleStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "modifying" => Self::Modifying,
            "deleting" => Self::Deleting,
            "create-failed" => Self::CreateFailed,
            "snapshotting" => Self::Snapshotting,
            _ => Self::Other(s),
        }
    }
}

impl From<LifecycleStatus> for String {
    fn from(s: LifecycleStatus) -> Self {
        match s {
            LifecycleStatus::Creating => "creating".to_string(),
            LifecycleStatus::Available => "available".to_string(),
            LifecycleStatus::Modifying => "modifying".to_string(),
            LifecycleStatus::Deleting => "deleting".to_string(),
            LifecycleStatus::CreateFailed => "create-failed".to_string(),
            LifecycleStatus::Snapshotting => "snapshotting".to_string(),
            LifecycleStatus::Other(s) => s,
        }
    }
}

/// One member node of a shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMember {
    pub node_id: Option<String>,
    /// "primary" or "replica"; may be absent mid-transition.
    pub role: Option<String>,
    pub availability_zone: Option<String>,
}

/// One observed shard (node group): a primary plus zero or more replicas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedShard {
    pub shard_id: Option<String>,
    pub status: Option<String>,
    pub members: Vec<ShardMember>,
}

impl ObservedShard {
    /// Replica count derived from membership: members minus the primary.
    pub fn replica_count(&self) -> i64 {
        if self.members.is_empty() {
            0
        } else {
            self.members.len() as i64 - 1
        }
    }
}

/// Changes the remote system has accepted but not yet applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingValues {
    pub num_nodes: Option<i64>,
    pub capacity_class: Option<String>,
    pub shard_count: Option<i64>,
}

/// A recent service-side event attached to the resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub message: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Most recently fetched remote state. Spec-mirroring fields reflect what the
/// remote reported (or what a merge back-populated); everything from `status`
/// down is remote-owned and only ever read by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub cache_id: Option<String>,
    pub description: Option<String>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub capacity_class: Option<String>,
    pub shard_count: Option<i64>,
    pub shard_config: Option<Vec<ShardSpec>>,
    pub replicas_per_shard: Option<i64>,
    pub preferred_maintenance_window: Option<String>,
    pub snapshot_window: Option<String>,
    pub security_group_ids: Option<Vec<String>>,
    pub parameter_group_name: Option<String>,
    pub log_delivery: Option<Vec<LogDeliveryConfig>>,
    pub primary_cluster_id: Option<String>,
    pub tags: Option<Vec<Tag>>,

    pub status: Option<LifecycleStatus>,
    pub shards: Vec<ObservedShard>,
    pub member_clusters: Vec<String>,
    pub pending: Option<PendingValues>,
    /// Raw status string, e.g. "enabled", "disabled", "enabling".
    pub multi_az: Option<String>,
    /// Raw status string, e.g. "enabled", "disabled", "enabling".
    pub automatic_failover: Option<String>,
    pub allowed_scale_up: Option<Vec<String>>,
    pub allowed_scale_down: Option<Vec<String>>,
    pub events: Vec<ServiceEvent>,
}

impl ObservedState {
    /// Observed shard count, if any shard structure was reported.
    pub fn observed_shard_count(&self) -> Option<i64> {
        if self.shards.is_empty() {
            self.shard_count
        } else {
            Some(self.shards.len() as i64)
        }
    }

    /// True when every shard individually reports "available".
    pub fn all_shards_available(&self) -> bool {
        self.shards
            .iter()
            .all(|s| s.status.as_deref() == Some("available"))
    }

    /// Total member nodes across all shards.
    pub fn total_member_count(&self) -> usize {
        self.shards.iter().map(|s| s.members.len()).sum()
    }

    /// Any non-nil member node id, used as a representative node for
    /// supplemental describe calls.
    pub fn representative_node_id(&self) -> Option<&str> {
        self.shards
            .iter()
            .flat_map(|s| s.members.iter())
            .find_map(|m| m.node_id.as_deref())
    }

    /// The primary member's node id, only meaningful for a single-shard
    /// topology.
    pub fn primary_node_id(&self) -> Option<&str> {
        if self.shards.len() != 1 {
            return None;
        }
        self.shards[0]
            .members
            .iter()
            .find(|m| m.role.as_deref() == Some("primary"))
            .and_then(|m| m.node_id.as_deref())
    }

    pub fn has_status(&self, status: &LifecycleStatus) -> bool {
        self.status.as_ref() == Some(status)
    }
}
