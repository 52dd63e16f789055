//! Remote control-plane API surface.
//!
//! The engine is written against this trait; the agent provides the HTTP
//! implementation and tests provide mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::types::{DesiredSpec, LogDeliveryConfig, ObservedState, ServiceEvent, Tag};

/// Field set for a generic modify call. Every field optional; only set
/// fields are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub cache_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_group_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_maintenance_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_failover_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_az_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_cluster_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_delivery: Option<Vec<LogDeliveryConfig>>,
}

impl ModifyRequest {
    pub fn new(cache_id: impl Into<String>) -> Self {
        Self {
            cache_id: cache_id.into(),
            ..Default::default()
        }
    }

    /// True if no field beyond the identifier is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::new(self.cache_id.clone())
    }
}

/// Per-shard target for a replica-count change, including availability-zone
/// placement for the primary and each replica.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardReplicaTarget {
    pub shard_id: String,
    pub target_replica_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_availability_zones: Option<Vec<String>>,
}

/// Payload for an increase or decrease replica-count call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicaCountRequest {
    pub cache_id: String,
    /// Uniform target, used when no per-shard targets are given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas_per_shard: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub shard_targets: Vec<ShardReplicaTarget>,
    /// On a single-shard decrease, the ordinal node ids to remove.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub node_ids_to_remove: Vec<String>,
}

/// Best-effort availability-zone placement hint for one new shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardZoneHint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_availability_zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_availability_zones: Option<Vec<String>>,
}

/// Payload for a shard-count change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReshardRequest {
    pub cache_id: String,
    pub target_shard_count: i64,
    /// On a decrease, the shards to keep. Never empty.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub retain_shards: Vec<String>,
    /// On an increase, optional placement hints for the new shards.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub zone_hints: Vec<ShardZoneHint>,
}

/// Capacity classes the resource can currently move to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllowedCapacityChanges {
    pub scale_up: Vec<String>,
    pub scale_down: Vec<String>,
}

/// Snapshot of one member node, fetched when the aggregate describe output
/// does not carry the needed detail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub security_group_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_group_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_maintenance_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
}

/// Typed RPC surface of the remote control plane.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn describe(&self, cache_id: &str) -> Result<ObservedState, RemoteError>;

    async fn create(&self, spec: &DesiredSpec) -> Result<ObservedState, RemoteError>;

    async fn delete(&self, cache_id: &str) -> Result<(), RemoteError>;

    async fn modify(&self, req: &ModifyRequest) -> Result<ObservedState, RemoteError>;

    async fn increase_replica_count(
        &self,
        req: &ReplicaCountRequest,
    ) -> Result<ObservedState, RemoteError>;

    async fn decrease_replica_count(
        &self,
        req: &ReplicaCountRequest,
    ) -> Result<ObservedState, RemoteError>;

    async fn reshard(&self, req: &ReshardRequest) -> Result<ObservedState, RemoteError>;

    async fn list_allowed_capacity_changes(
        &self,
        cache_id: &str,
    ) -> Result<AllowedCapacityChanges, RemoteError>;

    async fn describe_node(&self, node_id: &str) -> Result<NodeSnapshot, RemoteError>;

    async fn list_events(
        &self,
        cache_id: &str,
        max: usize,
    ) -> Result<Vec<ServiceEvent>, RemoteError>;

    async fn list_tags(&self, cache_id: &str) -> Result<Vec<Tag>, RemoteError>;

    async fn add_tags(&self, cache_id: &str, tags: &[Tag]) -> Result<(), RemoteError>;

    async fn remove_tags(&self, cache_id: &str, keys: &[String]) -> Result<(), RemoteError>;
}
