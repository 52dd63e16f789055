//! Out-of-band memory of the most recent mutating request.
//!
//! Several fields are not reliably echoed back by the remote API:
//! availability-zone placement, the capacity class, the shard count,
//! per-shard replica configuration and log-delivery configuration. For
//! those, "what we last asked for" has to be remembered on our side and
//! compared against instead of the observed state. The record is written
//! only immediately after an accepted mutating call, with the exact payload
//! sent, never with the response.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::types::{LogDeliveryConfig, ShardSpec};

/// Current on-disk schema version of [`LastRequestedRecord`].
pub const RECORD_VERSION: u32 = 1;

/// Typed, versioned side-record of the last mutating request, keyed by
/// resource identity. One field per tracked value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRequestedRecord {
    pub version: u32,
    pub capacity_class: Option<String>,
    pub shard_count: Option<i64>,
    pub shard_config: Option<Vec<ShardSpec>>,
    pub log_delivery: Option<Vec<LogDeliveryConfig>>,
    pub availability_zones: Option<Vec<String>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for LastRequestedRecord {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            capacity_class: None,
            shard_count: None,
            shard_config: None,
            log_delivery: None,
            availability_zones: None,
            updated_at: None,
        }
    }
}

/// Resource-scoped key-value persistence, surviving across passes.
/// Implemented by the agent (SQLite) and by [`MemoryStore`] for tests.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, resource_id: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, resource_id: &str, value: &str) -> Result<(), StoreError>;
}

/// Typed access to the persisted last-requested record.
#[derive(Clone)]
pub struct LastRequestedStore {
    backend: Arc<dyn MetadataStore>,
}

impl LastRequestedStore {
    pub fn new(backend: Arc<dyn MetadataStore>) -> Self {
        Self { backend }
    }

    /// Load the record for a resource. A missing or unparseable record
    /// yields the default (empty) record; an unparseable one is logged,
    /// since it will be overwritten by the next accepted mutating call.
    pub async fn load(&self, resource_id: &str) -> Result<LastRequestedRecord, StoreError> {
        match self.backend.get(resource_id).await? {
            None => Ok(LastRequestedRecord::default()),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(record) => Ok(record),
                Err(e) => {
                    warn!(
                        "Discarding unparseable last-requested record for {}: {}",
                        resource_id, e
                    );
                    Ok(LastRequestedRecord::default())
                }
            },
        }
    }

    /// Persist the record. Called only after an accepted mutating call.
    pub async fn save(
        &self,
        resource_id: &str,
        record: &LastRequestedRecord,
    ) -> Result<(), StoreError> {
        let mut record = record.clone();
        record.version = RECORD_VERSION;
        record.updated_at = Some(Utc::now());
        let raw = serde_json::to_string(&record)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.backend.put(resource_id, &raw).await
    }
}

/// In-memory metadata store for tests and single-process use.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, resource_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(resource_id).cloned())
    }

    async fn put(&self, resource_id: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(resource_id.to_string(), value.to_string());
        Ok(())
    }
}
