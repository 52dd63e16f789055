//! Tag set synchronization.
//!
//! The remote tagging API has no update verb; adding a key that already
//! exists overwrites its value. A sync therefore needs at most one batched
//! add call and one batched remove call, and a key that shows up in both
//! computed sets must not be removed after being re-added.

use std::collections::BTreeMap;

use crate::types::Tag;

/// The add and remove batches for one sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSyncPlan {
    /// Full desired pairs to send through the add call.
    pub to_add: Vec<Tag>,
    /// Keys to send through the remove call.
    pub to_remove: Vec<String>,
}

impl TagSyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the batches needed to make `latest` equal `desired`.
///
/// When anything differs, the add batch carries every desired pair (the
/// remote add overwrites by key, so resending unchanged pairs is harmless
/// and keeps the call idempotent). The remove batch carries keys present
/// only in `latest`, except keys also being added.
pub fn plan_sync(desired: &[Tag], latest: &[Tag]) -> TagSyncPlan {
    let desired_map: BTreeMap<&str, &str> = desired
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();
    let latest_map: BTreeMap<&str, &str> = latest
        .iter()
        .map(|t| (t.key.as_str(), t.value.as_str()))
        .collect();

    if desired_map == latest_map {
        return TagSyncPlan::default();
    }

    let to_add: Vec<Tag> = desired_map
        .iter()
        .map(|(k, v)| Tag::new(*k, *v))
        .collect();

    let to_remove: Vec<String> = latest_map
        .keys()
        .filter(|k| !desired_map.contains_key(*k))
        .map(|k| (*k).to_string())
        .collect();

    TagSyncPlan { to_add, to_remove }
}
