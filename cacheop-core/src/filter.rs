//! Meaning-aware delta cleanup.
//!
//! The raw delta disagrees with reality in three ways: version strings that
//! differ only cosmetically, fields the server filled with defaults because
//! the owner expressed no preference, and fields the remote API does not
//! echo back faithfully. This pass removes the first two kinds of noise and
//! injects synthetic differences for the third, comparing desired state
//! against the last-requested record instead of the observed state.

use serde_json::Value;

use crate::delta::{Delta, Field};
use crate::last_requested::LastRequestedRecord;
use crate::types::{DesiredSpec, ObservedState};
use crate::version::versions_match;

fn json<T: serde::Serialize>(v: &T) -> Option<Value> {
    serde_json::to_value(v).ok()
}

/// Filter the delta in place. Idempotent: filtering twice yields the same
/// delta as filtering once.
pub fn filter(
    delta: &mut Delta,
    desired: &DesiredSpec,
    latest: &ObservedState,
    last: &LastRequestedRecord,
) {
    // Cosmetic version drift: "6.2" matches "6.2.6", "6.x" matches "6.0.5".
    if delta.contains(Field::EngineVersion) {
        if let (Some(d), Some(l)) = (&desired.engine_version, &latest.engine_version) {
            if versions_match(d, l) {
                delta.remove(Field::EngineVersion);
            }
        }
    }

    // Server-defaulted fields: the owner expressed no preference and the
    // server filled a value. Not drift.
    delta.retain(|d| !(d.desired.is_none() && d.latest.is_some()));

    // Log delivery is not echoed back reliably; compare desired against the
    // payload of the last accepted mutating call instead.
    if desired.log_delivery != last.log_delivery {
        delta.add(
            Field::LogDelivery,
            json(&desired.log_delivery),
            json(&last.log_delivery),
        );
    } else {
        delta.remove(Field::LogDelivery);
    }

    // Multi-AZ and automatic failover are reported as status strings
    // ("enabled", "disabled", also transitional "enabling"/"disabling").
    if multi_az_requires_update(desired, latest) {
        delta.add(
            Field::MultiAz,
            json(&desired.multi_az_enabled),
            json(&latest.multi_az),
        );
    } else {
        delta.remove(Field::MultiAz);
    }

    if auto_failover_requires_update(desired, latest) {
        delta.add(
            Field::AutomaticFailover,
            json(&desired.automatic_failover_enabled),
            json(&latest.automatic_failover),
        );
    } else {
        delta.remove(Field::AutomaticFailover);
    }

    match primary_cluster_requires_update(desired, latest) {
        Some(current) => delta.add(
            Field::PrimaryClusterId,
            json(&desired.primary_cluster_id),
            json(&current),
        ),
        None => delta.remove(Field::PrimaryClusterId),
    }
}

/// True if the observed multi-AZ status does not yet match the desired
/// state. Transitional statuses count as not-yet-matching.
fn multi_az_requires_update(desired: &DesiredSpec, latest: &ObservedState) -> bool {
    let Some(want) = desired.multi_az_enabled else {
        return false;
    };
    // The remote should report a value; if it doesn't, attempt the update.
    let Some(current) = latest.multi_az.as_deref() else {
        return true;
    };
    if want {
        current != "enabled"
    } else {
        current != "disabled"
    }
}

/// Exactly analogous to [`multi_az_requires_update`].
fn auto_failover_requires_update(desired: &DesiredSpec, latest: &ObservedState) -> bool {
    let Some(want) = desired.automatic_failover_enabled else {
        return false;
    };
    let Some(current) = latest.automatic_failover.as_deref() else {
        return true;
    };
    if want {
        current != "enabled"
    } else {
        current != "disabled"
    }
}

/// Returns the current primary node id when a primary promotion is needed.
/// Only meaningful for a single-shard topology; with no reliable observed
/// primary there is nothing to compare against.
fn primary_cluster_requires_update(
    desired: &DesiredSpec,
    latest: &ObservedState,
) -> Option<String> {
    let want = desired.primary_cluster_id.as_deref()?;
    let current = latest.primary_node_id()?;
    if current != want {
        Some(current.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::diff;
    use crate::types::{LogDeliveryConfig, ObservedShard, ShardMember};

    fn log_config(name: &str) -> LogDeliveryConfig {
        LogDeliveryConfig {
            log_type: Some("slow-log".to_string()),
            destination_type: Some("log-group".to_string()),
            destination_name: Some(name.to_string()),
            log_format: Some("json".to_string()),
            enabled: Some(true),
        }
    }

    #[test]
    fn test_version_noise_removed() {
        let desired = DesiredSpec {
            engine_version: Some("6.2".to_string()),
            ..Default::default()
        };
        let latest = ObservedState {
            engine_version: Some("6.2.6".to_string()),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        assert!(delta.contains(Field::EngineVersion));

        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(!delta.contains(Field::EngineVersion));
    }

    #[test]
    fn test_real_version_drift_survives() {
        let desired = DesiredSpec {
            engine_version: Some("7.0".to_string()),
            ..Default::default()
        };
        let latest = ObservedState {
            engine_version: Some("6.2.6".to_string()),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(delta.contains(Field::EngineVersion));
    }

    #[test]
    fn test_server_default_removed() {
        let desired = DesiredSpec::default();
        let latest = ObservedState {
            preferred_maintenance_window: Some("sun:05:00-sun:09:00".to_string()),
            snapshot_window: Some("03:00-04:00".to_string()),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        assert_eq!(delta.len(), 2);

        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_log_delivery_compared_against_last_requested() {
        let desired = DesiredSpec {
            log_delivery: Some(vec![log_config("orders-logs")]),
            ..Default::default()
        };
        // The remote echoes our configuration back, so the naive diff is
        // clean, but we never actually sent it.
        let latest = ObservedState {
            log_delivery: desired.log_delivery.clone(),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        assert!(!delta.contains(Field::LogDelivery));

        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(delta.contains(Field::LogDelivery));

        // Once the record shows we sent it, the difference is suppressed.
        let last = LastRequestedRecord {
            log_delivery: desired.log_delivery.clone(),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        filter(&mut delta, &desired, &latest, &last);
        assert!(!delta.contains(Field::LogDelivery));
    }

    #[test]
    fn test_multi_az_injected_from_status_string() {
        let desired = DesiredSpec {
            multi_az_enabled: Some(true),
            ..Default::default()
        };
        let latest = ObservedState {
            multi_az: Some("disabled".to_string()),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(delta.contains(Field::MultiAz));

        // "enabling" is not yet "enabled".
        let latest = ObservedState {
            multi_az: Some("enabling".to_string()),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(delta.contains(Field::MultiAz));

        let latest = ObservedState {
            multi_az: Some("enabled".to_string()),
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(!delta.contains(Field::MultiAz));
    }

    #[test]
    fn test_primary_cluster_drift() {
        let desired = DesiredSpec {
            primary_cluster_id: Some("cache-002".to_string()),
            ..Default::default()
        };
        let latest = ObservedState {
            shards: vec![ObservedShard {
                shard_id: Some("0001".to_string()),
                status: Some("available".to_string()),
                members: vec![
                    ShardMember {
                        node_id: Some("cache-001".to_string()),
                        role: Some("primary".to_string()),
                        availability_zone: None,
                    },
                    ShardMember {
                        node_id: Some("cache-002".to_string()),
                        role: Some("replica".to_string()),
                        availability_zone: None,
                    },
                ],
            }],
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        filter(&mut delta, &desired, &latest, &LastRequestedRecord::default());
        assert!(delta.contains(Field::PrimaryClusterId));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let desired = DesiredSpec {
            engine_version: Some("6.x".to_string()),
            multi_az_enabled: Some(true),
            log_delivery: Some(vec![log_config("orders-logs")]),
            ..Default::default()
        };
        let latest = ObservedState {
            engine_version: Some("6.0.5".to_string()),
            multi_az: Some("disabled".to_string()),
            preferred_maintenance_window: Some("sun:05:00-sun:09:00".to_string()),
            ..Default::default()
        };
        let last = LastRequestedRecord::default();

        let mut once = diff(&desired, &latest);
        filter(&mut once, &desired, &latest, &last);
        let mut twice = once.clone();
        filter(&mut twice, &desired, &latest, &last);
        assert_eq!(once, twice);
    }
}
