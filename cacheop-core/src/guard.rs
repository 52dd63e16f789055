//! Lifecycle gate in front of the planner.
//!
//! The remote control plane serializes structural mutations; issuing a second
//! one mid-flight errors or queues unpredictably. This gate rejects passes
//! while the resource is transitioning, waits for sharded topology to settle,
//! and detects silently rolled-back changes that would otherwise retry
//! forever.

use crate::config::ReconcilerConfig;
use crate::delta::{Delta, Field};
use crate::error::ReconcileError;
use crate::last_requested::LastRequestedRecord;
use crate::types::{DesiredSpec, LifecycleStatus, ObservedState};

/// Check whether the resource can accept a mutating call right now.
///
/// Returns `Ok(())` when the planner may proceed. Errors are either
/// `RetryAfter` (transitional, the driver re-invokes later) or
/// `StuckRollback` (terminal, a human has to look).
pub fn check(
    desired: &DesiredSpec,
    latest: &ObservedState,
    delta: &Delta,
    last: &LastRequestedRecord,
    cfg: &ReconcilerConfig,
) -> Result<(), ReconcileError> {
    if let Some(status) = &latest.status {
        match status {
            LifecycleStatus::Creating | LifecycleStatus::Modifying | LifecycleStatus::Deleting => {
                return Err(ReconcileError::RetryAfter {
                    reason: format!("cache is {}", String::from(status.clone())),
                    after: cfg.busy_backoff,
                });
            }
            _ => {}
        }
    }

    // Topology must have settled before any structural change: every shard
    // available, and the member-cluster list in agreement with the shard
    // membership the remote reports.
    if !latest.shards.is_empty() {
        if !latest.all_shards_available() {
            return Err(ReconcileError::RetryAfter {
                reason: "not all shards are available".to_string(),
                after: cfg.not_ready_backoff,
            });
        }
        if latest.member_clusters.len() != latest.total_member_count() {
            return Err(ReconcileError::RetryAfter {
                reason: "member clusters do not yet match shard membership".to_string(),
                after: cfg.not_ready_backoff,
            });
        }
    }

    check_capacity_rollback(desired, latest, delta, last, cfg)?;
    check_shard_rollback(desired, latest, delta, last, cfg)?;
    check_replica_config_rollback(desired, latest, delta, last, cfg)?;

    Ok(())
}

/// A capacity-class change we already sent has vanished: the record shows the
/// desired class was requested, yet the observed class still differs and the
/// remote no longer advertises it as a permitted scale-up target. Retrying
/// the same request loops forever, so this is terminal. A class still listed
/// as a permitted target is the planner's deferral case, not a rollback.
fn check_capacity_rollback(
    desired: &DesiredSpec,
    latest: &ObservedState,
    delta: &Delta,
    last: &LastRequestedRecord,
    cfg: &ReconcilerConfig,
) -> Result<(), ReconcileError> {
    if !delta.contains(Field::CapacityClass) {
        return Ok(());
    }
    let Some(want) = &desired.capacity_class else {
        return Ok(());
    };
    if last.capacity_class.as_ref() != Some(want) {
        return Ok(());
    }
    // Still applying server-side.
    if pending_capacity_class(latest) == Some(want.as_str()) {
        return Err(ReconcileError::RetryAfter {
            reason: format!("capacity class change to {want} is still pending"),
            after: cfg.busy_backoff,
        });
    }
    if class_in(&latest.allowed_scale_up, want) {
        return Ok(());
    }
    Err(ReconcileError::StuckRollback(format!(
        "capacity class {want} was requested but the change was rolled back server-side"
    )))
}

/// Same detection for shard topology: a reshard we already requested never
/// landed and is no longer in flight.
fn check_shard_rollback(
    desired: &DesiredSpec,
    latest: &ObservedState,
    delta: &Delta,
    last: &LastRequestedRecord,
    cfg: &ReconcilerConfig,
) -> Result<(), ReconcileError> {
    if !delta.contains(Field::ShardCount) {
        return Ok(());
    }
    let Some(want) = desired.desired_shard_count() else {
        return Ok(());
    };
    if last.shard_count != Some(want) {
        return Ok(());
    }
    let pending = latest.pending.as_ref().and_then(|p| p.shard_count);
    if pending == Some(want) {
        return Err(ReconcileError::RetryAfter {
            reason: format!("shard count change to {want} is still pending"),
            after: cfg.busy_backoff,
        });
    }
    Err(ReconcileError::StuckRollback(format!(
        "shard count {want} was requested but the change was rolled back server-side"
    )))
}

/// And for per-shard replica configuration: the exact configuration was
/// already requested, the observed replica counts still differ, and the
/// remote reports nothing pending. Re-issuing the identical request every
/// pass would loop forever. A uniform replica-count difference is left to
/// the planner.
fn check_replica_config_rollback(
    desired: &DesiredSpec,
    latest: &ObservedState,
    delta: &Delta,
    last: &LastRequestedRecord,
    cfg: &ReconcilerConfig,
) -> Result<(), ReconcileError> {
    let Some(config) = &desired.shard_config else {
        return Ok(());
    };
    if last.shard_config.as_ref() != Some(config) {
        return Ok(());
    }
    if delta.contains(Field::ReplicasPerShard) {
        return Ok(());
    }
    let mismatch = latest.shards.iter().any(|shard| {
        shard.shard_id.as_deref().is_some_and(|id| {
            config
                .iter()
                .find(|s| s.shard_id.as_deref() == Some(id))
                .and_then(|s| s.replica_count)
                .is_some_and(|want| want != shard.replica_count())
        })
    });
    if !mismatch {
        return Ok(());
    }
    let in_flight = latest
        .pending
        .as_ref()
        .is_some_and(|p| p.num_nodes.is_some() || p.shard_count.is_some());
    if in_flight {
        return Err(ReconcileError::RetryAfter {
            reason: "replica configuration change is still pending".to_string(),
            after: cfg.busy_backoff,
        });
    }
    Err(ReconcileError::StuckRollback(
        "per-shard replica configuration was requested but the change was rolled back server-side"
            .to_string(),
    ))
}

fn pending_capacity_class(latest: &ObservedState) -> Option<&str> {
    latest
        .pending
        .as_ref()
        .and_then(|p| p.capacity_class.as_deref())
}

fn class_in(set: &Option<Vec<String>>, class: &str) -> bool {
    set.as_ref()
        .map(|s| s.iter().any(|c| c == class))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::diff;
    use crate::types::{ObservedShard, PendingValues, ShardMember};

    fn cfg() -> ReconcilerConfig {
        ReconcilerConfig::default()
    }

    fn member(id: &str) -> ShardMember {
        ShardMember {
            node_id: Some(id.to_string()),
            role: None,
            availability_zone: None,
        }
    }

    #[test]
    fn test_busy_statuses_retry() {
        let desired = DesiredSpec::default();
        for status in ["creating", "modifying", "deleting"] {
            let latest = ObservedState {
                status: Some(status.to_string().into()),
                ..Default::default()
            };
            let err = check(&desired, &latest, &Delta::new(), &LastRequestedRecord::default(), &cfg())
                .unwrap_err();
            match err {
                ReconcileError::RetryAfter { after, .. } => {
                    assert_eq!(after, cfg().busy_backoff);
                }
                other => panic!("expected RetryAfter, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_available_passes() {
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            ..Default::default()
        };
        assert!(check(
            &DesiredSpec::default(),
            &latest,
            &Delta::new(),
            &LastRequestedRecord::default(),
            &cfg()
        )
        .is_ok());
    }

    #[test]
    fn test_member_count_mismatch_retries() {
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            shards: vec![ObservedShard {
                shard_id: Some("0001".to_string()),
                status: Some("available".to_string()),
                members: vec![member("cache-001"), member("cache-002")],
            }],
            member_clusters: vec!["cache-001".to_string()],
            ..Default::default()
        };
        let err = check(
            &DesiredSpec::default(),
            &latest,
            &Delta::new(),
            &LastRequestedRecord::default(),
            &cfg(),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::RetryAfter { .. }));
    }

    #[test]
    fn test_shard_not_available_retries() {
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            shards: vec![ObservedShard {
                shard_id: Some("0001".to_string()),
                status: Some("modifying".to_string()),
                members: vec![member("cache-001")],
            }],
            member_clusters: vec!["cache-001".to_string()],
            ..Default::default()
        };
        let err = check(
            &DesiredSpec::default(),
            &latest,
            &Delta::new(),
            &LastRequestedRecord::default(),
            &cfg(),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::RetryAfter { .. }));
    }

    #[test]
    fn test_capacity_rollback_is_terminal() {
        let desired = DesiredSpec {
            capacity_class: Some("cache.r6g.large".to_string()),
            ..Default::default()
        };
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            capacity_class: Some("cache.r6g.xlarge".to_string()),
            allowed_scale_up: Some(vec!["cache.r6g.2xlarge".to_string()]),
            ..Default::default()
        };
        let last = LastRequestedRecord {
            capacity_class: Some("cache.r6g.large".to_string()),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        let err = check(&desired, &latest, &delta, &last, &cfg()).unwrap_err();
        assert!(matches!(err, ReconcileError::StuckRollback(_)));
    }

    #[test]
    fn test_capacity_still_allowed_is_not_a_rollback() {
        let desired = DesiredSpec {
            capacity_class: Some("cache.r6g.large".to_string()),
            ..Default::default()
        };
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            capacity_class: Some("cache.r6g.small".to_string()),
            allowed_scale_up: Some(vec!["cache.r6g.large".to_string()]),
            ..Default::default()
        };
        let last = LastRequestedRecord {
            capacity_class: Some("cache.r6g.large".to_string()),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        assert!(check(&desired, &latest, &delta, &last, &cfg()).is_ok());
    }

    #[test]
    fn test_pending_capacity_change_retries() {
        let desired = DesiredSpec {
            capacity_class: Some("cache.r6g.large".to_string()),
            ..Default::default()
        };
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            capacity_class: Some("cache.r6g.small".to_string()),
            pending: Some(PendingValues {
                capacity_class: Some("cache.r6g.large".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let last = LastRequestedRecord {
            capacity_class: Some("cache.r6g.large".to_string()),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        let err = check(&desired, &latest, &delta, &last, &cfg()).unwrap_err();
        assert!(matches!(err, ReconcileError::RetryAfter { .. }));
    }

    #[test]
    fn test_shard_rollback_is_terminal() {
        let desired = DesiredSpec {
            shard_count: Some(4),
            ..Default::default()
        };
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            shard_count: Some(2),
            ..Default::default()
        };
        let last = LastRequestedRecord {
            shard_count: Some(4),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        let err = check(&desired, &latest, &delta, &last, &cfg()).unwrap_err();
        assert!(matches!(err, ReconcileError::StuckRollback(_)));
    }

    #[test]
    fn test_replica_config_rollback_is_terminal() {
        use crate::types::ShardSpec;

        let config = vec![ShardSpec {
            shard_id: Some("0001".to_string()),
            replica_count: Some(2),
            ..Default::default()
        }];
        let desired = DesiredSpec {
            shard_config: Some(config.clone()),
            ..Default::default()
        };
        // One replica observed, two requested, nothing pending.
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            shards: vec![crate::types::ObservedShard {
                shard_id: Some("0001".to_string()),
                status: Some("available".to_string()),
                members: vec![member("cache-001"), member("cache-002")],
            }],
            member_clusters: vec!["cache-001".to_string(), "cache-002".to_string()],
            ..Default::default()
        };
        let last = LastRequestedRecord {
            shard_config: Some(config),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        let err = check(&desired, &latest, &delta, &last, &cfg()).unwrap_err();
        assert!(matches!(err, ReconcileError::StuckRollback(_)));

        // Never requested: the planner gets to issue the change.
        assert!(check(&desired, &latest, &delta, &LastRequestedRecord::default(), &cfg()).is_ok());
    }

    #[test]
    fn test_pending_replica_config_change_retries() {
        use crate::types::{PendingValues, ShardSpec};

        let config = vec![ShardSpec {
            shard_id: Some("0001".to_string()),
            replica_count: Some(2),
            ..Default::default()
        }];
        let desired = DesiredSpec {
            shard_config: Some(config.clone()),
            ..Default::default()
        };
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            shards: vec![crate::types::ObservedShard {
                shard_id: Some("0001".to_string()),
                status: Some("available".to_string()),
                members: vec![member("cache-001"), member("cache-002")],
            }],
            member_clusters: vec!["cache-001".to_string(), "cache-002".to_string()],
            pending: Some(PendingValues {
                num_nodes: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        let last = LastRequestedRecord {
            shard_config: Some(config),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        let err = check(&desired, &latest, &delta, &last, &cfg()).unwrap_err();
        assert!(matches!(err, ReconcileError::RetryAfter { .. }));
    }

    #[test]
    fn test_never_requested_shard_change_passes() {
        let desired = DesiredSpec {
            shard_count: Some(4),
            ..Default::default()
        };
        let latest = ObservedState {
            status: Some("available".to_string().into()),
            shard_count: Some(2),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        assert!(check(&desired, &latest, &delta, &LastRequestedRecord::default(), &cfg()).is_ok());
    }
}
