//! Action selection.
//!
//! Given a filtered delta, pick exactly one mutating action for this pass.
//! The ordering is load-bearing: failover and multi-AZ disables must land
//! before any capacity change, replica changes before reshards, and a
//! capacity change the remote currently permits goes ahead of a reshard so
//! both cannot be requested in one pass.

use std::collections::BTreeMap;

use crate::delta::{Delta, Field};
use crate::error::ReconcileError;
use crate::node_ids;
use crate::remote::{ReplicaCountRequest, ReshardRequest, ShardReplicaTarget, ShardZoneHint};
use crate::types::{DesiredSpec, ObservedState};

/// The single action selected for one reconcile pass.
///
/// Modify carries no payload: the field set is assembled at execution time
/// from the delta, after a fresh representative-node snapshot settles the
/// security-group comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    None,
    /// Turn automatic failover off ahead of any other change.
    DisableAutomaticFailover,
    /// Turn multi-AZ off ahead of any other change.
    DisableMultiAz,
    IncreaseReplicas(ReplicaCountRequest),
    DecreaseReplicas(ReplicaCountRequest),
    Reshard(ReshardRequest),
    /// Generic field modify covering everything the delta still holds.
    Modify,
}

pub fn plan(
    desired: &DesiredSpec,
    latest: &ObservedState,
    delta: &Delta,
) -> Result<Plan, ReconcileError> {
    if delta.contains(Field::AutomaticFailover)
        && desired.automatic_failover_enabled == Some(false)
    {
        return Ok(Plan::DisableAutomaticFailover);
    }

    if delta.contains(Field::MultiAz) && desired.multi_az_enabled == Some(false) {
        return Ok(Plan::DisableMultiAz);
    }

    if let Some(change) = replica_change(desired, latest)? {
        return Ok(change);
    }

    // A permitted capacity change goes first; the shard-count change waits
    // for the next pass. Requesting both at once is not supported remotely.
    if delta.contains(Field::CapacityClass) && capacity_change_permitted(desired, latest) {
        return Ok(Plan::Modify);
    }

    if shard_count_differs(desired, latest) {
        return Ok(Plan::Reshard(reshard_request(desired, latest)?));
    }

    if delta.is_empty() {
        Ok(Plan::None)
    } else {
        Ok(Plan::Modify)
    }
}

/// True when the remote's advertised scale sets permit moving to the
/// desired class, or when no sets were advertised at all.
fn capacity_change_permitted(desired: &DesiredSpec, latest: &ObservedState) -> bool {
    let Some(class) = &desired.capacity_class else {
        return false;
    };
    let in_set = |set: &Option<Vec<String>>| {
        set.as_ref()
            .is_some_and(|s| s.iter().any(|c| c == class))
    };
    if latest.allowed_scale_up.is_none() && latest.allowed_scale_down.is_none() {
        return true;
    }
    in_set(&latest.allowed_scale_up) || in_set(&latest.allowed_scale_down)
}

fn shard_count_differs(desired: &DesiredSpec, latest: &ObservedState) -> bool {
    match (desired.desired_shard_count(), latest.observed_shard_count()) {
        (Some(d), Some(l)) => d != l,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Detect a replica-count mismatch and build the change request.
///
/// Targets come from the per-shard configuration when present, otherwise
/// from the uniform replica count. Shards absent from the latest snapshot
/// are omitted; the reshard path creates them.
fn replica_change(
    desired: &DesiredSpec,
    latest: &ObservedState,
) -> Result<Option<Plan>, ReconcileError> {
    let Some(cache_id) = desired.cache_id.clone() else {
        return Ok(None);
    };
    if latest.shards.is_empty() {
        return Ok(None);
    }

    let per_shard: BTreeMap<&str, &crate::types::ShardSpec> = desired
        .shard_config
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter_map(|s| s.shard_id.as_deref().map(|id| (id, s)))
        .collect();

    let mut targets = Vec::new();
    let mut desired_total = 0i64;
    let mut observed_total = 0i64;

    for shard in &latest.shards {
        let Some(shard_id) = shard.shard_id.as_deref() else {
            continue;
        };
        let spec = per_shard.get(shard_id);
        let target = spec
            .and_then(|s| s.replica_count)
            .or(desired.replicas_per_shard);
        let Some(target) = target else {
            continue;
        };
        desired_total += target;
        observed_total += shard.replica_count();
        targets.push(ShardReplicaTarget {
            shard_id: shard_id.to_string(),
            target_replica_count: target,
            primary_availability_zone: spec.and_then(|s| s.primary_availability_zone.clone()),
            replica_availability_zones: spec.and_then(|s| s.replica_availability_zones.clone()),
        });
    }

    let increase = if desired_total != observed_total {
        desired_total > observed_total
    } else {
        // Equal totals can still be a per-shard redistribution; follow the
        // sign of the first shard that differs.
        let first_mismatch = latest.shards.iter().find_map(|shard| {
            let id = shard.shard_id.as_deref()?;
            let target = targets.iter().find(|t| t.shard_id == id)?;
            if target.target_replica_count == shard.replica_count() {
                None
            } else {
                Some(target.target_replica_count > shard.replica_count())
            }
        });
        match first_mismatch {
            Some(up) => up,
            None => return Ok(None),
        }
    };

    let mut req = ReplicaCountRequest {
        cache_id,
        replicas_per_shard: if per_shard.is_empty() {
            desired.replicas_per_shard
        } else {
            None
        },
        shard_targets: targets,
        node_ids_to_remove: Vec::new(),
    };

    if increase {
        // The zone list covering the new replicas must match the number of
        // nodes being added.
        for target in &req.shard_targets {
            let Some(zones) = &target.replica_availability_zones else {
                continue;
            };
            let Some(shard) = latest
                .shards
                .iter()
                .find(|s| s.shard_id.as_deref() == Some(target.shard_id.as_str()))
            else {
                continue;
            };
            let existing = (shard.replica_count() as usize).min(zones.len());
            node_ids::validate_zone_expansion(
                shard.replica_count(),
                target.target_replica_count,
                &zones[existing..],
            )?;
        }
        Ok(Some(Plan::IncreaseReplicas(req)))
    } else {
        // Single-shard topologies address their nodes by ordinal; pick the
        // removal ids counting down, past any in-flight increase.
        if latest.shards.len() == 1 {
            let members = latest.shards[0].members.len() as i64;
            let pending = latest.pending.as_ref().and_then(|p| p.num_nodes);
            if let Some(target) = req.shard_targets.first() {
                req.node_ids_to_remove =
                    node_ids::removal_ids(members, pending, target.target_replica_count + 1);
            }
        }
        Ok(Some(Plan::DecreaseReplicas(req)))
    }
}

/// Build the reshard payload. A decrease carries an explicit retain list;
/// an increase carries best-effort zone hints for the new shards.
fn reshard_request(
    desired: &DesiredSpec,
    latest: &ObservedState,
) -> Result<ReshardRequest, ReconcileError> {
    let cache_id = desired
        .cache_id
        .clone()
        .ok_or_else(|| ReconcileError::InvalidRequest("missing cache id".to_string()))?;
    let target = desired
        .desired_shard_count()
        .ok_or_else(|| ReconcileError::InvalidRequest("missing shard count".to_string()))?;
    if target < 1 {
        return Err(ReconcileError::InvalidRequest(format!(
            "cannot reshard to {target} shards, at least one must remain"
        )));
    }
    let observed = latest.observed_shard_count().unwrap_or(0);

    let mut req = ReshardRequest {
        cache_id,
        target_shard_count: target,
        ..Default::default()
    };

    if target < observed {
        req.retain_shards = retain_list(desired, target)?;
    } else if let Some(config) = &desired.shard_config {
        req.zone_hints = config
            .iter()
            .skip(observed as usize)
            .map(|s| ShardZoneHint {
                primary_availability_zone: s.primary_availability_zone.clone(),
                replica_availability_zones: s.replica_availability_zones.clone(),
            })
            .collect();
    }

    Ok(req)
}

/// Shard identifiers to keep on a shrink: the explicitly configured ids
/// when present, otherwise the first `target` ordinals.
fn retain_list(desired: &DesiredSpec, target: i64) -> Result<Vec<String>, ReconcileError> {
    let retained: Vec<String> = match &desired.shard_config {
        Some(config) => config
            .iter()
            .take(target as usize)
            .filter_map(|s| s.shard_id.clone())
            .collect(),
        None => (1..=target).map(|n| format!("{n:04}")).collect(),
    };
    if retained.is_empty() {
        return Err(ReconcileError::InvalidRequest(
            "shard shrink computed an empty retain list".to_string(),
        ));
    }
    Ok(retained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::diff;
    use crate::types::{ObservedShard, ShardMember, ShardSpec};

    fn shard(id: &str, members: usize) -> ObservedShard {
        ObservedShard {
            shard_id: Some(id.to_string()),
            status: Some("available".to_string()),
            members: (0..members)
                .map(|n| ShardMember {
                    node_id: Some(format!("cache-{id}-{n:03}")),
                    role: Some(if n == 0 { "primary" } else { "replica" }.to_string()),
                    availability_zone: None,
                })
                .collect(),
        }
    }

    fn base_desired() -> DesiredSpec {
        DesiredSpec {
            cache_id: Some("orders".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_replica_change_beats_reshard() {
        let desired = DesiredSpec {
            replicas_per_shard: Some(2),
            shard_count: Some(3),
            ..base_desired()
        };
        // Two shards with one replica each: both replica and shard count
        // differ, only the replica change may run this pass.
        let latest = ObservedState {
            shards: vec![shard("0001", 2), shard("0002", 2)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        match plan(&desired, &latest, &delta).unwrap() {
            Plan::IncreaseReplicas(req) => {
                assert_eq!(req.shard_targets.len(), 2);
                assert!(req.shard_targets.iter().all(|t| t.target_replica_count == 2));
            }
            other => panic!("expected IncreaseReplicas, got {other:?}"),
        }
    }

    #[test]
    fn test_replica_decrease() {
        let desired = DesiredSpec {
            replicas_per_shard: Some(0),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 3)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        assert!(matches!(
            plan(&desired, &latest, &delta).unwrap(),
            Plan::DecreaseReplicas(_)
        ));
    }

    #[test]
    fn test_equal_total_redistribution_follows_first_differing_shard() {
        let desired = DesiredSpec {
            shard_config: Some(vec![
                ShardSpec {
                    shard_id: Some("0001".to_string()),
                    replica_count: Some(1),
                    ..Default::default()
                },
                ShardSpec {
                    shard_id: Some("0002".to_string()),
                    replica_count: Some(2),
                    ..Default::default()
                },
            ]),
            ..base_desired()
        };
        // Shard 0001 shrinks by one while 0002 grows by one; the first
        // differing shard decides the call direction.
        let latest = ObservedState {
            shards: vec![shard("0001", 3), shard("0002", 2)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        assert!(matches!(
            plan(&desired, &latest, &delta).unwrap(),
            Plan::DecreaseReplicas(_)
        ));
    }

    #[test]
    fn test_per_shard_targets_omit_unknown_shards() {
        let desired = DesiredSpec {
            shard_config: Some(vec![
                ShardSpec {
                    shard_id: Some("0001".to_string()),
                    replica_count: Some(2),
                    ..Default::default()
                },
                ShardSpec {
                    shard_id: Some("0009".to_string()),
                    replica_count: Some(2),
                    ..Default::default()
                },
            ]),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 2)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        match plan(&desired, &latest, &delta).unwrap() {
            Plan::IncreaseReplicas(req) => {
                assert_eq!(req.shard_targets.len(), 1);
                assert_eq!(req.shard_targets[0].shard_id, "0001");
            }
            other => panic!("expected IncreaseReplicas, got {other:?}"),
        }
    }

    #[test]
    fn test_single_shard_decrease_carries_removal_ordinals() {
        let desired = DesiredSpec {
            replicas_per_shard: Some(1),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 3)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        match plan(&desired, &latest, &delta).unwrap() {
            Plan::DecreaseReplicas(req) => {
                assert_eq!(req.node_ids_to_remove, vec!["0003"]);
            }
            other => panic!("expected DecreaseReplicas, got {other:?}"),
        }
    }

    #[test]
    fn test_decrease_counts_past_inflight_increase() {
        let desired = DesiredSpec {
            replicas_per_shard: Some(2),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 5)],
            pending: Some(crate::types::PendingValues {
                num_nodes: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        match plan(&desired, &latest, &delta).unwrap() {
            Plan::DecreaseReplicas(req) => {
                assert_eq!(
                    req.node_ids_to_remove,
                    vec!["0007", "0006", "0005", "0004"]
                );
            }
            other => panic!("expected DecreaseReplicas, got {other:?}"),
        }
    }

    #[test]
    fn test_increase_rejects_short_zone_list() {
        let desired = DesiredSpec {
            shard_config: Some(vec![ShardSpec {
                shard_id: Some("0001".to_string()),
                replica_count: Some(3),
                replica_availability_zones: Some(vec!["zone-a".to_string()]),
                ..Default::default()
            }]),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 2)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        let err = plan(&desired, &latest, &delta).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidRequest(_)));
    }

    #[test]
    fn test_failover_disable_goes_first() {
        let desired = DesiredSpec {
            automatic_failover_enabled: Some(false),
            replicas_per_shard: Some(2),
            ..base_desired()
        };
        let latest = ObservedState {
            automatic_failover: Some("enabled".to_string()),
            shards: vec![shard("0001", 2)],
            ..Default::default()
        };
        let mut delta = diff(&desired, &latest);
        crate::filter::filter(
            &mut delta,
            &desired,
            &latest,
            &crate::last_requested::LastRequestedRecord::default(),
        );
        assert_eq!(
            plan(&desired, &latest, &delta).unwrap(),
            Plan::DisableAutomaticFailover
        );
    }

    #[test]
    fn test_permitted_capacity_change_defers_reshard() {
        let desired = DesiredSpec {
            capacity_class: Some("cache.r6g.large".to_string()),
            shard_count: Some(4),
            ..base_desired()
        };
        let latest = ObservedState {
            capacity_class: Some("cache.r6g.small".to_string()),
            shard_count: Some(2),
            allowed_scale_up: Some(vec!["cache.r6g.large".to_string()]),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        assert_eq!(plan(&desired, &latest, &delta).unwrap(), Plan::Modify);
    }

    #[test]
    fn test_unpermitted_capacity_change_yields_reshard() {
        let desired = DesiredSpec {
            capacity_class: Some("cache.r6g.large".to_string()),
            shard_count: Some(4),
            ..base_desired()
        };
        let latest = ObservedState {
            capacity_class: Some("cache.r6g.small".to_string()),
            shard_count: Some(2),
            allowed_scale_up: Some(vec![]),
            allowed_scale_down: Some(vec![]),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        assert!(matches!(
            plan(&desired, &latest, &delta).unwrap(),
            Plan::Reshard(_)
        ));
    }

    #[test]
    fn test_shrink_default_retain_list() {
        let desired = DesiredSpec {
            shard_count: Some(2),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 1), shard("0002", 1), shard("0003", 1)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        match plan(&desired, &latest, &delta).unwrap() {
            Plan::Reshard(req) => {
                assert_eq!(req.target_shard_count, 2);
                assert_eq!(req.retain_shards, vec!["0001", "0002"]);
            }
            other => panic!("expected Reshard, got {other:?}"),
        }
    }

    #[test]
    fn test_shrink_to_zero_is_invalid() {
        let desired = DesiredSpec {
            shard_count: Some(0),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 1), shard("0002", 1)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        let err = plan(&desired, &latest, &delta).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidRequest(_)));
    }

    #[test]
    fn test_grow_carries_zone_hints() {
        let desired = DesiredSpec {
            shard_config: Some(vec![
                ShardSpec {
                    shard_id: Some("0001".to_string()),
                    primary_availability_zone: Some("zone-a".to_string()),
                    ..Default::default()
                },
                ShardSpec {
                    shard_id: Some("0002".to_string()),
                    primary_availability_zone: Some("zone-b".to_string()),
                    replica_availability_zones: Some(vec!["zone-c".to_string()]),
                    ..Default::default()
                },
            ]),
            ..base_desired()
        };
        let latest = ObservedState {
            shards: vec![shard("0001", 1)],
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        match plan(&desired, &latest, &delta).unwrap() {
            Plan::Reshard(req) => {
                assert_eq!(req.target_shard_count, 2);
                assert!(req.retain_shards.is_empty());
                assert_eq!(req.zone_hints.len(), 1);
                assert_eq!(
                    req.zone_hints[0].primary_availability_zone.as_deref(),
                    Some("zone-b")
                );
            }
            other => panic!("expected Reshard, got {other:?}"),
        }
    }

    #[test]
    fn test_clean_delta_plans_nothing() {
        let desired = base_desired();
        let latest = ObservedState {
            cache_id: Some("orders".to_string()),
            ..Default::default()
        };
        let delta = diff(&desired, &latest);
        assert_eq!(plan(&desired, &latest, &delta).unwrap(), Plan::None);
    }
}
