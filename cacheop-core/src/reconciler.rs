//! Top-level reconciler.
//!
//! Composes the pipeline: diff comes in from the driver, gets filtered
//! against the last-requested record, gated on lifecycle status, and turned
//! into at most one structural mutating call per pass. Tag changes settle
//! out of band and do not count as the structural action.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ReconcilerConfig;
use crate::delta::{Delta, Field};
use crate::error::{ReconcileError, RemoteError, Result};
use crate::filter;
use crate::guard;
use crate::last_requested::{LastRequestedRecord, LastRequestedStore};
use crate::planner::{plan, Plan};
use crate::remote::{ModifyRequest, RemoteApi, ReplicaCountRequest};
use crate::tags;
use crate::types::{DesiredSpec, LifecycleStatus, ObservedState, ShardSpec};

/// What one reconcile pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Desired and observed state already agree.
    NoChangeNeeded,
    /// One mutating call was issued; carries the merged observed state.
    ActionIssued(ObservedState),
    /// The pass could not proceed; re-invoke after the given delay.
    RetryAfter { reason: String, after: Duration },
    /// Non-retryable condition needing human attention.
    TerminalError(String),
}

pub struct Reconciler {
    remote: Arc<dyn RemoteApi>,
    store: LastRequestedStore,
    cfg: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        store: LastRequestedStore,
        cfg: ReconcilerConfig,
    ) -> Self {
        Self { remote, store, cfg }
    }

    fn id<'a>(&self, desired: &'a DesiredSpec) -> Result<&'a str> {
        desired
            .cache_id
            .as_deref()
            .ok_or_else(|| ReconcileError::InvalidRequest("missing cache id".to_string()))
    }

    fn remote_err(&self, err: RemoteError) -> ReconcileError {
        ReconcileError::from_remote(err, self.cfg.busy_backoff)
    }

    /// Create the cache and seed the last-requested record with the fields
    /// the create call sent.
    pub async fn create(&self, desired: &DesiredSpec) -> Result<ObservedState> {
        let id = self.id(desired)?;
        let out = self
            .remote
            .create(desired)
            .await
            .map_err(|e| self.remote_err(e))?;

        let record = LastRequestedRecord {
            capacity_class: desired.capacity_class.clone(),
            shard_count: desired.desired_shard_count(),
            shard_config: desired.shard_config.clone(),
            log_delivery: desired.log_delivery.clone(),
            availability_zones: zones_from_config(desired),
            ..Default::default()
        };
        self.store.save(id, &record).await?;
        info!("Created cache {}", id);
        Ok(out)
    }

    /// Fetch and enrich the observed state: topology back-population, a
    /// representative-node snapshot for fields the aggregate describe call
    /// omits, permitted capacity moves, recent service events and tags.
    pub async fn read_one(&self, desired: &DesiredSpec) -> Result<ObservedState> {
        let id = self.id(desired)?;
        let mut latest = self
            .remote
            .describe(id)
            .await
            .map_err(|e| self.remote_err(e))?;

        backfill_topology(&mut latest);
        self.backfill_from_node(&mut latest).await?;

        let settled = latest.has_status(&LifecycleStatus::Available)
            || latest.has_status(&LifecycleStatus::Snapshotting);
        if settled {
            let allowed = self
                .remote
                .list_allowed_capacity_changes(id)
                .await
                .map_err(|e| self.remote_err(e))?;
            latest.allowed_scale_up = Some(allowed.scale_up);
            latest.allowed_scale_down = Some(allowed.scale_down);
        }

        latest.events = self
            .remote
            .list_events(id, self.cfg.max_events)
            .await
            .map_err(|e| self.remote_err(e))?;
        latest.tags = Some(
            self.remote
                .list_tags(id)
                .await
                .map_err(|e| self.remote_err(e))?,
        );

        Ok(latest)
    }

    /// Run one reconcile pass over a raw delta computed by the driver.
    pub async fn update(
        &self,
        desired: &DesiredSpec,
        latest: &ObservedState,
        mut delta: Delta,
    ) -> Result<ReconcileOutcome> {
        let id = self.id(desired)?;
        let record = self.store.load(id).await?;
        filter::filter(&mut delta, desired, latest, &record);

        if let Some(outcome) = self.sync_tags(id, desired, latest).await? {
            return Ok(outcome);
        }

        if let Err(e) = guard::check(desired, latest, &delta, &record, &self.cfg) {
            return match e {
                ReconcileError::RetryAfter { reason, after } => {
                    debug!("Cache {} not ready: {}", id, reason);
                    Ok(ReconcileOutcome::RetryAfter { reason, after })
                }
                ReconcileError::StuckRollback(reason) => {
                    Ok(ReconcileOutcome::TerminalError(reason))
                }
                other => Err(other),
            };
        }

        let action = plan(desired, latest, &delta)?;
        self.execute(id, desired, latest, &delta, record, action).await
    }

    pub async fn delete(&self, desired: &DesiredSpec) -> Result<()> {
        let id = self.id(desired)?;
        match self.remote.delete(id).await {
            Ok(()) => {
                info!("Deleted cache {}", id);
                Ok(())
            }
            // Already gone; deletion is idempotent.
            Err(RemoteError::NotFound(_)) => Ok(()),
            Err(e) => Err(self.remote_err(e)),
        }
    }

    /// Issue the batched tag add and remove calls when the tag sets differ.
    /// Tag mutations briefly take the resource out of the available state,
    /// so a structural change waits for the next pass.
    async fn sync_tags(
        &self,
        id: &str,
        desired: &DesiredSpec,
        latest: &ObservedState,
    ) -> Result<Option<ReconcileOutcome>> {
        let Some(want) = &desired.tags else {
            return Ok(None);
        };
        let have = latest.tags.as_deref().unwrap_or(&[]);
        let plan = tags::plan_sync(want, have);
        if plan.is_empty() {
            return Ok(None);
        }
        if !plan.to_add.is_empty() {
            self.remote
                .add_tags(id, &plan.to_add)
                .await
                .map_err(|e| self.remote_err(e))?;
        }
        if !plan.to_remove.is_empty() {
            self.remote
                .remove_tags(id, &plan.to_remove)
                .await
                .map_err(|e| self.remote_err(e))?;
        }
        info!(
            "Synced tags on {}: {} added, {} removed",
            id,
            plan.to_add.len(),
            plan.to_remove.len()
        );
        Ok(Some(ReconcileOutcome::RetryAfter {
            reason: "tags updated, waiting for them to settle".to_string(),
            after: self.cfg.tag_settle_backoff,
        }))
    }

    async fn execute(
        &self,
        id: &str,
        desired: &DesiredSpec,
        latest: &ObservedState,
        delta: &Delta,
        mut record: LastRequestedRecord,
        action: Plan,
    ) -> Result<ReconcileOutcome> {
        let out = match action {
            Plan::None => return Ok(ReconcileOutcome::NoChangeNeeded),

            Plan::DisableAutomaticFailover => {
                let req = ModifyRequest {
                    automatic_failover_enabled: Some(false),
                    ..ModifyRequest::new(id)
                };
                info!("Disabling automatic failover on {}", id);
                self.remote
                    .modify(&req)
                    .await
                    .map_err(|e| self.remote_err(e))?
            }

            Plan::DisableMultiAz => {
                let req = ModifyRequest {
                    multi_az_enabled: Some(false),
                    ..ModifyRequest::new(id)
                };
                info!("Disabling multi-AZ on {}", id);
                self.remote
                    .modify(&req)
                    .await
                    .map_err(|e| self.remote_err(e))?
            }

            Plan::IncreaseReplicas(req) => {
                info!("Increasing replica count on {}", id);
                let out = self
                    .remote
                    .increase_replica_count(&req)
                    .await
                    .map_err(|e| self.remote_err(e))?;
                self.save_replica_record(id, desired, &req, &mut record)
                    .await?;
                out
            }

            Plan::DecreaseReplicas(req) => {
                info!("Decreasing replica count on {}", id);
                let out = self
                    .remote
                    .decrease_replica_count(&req)
                    .await
                    .map_err(|e| self.remote_err(e))?;
                self.save_replica_record(id, desired, &req, &mut record)
                    .await?;
                out
            }

            Plan::Reshard(req) => {
                info!(
                    "Resharding {} to {} shards",
                    id, req.target_shard_count
                );
                let out = self
                    .remote
                    .reshard(&req)
                    .await
                    .map_err(|e| self.remote_err(e))?;
                record.shard_count = Some(req.target_shard_count);
                record.shard_config = desired.shard_config.clone();
                self.store.save(id, &record).await?;
                out
            }

            Plan::Modify => {
                let req = self.build_modify(id, desired, latest, delta).await?;
                if req.is_empty() {
                    return Ok(ReconcileOutcome::NoChangeNeeded);
                }
                info!("Modifying {}", id);
                let out = self
                    .remote
                    .modify(&req)
                    .await
                    .map_err(|e| self.remote_err(e))?;
                if req.capacity_class.is_some() || req.log_delivery.is_some() {
                    if req.capacity_class.is_some() {
                        record.capacity_class = req.capacity_class.clone();
                    }
                    if req.log_delivery.is_some() {
                        record.log_delivery = req.log_delivery.clone();
                    }
                    self.store.save(id, &record).await?;
                }
                merge_modify_output(out, &req)
            }
        };
        Ok(ReconcileOutcome::ActionIssued(out))
    }

    async fn save_replica_record(
        &self,
        id: &str,
        desired: &DesiredSpec,
        req: &ReplicaCountRequest,
        record: &mut LastRequestedRecord,
    ) -> Result<()> {
        record.shard_config = desired.shard_config.clone();
        record.availability_zones = zones_from_targets(req);
        self.store.save(id, record).await?;
        Ok(())
    }

    /// Assemble the generic modify payload from whatever the delta still
    /// holds. Security-group drift is settled against a fresh
    /// representative-node snapshot first, since the aggregate describe
    /// output can lag behind a recent change.
    async fn build_modify(
        &self,
        id: &str,
        desired: &DesiredSpec,
        latest: &ObservedState,
        delta: &Delta,
    ) -> Result<ModifyRequest> {
        let mut req = ModifyRequest::new(id);

        if delta.contains(Field::Description) {
            req.description = desired.description.clone();
        }
        if delta.contains(Field::Engine) {
            req.engine = desired.engine.clone();
        }
        if delta.contains(Field::EngineVersion) {
            req.engine_version = desired.engine_version.clone();
        }
        if delta.contains(Field::CapacityClass) {
            req.capacity_class = desired.capacity_class.clone();
        }
        if delta.contains(Field::ParameterGroup) {
            req.parameter_group_name = desired.parameter_group_name.clone();
        }
        if delta.contains(Field::PreferredMaintenanceWindow) {
            req.preferred_maintenance_window = desired.preferred_maintenance_window.clone();
        }
        if delta.contains(Field::SnapshotWindow) {
            req.snapshot_window = desired.snapshot_window.clone();
        }
        if delta.contains(Field::PrimaryClusterId) {
            req.primary_cluster_id = desired.primary_cluster_id.clone();
        }
        if delta.contains(Field::MultiAz) {
            req.multi_az_enabled = desired.multi_az_enabled;
        }
        if delta.contains(Field::AutomaticFailover) {
            req.automatic_failover_enabled = desired.automatic_failover_enabled;
        }
        if delta.contains(Field::LogDelivery) {
            req.log_delivery = desired.log_delivery.clone();
        }
        if delta.contains(Field::SecurityGroupIds) {
            if let Some(want) = &desired.security_group_ids {
                let drifted = match latest.representative_node_id() {
                    Some(node) => {
                        let snap = self
                            .remote
                            .describe_node(node)
                            .await
                            .map_err(|e| self.remote_err(e))?;
                        !same_string_set(want, &snap.security_group_ids)
                    }
                    None => true,
                };
                if drifted {
                    req.security_group_ids = Some(want.clone());
                }
            }
        }

        Ok(req)
    }
}

/// Keep the requested values for fields the modify response echoes stale:
/// the capacity class and log delivery apply asynchronously and the
/// response may still carry the old configuration.
fn merge_modify_output(mut out: ObservedState, req: &ModifyRequest) -> ObservedState {
    if req.capacity_class.is_some() {
        out.capacity_class = req.capacity_class.clone();
    }
    if req.log_delivery.is_some() {
        out.log_delivery = req.log_delivery.clone();
    }
    out
}

/// Derive the observed spec fields the describe output leaves implicit in
/// the shard structures: shard count, a uniform replica count when all
/// shards agree, and per-shard configuration with member zone placement.
fn backfill_topology(latest: &mut ObservedState) {
    if latest.shards.is_empty() {
        return;
    }
    latest.shard_count = Some(latest.shards.len() as i64);

    let counts: Vec<i64> = latest.shards.iter().map(|s| s.replica_count()).collect();
    if counts.windows(2).all(|w| w[0] == w[1]) {
        latest.replicas_per_shard = counts.first().copied();
    }

    if latest.shard_config.is_none() {
        latest.shard_config = Some(
            latest
                .shards
                .iter()
                .map(|s| {
                    let replica_zones: Vec<String> = s
                        .members
                        .iter()
                        .filter(|m| m.role.as_deref() == Some("replica"))
                        .filter_map(|m| m.availability_zone.clone())
                        .collect();
                    ShardSpec {
                        shard_id: s.shard_id.clone(),
                        replica_count: Some(s.replica_count()),
                        primary_availability_zone: s
                            .members
                            .iter()
                            .find(|m| m.role.as_deref() == Some("primary"))
                            .and_then(|m| m.availability_zone.clone()),
                        replica_availability_zones: if replica_zones.is_empty() {
                            None
                        } else {
                            Some(replica_zones)
                        },
                    }
                })
                .collect(),
        );
    }
}

impl Reconciler {
    /// Fill fields the aggregate describe call omits from a member-node
    /// snapshot. A missing node is tolerated; membership may be churning.
    async fn backfill_from_node(&self, latest: &mut ObservedState) -> Result<()> {
        let needs_backfill = latest.security_group_ids.is_none()
            || latest.parameter_group_name.is_none()
            || latest.preferred_maintenance_window.is_none()
            || latest.engine_version.is_none();
        if !needs_backfill {
            return Ok(());
        }
        let Some(node) = latest.representative_node_id().map(str::to_string) else {
            return Ok(());
        };
        let snap = match self.remote.describe_node(&node).await {
            Ok(snap) => snap,
            Err(RemoteError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(self.remote_err(e)),
        };
        if latest.security_group_ids.is_none() && !snap.security_group_ids.is_empty() {
            latest.security_group_ids = Some(snap.security_group_ids);
        }
        if latest.parameter_group_name.is_none() {
            latest.parameter_group_name = snap.parameter_group_name;
        }
        if latest.preferred_maintenance_window.is_none() {
            latest.preferred_maintenance_window = snap.preferred_maintenance_window;
        }
        if latest.engine_version.is_none() {
            latest.engine_version = snap.engine_version;
        }
        Ok(())
    }
}

fn same_string_set(a: &[String], b: &[String]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

fn zones_from_config(desired: &DesiredSpec) -> Option<Vec<String>> {
    let config = desired.shard_config.as_ref()?;
    let zones: Vec<String> = config
        .iter()
        .flat_map(|s| {
            s.primary_availability_zone
                .clone()
                .into_iter()
                .chain(s.replica_availability_zones.clone().unwrap_or_default())
        })
        .collect();
    if zones.is_empty() {
        None
    } else {
        Some(zones)
    }
}

fn zones_from_targets(req: &ReplicaCountRequest) -> Option<Vec<String>> {
    let zones: Vec<String> = req
        .shard_targets
        .iter()
        .flat_map(|t| {
            t.primary_availability_zone
                .clone()
                .into_iter()
                .chain(t.replica_availability_zones.clone().unwrap_or_default())
        })
        .collect();
    if zones.is_empty() {
        None
    } else {
        Some(zones)
    }
}
