//! Per-cache reconcile driver.
//!
//! Reads the desired-state manifest, runs one reconcile worker per cache
//! identity (single writer per identity, parallel across identities up to
//! the worker limit) and prunes caches that disappeared from the manifest.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use cacheop_core::types::DesiredSpec;
use cacheop_core::{diff, ReconcileError, ReconcileOutcome, Reconciler};

/// How often a worker follows a retry-after signal before giving up until
/// the next pass.
const MAX_RETRIES_PER_PASS: u32 = 5;

/// Desired-state manifest: the full set of caches this agent owns.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    pub caches: Vec<DesiredSpec>,
}

impl Manifest {
    pub async fn load(path: &str) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading manifest {path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing manifest {path}"))
    }
}

/// Audit trail of reconcile decisions, emitted as structured log events.
pub struct AuditLogger;

impl AuditLogger {
    pub fn created(&self, cache_id: &str) {
        info!(target: "audit", cache_id, "Cache created");
    }

    pub fn in_sync(&self, cache_id: &str) {
        info!(target: "audit", cache_id, "Cache in sync");
    }

    pub fn action_issued(&self, cache_id: &str) {
        info!(target: "audit", cache_id, "Mutating action issued");
    }

    pub fn retrying(&self, cache_id: &str, reason: &str, after: Duration) {
        info!(target: "audit", cache_id, reason, ?after, "Reconcile deferred");
    }

    pub fn terminal(&self, cache_id: &str, reason: &str) {
        error!(target: "audit", cache_id, reason, "Reconcile failed terminally");
    }

    pub fn pruned(&self, cache_id: &str) {
        info!(target: "audit", cache_id, "Cache removed from manifest, deleted");
    }
}

pub struct Driver {
    reconciler: Arc<Reconciler>,
    workers: Arc<Semaphore>,
    audit: Arc<AuditLogger>,
    /// Cache ids seen in the previous manifest, for pruning.
    known: HashSet<String>,
}

impl Driver {
    pub fn new(reconciler: Arc<Reconciler>, max_workers: usize) -> Self {
        Self {
            reconciler,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            audit: Arc::new(AuditLogger),
            known: HashSet::new(),
        }
    }

    pub async fn run_pass(&mut self, manifest: &Manifest) -> Result<()> {
        let current: HashSet<String> = manifest
            .caches
            .iter()
            .filter_map(|s| s.cache_id.clone())
            .collect();

        let mut handles = Vec::new();
        for spec in unique_by_id(&manifest.caches) {
            let Some(id) = spec.cache_id.clone() else {
                warn!("Skipping manifest entry without a cache id");
                continue;
            };
            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .context("acquiring worker permit")?;
            let reconciler = Arc::clone(&self.reconciler);
            let audit = Arc::clone(&self.audit);
            let spec = spec.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = reconcile_one(&reconciler, &audit, &spec).await {
                    error!("Reconcile failed for {}: {:#}", id, e);
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        // Caches that vanished from the manifest get deleted remotely.
        let gone: Vec<String> = self.known.difference(&current).cloned().collect();
        for id in gone {
            let spec = DesiredSpec {
                cache_id: Some(id.clone()),
                ..Default::default()
            };
            match self.reconciler.delete(&spec).await {
                Ok(()) => self.audit.pruned(&id),
                Err(e) => error!("Failed to delete {}: {}", id, e),
            }
        }
        self.known = current;
        Ok(())
    }
}

/// Keep only the first manifest entry per cache id. A second worker for
/// the same identity would break the single-writer rule.
fn unique_by_id(specs: &[DesiredSpec]) -> Vec<&DesiredSpec> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .filter(|spec| match spec.cache_id.as_deref() {
            Some(id) => {
                if seen.insert(id.to_string()) {
                    true
                } else {
                    warn!("Duplicate manifest entry for {}, skipping", id);
                    false
                }
            }
            None => true,
        })
        .collect()
}

/// Drive one cache to convergence within this pass, following retry-after
/// signals up to a bounded number of times.
async fn reconcile_one(
    reconciler: &Reconciler,
    audit: &AuditLogger,
    spec: &DesiredSpec,
) -> Result<()> {
    let id = spec.cache_id.as_deref().unwrap_or_default();

    for attempt in 0..=MAX_RETRIES_PER_PASS {
        let latest = match reconciler.read_one(spec).await {
            Ok(latest) => latest,
            Err(ReconcileError::NotFound(_)) => {
                reconciler.create(spec).await?;
                audit.created(id);
                return Ok(());
            }
            Err(ReconcileError::RetryAfter { reason, after }) => {
                audit.retrying(id, &reason, after);
                if attempt == MAX_RETRIES_PER_PASS {
                    break;
                }
                tokio::time::sleep(after).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = reconciler
            .update(spec, &latest, diff(spec, &latest))
            .await?;
        match outcome {
            ReconcileOutcome::NoChangeNeeded => {
                audit.in_sync(id);
                return Ok(());
            }
            ReconcileOutcome::ActionIssued(_) => {
                audit.action_issued(id);
                return Ok(());
            }
            ReconcileOutcome::RetryAfter { reason, after } => {
                audit.retrying(id, &reason, after);
                if attempt == MAX_RETRIES_PER_PASS {
                    break;
                }
                tokio::time::sleep(after).await;
            }
            ReconcileOutcome::TerminalError(reason) => {
                audit.terminal(id, &reason);
                return Ok(());
            }
        }
    }

    warn!("Giving up on {} until the next pass", id);
    Ok(())
}
