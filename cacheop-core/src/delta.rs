//! Pure desired/observed diffing.
//!
//! The diff is driven by a declarative comparator table: one row per field,
//! each with a desired-side extractor, a latest-side extractor and a
//! field-specific equality function. Fields are identified by a typed enum
//! so the planner can match on them exhaustively.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::{DesiredSpec, ObservedState};

/// Typed identifier for every diffable field of the cache spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Description,
    Engine,
    EngineVersion,
    CapacityClass,
    ShardCount,
    ShardConfig,
    ReplicasPerShard,
    AutomaticFailover,
    MultiAz,
    PreferredMaintenanceWindow,
    SnapshotWindow,
    SecurityGroupIds,
    ParameterGroup,
    LogDelivery,
    PrimaryClusterId,
    Tags,
}

/// One field-level disagreement between desired and latest state.
#[derive(Debug, Clone, PartialEq)]
pub struct Difference {
    pub field: Field,
    pub desired: Option<Value>,
    pub latest: Option<Value>,
}

/// Ordered collection of differences for one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    differences: Vec<Difference>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.differences.iter().any(|d| d.field == field)
    }

    pub fn get(&self, field: Field) -> Option<&Difference> {
        self.differences.iter().find(|d| d.field == field)
    }

    /// Append a difference, replacing any existing one for the same field.
    pub fn add(&mut self, field: Field, desired: Option<Value>, latest: Option<Value>) {
        self.remove(field);
        self.differences.push(Difference {
            field,
            desired,
            latest,
        });
    }

    pub fn remove(&mut self, field: Field) {
        self.differences.retain(|d| d.field != field);
    }

    pub fn retain(&mut self, f: impl FnMut(&Difference) -> bool) {
        self.differences.retain(f);
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.differences.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Difference> {
        self.differences.iter()
    }
}

struct Comparator {
    field: Field,
    desired: fn(&DesiredSpec) -> Option<Value>,
    latest: fn(&ObservedState) -> Option<Value>,
    equal: fn(&Value, &Value) -> bool,
}

fn json<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

fn eq_value(a: &Value, b: &Value) -> bool {
    a == b
}

/// String collections that are sets in meaning: compare sorted.
fn eq_string_set(a: &Value, b: &Value) -> bool {
    let collect = |v: &Value| -> Option<Vec<String>> {
        let arr = v.as_array()?;
        let mut out: Vec<String> = arr
            .iter()
            .filter_map(|e| e.as_str().map(str::to_string))
            .collect();
        out.sort();
        Some(out)
    };
    match (collect(a), collect(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Tag lists compare as unordered key/value sets.
fn eq_tag_set(a: &Value, b: &Value) -> bool {
    let collect = |v: &Value| -> Option<BTreeMap<String, String>> {
        let arr = v.as_array()?;
        let mut out = BTreeMap::new();
        for e in arr {
            let key = e.get("key")?.as_str()?.to_string();
            let value = e.get("value")?.as_str()?.to_string();
            out.insert(key, value);
        }
        Some(out)
    };
    match (collect(a), collect(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn comparators() -> &'static [Comparator] {
    &[
        Comparator {
            field: Field::Description,
            desired: |d| d.description.as_ref().map(json),
            latest: |l| l.description.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::Engine,
            desired: |d| d.engine.as_ref().map(json),
            latest: |l| l.engine.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::EngineVersion,
            desired: |d| d.engine_version.as_ref().map(json),
            latest: |l| l.engine_version.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::CapacityClass,
            desired: |d| d.capacity_class.as_ref().map(json),
            latest: |l| l.capacity_class.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::ShardCount,
            desired: |d| d.desired_shard_count().map(|c| json(&c)),
            latest: |l| l.observed_shard_count().map(|c| json(&c)),
            equal: eq_value,
        },
        Comparator {
            field: Field::ShardConfig,
            desired: |d| d.shard_config.as_ref().map(json),
            latest: |l| l.shard_config.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::ReplicasPerShard,
            desired: |d| d.replicas_per_shard.map(|c| json(&c)),
            latest: |l| l.replicas_per_shard.map(|c| json(&c)),
            equal: eq_value,
        },
        Comparator {
            field: Field::PreferredMaintenanceWindow,
            desired: |d| d.preferred_maintenance_window.as_ref().map(json),
            latest: |l| l.preferred_maintenance_window.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::SnapshotWindow,
            desired: |d| d.snapshot_window.as_ref().map(json),
            latest: |l| l.snapshot_window.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::SecurityGroupIds,
            desired: |d| d.security_group_ids.as_ref().map(json),
            latest: |l| l.security_group_ids.as_ref().map(json),
            equal: eq_string_set,
        },
        Comparator {
            field: Field::ParameterGroup,
            desired: |d| d.parameter_group_name.as_ref().map(json),
            latest: |l| l.parameter_group_name.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::LogDelivery,
            desired: |d| d.log_delivery.as_ref().map(json),
            latest: |l| l.log_delivery.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::PrimaryClusterId,
            desired: |d| d.primary_cluster_id.as_ref().map(json),
            latest: |l| l.primary_cluster_id.as_ref().map(json),
            equal: eq_value,
        },
        Comparator {
            field: Field::Tags,
            desired: |d| d.tags.as_ref().map(json),
            latest: |l| l.tags.as_ref().map(json),
            equal: eq_tag_set,
        },
    ]
}

/// Compute the raw delta between a desired spec and the latest observed
/// state. Pure; no side effects. Nil vs non-nil counts as different.
pub fn diff(desired: &DesiredSpec, latest: &ObservedState) -> Delta {
    let mut delta = Delta::new();
    for cmp in comparators() {
        let d = (cmp.desired)(desired);
        let l = (cmp.latest)(latest);
        match (&d, &l) {
            (None, None) => {}
            (Some(a), Some(b)) if (cmp.equal)(a, b) => {}
            _ => delta.add(cmp.field, d, l),
        }
    }
    delta
}
