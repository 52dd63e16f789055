//! Node identifier arithmetic for resources that address individual nodes
//! by zero-padded ordinal ("0001", "0002", ...).

use crate::error::ReconcileError;

/// Ordinals to remove when shrinking to `desired` nodes.
///
/// Counts down from `max(latest, pending)`: an in-flight increase not yet
/// reflected in the latest snapshot may have already created higher
/// ordinals, and those must be removed first.
pub fn removal_ids(latest: i64, pending: Option<i64>, desired: i64) -> Vec<String> {
    let top = pending.map_or(latest, |p| p.max(latest));
    if desired >= top {
        return Vec::new();
    }
    (desired + 1..=top)
        .rev()
        .map(|n| format!("{n:04}"))
        .collect()
}

/// Validate the availability-zone list accompanying a node-count increase:
/// its length must equal the number of nodes being added.
pub fn validate_zone_expansion(
    latest: i64,
    desired: i64,
    new_zones: &[String],
) -> Result<(), ReconcileError> {
    let adding = desired - latest;
    if adding > 0 && new_zones.len() as i64 != adding {
        return Err(ReconcileError::InvalidRequest(format!(
            "{} availability zones given for {} new nodes",
            new_zones.len(),
            adding
        )));
    }
    Ok(())
}
