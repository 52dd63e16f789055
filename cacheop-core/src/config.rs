//! Reconciler configuration.

use std::time::Duration;

/// Tunable behavior for the reconciler. Backoff durations are fixed and
/// trigger-specific; the core performs no internal retry loop, no backoff
/// growth and no jitter - re-invocation is the external driver's job.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay before re-attempting while the resource is mid-transition
    /// (creating, modifying, deleting).
    pub busy_backoff: Duration,
    /// Delay before re-attempting while shards or member clusters have not
    /// settled into an available state.
    pub not_ready_backoff: Duration,
    /// Delay after a tag mutation, which briefly takes the resource out of
    /// the available state server-side.
    pub tag_settle_backoff: Duration,
    /// How many recent service events to attach to an observed snapshot.
    pub max_events: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            busy_backoff: Duration::from_secs(30),
            not_ready_backoff: Duration::from_secs(30),
            tag_settle_backoff: Duration::from_secs(10),
            max_events: 20,
        }
    }
}
