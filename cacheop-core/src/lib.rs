//! Reconciliation engine for a managed, sharded, replicated cache service.
//!
//! The engine converges an owner-declared [`types::DesiredSpec`] against the
//! [`types::ObservedState`] fetched from a remote control plane, issuing at
//! most one structural mutating call per pass. The remote API surface and
//! the metadata persistence are traits ([`remote::RemoteApi`],
//! [`last_requested::MetadataStore`]); the driver, HTTP client and SQLite
//! store live in the agent crate.

pub mod config;
pub mod delta;
pub mod error;
pub mod filter;
pub mod guard;
pub mod last_requested;
pub mod node_ids;
pub mod planner;
pub mod reconciler;
pub mod remote;
pub mod tags;
pub mod types;
pub mod version;

pub use config::ReconcilerConfig;
pub use delta::{diff, Delta, Difference, Field};
pub use error::{ReconcileError, RemoteError, Result, StoreError};
pub use last_requested::{LastRequestedRecord, LastRequestedStore, MemoryStore, MetadataStore};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use remote::RemoteApi;
