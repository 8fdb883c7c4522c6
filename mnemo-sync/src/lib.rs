//! Mnemo Sync - Offline-First Repository
//!
//! The single entry point through which the presentation layer reads and
//! writes vocabulary entries and knowledge points:
//!
//! - [`Repository`]: read-through and write-through over the memory and
//!   disk tiers from `mnemo-storage`, degrading to stale data when the
//!   remote source is unreachable
//! - [`merge`]: field-level reconciliation of server and device records
//! - [`BatchCoordinator`]: bounded concurrent fan-out with per-item outcomes
//! - [`RemoteSource`] and [`AuthProvider`]: the collaborators a host app
//!   implements

pub mod auth;
pub mod batch;
pub mod merge;
pub mod remote;
pub mod repository;
pub mod telemetry;

pub use auth::{AuthProvider, Credential};
pub use batch::{BatchCoordinator, BatchEntry, BatchOutcome};
pub use merge::{merge, reconcile, MergeOptions, MergedCollection, MergedEntry, Origin};
pub use remote::{RemoteResult, RemoteSource};
pub use repository::{Fetched, Freshness, Overlay, PendingChange, ReadSource, Repository};
pub use telemetry::{init_tracing, LogConfig};
