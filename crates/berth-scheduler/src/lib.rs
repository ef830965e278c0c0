//! berth-scheduler: running containers where the placement layer says.
//!
//! The [`ClusterManager`] maps each workload type to a
//! [`SchedulerChain`](berth_placement::SchedulerChain), drives one
//! transaction per request, starts the container through an [`Executor`],
//! and commits the host reservation. The [`Reconciler`] repairs the
//! reservation ledger from what the runtimes actually run.
//!
//! # Architecture
//!
//! ```text
//! ClusterManager
//!   ├── Registry (hosts, reservation ledger)
//!   ├── workload type → SchedulerChain (filters + scorer)
//!   └── Executor (create / pull / start / inspect)
//!
//! Reconciler
//!   ├── Registry (reset drifted reservations)
//!   └── EngineClient (list running containers)
//! ```

pub mod error;
pub mod executor;
pub mod manager;
pub mod reconcile;

pub use error::{ExecutorError, ExecutorResult, SchedulerError, SchedulerResult};
pub use executor::{EngineExecutor, Executor};
pub use manager::ClusterManager;
pub use reconcile::{HostOutcome, HostReport, ReconcileReport, Reconciler};
