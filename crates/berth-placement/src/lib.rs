//! berth-placement: deciding which host runs a container.
//!
//! This crate makes placement decisions only. It never starts containers
//! or writes the reservation ledger (that's `berth-scheduler`). A
//! [`SchedulerChain`] narrows a [`Transaction`]'s candidate hosts through
//! its filters, then ranks the survivors with the resource scorer.
//!
//! # Components
//!
//! - **`filter`**: Label, image-presence, and uniqueness filters
//! - **`scorer`**: Post-placement utilization scoring (best-fit)
//! - **`chain`**: Ordered filters plus the scorer, bound to a workload type
//! - **`transaction`**: One placement attempt and its state machine

pub mod chain;
pub mod error;
pub mod filter;
pub mod scorer;
pub mod transaction;

pub use chain::SchedulerChain;
pub use error::{PlacementError, PlacementResult};
pub use filter::{Filter, ImageFilter, LabelFilter, UniqueFilter, build_filter};
pub use scorer::{HostScore, MAX_SCORE, rank_hosts, score, score_host};
pub use transaction::{Transaction, TransactionState};
