//! berth-state: the registry behind Berth's scheduling decisions.
//!
//! Backed by [redb](https://docs.rs/redb), the [`StateStore`] persists fleet
//! membership and the per-host reservation ledger. Both survive a restart
//! of the cluster manager.
//!
//! # Architecture
//!
//! Hosts are JSON-serialized into a `&str → &[u8]` table keyed by host id.
//! Reservations live in a second table under the same key. Every ledger
//! mutation (place, release, reset) reads, checks, and writes inside one
//! redb write transaction, so a commit is never partially visible and
//! concurrent commits are serialized by redb's single writer.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements the [`Registry`] contract the scheduler consumes.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use registry::Registry;
pub use store::StateStore;
