//! Placement error types.

use thiserror::Error;

use berth_core::EngineError;
use berth_state::StateError;

pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors that end a placement attempt.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// No candidate survived filtering and scoring.
    #[error("unable to schedule: {0}")]
    UnableToSchedule(String),

    /// A filter could not query a candidate host. The whole attempt is
    /// aborted; the host is treated as indeterminate, not accepted.
    #[error("filter {filter} failed on host {host_id}: {source}")]
    Filter {
        filter: &'static str,
        host_id: String,
        source: EngineError,
    },

    #[error("reading reservation for host {host_id}: {source}")]
    Reservation {
        host_id: String,
        source: StateError,
    },
}
