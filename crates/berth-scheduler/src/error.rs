//! Scheduler error types.

use thiserror::Error;

use berth_core::{EngineError, ValidationError};
use berth_placement::PlacementError;
use berth_state::StateError;

/// Errors raised while running a container on a chosen host.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The image could not be made available on the host: the pull failed,
    /// or creation still reported it missing after one pull.
    #[error("pulling image {image}: {source}")]
    ImagePull { image: String, source: EngineError },

    #[error("invalid image reference {0:?}")]
    InvalidImage(String),

    /// The container exists on the host but start or inspect failed, so it
    /// may be running without a reservation.
    #[error("container {container_id} created but not confirmed: {source}")]
    AfterCreate {
        container_id: String,
        source: EngineError,
    },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl ExecutorError {
    /// Id of a container left on the host by the failed run, if any.
    pub fn container_id(&self) -> Option<&str> {
        match self {
            ExecutorError::AfterCreate { container_id, .. } => Some(container_id),
            _ => None,
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no scheduler registered for workload type {0}")]
    NoSchedulerForType(String),

    #[error("scheduler already registered for workload type {0}")]
    SchedulerExists(String),

    #[error("unable to schedule: {0}")]
    UnableToSchedule(String),

    /// A runtime or registry query failed while narrowing candidates.
    #[error("querying host {host_id}: {reason}")]
    FilterIo { host_id: String, reason: String },

    #[error("image pull failed for {image}: {reason}")]
    ImagePull { image: String, reason: String },

    /// `container_id` is set when a container was created before the
    /// failure; the caller owns cleaning it up.
    #[error("executor failed on host {host_id}: {source}")]
    Executor {
        host_id: String,
        container_id: Option<String>,
        source: ExecutorError,
    },

    /// The container is running but its reservation was not recorded.
    #[error("committing reservation for container {container_id} on host {host_id}: {source}")]
    ReservationCommit {
        host_id: String,
        container_id: String,
        source: StateError,
    },

    /// The capacity re-check at commit time refused the reservation. The
    /// container is running and must be stopped or rescheduled by the caller.
    #[error("host {host_id} would be overcommitted by container {container_id}")]
    Overcommitted {
        host_id: String,
        container_id: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),

    #[error("registry error: {0}")]
    Registry(#[from] StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl From<PlacementError> for SchedulerError {
    fn from(err: PlacementError) -> Self {
        match err {
            PlacementError::UnableToSchedule(reason) => SchedulerError::UnableToSchedule(reason),
            PlacementError::Filter {
                filter,
                host_id,
                source,
            } => SchedulerError::FilterIo {
                host_id,
                reason: format!("{filter} filter: {source}"),
            },
            PlacementError::Reservation { host_id, source } => SchedulerError::FilterIo {
                host_id,
                reason: format!("reading reservation: {source}"),
            },
        }
    }
}

impl SchedulerError {
    /// Map an executor failure on `host_id`, keeping pull failures distinct.
    pub(crate) fn from_executor(host_id: &str, err: ExecutorError) -> Self {
        match err {
            ExecutorError::ImagePull { image, source } => SchedulerError::ImagePull {
                image,
                reason: source.to_string(),
            },
            other => SchedulerError::Executor {
                host_id: host_id.to_string(),
                container_id: other.container_id().map(str::to_string),
                source: other,
            },
        }
    }
}
