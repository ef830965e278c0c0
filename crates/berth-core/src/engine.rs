//! Container runtime client contract.
//!
//! Every call names the [`Host`] whose runtime it targets. Implementations
//! own connection handling; the scheduler only sees these operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::ImageRef;
use crate::types::{Host, PortBinding, Protocol};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The runtime has no local copy of the image. Distinguishable so the
    /// executor can pull and retry.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("engine {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("engine request failed: {0}")]
    Request(String),
}

/// An image cached on a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

/// A running container as reported by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub cpu_shares: u64,
    pub memory_bytes: u64,
}

/// Everything the runtime needs to create a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateContainer {
    pub name: String,
    pub image: ImageRef,
    pub cpu_shares: u64,
    pub memory_bytes: u64,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub exposed_ports: Vec<(Protocol, u16)>,
}

/// Host-side options applied when starting a container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StartOptions {
    pub port_bindings: Vec<PortBinding>,
    pub publish_all_ports: bool,
}

/// Runtime view of a started container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerDetails {
    pub id: String,
    pub ip_address: Option<String>,
    pub ports: Vec<PortBinding>,
}

/// Query and control surface of a host's container runtime.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn list_images(&self, host: &Host) -> EngineResult<Vec<ImageSummary>>;

    async fn list_containers(&self, host: &Host) -> EngineResult<Vec<ContainerSummary>>;

    /// Create a container and return its id. Fails with
    /// [`EngineError::ImageNotFound`] when the image is not cached.
    async fn create_container(&self, host: &Host, spec: &CreateContainer) -> EngineResult<String>;

    async fn start_container(
        &self,
        host: &Host,
        container_id: &str,
        options: &StartOptions,
    ) -> EngineResult<()>;

    async fn inspect_container(&self, host: &Host, container_id: &str)
    -> EngineResult<ContainerDetails>;

    async fn pull_image(&self, host: &Host, image: &ImageRef) -> EngineResult<()>;
}
