//! Engine executor: turns a placement decision into a running container.
//!
//! The executor translates the request into runtime terms (CPU shares
//! relative to the host, memory in bytes, port bindings), creates and starts
//! the container, and reads back where it can be reached. A missing image
//! is pulled once; creation is retried at most once after that.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use berth_core::{
    ContainerRequest, CreateContainer, EngineClient, EngineError, Host, ImageRef, Placement,
    StartOptions,
};

use crate::error::{ExecutorError, ExecutorResult};

/// Bytes per megabyte as the runtime counts memory.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Creation attempts before a missing image is reported as a pull failure.
const MAX_CREATE_ATTEMPTS: u32 = 2;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Start `request` on `host` and report where it landed.
    async fn run(&self, host: &Host, request: &ContainerRequest) -> ExecutorResult<Placement>;
}

/// Creation parameters for `request` on `host`.
pub fn create_spec(host: &Host, request: &ContainerRequest) -> ExecutorResult<CreateContainer> {
    let image = ImageRef::parse(&request.image)
        .map_err(|_| ExecutorError::InvalidImage(request.image.clone()))?;

    Ok(CreateContainer {
        name: request.name.clone(),
        image,
        cpu_shares: host.cpu_shares(request.cpus),
        memory_bytes: request.memory_mb.saturating_mul(BYTES_PER_MB),
        env: request.env_pairs(),
        exposed_ports: request
            .ports
            .iter()
            .map(|p| (p.protocol, p.container_port))
            .collect(),
    })
}

/// Start options: bind exactly the requested ports, or publish every
/// exposed port when none were requested.
pub fn start_options(request: &ContainerRequest) -> StartOptions {
    if request.ports.is_empty() {
        StartOptions {
            port_bindings: Vec::new(),
            publish_all_ports: true,
        }
    } else {
        StartOptions {
            port_bindings: request.ports.clone(),
            publish_all_ports: false,
        }
    }
}

/// [`Executor`] that drives a host's container runtime.
pub struct EngineExecutor {
    engine: Arc<dyn EngineClient>,
}

impl EngineExecutor {
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        Self { engine }
    }

    async fn create(&self, host: &Host, spec: &CreateContainer) -> ExecutorResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.engine.create_container(host, spec).await {
                Ok(id) => return Ok(id),
                Err(EngineError::ImageNotFound(image)) if attempt < MAX_CREATE_ATTEMPTS => {
                    info!(host = %host.id, %image, "image missing, pulling");
                    self.engine.pull_image(host, &spec.image).await.map_err(|source| {
                        ExecutorError::ImagePull {
                            image: spec.image.to_string(),
                            source,
                        }
                    })?;
                }
                Err(source @ EngineError::ImageNotFound(_)) => {
                    warn!(host = %host.id, image = %spec.image, "image still missing after pull");
                    return Err(ExecutorError::ImagePull {
                        image: spec.image.to_string(),
                        source,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Executor for EngineExecutor {
    async fn run(&self, host: &Host, request: &ContainerRequest) -> ExecutorResult<Placement> {
        let spec = create_spec(host, request)?;
        let container_id = self.create(host, &spec).await?;

        let started = self
            .engine
            .start_container(host, &container_id, &start_options(request))
            .await;
        let details = match started {
            Ok(()) => self.engine.inspect_container(host, &container_id).await,
            Err(e) => Err(e),
        };
        let details = details.map_err(|source| {
            warn!(
                host = %host.id,
                container = %container_id,
                error = %source,
                "container created but not confirmed running"
            );
            ExecutorError::AfterCreate {
                container_id: container_id.clone(),
                source,
            }
        })?;

        debug!(
            host = %host.id,
            container = %container_id,
            cpu_shares = spec.cpu_shares,
            "container started"
        );

        Ok(Placement {
            host: host.clone(),
            container_id,
            internal_ip: details.ip_address,
            ports: details.ports,
        })
    }
}
