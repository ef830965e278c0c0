//! In-memory [`EngineClient`] used for tests and dry runs.
//!
//! Keeps per-host image caches and containers behind a single mutex. Hosts
//! are created on first use. Images can only be pulled once they have been
//! published with [`MemoryEngine::publish_image`].

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::engine::{
    ContainerDetails, ContainerSummary, CreateContainer, EngineClient, EngineError, EngineResult,
    ImageSummary, StartOptions,
};
use crate::image::ImageRef;
use crate::types::{Host, HostId, PortBinding, Protocol};

/// First host port handed out for dynamically published ports.
const EPHEMERAL_PORT_START: u16 = 32768;

#[derive(Debug, Default)]
pub struct MemoryEngine {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    hosts: HashMap<HostId, HostRuntime>,
    /// Images available to pull, normalized.
    published: HashSet<String>,
    next_id: u64,
    next_port: u16,
    pulls: u32,
    create_attempts: u32,
    /// When set, pulls report success without caching anything.
    pulls_ineffective: bool,
    /// When set, inspecting a container fails after it has started.
    inspect_fails: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            hosts: HashMap::new(),
            published: HashSet::new(),
            next_id: 1,
            next_port: EPHEMERAL_PORT_START,
            pulls: 0,
            create_attempts: 0,
            pulls_ineffective: false,
            inspect_fails: false,
        }
    }
}

#[derive(Debug, Default)]
struct HostRuntime {
    images: HashSet<String>,
    containers: Vec<MemoryContainer>,
    unreachable: bool,
}

#[derive(Debug)]
struct MemoryContainer {
    summary: ContainerSummary,
    exposed: Vec<(Protocol, u16)>,
    bindings: Vec<PortBinding>,
    ip_address: String,
    running: bool,
}

impl Inner {
    fn host_mut(&mut self, host: &Host) -> EngineResult<&mut HostRuntime> {
        let runtime = self.hosts.entry(host.id.clone()).or_default();
        if runtime.unreachable {
            return Err(EngineError::Unreachable {
                host: host.id.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(runtime)
    }

    fn allocate_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
        port
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put an image into a host's local cache.
    pub fn cache_image(&self, host_id: &str, image: &str) {
        let mut inner = self.lock();
        inner
            .hosts
            .entry(host_id.to_string())
            .or_default()
            .images
            .insert(ImageRef::normalize(image));
    }

    /// Make an image pullable from the (simulated) image registry.
    pub fn publish_image(&self, image: &str) {
        self.lock().published.insert(ImageRef::normalize(image));
    }

    pub fn set_unreachable(&self, host_id: &str, unreachable: bool) {
        let mut inner = self.lock();
        inner.hosts.entry(host_id.to_string()).or_default().unreachable = unreachable;
    }

    pub fn set_pulls_ineffective(&self, ineffective: bool) {
        self.lock().pulls_ineffective = ineffective;
    }

    pub fn set_inspect_fails(&self, fails: bool) {
        self.lock().inspect_fails = fails;
    }

    /// Seed a running container directly, bypassing create/start.
    pub fn run_container(
        &self,
        host_id: &str,
        name: &str,
        image: &str,
        cpu_shares: u64,
        memory_bytes: u64,
    ) -> String {
        let mut inner = self.lock();
        let id = format!("c{:012x}", inner.next_id);
        inner.next_id += 1;
        let runtime = inner.hosts.entry(host_id.to_string()).or_default();
        let ip_address = format!("172.17.0.{}", runtime.containers.len() + 2);
        runtime.containers.push(MemoryContainer {
            summary: ContainerSummary {
                id: id.clone(),
                name: name.to_string(),
                image: ImageRef::normalize(image),
                cpu_shares,
                memory_bytes,
            },
            exposed: Vec::new(),
            bindings: Vec::new(),
            ip_address,
            running: true,
        });
        id
    }

    /// Running containers on a host.
    pub fn containers(&self, host_id: &str) -> Vec<ContainerSummary> {
        self.lock()
            .hosts
            .get(host_id)
            .map(|h| {
                h.containers
                    .iter()
                    .filter(|c| c.running)
                    .map(|c| c.summary.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn pull_count(&self) -> u32 {
        self.lock().pulls
    }

    pub fn create_attempts(&self) -> u32 {
        self.lock().create_attempts
    }
}

#[async_trait]
impl EngineClient for MemoryEngine {
    async fn list_images(&self, host: &Host) -> EngineResult<Vec<ImageSummary>> {
        let mut inner = self.lock();
        let runtime = inner.host_mut(host)?;
        let mut tags: Vec<&String> = runtime.images.iter().collect();
        tags.sort();
        Ok(tags
            .into_iter()
            .enumerate()
            .map(|(i, tag)| ImageSummary {
                id: format!("sha256:{i:064x}"),
                repo_tags: vec![tag.clone()],
            })
            .collect())
    }

    async fn list_containers(&self, host: &Host) -> EngineResult<Vec<ContainerSummary>> {
        let mut inner = self.lock();
        let runtime = inner.host_mut(host)?;
        Ok(runtime
            .containers
            .iter()
            .filter(|c| c.running)
            .map(|c| c.summary.clone())
            .collect())
    }

    async fn create_container(&self, host: &Host, spec: &CreateContainer) -> EngineResult<String> {
        let mut inner = self.lock();
        inner.create_attempts += 1;
        let id = format!("c{:012x}", inner.next_id);
        let runtime = inner.host_mut(host)?;

        let image = spec.image.to_string();
        if !runtime.images.contains(&image) {
            return Err(EngineError::ImageNotFound(image));
        }

        let ip_address = format!("172.17.0.{}", runtime.containers.len() + 2);
        runtime.containers.push(MemoryContainer {
            summary: ContainerSummary {
                id: id.clone(),
                name: spec.name.clone(),
                image,
                cpu_shares: spec.cpu_shares,
                memory_bytes: spec.memory_bytes,
            },
            exposed: spec.exposed_ports.clone(),
            bindings: Vec::new(),
            ip_address,
            running: false,
        });
        inner.next_id += 1;
        debug!(host = %host.id, container = %id, "memory engine created container");
        Ok(id)
    }

    async fn start_container(
        &self,
        host: &Host,
        container_id: &str,
        options: &StartOptions,
    ) -> EngineResult<()> {
        let mut inner = self.lock();
        let exposed = {
            let runtime = inner.host_mut(host)?;
            let container = runtime
                .containers
                .iter()
                .find(|c| c.summary.id == container_id)
                .ok_or_else(|| EngineError::ContainerNotFound(container_id.to_string()))?;
            container.exposed.clone()
        };

        let mut bindings = Vec::new();
        if !options.port_bindings.is_empty() {
            for binding in &options.port_bindings {
                let host_port = match binding.host_port {
                    Some(port) => port,
                    None => inner.allocate_port(),
                };
                bindings.push(PortBinding {
                    protocol: binding.protocol,
                    container_port: binding.container_port,
                    host_port: Some(host_port),
                });
            }
        } else if options.publish_all_ports {
            for (protocol, container_port) in exposed {
                let host_port = inner.allocate_port();
                bindings.push(PortBinding {
                    protocol,
                    container_port,
                    host_port: Some(host_port),
                });
            }
        }

        let runtime = inner.host_mut(host)?;
        if let Some(container) = runtime
            .containers
            .iter_mut()
            .find(|c| c.summary.id == container_id)
        {
            container.bindings = bindings;
            container.running = true;
        }
        Ok(())
    }

    async fn inspect_container(
        &self,
        host: &Host,
        container_id: &str,
    ) -> EngineResult<ContainerDetails> {
        let mut inner = self.lock();
        if inner.inspect_fails {
            return Err(EngineError::Request(format!(
                "inspect {container_id}: connection reset"
            )));
        }
        let runtime = inner.host_mut(host)?;
        let container = runtime
            .containers
            .iter()
            .find(|c| c.summary.id == container_id)
            .ok_or_else(|| EngineError::ContainerNotFound(container_id.to_string()))?;
        Ok(ContainerDetails {
            id: container.summary.id.clone(),
            ip_address: Some(container.ip_address.clone()),
            ports: container.bindings.clone(),
        })
    }

    async fn pull_image(&self, host: &Host, image: &ImageRef) -> EngineResult<()> {
        let mut inner = self.lock();
        inner.pulls += 1;
        let name = image.to_string();
        if !inner.published.contains(&name) {
            return Err(EngineError::Request(format!(
                "pull access denied for {name}"
            )));
        }
        let ineffective = inner.pulls_ineffective;
        let runtime = inner.host_mut(host)?;
        if !ineffective {
            runtime.images.insert(name);
        }
        Ok(())
    }
}
