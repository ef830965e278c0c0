//! Canonical scheduling types shared by every Berth crate.
//!
//! There is exactly one host shape ([`Host`]) and one request shape
//! ([`ContainerRequest`]). Filters, the scorer, the registry, and the
//! executor all operate on these.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::ImageRef;

/// Unique identifier for a host in the fleet.
pub type HostId = String;

/// Workload type that selects a scheduler chain ("service", "batch", ...).
pub type WorkloadType = String;

/// Milli-CPUs per CPU unit in the reservation ledger.
pub const MILLICPUS_PER_CPU: f64 = 1000.0;

/// CPU shares granted to a container that asks for the whole host.
///
/// The runtime only sees shares, so every CPU amount that reaches the
/// ledger is first rounded to this grid.
pub const CPU_SHARE_SCALE: f64 = 100.0;

// ── Host ───────────────────────────────────────────────────────────

/// A machine capable of running containers.
///
/// Capacity is fixed when the host is registered and never changes over
/// the host's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: HostId,
    /// Address of the host's container runtime (e.g. `tcp://10.0.0.4:2375`).
    pub addr: String,
    /// Total CPU units.
    pub cpus: f64,
    /// Total memory in MB.
    pub memory_mb: u64,
    /// Free-form labels matched verbatim against request constraints.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Host {
    pub fn new(id: &str, addr: &str, cpus: f64, memory_mb: u64) -> Self {
        Self {
            id: id.to_string(),
            addr: addr.to_string(),
            cpus,
            memory_mb,
            labels: Vec::new(),
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Total CPU capacity expressed in ledger milli-CPUs.
    pub fn capacity_millicpus(&self) -> u64 {
        cpus_to_millicpus(self.cpus)
    }

    /// CPU shares for `cpus` on this host, proportional to its capacity.
    ///
    /// Never returns zero, so the runtime does not fall back to its default.
    pub fn cpu_shares(&self, cpus: f64) -> u64 {
        if self.cpus <= 0.0 || !cpus.is_finite() {
            return 1;
        }
        ((cpus / self.cpus * CPU_SHARE_SCALE).round() as u64).max(1)
    }

    /// Milli-CPUs that `shares` actually grant on this host.
    pub fn shares_to_millicpus(&self, shares: u64) -> u64 {
        cpus_to_millicpus(shares as f64 / CPU_SHARE_SCALE * self.cpus)
    }
}

// ── Ports ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// A container port and the host port it is published on.
///
/// In a request, `host_port: None` lets the runtime choose. In a
/// [`Placement`] every binding is resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PortBinding {
    #[serde(default)]
    pub protocol: Protocol,
    pub container_port: u16,
    pub host_port: Option<u16>,
}

impl PortBinding {
    pub fn tcp(container_port: u16, host_port: Option<u16>) -> Self {
        Self {
            protocol: Protocol::Tcp,
            container_port,
            host_port,
        }
    }
}

// ── Requests ───────────────────────────────────────────────────────

/// A request to run one container somewhere in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerRequest {
    pub name: String,
    /// Runtime image reference; an untagged reference means `:latest`.
    pub image: String,
    pub cpus: f64,
    pub memory_mb: u64,
    /// Every label must be present on the chosen host.
    #[serde(default)]
    pub labels: Vec<String>,
    pub workload_type: WorkloadType,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Explicit bindings. Empty means "publish all exposed ports".
    #[serde(default)]
    pub ports: Vec<PortBinding>,
}

impl ContainerRequest {
    pub fn new(name: &str, image: &str, workload_type: &str, cpus: f64, memory_mb: u64) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            cpus,
            memory_mb,
            labels: Vec::new(),
            workload_type: workload_type.to_string(),
            env: HashMap::new(),
            ports: Vec::new(),
        }
    }

    /// Check that the request is complete enough to schedule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.cpus.is_finite() || self.cpus <= 0.0 {
            return Err(ValidationError::Cpus(self.cpus));
        }
        if self.memory_mb == 0 {
            return Err(ValidationError::Memory);
        }
        if self.millicpus() == 0 {
            return Err(ValidationError::CpusBelowResolution(self.cpus));
        }
        if self.image.trim().is_empty() {
            return Err(ValidationError::MissingImage);
        }
        if ImageRef::parse(&self.image).is_err() {
            return Err(ValidationError::Image(self.image.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.workload_type.trim().is_empty() {
            return Err(ValidationError::MissingWorkloadType);
        }
        Ok(())
    }

    /// Requested CPU expressed in ledger milli-CPUs.
    pub fn millicpus(&self) -> u64 {
        cpus_to_millicpus(self.cpus)
    }

    /// Environment flattened to `KEY=value` pairs, sorted by key.
    pub fn env_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        pairs
    }
}

/// Reasons a [`ContainerRequest`] cannot be scheduled at all.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("container cpus must be a positive number, got {0}")]
    Cpus(f64),
    #[error("container cannot have memory equal to 0")]
    Memory,
    #[error("container cpus {0} round to zero milli-CPUs")]
    CpusBelowResolution(f64),
    #[error("container must have an image")]
    MissingImage,
    #[error("invalid image reference {0:?}")]
    Image(String),
    #[error("container must have a name")]
    MissingName,
    #[error("container must have a workload type")]
    MissingWorkloadType,
}

// ── Reservations ───────────────────────────────────────────────────

/// Capacity committed to placed containers on one host.
///
/// CPU is kept in integer milli-CPUs so a place followed by a release
/// restores the counters exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Reservation {
    pub millicpus: u64,
    pub memory_mb: u64,
}

impl Reservation {
    pub fn new(millicpus: u64, memory_mb: u64) -> Self {
        Self {
            millicpus,
            memory_mb,
        }
    }

    /// The delta a single request adds, before it is bound to a host.
    pub fn for_request(request: &ContainerRequest) -> Self {
        Self {
            millicpus: request.millicpus(),
            memory_mb: request.memory_mb,
        }
    }

    /// The delta a request adds to `host`: CPU rounded to the share grid
    /// the runtime enforces, so the ledger never holds less than the
    /// container is granted.
    pub fn on_host(host: &Host, request: &ContainerRequest) -> Self {
        Self {
            millicpus: host.shares_to_millicpus(host.cpu_shares(request.cpus)),
            memory_mb: request.memory_mb,
        }
    }

    pub fn cpus(&self) -> f64 {
        self.millicpus as f64 / MILLICPUS_PER_CPU
    }

    pub fn saturating_add(self, other: Reservation) -> Self {
        Self {
            millicpus: self.millicpus.saturating_add(other.millicpus),
            memory_mb: self.memory_mb.saturating_add(other.memory_mb),
        }
    }

    pub fn saturating_sub(self, other: Reservation) -> Self {
        Self {
            millicpus: self.millicpus.saturating_sub(other.millicpus),
            memory_mb: self.memory_mb.saturating_sub(other.memory_mb),
        }
    }

    /// Whether this reservation stays within the host's capacity.
    pub fn fits(&self, host: &Host) -> bool {
        self.millicpus <= host.capacity_millicpus() && self.memory_mb <= host.memory_mb
    }
}

/// Convert CPU units to milli-CPUs, rounding to the nearest milli-CPU.
pub fn cpus_to_millicpus(cpus: f64) -> u64 {
    if !cpus.is_finite() || cpus <= 0.0 {
        return 0;
    }
    (cpus * MILLICPUS_PER_CPU).round() as u64
}

// ── Placement ──────────────────────────────────────────────────────

/// Where a container ended up and how it can be reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Placement {
    pub host: Host,
    pub container_id: String,
    /// IP of the container on the host's internal network, if reported.
    pub internal_ip: Option<String>,
    /// Bindings as resolved by the runtime after start.
    pub ports: Vec<PortBinding>,
}

impl Placement {
    pub fn host_id(&self) -> &str {
        &self.host.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ContainerRequest {
        ContainerRequest::new("redis-1", "redis", "service", 0.5, 256)
    }

    #[test]
    fn valid_request_passes() {
        assert_eq!(request().validate(), Ok(()));
    }

    #[test]
    fn validation_rejects_missing_fields() {
        let mut req = request();
        req.cpus = 0.0;
        assert_eq!(req.validate(), Err(ValidationError::Cpus(0.0)));

        let mut req = request();
        req.memory_mb = 0;
        assert_eq!(req.validate(), Err(ValidationError::Memory));

        let mut req = request();
        req.image = " ".to_string();
        assert_eq!(req.validate(), Err(ValidationError::MissingImage));

        let mut req = request();
        req.name.clear();
        assert_eq!(req.validate(), Err(ValidationError::MissingName));

        let mut req = request();
        req.workload_type.clear();
        assert_eq!(req.validate(), Err(ValidationError::MissingWorkloadType));
    }

    #[test]
    fn validation_rejects_cpus_that_round_to_zero() {
        let mut req = request();
        req.cpus = 0.0004;
        assert_eq!(
            req.validate(),
            Err(ValidationError::CpusBelowResolution(0.0004))
        );

        req.cpus = 0.001;
        assert_eq!(req.validate(), Ok(()));
    }

    #[test]
    fn validation_rejects_unparseable_image() {
        let mut req = request();
        req.image = "redis:".to_string();
        assert_eq!(
            req.validate(),
            Err(ValidationError::Image("redis:".to_string()))
        );
    }

    #[test]
    fn cpu_shares_are_relative_to_host() {
        let host = Host::new("h1", "tcp://10.0.0.1:2375", 2.0, 2048);
        assert_eq!(host.cpu_shares(0.5), 25);
        assert_eq!(host.cpu_shares(2.0), 100);
        assert_eq!(host.cpu_shares(0.001), 1);
        assert_eq!(host.shares_to_millicpus(25), 500);
    }

    #[test]
    fn host_delta_never_undercounts_granted_shares() {
        let host = Host::new("h1", "tcp://10.0.0.1:2375", 1.0, 512);
        let mut req = request();

        // One share is the smallest grant: 1% of the host.
        req.cpus = 0.001;
        assert_eq!(Reservation::on_host(&host, &req).millicpus, 10);

        // Off-grid requests land on the grid the runtime enforces.
        req.cpus = 0.333;
        let delta = Reservation::on_host(&host, &req);
        assert_eq!(delta.millicpus, 330);
        assert_eq!(host.shares_to_millicpus(host.cpu_shares(req.cpus)), 330);
    }

    #[test]
    fn validation_rejects_nan_cpus() {
        let mut req = request();
        req.cpus = f64::NAN;
        assert!(matches!(req.validate(), Err(ValidationError::Cpus(_))));
    }

    #[test]
    fn millicpus_round_to_nearest() {
        assert_eq!(cpus_to_millicpus(0.1), 100);
        assert_eq!(cpus_to_millicpus(1.0), 1000);
        assert_eq!(cpus_to_millicpus(0.0004), 0);
        assert_eq!(cpus_to_millicpus(-1.0), 0);
    }

    #[test]
    fn reservation_add_then_sub_is_exact() {
        let base = Reservation::new(300, 1024);
        let delta = Reservation::for_request(&request());

        let placed = base.saturating_add(delta);
        assert_eq!(placed, Reservation::new(800, 1280));
        assert_eq!(placed.saturating_sub(delta), base);
    }

    #[test]
    fn reservation_sub_saturates_at_zero() {
        let r = Reservation::new(100, 64).saturating_sub(Reservation::new(500, 128));
        assert_eq!(r, Reservation::default());
    }

    #[test]
    fn reservation_fits_host_capacity() {
        let host = Host::new("h1", "tcp://10.0.0.1:2375", 2.0, 2048);
        assert!(Reservation::new(2000, 2048).fits(&host));
        assert!(!Reservation::new(2001, 10).fits(&host));
        assert!(!Reservation::new(10, 2049).fits(&host));
    }

    #[test]
    fn env_pairs_are_sorted() {
        let mut req = request();
        req.env.insert("B".to_string(), "2".to_string());
        req.env.insert("A".to_string(), "1".to_string());
        assert_eq!(req.env_pairs(), vec!["A=1".to_string(), "B=2".to_string()]);
    }

    #[test]
    fn host_labels_match_verbatim() {
        let host = Host::new("h1", "tcp://10.0.0.1:2375", 1.0, 512)
            .with_labels(["hostname:docker.com", "local"]);
        assert!(host.has_label("local"));
        assert!(!host.has_label("hostname"));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{
            "name": "web",
            "image": "nginx:1.25",
            "cpus": 0.25,
            "memory_mb": 128,
            "workload_type": "service"
        }"#;
        let req: ContainerRequest = serde_json::from_str(json).unwrap();
        assert!(req.labels.is_empty());
        assert!(req.ports.is_empty());
        assert!(req.env.is_empty());
        assert_eq!(req.millicpus(), 250);
    }
}
