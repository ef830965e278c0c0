//! Accept/reject filters run by a scheduler chain.
//!
//! A filter looks at one (request, host) pair and either keeps the host in
//! the candidate set or drops it. Filters never add hosts, and the order
//! they run in affects only how much I/O is spent, not the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use berth_core::{ContainerRequest, EngineClient, EngineResult, FilterKind, Host, ImageRef};

#[async_trait]
pub trait Filter: Send + Sync {
    /// Stable name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether `host` may run `request`. An `Err` means the host could not
    /// be queried; the chain aborts instead of guessing.
    async fn accepts(&self, request: &ContainerRequest, host: &Host) -> EngineResult<bool>;
}

/// Build the filter named in configuration.
pub fn build_filter(kind: FilterKind, engine: Arc<dyn EngineClient>) -> Arc<dyn Filter> {
    match kind {
        FilterKind::Label => Arc::new(LabelFilter),
        FilterKind::Image => Arc::new(ImageFilter::new(engine)),
        FilterKind::Unique => Arc::new(UniqueFilter::new(engine)),
    }
}

// ── Label ──────────────────────────────────────────────────────────

/// Keeps hosts that carry every label the request requires.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelFilter;

#[async_trait]
impl Filter for LabelFilter {
    fn name(&self) -> &'static str {
        "label"
    }

    async fn accepts(&self, request: &ContainerRequest, host: &Host) -> EngineResult<bool> {
        Ok(request.labels.iter().all(|label| host.has_label(label)))
    }
}

// ── Image presence ─────────────────────────────────────────────────

/// Keeps hosts that already have the requested image cached locally.
pub struct ImageFilter {
    engine: Arc<dyn EngineClient>,
}

impl ImageFilter {
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Filter for ImageFilter {
    fn name(&self) -> &'static str {
        "image"
    }

    async fn accepts(&self, request: &ContainerRequest, host: &Host) -> EngineResult<bool> {
        let Ok(wanted) = ImageRef::parse(&request.image) else {
            debug!(host = %host.id, image = %request.image, "unparseable image reference");
            return Ok(false);
        };

        let images = self.engine.list_images(host).await?;
        let present = images
            .iter()
            .flat_map(|img| img.repo_tags.iter())
            .any(|tag| wanted.matches(tag));
        Ok(present)
    }
}

// ── Uniqueness ─────────────────────────────────────────────────────

/// Keeps hosts that are not already running the requested image.
pub struct UniqueFilter {
    engine: Arc<dyn EngineClient>,
}

impl UniqueFilter {
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Filter for UniqueFilter {
    fn name(&self) -> &'static str {
        "unique"
    }

    async fn accepts(&self, request: &ContainerRequest, host: &Host) -> EngineResult<bool> {
        let wanted = ImageRef::normalize(&request.image);
        let containers = self.engine.list_containers(host).await?;
        let running = containers
            .iter()
            .any(|c| ImageRef::normalize(&c.image) == wanted);
        Ok(!running)
    }
}
