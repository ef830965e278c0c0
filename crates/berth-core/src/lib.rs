//! berth-core: shared vocabulary for the Berth container scheduler.
//!
//! Defines the canonical [`Host`] and [`ContainerRequest`] shapes that every
//! other crate schedules over, the [`EngineClient`] contract used to talk to
//! a host's container runtime, and the `berth.toml` configuration.

pub mod config;
pub mod engine;
pub mod image;
pub mod memory;
pub mod types;

pub use config::{BerthConfig, FilterKind, PlacementPolicy, SchedulerConfig};
pub use engine::{
    ContainerDetails, ContainerSummary, CreateContainer, EngineClient, EngineError, EngineResult,
    ImageSummary, StartOptions,
};
pub use image::{DEFAULT_TAG, ImageError, ImageRef};
pub use memory::MemoryEngine;
pub use types::*;
