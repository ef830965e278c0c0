//! berth.toml configuration parser.
//!
//! Scheduler chains are declared per workload type here and handed to the
//! cluster manager at construction time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BerthConfig {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub schedulers: Vec<SchedulerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateConfig {
    /// Path to the redb file holding hosts and reservations.
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/berth/state.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// One scheduler chain bound to one workload type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    pub workload_type: String,
    /// Filters in the order they run.
    #[serde(default)]
    pub filters: Vec<FilterKind>,
    #[serde(default)]
    pub policy: PlacementPolicy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    /// Host must carry every label the request asks for.
    Label,
    /// Host must already have the image cached.
    Image,
    /// Host must not already run the image.
    Unique,
}

/// How the scorer picks among feasible hosts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicy {
    /// Highest post-placement utilization wins (pack tightly).
    #[default]
    BestFit,
    /// Lowest post-placement utilization wins.
    Spread,
}

impl Default for BerthConfig {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            reconcile: ReconcileConfig::default(),
            schedulers: vec![
                SchedulerConfig {
                    workload_type: "service".to_string(),
                    filters: vec![FilterKind::Label, FilterKind::Unique],
                    policy: PlacementPolicy::BestFit,
                },
                SchedulerConfig {
                    workload_type: "batch".to_string(),
                    filters: vec![FilterKind::Label],
                    policy: PlacementPolicy::BestFit,
                },
            ],
        }
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BerthConfig = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configs that bind one workload type twice.
    fn check(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for scheduler in &self.schedulers {
            if scheduler.workload_type.trim().is_empty() {
                anyhow::bail!("scheduler entry is missing a workload_type");
            }
            if !seen.insert(scheduler.workload_type.as_str()) {
                anyhow::bail!(
                    "workload type {:?} has more than one scheduler",
                    scheduler.workload_type
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[state]
path = "/tmp/berth.redb"

[reconcile]
interval_secs = 10

[[schedulers]]
workload_type = "service"
filters = ["label", "image", "unique"]
policy = "best-fit"

[[schedulers]]
workload_type = "batch"
filters = ["label"]
policy = "spread"
"#;
        let config = BerthConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.state.path, PathBuf::from("/tmp/berth.redb"));
        assert_eq!(config.reconcile.interval(), Duration::from_secs(10));
        assert_eq!(config.schedulers.len(), 2);
        assert_eq!(
            config.schedulers[0].filters,
            vec![FilterKind::Label, FilterKind::Image, FilterKind::Unique]
        );
        assert_eq!(config.schedulers[1].policy, PlacementPolicy::Spread);
    }

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let toml_str = r#"
[[schedulers]]
workload_type = "service"
"#;
        let config = BerthConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.reconcile.interval_secs, 30);
        assert!(config.schedulers[0].filters.is_empty());
        assert_eq!(config.schedulers[0].policy, PlacementPolicy::BestFit);
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let toml_str = r#"
[[schedulers]]
workload_type = "service"
filters = ["gpu"]
"#;
        assert!(BerthConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn test_duplicate_workload_type_is_rejected() {
        let toml_str = r#"
[[schedulers]]
workload_type = "service"

[[schedulers]]
workload_type = "service"
"#;
        let err = BerthConfig::from_toml_str(toml_str).unwrap_err();
        assert!(err.to_string().contains("more than one scheduler"));
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let config = BerthConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert_eq!(BerthConfig::from_toml_str(&toml_str).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("berth.toml");
        std::fs::write(&path, "[reconcile]\ninterval_secs = 0\n").unwrap();

        let config = BerthConfig::from_file(&path).unwrap();
        // Zero is clamped so the reconcile loop never spins.
        assert_eq!(config.reconcile.interval(), Duration::from_secs(1));
        assert!(config.schedulers.is_empty());
    }
}
