//! Reservation reconciler.
//!
//! The ledger only changes when the manager commits or a caller releases,
//! so crashes and out-of-band container stops make it drift. The reconciler
//! rebuilds each host's reservation from the containers its runtime reports
//! as running.
//!
//! The ledger is read before the runtime is listed and only overwritten if
//! it still holds that value, so a commit landing mid-pass is never erased.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use berth_core::{ContainerSummary, EngineClient, Host, HostId, Reservation};
use berth_state::Registry;

use crate::error::SchedulerResult;
use crate::executor::BYTES_PER_MB;

/// What reconciliation found on one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostOutcome {
    /// Ledger already matched the runtime.
    InSync(Reservation),
    /// Ledger was rewritten to the observed totals.
    Corrected {
        previous: Reservation,
        observed: Reservation,
    },
    /// Ledger changed while the runtime was listed; left for the next pass.
    Changed { observed: Reservation },
    /// Runtime could not be queried; the ledger was left alone.
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostReport {
    pub host_id: HostId,
    pub outcome: HostOutcome,
    /// Observed usage exceeds the host's capacity.
    pub overcommitted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub hosts: Vec<HostReport>,
}

impl ReconcileReport {
    pub fn corrected(&self) -> impl Iterator<Item = &HostReport> {
        self.hosts
            .iter()
            .filter(|h| matches!(h.outcome, HostOutcome::Corrected { .. }))
    }

    pub fn unreachable(&self) -> impl Iterator<Item = &HostReport> {
        self.hosts
            .iter()
            .filter(|h| matches!(h.outcome, HostOutcome::Unreachable(_)))
    }

    pub fn overcommitted(&self) -> impl Iterator<Item = &HostReport> {
        self.hosts.iter().filter(|h| h.overcommitted)
    }
}

/// Reservation a set of running containers actually holds on `host`.
pub fn observed_reservation(host: &Host, containers: &[ContainerSummary]) -> Reservation {
    containers.iter().fold(Reservation::default(), |acc, c| {
        acc.saturating_add(Reservation::new(
            host.shares_to_millicpus(c.cpu_shares),
            c.memory_bytes / BYTES_PER_MB,
        ))
    })
}

pub struct Reconciler {
    registry: Arc<dyn Registry>,
    engine: Arc<dyn EngineClient>,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn Registry>, engine: Arc<dyn EngineClient>) -> Self {
        Self { registry, engine }
    }

    /// One pass over every registered host.
    pub async fn reconcile_once(&self) -> SchedulerResult<ReconcileReport> {
        let hosts = self.registry.fetch_hosts()?;
        let mut report = ReconcileReport::default();

        for host in hosts {
            let previous = self.registry.total_reservation(&host.id)?;
            let containers = match self.engine.list_containers(&host).await {
                Ok(containers) => containers,
                Err(e) => {
                    warn!(host = %host.id, error = %e, "skipping unreachable host");
                    report.hosts.push(HostReport {
                        host_id: host.id.clone(),
                        outcome: HostOutcome::Unreachable(e.to_string()),
                        overcommitted: false,
                    });
                    continue;
                }
            };

            let observed = observed_reservation(&host, &containers);
            let overcommitted = !observed.fits(&host);
            if overcommitted {
                error!(
                    host = %host.id,
                    observed_cpus = observed.cpus(),
                    observed_memory_mb = observed.memory_mb,
                    "host is overcommitted"
                );
            }

            let outcome = if observed == previous {
                debug!(host = %host.id, "reservation in sync");
                HostOutcome::InSync(observed)
            } else if !self
                .registry
                .reset_reservation(&host.id, previous, observed)?
            {
                info!(host = %host.id, "ledger changed during pass, left alone");
                HostOutcome::Changed { observed }
            } else {
                warn!(
                    host = %host.id,
                    ledger_cpus = previous.cpus(),
                    ledger_memory_mb = previous.memory_mb,
                    observed_cpus = observed.cpus(),
                    observed_memory_mb = observed.memory_mb,
                    "reservation drift corrected"
                );
                HostOutcome::Corrected { previous, observed }
            };

            report.hosts.push(HostReport {
                host_id: host.id,
                outcome,
                overcommitted,
            });
        }

        Ok(report)
    }

    /// Reconcile every `interval` until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "reconciler starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.reconcile_once().await {
                        Ok(report) => debug!(
                            hosts = report.hosts.len(),
                            corrected = report.corrected().count(),
                            "reconcile pass complete"
                        ),
                        Err(e) => error!(error = %e, "reconcile pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("reconciler shutting down");
                    break;
                }
            }
        }
    }
}
