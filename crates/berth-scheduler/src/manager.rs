//! Cluster manager: routes container requests to scheduler chains.
//!
//! The manager owns the workload type → chain map. Scheduling a container
//! runs one [`Transaction`] end to end:
//!
//! ```text
//! validate ─▶ chain lookup ─▶ fetch hosts ─▶ filter/score ─▶ execute ─▶ commit
//! ```
//!
//! The reservation is committed only after the container has started. A
//! commit that fails leaves a running container behind; the error carries
//! its id so the caller can stop it. Nothing is retried here.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use berth_core::{BerthConfig, ContainerRequest, EngineClient, Reservation, WorkloadType};
use berth_placement::{SchedulerChain, Transaction};
use berth_state::{Registry, StateError};

use crate::error::{SchedulerError, SchedulerResult};
use crate::executor::Executor;

pub struct ClusterManager {
    registry: Arc<dyn Registry>,
    executor: Arc<dyn Executor>,
    chains: RwLock<HashMap<WorkloadType, Arc<SchedulerChain>>>,
}

impl ClusterManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        executor: Arc<dyn Executor>,
        chains: HashMap<WorkloadType, Arc<SchedulerChain>>,
    ) -> Self {
        Self {
            registry,
            executor,
            chains: RwLock::new(chains),
        }
    }

    /// Build a manager with one chain per configured workload type.
    pub fn from_config(
        config: &BerthConfig,
        registry: Arc<dyn Registry>,
        engine: Arc<dyn EngineClient>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let chains = config
            .schedulers
            .iter()
            .map(|sc| {
                let chain = SchedulerChain::from_config(sc, registry.clone(), engine.clone());
                (sc.workload_type.clone(), Arc::new(chain))
            })
            .collect();
        Self::new(registry, executor, chains)
    }

    /// Bind `chain` to `workload_type`. The first binding wins.
    pub async fn register_scheduler(
        &self,
        workload_type: &str,
        chain: SchedulerChain,
    ) -> SchedulerResult<()> {
        let mut chains = self.chains.write().await;
        if chains.contains_key(workload_type) {
            return Err(SchedulerError::SchedulerExists(workload_type.to_string()));
        }
        info!(
            workload_type = %workload_type,
            filters = ?chain.filter_names(),
            "scheduler registered"
        );
        chains.insert(workload_type.to_string(), Arc::new(chain));
        Ok(())
    }

    /// Registered workload types, sorted.
    pub async fn workload_types(&self) -> Vec<WorkloadType> {
        let mut types: Vec<WorkloadType> = self.chains.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    async fn chain_for(&self, workload_type: &str) -> Option<Arc<SchedulerChain>> {
        self.chains.read().await.get(workload_type).cloned()
    }

    /// Place `request` on a host, start it, and commit its reservation.
    ///
    /// Returns the closed transaction; its placement says where the
    /// container runs.
    pub async fn schedule_container(
        &self,
        request: ContainerRequest,
    ) -> SchedulerResult<Transaction> {
        request.validate()?;

        let chain = self
            .chain_for(&request.workload_type)
            .await
            .ok_or_else(|| SchedulerError::NoSchedulerForType(request.workload_type.clone()))?;

        let hosts = self.registry.fetch_hosts()?;
        let mut txn = Transaction::new(request, hosts);

        let best = match chain.select(&mut txn).await {
            Ok(best) => best,
            Err(e) => {
                warn!(
                    txn = %txn.id(),
                    workload_type = %txn.request().workload_type,
                    error = %e,
                    "placement rejected"
                );
                return Err(e.into());
            }
        };

        let placement = match self.executor.run(&best.host, txn.request()).await {
            Ok(placement) => placement,
            Err(e) => {
                txn.fail(e.to_string());
                match e.container_id() {
                    Some(container_id) => error!(
                        txn = %txn.id(),
                        host = %best.host.id,
                        container = %container_id,
                        error = %e,
                        "executor failed after creating a container"
                    ),
                    None => {
                        warn!(txn = %txn.id(), host = %best.host.id, error = %e, "executor failed")
                    }
                }
                return Err(SchedulerError::from_executor(&best.host.id, e));
            }
        };

        let host_id = placement.host_id().to_string();
        let container_id = placement.container_id.clone();
        match self.registry.place_reservation(&host_id, txn.request()) {
            Ok(total) => {
                info!(
                    txn = %txn.id(),
                    host = %host_id,
                    container = %container_id,
                    reserved_cpus = total.cpus(),
                    reserved_memory_mb = total.memory_mb,
                    "container scheduled"
                );
            }
            Err(StateError::Overcommit { .. }) => {
                txn.fail("reservation refused: host overcommitted");
                warn!(
                    txn = %txn.id(),
                    host = %host_id,
                    container = %container_id,
                    "commit refused, host would be overcommitted"
                );
                return Err(SchedulerError::Overcommitted {
                    host_id,
                    container_id,
                });
            }
            Err(source) => {
                txn.fail(source.to_string());
                error!(
                    txn = %txn.id(),
                    host = %host_id,
                    container = %container_id,
                    error = %source,
                    "container running without a recorded reservation"
                );
                return Err(SchedulerError::ReservationCommit {
                    host_id,
                    container_id,
                    source,
                });
            }
        }

        txn.place(placement);
        txn.close();
        Ok(txn)
    }

    /// Return a placed container's resources to its host.
    pub fn release_container(
        &self,
        host_id: &str,
        request: &ContainerRequest,
    ) -> SchedulerResult<Reservation> {
        let remaining = self.registry.release_reservation(host_id, request)?;
        info!(
            host = %host_id,
            container = %request.name,
            reserved_cpus = remaining.cpus(),
            reserved_memory_mb = remaining.memory_mb,
            "reservation released"
        );
        Ok(remaining)
    }
}
