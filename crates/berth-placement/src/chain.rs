//! Scheduler chain: ordered filters followed by the resource scorer.
//!
//! One chain is bound to each workload type. Selecting a host runs every
//! filter over the transaction's remaining candidates, then ranks the
//! survivors by post-placement utilization. The chain never writes the
//! reservation ledger; committing the choice is the caller's job.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use berth_core::{EngineClient, Host, PlacementPolicy, SchedulerConfig};
use berth_state::Registry;

use crate::error::{PlacementError, PlacementResult};
use crate::filter::{Filter, build_filter};
use crate::scorer::{HostScore, rank_hosts};
use crate::transaction::Transaction;

pub struct SchedulerChain {
    filters: Vec<Arc<dyn Filter>>,
    policy: PlacementPolicy,
    registry: Arc<dyn Registry>,
}

impl std::fmt::Debug for SchedulerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerChain")
            .field("filters", &self.filter_names())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SchedulerChain {
    /// A chain with no filters and the default policy.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            filters: Vec::new(),
            policy: PlacementPolicy::default(),
            registry,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_policy(mut self, policy: PlacementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the chain described by one `[[schedulers]]` entry.
    pub fn from_config(
        config: &SchedulerConfig,
        registry: Arc<dyn Registry>,
        engine: Arc<dyn EngineClient>,
    ) -> Self {
        config
            .filters
            .iter()
            .fold(Self::new(registry), |chain, kind| {
                chain.with_filter(build_filter(*kind, engine.clone()))
            })
            .with_policy(config.policy)
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Narrow and score the transaction's candidates and return the best host.
    ///
    /// On error the transaction is marked failed. A filter that cannot query
    /// a host aborts the whole selection.
    pub async fn select(&self, txn: &mut Transaction) -> PlacementResult<HostScore> {
        for filter in &self.filters {
            let candidates: Vec<Host> = txn.candidates().to_vec();
            let mut accepted = HashSet::with_capacity(candidates.len());

            for host in &candidates {
                let verdict = filter.accepts(txn.request(), host).await;
                match verdict {
                    Ok(true) => {
                        accepted.insert(host.id.clone());
                    }
                    Ok(false) => {}
                    Err(source) => {
                        let err = PlacementError::Filter {
                            filter: filter.name(),
                            host_id: host.id.clone(),
                            source,
                        };
                        txn.fail(err.to_string());
                        return Err(err);
                    }
                }
            }

            let dropped = txn.narrow(&accepted);
            debug!(
                txn = %txn.id(),
                filter = filter.name(),
                dropped,
                remaining = txn.candidates().len(),
                "filter applied"
            );
        }

        if txn.candidates().is_empty() {
            let err = PlacementError::UnableToSchedule(format!(
                "no host passed filters {:?}",
                self.filter_names()
            ));
            txn.fail(err.to_string());
            return Err(err);
        }

        let survivors: Vec<Host> = txn.candidates().to_vec();
        let mut loads = Vec::with_capacity(survivors.len());
        for host in survivors {
            match self.registry.total_reservation(&host.id) {
                Ok(reservation) => loads.push((host, reservation)),
                Err(source) => {
                    let err = PlacementError::Reservation {
                        host_id: host.id.clone(),
                        source,
                    };
                    txn.fail(err.to_string());
                    return Err(err);
                }
            }
        }

        let ranked = rank_hosts(&loads, txn.request(), self.policy);
        let Some(best) = ranked.first().cloned() else {
            let err = PlacementError::UnableToSchedule(format!(
                "no host has capacity for {} cpus / {} MB",
                txn.request().cpus,
                txn.request().memory_mb
            ));
            txn.fail(err.to_string());
            return Err(err);
        };
        txn.record_scores(ranked);

        info!(
            txn = %txn.id(),
            host = %best.host.id,
            score = best.score,
            "host selected"
        );
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use berth_core::{ContainerRequest, EngineResult, FilterKind, MemoryEngine, Reservation};
    use berth_state::StateStore;

    use crate::filter::LabelFilter;
    use crate::transaction::TransactionState;

    fn registry_with(hosts: &[Host]) -> Arc<dyn Registry> {
        let store = StateStore::open_in_memory().unwrap();
        for host in hosts {
            store.put_host(host).unwrap();
        }
        Arc::new(store)
    }

    fn fleet() -> Vec<Host> {
        vec![
            Host::new("1", "tcp://10.0.0.1:2375", 1.0, 512).with_labels(["hostname:docker.com"]),
            Host::new("2", "tcp://10.0.0.2:2375", 1.0, 2048),
        ]
    }

    fn request(cpus: f64, memory_mb: u64) -> ContainerRequest {
        ContainerRequest::new("app", "app", "service", cpus, memory_mb)
    }

    /// Records which hosts it was asked about and rejects the listed ids.
    struct RecordingFilter {
        reject: Vec<&'static str>,
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Filter for RecordingFilter {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn accepts(&self, _request: &ContainerRequest, host: &Host) -> EngineResult<bool> {
            self.seen.lock().unwrap().push(host.id.clone());
            Ok(!self.reject.contains(&host.id.as_str()))
        }
    }

    #[tokio::test]
    async fn selects_tightest_host() {
        let hosts = fleet();
        let chain = SchedulerChain::new(registry_with(&hosts));
        let mut txn = Transaction::new(request(0.1, 92), hosts);

        let best = chain.select(&mut txn).await.unwrap();

        assert_eq!(best.host.id, "1");
        assert_eq!(txn.state(), TransactionState::Scored);
        assert_eq!(txn.scores().len(), 2);
    }

    #[tokio::test]
    async fn later_filters_only_see_survivors() {
        let hosts = vec![
            Host::new("a", "tcp://a", 1.0, 1024),
            Host::new("b", "tcp://b", 1.0, 1024),
            Host::new("c", "tcp://c", 1.0, 1024),
        ];
        let first = Arc::new(RecordingFilter {
            reject: vec!["b"],
            seen: Default::default(),
        });
        let second = Arc::new(RecordingFilter {
            reject: vec![],
            seen: Default::default(),
        });
        let chain = SchedulerChain::new(registry_with(&hosts))
            .with_filter(first.clone())
            .with_filter(second.clone());
        let mut txn = Transaction::new(request(0.1, 64), hosts);

        chain.select(&mut txn).await.unwrap();

        assert_eq!(*first.seen.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(*second.seen.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn all_filtered_out_is_unable_to_schedule() {
        let hosts = fleet();
        let chain = SchedulerChain::new(registry_with(&hosts)).with_filter(Arc::new(LabelFilter));
        let mut req = request(0.1, 64);
        req.labels = vec!["rack:9".to_string()];
        let mut txn = Transaction::new(req, hosts);

        let err = chain.select(&mut txn).await.unwrap_err();

        assert!(matches!(err, PlacementError::UnableToSchedule(_)));
        assert_eq!(txn.state(), TransactionState::Failed);
    }

    #[tokio::test]
    async fn no_capacity_is_unable_to_schedule() {
        let hosts = fleet();
        let chain = SchedulerChain::new(registry_with(&hosts));
        let mut txn = Transaction::new(request(0.1, 4096), hosts);

        let err = chain.select(&mut txn).await.unwrap_err();
        assert!(matches!(err, PlacementError::UnableToSchedule(_)));
    }

    #[tokio::test]
    async fn filter_io_error_aborts_selection() {
        let hosts = fleet();
        let engine = Arc::new(MemoryEngine::new());
        engine.set_unreachable("2", true);
        let chain = SchedulerChain::new(registry_with(&hosts))
            .with_filter(build_filter(FilterKind::Unique, engine));
        let mut txn = Transaction::new(request(0.1, 64), hosts);

        let err = chain.select(&mut txn).await.unwrap_err();

        match err {
            PlacementError::Filter {
                filter, host_id, ..
            } => {
                assert_eq!(filter, "unique");
                assert_eq!(host_id, "2");
            }
            other => panic!("expected filter error, got {other:?}"),
        }
        assert_eq!(txn.state(), TransactionState::Failed);
    }

    #[tokio::test]
    async fn reservations_steer_selection() {
        let hosts = vec![
            Host::new("idle", "tcp://a", 2.0, 2048),
            Host::new("busy", "tcp://b", 2.0, 2048),
        ];
        let store = StateStore::open_in_memory().unwrap();
        for host in &hosts {
            store.put_host(host).unwrap();
        }
        store
            .place_reservation("busy", Reservation::new(1000, 1024))
            .unwrap();
        let chain = SchedulerChain::new(Arc::new(store));

        let mut txn = Transaction::new(request(0.5, 256), hosts.clone());
        assert_eq!(chain.select(&mut txn).await.unwrap().host.id, "busy");

        let spread =
            SchedulerChain::new(chain.registry().clone()).with_policy(PlacementPolicy::Spread);
        let mut txn = Transaction::new(request(0.5, 256), hosts);
        assert_eq!(spread.select(&mut txn).await.unwrap().host.id, "idle");
    }

    #[test]
    fn from_config_keeps_filter_order() {
        let config = SchedulerConfig {
            workload_type: "service".to_string(),
            filters: vec![FilterKind::Unique, FilterKind::Label, FilterKind::Image],
            policy: PlacementPolicy::Spread,
        };
        let chain = SchedulerChain::from_config(
            &config,
            registry_with(&[]),
            Arc::new(MemoryEngine::new()),
        );

        assert_eq!(chain.filter_names(), vec!["unique", "label", "image"]);
        assert_eq!(chain.policy(), PlacementPolicy::Spread);
    }
}
