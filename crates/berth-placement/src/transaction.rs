//! Scheduling transaction: one end-to-end placement attempt.
//!
//! ```text
//! Open ──▶ Narrowing ──▶ Scored ──▶ Placed ──▶ Closed
//!   │          │            │          │
//!   └──────────┴────────────┴──────────┴──▶ Failed
//! ```
//!
//! The candidate set only ever shrinks. `Closed` and `Failed` are terminal:
//! once reached, every further mutation is ignored. Transactions are owned
//! by a single caller and are never persisted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

use berth_core::{ContainerRequest, Host, Placement};

use crate::scorer::HostScore;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    Narrowing,
    Scored,
    Placed,
    Closed,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Closed | TransactionState::Failed)
    }
}

#[derive(Debug)]
pub struct Transaction {
    id: String,
    state: TransactionState,
    request: ContainerRequest,
    candidates: Vec<Host>,
    scores: Vec<HostScore>,
    placement: Option<Placement>,
    /// Unix epoch milliseconds.
    started_at: u64,
    ended_at: Option<u64>,
    error: Option<String>,
}

impl Transaction {
    /// Start a transaction with the full candidate set.
    pub fn new(request: ContainerRequest, hosts: Vec<Host>) -> Self {
        let id = format!("txn-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed));
        debug!(txn = %id, candidates = hosts.len(), "transaction opened");
        Self {
            id,
            state: TransactionState::Open,
            request,
            candidates: hosts,
            scores: Vec::new(),
            placement: None,
            started_at: epoch_millis(),
            ended_at: None,
            error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn request(&self) -> &ContainerRequest {
        &self.request
    }

    /// Hosts still in the running.
    pub fn candidates(&self) -> &[Host] {
        &self.candidates
    }

    /// Feasible hosts ranked by the scorer, best first.
    pub fn scores(&self) -> &[HostScore] {
        &self.scores
    }

    pub fn placement(&self) -> Option<&Placement> {
        self.placement.as_ref()
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<u64> {
        self.ended_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Wall time from start to end, once the transaction has ended.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .map(|end| Duration::from_millis(end.saturating_sub(self.started_at)))
    }

    /// Keep only candidates whose id is in `accepted`. Returns how many
    /// were dropped.
    ///
    /// Hosts in `accepted` that are not already candidates are ignored,
    /// so the set can never grow.
    pub fn narrow(&mut self, accepted: &HashSet<String>) -> usize {
        if self.state.is_terminal() {
            return 0;
        }
        let before = self.candidates.len();
        self.candidates.retain(|h| accepted.contains(&h.id));
        self.state = TransactionState::Narrowing;
        before - self.candidates.len()
    }

    /// Record the scorer's ranking and drop infeasible candidates.
    pub fn record_scores(&mut self, scores: Vec<HostScore>) {
        if self.state.is_terminal() {
            return;
        }
        let feasible: HashSet<String> = scores.iter().map(|s| s.host.id.clone()).collect();
        self.candidates.retain(|h| feasible.contains(&h.id));
        self.scores = scores;
        self.state = TransactionState::Scored;
    }

    /// Record where the container was started.
    pub fn place(&mut self, placement: Placement) {
        if self.state.is_terminal() {
            return;
        }
        debug!(txn = %self.id, host = %placement.host.id, "transaction placed");
        self.placement = Some(placement);
        self.state = TransactionState::Placed;
    }

    /// End the transaction successfully.
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.ended_at = Some(epoch_millis());
        self.state = TransactionState::Closed;
    }

    /// End the transaction with a terminal error.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        let error = error.into();
        debug!(txn = %self.id, %error, "transaction failed");
        self.error = Some(error);
        self.ended_at = Some(epoch_millis());
        self.state = TransactionState::Failed;
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
