//! Resource scoring for placement decisions.
//!
//! A host's score is its average CPU and memory utilization *after* the
//! request lands on it, in percent:
//!
//! CPU is counted as the host's runtime will grant it, on the share grid.
//!
//! ```text
//! cpu    = (reserved_cpus + requested_cpus) / total_cpus * 100
//! memory = (reserved_mb   + requested_mb)   / total_mb   * 100
//! score  = (cpu + memory) / 2
//! ```
//!
//! Hosts scoring above [`MAX_SCORE`], or overflowing either resource on its
//! own, are infeasible. Among feasible hosts the default policy is
//! best-fit: the *highest* score wins, packing work onto busy hosts and
//! keeping idle hosts whole for large requests.

use std::cmp::Ordering;

use berth_core::{ContainerRequest, Host, PlacementPolicy, Reservation};

/// Highest feasible score: the host is exactly full.
pub const MAX_SCORE: f64 = 100.0;

/// Scored placement result for a single host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostScore {
    pub host: Host,
    /// Composite post-placement utilization. Range: 0.0..=100.0.
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Individual score components for debugging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    /// CPU utilization after placement, in percent.
    pub cpu: f64,
    /// Memory utilization after placement, in percent.
    pub memory: f64,
}

fn breakdown(host: &Host, reservation: &Reservation, request: &ContainerRequest) -> ScoreBreakdown {
    let delta = Reservation::on_host(host, request);
    let capacity_millicpus = host.capacity_millicpus();
    let cpu = if capacity_millicpus == 0 {
        f64::INFINITY
    } else {
        (reservation.millicpus + delta.millicpus) as f64 / capacity_millicpus as f64 * 100.0
    };
    let memory = if host.memory_mb == 0 {
        f64::INFINITY
    } else {
        (reservation.memory_mb + delta.memory_mb) as f64 / host.memory_mb as f64 * 100.0
    };
    ScoreBreakdown { cpu, memory }
}

/// Post-placement utilization score of `host` for `request`.
///
/// Hosts with no capacity in a dimension score `f64::INFINITY`.
pub fn score(host: &Host, reservation: &Reservation, request: &ContainerRequest) -> f64 {
    let b = breakdown(host, reservation, request);
    (b.cpu + b.memory) / 2.0
}

/// Score a host, returning `None` when placing the request would overcommit it.
pub fn score_host(
    host: &Host,
    reservation: &Reservation,
    request: &ContainerRequest,
) -> Option<HostScore> {
    let breakdown = breakdown(host, reservation, request);
    let score = (breakdown.cpu + breakdown.memory) / 2.0;

    if score > MAX_SCORE || breakdown.cpu > MAX_SCORE || breakdown.memory > MAX_SCORE {
        return None;
    }

    Some(HostScore {
        host: host.clone(),
        score,
        breakdown,
    })
}

/// Score all candidates and return the feasible ones, best first.
///
/// Ties keep their input order.
pub fn rank_hosts(
    candidates: &[(Host, Reservation)],
    request: &ContainerRequest,
    policy: PlacementPolicy,
) -> Vec<HostScore> {
    let mut scores: Vec<HostScore> = candidates
        .iter()
        .filter_map(|(host, reservation)| score_host(host, reservation, request))
        .collect();

    // `sort_by` is stable, so equal scores stay in input order.
    match policy {
        PlacementPolicy::BestFit => {
            scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal))
        }
        PlacementPolicy::Spread => {
            scores.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal))
        }
    }
    scores
}
