//! The registry contract consumed by the cluster manager and the scorer.
//!
//! Reads (`fetch_hosts`, `total_reservation`) may be stale by the time a
//! placement commits; only the commit itself is atomic. Implementations
//! must apply `place_reservation` and `release_reservation` to both
//! counters in one step.

use berth_core::{ContainerRequest, Host, Reservation};

use crate::error::{StateError, StateResult};
use crate::store::StateStore;

pub trait Registry: Send + Sync {
    fn fetch_hosts(&self) -> StateResult<Vec<Host>>;

    fn fetch_host(&self, host_id: &str) -> StateResult<Option<Host>>;

    fn total_reservation(&self, host_id: &str) -> StateResult<Reservation>;

    /// Add the request's CPU and memory to the host's reservation. CPU is
    /// counted on the host's share grid (see [`Reservation::on_host`]).
    fn place_reservation(&self, host_id: &str, request: &ContainerRequest)
    -> StateResult<Reservation>;

    /// Remove the request's CPU and memory from the host's reservation.
    fn release_reservation(
        &self,
        host_id: &str,
        request: &ContainerRequest,
    ) -> StateResult<Reservation>;

    /// Replace the host's reservation with observed totals if it still
    /// equals `expected`. Returns whether the write happened.
    fn reset_reservation(
        &self,
        host_id: &str,
        expected: Reservation,
        observed: Reservation,
    ) -> StateResult<bool>;

    fn save_host(&self, host: &Host) -> StateResult<()>;

    /// Returns true if the host existed.
    fn delete_host(&self, host_id: &str) -> StateResult<bool>;
}

impl Registry for StateStore {
    fn fetch_hosts(&self) -> StateResult<Vec<Host>> {
        self.list_hosts()
    }

    fn fetch_host(&self, host_id: &str) -> StateResult<Option<Host>> {
        self.get_host(host_id)
    }

    fn total_reservation(&self, host_id: &str) -> StateResult<Reservation> {
        self.get_reservation(host_id)
    }

    fn place_reservation(
        &self,
        host_id: &str,
        request: &ContainerRequest,
    ) -> StateResult<Reservation> {
        let host = self
            .get_host(host_id)?
            .ok_or_else(|| StateError::HostNotFound(host_id.to_string()))?;
        StateStore::place_reservation(self, host_id, Reservation::on_host(&host, request))
    }

    fn release_reservation(
        &self,
        host_id: &str,
        request: &ContainerRequest,
    ) -> StateResult<Reservation> {
        // A deleted host has no ledger row left to release from.
        let delta = match self.get_host(host_id)? {
            Some(host) => Reservation::on_host(&host, request),
            None => Reservation::for_request(request),
        };
        StateStore::release_reservation(self, host_id, delta)
    }

    fn reset_reservation(
        &self,
        host_id: &str,
        expected: Reservation,
        observed: Reservation,
    ) -> StateResult<bool> {
        StateStore::reset_reservation(self, host_id, expected, observed)
    }

    fn save_host(&self, host: &Host) -> StateResult<()> {
        self.put_host(host)
    }

    fn delete_host(&self, host_id: &str) -> StateResult<bool> {
        StateStore::delete_host(self, host_id)
    }
}
