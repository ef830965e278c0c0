//! StateStore: redb-backed host registry and reservation ledger.
//!
//! Provides typed operations over hosts and reservations. Values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use berth_core::{Host, HostId, Reservation};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe registry backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host record.
    pub fn put_host(&self, host: &Host) -> StateResult<()> {
        let value = serde_json::to_vec(host).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            table
                .insert(host.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host.id, "host stored");
        Ok(())
    }

    /// Get a host by ID.
    pub fn get_host(&self, host_id: &str) -> StateResult<Option<Host>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        match table.get(host_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all hosts, ordered by id.
    pub fn list_hosts(&self) -> StateResult<Vec<Host>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HOSTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Delete a host and its reservation row. Returns true if the host existed.
    pub fn delete_host(&self, host_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            existed = hosts.remove(host_id).map_err(map_err!(Write))?.is_some();
            let mut reservations = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            reservations.remove(host_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host_id, existed, "host deleted");
        Ok(existed)
    }

    // ── Reservations ───────────────────────────────────────────────

    /// Current reservation totals for a host. Unknown hosts report zero.
    pub fn get_reservation(&self, host_id: &str) -> StateResult<Reservation> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        match table.get(host_id).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()),
            None => Ok(Reservation::default()),
        }
    }

    /// All non-empty reservation rows, ordered by host id.
    pub fn list_reservations(&self) -> StateResult<Vec<(HostId, Reservation)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push((key.value().to_string(), decode(value.value())?));
        }
        Ok(results)
    }

    /// Atomically add `delta` to a host's reservation.
    ///
    /// The capacity check and the write happen in the same write
    /// transaction. Returns the new totals.
    pub fn place_reservation(&self, host_id: &str, delta: Reservation) -> StateResult<Reservation> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            let host: Host = match hosts.get(host_id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::HostNotFound(host_id.to_string())),
            };

            let mut table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            let current: Reservation = match table.get(host_id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => Reservation::default(),
            };

            let updated = current.saturating_add(delta);
            if !updated.fits(&host) {
                warn!(
                    host = %host_id,
                    requested_millicpus = delta.millicpus,
                    requested_memory_mb = delta.memory_mb,
                    "reservation refused: host capacity exceeded"
                );
                return Err(StateError::Overcommit {
                    host_id: host_id.to_string(),
                    requested_millicpus: delta.millicpus,
                    requested_memory_mb: delta.memory_mb,
                    reserved_millicpus: current.millicpus,
                    reserved_memory_mb: current.memory_mb,
                });
            }

            let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
            table
                .insert(host_id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            host = %host_id,
            millicpus = updated.millicpus,
            memory_mb = updated.memory_mb,
            "reservation placed"
        );
        Ok(updated)
    }

    /// Atomically subtract `delta` from a host's reservation, saturating at
    /// zero. Returns the new totals.
    pub fn release_reservation(
        &self,
        host_id: &str,
        delta: Reservation,
    ) -> StateResult<Reservation> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            let current: Reservation = match table.get(host_id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => Reservation::default(),
            };

            if delta.millicpus > current.millicpus || delta.memory_mb > current.memory_mb {
                warn!(
                    host = %host_id,
                    reserved_millicpus = current.millicpus,
                    reserved_memory_mb = current.memory_mb,
                    "release exceeds reservation, clamping at zero"
                );
            }

            let updated = current.saturating_sub(delta);
            if updated == Reservation::default() {
                table.remove(host_id).map_err(map_err!(Write))?;
            } else {
                let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
                table
                    .insert(host_id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            updated
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            host = %host_id,
            millicpus = updated.millicpus,
            memory_mb = updated.memory_mb,
            "reservation released"
        );
        Ok(updated)
    }

    /// Overwrite a host's reservation with observed totals, provided it
    /// still equals `expected`.
    ///
    /// Returns `false` and writes nothing when the ledger moved since
    /// `expected` was read. No capacity check: the ledger has to describe
    /// what is actually running, even when that is more than the host
    /// should hold.
    pub fn reset_reservation(
        &self,
        host_id: &str,
        expected: Reservation,
        reservation: Reservation,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let hosts = txn.open_table(HOSTS).map_err(map_err!(Table))?;
            if hosts.get(host_id).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::HostNotFound(host_id.to_string()));
            }

            let mut table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            let current: Reservation = match table.get(host_id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => Reservation::default(),
            };
            if current != expected {
                debug!(
                    host = %host_id,
                    expected_millicpus = expected.millicpus,
                    current_millicpus = current.millicpus,
                    "reservation changed, reset skipped"
                );
                return Ok(false);
            }

            if reservation == Reservation::default() {
                table.remove(host_id).map_err(map_err!(Write))?;
            } else {
                let value = serde_json::to_vec(&reservation).map_err(map_err!(Serialize))?;
                table
                    .insert(host_id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(host = %host_id, "reservation reset");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_host(id: &str, cpus: f64, memory_mb: u64) -> Host {
        Host::new(id, "tcp://10.0.0.1:2375", cpus, memory_mb).with_labels(["rack:1"])
    }

    // ── Host CRUD ──────────────────────────────────────────────────

    #[test]
    fn host_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let host = test_host("host-1", 4.0, 8192);

        store.put_host(&host).unwrap();
        let retrieved = store.get_host("host-1").unwrap();

        assert_eq!(retrieved, Some(host));
    }

    #[test]
    fn host_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_host("nope").unwrap().is_none());
    }

    #[test]
    fn host_list_all() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-2", 1.0, 512)).unwrap();
        store.put_host(&test_host("host-1", 1.0, 512)).unwrap();

        let all = store.list_hosts().unwrap();
        let ids: Vec<&str> = all.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["host-1", "host-2"]);
    }

    #[test]
    fn host_delete_drops_reservation() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 1.0, 512)).unwrap();
        store
            .place_reservation("host-1", Reservation::new(500, 256))
            .unwrap();

        assert!(store.delete_host("host-1").unwrap());
        assert!(!store.delete_host("host-1").unwrap());
        assert_eq!(store.get_reservation("host-1").unwrap(), Reservation::default());
        assert!(store.list_reservations().unwrap().is_empty());
    }

    // ── Reservations ───────────────────────────────────────────────

    #[test]
    fn unknown_host_has_empty_reservation() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.get_reservation("nope").unwrap(), Reservation::default());
    }

    #[test]
    fn place_then_release_restores_counters_exactly() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 2.0, 2048)).unwrap();
        store
            .place_reservation("host-1", Reservation::new(300, 100))
            .unwrap();
        let before = store.get_reservation("host-1").unwrap();

        let delta = Reservation::new(100, 92);
        let placed = store.place_reservation("host-1", delta).unwrap();
        assert_eq!(placed, Reservation::new(400, 192));

        let released = store.release_reservation("host-1", delta).unwrap();
        assert_eq!(released, before);
        assert_eq!(store.get_reservation("host-1").unwrap(), before);
    }

    #[test]
    fn place_on_unknown_host_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .place_reservation("ghost", Reservation::new(100, 1))
            .unwrap_err();
        assert!(matches!(err, StateError::HostNotFound(id) if id == "ghost"));
    }

    #[test]
    fn overcommit_is_refused_and_nothing_written() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 1.0, 512)).unwrap();
        store
            .place_reservation("host-1", Reservation::new(900, 256))
            .unwrap();

        let err = store
            .place_reservation("host-1", Reservation::new(200, 10))
            .unwrap_err();
        assert!(matches!(err, StateError::Overcommit { .. }));

        let err = store
            .place_reservation("host-1", Reservation::new(10, 300))
            .unwrap_err();
        assert!(matches!(err, StateError::Overcommit { .. }));

        assert_eq!(
            store.get_reservation("host-1").unwrap(),
            Reservation::new(900, 256)
        );
    }

    #[test]
    fn place_up_to_exact_capacity_is_allowed() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 1.0, 512)).unwrap();
        let full = store
            .place_reservation("host-1", Reservation::new(1000, 512))
            .unwrap();
        assert_eq!(full, Reservation::new(1000, 512));
    }

    #[test]
    fn release_saturates_and_clears_row() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 1.0, 512)).unwrap();
        store
            .place_reservation("host-1", Reservation::new(100, 64))
            .unwrap();

        let released = store
            .release_reservation("host-1", Reservation::new(500, 500))
            .unwrap();
        assert_eq!(released, Reservation::default());
        assert!(store.list_reservations().unwrap().is_empty());
    }

    #[test]
    fn reset_overwrites_without_capacity_check() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 1.0, 512)).unwrap();

        assert!(
            store
                .reset_reservation("host-1", Reservation::default(), Reservation::new(1500, 128))
                .unwrap()
        );
        assert_eq!(
            store.get_reservation("host-1").unwrap(),
            Reservation::new(1500, 128)
        );

        assert!(
            store
                .reset_reservation("host-1", Reservation::new(1500, 128), Reservation::default())
                .unwrap()
        );
        assert!(store.list_reservations().unwrap().is_empty());

        assert!(matches!(
            store.reset_reservation("ghost", Reservation::default(), Reservation::new(1, 1)),
            Err(StateError::HostNotFound(_))
        ));
    }

    #[test]
    fn reset_is_skipped_when_ledger_moved() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 1.0, 512)).unwrap();
        let seen = store.get_reservation("host-1").unwrap();

        // A commit lands after `seen` was read.
        store
            .place_reservation("host-1", Reservation::new(500, 256))
            .unwrap();

        let applied = store
            .reset_reservation("host-1", seen, Reservation::default())
            .unwrap();
        assert!(!applied);
        assert_eq!(
            store.get_reservation("host-1").unwrap(),
            Reservation::new(500, 256)
        );
    }

    #[test]
    fn concurrent_placements_never_exceed_capacity() {
        use std::thread;

        let store = StateStore::open_in_memory().unwrap();
        store.put_host(&test_host("host-1", 1.0, 1024)).unwrap();

        // 16 threads each try to reserve 100m; only 10 fit.
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    store
                        .place_reservation("host-1", Reservation::new(100, 10))
                        .is_ok()
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 10);
        assert_eq!(
            store.get_reservation("host-1").unwrap(),
            Reservation::new(1000, 100)
        );
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("berth.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_host(&test_host("host-1", 2.0, 2048)).unwrap();
            store
                .place_reservation("host-1", Reservation::new(250, 512))
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_hosts().unwrap().len(), 1);
        assert_eq!(
            store.get_reservation("host-1").unwrap(),
            Reservation::new(250, 512)
        );
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_hosts().unwrap().is_empty());
        assert!(store.list_reservations().unwrap().is_empty());
        assert!(!store.delete_host("nope").unwrap());
        assert_eq!(
            store
                .release_reservation("nope", Reservation::new(1, 1))
                .unwrap(),
            Reservation::default()
        );
    }
}
