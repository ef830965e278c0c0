//! redb table definitions for the Berth registry.
//!
//! Both tables use `&str` host-id keys and `&[u8]` JSON values.

use redb::TableDefinition;

/// Host records keyed by `{host_id}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Reservation totals keyed by `{host_id}`. A missing row means nothing is
/// reserved on that host.
pub const RESERVATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("reservations");
