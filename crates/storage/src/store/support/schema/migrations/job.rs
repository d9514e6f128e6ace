#![forbid(unsafe_code)]

use super::super::super::super::{StoreError, Tables};
use super::util::add_column_if_missing;
use rusqlite::Connection;

pub(super) fn apply(conn: &Connection, t: &Tables) -> Result<(), StoreError> {
    // Early deployments shipped without priority or coalesce; both are
    // additive and default-compatible with the grab ordering.
    add_column_if_missing(conn, &t.job, "priority", "INTEGER NOT NULL DEFAULT 0")?;
    add_column_if_missing(conn, &t.job, "coalesce", "TEXT")?;
    Ok(())
}
