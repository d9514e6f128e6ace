#![forbid(unsafe_code)]

mod job;
mod util;

use super::super::super::{StoreError, Tables};
use rusqlite::Connection;

pub(super) fn apply(conn: &Connection, tables: &Tables) -> Result<(), StoreError> {
    job::apply(conn, tables)?;
    Ok(())
}
