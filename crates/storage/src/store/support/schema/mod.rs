#![forbid(unsafe_code)]

mod migrations;
mod sql;

use super::super::{StoreError, Tables};
use rusqlite::Connection;

pub(in crate::store) fn migrate_sqlite_schema(
    conn: &Connection,
    tables: &Tables,
) -> Result<(), StoreError> {
    conn.execute_batch(&sql::full_schema_sql(tables))?;
    migrations::apply(conn, tables)?;
    Ok(())
}
