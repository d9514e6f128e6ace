#![forbid(unsafe_code)]
//! Shard driver: one SQLite database holding a full set of queue tables.

mod audit;
mod error;
mod funcmap;
mod jobs;
mod support;
mod types;

use rusqlite::Connection;
use std::path::Path;

pub use error::StoreError;
pub use types::*;

use support::*;

const MAX_TABLE_PREFIX_LEN: usize = 32;

/// Physical table names for one shard, with the configured prefix applied.
#[derive(Clone, Debug)]
pub struct Tables {
    pub job: String,
    pub error: String,
    pub exitstatus: String,
    pub funcmap: String,
}

impl Tables {
    pub fn with_prefix(prefix: &str) -> Result<Self, StoreError> {
        validate_table_prefix(prefix)?;
        Ok(Self {
            job: format!("{prefix}job"),
            error: format!("{prefix}error"),
            exitstatus: format!("{prefix}exitstatus"),
            funcmap: format!("{prefix}funcmap"),
        })
    }
}

fn validate_table_prefix(prefix: &str) -> Result<(), StoreError> {
    if prefix.len() > MAX_TABLE_PREFIX_LEN {
        return Err(StoreError::InvalidInput("table prefix is too long"));
    }
    for ch in prefix.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            continue;
        }
        return Err(StoreError::InvalidInput(
            "table prefix must be [a-z0-9_] only",
        ));
    }
    Ok(())
}

#[derive(Debug)]
pub struct ShardStore {
    conn: Connection,
    tables: Tables,
}

impl ShardStore {
    pub fn open(path: impl AsRef<Path>, prefix: &str) -> Result<Self, StoreError> {
        let tables = Tables::with_prefix(prefix)?;
        let conn = Connection::open(path)?;
        let store = Self { conn, tables };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory(prefix: &str) -> Result<Self, StoreError> {
        let tables = Tables::with_prefix(prefix)?;
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, tables };
        store.migrate()?;
        Ok(store)
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    fn migrate(&self) -> Result<(), StoreError> {
        migrate_sqlite_schema(&self.conn, &self.tables)
    }
}
