#![forbid(unsafe_code)]

use super::*;
use rusqlite::{OptionalExtension, Transaction, params};

pub(super) fn func_id_tx(
    tx: &Transaction<'_>,
    t: &Tables,
    funcname: &str,
) -> Result<i64, StoreError> {
    tx.execute(
        &format!(
            "INSERT OR IGNORE INTO {funcmap}(funcname) VALUES (?1)",
            funcmap = t.funcmap
        ),
        params![funcname],
    )?;
    let funcid = tx.query_row(
        &format!(
            "SELECT funcid FROM {funcmap} WHERE funcname=?1",
            funcmap = t.funcmap
        ),
        params![funcname],
        |row| row.get(0),
    )?;
    Ok(funcid)
}

impl ShardStore {
    /// Interns `funcname` to this shard's integer id, creating the mapping
    /// when absent. Ids are shard-local; never compare them across shards.
    pub fn func_id(&mut self, funcname: &str) -> Result<i64, StoreError> {
        dray_core::ids::validate_funcname(funcname)
            .map_err(|_| StoreError::InvalidInput("funcname is invalid"))?;
        let tx = self.conn.transaction()?;
        let funcid = func_id_tx(&tx, &self.tables, funcname)?;
        tx.commit()?;
        Ok(funcid)
    }

    pub fn func_name(&self, funcid: i64) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT funcname FROM {funcmap} WHERE funcid=?1",
                    funcmap = self.tables.funcmap
                ),
                params![funcid],
                |row| row.get(0),
            )
            .optional()?)
    }
}
