#![forbid(unsafe_code)]

use super::*;
use rusqlite::{OptionalExtension, Transaction, params};
use tracing::debug;

const MAX_FAILURE_LOG_LIMIT: usize = 200;

pub(super) fn insert_error_tx(
    tx: &Transaction<'_>,
    t: &Tables,
    now: i64,
    jobid: i64,
    funcid: i64,
    message: &str,
) -> Result<(), StoreError> {
    tx.execute(
        &format!(
            "INSERT INTO {error}(error_time, jobid, funcid, message) VALUES (?1, ?2, ?3, ?4)",
            error = t.error
        ),
        params![now, jobid, funcid, message],
    )?;
    Ok(())
}

pub(super) fn insert_exitstatus_tx(
    tx: &Transaction<'_>,
    t: &Tables,
    jobid: i64,
    funcid: i64,
    status: i64,
    completion_time: i64,
    delete_after: i64,
) -> Result<(), StoreError> {
    // jobids are never reused within a shard, but replace-with can complete
    // a job whose id already left an exitstatus behind in test reruns; the
    // newest disposition wins.
    tx.execute(
        &format!(
            "INSERT OR REPLACE INTO {exitstatus}(jobid, funcid, status, completion_time, delete_after) VALUES (?1, ?2, ?3, ?4, ?5)",
            exitstatus = t.exitstatus
        ),
        params![jobid, funcid, status, completion_time, delete_after],
    )?;
    Ok(())
}

impl ShardStore {
    /// Count of error rows for one job. The retry state machine treats this
    /// as the number of failures so far.
    pub fn failures(&self, jobid: i64) -> Result<i64, StoreError> {
        Ok(self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {error} WHERE jobid=?1",
                error = self.tables.error
            ),
            params![jobid],
            |row| row.get(0),
        )?)
    }

    pub fn failure_log(&self, jobid: i64, limit: usize) -> Result<Vec<ErrorRow>, StoreError> {
        let limit = limit.clamp(1, MAX_FAILURE_LOG_LIMIT);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT error_time, jobid, funcid, message FROM {error} WHERE jobid=?1 ORDER BY error_time ASC, rowid ASC LIMIT ?2",
            error = self.tables.error
        ))?;
        let mut rows = stmt.query(params![jobid, limit as i64])?;
        let mut log = Vec::new();
        while let Some(row) = rows.next()? {
            log.push(ErrorRow {
                error_time: row.get(0)?,
                jobid: row.get(1)?,
                funcid: row.get(2)?,
                message: row.get(3)?,
            });
        }
        Ok(log)
    }

    pub fn exit_status(&self, jobid: i64) -> Result<Option<ExitStatusRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT jobid, funcid, status, completion_time, delete_after FROM {exitstatus} WHERE jobid=?1",
                    exitstatus = self.tables.exitstatus
                ),
                params![jobid],
                |row| {
                    Ok(ExitStatusRow {
                        jobid: row.get(0)?,
                        funcid: row.get(1)?,
                        status: row.get(2)?,
                        completion_time: row.get(3)?,
                        delete_after: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    /// Remove expired exitstatus rows. Idempotent; safe to run concurrently
    /// from any number of processes.
    pub fn exitstatus_sweep(&mut self) -> Result<usize, StoreError> {
        let now = now_secs();
        let removed = self.conn.execute(
            &format!(
                "DELETE FROM {exitstatus} WHERE delete_after < ?1",
                exitstatus = self.tables.exitstatus
            ),
            params![now],
        )?;
        if removed > 0 {
            debug!(removed, "exitstatus sweep");
        }
        Ok(removed)
    }
}
