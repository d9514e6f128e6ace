#![forbid(unsafe_code)]

use super::audit::{insert_error_tx, insert_exitstatus_tx};
use super::funcmap::func_id_tx;
use super::*;
use dray_core::ids::validate_funcname;
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Transaction, params, params_from_iter};
use tracing::debug;

const MAX_KEY_LEN: usize = 255;
const MAX_ERROR_MESSAGE_LEN: usize = 8_192;
const MAX_GRAB_BATCH: usize = 200;
const MAX_LIST_LIMIT: usize = 200;

const JOB_COLUMNS: &str =
    "jobid, funcid, arg, uniqkey, insert_time, run_after, grabbed_until, priority, coalesce";

fn normalize_uniqkey(raw: Option<&str>) -> Result<Option<String>, StoreError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidInput("uniqkey is too long"));
    }
    Ok(Some(trimmed.to_string()))
}

fn normalize_coalesce(raw: Option<&str>) -> Result<Option<String>, StoreError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidInput("coalesce key is too long"));
    }
    Ok(Some(trimmed.to_string()))
}

fn normalize_error_message(raw: &str) -> String {
    raw.chars().take(MAX_ERROR_MESSAGE_LEN).collect()
}

fn read_job_row(row: &rusqlite::Row<'_>) -> Result<JobRow, rusqlite::Error> {
    Ok(JobRow {
        jobid: row.get(0)?,
        funcid: row.get(1)?,
        arg: row.get(2)?,
        uniqkey: row.get(3)?,
        insert_time: row.get(4)?,
        run_after: row.get(5)?,
        grabbed_until: row.get(6)?,
        priority: row.get(7)?,
        coalesce: row.get(8)?,
    })
}

pub(super) fn job_insert_tx(
    tx: &Transaction<'_>,
    t: &Tables,
    spec: &JobSpec,
    now: i64,
) -> Result<InsertOutcome, StoreError> {
    validate_funcname(&spec.funcname)
        .map_err(|_| StoreError::InvalidInput("funcname is invalid"))?;
    let uniqkey = normalize_uniqkey(spec.uniqkey.as_deref())?;
    let coalesce = normalize_coalesce(spec.coalesce.as_deref())?;
    let run_after = spec.run_after.unwrap_or(now);
    let funcid = func_id_tx(tx, t, &spec.funcname)?;

    let Some(uniqkey) = uniqkey else {
        tx.execute(
            &format!(
                "INSERT INTO {job}(funcid, arg, uniqkey, insert_time, run_after, grabbed_until, priority, coalesce) \
                 VALUES (?1, ?2, NULL, ?3, ?4, 0, ?5, ?6)",
                job = t.job
            ),
            params![funcid, spec.arg, now, run_after, spec.priority, coalesce],
        )?;
        return Ok(InsertOutcome::Inserted {
            jobid: tx.last_insert_rowid(),
        });
    };

    // A duplicate (funcid, uniqkey) is a silent no-op; the caller still gets
    // a handle, pointing at the row that won.
    let inserted = tx.execute(
        &format!(
            "INSERT OR IGNORE INTO {job}(funcid, arg, uniqkey, insert_time, run_after, grabbed_until, priority, coalesce) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            job = t.job
        ),
        params![funcid, spec.arg, uniqkey, now, run_after, spec.priority, coalesce],
    )?;
    if inserted == 1 {
        return Ok(InsertOutcome::Inserted {
            jobid: tx.last_insert_rowid(),
        });
    }
    let jobid = tx.query_row(
        &format!(
            "SELECT jobid FROM {job} WHERE funcid=?1 AND uniqkey=?2",
            job = t.job
        ),
        params![funcid, uniqkey],
        |row| row.get(0),
    )?;
    Ok(InsertOutcome::Existing { jobid })
}

impl ShardStore {
    pub fn job_insert(&mut self, spec: &JobSpec) -> Result<InsertOutcome, StoreError> {
        let now = now_secs();
        let tx = self.conn.transaction()?;
        let outcome = job_insert_tx(&tx, &self.tables, spec, now)?;
        tx.commit()?;
        if let InsertOutcome::Inserted { jobid } = outcome {
            debug!(jobid, funcname = %spec.funcname, "job inserted");
        }
        Ok(outcome)
    }

    /// Insert a batch in one transaction on this shard. Uniqkey collisions
    /// resolve per item, same as single inserts.
    pub fn job_insert_batch(&mut self, specs: &[JobSpec]) -> Result<Vec<InsertOutcome>, StoreError> {
        let now = now_secs();
        let tx = self.conn.transaction()?;
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            outcomes.push(job_insert_tx(&tx, &self.tables, spec, now)?);
        }
        tx.commit()?;
        Ok(outcomes)
    }

    pub fn job_get(&self, jobid: i64) -> Result<Option<JobRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM {job} WHERE jobid=?1",
                    job = self.tables.job
                ),
                params![jobid],
                read_job_row,
            )
            .optional()?)
    }

    pub fn job_list(&self, funcname: &str, limit: usize) -> Result<Vec<JobRow>, StoreError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let funcid: Option<i64> = self
            .conn
            .query_row(
                &format!(
                    "SELECT funcid FROM {funcmap} WHERE funcname=?1",
                    funcmap = self.tables.funcmap
                ),
                params![funcname],
                |row| row.get(0),
            )
            .optional()?;
        let Some(funcid) = funcid else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM {job} WHERE funcid=?1 ORDER BY jobid ASC LIMIT ?2",
            job = self.tables.job
        ))?;
        let mut rows = stmt.query(params![funcid, limit as i64])?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(read_job_row(row)?);
        }
        Ok(jobs)
    }

    /// Rows eligible for grabbing right now, best-first. When an affinity is
    /// set, rows sharing its `(funcid, coalesce)` sort ahead of the general
    /// priority order.
    pub fn grab_candidates(
        &self,
        funcids: &[i64],
        batch: usize,
        affinity: Option<&CoalescePref>,
    ) -> Result<Vec<JobRow>, StoreError> {
        if funcids.is_empty() {
            return Ok(Vec::new());
        }
        let batch = batch.clamp(1, MAX_GRAB_BATCH);
        let now = now_secs();

        let placeholders = vec!["?"; funcids.len()].join(",");
        let order_prefix = if affinity.is_some() {
            "CASE WHEN funcid=? AND coalesce=? THEN 0 ELSE 1 END, "
        } else {
            ""
        };
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM {job} \
             WHERE funcid IN ({placeholders}) AND run_after <= ? AND grabbed_until <= ? \
             ORDER BY {order_prefix}priority DESC, jobid ASC LIMIT ?",
            job = self.tables.job
        );

        let mut values: Vec<SqlValue> = Vec::with_capacity(funcids.len() + 5);
        for funcid in funcids {
            values.push(SqlValue::Integer(*funcid));
        }
        values.push(SqlValue::Integer(now));
        values.push(SqlValue::Integer(now));
        if let Some(pref) = affinity {
            values.push(SqlValue::Integer(pref.funcid));
            values.push(SqlValue::Text(pref.coalesce.clone()));
        }
        values.push(SqlValue::Integer(batch as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut candidates = Vec::new();
        while let Some(row) = rows.next()? {
            candidates.push(read_job_row(row)?);
        }
        Ok(candidates)
    }

    /// The lease primitive: an UPDATE matching the primary key AND every
    /// snapshot column at its observed value. Of any number of competing
    /// writers exactly one sees 1 row affected.
    pub fn update_if_unchanged(
        &mut self,
        jobid: i64,
        set: &[(JobField, i64)],
        snapshot: &[(JobField, i64)],
    ) -> Result<usize, StoreError> {
        if set.is_empty() {
            return Err(StoreError::InvalidInput(
                "update_if_unchanged requires at least one set column",
            ));
        }
        let mut sql = format!("UPDATE {} SET ", self.tables.job);
        for (index, (field, _)) in set.iter().enumerate() {
            if index > 0 {
                sql.push_str(", ");
            }
            sql.push_str(field.column());
            sql.push_str("=?");
        }
        sql.push_str(" WHERE jobid=?");
        for (field, _) in snapshot {
            sql.push_str(" AND ");
            sql.push_str(field.column());
            sql.push_str("=?");
        }

        let mut values: Vec<SqlValue> = Vec::with_capacity(set.len() + snapshot.len() + 1);
        for (_, value) in set {
            values.push(SqlValue::Integer(*value));
        }
        values.push(SqlValue::Integer(jobid));
        for (_, value) in snapshot {
            values.push(SqlValue::Integer(*value));
        }
        Ok(self.conn.execute(&sql, params_from_iter(values))?)
    }

    /// Attempt to lease one candidate. Returns the new `grabbed_until` on
    /// success, `None` when a competing worker won the row first. Also the
    /// refresh path: a live holder re-grabs against its own lease value.
    pub fn job_grab(
        &mut self,
        jobid: i64,
        observed_grabbed_until: i64,
        grab_for: i64,
    ) -> Result<Option<i64>, StoreError> {
        if grab_for <= 0 {
            return Err(StoreError::InvalidInput("grab_for must be > 0"));
        }
        let now = now_secs();
        let grabbed_until = now + grab_for;
        let changed = self.update_if_unchanged(
            jobid,
            &[(JobField::GrabbedUntil, grabbed_until)],
            &[(JobField::GrabbedUntil, observed_grabbed_until)],
        )?;
        if changed == 1 {
            debug!(jobid, grabbed_until, "job grabbed");
            Ok(Some(grabbed_until))
        } else {
            Ok(None)
        }
    }

    pub fn job_complete(
        &mut self,
        jobid: i64,
        funcid: i64,
        exit: Option<ExitSpec>,
    ) -> Result<(), StoreError> {
        let now = now_secs();
        let tx = self.conn.transaction()?;
        if let Some(exit) = exit {
            insert_exitstatus_tx(
                &tx,
                &self.tables,
                jobid,
                funcid,
                exit.status,
                now,
                now + exit.keep_for,
            )?;
        }
        let removed = tx.execute(
            &format!("DELETE FROM {job} WHERE jobid=?1", job = self.tables.job),
            params![jobid],
        )?;
        if removed == 0 {
            return Err(StoreError::UnknownJob { jobid });
        }
        tx.commit()?;
        debug!(jobid, "job completed");
        Ok(())
    }

    /// Record the failure and put the row back in the free pool, delayed by
    /// `delay` seconds.
    pub fn job_fail_retry(
        &mut self,
        jobid: i64,
        funcid: i64,
        message: &str,
        delay: i64,
    ) -> Result<i64, StoreError> {
        let now = now_secs();
        let run_after = now + delay.max(0);
        let tx = self.conn.transaction()?;
        insert_error_tx(
            &tx,
            &self.tables,
            now,
            jobid,
            funcid,
            &normalize_error_message(message),
        )?;
        let changed = tx.execute(
            &format!(
                "UPDATE {job} SET run_after=?2, grabbed_until=0 WHERE jobid=?1",
                job = self.tables.job
            ),
            params![jobid, run_after],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownJob { jobid });
        }
        tx.commit()?;
        debug!(jobid, run_after, "job released for retry");
        Ok(run_after)
    }

    /// Record the failure and destroy the row; retries are exhausted or were
    /// never allowed.
    pub fn job_fail_terminal(
        &mut self,
        jobid: i64,
        funcid: i64,
        message: &str,
        exit: Option<ExitSpec>,
    ) -> Result<(), StoreError> {
        let now = now_secs();
        let tx = self.conn.transaction()?;
        insert_error_tx(
            &tx,
            &self.tables,
            now,
            jobid,
            funcid,
            &normalize_error_message(message),
        )?;
        if let Some(exit) = exit {
            insert_exitstatus_tx(
                &tx,
                &self.tables,
                jobid,
                funcid,
                exit.status,
                now,
                now + exit.keep_for,
            )?;
        }
        let removed = tx.execute(
            &format!("DELETE FROM {job} WHERE jobid=?1", job = self.tables.job),
            params![jobid],
        )?;
        if removed == 0 {
            return Err(StoreError::UnknownJob { jobid });
        }
        tx.commit()?;
        debug!(jobid, "job failed terminally");
        Ok(())
    }

    /// Atomic substitution: insert every replacement, destroy the original,
    /// one transaction. Either all of it happened or none of it did.
    pub fn job_replace(
        &mut self,
        jobid: i64,
        funcid: i64,
        replacements: &[JobSpec],
        exit: Option<ExitSpec>,
        fault: Option<ReplaceFault>,
    ) -> Result<Vec<i64>, StoreError> {
        let now = now_secs();
        let tx = self.conn.transaction()?;
        let mut jobids = Vec::with_capacity(replacements.len());
        for spec in replacements {
            jobids.push(job_insert_tx(&tx, &self.tables, spec, now)?.jobid());
        }
        if fault == Some(ReplaceFault::RollbackAfterInsert) {
            // Dropping the transaction rolls everything back.
            return Err(StoreError::ReplaceAborted);
        }
        if let Some(exit) = exit {
            insert_exitstatus_tx(
                &tx,
                &self.tables,
                jobid,
                funcid,
                exit.status,
                now,
                now + exit.keep_for,
            )?;
        }
        let removed = tx.execute(
            &format!("DELETE FROM {job} WHERE jobid=?1", job = self.tables.job),
            params![jobid],
        )?;
        if removed == 0 {
            return Err(StoreError::UnknownJob { jobid });
        }
        tx.commit()?;
        debug!(jobid, replacements = jobids.len(), "job replaced");
        Ok(jobids)
    }
}
