#![forbid(unsafe_code)]

use crate::error::ClientError;
use crate::handle::JobHandle;
use crate::shard::Shard;
use crate::worker::Worker;
use dray_core::arg;
use dray_storage::{ExitSpec, JobRow, JobSpec, StoreError};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A leased job, materialized from its row: decoded argument, resolved
/// funcname, and the handle that outlives it.
///
/// Exactly one of the terminal methods takes effect per instance; once one
/// has run, the rest log and return without side effects. The lease makes an
/// instance exclusive to its worker, so the guard needs no synchronization.
pub struct Job {
    handle: JobHandle,
    funcname: String,
    funcid: i64,
    arg: Value,
    uniqkey: Option<String>,
    insert_time: i64,
    run_after: i64,
    grabbed_until: i64,
    priority: i64,
    coalesce: Option<String>,
    worker: Option<Arc<dyn Worker>>,
    finished: bool,
}

impl Job {
    pub(crate) fn from_row(
        row: JobRow,
        funcname: String,
        shard: Arc<Shard>,
        worker: Option<Arc<dyn Worker>>,
    ) -> Result<Self, ClientError> {
        let arg = arg::decode(&row.arg)?;
        Ok(Self {
            handle: JobHandle::new(shard, row.jobid),
            funcname,
            funcid: row.funcid,
            arg,
            uniqkey: row.uniqkey,
            insert_time: row.insert_time,
            run_after: row.run_after,
            grabbed_until: row.grabbed_until,
            priority: row.priority,
            coalesce: row.coalesce,
            worker,
            finished: false,
        })
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn jobid(&self) -> i64 {
        self.handle.jobid()
    }

    pub fn funcname(&self) -> &str {
        &self.funcname
    }

    pub fn arg(&self) -> &Value {
        &self.arg
    }

    pub fn uniqkey(&self) -> Option<&str> {
        self.uniqkey.as_deref()
    }

    pub fn coalesce(&self) -> Option<&str> {
        self.coalesce.as_deref()
    }

    pub fn insert_time(&self) -> i64 {
        self.insert_time
    }

    pub fn run_after(&self) -> i64 {
        self.run_after
    }

    pub fn grabbed_until(&self) -> i64 {
        self.grabbed_until
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub(crate) fn funcid(&self) -> i64 {
        self.funcid
    }

    pub(crate) fn worker(&self) -> Option<Arc<dyn Worker>> {
        self.worker.clone()
    }

    /// Whether a terminal method has already taken effect on this instance.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn guard(&mut self) -> bool {
        if self.finished {
            debug!(jobid = self.jobid(), "terminal method on settled job, ignoring");
            return false;
        }
        self.finished = true;
        true
    }

    fn exit_spec(&self, status: i64) -> Option<ExitSpec> {
        let keep_for = self
            .worker
            .as_ref()
            .map(|w| w.keep_exit_status_for())
            .unwrap_or(0);
        (keep_for > 0).then_some(ExitSpec { status, keep_for })
    }

    /// Success: record the exit status when retention is on, destroy the
    /// row. A row already gone means the lease expired and another worker
    /// settled the job; that is not an error here.
    pub fn completed(&mut self) -> Result<(), ClientError> {
        if !self.guard() {
            return Ok(());
        }
        let exit = self.exit_spec(0);
        let jobid = self.jobid();
        let funcid = self.funcid;
        match self.handle.shard().store(|s| s.job_complete(jobid, funcid, exit)) {
            Ok(()) => Ok(()),
            Err(StoreError::UnknownJob { .. }) => {
                debug!(jobid, "job row already gone at completion");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Transient failure with exit status 1 when retries run out.
    pub fn failed(&mut self, message: &str) -> Result<(), ClientError> {
        self.failed_with_status(message, 1)
    }

    /// Transient failure. Counts this failure against the descriptor's
    /// `max_retries`; within bounds the row returns to the free pool after
    /// `retry_delay(failures)` seconds, beyond them it is destroyed.
    pub fn failed_with_status(&mut self, message: &str, exit_status: i64) -> Result<(), ClientError> {
        if !self.guard() {
            return Ok(());
        }
        let jobid = self.jobid();
        let funcid = self.funcid;
        let worker = self.worker.clone();

        // Counts the error row about to be written.
        let failures = self.handle.failures()? + 1;
        let max_retries = worker.as_ref().map(|w| w.max_retries(self)).unwrap_or(0);

        if max_retries >= failures {
            let delay = worker.as_ref().map(|w| w.retry_delay(failures)).unwrap_or(0);
            self.handle
                .shard()
                .store(|s| s.job_fail_retry(jobid, funcid, message, delay))?;
        } else {
            let exit = self.exit_spec(exit_status);
            self.handle
                .shard()
                .store(|s| s.job_fail_terminal(jobid, funcid, message, exit))?;
        }
        Ok(())
    }

    /// Permanent failure with exit status 1; never retries.
    pub fn permanent_failure(&mut self, message: &str) -> Result<(), ClientError> {
        self.permanent_failure_with_status(message, 1)
    }

    pub fn permanent_failure_with_status(
        &mut self,
        message: &str,
        exit_status: i64,
    ) -> Result<(), ClientError> {
        if !self.guard() {
            return Ok(());
        }
        let jobid = self.jobid();
        let funcid = self.funcid;
        let exit = self.exit_spec(exit_status);
        self.handle
            .shard()
            .store(|s| s.job_fail_terminal(jobid, funcid, message, exit))?;
        Ok(())
    }

    /// Transactionally substitute this job: insert every replacement into
    /// the same shard and complete this job, all or nothing. On error the
    /// transaction has rolled back and the original row is intact.
    pub fn replace_with(&mut self, replacements: Vec<JobSpec>) -> Result<Vec<JobHandle>, ClientError> {
        if !self.guard() {
            return Ok(Vec::new());
        }
        let jobid = self.jobid();
        let funcid = self.funcid;
        let exit = self.exit_spec(0);
        let fault = self.handle.shard().replace_fault();
        let jobids = self
            .handle
            .shard()
            .store(|s| s.job_replace(jobid, funcid, &replacements, exit, fault))?;
        let shard = self.handle.shard().clone();
        Ok(jobids
            .into_iter()
            .map(|jobid| JobHandle::new(shard.clone(), jobid))
            .collect())
    }

    /// Extend the lease by `new_seconds` from now. Loses cleanly: a 0-row
    /// conditional update means another worker reclaimed the job after
    /// expiry, and this worker must abandon it.
    pub fn refresh_lease(&mut self, new_seconds: i64) -> Result<(), ClientError> {
        let jobid = self.jobid();
        let observed = self.grabbed_until;
        let updated = self
            .handle
            .shard()
            .store(|s| s.job_grab(jobid, observed, new_seconds))?;
        match updated {
            Some(grabbed_until) => {
                self.grabbed_until = grabbed_until;
                Ok(())
            }
            None => Err(ClientError::LeaseLost { jobid }),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("shard", self.handle.shard_id())
            .field("jobid", &self.jobid())
            .field("funcname", &self.funcname)
            .field("grabbed_until", &self.grabbed_until)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}
