#![forbid(unsafe_code)]

use crate::error::ClientError;
use crate::shard::Shard;
use dray_core::ids::ShardId;
use dray_storage::{ErrorRow, ExitStatusRow};
use std::sync::Arc;

const DEFAULT_FAILURE_LOG_LIMIT: usize = 100;

/// Persistent reference to one job: `(shard, jobid)`. Valid across
/// processes; the audit queries below keep answering after the job row
/// itself is gone.
#[derive(Clone, Debug)]
pub struct JobHandle {
    shard: Arc<Shard>,
    jobid: i64,
}

impl JobHandle {
    pub(crate) fn new(shard: Arc<Shard>, jobid: i64) -> Self {
        Self { shard, jobid }
    }

    pub fn shard_id(&self) -> &ShardId {
        self.shard.id()
    }

    pub fn jobid(&self) -> i64 {
        self.jobid
    }

    pub(crate) fn shard(&self) -> &Arc<Shard> {
        &self.shard
    }

    /// Number of failures recorded so far (error rows for this jobid).
    pub fn failures(&self) -> Result<i64, ClientError> {
        Ok(self.shard.store(|s| s.failures(self.jobid))?)
    }

    pub fn failure_log(&self) -> Result<Vec<ErrorRow>, ClientError> {
        self.failure_log_limit(DEFAULT_FAILURE_LOG_LIMIT)
    }

    pub fn failure_log_limit(&self, limit: usize) -> Result<Vec<ErrorRow>, ClientError> {
        Ok(self.shard.store(|s| s.failure_log(self.jobid, limit))?)
    }

    pub fn exit_status(&self) -> Result<Option<ExitStatusRow>, ClientError> {
        Ok(self.shard.store(|s| s.exit_status(self.jobid))?)
    }
}
