#![forbid(unsafe_code)]

/// One persisted job row, exactly as stored.
#[derive(Clone, Debug)]
pub struct JobRow {
    pub jobid: i64,
    pub funcid: i64,
    pub arg: Vec<u8>,
    pub uniqkey: Option<String>,
    pub insert_time: i64,
    pub run_after: i64,
    pub grabbed_until: i64,
    pub priority: i64,
    pub coalesce: Option<String>,
}

/// Everything needed to create a job row. `run_after` defaults to the
/// insertion instant when absent.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub funcname: String,
    pub arg: Vec<u8>,
    pub uniqkey: Option<String>,
    pub run_after: Option<i64>,
    pub priority: i64,
    pub coalesce: Option<String>,
}

impl JobSpec {
    pub fn new(funcname: impl Into<String>, arg: Vec<u8>) -> Self {
        Self {
            funcname: funcname.into(),
            arg,
            uniqkey: None,
            run_after: None,
            priority: 0,
            coalesce: None,
        }
    }
}

/// Insert result. A uniqkey collision is not an error: the insert resolves
/// to the row that already carries the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { jobid: i64 },
    Existing { jobid: i64 },
}

impl InsertOutcome {
    pub fn jobid(self) -> i64 {
        match self {
            Self::Inserted { jobid } | Self::Existing { jobid } => jobid,
        }
    }
}

/// Job columns addressable by the conditional-update primitive. Closed set;
/// the lease protocol only ever guards and writes these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobField {
    RunAfter,
    GrabbedUntil,
    Priority,
}

impl JobField {
    pub fn column(self) -> &'static str {
        match self {
            Self::RunAfter => "run_after",
            Self::GrabbedUntil => "grabbed_until",
            Self::Priority => "priority",
        }
    }
}

/// Grab-time affinity: prefer candidates with the same `(funcid, coalesce)`
/// as the last job grabbed on this shard.
#[derive(Clone, Debug)]
pub struct CoalescePref {
    pub funcid: i64,
    pub coalesce: String,
}

/// Exit-status retention request. `keep_for` is seconds past completion.
#[derive(Clone, Copy, Debug)]
pub struct ExitSpec {
    pub status: i64,
    pub keep_for: i64,
}

/// Test-only fault points for the replace transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplaceFault {
    RollbackAfterInsert,
}
