#![forbid(unsafe_code)]

#[derive(Clone, Debug)]
pub struct ErrorRow {
    pub error_time: i64,
    pub jobid: i64,
    pub funcid: i64,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct ExitStatusRow {
    pub jobid: i64,
    pub funcid: i64,
    pub status: i64,
    pub completion_time: i64,
    pub delete_after: i64,
}
