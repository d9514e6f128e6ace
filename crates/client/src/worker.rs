#![forbid(unsafe_code)]

use crate::job::Job;

pub type WorkError = Box<dyn std::error::Error + Send + Sync>;

/// Behavior contract for one funcname. A descriptor is registered under its
/// `handles()` names and consulted for retry policy, lease length and exit
/// status retention whenever one of its jobs reaches a terminal method.
pub trait Worker: Send + Sync {
    /// Primary funcname of this descriptor.
    fn name(&self) -> &str;

    /// Every funcname this descriptor handles.
    fn handles(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }

    /// Failures a job may accumulate before it is destroyed; 0 means one
    /// attempt only.
    fn max_retries(&self, _job: &Job) -> i64 {
        0
    }

    /// Seconds to hold a job out of the free pool after its Nth failure.
    fn retry_delay(&self, _failures: i64) -> i64 {
        0
    }

    /// Lease duration in seconds when grabbing. Must be an upper bound on
    /// the expected execution time; after it passes any worker may reclaim
    /// the job. Long-running work should call `Job::refresh_lease`.
    fn grab_for(&self) -> i64;

    /// Seconds to retain the exit status row after completion; 0 disables
    /// exit status recording entirely.
    fn keep_exit_status_for(&self) -> i64 {
        0
    }

    /// Run one leased job. Call exactly one of `completed`, `failed`,
    /// `permanent_failure` or `replace_with`; returning `Ok` without one
    /// counts as success, returning `Err` counts as a failure with the
    /// error's message.
    fn work(&self, job: &mut Job) -> Result<(), WorkError>;
}
