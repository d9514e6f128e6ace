#![forbid(unsafe_code)]

use super::super::super::super::Tables;

pub(super) fn sql(t: &Tables) -> String {
    format!(
        r#"
        CREATE INDEX IF NOT EXISTS idx_{job}_ready ON {job}(funcid, run_after, grabbed_until);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_{job}_uniqkey ON {job}(funcid, uniqkey) WHERE uniqkey IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_{job}_coalesce ON {job}(funcid, coalesce) WHERE coalesce IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_{error}_jobid ON {error}(jobid);
        CREATE INDEX IF NOT EXISTS idx_{exitstatus}_delete_after ON {exitstatus}(delete_after);
"#,
        job = t.job,
        error = t.error,
        exitstatus = t.exitstatus
    )
}
