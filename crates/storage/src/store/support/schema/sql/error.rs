#![forbid(unsafe_code)]

use super::super::super::super::Tables;

pub(super) fn sql(t: &Tables) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {error} (
          error_time INTEGER NOT NULL,
          jobid INTEGER NOT NULL,
          funcid INTEGER NOT NULL DEFAULT 0,
          message TEXT NOT NULL
        );
"#,
        error = t.error
    )
}
