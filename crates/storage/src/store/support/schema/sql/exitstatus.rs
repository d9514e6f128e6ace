#![forbid(unsafe_code)]

use super::super::super::super::Tables;

pub(super) fn sql(t: &Tables) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {exitstatus} (
          jobid INTEGER PRIMARY KEY,
          funcid INTEGER NOT NULL DEFAULT 0,
          status INTEGER NOT NULL,
          completion_time INTEGER NOT NULL,
          delete_after INTEGER NOT NULL
        );
"#,
        exitstatus = t.exitstatus
    )
}
