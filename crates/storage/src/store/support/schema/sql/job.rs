#![forbid(unsafe_code)]

use super::super::super::super::Tables;

pub(super) fn sql(t: &Tables) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {job} (
          jobid INTEGER PRIMARY KEY AUTOINCREMENT,
          funcid INTEGER NOT NULL,
          arg BLOB NOT NULL,
          uniqkey TEXT,
          insert_time INTEGER NOT NULL,
          run_after INTEGER NOT NULL,
          grabbed_until INTEGER NOT NULL DEFAULT 0,
          priority INTEGER NOT NULL DEFAULT 0,
          coalesce TEXT
        );
"#,
        job = t.job
    )
}
