#![forbid(unsafe_code)]

use super::super::super::super::Tables;

pub(super) fn sql(t: &Tables) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {funcmap} (
          funcid INTEGER PRIMARY KEY AUTOINCREMENT,
          funcname TEXT NOT NULL UNIQUE
        );
"#,
        funcmap = t.funcmap
    )
}
