#![forbid(unsafe_code)]

mod schema;
mod time;

pub(super) use schema::migrate_sqlite_schema;
pub(super) use time::now_secs;
