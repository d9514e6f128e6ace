#![forbid(unsafe_code)]

mod error;
mod exitstatus;
mod funcmap;
mod indexes;
mod job;
mod pragmas;

use super::super::super::Tables;

pub(super) fn full_schema_sql(tables: &Tables) -> String {
    let mut sql = String::new();
    sql.push_str(pragmas::SQL);
    sql.push_str(&funcmap::sql(tables));
    sql.push_str(&job::sql(tables));
    sql.push_str(&error::sql(tables));
    sql.push_str(&exitstatus::sql(tables));
    sql.push_str(&indexes::sql(tables));
    sql
}
