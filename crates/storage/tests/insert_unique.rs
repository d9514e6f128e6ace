#![forbid(unsafe_code)]

use dray_storage::{InsertOutcome, JobSpec, ShardStore, StoreError};
use std::path::PathBuf;

fn temp_db(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    base.join(format!("dray_storage_{test_name}_{pid}_{nonce}.db"))
}

#[test]
fn duplicate_uniqkey_resolves_to_existing_row() {
    let mut store = ShardStore::open_in_memory("").expect("open");

    let mut spec = JobSpec::new("dedupe", b"{\"n\":1}".to_vec());
    spec.uniqkey = Some("K".to_string());

    let first = store.job_insert(&spec).expect("first insert");
    let second = store.job_insert(&spec).expect("second insert");

    let InsertOutcome::Inserted { jobid } = first else {
        panic!("expected fresh insert, got {first:?}");
    };
    assert_eq!(second, InsertOutcome::Existing { jobid });

    let rows = store.job_list("dedupe", 10).expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].jobid, jobid);
}

#[test]
fn same_uniqkey_different_funcs_do_not_collide() {
    let mut store = ShardStore::open_in_memory("").expect("open");

    let mut a = JobSpec::new("alpha", b"{}".to_vec());
    a.uniqkey = Some("K".to_string());
    let mut b = JobSpec::new("beta", b"{}".to_vec());
    b.uniqkey = Some("K".to_string());

    assert!(matches!(
        store.job_insert(&a).expect("insert alpha"),
        InsertOutcome::Inserted { .. }
    ));
    assert!(matches!(
        store.job_insert(&b).expect("insert beta"),
        InsertOutcome::Inserted { .. }
    ));
}

#[test]
fn funcnames_intern_to_stable_ids() {
    let mut store = ShardStore::open_in_memory("").expect("open");
    let first = store.func_id("mail").expect("funcid");
    let again = store.func_id("mail").expect("funcid again");
    let other = store.func_id("billing").expect("other funcid");
    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(
        store.func_name(first).expect("func_name"),
        Some("mail".to_string())
    );
    assert_eq!(store.func_name(9999).expect("missing"), None);
}

#[test]
fn batch_insert_is_transactional_per_shard() {
    let mut store = ShardStore::open_in_memory("").expect("open");

    let mut keyed = JobSpec::new("batch", b"{}".to_vec());
    keyed.uniqkey = Some("once".to_string());

    let outcomes = store
        .job_insert_batch(&[
            JobSpec::new("batch", b"{}".to_vec()),
            keyed.clone(),
            keyed.clone(),
        ])
        .expect("batch");
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[1], InsertOutcome::Inserted { .. }));
    // The duplicate in the same batch resolves to its sibling.
    assert_eq!(outcomes[2].jobid(), outcomes[1].jobid());
}

#[test]
fn rejects_invalid_funcname_and_overlong_keys() {
    let mut store = ShardStore::open_in_memory("").expect("open");

    let err = store
        .job_insert(&JobSpec::new("", b"{}".to_vec()))
        .expect_err("expected invalid funcname");
    assert_eq!(err.code(), "INVALID_INPUT");

    let mut spec = JobSpec::new("ok", b"{}".to_vec());
    spec.uniqkey = Some("k".repeat(300));
    let err = store.job_insert(&spec).expect_err("expected overlong uniqkey");
    match err {
        StoreError::InvalidInput(message) => assert_eq!(message, "uniqkey is too long"),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
}

#[test]
fn prefixed_tables_survive_reopen() {
    let path = temp_db("prefixed_tables_survive_reopen");
    let jobid = {
        let mut store = ShardStore::open(&path, "q_").expect("open");
        assert_eq!(store.tables().job, "q_job");
        store
            .job_insert(&JobSpec::new("persist", b"{}".to_vec()))
            .expect("insert")
            .jobid()
    };

    // Reopen runs the full migration again; it must be a no-op.
    let store = ShardStore::open(&path, "q_").expect("reopen");
    let row = store.job_get(jobid).expect("get").expect("row present");
    assert_eq!(row.jobid, jobid);
}

#[test]
fn rejects_bad_table_prefix() {
    let err = ShardStore::open_in_memory("Bad-Prefix").expect_err("expected prefix rejection");
    assert_eq!(err.code(), "INVALID_INPUT");
}
