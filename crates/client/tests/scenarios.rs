#![forbid(unsafe_code)]

use dray_client::{
    Client, ClientConfig, ClientError, DatabaseConfig, FaultInjection, InsertOpts, Job,
    ReplaceWithFault, WorkError, Worker,
};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

fn temp_db(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    base.join(format!("dray_client_{test_name}_{pid}_{nonce}.db"))
}

fn config_for(path: &Path) -> ClientConfig {
    ClientConfig {
        databases: vec![DatabaseConfig::new("primary", path)],
        prefix: String::new(),
        verbose: false,
        retry_seconds: 60,
        fault_injection: FaultInjection::default(),
    }
}

struct Add {
    seen: Arc<Mutex<Option<Value>>>,
}

impl Worker for Add {
    fn name(&self) -> &str {
        "add"
    }

    fn grab_for(&self) -> i64 {
        60
    }

    fn work(&self, job: &mut Job) -> Result<(), WorkError> {
        *self.seen.lock().expect("seen lock") = Some(job.arg().clone());
        Ok(())
    }
}

#[test]
fn insert_grab_complete_round_trip() {
    let path = temp_db("insert_grab_complete_round_trip");
    let client = Client::new(config_for(&path)).expect("client");
    let seen = Arc::new(Mutex::new(None));
    client
        .can("add", Arc::new(Add { seen: seen.clone() }))
        .expect("can");

    let handle = client
        .insert("add", &json!({"numbers": [1, 2]}))
        .expect("insert");

    assert!(client.work_once().expect("work once"));
    assert_eq!(
        seen.lock().expect("seen lock").clone(),
        Some(json!({"numbers": [1, 2]}))
    );

    // Row destroyed on completion: nothing left to grab or look up.
    assert!(!client.work_once().expect("second work once"));
    assert!(client.lookup_job(&handle).expect("lookup").is_none());
}

struct Merge {
    dict: Arc<Mutex<Map<String, Value>>>,
}

impl Worker for Merge {
    fn name(&self) -> &str {
        "merge"
    }

    fn grab_for(&self) -> i64 {
        60
    }

    fn work(&self, job: &mut Job) -> Result<(), WorkError> {
        let object = job.arg().as_object().ok_or("arg must be an object")?;
        let mut dict = self.dict.lock().expect("dict lock");
        for (key, value) in object {
            dict.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

#[test]
fn work_until_done_drains_all_jobs() {
    let path = temp_db("work_until_done_drains_all_jobs");
    let client = Client::new(config_for(&path)).expect("client");
    let dict = Arc::new(Mutex::new(Map::new()));
    client
        .can("merge", Arc::new(Merge { dict: dict.clone() }))
        .expect("can");

    client.insert("merge", &json!({"foo": "bar"})).expect("insert");
    client.insert("merge", &json!({"bar": "baz"})).expect("insert");
    client.insert("merge", &json!({"baz": "foo"})).expect("insert");

    client.work_until_done().expect("work until done");

    let merged = Value::Object(dict.lock().expect("dict lock").clone());
    assert_eq!(merged, json!({"foo": "bar", "bar": "baz", "baz": "foo"}));
    assert!(client.list_jobs("merge", 10).expect("list").is_empty());
}

struct Div;

impl Worker for Div {
    fn name(&self) -> &str {
        "div"
    }

    fn grab_for(&self) -> i64 {
        60
    }

    fn max_retries(&self, _job: &Job) -> i64 {
        1
    }

    fn retry_delay(&self, failures: i64) -> i64 {
        1 << failures
    }

    fn keep_exit_status_for(&self) -> i64 {
        3_600
    }

    fn work(&self, job: &mut Job) -> Result<(), WorkError> {
        let d = job.arg()["d"].as_i64().ok_or("d must be an integer")?;
        if d == 0 {
            return Err("division by zero".into());
        }
        Ok(())
    }
}

#[test]
fn failure_retries_once_then_goes_terminal() {
    let path = temp_db("failure_retries_once_then_goes_terminal");
    let client = Client::new(config_for(&path)).expect("client");
    client.can("div", Arc::new(Div)).expect("can");

    let handle = client.insert("div", &json!({"n": 5, "d": 0})).expect("insert");

    // First attempt fails; one retry is allowed, so the row returns to the
    // pool with run_after pushed out by retry_delay(1) = 2 seconds.
    assert!(client.work_once().expect("first attempt"));
    assert_eq!(handle.failures().expect("failures"), 1);
    let log = handle.failure_log().expect("failure log");
    assert!(log[0].message.contains("division"));

    let job = client
        .lookup_job(&handle)
        .expect("lookup")
        .expect("job still present");
    assert_eq!(job.grabbed_until(), 0);

    // Not due yet.
    assert!(!client.work_once().expect("too early"));

    // Instead of sleeping past retry_delay, rewind run_after directly.
    let conn = rusqlite::Connection::open(&path).expect("raw open");
    conn.execute("UPDATE job SET run_after = 0", [])
        .expect("rewind run_after");

    // Second attempt exhausts max_retries: the row is destroyed and a
    // non-zero exit status is retained.
    assert!(client.work_once().expect("second attempt"));
    assert_eq!(handle.failures().expect("failures"), 2);
    assert!(client.lookup_job(&handle).expect("lookup").is_none());
    let exit = handle
        .exit_status()
        .expect("exit status")
        .expect("exit row present");
    assert_ne!(exit.status, 0);
}

#[test]
fn concurrent_uniqkey_inserts_yield_one_row() {
    let path = temp_db("concurrent_uniqkey_inserts_yield_one_row");
    let producer_a = Client::new(config_for(&path)).expect("client a");
    let producer_b = Client::new(config_for(&path)).expect("client b");

    let barrier = Arc::new(Barrier::new(2));
    let spawn = |client: Client, barrier: Arc<Barrier>| {
        std::thread::spawn(move || {
            barrier.wait();
            let opts = InsertOpts {
                uniqkey: Some("K".to_string()),
                ..InsertOpts::default()
            };
            client
                .insert_with("dedupe", &json!({"payload": true}), opts)
                .expect("insert")
                .jobid()
        })
    };

    let a = spawn(producer_a, barrier.clone());
    let b = spawn(producer_b, barrier);
    let jobid_a = a.join().expect("join a");
    let jobid_b = b.join().expect("join b");

    assert_eq!(jobid_a, jobid_b);
    let observer = Client::new(config_for(&path)).expect("observer");
    assert_eq!(observer.list_jobs("dedupe", 10).expect("list").len(), 1);
}

struct Split;

impl Worker for Split {
    fn name(&self) -> &str {
        "split"
    }

    fn grab_for(&self) -> i64 {
        60
    }

    fn work(&self, job: &mut Job) -> Result<(), WorkError> {
        let replacements = vec![
            Client::job_spec("split_child", &json!({"part": 1}), InsertOpts::default())?,
            Client::job_spec("split_child", &json!({"part": 2}), InsertOpts::default())?,
        ];
        job.replace_with(replacements)?;
        Ok(())
    }
}

#[test]
fn replace_with_commits_substitution() {
    let path = temp_db("replace_with_commits_substitution");
    let client = Client::new(config_for(&path)).expect("client");
    client.can("split", Arc::new(Split)).expect("can");

    client.insert("split", &json!({})).expect("insert");
    assert!(client.work_once().expect("work"));

    assert!(client.list_jobs("split", 10).expect("list split").is_empty());
    let children = client.list_jobs("split_child", 10).expect("list children");
    assert_eq!(children.len(), 2);
}

#[test]
fn replace_with_rolls_back_on_injected_fault() {
    let path = temp_db("replace_with_rolls_back_on_injected_fault");
    let mut config = config_for(&path);
    config.fault_injection = FaultInjection {
        replace_with: Some(ReplaceWithFault::RollbackAfterInsert),
    };
    let client = Client::new(config).expect("client");

    let failures = Arc::new(Mutex::new(Vec::new()));
    struct FaultySplit {
        failures: Arc<Mutex<Vec<String>>>,
    }
    impl Worker for FaultySplit {
        fn name(&self) -> &str {
            "split"
        }
        fn grab_for(&self) -> i64 {
            60
        }
        fn work(&self, job: &mut Job) -> Result<(), WorkError> {
            let spec = Client::job_spec("split_child", &json!({}), InsertOpts::default())?;
            match job.replace_with(vec![spec]) {
                Ok(_) => Err("replace unexpectedly committed".into()),
                Err(ClientError::Storage(err)) => {
                    self.failures.lock().expect("lock").push(err.code().to_string());
                    Ok(())
                }
                Err(other) => Err(other.into()),
            }
        }
    }
    client
        .can(
            "split",
            Arc::new(FaultySplit {
                failures: failures.clone(),
            }),
        )
        .expect("can");

    client.insert("split", &json!({})).expect("insert");
    assert!(client.work_once().expect("work"));

    assert_eq!(
        failures.lock().expect("lock").as_slice(),
        ["REPLACE_ABORTED"]
    );
    // Rolled back: the original survives, no children were created.
    assert_eq!(client.list_jobs("split", 10).expect("list split").len(), 1);
    assert!(
        client
            .list_jobs("split_child", 10)
            .expect("list children")
            .is_empty()
    );
}

struct Count {
    runs: Arc<AtomicUsize>,
}

impl Worker for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn grab_for(&self) -> i64 {
        60
    }

    fn work(&self, _job: &mut Job) -> Result<(), WorkError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn racing_workers_run_a_job_exactly_once() {
    let path = temp_db("racing_workers_run_a_job_exactly_once");
    let runs = Arc::new(AtomicUsize::new(0));

    let make_client = || {
        let client = Client::new(config_for(&path)).expect("client");
        client
            .can("count", Arc::new(Count { runs: runs.clone() }))
            .expect("can");
        client
    };
    let worker_a = make_client();
    let worker_b = make_client();

    worker_a.insert("count", &json!({})).expect("insert");

    let barrier = Arc::new(Barrier::new(2));
    let race = |client: Client, barrier: Arc<Barrier>| {
        std::thread::spawn(move || {
            barrier.wait();
            client.work_once().expect("work once")
        })
    };
    let a = race(worker_a, barrier.clone());
    let b = race(worker_b, barrier);
    let did_a = a.join().expect("join a");
    let did_b = b.join().expect("join b");

    // Exactly one grab succeeded; the loser saw no eligible rows.
    assert!(did_a ^ did_b, "expected exactly one winner");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
