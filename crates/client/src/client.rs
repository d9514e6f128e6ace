#![forbid(unsafe_code)]

use crate::config::{ClientConfig, ReplaceWithFault};
use crate::error::ClientError;
use crate::handle::JobHandle;
use crate::job::Job;
use crate::registry::AbilityRegistry;
use crate::shard::Shard;
use crate::support::now_secs;
use crate::worker::Worker;
use dray_core::arg;
use dray_core::ids::{ShardId, validate_funcname};
use dray_storage::{CoalescePref, ExitSpec, JobRow, JobSpec, ReplaceFault, ShardStore};
use rand::Rng;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const GRAB_BATCH: usize = 50;

thread_local! {
    static CURRENT_JOB: RefCell<Option<JobHandle>> = const { RefCell::new(None) };
}

/// Recognized insertion options.
#[derive(Clone, Debug, Default)]
pub struct InsertOpts {
    pub uniqkey: Option<String>,
    pub run_after: Option<i64>,
    pub priority: i64,
    pub coalesce: Option<String>,
}

/// The queue client: owns the shard set and the ability registry, inserts
/// with a weighted draw over healthy shards, and drives the worker loops.
/// Safe to share across worker threads.
pub struct Client {
    shards: Vec<Arc<Shard>>,
    registry: RwLock<AbilityRegistry>,
    verbose: bool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("shards", &self.shards.len())
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.databases.is_empty() {
            return Err(ClientError::InvalidInput(
                "at least one database is required",
            ));
        }
        if config.retry_seconds <= 0 {
            return Err(ClientError::InvalidInput("retry_seconds must be > 0"));
        }
        let replace_fault = config.fault_injection.replace_with.map(|fault| match fault {
            ReplaceWithFault::RollbackAfterInsert => ReplaceFault::RollbackAfterInsert,
        });

        let mut shards = Vec::with_capacity(config.databases.len());
        let mut seen = HashSet::new();
        for db in &config.databases {
            let id = ShardId::try_new(db.id.clone())
                .map_err(|_| ClientError::InvalidInput("shard id is invalid"))?;
            if !seen.insert(id.clone()) {
                return Err(ClientError::InvalidInput("duplicate shard id"));
            }
            if db.weight == 0 {
                return Err(ClientError::InvalidInput("shard weight must be > 0"));
            }
            let store = ShardStore::open(&db.path, &config.prefix)?;
            shards.push(Arc::new(Shard::new(
                id,
                store,
                db.weight,
                config.retry_seconds,
                replace_fault,
            )));
        }

        Ok(Self {
            shards,
            registry: RwLock::new(AbilityRegistry::new()),
            verbose: config.verbose,
        })
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    /// Register a descriptor under an explicit funcname.
    pub fn can(&self, funcname: &str, worker: Arc<dyn Worker>) -> Result<(), ClientError> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .can(funcname, worker)
    }

    /// Register a descriptor under every funcname it handles.
    pub fn register(&self, worker: Arc<dyn Worker>) -> Result<(), ClientError> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(worker)
    }

    pub fn reset_abilities(&self) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    fn registry_snapshot(&self) -> AbilityRegistry {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build an encoded job spec from a funcname, argument and options.
    pub fn job_spec(funcname: &str, arg: &Value, opts: InsertOpts) -> Result<JobSpec, ClientError> {
        validate_funcname(funcname).map_err(|_| ClientError::InvalidInput("funcname is invalid"))?;
        let encoded = arg::encode(arg)?;
        Ok(JobSpec {
            funcname: funcname.to_string(),
            arg: encoded,
            uniqkey: opts.uniqkey,
            run_after: opts.run_after,
            priority: opts.priority,
            coalesce: opts.coalesce,
        })
    }

    pub fn insert(&self, funcname: &str, arg: &Value) -> Result<JobHandle, ClientError> {
        self.insert_with(funcname, arg, InsertOpts::default())
    }

    pub fn insert_with(
        &self,
        funcname: &str,
        arg: &Value,
        opts: InsertOpts,
    ) -> Result<JobHandle, ClientError> {
        let spec = Self::job_spec(funcname, arg, opts)?;
        self.insert_spec(spec)
    }

    /// Weighted random draw over the currently-healthy shards; on error the
    /// next drawn shard gets the job, until shards are exhausted. A uniqkey
    /// collision is success and hands back the existing row.
    fn insert_spec(&self, spec: JobSpec) -> Result<JobHandle, ClientError> {
        let now = now_secs();
        let mut available: Vec<Arc<Shard>> = self
            .shards
            .iter()
            .filter(|shard| shard.is_available(now))
            .cloned()
            .collect();

        while !available.is_empty() {
            let index = weighted_draw(&available);
            let shard = available.swap_remove(index);
            match shard.store(|s| s.job_insert(&spec)) {
                Ok(outcome) => return Ok(JobHandle::new(shard.clone(), outcome.jobid())),
                Err(err) => {
                    warn!(shard = %shard.id(), code = err.code(), "insert failed, trying another shard");
                }
            }
        }
        Err(ClientError::NoShardAvailable)
    }

    /// Insert a batch onto one shard in one transaction, falling over to
    /// other healthy shards whole-batch on error.
    pub fn insert_jobs(&self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>, ClientError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_secs();
        let mut available: Vec<Arc<Shard>> = self
            .shards
            .iter()
            .filter(|shard| shard.is_available(now))
            .cloned()
            .collect();

        while !available.is_empty() {
            let index = weighted_draw(&available);
            let shard = available.swap_remove(index);
            match shard.store(|s| s.job_insert_batch(&specs)) {
                Ok(outcomes) => {
                    return Ok(outcomes
                        .into_iter()
                        .map(|outcome| JobHandle::new(shard.clone(), outcome.jobid()))
                        .collect());
                }
                Err(err) => {
                    warn!(shard = %shard.id(), code = err.code(), "batch insert failed, trying another shard");
                }
            }
        }
        Err(ClientError::NoShardAvailable)
    }

    /// One grab attempt across all shards, shuffled for fairness. Transient
    /// shard errors are swallowed here; the shard backs off and the rest of
    /// the pass continues.
    fn grab_job(&self) -> Result<Option<Job>, ClientError> {
        let registry = self.registry_snapshot();
        let funcnames = registry.funcnames();
        if funcnames.is_empty() {
            return Ok(None);
        }

        let now = now_secs();
        let mut order: Vec<Arc<Shard>> = self
            .shards
            .iter()
            .filter(|shard| shard.is_available(now))
            .cloned()
            .collect();
        order.shuffle(&mut rand::thread_rng());

        for shard in order {
            match self.grab_from_shard(&shard, &funcnames, &registry) {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => {}
                Err(err) => {
                    warn!(shard = %shard.id(), code = err.code(), "grab failed on shard");
                }
            }
        }

        // A full cycle of shards without a lease anywhere: coalesce affinity
        // has had its chance and must not be allowed to starve anything.
        for shard in &self.shards {
            shard.set_affinity(None);
        }
        Ok(None)
    }

    fn grab_from_shard(
        &self,
        shard: &Arc<Shard>,
        funcnames: &[String],
        registry: &AbilityRegistry,
    ) -> Result<Option<Job>, ClientError> {
        let funcids = shard.funcids_for(funcnames)?;
        let mut by_funcid: HashMap<i64, (&String, Arc<dyn Worker>)> = HashMap::new();
        for (funcname, funcid) in funcnames.iter().zip(funcids.iter()) {
            let Some(worker) = registry.get(funcname) else {
                continue;
            };
            by_funcid.insert(*funcid, (funcname, worker));
        }

        let affinity = shard.affinity();
        let candidates =
            shard.store(|s| s.grab_candidates(&funcids, GRAB_BATCH, affinity.as_ref()))?;

        for row in candidates {
            let Some((funcname, worker)) = by_funcid.get(&row.funcid) else {
                continue;
            };
            let grab_for = worker.grab_for();
            let Some(grabbed_until) =
                shard.store(|s| s.job_grab(row.jobid, row.grabbed_until, grab_for))?
            else {
                // A competing worker won this row; try the next candidate.
                continue;
            };

            let mut row = row;
            row.grabbed_until = grabbed_until;
            let jobid = row.jobid;
            let funcid = row.funcid;
            match Job::from_row(row, (*funcname).clone(), shard.clone(), Some(worker.clone())) {
                Ok(job) => {
                    let pref = job.coalesce().map(|coalesce| CoalescePref {
                        funcid,
                        coalesce: coalesce.to_string(),
                    });
                    shard.set_affinity(pref);
                    return Ok(Some(job));
                }
                Err(err) => {
                    // The blob never decoded on the producer's terms either;
                    // retrying cannot fix it.
                    warn!(jobid, %err, "undecodable job arg, failing permanently");
                    let keep_for = worker.keep_exit_status_for();
                    let exit = (keep_for > 0).then_some(ExitSpec {
                        status: 1,
                        keep_for,
                    });
                    shard.store(|s| {
                        s.job_fail_terminal(jobid, funcid, &err.to_string(), exit)
                    })?;
                }
            }
        }

        Ok(None)
    }

    /// One unit of the worker loop: grab one job and run it behind the
    /// fault barrier. Returns whether any work happened.
    pub fn work_once(&self) -> Result<bool, ClientError> {
        let Some(mut job) = self.grab_job()? else {
            return Ok(false);
        };
        self.work_safely(&mut job)?;
        Ok(true)
    }

    /// Drain: loop until no shard has an eligible job at the moment of
    /// check.
    pub fn work_until_done(&self) -> Result<(), ClientError> {
        while self.work_once()? {}
        Ok(())
    }

    /// Run forever. When idle, sweep expired exit statuses and sleep
    /// `delay_seconds` with jitter so sibling processes do not thunder.
    pub fn work(&self, delay_seconds: i64) -> Result<(), ClientError> {
        let delay_seconds = delay_seconds.max(1);
        loop {
            match self.work_once() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(code = err.code(), "work iteration failed");
                }
            }
            self.sweep_exit_statuses();
            if self.verbose {
                debug!(delay_seconds, "queue idle");
            }
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay_seconds as u64 * 250));
            thread::sleep(Duration::from_secs(delay_seconds as u64) + Duration::from_millis(jitter_ms));
        }
    }

    /// Fault barrier around a descriptor's `work`: an error becomes
    /// `job.failed(message)`, a normal return without a terminal call counts
    /// as success. Worker mistakes never propagate past this point.
    pub fn work_safely(&self, job: &mut Job) -> Result<(), ClientError> {
        let Some(worker) = job.worker() else {
            return Err(ClientError::UnknownFunction {
                funcname: job.funcname().to_string(),
            });
        };
        set_current_job(Some(job.handle().clone()));
        let outcome = worker.work(job);
        set_current_job(None);
        match outcome {
            Ok(()) => job.completed(),
            Err(err) => {
                debug!(jobid = job.jobid(), %err, "worker raised");
                job.failed(&err.to_string())
            }
        }
    }

    /// The job this worker thread is currently running, re-materialized
    /// from its handle; `None` outside of `work`.
    pub fn current_job(&self) -> Result<Option<Job>, ClientError> {
        let handle = CURRENT_JOB.with(|slot| slot.borrow().clone());
        match handle {
            Some(handle) => self.lookup_job(&handle),
            None => Ok(None),
        }
    }

    pub fn lookup_job(&self, handle: &JobHandle) -> Result<Option<Job>, ClientError> {
        let jobid = handle.jobid();
        let Some(row) = handle.shard().store(|s| s.job_get(jobid))? else {
            return Ok(None);
        };
        let funcname = handle
            .shard()
            .func_name(row.funcid)?
            .ok_or(ClientError::InvalidInput("job funcid is not interned"))?;
        let worker = self.registry_snapshot().get(&funcname);
        Job::from_row(row, funcname, handle.shard().clone(), worker).map(Some)
    }

    /// Jobs currently queued for `funcname`, walking shards in declaration
    /// order up to `limit`.
    pub fn list_jobs(&self, funcname: &str, limit: usize) -> Result<Vec<Job>, ClientError> {
        validate_funcname(funcname).map_err(|_| ClientError::InvalidInput("funcname is invalid"))?;
        let registry = self.registry_snapshot();
        let now = now_secs();
        let mut jobs = Vec::new();
        for shard in &self.shards {
            if jobs.len() >= limit {
                break;
            }
            if !shard.is_available(now) {
                continue;
            }
            let rows: Vec<JobRow> = match shard.store(|s| s.job_list(funcname, limit - jobs.len())) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(shard = %shard.id(), code = err.code(), "list failed on shard");
                    continue;
                }
            };
            for row in rows {
                let worker = registry.get(funcname);
                jobs.push(Job::from_row(
                    row,
                    funcname.to_string(),
                    shard.clone(),
                    worker,
                )?);
            }
        }
        Ok(jobs)
    }

    /// Remove expired exit status rows on every healthy shard. Returns the
    /// number of rows removed; per-shard errors only log and back off.
    pub fn sweep_exit_statuses(&self) -> usize {
        let now = now_secs();
        let mut removed = 0;
        for shard in &self.shards {
            if !shard.is_available(now) {
                continue;
            }
            match shard.store(|s| s.exitstatus_sweep()) {
                Ok(count) => removed += count,
                Err(err) => {
                    warn!(shard = %shard.id(), code = err.code(), "exitstatus sweep failed");
                }
            }
        }
        removed
    }
}

fn set_current_job(handle: Option<JobHandle>) {
    CURRENT_JOB.with(|slot| *slot.borrow_mut() = handle);
}

fn weighted_draw(shards: &[Arc<Shard>]) -> usize {
    let total: u64 = shards.iter().map(|shard| shard.weight() as u64).sum();
    let mut roll = rand::thread_rng().gen_range(0..total);
    for (index, shard) in shards.iter().enumerate() {
        let weight = shard.weight() as u64;
        if roll < weight {
            return index;
        }
        roll -= weight;
    }
    shards.len() - 1
}
