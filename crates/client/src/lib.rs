#![forbid(unsafe_code)]
//! Reliable database-backed job queue client.
//!
//! Producers insert work items addressed by a symbolic function name;
//! workers across any number of processes atomically grab items due for
//! execution and report completion, transient failure (with bounded retry
//! and backoff) or permanent failure. Persistence is one or more independent
//! SQLite shards which this client multiplexes over; exclusivity comes from
//! clock-based leases acquired with a conditional update, never from locks
//! held across user code.

mod client;
mod config;
mod error;
mod handle;
mod job;
mod registry;
mod shard;
mod support;
mod worker;

pub use client::{Client, InsertOpts};
pub use config::{ClientConfig, DatabaseConfig, FaultInjection, ReplaceWithFault};
pub use error::ClientError;
pub use handle::JobHandle;
pub use job::Job;
pub use registry::AbilityRegistry;
pub use shard::{Shard, ShardHealth};
pub use worker::{WorkError, Worker};

pub use dray_core::arg::ArgError;
pub use dray_core::ids::ShardId;
pub use dray_storage::{ErrorRow, ExitStatusRow, JobSpec, StoreError};
