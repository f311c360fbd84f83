//! The backend contract: one trait every resource manager adapter implements.
//!
//! The [`Lrms`] trait defines the lifecycle the engine drives for every
//! batch job, whatever scheduler sits on the other side:
//!
//! ```text
//!   submit_job() ──→ update_job_state() ··· ──→ get_results() ──→ free()
//!     (async)           (async, polled)            (async)        (async)
//!                            │
//!                            └──→ cancel_job() at any point
//! ```
//!
//! ## Design principles
//!
//! - **Async-native**: every method that talks to the resource is async.
//! - **Thread-safe**: `Send + Sync` bound enables shared ownership behind
//!   `Arc<dyn Lrms>`.
//! - **Caller-owned jobs**: adapters never store jobs; they write
//!   observations into the `&mut Job` they are handed, and the borrow
//!   rules serialize calls on one job for free.
//! - **Observations only**: adapters report the remote state; lifecycle
//!   decisions (closing records, retries) belong to the driver above.
//!
//! ## Method table
//!
//! | Method | Kind | Returns |
//! |--------|------|---------|
//! | `name()` | sync | `&str` |
//! | `limits()` | sync | `&LrmsLimits` |
//! | `submit_job()` | async | `LrmsResult<()>` |
//! | `update_job_state()` | async | `LrmsResult<RunState>` |
//! | `get_accounting()` | async | `LrmsResult<Option<AccountingRecord>>` |
//! | `cancel_job()` | async | `LrmsResult<()>` |
//! | `get_results()` | async | `LrmsResult<Vec<PathBuf>>` |
//! | `free()` | async | `LrmsResult<()>` |
//! | `get_resource_status()` | async | `LrmsResult<ResourceSnapshot>` |
//! | `peek()` | async | `LrmsResult<Vec<u8>>` |
//! | `close()` | async | `LrmsResult<()>` |

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use gridr_units::{Duration, Memory};

use crate::error::LrmsResult;
use crate::job::{Arch, Job, JobRequest};
use crate::run::{ExitStatus, RunState};

/// Static capacity limits a resource declares about itself.
///
/// The driver matches a [`JobRequest`] against these before attempting a
/// submission, so obviously-impossible requests fail locally instead of
/// bouncing off the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrmsLimits {
    /// Total execution slots on the resource.
    pub max_cores: u32,
    /// Largest number of slots a single job may take.
    pub max_cores_per_job: u32,
    /// Largest memory-per-core request the resource accepts.
    pub max_memory_per_core: Memory,
    /// Longest wall-clock time a job may run.
    pub max_walltime: Duration,
    /// Architectures present on the resource. Empty means unconstrained.
    pub architectures: Vec<Arch>,
}

impl LrmsLimits {
    /// Whether a request fits inside these limits.
    ///
    /// Unconstrained request fields always fit; an architecture requirement
    /// is checked only when the resource declares its architectures.
    pub fn admits(&self, request: &JobRequest) -> bool {
        if request.cores > self.max_cores_per_job || request.cores > self.max_cores {
            return false;
        }
        if let Some(memory) = request.memory_per_core {
            if memory > self.max_memory_per_core {
                return false;
            }
        }
        if let Some(walltime) = request.walltime {
            if walltime > self.max_walltime {
                return false;
            }
        }
        if let Some(arch) = request.architecture {
            if !self.architectures.is_empty() && !self.architectures.contains(&arch) {
                return false;
            }
        }
        true
    }
}

/// Point-in-time occupancy of a resource, from its live queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Total execution slots, for backends that report them.
    pub total_slots: Option<u32>,
    /// Currently idle slots, for backends that report them.
    pub free_slots: Option<u32>,
    /// Jobs currently executing, all users.
    pub total_running: u32,
    /// Jobs waiting in the queue, all users.
    pub total_queued: u32,
    /// Jobs currently executing that belong to the configured user.
    pub own_running: u32,
    /// Jobs waiting in the queue that belong to the configured user.
    pub own_queued: u32,
    /// When the queue was actually observed. Cached snapshots keep the
    /// observation time, not the cache-hit time.
    pub observed_at: DateTime<Utc>,
}

/// Accounted usage of a finished job, as the scheduler recorded it.
///
/// Timestamps are naive on purpose: they are read off the scheduler's
/// clock in the scheduler's timezone, and pretending to know their UTC
/// offset would be inventing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingRecord {
    /// Slots the job actually held.
    pub cores: u32,
    /// Wall-clock time from start to end.
    pub duration: Duration,
    /// CPU time summed over all slots.
    pub used_cpu_time: Duration,
    /// Peak virtual memory over all steps, when the scheduler sampled it.
    pub max_used_memory: Option<Memory>,
    /// Peak resident set size over all steps, when sampled.
    pub max_used_rss: Option<Memory>,
    /// When the scheduler accepted the job.
    pub submitted_at: Option<NaiveDateTime>,
    /// When the job started executing.
    pub started_at: Option<NaiveDateTime>,
    /// When the job finished.
    pub completed_at: Option<NaiveDateTime>,
    /// Exit status reconstructed from the scheduler's record.
    pub exit_status: Option<ExitStatus>,
}

/// A batch-system backend (LRMS: local resource management system).
///
/// # Contract
///
/// - `name()` and `limits()` MUST be synchronous and infallible; both are
///   fixed at construction time.
/// - `submit_job()` stages inputs into a fresh sandbox, submits, and
///   records the backend job id and sandbox path on the job's execution
///   record. It MUST NOT change the lifecycle state: the driver moves the
///   record to `SUBMITTED` when the call returns.
/// - `update_job_state()` observes the remote state and applies it through
///   `Run::transition`. When the job has left the live queue it consults
///   accounting for the final record; while neither source answers it
///   keeps the last observed state for a configured grace window, and only
///   after that window does it move the job to `UNKNOWN` and surface
///   `TransientInfoSystem`. A later successful observation recovers the
///   job out of `UNKNOWN`.
/// - `get_accounting()` is best-effort: `Ok(None)` when the scheduler has
///   no final record (yet), an error only for malformed answers.
/// - `cancel_job()` MUST be idempotent: cancelling a job the scheduler no
///   longer knows about succeeds.
/// - `get_results()` downloads collected outputs into `download_dir`,
///   staging each file next to its destination and renaming into place so
///   a failed transfer never leaves a truncated file under the final name.
///   Declared outputs missing from the sandbox are skipped, not errors.
/// - `free()` removes the sandbox. Failures are logged and swallowed; a
///   leaked sandbox is not worth failing a finished job over.
/// - `peek()` reads a byte range from a file in the sandbox of a live job;
///   a negative `offset` counts from the end of the file.
/// - `close()` releases the transport. Idempotent.
#[async_trait]
pub trait Lrms: Send + Sync {
    /// Resource name, unique among the configured resources.
    fn name(&self) -> &str;

    /// Declared capacity limits, fixed at construction.
    fn limits(&self) -> &LrmsLimits;

    /// Stage inputs and submit the job to the scheduler.
    async fn submit_job(&self, job: &mut Job) -> LrmsResult<()>;

    /// Observe the remote state and update the job's execution record.
    async fn update_job_state(&self, job: &mut Job) -> LrmsResult<RunState>;

    /// Fetch the scheduler's accounting record for a finished job.
    async fn get_accounting(&self, job: &Job) -> LrmsResult<Option<AccountingRecord>>;

    /// Ask the scheduler to cancel the job.
    async fn cancel_job(&self, job: &mut Job) -> LrmsResult<()>;

    /// Download the job's collected outputs into `download_dir`.
    ///
    /// Returns the local paths actually written. Existing destination
    /// files are left untouched unless `overwrite` is set. A failed
    /// download leaves no partial file behind.
    async fn get_results(
        &self,
        job: &mut Job,
        download_dir: &Path,
        overwrite: bool,
    ) -> LrmsResult<Vec<PathBuf>>;

    /// Remove the job's remote sandbox.
    async fn free(&self, job: &mut Job) -> LrmsResult<()>;

    /// Observe the resource's current occupancy.
    async fn get_resource_status(&self) -> LrmsResult<ResourceSnapshot>;

    /// Read a byte range from a file in the job's sandbox.
    async fn peek(
        &self,
        job: &Job,
        remote_path: &str,
        offset: i64,
        size: Option<u64>,
    ) -> LrmsResult<Vec<u8>>;

    /// Release the resource's transport. Idempotent.
    async fn close(&self) -> LrmsResult<()>;
}
