//! Automatic resubmission of failed jobs.
//!
//! [`RetryingJob`] wraps a [`Job`] and a [`RetryPolicy`]. Whenever the
//! inner record closes, the policy looks at the evidence (exit status,
//! accounted usage, captured output) and either stops or hands back an
//! adjusted request; the wrapper then replaces the inner job with a
//! fresh one built from that request. The fresh job starts over in
//! `NEW`, so the caller's ordinary drive loop resubmits it without any
//! special casing.
//!
//! Policies are deliberately infallible: when the evidence is ambiguous
//! or unreadable, the answer is [`RetryDecision::Stop`], never an error.

use std::path::{Path, PathBuf};

use gridr_core::{Job, JobRequest, LrmsResult, RunState};
use gridr_units::Memory;

use crate::core::Core;

/// A policy's verdict on a closed job.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Leave the record closed.
    Stop,
    /// Run again with this (usually adjusted) request.
    Retry(JobRequest),
}

/// Decides whether a closed job deserves another attempt.
///
/// `evaluate` is only consulted for a job in `TERMINATED` whose retry
/// budget is not yet spent. It must not fail: unreadable evidence means
/// [`RetryDecision::Stop`].
pub trait RetryPolicy: Send + Sync {
    fn evaluate(&self, job: &Job, retried: u32) -> RetryDecision;
}

/// The policy that never retries anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn evaluate(&self, _job: &Job, _retried: u32) -> RetryDecision {
        RetryDecision::Stop
    }
}

/// Retry jobs that died of memory exhaustion, with a bigger allowance.
///
/// A job looks out-of-memory when it failed and either its accounted
/// peak memory reached the amount it asked for, or one of the
/// [`patterns`](Self::patterns) appears in its captured stdout/stderr
/// (searched in the download directory, so only after outputs were
/// fetched). Each retry raises `memory_per_core` by
/// [`increment`](Self::increment), capped at [`ceiling`](Self::ceiling);
/// a job already at the ceiling is not retried again.
#[derive(Debug, Clone)]
pub struct RetryOnOutOfMemory {
    /// How much to add to the per-core memory request on each retry.
    pub increment: Memory,
    /// Never request more than this much memory per core.
    pub ceiling: Memory,
    /// Substrings of stdout/stderr that mark a memory death.
    pub patterns: Vec<String>,
}

impl Default for RetryOnOutOfMemory {
    fn default() -> Self {
        Self {
            increment: Memory::gib(1),
            ceiling: Memory::gib(16),
            patterns: [
                "Out of memory",
                "MATLAB:nomem",
                "std::bad_alloc",
                "Cannot allocate memory",
                "oom-kill",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl RetryOnOutOfMemory {
    /// Does the accounting record say the job hit its memory request?
    fn usage_at_limit(&self, job: &Job) -> bool {
        let Some(usage) = &job.execution.usage else {
            return false;
        };
        let Some(requested) = job.request.total_memory() else {
            return false;
        };
        usage
            .max_used_memory
            .or(usage.max_used_rss)
            .is_some_and(|peak| peak >= requested)
    }

    /// Does a captured stream mention a memory death?
    ///
    /// Best effort: files that are missing or unreadable simply do not
    /// match.
    fn stream_mentions_oom(&self, job: &Job) -> bool {
        let Some(dir) = &job.download_dir else {
            return false;
        };
        let names = [
            job.execution.stdout_filename.as_ref(),
            job.execution.stderr_filename.as_ref(),
        ];
        for name in names.into_iter().flatten() {
            let Ok(text) = std::fs::read_to_string(dir.join(name)) else {
                continue;
            };
            if self.patterns.iter().any(|p| text.contains(p.as_str())) {
                return true;
            }
        }
        false
    }
}

impl RetryPolicy for RetryOnOutOfMemory {
    fn evaluate(&self, job: &Job, _retried: u32) -> RetryDecision {
        if job
            .execution
            .exit_status
            .is_some_and(|exit| exit.is_success())
        {
            return RetryDecision::Stop;
        }
        if !self.usage_at_limit(job) && !self.stream_mentions_oom(job) {
            return RetryDecision::Stop;
        }

        let current = job.request.memory_per_core;
        if current.is_some_and(|per_core| per_core >= self.ceiling) {
            tracing::info!(job = %job.id, "memory request already at the ceiling; giving up");
            return RetryDecision::Stop;
        }
        let bumped = match current {
            Some(per_core) => per_core
                .checked_add(self.increment)
                .map(|m| m.min(self.ceiling))
                .unwrap_or(self.ceiling),
            None => self.increment.min(self.ceiling),
        };
        let mut request = job.request.clone();
        request.memory_per_core = Some(bumped);
        RetryDecision::Retry(request)
    }
}

/// A job that replaces itself with a fresh attempt when its policy says
/// so.
///
/// Drive it like a plain job through [`submit`](Self::submit),
/// [`update_state`](Self::update_state) and
/// [`fetch_output`](Self::fetch_output). After any call, a
/// [`state`](Self::state) of `NEW` means the wrapper wants another round
/// through the caller's submit loop. Once [`is_frozen`](Self::is_frozen)
/// returns true the wrapper has settled for good: either the job
/// succeeded, the policy declined, or the retry budget ran out.
pub struct RetryingJob {
    job: Job,
    policy: Box<dyn RetryPolicy>,
    max_retries: u32,
    retried: u32,
    frozen: bool,
}

impl RetryingJob {
    /// Wrap a fresh job built from `request`.
    ///
    /// `max_retries` is the number of *additional* attempts; `0` means
    /// the job runs exactly once, whatever the policy thinks.
    pub fn new(request: JobRequest, policy: Box<dyn RetryPolicy>, max_retries: u32) -> Self {
        Self {
            job: Job::new(request),
            policy,
            max_retries,
            retried: 0,
            frozen: false,
        }
    }

    /// The current attempt.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Lifecycle state of the current attempt.
    pub fn state(&self) -> RunState {
        self.job.state()
    }

    /// Attempts already consumed beyond the first.
    pub fn retried(&self) -> u32 {
        self.retried
    }

    /// Whether the wrapper has stopped retrying for good.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn maybe_retry(&mut self) {
        if self.frozen || self.job.state() != RunState::Terminated {
            return;
        }
        if self.retried >= self.max_retries {
            self.frozen = true;
            return;
        }
        match self.policy.evaluate(&self.job, self.retried) {
            RetryDecision::Stop => self.frozen = true,
            RetryDecision::Retry(request) => {
                self.retried += 1;
                tracing::info!(
                    job = %self.job.id,
                    attempt = self.retried + 1,
                    "replacing the closed job with a fresh attempt"
                );
                self.job = Job::new(request);
            }
        }
    }

    /// Submit the current attempt through `core`.
    ///
    /// A submission failure closes the record, so the policy gets a look
    /// before the error is returned; the next call may find a fresh
    /// attempt in `NEW`.
    pub async fn submit(&mut self, core: &Core) -> LrmsResult<()> {
        let result = core.submit_job(&mut self.job).await;
        if result.is_err() {
            self.maybe_retry();
        }
        result
    }

    /// Poll the current attempt's state.
    pub async fn update_state(&mut self, core: &Core) -> LrmsResult<RunState> {
        core.update_job_state(&mut self.job).await
    }

    /// Fetch the current attempt's outputs, then consult the policy.
    ///
    /// Fetching is what finalizes a `TERMINATING` record and lands the
    /// captured streams where the policy can read them, so this is where
    /// most retries are decided.
    pub async fn fetch_output(
        &mut self,
        core: &Core,
        download_dir: &Path,
        overwrite: bool,
    ) -> LrmsResult<Vec<PathBuf>> {
        let result = core.fetch_output(&mut self.job, download_dir, overwrite).await;
        if result.is_ok() {
            self.maybe_retry();
        }
        result
    }

    /// Kill the current attempt and stop retrying.
    pub async fn kill(&mut self, core: &Core) -> LrmsResult<()> {
        self.frozen = true;
        core.kill(&mut self.job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridr_core::{AccountingRecord, ExitStatus};
    use gridr_units::Duration;

    fn failed_job(memory_per_core: Option<Memory>, peak: Option<Memory>) -> Job {
        let mut request = JobRequest::new("oomer", ["./hog"]).with_cores(2);
        request.memory_per_core = memory_per_core;
        let mut job = Job::new(request);
        job.execution.exit_status = Some(ExitStatus::from_parts(1, 0));
        if let Some(peak) = peak {
            job.execution.usage = Some(AccountingRecord {
                cores: 2,
                duration: Duration::seconds(10),
                used_cpu_time: Duration::seconds(10),
                max_used_memory: Some(peak),
                max_used_rss: None,
                submitted_at: None,
                started_at: None,
                completed_at: None,
                exit_status: Some(ExitStatus::from_parts(1, 0)),
            });
        }
        job
    }

    #[test]
    fn successful_job_is_never_retried() {
        let mut job = failed_job(Some(Memory::gib(1)), Some(Memory::gib(4)));
        job.execution.exit_status = Some(ExitStatus::success());
        let policy = RetryOnOutOfMemory::default();
        assert_eq!(policy.evaluate(&job, 0), RetryDecision::Stop);
    }

    #[test]
    fn failure_without_oom_evidence_is_not_retried() {
        let job = failed_job(Some(Memory::gib(1)), None);
        let policy = RetryOnOutOfMemory::default();
        assert_eq!(policy.evaluate(&job, 0), RetryDecision::Stop);
    }

    #[test]
    fn peak_at_the_request_bumps_memory() {
        // 2 cores x 1 GiB requested, 2 GiB peak: at the limit.
        let job = failed_job(Some(Memory::gib(1)), Some(Memory::gib(2)));
        let policy = RetryOnOutOfMemory::default();
        match policy.evaluate(&job, 0) {
            RetryDecision::Retry(request) => {
                assert_eq!(request.memory_per_core, Some(Memory::gib(2)));
            }
            RetryDecision::Stop => panic!("expected a retry"),
        }
    }

    #[test]
    fn peak_below_the_request_is_not_an_oom() {
        let job = failed_job(Some(Memory::gib(4)), Some(Memory::gib(2)));
        let policy = RetryOnOutOfMemory::default();
        assert_eq!(policy.evaluate(&job, 0), RetryDecision::Stop);
    }

    #[test]
    fn bump_is_capped_at_the_ceiling() {
        let job = failed_job(Some(Memory::mib(15 * 1024 + 512)), Some(Memory::gib(31)));
        let policy = RetryOnOutOfMemory::default();
        match policy.evaluate(&job, 0) {
            RetryDecision::Retry(request) => {
                assert_eq!(request.memory_per_core, Some(Memory::gib(16)));
            }
            RetryDecision::Stop => panic!("expected a capped retry"),
        }
    }

    #[test]
    fn at_the_ceiling_the_policy_gives_up() {
        let job = failed_job(Some(Memory::gib(16)), Some(Memory::gib(32)));
        let policy = RetryOnOutOfMemory::default();
        assert_eq!(policy.evaluate(&job, 0), RetryDecision::Stop);
    }

    #[test]
    fn unconstrained_request_gets_the_increment() {
        // No memory_per_core means total_memory() is None, so only the
        // stream patterns can trigger; fake it with a usage-free job and
        // a pattern hit through the download directory.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oomer.out"), "Killed: oom-kill event").unwrap();
        let mut job = failed_job(None, None);
        job.execution.stdout_filename = Some("oomer.out".into());
        job.download_dir = Some(dir.path().to_path_buf());
        let policy = RetryOnOutOfMemory::default();
        match policy.evaluate(&job, 0) {
            RetryDecision::Retry(request) => {
                assert_eq!(request.memory_per_core, Some(Memory::gib(1)));
            }
            RetryDecision::Stop => panic!("expected a retry from the stream pattern"),
        }
    }

    #[test]
    fn missing_stream_files_read_as_no_evidence() {
        let mut job = failed_job(Some(Memory::gib(1)), None);
        job.execution.stdout_filename = Some("gone.out".into());
        job.download_dir = Some(PathBuf::from("/nonexistent/gridr-test"));
        let policy = RetryOnOutOfMemory::default();
        assert_eq!(policy.evaluate(&job, 0), RetryDecision::Stop);
    }
}
