//! Retry wrapper behavior over a mock cluster.
//!
//! The cluster here runs every submitted job to completion in one poll,
//! with a scripted exit status and memory peak per attempt. What is
//! under test is the wrapper's bookkeeping: when it builds a fresh
//! attempt, how the memory ladder climbs, and when it freezes.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gridr_core::{
    AccountingRecord, ExitStatus, Job, JobRequest, Lrms, LrmsError, LrmsLimits, LrmsResult,
    ResourceSnapshot, RunState,
};
use gridr_engine::{Core, NeverRetry, RetryDecision, RetryOnOutOfMemory, RetryPolicy, RetryingJob};
use gridr_units::{Duration, Memory};

/// Scheduler's verdict on one attempt.
struct Outcome {
    exit: ExitStatus,
    peak: Option<Memory>,
}

impl Outcome {
    fn oom(peak: Memory) -> Self {
        // The kernel's OOM killer delivers SIGKILL.
        Self {
            exit: ExitStatus::from_parts(0, 9),
            peak: Some(peak),
        }
    }

    fn success() -> Self {
        Self {
            exit: ExitStatus::success(),
            peak: None,
        }
    }
}

/// A cluster where every job finishes by its first status poll.
struct OneShotCluster {
    name: String,
    limits: LrmsLimits,
    submit_failures: Mutex<VecDeque<LrmsError>>,
    outcomes: Mutex<VecDeque<Outcome>>,
    submissions: AtomicUsize,
}

impl OneShotCluster {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            name: "cluster-a".into(),
            limits: LrmsLimits {
                max_cores: 128,
                max_cores_per_job: 64,
                max_memory_per_core: Memory::gib(64),
                max_walltime: Duration::hours(24),
                architectures: Vec::new(),
            },
            submit_failures: Mutex::new(VecDeque::new()),
            outcomes: Mutex::new(VecDeque::new()),
            submissions: AtomicUsize::new(0),
        })
    }

    fn fail_next_submission(&self, err: LrmsError) {
        self.submit_failures.lock().unwrap().push_back(err);
    }

    fn finish_next_with(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lrms for OneShotCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn limits(&self) -> &LrmsLimits {
        &self.limits
    }

    async fn submit_job(&self, job: &mut Job) -> LrmsResult<()> {
        if let Some(err) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        job.execution.lrms_jobid = Some(n.to_string());
        job.execution.lrms_execdir = Some(format!("/spool/gridr_job.{n}"));
        job.execution.stdout_filename = Some(format!("{}.out", job.request.name));
        Ok(())
    }

    async fn update_job_state(&self, job: &mut Job) -> LrmsResult<RunState> {
        let Some(outcome) = self.outcomes.lock().unwrap().pop_front() else {
            return Ok(job.state());
        };
        job.execution.exit_status = Some(outcome.exit);
        job.execution.usage = Some(AccountingRecord {
            cores: job.request.cores,
            duration: Duration::seconds(30),
            used_cpu_time: Duration::seconds(30),
            max_used_memory: outcome.peak,
            max_used_rss: None,
            submitted_at: None,
            started_at: None,
            completed_at: None,
            exit_status: Some(outcome.exit),
        });
        job.execution.transition(RunState::Terminating);
        Ok(RunState::Terminating)
    }

    async fn get_accounting(&self, job: &Job) -> LrmsResult<Option<AccountingRecord>> {
        Ok(job.execution.usage.clone())
    }

    async fn cancel_job(&self, _job: &mut Job) -> LrmsResult<()> {
        Ok(())
    }

    async fn get_results(
        &self,
        _job: &mut Job,
        _download_dir: &Path,
        _overwrite: bool,
    ) -> LrmsResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    async fn free(&self, _job: &mut Job) -> LrmsResult<()> {
        Ok(())
    }

    async fn get_resource_status(&self) -> LrmsResult<ResourceSnapshot> {
        Ok(ResourceSnapshot {
            total_slots: Some(self.limits.max_cores),
            free_slots: None,
            total_running: 0,
            total_queued: 0,
            own_running: 0,
            own_queued: 0,
            observed_at: chrono::Utc::now(),
        })
    }

    async fn peek(
        &self,
        _job: &Job,
        _remote_path: &str,
        _offset: i64,
        _size: Option<u64>,
    ) -> LrmsResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> LrmsResult<()> {
        Ok(())
    }
}

fn oom_request() -> JobRequest {
    JobRequest::new("hog", ["./hog"]).with_memory_per_core(Memory::gib(1))
}

fn oom_policy() -> Box<dyn RetryPolicy> {
    Box::new(RetryOnOutOfMemory::default())
}

/// Run the wrapper's current attempt from submission to the policy
/// decision.
async fn one_round(wrapper: &mut RetryingJob, core: &Core, dir: &Path) {
    wrapper.submit(core).await.unwrap();
    wrapper.update_state(core).await.unwrap();
    assert_eq!(wrapper.state(), RunState::Terminating, "one poll finishes");
    wrapper.fetch_output(core, dir, false).await.unwrap();
}

#[tokio::test]
async fn memory_death_is_retried_with_a_raised_request() {
    let cluster = OneShotCluster::new();
    cluster.finish_next_with(Outcome::oom(Memory::gib(1)));
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);
    let dir = tempfile::tempdir().unwrap();

    let mut wrapper = RetryingJob::new(oom_request(), oom_policy(), 3);
    wrapper.submit(&core).await.unwrap();
    wrapper.update_state(&core).await.unwrap();
    assert_eq!(wrapper.state(), RunState::Terminating);

    wrapper.fetch_output(&core, dir.path(), false).await.unwrap();

    assert!(!wrapper.is_frozen());
    assert_eq!(wrapper.retried(), 1);
    assert_eq!(wrapper.state(), RunState::New, "fresh attempt awaits submission");
    assert_eq!(
        wrapper.job().request.memory_per_core,
        Some(Memory::gib(2)),
        "the ladder climbs by one increment"
    );
    assert!(wrapper.job().execution.lrms_jobid.is_none());
}

#[tokio::test]
async fn the_ladder_climbs_until_the_job_succeeds() {
    let cluster = OneShotCluster::new();
    cluster.finish_next_with(Outcome::oom(Memory::gib(1)));
    cluster.finish_next_with(Outcome::oom(Memory::gib(2)));
    cluster.finish_next_with(Outcome::success());
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);
    let dir = tempfile::tempdir().unwrap();

    let mut wrapper = RetryingJob::new(oom_request(), oom_policy(), 5);
    while !wrapper.is_frozen() {
        wrapper.submit(&core).await.unwrap();
        wrapper.update_state(&core).await.unwrap();
        wrapper.fetch_output(&core, dir.path(), false).await.unwrap();
    }

    assert_eq!(wrapper.retried(), 2);
    assert_eq!(wrapper.state(), RunState::Terminated);
    assert_eq!(cluster.submissions(), 3);
    assert_eq!(wrapper.job().request.memory_per_core, Some(Memory::gib(3)));
    assert!(wrapper
        .job()
        .execution
        .exit_status
        .is_some_and(|exit| exit.is_success()));
}

#[tokio::test]
async fn a_successful_first_attempt_freezes_immediately() {
    let cluster = OneShotCluster::new();
    cluster.finish_next_with(Outcome::success());
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);
    let dir = tempfile::tempdir().unwrap();

    let mut wrapper = RetryingJob::new(oom_request(), oom_policy(), 3);
    one_round(&mut wrapper, &core, dir.path()).await;

    assert!(wrapper.is_frozen());
    assert_eq!(wrapper.retried(), 0);
    assert_eq!(wrapper.state(), RunState::Terminated);
}

#[tokio::test]
async fn zero_retries_means_the_job_runs_exactly_once() {
    let cluster = OneShotCluster::new();
    cluster.finish_next_with(Outcome::oom(Memory::gib(1)));
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);
    let dir = tempfile::tempdir().unwrap();

    let mut wrapper = RetryingJob::new(oom_request(), oom_policy(), 0);
    one_round(&mut wrapper, &core, dir.path()).await;

    assert!(wrapper.is_frozen());
    assert_eq!(wrapper.retried(), 0);
    assert_eq!(wrapper.state(), RunState::Terminated);
    assert_eq!(cluster.submissions(), 1);
}

#[tokio::test]
async fn the_budget_caps_a_persistent_oom() {
    let cluster = OneShotCluster::new();
    for gib in 1..=3u64 {
        cluster.finish_next_with(Outcome::oom(Memory::gib(gib)));
    }
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);
    let dir = tempfile::tempdir().unwrap();

    let mut wrapper = RetryingJob::new(oom_request(), oom_policy(), 2);
    while !wrapper.is_frozen() {
        wrapper.submit(&core).await.unwrap();
        wrapper.update_state(&core).await.unwrap();
        wrapper.fetch_output(&core, dir.path(), false).await.unwrap();
    }

    assert_eq!(wrapper.retried(), 2);
    assert_eq!(cluster.submissions(), 3);
    assert_eq!(wrapper.state(), RunState::Terminated);
}

#[tokio::test]
async fn never_retry_accepts_the_first_outcome() {
    let cluster = OneShotCluster::new();
    cluster.finish_next_with(Outcome::oom(Memory::gib(1)));
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);
    let dir = tempfile::tempdir().unwrap();

    let mut wrapper = RetryingJob::new(oom_request(), Box::new(NeverRetry), 3);
    one_round(&mut wrapper, &core, dir.path()).await;

    assert!(wrapper.is_frozen());
    assert_eq!(wrapper.retried(), 0);
}

#[tokio::test]
async fn kill_freezes_the_wrapper() {
    let cluster = OneShotCluster::new();
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);

    let mut wrapper = RetryingJob::new(oom_request(), oom_policy(), 3);
    wrapper.submit(&core).await.unwrap();
    wrapper.kill(&core).await.unwrap();

    assert!(wrapper.is_frozen());
    assert_eq!(wrapper.state(), RunState::Terminated);
    assert_eq!(
        wrapper.job().execution.exit_status,
        Some(ExitStatus::cancelled())
    );
}

/// A policy that always asks for another identical attempt; paired with
/// a submission failure it shows the wrapper consulting the policy on a
/// closed, never-submitted record.
struct Stubborn;

impl RetryPolicy for Stubborn {
    fn evaluate(&self, job: &Job, _retried: u32) -> RetryDecision {
        RetryDecision::Retry(job.request.clone())
    }
}

#[tokio::test]
async fn a_failed_submission_may_still_be_retried() {
    let cluster = OneShotCluster::new();
    cluster.fail_next_submission(LrmsError::Submission("queue closed".into()));
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);

    let mut wrapper = RetryingJob::new(oom_request(), Box::new(Stubborn), 3);
    let err = wrapper.submit(&core).await.unwrap_err();
    assert!(matches!(err, LrmsError::Submission(_)));

    // The failed attempt was closed, the policy asked, a fresh attempt
    // built; the next submit round succeeds.
    assert_eq!(wrapper.retried(), 1);
    assert_eq!(wrapper.state(), RunState::New);
    wrapper.submit(&core).await.unwrap();
    assert_eq!(wrapper.state(), RunState::Submitted);
    assert_eq!(cluster.submissions(), 1);
}

#[tokio::test]
async fn a_failed_submission_under_never_retry_stays_closed() {
    let cluster = OneShotCluster::new();
    cluster.fail_next_submission(LrmsError::Submission("queue closed".into()));
    let core = Core::new(vec![cluster.clone() as Arc<dyn Lrms>]);

    let mut wrapper = RetryingJob::new(oom_request(), Box::new(NeverRetry), 3);
    wrapper.submit(&core).await.unwrap_err();

    assert!(wrapper.is_frozen());
    assert_eq!(wrapper.state(), RunState::Terminated);
    assert_eq!(
        wrapper.job().execution.exit_status,
        Some(ExitStatus::submission_failed())
    );
}
