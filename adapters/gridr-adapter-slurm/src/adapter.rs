//! The SLURM backend: sandboxes, submission, tracking, accounting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashSet;

use gridr_core::{
    sh_quote, sh_quote_cmdline, AccountingRecord, CommandOutput, Job, LocalTransport, Lrms,
    LrmsError, LrmsLimits, LrmsResult, QueryCache, ResourceConfig, ResourceSnapshot, RunState,
    Transport,
};
use gridr_units::{Duration, Memory};

use crate::parser;
use crate::templates;

/// Configuration of one SLURM cluster.
#[derive(Debug, Clone)]
pub struct SlurmConfig {
    /// Resource name reported to the driver.
    pub name: String,
    /// User whose jobs count as "ours" in occupancy snapshots.
    pub username: String,
    /// `sbatch` invocation as an argv prefix; site options such as
    /// `--partition` or `--account` go here.
    pub sbatch: Vec<String>,
    /// `squeue` command.
    pub squeue: String,
    /// `sacct` command.
    pub sacct: String,
    /// `scancel` command.
    pub scancel: String,
    /// Directory sandboxes are created under. Expanded by the shell on
    /// the frontend, so `$HOME` works; paths with spaces do not.
    pub spooldir: String,
    /// How long a job missing from both the queue and accounting keeps
    /// its last observed state before it is declared unobservable.
    pub accounting_delay: Duration,
    /// Time-to-live for cached queue and accounting queries.
    pub cache_ttl: std::time::Duration,
    /// Declared capacity limits.
    pub limits: LrmsLimits,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            name: "slurm".to_string(),
            username: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            sbatch: vec!["sbatch".to_string()],
            squeue: "squeue".to_string(),
            sacct: "sacct".to_string(),
            scancel: "scancel".to_string(),
            spooldir: "$HOME/.gridr/jobs".to_string(),
            accounting_delay: Duration::seconds(15),
            cache_ttl: std::time::Duration::from_secs(30),
            limits: LrmsLimits {
                max_cores: 1,
                max_cores_per_job: 1,
                max_memory_per_core: Memory::gib(2),
                max_walltime: Duration::hours(8),
                architectures: Vec::new(),
            },
        }
    }
}

impl SlurmConfig {
    /// Build a configuration from a resource entry.
    ///
    /// Typed fields map directly; the adapter-specific passthrough keys
    /// understood here are `sbatch`, `squeue`, `sacct`, `scancel`,
    /// `spooldir`, and `username`.
    pub fn from_resource(config: &ResourceConfig) -> LrmsResult<Self> {
        let mut slurm = SlurmConfig {
            name: config.name.clone(),
            limits: config.limits(),
            ..SlurmConfig::default()
        };
        if let Some(sbatch) = config.extra_str("sbatch") {
            slurm.sbatch = sbatch.split_whitespace().map(str::to_string).collect();
            if slurm.sbatch.is_empty() {
                return Err(LrmsError::Configuration(format!(
                    "resource '{}': 'sbatch' is set but empty",
                    config.name
                )));
            }
        }
        if let Some(squeue) = config.extra_str("squeue") {
            slurm.squeue = squeue.to_string();
        }
        if let Some(sacct) = config.extra_str("sacct") {
            slurm.sacct = sacct.to_string();
        }
        if let Some(scancel) = config.extra_str("scancel") {
            slurm.scancel = scancel.to_string();
        }
        if let Some(spooldir) = config.extra_str("spooldir") {
            slurm.spooldir = spooldir.to_string();
        }
        if let Some(username) = config.extra_str("username") {
            slurm.username = username.to_string();
        }
        if let Some(delay) = config.accounting_delay {
            slurm.accounting_delay = delay;
        }
        if let Some(ttl) = config.cache_ttl {
            slurm.cache_ttl = ttl.as_std();
        }
        Ok(slurm)
    }
}

/// A SLURM cluster reached through a [`Transport`].
pub struct SlurmLrms {
    config: SlurmConfig,
    transport: Arc<dyn Transport>,
    /// Read-only scheduler queries, keyed by the full command line.
    queries: QueryCache<String, CommandOutput>,
    /// Occupancy snapshots keep their observation time across cache hits.
    capacity: QueryCache<(), ResourceSnapshot>,
}

impl SlurmLrms {
    /// Wire a configuration to a transport.
    pub fn new(config: SlurmConfig, transport: Arc<dyn Transport>) -> Self {
        let queries = QueryCache::with_ttl(config.cache_ttl);
        let capacity = QueryCache::with_ttl(config.cache_ttl);
        Self {
            config,
            transport,
            queries,
            capacity,
        }
    }

    /// Build an adapter from a resource configuration entry.
    pub fn from_resource(config: &ResourceConfig) -> LrmsResult<Self> {
        if config.transport != "local" {
            return Err(LrmsError::Configuration(format!(
                "resource '{}': unsupported transport '{}' (only 'local' is available)",
                config.name, config.transport
            )));
        }
        let slurm = SlurmConfig::from_resource(config)?;
        Ok(Self::new(slurm, Arc::new(LocalTransport::new())))
    }

    /// The active configuration.
    pub fn config(&self) -> &SlurmConfig {
        &self.config
    }

    /// Run a read-only query through the cache.
    ///
    /// A transport-level success is an answer worth caching even when the
    /// command exited nonzero; only transport failures are retried.
    async fn query(&self, command: String) -> LrmsResult<CommandOutput> {
        self.queries
            .get_or_refresh(command.clone(), || async {
                self.transport.connect().await?;
                self.transport
                    .execute(&command)
                    .await
                    .map_err(LrmsError::from)
            })
            .await
    }

    fn jobid<'a>(&self, job: &'a Job) -> LrmsResult<&'a str> {
        job.execution
            .lrms_jobid
            .as_deref()
            .ok_or(LrmsError::MissingJobId)
    }

    fn execdir<'a>(&self, job: &'a Job) -> LrmsResult<&'a str> {
        job.execution
            .lrms_execdir
            .as_deref()
            .ok_or(LrmsError::MissingJobId)
    }

    async fn fetch_accounting(&self, jobid: &str) -> LrmsResult<Option<AccountingRecord>> {
        let command = format!(
            "env SLURM_TIME_FORMAT=standard {} --noheader --parsable --format \
             jobid,exitcode,state,ncpus,elapsed,totalcpu,submit,start,end,maxrss,maxvmsize \
             -j {jobid}",
            self.config.sacct
        );
        let output = self.query(command).await?;
        if !output.success() {
            // accounting may be disabled, or still syncing this job; the
            // grace window upstream decides when that becomes an error
            tracing::debug!(
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "sacct gave no usable answer"
            );
            return Ok(None);
        }
        parser::parse_sacct_output(&output.stdout)
    }

    /// Neither the queue nor accounting knows the job. Keep the last
    /// state for the configured grace window, then declare it lost.
    fn note_unobserved(&self, job: &mut Job) -> LrmsResult<RunState> {
        let now = Utc::now();
        let since = *job.execution.unobserved_since.get_or_insert(now);
        let elapsed = now.signed_duration_since(since).to_std().unwrap_or_default();
        if elapsed < self.config.accounting_delay.as_std() {
            tracing::debug!(job = %job.id, "no scheduler data yet; keeping last state");
            return Ok(job.execution.state());
        }
        job.execution.transition(RunState::Unknown);
        Err(LrmsError::TransientInfoSystem(format!(
            "job {} (SLURM id {}) is in neither the queue nor accounting \
             after {}s; its state cannot be determined",
            job.id,
            job.execution.lrms_jobid.as_deref().unwrap_or("?"),
            elapsed.as_secs()
        )))
    }

    /// `<name>.part` next to the destination, so the rename into place
    /// stays on one filesystem.
    fn staging_path(destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".part");
        destination.with_file_name(name)
    }
}

#[async_trait]
impl Lrms for SlurmLrms {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn limits(&self) -> &LrmsLimits {
        &self.config.limits
    }

    async fn submit_job(&self, job: &mut Job) -> LrmsResult<()> {
        self.transport.connect().await?;
        // fresh sandbox under the spool directory; mktemp prints its path.
        // spooldir is deliberately unquoted so the frontend shell expands
        // a leading $HOME
        let command = format!(
            "mkdir -p {spool} && mktemp -d {spool}/gridr_job.XXXXXXXXXX",
            spool = self.config.spooldir
        );
        let output = self.transport.execute(&command).await?;
        if !output.success() {
            return Err(LrmsError::Submission(format!(
                "cannot create a sandbox under '{}': {}",
                self.config.spooldir,
                output.stderr.trim()
            )));
        }
        let sandbox = output.stdout.lines().next().unwrap_or("").trim().to_string();
        if sandbox.is_empty() {
            return Err(LrmsError::Submission(
                "mktemp reported no sandbox path".to_string(),
            ));
        }

        for mapping in &job.request.inputs {
            self.transport
                .upload(&mapping.local, &format!("{sandbox}/{}", mapping.remote))
                .await?;
        }
        if let (Some(stdin), Some(basename)) =
            (&job.request.stdin, templates::stdin_basename(&job.request))
        {
            self.transport
                .upload(stdin, &format!("{sandbox}/{basename}"))
                .await?;
        }

        let script = templates::script_name(&job.id);
        let text = templates::job_script(&job.request);
        self.transport
            .write_file(&format!("{sandbox}/{script}"), text.as_bytes())
            .await?;

        let argv = templates::sbatch_argv(&self.config, &job.request, &script);
        let command = format!("cd {} && {}", sh_quote(&sandbox), sh_quote_cmdline(&argv));
        let output = self.transport.execute(&command).await?;
        if !output.success() {
            return Err(LrmsError::Submission(format!(
                "sbatch exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        let jobid = parser::parse_sbatch_output(&output.stdout)?;

        let (stdout, stderr) = templates::output_filenames(&job.request);
        job.execution.lrms_jobid = Some(jobid.clone());
        job.execution.lrms_execdir = Some(sandbox.clone());
        job.execution.stdout_filename = Some(stdout);
        job.execution.stderr_filename = stderr;
        job.execution
            .record(format!("submitted to '{}' as job {jobid}", self.config.name));
        tracing::info!(job = %job.id, lrms_jobid = %jobid, %sandbox, "job submitted");
        Ok(())
    }

    async fn update_job_state(&self, job: &mut Job) -> LrmsResult<RunState> {
        let jobid = self.jobid(job)?.to_string();
        let command = format!(
            "{} --noheader -o '{}^%i^%T^%r' -j {jobid}",
            self.config.squeue,
            parser::STATUS_TAG
        );
        let output = self.query(command).await?;
        // an error exit here means the id already aged out of the queue,
        // which is the same news as an empty listing
        let queue_status = if output.success() {
            parser::parse_squeue_output(&output.stdout)?
        } else {
            None
        };

        if let Some(status) = queue_status {
            job.execution.remote_status = Some(status.remote_state);
            if status.state != RunState::Terminating {
                tracing::debug!(
                    job = %job.id,
                    state = %status.state,
                    reason = %status.reason,
                    "queue reports job state"
                );
                job.execution.unobserved_since = None;
                job.execution.transition(status.state);
                return Ok(job.execution.state());
            }
            // the queue already shows a terminal state, but only the
            // accounting record makes it final; fall through
        }

        match self.fetch_accounting(&jobid).await? {
            Some(record) => {
                job.execution.unobserved_since = None;
                if let Some(exit) = record.exit_status {
                    job.execution.exit_status = Some(exit);
                }
                job.execution.usage = Some(record);
                job.execution.transition(RunState::Terminating);
                Ok(job.execution.state())
            }
            None => self.note_unobserved(job),
        }
    }

    async fn get_accounting(&self, job: &Job) -> LrmsResult<Option<AccountingRecord>> {
        let jobid = self.jobid(job)?;
        self.fetch_accounting(jobid).await
    }

    async fn cancel_job(&self, job: &mut Job) -> LrmsResult<()> {
        let jobid = self.jobid(job)?.to_string();
        let command = format!("{} {jobid}", self.config.scancel);
        self.transport.connect().await?;
        let output = self.transport.execute(&command).await?;
        if !output.stderr.trim().is_empty() {
            tracing::debug!(job = %job.id, stderr = %output.stderr.trim(), "scancel reported");
        }
        parser::parse_scancel(output.exit_code, &output.stderr)?;
        job.execution
            .record(format!("cancellation requested for job {jobid}"));
        Ok(())
    }

    async fn get_results(
        &self,
        job: &mut Job,
        download_dir: &Path,
        overwrite: bool,
    ) -> LrmsResult<Vec<PathBuf>> {
        let sandbox = self.execdir(job)?.to_string();
        self.transport.connect().await?;

        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        let mut seen = FxHashSet::default();
        for mapping in &job.request.outputs {
            if seen.insert(mapping.remote.clone()) {
                entries.push((mapping.remote.clone(), mapping.local.clone()));
            }
        }
        for stream in [&job.execution.stdout_filename, &job.execution.stderr_filename] {
            if let Some(name) = stream {
                if seen.insert(name.clone()) {
                    entries.push((name.clone(), PathBuf::from(name)));
                }
            }
        }

        let mut written = Vec::new();
        for (remote_name, local_name) in entries {
            let remote = format!("{sandbox}/{remote_name}");
            if !self.transport.exists(&remote).await? {
                tracing::debug!(job = %job.id, %remote_name, "declared output not produced; skipping");
                continue;
            }
            let destination = download_dir.join(&local_name);
            if !overwrite
                && tokio::fs::try_exists(&destination)
                    .await
                    .map_err(gridr_core::TransportError::from)?
            {
                tracing::debug!(job = %job.id, destination = %destination.display(), "exists; skipping");
                continue;
            }
            let staging = Self::staging_path(&destination);
            if let Err(err) = self.transport.download(&remote, &staging).await {
                // a half-written staging file must not outlive the attempt
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(LrmsError::DataStaging {
                    path: remote,
                    recoverable: true,
                    message: err.to_string(),
                });
            }
            if let Err(err) = tokio::fs::rename(&staging, &destination).await {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(LrmsError::DataStaging {
                    path: destination.display().to_string(),
                    recoverable: true,
                    message: err.to_string(),
                });
            }
            written.push(destination);
        }
        tracing::info!(job = %job.id, files = written.len(), "outputs downloaded");
        Ok(written)
    }

    async fn free(&self, job: &mut Job) -> LrmsResult<()> {
        let Some(sandbox) = job.execution.lrms_execdir.take() else {
            return Ok(());
        };
        let removed = async {
            self.transport.connect().await?;
            self.transport.remove_tree(&sandbox).await
        }
        .await;
        if let Err(err) = removed {
            tracing::warn!(job = %job.id, %sandbox, error = %err, "cannot remove sandbox; leaking it");
        }
        Ok(())
    }

    async fn get_resource_status(&self) -> LrmsResult<ResourceSnapshot> {
        let command = format!("{} --noheader -o '%i^%T^%u^%U^%r^%R'", self.config.squeue);
        self.capacity
            .get_or_refresh((), || async {
                self.transport.connect().await?;
                let output = self
                    .transport
                    .execute(&command)
                    .await
                    .map_err(LrmsError::from)?;
                if !output.success() {
                    return Err(LrmsError::ResourceQuery(format!(
                        "squeue exited with code {}: {}",
                        output.exit_code,
                        output.stderr.trim()
                    )));
                }
                let counts = parser::count_jobs(&output.stdout, &self.config.username)?;
                // squeue sees jobs, not slots; totals stay unknown
                Ok(ResourceSnapshot {
                    total_slots: None,
                    free_slots: None,
                    total_running: counts.total_running,
                    total_queued: counts.total_queued,
                    own_running: counts.own_running,
                    own_queued: counts.own_queued,
                    observed_at: Utc::now(),
                })
            })
            .await
    }

    async fn peek(
        &self,
        job: &Job,
        remote_path: &str,
        offset: i64,
        size: Option<u64>,
    ) -> LrmsResult<Vec<u8>> {
        let sandbox = self.execdir(job)?;
        let path = if remote_path.starts_with('/') {
            remote_path.to_string()
        } else {
            format!("{sandbox}/{remote_path}")
        };
        self.transport.connect().await?;
        Ok(self.transport.read_file_range(&path, offset, size).await?)
    }

    async fn close(&self) -> LrmsResult<()> {
        Ok(self.transport.close().await?)
    }
}
