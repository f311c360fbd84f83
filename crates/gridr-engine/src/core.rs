//! The driver: backend selection and the canonical lifecycle calls.
//!
//! [`Core`] owns the configured backends and runs the call sequence every
//! job goes through. It is deliberately thin: backends observe, the
//! driver decides. All lifecycle transitions a backend is forbidden to
//! make (closing a record, moving `NEW -> SUBMITTED`, finalizing after a
//! download) happen here.
//!
//! There is no scheduler loop inside: callers drive their jobs and await
//! each call. Polling many jobs concurrently is the caller's choice, and
//! distinct `&mut Job` borrows make it safe.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gridr_core::{
    signals, ExitStatus, GridrConfig, Job, Lrms, LrmsError, LrmsRegistry, LrmsResult, RunState,
};

use gridr_adapter_slurm::SlurmLrms;

/// Registry preloaded with every backend this build links in.
///
/// Currently just `slurm`. Callers with out-of-tree adapters build on top
/// of this with [`LrmsRegistry::register`].
pub fn builtin_registry() -> LrmsRegistry {
    let mut registry = LrmsRegistry::new();
    registry.register("slurm", |config| {
        let backend = SlurmLrms::from_resource(config)?;
        Ok(Arc::new(backend) as Arc<dyn Lrms>)
    });
    registry
}

/// The driver over a set of configured backends.
pub struct Core {
    resources: Vec<Arc<dyn Lrms>>,
}

impl Core {
    /// A driver over an explicit backend list, matched in order.
    pub fn new(resources: Vec<Arc<dyn Lrms>>) -> Self {
        Self { resources }
    }

    /// Instantiate every resource in `config` through the built-in
    /// registry.
    pub fn from_config(config: &GridrConfig) -> LrmsResult<Self> {
        Self::from_config_with(config, &builtin_registry())
    }

    /// Same, through a caller-extended registry.
    pub fn from_config_with(config: &GridrConfig, registry: &LrmsRegistry) -> LrmsResult<Self> {
        let mut resources = Vec::with_capacity(config.resources.len());
        for entry in &config.resources {
            resources.push(registry.create(entry)?);
        }
        Ok(Self::new(resources))
    }

    /// The configured backends, in matching order.
    pub fn resources(&self) -> &[Arc<dyn Lrms>] {
        &self.resources
    }

    fn resource_named(&self, name: &str) -> LrmsResult<&Arc<dyn Lrms>> {
        self.resources
            .iter()
            .find(|resource| resource.name() == name)
            .ok_or_else(|| {
                LrmsError::Configuration(format!("no configured resource named '{name}'"))
            })
    }

    /// Close the record of a job that will never run.
    fn close_unsubmitted(job: &mut Job, reason: String) {
        job.execution.record(reason);
        job.execution.exit_status = Some(ExitStatus::submission_failed());
        job.execution.transition(RunState::Terminated);
    }

    /// Submit `job` to the backend it names, or to the first configured
    /// backend whose limits admit its request.
    ///
    /// On success the record moves `NEW -> SUBMITTED` and the job
    /// remembers its backend. On any failure the record is closed on the
    /// spot: error text in the history, the synthetic "submission failed"
    /// exit status, state `TERMINATED`. A closed job hands the decision
    /// about another attempt to the caller (or a retry policy) instead of
    /// lingering half-submitted.
    pub async fn submit_job(&self, job: &mut Job) -> LrmsResult<()> {
        if job.state() != RunState::New {
            return Err(LrmsError::Submission(format!(
                "job {} is {}, not {}",
                job.id,
                job.state(),
                RunState::New
            )));
        }

        let resource = match &job.resource_name {
            Some(name) => match self.resource_named(name) {
                Ok(resource) => resource,
                Err(err) => {
                    Self::close_unsubmitted(job, err.to_string());
                    return Err(err);
                }
            },
            None => {
                match self
                    .resources
                    .iter()
                    .find(|resource| resource.limits().admits(&job.request))
                {
                    Some(resource) => resource,
                    None => {
                        let err = LrmsError::NoMatchingResource(job.id.to_string());
                        Self::close_unsubmitted(job, err.to_string());
                        return Err(err);
                    }
                }
            }
        };

        match resource.submit_job(job).await {
            Ok(()) => {
                job.resource_name = Some(resource.name().to_string());
                job.execution.transition(RunState::Submitted);
                tracing::info!(job = %job.id, resource = resource.name(), "job submitted");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    job = %job.id,
                    resource = resource.name(),
                    error = %err,
                    "submission failed"
                );
                Self::close_unsubmitted(
                    job,
                    format!("submission to '{}' failed: {err}", resource.name()),
                );
                Err(err)
            }
        }
    }

    /// Ask the owning backend for the job's current state.
    pub async fn update_job_state(&self, job: &mut Job) -> LrmsResult<RunState> {
        let Some(name) = job.resource_name.clone() else {
            return Err(LrmsError::MissingJobId);
        };
        let resource = self.resource_named(&name)?;
        resource.update_job_state(job).await
    }

    /// Download the job's collected outputs into `download_dir`.
    ///
    /// A `NEW` or `SUBMITTED` job has produced nothing to download, and
    /// asking is a caller bug, not a transient condition. On success the
    /// job remembers the download directory, an earlier staging-failure
    /// signal is cleared, and a `TERMINATING` record moves to
    /// `TERMINATED`. A recoverable staging failure leaves the state
    /// alone so the call can simply be repeated; an unrecoverable one
    /// stamps the staging-failure signal into the exit status.
    pub async fn fetch_output(
        &self,
        job: &mut Job,
        download_dir: &Path,
        overwrite: bool,
    ) -> LrmsResult<Vec<PathBuf>> {
        if matches!(job.state(), RunState::New | RunState::Submitted) {
            return Err(LrmsError::DataStaging {
                path: download_dir.display().to_string(),
                recoverable: false,
                message: format!(
                    "output of job {} is not available in state {}",
                    job.id,
                    job.state()
                ),
            });
        }
        let Some(name) = job.resource_name.clone() else {
            return Err(LrmsError::MissingJobId);
        };
        let resource = self.resource_named(&name)?;

        match resource.get_results(job, download_dir, overwrite).await {
            Ok(files) => {
                job.download_dir = Some(download_dir.to_path_buf());
                if let Some(exit) = job.execution.exit_status {
                    if exit.signal == signals::DATA_STAGING_FAILURE {
                        job.execution.exit_status = Some(ExitStatus::from_parts(exit.code, 0));
                    }
                }
                if job.state() == RunState::Terminating {
                    job.execution.transition(RunState::Terminated);
                }
                Ok(files)
            }
            Err(err) => {
                if !err.is_recoverable() {
                    let code = job.execution.exit_status.map(|exit| exit.code).unwrap_or(0);
                    job.execution.exit_status =
                        Some(ExitStatus::from_parts(code, signals::DATA_STAGING_FAILURE));
                    job.execution.record(format!("output retrieval failed: {err}"));
                }
                Err(err)
            }
        }
    }

    /// Stop the job and close its record.
    ///
    /// A `NEW` job is closed locally without touching any backend; a
    /// `TERMINATED` one is left as it is. Backend cancel failures are
    /// logged and swallowed: the usual cause is that the scheduler
    /// finished the job first, and the record gets closed either way.
    pub async fn kill(&self, job: &mut Job) -> LrmsResult<()> {
        match job.state() {
            RunState::Terminated => return Ok(()),
            RunState::New => {}
            _ => {
                if let Some(name) = job.resource_name.clone() {
                    match self.resource_named(&name) {
                        Ok(resource) => {
                            if let Err(err) = resource.cancel_job(job).await {
                                tracing::warn!(
                                    job = %job.id,
                                    error = %err,
                                    "cancel failed; closing the record anyway"
                                );
                            }
                        }
                        Err(err) => {
                            tracing::warn!(job = %job.id, error = %err, "backend gone; cannot cancel")
                        }
                    }
                }
            }
        }
        if job.execution.exit_status.is_none() {
            job.execution.exit_status = Some(ExitStatus::cancelled());
        }
        job.execution.record("cancelled by user");
        job.execution.transition(RunState::Terminated);
        Ok(())
    }

    /// Remove the job's remote sandbox.
    ///
    /// Only sensible once the job is done with it; on a live job this is
    /// a warning no-op. Backend failures are logged and swallowed.
    pub async fn free(&self, job: &mut Job) -> LrmsResult<()> {
        if !matches!(job.state(), RunState::Terminating | RunState::Terminated) {
            tracing::warn!(job = %job.id, state = %job.state(), "not freeing a live job");
            return Ok(());
        }
        let Some(name) = job.resource_name.clone() else {
            return Ok(());
        };
        match self.resource_named(&name) {
            Ok(resource) => {
                if let Err(err) = resource.free(job).await {
                    tracing::warn!(job = %job.id, error = %err, "freeing the sandbox failed");
                }
            }
            Err(err) => tracing::warn!(job = %job.id, error = %err, "backend gone; cannot free"),
        }
        Ok(())
    }

    /// Close every configured backend, releasing their transports.
    ///
    /// Failures are logged and swallowed so one stuck backend cannot
    /// keep the rest from shutting down.
    pub async fn close(&self) {
        for resource in &self.resources {
            if let Err(err) = resource.close().await {
                tracing::warn!(resource = resource.name(), error = %err, "closing backend failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_knows_slurm() {
        let registry = builtin_registry();
        assert!(registry.has("slurm"));
        assert_eq!(registry.types(), vec!["slurm"]);
    }

    #[test]
    fn config_with_unknown_type_is_rejected() {
        let config = GridrConfig {
            resources: vec![gridr_core::ResourceConfig::new("cluster-x", "pbs")],
        };
        let err = Core::from_config(&config).err().unwrap();
        assert!(matches!(err, LrmsError::Configuration(_)));
        assert!(err.to_string().contains("pbs"));
    }
}
