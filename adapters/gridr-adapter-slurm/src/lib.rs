//! Gridr backend for the SLURM workload manager.
//!
//! This crate drives a SLURM cluster through its command-line tools over
//! a [`Transport`](gridr_core::Transport): every interaction is a shell
//! command on the cluster frontend, and every answer is parsed text.
//! No SLURM library, no REST daemon, no site-specific plugins.
//!
//! # Protocol
//!
//! | Step | Command | Parsed from |
//! |------|---------|-------------|
//! | sandbox | `mkdir -p <spool> && mktemp -d <spool>/gridr_job.XXXXXXXXXX` | first stdout line |
//! | submit | `cd <sandbox> && sbatch <options> <script>` | `Submitted batch job <id>` |
//! | track | `squeue --noheader -o 'gridr^%i^%T^%r' -j <id>` | tagged status line |
//! | account | `env SLURM_TIME_FORMAT=standard sacct --noheader --parsable ... -j <id>` | master + step records |
//! | cancel | `scancel <id>` | exit code |
//! | occupancy | `squeue --noheader -o '%i^%T^%u^%U^%r^%R'` | one line per job |
//!
//! The `gridr` tag in the status format string keeps login-script noise
//! and MOTD banners from being mistaken for job records.
//!
//! Tracking prefers the live queue and falls back to accounting once the
//! job has left it. Because `sacct` lags `squeue` on busy clusters, a job
//! visible in neither keeps its last state for a configurable grace
//! window (`accounting_delay`, 15s by default) before it is moved to
//! `UNKNOWN`.
//!
//! # Configuration keys
//!
//! Beyond the typed resource fields, the adapter understands these
//! passthrough keys:
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `sbatch` | submit command with site options | `sbatch` |
//! | `squeue` | queue listing command | `squeue` |
//! | `sacct` | accounting command | `sacct` |
//! | `scancel` | cancel command | `scancel` |
//! | `spooldir` | sandbox parent directory | `$HOME/.gridr/jobs` |
//! | `username` | owner of "own" jobs in occupancy counts | `$USER` |
//!
//! # Example
//!
//! ```ignore
//! use gridr_adapter_slurm::SlurmLrms;
//! use gridr_core::{Job, JobRequest, Lrms, ResourceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resource = ResourceConfig::new("cluster-a", "slurm");
//!     let slurm = SlurmLrms::from_resource(&resource)?;
//!
//!     let mut job = Job::new(JobRequest::new("hello", ["/bin/hostname"]));
//!     slurm.submit_job(&mut job).await?;
//!     let state = slurm.update_job_state(&mut job).await?;
//!     println!("{state}");
//!     Ok(())
//! }
//! ```

mod adapter;
mod parser;
mod templates;

pub use adapter::{SlurmConfig, SlurmLrms};
pub use parser::{QueueCounts, QueueStatus, STATUS_TAG};
