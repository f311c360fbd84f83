//! Gridr engine: the driver that moves jobs through their lifecycle.
//!
//! `gridr-core` defines the contract; backend adapters observe; this
//! crate decides. [`Core`] holds the configured backends, picks one for
//! each submission, and performs every transition a backend is not
//! allowed to make itself: moving a fresh job to `SUBMITTED`, closing
//! the record of a failed submission, finalizing a `TERMINATING` job
//! once its outputs are safely downloaded.
//!
//! # Overview
//!
//! - [`Core`] is the driver: `submit_job`, `update_job_state`,
//!   `fetch_output`, `kill`, `free`. It consumes the `Lrms` trait from
//!   `gridr-core` and never talks to a scheduler directly.
//! - [`builtin_registry`] wires up the adapters linked into this build
//!   (currently `slurm`), so a YAML configuration is enough to get a
//!   running driver.
//! - [`RetryingJob`] wraps a job with a [`RetryPolicy`] and resubmits
//!   failed attempts as fresh jobs. [`RetryOnOutOfMemory`] is the
//!   built-in policy: it retries memory deaths with a raised request.
//!
//! # Example
//!
//! ```ignore
//! use gridr_core::{GridrConfig, JobRequest, Job, RunState};
//! use gridr_engine::Core;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GridrConfig::from_yaml(std::fs::read_to_string("gridr.yaml")?.as_str())?;
//!     let core = Core::from_config(&config)?;
//!
//!     let mut job = Job::new(JobRequest::new("hello", ["/bin/echo", "hello"]));
//!     core.submit_job(&mut job).await?;
//!     loop {
//!         tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!         match core.update_job_state(&mut job).await {
//!             Ok(RunState::Terminating) | Ok(RunState::Terminated) => break,
//!             Ok(_) => continue,
//!             Err(err) if err.is_recoverable() => continue,
//!             Err(err) => return Err(err.into()),
//!         }
//!     }
//!     core.fetch_output(&mut job, "results".as_ref(), false).await?;
//!     core.free(&mut job).await?;
//!     println!("{:?}", job.execution.exit_status);
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod retry;

pub use self::core::{builtin_registry, Core};
pub use retry::{NeverRetry, RetryDecision, RetryOnOutOfMemory, RetryPolicy, RetryingJob};
