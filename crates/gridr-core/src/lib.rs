//! Gridr core: job model, lifecycle, and the backend contract.
//!
//! This crate defines everything a batch-system adapter and the driver
//! layer agree on: what a job *is*, how its lifecycle moves, and which
//! operations every resource manager must offer.
//!
//! # Overview
//!
//! - A [`JobRequest`] describes what to run; a [`Job`] pairs it with the
//!   mutable [`Run`] execution record.
//! - [`Run`] is the uniform state machine every backend reports into:
//!   `NEW → SUBMITTED → RUNNING → TERMINATING → TERMINATED`, with
//!   `STOPPED` for suspension and `UNKNOWN` when observation is lost.
//! - The [`Lrms`] trait is the backend contract: submit, observe,
//!   account, cancel, collect, clean up. Adapters implement it; the
//!   driver in `gridr-engine` calls it.
//! - [`Transport`] abstracts command execution and file staging on the
//!   resource frontend; [`LocalTransport`] is the built-in
//!   implementation.
//! - [`QueryCache`] throttles information-system queries per backend.
//! - [`GridrConfig`] / [`ResourceConfig`] describe the configured
//!   resources; [`LrmsRegistry`] turns configurations into live
//!   backends by type name.
//!
//! # Example: implementing a backend
//!
//! ```ignore
//! use async_trait::async_trait;
//! use gridr_core::{
//!     AccountingRecord, Job, Lrms, LrmsLimits, LrmsResult, ResourceSnapshot, RunState,
//! };
//!
//! struct Printer {
//!     limits: LrmsLimits,
//! }
//!
//! #[async_trait]
//! impl Lrms for Printer {
//!     fn name(&self) -> &str { "printer" }
//!     fn limits(&self) -> &LrmsLimits { &self.limits }
//!
//!     async fn submit_job(&self, job: &mut Job) -> LrmsResult<()> {
//!         println!("would run {:?}", job.request.arguments);
//!         job.execution.lrms_jobid = Some("42".into());
//!         Ok(())
//!     }
//!     // ... remaining lifecycle methods ...
//! #   async fn update_job_state(&self, _: &mut Job) -> LrmsResult<RunState> { todo!() }
//! #   async fn get_accounting(&self, _: &Job) -> LrmsResult<Option<AccountingRecord>> { todo!() }
//! #   async fn cancel_job(&self, _: &mut Job) -> LrmsResult<()> { todo!() }
//! #   async fn get_results(&self, _: &mut Job, _: &std::path::Path, _: bool) -> LrmsResult<Vec<std::path::PathBuf>> { todo!() }
//! #   async fn free(&self, _: &mut Job) -> LrmsResult<()> { todo!() }
//! #   async fn get_resource_status(&self) -> LrmsResult<ResourceSnapshot> { todo!() }
//! #   async fn peek(&self, _: &Job, _: &str, _: i64, _: Option<u64>) -> LrmsResult<Vec<u8>> { todo!() }
//! #   async fn close(&self) -> LrmsResult<()> { Ok(()) }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod job;
pub mod lrms;
pub mod registry;
pub mod run;
pub mod transport;

pub use cache::QueryCache;
pub use config::{GridrConfig, ResourceConfig};
pub use error::{LrmsError, LrmsResult, TransportError, TransportResult};
pub use job::{Arch, FileMapping, Job, JobId, JobRequest};
pub use lrms::{AccountingRecord, Lrms, LrmsLimits, ResourceSnapshot};
pub use registry::LrmsRegistry;
pub use run::{ExitStatus, HistoryEntry, Run, RunState, signals, EX_TEMPFAIL};
pub use transport::{sh_quote, sh_quote_cmdline, CommandOutput, LocalTransport, Transport};
