//! Job lifecycle: the `Run` state machine and POSIX-style exit status.
//!
//! Every job carries exactly one [`Run`] record. Backends observe remote
//! state and report it through `update_job_state`; all mutation of the
//! lifecycle funnels through [`Run::transition`], which keeps the
//! per-state timestamps and the audit history consistent.
//!
//! ```text
//!                   submit            start              reaped
//!          NEW ──────────▶ SUBMITTED ───────▶ RUNNING ──────────▶ TERMINATING ──▶ TERMINATED
//!                              │    suspend      │ ▲
//!                              │      ┌──────────┘ │ resume
//!                              ▼      ▼            │
//!                              └──▶ STOPPED ───────┘
//!
//!          any state ──▶ UNKNOWN (observation lost) ──▶ last observed state
//! ```

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::lrms::AccountingRecord;

/// Engine-synthesized signal numbers.
///
/// Real POSIX signals stop well below 64; these values mark conditions the
/// remote kernel never saw, so the two ranges cannot collide.
pub mod signals {
    /// The job vanished from the backend without a trace.
    pub const LOST: u8 = 120;
    /// Cancelled on caller request.
    pub const CANCELLED: u8 = 121;
    /// Killed by the remote scheduler (cancellation or resource limit).
    pub const REMOTE_KILL: u8 = 122;
    /// Staging the job's output failed.
    pub const DATA_STAGING_FAILURE: u8 = 123;
    /// Remote infrastructure failure (lost node, dead daemon).
    pub const REMOTE_ERROR: u8 = 124;
    /// The submission itself failed; the job never acquired a backend id.
    pub const SUBMISSION_FAILED: u8 = 125;
}

/// `EX_TEMPFAIL` from `sysexits.h`: a transient failure, try again later.
pub const EX_TEMPFAIL: u8 = 75;

/// Lifecycle states shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Created locally, not yet given to a backend.
    New,
    /// Accepted by the backend, waiting in its queue.
    Submitted,
    /// Executing remotely.
    Running,
    /// Suspended by the remote scheduler; may resume.
    Stopped,
    /// Left the live queue; accounting and outputs can be collected.
    Terminating,
    /// Fully finished: outputs fetched, record closed. Final.
    Terminated,
    /// The engine cannot observe the true state right now.
    Unknown,
}

impl RunState {
    /// Uppercase state name, as used in logs and session records.
    pub const fn name(self) -> &'static str {
        match self {
            RunState::New => "NEW",
            RunState::Submitted => "SUBMITTED",
            RunState::Running => "RUNNING",
            RunState::Stopped => "STOPPED",
            RunState::Terminating => "TERMINATING",
            RunState::Terminated => "TERMINATED",
            RunState::Unknown => "UNKNOWN",
        }
    }

    /// Whether this is the final state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, RunState::Terminated)
    }

    /// Whether the driver should keep polling the backend for this job.
    pub const fn needs_polling(self) -> bool {
        matches!(
            self,
            RunState::Submitted | RunState::Running | RunState::Stopped | RunState::Unknown
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// POSIX-style termination status: exit code byte plus signal byte.
///
/// Packed as `(code << 8) | signal`, the classic wait(2) layout. Synthetic
/// [`signals`] describe engine-level failures in the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Remote process exit code.
    pub code: u8,
    /// Terminating signal, `0` for a plain exit.
    pub signal: u8,
}

impl ExitStatus {
    /// Clean exit.
    pub const fn success() -> ExitStatus {
        ExitStatus { code: 0, signal: 0 }
    }

    /// Build from explicit code and signal bytes.
    pub const fn from_parts(code: u8, signal: u8) -> ExitStatus {
        ExitStatus { code, signal }
    }

    /// Interpret a shell-reported exit code: values above 128 mean
    /// "terminated by signal `rc - 128`".
    pub const fn from_shell_exit(rc: u32) -> ExitStatus {
        let rc = (rc & 0xff) as u8;
        if rc > 128 {
            ExitStatus {
                code: 0,
                signal: rc - 128,
            }
        } else {
            ExitStatus {
                code: rc,
                signal: 0,
            }
        }
    }

    /// The remote scheduler killed the job (cancellation, walltime).
    pub const fn killed_by_system() -> ExitStatus {
        ExitStatus {
            code: EX_TEMPFAIL,
            signal: signals::REMOTE_KILL,
        }
    }

    /// The job died with the remote infrastructure (node failure).
    pub const fn remote_error() -> ExitStatus {
        ExitStatus {
            code: EX_TEMPFAIL,
            signal: signals::REMOTE_ERROR,
        }
    }

    /// Cancelled on caller request before a real status was seen.
    pub const fn cancelled() -> ExitStatus {
        ExitStatus {
            code: 0,
            signal: signals::CANCELLED,
        }
    }

    /// Submission never succeeded.
    pub const fn submission_failed() -> ExitStatus {
        ExitStatus {
            code: 0,
            signal: signals::SUBMISSION_FAILED,
        }
    }

    /// wait(2)-style packed value.
    pub const fn to_raw(self) -> u16 {
        ((self.code as u16) << 8) | ((self.signal & 0x7f) as u16)
    }

    /// Unpack a wait(2)-style value.
    pub const fn from_raw(raw: u16) -> ExitStatus {
        ExitStatus {
            code: (raw >> 8) as u8,
            signal: (raw & 0x7f) as u8,
        }
    }

    /// Clean exit with code 0 and no signal.
    pub const fn is_success(self) -> bool {
        self.code == 0 && self.signal == 0
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.signal != 0 {
            write!(f, "killed by signal {}", self.signal)
        } else {
            write!(f, "exit code {}", self.code)
        }
    }
}

/// One timestamped line in a job's audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the event was recorded (engine clock).
    pub timestamp: DateTime<Utc>,
    /// Human-readable description.
    pub message: String,
}

/// The mutable execution record attached to a job.
///
/// The engine owns this record; backend adapters write observations into
/// it but the lifecycle state itself only moves through [`Run::transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    state: RunState,
    /// When the current state was entered.
    pub state_last_changed: DateTime<Utc>,
    /// Backend-assigned job id, set on successful submission.
    pub lrms_jobid: Option<String>,
    /// Remote sandbox directory holding the job's files.
    pub lrms_execdir: Option<String>,
    /// stdout file name inside the sandbox.
    pub stdout_filename: Option<String>,
    /// stderr file name inside the sandbox; `None` when joined into stdout.
    pub stderr_filename: Option<String>,
    /// Raw status string from the last successful backend observation.
    pub remote_status: Option<String>,
    /// Exit status, once known.
    pub exit_status: Option<ExitStatus>,
    /// Accounted usage, once retrieved.
    pub usage: Option<AccountingRecord>,
    /// First time the information system failed to answer for this job;
    /// cleared by any successful observation. Drives the grace window.
    pub unobserved_since: Option<DateTime<Utc>>,
    /// Most recent entry time into each state.
    pub timestamps: FxHashMap<RunState, DateTime<Utc>>,
    /// Append-only audit log.
    pub history: Vec<HistoryEntry>,
}

impl Run {
    /// A fresh record in [`RunState::New`].
    pub fn new() -> Run {
        let now = Utc::now();
        let mut timestamps = FxHashMap::default();
        timestamps.insert(RunState::New, now);
        Run {
            state: RunState::New,
            state_last_changed: now,
            lrms_jobid: None,
            lrms_execdir: None,
            stdout_filename: None,
            stderr_filename: None,
            remote_status: None,
            exit_status: None,
            usage: None,
            unobserved_since: None,
            timestamps,
            history: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `to`, recording the timestamp and a history entry.
    ///
    /// Entering the current state again is a no-op. A `TERMINATED` record
    /// is frozen: attempts to leave it are logged and ignored.
    pub fn transition(&mut self, to: RunState) {
        if self.state == to {
            return;
        }
        if self.state.is_terminal() {
            tracing::warn!(from = %self.state, %to, "ignoring transition out of a terminal state");
            return;
        }
        let now = Utc::now();
        tracing::debug!(from = %self.state, %to, "state transition");
        self.history.push(HistoryEntry {
            timestamp: now,
            message: format!("state changed {} -> {}", self.state, to),
        });
        self.timestamps.insert(to, now);
        self.state_last_changed = now;
        self.state = to;
    }

    /// Append a free-form history entry.
    pub fn record(&mut self, message: impl Into<String>) {
        self.history.push(HistoryEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// wait(2)-style packed exit value, once the status is known.
    pub fn returncode(&self) -> Option<u16> {
        self.exit_status.map(ExitStatus::to_raw)
    }
}

impl Default for Run {
    fn default() -> Run {
        Run::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_starts_new() {
        let run = Run::new();
        assert_eq!(run.state(), RunState::New);
        assert!(run.timestamps.contains_key(&RunState::New));
        assert!(run.exit_status.is_none());
    }

    #[test]
    fn transition_records_timestamp_and_history() {
        let mut run = Run::new();
        run.transition(RunState::Submitted);
        assert_eq!(run.state(), RunState::Submitted);
        assert!(run.timestamps.contains_key(&RunState::Submitted));
        assert_eq!(run.history.len(), 1);
        assert!(run.history[0].message.contains("NEW -> SUBMITTED"));
        assert_eq!(
            run.state_last_changed,
            run.timestamps[&RunState::Submitted]
        );
    }

    #[test]
    fn same_state_transition_is_a_noop() {
        let mut run = Run::new();
        run.transition(RunState::Submitted);
        let before = run.history.len();
        run.transition(RunState::Submitted);
        assert_eq!(run.history.len(), before);
    }

    #[test]
    fn terminated_is_frozen() {
        let mut run = Run::new();
        run.transition(RunState::Submitted);
        run.transition(RunState::Running);
        run.transition(RunState::Terminating);
        run.transition(RunState::Terminated);
        run.transition(RunState::Running);
        assert_eq!(run.state(), RunState::Terminated);
    }

    #[test]
    fn timestamps_are_monotonic() {
        let mut run = Run::new();
        for state in [
            RunState::Submitted,
            RunState::Running,
            RunState::Terminating,
            RunState::Terminated,
        ] {
            run.transition(state);
        }
        let mut previous = run.timestamps[&RunState::New];
        for state in [
            RunState::Submitted,
            RunState::Running,
            RunState::Terminating,
            RunState::Terminated,
        ] {
            let at = run.timestamps[&state];
            assert!(at >= previous, "{state} happened before its predecessor");
            previous = at;
        }
    }

    #[test]
    fn state_accessors() {
        assert!(RunState::Terminated.is_terminal());
        assert!(!RunState::Terminating.is_terminal());
        assert!(RunState::Unknown.needs_polling());
        assert!(!RunState::Terminating.needs_polling());
        assert_eq!(RunState::Stopped.name(), "STOPPED");
    }

    #[test]
    fn exit_status_packing() {
        let s = ExitStatus::from_parts(3, 0);
        assert_eq!(s.to_raw(), 3 << 8);
        assert_eq!(ExitStatus::from_raw(s.to_raw()), s);

        let killed = ExitStatus::killed_by_system();
        assert_eq!(killed.code, EX_TEMPFAIL);
        assert_eq!(killed.signal, signals::REMOTE_KILL);
        assert!(!killed.is_success());
        assert_eq!(ExitStatus::from_raw(killed.to_raw()), killed);
    }

    #[test]
    fn shell_exit_conversion() {
        assert_eq!(ExitStatus::from_shell_exit(0), ExitStatus::success());
        assert_eq!(ExitStatus::from_shell_exit(7).code, 7);
        // 137 = 128 + SIGKILL
        let sigkill = ExitStatus::from_shell_exit(137);
        assert_eq!(sigkill.signal, 9);
        assert_eq!(sigkill.code, 0);
    }

    #[test]
    fn display_forms() {
        assert_eq!(ExitStatus::success().to_string(), "exit code 0");
        assert_eq!(
            ExitStatus::killed_by_system().to_string(),
            format!("killed by signal {}", signals::REMOTE_KILL)
        );
    }
}
