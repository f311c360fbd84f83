//! Parsers for SLURM command output.
//!
//! Everything here is a pure function from command output to typed data,
//! so the whole protocol surface is testable against canned transcripts.
//! The policy throughout: a failed or empty answer is "no data" and the
//! caller decides what that means, but a malformed line inside a
//! successful answer is a hard error. Guessing around a scheduler whose
//! output we cannot read only produces wrong job states.

use chrono::NaiveDateTime;

use gridr_core::{AccountingRecord, ExitStatus, LrmsError, LrmsResult, RunState};
use gridr_units::{Duration, Memory, MemoryUnit};

/// Sentinel prefixed to the status format string so wrapper scripts and
/// site MOTDs cannot inject lines we would mistake for job records.
pub const STATUS_TAG: &str = "gridr";

/// Master-record states with a final accounting record behind them.
const TERMINAL_STATES: [&str; 7] = [
    "BOOT_FAIL",
    "CANCELLED",
    "COMPLETED",
    "FAILED",
    "NODE_FAIL",
    "PREEMPTED",
    "TIMEOUT",
];

/// Master-record states of a job `sacct` still considers live: no final data.
const LIVE_STATES: [&str; 5] = ["RUNNING", "PENDING", "COMPLETING", "SUSPENDED", "RESIZING"];

/// One tagged line from the status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    /// Mapped lifecycle state.
    pub state: RunState,
    /// Raw SLURM state string, for the execution record.
    pub remote_state: String,
    /// SLURM's reason field (`%r`), e.g. `Resources` or `Priority`.
    pub reason: String,
}

/// Queue occupancy counts from the unfiltered capacity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    /// Executing jobs, all users.
    pub total_running: u32,
    /// Queued jobs, all users.
    pub total_queued: u32,
    /// Executing jobs owned by the configured user.
    pub own_running: u32,
    /// Queued jobs owned by the configured user.
    pub own_queued: u32,
}

/// Extract the job id from `sbatch` stdout.
///
/// Accepts `Submitted batch job <id>` and `Granted job allocation <id>`,
/// optionally prefixed with `sbatch: `, anywhere in the output. Anything
/// else means the submission cannot be trusted to have happened.
pub fn parse_sbatch_output(stdout: &str) -> LrmsResult<String> {
    for line in stdout.lines() {
        let line = line.trim();
        let line = line
            .strip_prefix("sbatch:")
            .map(str::trim_start)
            .unwrap_or(line);
        for prefix in ["Submitted batch job", "Granted job allocation"] {
            if let Some(rest) = line.strip_prefix(prefix) {
                let id: String = rest
                    .trim_start()
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect();
                if !id.is_empty() {
                    return Ok(id);
                }
            }
        }
    }
    Err(LrmsError::Submission(format!(
        "sbatch output contains no job id: {stdout:?}"
    )))
}

/// Map a SLURM job state string onto the uniform lifecycle.
pub fn map_squeue_state(state: &str) -> LrmsResult<RunState> {
    match state {
        "PENDING" | "CONFIGURING" => Ok(RunState::Submitted),
        "RUNNING" | "COMPLETING" => Ok(RunState::Running),
        "SUSPENDED" => Ok(RunState::Stopped),
        "COMPLETED" | "CANCELLED" | "FAILED" | "NODE_FAIL" | "PREEMPTED" | "TIMEOUT" => {
            Ok(RunState::Terminating)
        }
        other => Err(LrmsError::UnknownJobState {
            state: other.to_string(),
        }),
    }
}

/// Parse the tagged status line out of `squeue` output.
///
/// Returns `Ok(None)` when no tagged line is present: the job has left
/// the live queue and accounting must be consulted.
pub fn parse_squeue_output(stdout: &str) -> LrmsResult<Option<QueueStatus>> {
    for line in stdout.lines() {
        let line = line.trim();
        if !line.starts_with(STATUS_TAG) {
            continue;
        }
        let fields: Vec<&str> = line.split('^').collect();
        let [tag, _jobid, state, reason] = fields.as_slice() else {
            return Err(LrmsError::Parse(format!(
                "malformed status line (expected 4 ^-separated fields): {line:?}"
            )));
        };
        if *tag != STATUS_TAG {
            continue;
        }
        return Ok(Some(QueueStatus {
            state: map_squeue_state(state)?,
            remote_state: (*state).to_string(),
            reason: (*reason).to_string(),
        }));
    }
    Ok(None)
}

/// Parse a SLURM duration: `[[DD-]HH:]MM:SS[.fraction]`.
pub fn parse_elapsed(text: &str) -> LrmsResult<Duration> {
    let text = text.trim();
    let bad = || LrmsError::Parse(format!("cannot parse {text:?} as a SLURM duration"));

    let (days, clock) = match text.split_once('-') {
        Some((days, clock)) => (days.parse::<u64>().map_err(|_| bad())?, clock),
        None => (0, text),
    };
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(bad());
    }

    // Fields are fixed from the right: seconds, then minutes, then hours.
    let mut fields = parts.iter().rev();
    let seconds_field = fields.next().ok_or_else(bad)?;
    let (seconds, fraction_ns) = match seconds_field.split_once('.') {
        Some((whole, fraction)) => {
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return Err(bad());
            }
            let digits: String = fraction.chars().take(9).collect();
            let scale = 10u64.pow(9 - digits.len() as u32);
            (
                whole.parse::<u64>().map_err(|_| bad())?,
                digits.parse::<u64>().map_err(|_| bad())? * scale,
            )
        }
        None => (seconds_field.parse::<u64>().map_err(|_| bad())?, 0),
    };
    let minutes = match fields.next() {
        Some(f) => f.parse::<u64>().map_err(|_| bad())?,
        None => 0,
    };
    let hours = match fields.next() {
        Some(f) => f.parse::<u64>().map_err(|_| bad())?,
        None => 0,
    };

    let total_seconds = days * 86_400 + hours * 3_600 + minutes * 60 + seconds;
    if fraction_ns == 0 {
        Ok(Duration::seconds(total_seconds))
    } else if fraction_ns % 1_000_000 == 0 {
        Ok(Duration::milliseconds(
            total_seconds * 1_000 + fraction_ns / 1_000_000,
        ))
    } else {
        Ok(Duration::nanoseconds(
            total_seconds * 1_000_000_000 + fraction_ns,
        ))
    }
}

/// Parse a `maxrss`/`maxvmsize` value.
///
/// `K`/`M`/`G` suffixes are binary multiples (`7884K` is 7884 KiB); a bare
/// number is bytes. An empty field means the scheduler did not sample the
/// value (seen on `NODE_FAIL`): that is "unknown", never zero.
pub fn parse_memspec(text: &str) -> LrmsResult<Option<Memory>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let bad = || LrmsError::Parse(format!("cannot parse {text:?} as a SLURM memory value"));

    let (amount, unit) = match text.chars().next_back() {
        Some('K') => (&text[..text.len() - 1], MemoryUnit::KiB),
        Some('M') => (&text[..text.len() - 1], MemoryUnit::MiB),
        Some('G') => (&text[..text.len() - 1], MemoryUnit::GiB),
        Some(c) if c.is_ascii_digit() => (text, MemoryUnit::B),
        _ => return Err(bad()),
    };
    let value: f64 = amount.parse().map_err(|_| bad())?;
    if !value.is_finite() || value < 0.0 {
        return Err(bad());
    }
    let rounded = value.round();
    if rounded > (u64::MAX / unit.bytes()) as f64 {
        return Err(bad());
    }
    Ok(Some(Memory::new(rounded as u64, unit)))
}

/// Parse a `sacct` timestamp in the `standard` (ISO8601) time format.
///
/// `Unknown`, `None`, and the empty string all mean "not recorded".
pub fn parse_timestamp(text: &str) -> LrmsResult<Option<NaiveDateTime>> {
    let text = text.trim();
    if text.is_empty() || text == "Unknown" || text == "None" {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .map(Some)
        .map_err(|_| {
            LrmsError::Parse(format!(
                "cannot parse {text:?} as an ISO8601 timestamp; \
                 the SLURM_TIME_FORMAT=standard override seems not to be honored"
            ))
        })
}

fn fold_min(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn fold_max(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn fold_max_memory(a: Option<Memory>, b: Option<Memory>) -> Option<Memory> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn reconstruct_exit(state: &str, exit_field: &str) -> LrmsResult<ExitStatus> {
    match state {
        // The tool reports `0:0` or `0:1` here, but the job did not
        // produce that status: the scheduler killed it.
        "CANCELLED" | "TIMEOUT" => Ok(ExitStatus::killed_by_system()),
        "NODE_FAIL" => Ok(ExitStatus::remote_error()),
        _ => {
            let Some((code, signal)) = exit_field.split_once(':') else {
                return Err(LrmsError::Parse(format!(
                    "cannot parse {exit_field:?} as a SLURM exit:signal pair"
                )));
            };
            let parse = |s: &str| {
                s.parse::<u8>().map_err(|_| {
                    LrmsError::Parse(format!(
                        "cannot parse {exit_field:?} as a SLURM exit:signal pair"
                    ))
                })
            };
            Ok(ExitStatus::from_parts(parse(code)?, parse(signal)?))
        }
    }
}

/// Parse `sacct --parsable` output into an accounting record.
///
/// The master record (job id without a step suffix) supplies state, exit
/// status, cores, and durations; step records (`<id>.batch`, `<id>.N`)
/// supply the peak memory figures and correct the timestamps, since some
/// SLURM versions fill the master's `submit`/`start` columns with the
/// wrong clock. Returns `Ok(None)` while the scheduler has no final
/// record: empty output, or a master record still in a live state.
pub fn parse_sacct_output(stdout: &str) -> LrmsResult<Option<AccountingRecord>> {
    let mut master_seen = false;
    let mut cores = 0u32;
    let mut duration = Duration::seconds(0);
    let mut used_cpu_time = Duration::seconds(0);
    let mut exit_status = None;
    let mut max_used_memory = None;
    let mut max_used_rss = None;
    let mut submitted_at = None;
    let mut started_at = None;
    let mut completed_at = None;

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        // 11 named fields plus the empty one after the trailing `|`
        let [jobid, exit, state, ncpus, elapsed, totalcpu, submit, start, end, maxrss, maxvmsize, _] =
            fields.as_slice()
        else {
            return Err(LrmsError::Parse(format!(
                "malformed sacct line (expected 11 |-separated fields): {line:?}"
            )));
        };
        // "CANCELLED by 1000" carries the cancelling uid; only the first
        // word is the state.
        let state = state.split_whitespace().next().unwrap_or_default();

        if !jobid.contains('.') {
            // master record
            if LIVE_STATES.contains(&state) {
                return Ok(None);
            }
            if !TERMINAL_STATES.contains(&state) {
                return Err(LrmsError::UnknownJobState {
                    state: state.to_string(),
                });
            }
            master_seen = true;
            exit_status = Some(reconstruct_exit(state, exit)?);
            cores = ncpus
                .parse()
                .map_err(|_| LrmsError::Parse(format!("bad ncpus field: {ncpus:?}")))?;
            duration = parse_elapsed(elapsed)?;
            used_cpu_time = parse_elapsed(totalcpu)?;

            let submit = parse_timestamp(submit)?;
            let start = parse_timestamp(start)?;
            let end = parse_timestamp(end)?;
            submitted_at = fold_min(submit, start);
            // the master's own start column is unreliable; seed with the
            // latest possible value and let step records pull it down
            started_at = end;
            completed_at = fold_max(fold_max(submit, start), end);
        } else {
            // step record
            max_used_memory = fold_max_memory(max_used_memory, parse_memspec(maxvmsize)?);
            max_used_rss = fold_max_memory(max_used_rss, parse_memspec(maxrss)?);
            submitted_at = fold_min(submitted_at, parse_timestamp(submit)?);
            started_at = fold_min(started_at, parse_timestamp(start)?);
        }
    }

    if !master_seen {
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        return Err(LrmsError::Parse(
            "sacct output has step records but no master record".to_string(),
        ));
    }

    Ok(Some(AccountingRecord {
        cores,
        duration,
        used_cpu_time,
        max_used_memory,
        max_used_rss,
        submitted_at,
        started_at,
        completed_at,
        exit_status,
    }))
}

/// Interpret a `scancel` invocation's outcome.
///
/// Silence means the job was cancelled. An error line means the id was
/// already gone, which for our purposes is the same success. Exit 127 is
/// the one real failure: the tool itself is missing or misconfigured.
pub fn parse_scancel(exit_code: i32, stderr: &str) -> LrmsResult<()> {
    if exit_code == 127 {
        return Err(LrmsError::Configuration(format!(
            "scancel could not be run (exit 127): {}",
            stderr.trim()
        )));
    }
    Ok(())
}

/// Classify every job in the unfiltered capacity listing.
///
/// Lines are `%i^%T^%u^%U^%r^%R`. `RUNNING` and `COMPLETING` jobs count
/// as running; `PENDING` and `CONFIGURING` as queued (a `CONFIGURING` job
/// holds no compute yet); everything else occupies neither bucket.
pub fn count_jobs(stdout: &str, username: &str) -> LrmsResult<QueueCounts> {
    let mut counts = QueueCounts::default();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('^').collect();
        let [_jobid, state, user, _uid, _reason, _nodelist] = fields.as_slice() else {
            return Err(LrmsError::Parse(format!(
                "malformed capacity line (expected 6 ^-separated fields): {line:?}"
            )));
        };
        match *state {
            "RUNNING" | "COMPLETING" => {
                counts.total_running += 1;
                if *user == username {
                    counts.own_running += 1;
                }
            }
            "PENDING" | "CONFIGURING" => {
                counts.total_queued += 1;
                if *user == username {
                    counts.own_queued += 1;
                }
            }
            _ => {}
        }
    }
    Ok(counts)
}
