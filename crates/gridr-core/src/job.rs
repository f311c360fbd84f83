//! Job model: what to run, with which resources, and what happened to it.
//!
//! A [`JobRequest`] is the immutable description the caller hands in; the
//! engine wraps it in a [`Job`], which pairs the request with the mutable
//! [`Run`](crate::run::Run) execution record and the name of the resource
//! the job was dispatched to.

use std::path::PathBuf;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gridr_units::{Duration, Memory};

use crate::run::Run;

/// Unique engine-side identifier for a job.
///
/// Distinct from the backend-assigned id (`Run::lrms_jobid`), which only
/// exists after a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a job ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processor architecture a job may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// 64-bit x86.
    #[serde(rename = "x86_64")]
    X86_64,
    /// 32-bit x86.
    #[serde(rename = "i686")]
    I686,
    /// 64-bit ARM.
    #[serde(rename = "aarch64")]
    Aarch64,
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Arch::X86_64 => "x86_64",
            Arch::I686 => "i686",
            Arch::Aarch64 => "aarch64",
        })
    }
}

/// One file staged between the caller's machine and the job sandbox.
///
/// For inputs, `local` is the source on the caller's side and `remote` the
/// path inside the sandbox (relative, forward slashes). For outputs the
/// direction reverses: `remote` names the sandbox file to collect, `local`
/// the path it lands at under the download directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    /// Path on the caller's side.
    pub local: PathBuf,
    /// Path inside the remote sandbox, relative to its root.
    pub remote: String,
}

impl FileMapping {
    /// Map a local path to a sandbox-relative remote name.
    pub fn new(local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }

    /// Map a name to itself on both sides.
    pub fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            local: PathBuf::from(&name),
            remote: name,
        }
    }
}

/// What to run: command line, file staging, and resource requirements.
///
/// Built with [`JobRequest::new`] plus the `with_*` methods:
///
/// ```ignore
/// let request = JobRequest::new("render-frame-042", ["./render", "--frame", "42"])
///     .with_input(FileMapping::same("scene.blend"))
///     .with_output(FileMapping::same("frame042.png"))
///     .with_cores(4)
///     .with_memory_per_core(Memory::gib(2))
///     .with_walltime(Duration::hours(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Human-readable job name; also the scheduler-visible name.
    pub name: String,
    /// Program and arguments, uninterpreted. The generated job script
    /// quotes each element, so no shell metacharacters fire remotely.
    pub arguments: Vec<String>,
    /// Files to copy into the sandbox before the job starts.
    pub inputs: Vec<FileMapping>,
    /// Files to collect from the sandbox after the job ends.
    pub outputs: Vec<FileMapping>,
    /// Local file to connect to the job's standard input.
    pub stdin: Option<PathBuf>,
    /// Sandbox-relative name for captured stdout; defaults to `<name>.out`.
    pub stdout: Option<String>,
    /// Sandbox-relative name for captured stderr. When unset, stderr is
    /// joined into the stdout file.
    pub stderr: Option<String>,
    /// Extra environment variables exported inside the job script.
    pub environment: FxHashMap<String, String>,
    /// Number of execution slots (cores) to request.
    pub cores: u32,
    /// Memory per requested core, if constrained.
    pub memory_per_core: Option<Memory>,
    /// Maximum wall-clock run time, if constrained.
    pub walltime: Option<Duration>,
    /// Required processor architecture, if any.
    pub architecture: Option<Arch>,
}

impl JobRequest {
    /// A single-core request with no staging and no limits.
    pub fn new(
        name: impl Into<String>,
        arguments: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            environment: FxHashMap::default(),
            cores: 1,
            memory_per_core: None,
            walltime: None,
            architecture: None,
        }
    }

    /// Add an input file to stage into the sandbox.
    pub fn with_input(mut self, mapping: FileMapping) -> Self {
        self.inputs.push(mapping);
        self
    }

    /// Add an output file to collect from the sandbox.
    pub fn with_output(mut self, mapping: FileMapping) -> Self {
        self.outputs.push(mapping);
        self
    }

    /// Connect the job's standard input to a local file.
    pub fn with_stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Name the file capturing standard output.
    pub fn with_stdout(mut self, name: impl Into<String>) -> Self {
        self.stdout = Some(name.into());
        self
    }

    /// Name the file capturing standard error (disables joining).
    pub fn with_stderr(mut self, name: impl Into<String>) -> Self {
        self.stderr = Some(name.into());
        self
    }

    /// Export an environment variable inside the job script.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Request a number of execution slots.
    pub fn with_cores(mut self, cores: u32) -> Self {
        self.cores = cores;
        self
    }

    /// Request memory per core.
    pub fn with_memory_per_core(mut self, memory: Memory) -> Self {
        self.memory_per_core = Some(memory);
        self
    }

    /// Limit the wall-clock run time.
    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.walltime = Some(walltime);
        self
    }

    /// Require a processor architecture.
    pub fn with_architecture(mut self, arch: Arch) -> Self {
        self.architecture = Some(arch);
        self
    }

    /// Total memory across all requested cores, when constrained.
    pub fn total_memory(&self) -> Option<Memory> {
        self.memory_per_core.map(|m| m * u64::from(self.cores))
    }
}

/// A request plus its execution record.
///
/// The engine mutates `execution` as the job moves through its lifecycle;
/// `request` stays as the caller wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Engine-side identifier, assigned at construction.
    pub id: JobId,
    /// Resource the job targets. May be set by the caller to pin the job
    /// to a named resource; filled in by the driver on submission.
    pub resource_name: Option<String>,
    /// What to run.
    pub request: JobRequest,
    /// What happened.
    pub execution: Run,
    /// Where `fetch_output` downloaded the results, once it has.
    pub download_dir: Option<PathBuf>,
}

impl Job {
    /// Wrap a request in a fresh execution record.
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: JobId::new(),
            resource_name: None,
            request,
            execution: Run::new(),
            download_dir: None,
        }
    }

    /// Pin the job to a named resource instead of first-fit matching.
    pub fn with_resource(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Current lifecycle state, straight from the execution record.
    pub fn state(&self) -> crate::run::RunState {
        self.execution.state()
    }
}
