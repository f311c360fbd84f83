//! Command and file transport between the engine and a resource frontend.
//!
//! Backends never touch `std::process` or the filesystem directly; they go
//! through a [`Transport`], so the same adapter logic drives a scheduler
//! on the local host or, with another implementation, one reachable over
//! the network. [`LocalTransport`] is the built-in implementation: each
//! command runs as its own `sh -c` child process under a per-command
//! timeout, and the file operations map straight onto `tokio::fs`.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::process::Command;

use crate::error::{TransportError, TransportResult};

/// Everything a finished command left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code; `-1` when the process died without one.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited cleanly.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Quote a string so `sh` passes it through as a single word.
///
/// Wraps the input in single quotes and escapes embedded single quotes,
/// which neutralizes every shell metacharacter.
pub fn sh_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Quote and join argv elements into one shell command line.
pub fn sh_quote_cmdline<I, S>(argv: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    argv.into_iter()
        .map(|word| sh_quote(word.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command execution and file service on a resource frontend.
///
/// # Contract
///
/// - `connect()` and `close()` are idempotent; `execute` on a closed
///   transport fails with [`TransportError::NotConnected`] where the
///   implementation tracks connection state at all.
/// - `execute()` returns the command's own outcome: a nonzero exit code
///   is a successful observation, not a transport error.
/// - Remote paths are strings in the remote system's syntax; local paths
///   are `Path`s on the caller's side.
/// - `remove_tree()` on a path that is already gone succeeds.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection. Idempotent.
    async fn connect(&self) -> TransportResult<()>;

    /// Run a shell command and collect its output.
    async fn execute(&self, command: &str) -> TransportResult<CommandOutput>;

    /// Copy a local file to the remote side, creating parent directories.
    async fn upload(&self, local: &Path, remote: &str) -> TransportResult<()>;

    /// Copy a remote file to the local side, creating parent directories.
    async fn download(&self, remote: &str, local: &Path) -> TransportResult<()>;

    /// Create or replace a remote file with the given bytes.
    async fn write_file(&self, remote: &str, contents: &[u8]) -> TransportResult<()>;

    /// Read a byte range from a remote file.
    ///
    /// A negative `offset` counts back from the end of the file; `size`
    /// of `None` reads to the end.
    async fn read_file_range(
        &self,
        remote: &str,
        offset: i64,
        size: Option<u64>,
    ) -> TransportResult<Vec<u8>>;

    /// Whether a remote path exists.
    async fn exists(&self, remote: &str) -> TransportResult<bool>;

    /// Recursively delete a remote directory. Succeeds when already gone.
    async fn remove_tree(&self, remote: &str) -> TransportResult<()>;

    /// Tear down the connection. Idempotent.
    async fn close(&self) -> TransportResult<()>;
}

/// Transport to a scheduler frontend on the local host.
///
/// Commands run as `sh -c <command>` child processes so the adapter's
/// command lines behave exactly as they would over a login shell.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    timeout: std::time::Duration,
}

impl LocalTransport {
    /// Default per-command timeout.
    pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

    /// Transport with the default timeout.
    pub fn new() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-command timeout.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(bytes: Vec<u8>, command: &str) -> TransportResult<String> {
    String::from_utf8(bytes).map_err(|_| TransportError::UndecodableOutput(command.to_string()))
}

fn map_not_found(err: std::io::Error, path: &str) -> TransportError {
    if err.kind() == std::io::ErrorKind::NotFound {
        TransportError::FileNotFound(path.to_string())
    } else {
        TransportError::Io(err)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn execute(&self, command: &str) -> TransportResult<CommandOutput> {
        tracing::debug!(%command, "executing");
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                // a timed-out command must die with its future, not
                // linger as an orphan
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| TransportError::CommandTimeout {
            command: command.to_string(),
            seconds: self.timeout.as_secs(),
        })??;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: decode(output.stdout, command)?,
            stderr: decode(output.stderr, command)?,
        })
    }

    async fn upload(&self, local: &Path, remote: &str) -> TransportResult<()> {
        if let Some(parent) = Path::new(remote).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local, remote)
            .await
            .map_err(|e| map_not_found(e, &local.display().to_string()))?;
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> TransportResult<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(remote, local)
            .await
            .map_err(|e| map_not_found(e, remote))?;
        Ok(())
    }

    async fn write_file(&self, remote: &str, contents: &[u8]) -> TransportResult<()> {
        if let Some(parent) = Path::new(remote).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(remote, contents).await?;
        Ok(())
    }

    async fn read_file_range(
        &self,
        remote: &str,
        offset: i64,
        size: Option<u64>,
    ) -> TransportResult<Vec<u8>> {
        let mut file = tokio::fs::File::open(remote)
            .await
            .map_err(|e| map_not_found(e, remote))?;
        let len = file.metadata().await?.len();
        let start = if offset >= 0 {
            (offset as u64).min(len)
        } else {
            len.saturating_sub(offset.unsigned_abs())
        };
        file.seek(SeekFrom::Start(start)).await?;

        let mut buffer = Vec::new();
        match size {
            Some(limit) => {
                file.take(limit).read_to_end(&mut buffer).await?;
            }
            None => {
                file.read_to_end(&mut buffer).await?;
            }
        }
        Ok(buffer)
    }

    async fn exists(&self, remote: &str) -> TransportResult<bool> {
        Ok(tokio::fs::try_exists(remote).await?)
    }

    async fn remove_tree(&self, remote: &str) -> TransportResult<()> {
        match tokio::fs::remove_dir_all(remote).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    async fn close(&self) -> TransportResult<()> {
        Ok(())
    }
}
