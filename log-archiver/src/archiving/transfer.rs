//! Archive transfer command
//!
//! 归档文件完成后执行外部传输命令 (`/bin/sh -c "<command>"`)。
//!
//! stdout and stderr are drained by two independent tasks; reading only one
//! of them lets the other pipe fill up and the child blocks forever.
//! Transfer failures never fail archiving, they are only logged.
//!
//! The shell runs in its own process group, so a timeout kills everything it
//! started and not just `/bin/sh`.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Shell used to interpret the transfer command
const SHELL: &str = "/bin/sh";
/// Captured stderr is truncated beyond this size
pub const MAX_STDERR_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Failed to execute archive transfer command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Running archive transfer command '{command}' exited with status '{code:?}'")]
    NonZeroExit {
        command: String,
        /// `None` when the process was terminated by a signal
        code: Option<i32>,
        stderr: String,
    },

    #[error("Archive transfer command '{command}' timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Result of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// No command configured
    Skipped,
    Completed,
}

/// Runs the configured transfer command after an archive is committed
#[derive(Debug, Clone, Default)]
pub struct TransferInvoker {
    command: String,
    timeout: Option<Duration>,
}

impl TransferInvoker {
    pub fn new(command: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_configured(&self) -> bool {
        !self.command.trim().is_empty()
    }

    /// Run the command and log any failure instead of returning it
    pub async fn invoke_logged(&self, archive: &Path) {
        match self.invoke(archive).await {
            Ok(TransferStatus::Skipped) => {}
            Ok(TransferStatus::Completed) => {
                tracing::debug!(
                    command = %self.command,
                    archive = %archive.display(),
                    "Archive transfer completed"
                );
            }
            Err(TransferError::NonZeroExit {
                command,
                code,
                stderr,
            }) => {
                tracing::error!(
                    command = %command,
                    exit_code = ?code,
                    "Running archive transfer command '{}' exited with status '{:?}'\n -- STANDARD ERROR START\n{}\n -- STANDARD ERROR END",
                    command,
                    code,
                    stderr
                );
            }
            Err(e) => {
                tracing::error!(command = %self.command, error = %e, "Archive transfer failed");
            }
        }
    }

    /// Run the command for a freshly finalized archive.
    ///
    /// The command receives no arguments; `archive` is only used for logging.
    pub async fn invoke(&self, archive: &Path) -> Result<TransferStatus, TransferError> {
        if !self.is_configured() {
            return Ok(TransferStatus::Skipped);
        }

        tracing::info!(
            command = %self.command,
            archive = %archive.display(),
            "Transferring archives with shell command"
        );

        let mut child = Command::new(SHELL)
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransferError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let stdout_task = tokio::spawn(async move {
                if let Some(mut out) = stdout {
                    if let Err(e) = tokio::io::copy(&mut out, &mut tokio::io::sink()).await {
                        tracing::error!(error = %e, "Could not read standard output");
                    }
                }
            });
            let stderr_task = tokio::spawn(async move {
                match stderr {
                    Some(err) => collect_bounded(err, MAX_STDERR_BYTES).await,
                    None => String::new(),
                }
            });

            let (_, stderr) = tokio::join!(stdout_task, stderr_task);
            let status = child.wait().await;
            (status, stderr.unwrap_or_default())
        };

        let (status, stderr) = match self.timeout {
            Some(timeout) => {
                let outcome = tokio::time::timeout(timeout, run).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        kill_process_group(pid);
                        if let Err(e) = child.wait().await {
                            tracing::warn!(error = %e, "Could not reap timed out transfer command");
                        }
                        return Err(TransferError::TimedOut {
                            command: self.command.clone(),
                            timeout,
                        });
                    }
                }
            }
            None => run.await,
        };

        let status: ExitStatus = status.map_err(|source| TransferError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        if status.success() {
            Ok(TransferStatus::Completed)
        } else {
            Err(TransferError::NonZeroExit {
                command: self.command.clone(),
                code: status.code(),
                stderr,
            })
        }
    }
}

/// SIGKILL the process group led by `pid`
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: plain syscall, no memory is shared with the kernel
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        let e = std::io::Error::last_os_error();
        tracing::warn!(pgid, error = %e, "Could not kill transfer process group");
    }
}

/// Read a stream to the end, keeping at most `limit` bytes
async fn collect_bounded<R>(mut reader: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                if n > room {
                    truncated = true;
                }
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not read standard error");
                break;
            }
        }
    }

    let mut text = String::from_utf8_lossy(&captured).into_owned();
    if truncated {
        text.push_str("\n[stderr truncated]");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn archive() -> PathBuf {
        PathBuf::from("/tmp/mlog-test.zip")
    }

    #[tokio::test]
    async fn test_empty_command_is_skipped() {
        let invoker = TransferInvoker::new("", None);
        assert!(!invoker.is_configured());
        assert_eq!(invoker.invoke(&archive()).await.unwrap(), TransferStatus::Skipped);

        let blank = TransferInvoker::new("   ", None);
        assert_eq!(blank.invoke(&archive()).await.unwrap(), TransferStatus::Skipped);
    }

    #[tokio::test]
    async fn test_successful_command() {
        let invoker = TransferInvoker::new("true", None);
        assert_eq!(invoker.invoke(&archive()).await.unwrap(), TransferStatus::Completed);
    }

    #[tokio::test]
    async fn test_non_zero_exit_captures_stderr() {
        let invoker = TransferInvoker::new("echo 'no route to host' >&2; exit 3", None);
        match invoker.invoke(&archive()).await {
            Err(TransferError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("no route to host"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_large_output_on_both_streams_does_not_block() {
        // Far beyond the OS pipe buffer on both streams
        let invoker = TransferInvoker::new(
            "head -c 2000000 /dev/zero; head -c 2000000 /dev/zero >&2; exit 1",
            Some(Duration::from_secs(30)),
        );
        match invoker.invoke(&archive()).await {
            Err(TransferError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, Some(1));
                assert!(stderr.ends_with("[stderr truncated]"));
                assert!(stderr.len() <= MAX_STDERR_BYTES + 32);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let invoker = TransferInvoker::new("sleep 30", Some(Duration::from_millis(200)));
        let started = std::time::Instant::now();
        let result = invoker.invoke(&archive()).await;
        assert!(matches!(result, Err(TransferError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("uploaded");
        let command = format!("(sleep 1; touch {}); true", marker.display());

        let invoker = TransferInvoker::new(command, Some(Duration::from_millis(200)));
        let result = invoker.invoke(&archive()).await;
        assert!(matches!(result, Err(TransferError::TimedOut { .. })));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_timeout_returns_while_grandchild_holds_pipes() {
        // The background sleep inherits stdout/stderr
        let invoker = TransferInvoker::new("sleep 30 & wait", Some(Duration::from_millis(200)));
        let started = std::time::Instant::now();
        let result = invoker.invoke(&archive()).await;
        assert!(matches!(result, Err(TransferError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_invoke_logged_absorbs_failures() {
        TransferInvoker::new("exit 2", None)
            .invoke_logged(&archive())
            .await;
    }

    #[tokio::test]
    async fn test_collect_bounded_truncates() {
        let data: &[u8] = b"abcdefghij";
        assert_eq!(collect_bounded(data, 4).await, "abcd\n[stderr truncated]");
        assert_eq!(collect_bounded(data, 64).await, "abcdefghij");
    }
}
