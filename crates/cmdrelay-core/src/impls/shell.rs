//! ShellExecutor - `sh -c <command>` によるコマンド実行
//!
//! - 環境変数は親プロセスから継承、stdin は null
//! - stdout / stderr は届いた順にログへ流しつつ全量を蓄積する（上限なし）
//! - timeout は任意。設定時は超過したプロセスグループごと kill して失敗扱いにする
//!   （それまでに読めた出力は結果に残す）

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{ExecutionResult, RelayError};
use crate::ports::CommandExecutor;

pub const DEFAULT_SHELL: &str = "sh";

/// How long to keep reading pipes after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Startup check: the configured shell must be able to run a no-op.
    pub async fn check_available(&self) -> Result<(), RelayError> {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg("exit 0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                RelayError::Startup(format!("shell '{}' not available: {e}", self.shell))
            })?;

        if !status.success() {
            return Err(RelayError::Startup(format!(
                "shell '{}' exited with {status} on a no-op",
                self.shell
            )));
        }
        info!(shell = %self.shell, "shell available");
        Ok(())
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
    ) -> Result<ExecutionResult, RelayError> {
        info!(command, cwd = ?cwd, "executing command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            warn!(command, error = %e, "failed to spawn");
            RelayError::Spawn(e)
        })?;

        let stdout = spawn_drain(child.stdout.take(), "stdout");
        let stderr = spawn_drain(child.stderr.take(), "stderr");

        let status = match self.timeout {
            None => child.wait().await,
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(command, timeout = ?limit, "command timed out, killing");
                        kill_process_tree(&mut child);
                        let _ = child.wait().await;
                        let stdout = stdout.collect(Some(DRAIN_GRACE)).await;
                        let stderr = stderr.collect(Some(DRAIN_GRACE)).await;
                        let mut result = ExecutionResult::failed(stdout, stderr);
                        result.error = Some(format!("command timed out after {limit:?}"));
                        return Ok(result);
                    }
                }
            }
        };

        let stdout = stdout.collect(None).await;
        let stderr = stderr.collect(None).await;

        match status {
            Ok(status) if status.success() => {
                info!(exit_code = 0, "command exited");
                Ok(ExecutionResult::succeeded(stdout, stderr))
            }
            Ok(status) => {
                info!(exit_code = ?status.code(), "command exited");
                Ok(ExecutionResult::failed(stdout, stderr))
            }
            // The child was spawned but waiting on it failed; report like a non-zero exit.
            Err(e) => {
                warn!(error = %e, "failed to wait for command");
                let mut result = ExecutionResult::failed(stdout, stderr);
                result.error = Some(e.to_string());
                Ok(result)
            }
        }
    }
}

/// The shell leads its own process group, so the whole group goes down together.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) => return,
                Err(e) => warn!(pid, error = %e, "killpg failed, killing shell only"),
            }
        }
    }
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "kill failed");
    }
}

/// Output read so far from one pipe.
///
/// The reader task appends into `buf`, so aborting the task keeps every
/// chunk that already arrived.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

fn spawn_drain<R>(reader: Option<R>, stream: &'static str) -> Drain
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Arc::new(Mutex::new(Vec::new()));
    let handle = reader.map(|r| tokio::spawn(drain(r, stream, Arc::clone(&buf))));
    Drain { buf, handle }
}

async fn drain<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: &'static str,
    buf: Arc<Mutex<Vec<u8>>>,
) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]);
                debug!(stream, chunk = %text.trim_end(), "output");
                buf.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                warn!(stream, error = %e, "pipe read failed");
                break;
            }
        }
    }
}

impl Drain {
    /// Wait for the pipe to close (at most `grace` when given) and take the output.
    async fn collect(self, grace: Option<Duration>) -> String {
        if let Some(mut handle) = self.handle {
            match grace {
                None => {
                    let _ = (&mut handle).await;
                }
                Some(grace) => {
                    if tokio::time::timeout(grace, &mut handle).await.is_err() {
                        // 孫プロセスがパイプを握っている
                        handle.abort();
                    }
                }
            }
        }
        let bytes = std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner));
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
