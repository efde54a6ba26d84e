//! Stdio transport for MCP child-process servers
//!
//! [`spawn`] launches the server described by a [`ServerConfig`] with all
//! three stdio handles piped, and starts a supervisor task that owns the
//! [`Child`]. The supervisor reports the exit code through
//! [`PeerIo::exited`] and, when [`PeerIo::shutdown`] is cancelled,
//! terminates the child: SIGTERM first on Unix, then a hard kill if the
//! child is still alive after [`TERMINATE_GRACE`].
//!
//! The child's environment is the parent environment plus the configured
//! overrides.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{Result, ToolmuxError};
use crate::mcp::transport::PeerIo;

/// How long a terminated child gets to exit before it is killed outright.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Spawn a server process and wire up its stdio pipes.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`ToolmuxError::Transport`] if the process cannot be spawned or
/// if a stdio pipe is unavailable.
///
/// # Examples
///
/// ```no_run
/// use toolmux::config::ServerConfig;
/// use toolmux::mcp::transport::stdio;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let server = ServerConfig::new("npx")
///     .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]);
/// let io = stdio::spawn(&server)?;
/// io.shutdown.cancel();
/// # Ok(())
/// # }
/// ```
pub fn spawn(server: &ServerConfig) -> Result<PeerIo> {
    let mut cmd = Command::new(&server.command);
    cmd.args(&server.args)
        .envs(&server.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &server.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        ToolmuxError::Transport(format!(
            "failed to spawn MCP server `{}`: {}",
            server.command, e
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ToolmuxError::Transport("child stdin unavailable after spawn".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolmuxError::Transport("child stdout unavailable after spawn".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolmuxError::Transport("child stderr unavailable after spawn".into()))?;

    tracing::debug!(
        command = %server.command,
        pid = ?child.id(),
        "spawned MCP server"
    );

    let (exit_tx, exited) = oneshot::channel();
    let shutdown = CancellationToken::new();
    tokio::spawn(supervise(child, exit_tx, shutdown.clone()));

    Ok(PeerIo {
        stdout: Box::new(stdout),
        stdin: Box::new(stdin),
        stderr: Some(Box::new(stderr)),
        exited,
        shutdown,
    })
}

/// Own the child until it exits, terminating it on shutdown.
async fn supervise(
    mut child: Child,
    exit_tx: oneshot::Sender<Option<i32>>,
    shutdown: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = shutdown.cancelled() => terminate(&mut child).await,
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("failed to reap MCP server process: {e}");
            None
        }
    };
    tracing::debug!(?code, "MCP server process exited");
    let _ = exit_tx.send(code);
}

async fn terminate(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is a valid process ID obtained from tokio::process::Child
            // that has not been reaped yet.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                return status;
            }
        }
    }
    child.start_kill()?;
    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[test]
    fn test_spawn_nonexistent_executable_returns_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let result = spawn(&ServerConfig::new(
            "/nonexistent/binary/that/does/not/exist",
        ));
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("failed to spawn"), "unexpected error message: {msg}");
    }

    #[tokio::test]
    async fn test_cat_echoes_stdin_to_stdout() {
        // Skip if `cat` is unavailable.
        let Ok(mut io) = spawn(&ServerConfig::new("cat")) else {
            return;
        };

        io.stdin.write_all(b"{\"id\":1}\n").await.unwrap();
        io.stdin.flush().await.unwrap();

        let mut lines = BufReader::new(io.stdout).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("timed out waiting for echo")
            .unwrap();
        assert_eq!(line.as_deref(), Some("{\"id\":1}"));
        io.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_exit_code_reported() {
        let Ok(io) = spawn(&ServerConfig::new("sh").with_args(["-c", "exit 3"])) else {
            return;
        };
        let code = tokio::time::timeout(Duration::from_secs(5), io.exited)
            .await
            .expect("timed out waiting for exit")
            .unwrap();
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_shutdown_terminates_child() {
        let Ok(io) = spawn(&ServerConfig::new("sleep").with_args(["30"])) else {
            return;
        };
        io.shutdown.cancel();
        let code = tokio::time::timeout(Duration::from_secs(5), io.exited)
            .await
            .expect("child was not terminated")
            .unwrap();
        // Terminated by a signal, so there is no exit code on Unix.
        if cfg!(unix) {
            assert_eq!(code, None);
        }
    }

    #[tokio::test]
    async fn test_env_overrides_reach_child() {
        let server = ServerConfig::new("sh")
            .with_args(["-c", "echo \"$TOOLMUX_TEST_VALUE\""])
            .with_env("TOOLMUX_TEST_VALUE", "overridden");
        let Ok(io) = spawn(&server) else {
            return;
        };
        let mut lines = BufReader::new(io.stdout).lines();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.as_deref(), Some("overridden"));
    }
}
