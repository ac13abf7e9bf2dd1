//! Stream session lifecycle states and backend shutdown escalation.

use std::time::Duration;

use tokio::process::Child;

use crate::error::TransportError;

/// Lifecycle of a stream session.
///
/// `Closed` is terminal; no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, no process yet.
    Created,
    /// A spawn is in flight.
    Starting,
    /// Process running, reader attached.
    Started,
    /// Closed explicitly, reaped, or failed.
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Starting => "starting",
            SessionState::Started => "started",
            SessionState::Closed => "closed",
        }
    }
}

/// Grace periods for stopping a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequest {
    /// Time to wait after closing stdin before sending SIGTERM.
    pub stdin_close_grace: Duration,
    /// Time to wait after SIGTERM before sending SIGKILL.
    pub sigterm_grace: Duration,
}

impl Default for ShutdownRequest {
    fn default() -> Self {
        Self {
            stdin_close_grace: Duration::from_secs(2),
            sigterm_grace: Duration::from_secs(2),
        }
    }
}

/// Stop a backend whose stdin has already been closed.
///
/// 1. Wait `stdin_close_grace` for a voluntary exit
/// 2. SIGTERM the process group (Unix)
/// 3. Wait `sigterm_grace`
/// 4. SIGKILL
/// 5. Reap the exit status so no zombie is left behind
///
/// Returns the exit code, or `None` if the process was killed by a signal.
///
/// # Errors
///
/// Returns `TransportError::Io` if the final `wait()` fails.
pub async fn shutdown_process(
    session_id: &str,
    child: &mut Child,
    request: &ShutdownRequest,
) -> Result<Option<i32>, TransportError> {
    match tokio::time::timeout(request.stdin_close_grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(session_id, code = ?status.code(), "backend exited after stdin close");
            return Ok(status.code());
        }
        Ok(Err(e)) => tracing::warn!(session_id, error = %e, "wait failed after stdin close"),
        Err(_) => tracing::debug!(session_id, "backend did not exit within stdin_close_grace"),
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            tracing::debug!(session_id, pid, "sending SIGTERM to process group");
            if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::warn!(session_id, pid, error = ?e, "killpg SIGTERM failed");
            }
        }
    }

    match tokio::time::timeout(request.sigterm_grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(session_id, code = ?status.code(), "backend exited after SIGTERM");
            return Ok(status.code());
        }
        Ok(Err(e)) => tracing::warn!(session_id, error = %e, "wait failed after SIGTERM"),
        Err(_) => tracing::warn!(session_id, "backend did not exit within sigterm_grace"),
    }

    tracing::warn!(session_id, "sending SIGKILL");
    if let Err(e) = child.kill().await {
        tracing::error!(session_id, error = %e, "SIGKILL failed");
    }

    let status = child.wait().await?;
    Ok(status.code())
}
