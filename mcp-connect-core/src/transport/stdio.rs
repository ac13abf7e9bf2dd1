//! Stdio subprocess transport: one backend process per [`StreamSession`].
//!
//! The session spawns its backend lazily, writes outbound JSON-RPC messages
//! to the backend's stdin as NDJSON, and publishes every unit read from
//! stdout on its event bus. Stderr is diagnostic only and goes to the log.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::env::{build_environment, mask_env};
use super::events::{EventBus, SessionEvent, Subscription};
use super::framing::{FramingError, MAX_LINE_BYTES, bounded_read_line, decode_line, encode_line};
use super::lifecycle::{SessionState, ShutdownRequest, shutdown_process};
use crate::config::ServerConfig;
use crate::error::TransportError;

/// A live binding between a session id and one backend subprocess.
///
/// Always handled as `Arc<StreamSession>`; the reader tasks keep only a weak
/// reference, so dropping the last handle kills the process.
pub struct StreamSession {
    id: String,
    server_id: String,
    config: Arc<ServerConfig>,
    shutdown: ShutdownRequest,
    state: Mutex<SessionState>,
    last_used: Mutex<Instant>,
    /// Held across spawn, so it also serializes `ensure_started`.
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    bus: EventBus,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("state", &self.state())
            .finish()
    }
}

impl StreamSession {
    /// Create a session in the `Created` state. No process is spawned.
    pub fn new(
        id: impl Into<String>,
        server_id: impl Into<String>,
        config: Arc<ServerConfig>,
        shutdown: ShutdownRequest,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            server_id: server_id.into(),
            config,
            shutdown,
            state: Mutex::new(SessionState::Created),
            last_used: Mutex::new(Instant::now()),
            stdin: tokio::sync::Mutex::new(None),
            child: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            bus: EventBus::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Last send or receive.
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Subscribe to this session's message/error/close events.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Start
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawn the backend and attach readers, exactly once.
    ///
    /// A no-op when already started or closed. Concurrent callers wait for the
    /// in-flight start instead of spawning again.
    ///
    /// # Errors
    ///
    /// `Spawn` or `MissingPipe`. The failure is also published as an error
    /// event and the session is closed.
    pub async fn ensure_started(self: &Arc<Self>) -> Result<(), TransportError> {
        let mut stdin_slot = self.stdin.lock().await;

        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Started | SessionState::Closed => return Ok(()),
                SessionState::Created | SessionState::Starting => {
                    *state = SessionState::Starting;
                }
            }
        }

        let (child, stdin, stdout, stderr) = match self.spawn() {
            Ok(parts) => parts,
            Err(e) => {
                drop(stdin_slot);
                tracing::error!(
                    session_id = %self.id,
                    server_id = %self.server_id,
                    error = %e,
                    "failed to start backend"
                );
                let public = clone_for_event(&e);
                self.fail(public);
                return Err(e);
            }
        };

        let pid = child.id();
        *self.child.lock() = Some(child);
        *stdin_slot = Some(stdin);

        let weak = Arc::downgrade(self);
        let reader = tokio::spawn(read_stdout(weak, stdout, self.bus.clone()));
        let diagnostics = tokio::spawn(read_stderr(
            self.id.clone(),
            self.server_id.clone(),
            stderr,
        ));
        self.tasks.lock().extend([reader, diagnostics]);

        let closed_meanwhile = {
            let mut state = self.state.lock();
            if *state == SessionState::Starting {
                *state = SessionState::Started;
                false
            } else {
                true
            }
        };
        if closed_meanwhile {
            // close() ran while we were spawning and found no child to stop.
            drop(stdin_slot.take());
            drop(stdin_slot);
            self.stop_backend().await;
            return Ok(());
        }
        self.touch();

        tracing::info!(
            session_id = %self.id,
            server_id = %self.server_id,
            command = %self.config.command,
            pid,
            "backend started"
        );
        Ok(())
    }

    fn spawn(&self) -> Result<(Child, ChildStdin, ChildStdout, ChildStderr), TransportError> {
        let env = build_environment(&self.config.env);
        tracing::debug!(
            session_id = %self.id,
            command = %self.config.command,
            args = ?self.config.args,
            env = ?mask_env(&self.config.env),
            "spawning backend"
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .env_clear()
            .envs(&env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| TransportError::Spawn {
            command: self.config.command.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(TransportError::MissingPipe { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingPipe { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TransportError::MissingPipe { stream: "stderr" })?;

        Ok((child, stdin, stdout, stderr))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Send
    // ─────────────────────────────────────────────────────────────────────────

    /// Write one JSON-RPC message to the backend, starting it if needed.
    ///
    /// # Errors
    ///
    /// `SessionClosed` once the session is closed (permanently). A write
    /// failure returns `BrokenPipe`/`Io` and closes the session.
    pub async fn send(self: &Arc<Self>, message: &Value) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::SessionClosed);
        }
        self.ensure_started().await?;

        let line = encode_line(message)?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::SessionClosed)?;

        let written = match stdin.write_all(&line).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        drop(guard);

        match written {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::BrokenPipe {
                    TransportError::BrokenPipe
                } else {
                    TransportError::Io(e)
                };
                tracing::warn!(
                    session_id = %self.id,
                    server_id = %self.server_id,
                    error = %error,
                    "write to backend failed"
                );
                self.fail(clone_for_event(&error));
                Err(error)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Close
    // ─────────────────────────────────────────────────────────────────────────

    /// Publish `error`, then close the session in the background.
    fn fail(self: &Arc<Self>, error: TransportError) {
        if self.is_closed() {
            return;
        }
        self.bus.publish(SessionEvent::Error(Arc::new(error)));
        let session = Arc::clone(self);
        tokio::spawn(async move { session.close().await });
    }

    /// Stop the backend and raise the close event, exactly once.
    ///
    /// Idempotent and safe to call concurrently; later callers return
    /// immediately.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, SessionState::Closed)
        };
        if previous == SessionState::Closed {
            return;
        }

        // Dropping stdin is the first shutdown signal to the backend. A writer
        // stalled on a full pipe keeps the lock until the process is gone, so
        // never wait for it here.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            drop(stdin.take());
        }

        self.stop_backend().await;
        self.bus.close();
        tracing::info!(
            session_id = %self.id,
            server_id = %self.server_id,
            from = previous.as_str(),
            "stream session closed"
        );
    }

    /// Run the shutdown escalation on the child, then stop the reader tasks.
    async fn stop_backend(&self) {
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            match shutdown_process(&self.id, &mut child, &self.shutdown).await {
                Ok(code) => tracing::debug!(session_id = %self.id, code, "backend stopped"),
                Err(e) => tracing::warn!(session_id = %self.id, error = %e, "backend shutdown failed"),
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    fn exit_status(&self) -> Option<std::process::ExitStatus> {
        self.child
            .lock()
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
    }
}

/// Event copy of an error for subscribers; the original goes to the caller.
fn clone_for_event(error: &TransportError) -> TransportError {
    match error {
        TransportError::Spawn { command, reason } => TransportError::Spawn {
            command: command.clone(),
            reason: reason.clone(),
        },
        TransportError::MissingPipe { stream } => TransportError::MissingPipe { stream: *stream },
        TransportError::Io(e) => TransportError::Io(std::io::Error::new(e.kind(), e.to_string())),
        TransportError::BrokenPipe => TransportError::BrokenPipe,
        TransportError::UnexpectedExit { status } => TransportError::UnexpectedExit {
            status: status.clone(),
        },
        TransportError::SessionClosed => TransportError::SessionClosed,
        TransportError::Timeout { millis } => TransportError::Timeout { millis: *millis },
        TransportError::Serialize(e) => {
            TransportError::Io(std::io::Error::other(e.to_string()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader Tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn read_stdout(session: Weak<StreamSession>, stdout: ChildStdout, bus: EventBus) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::with_capacity(4096);

    let failure = loop {
        buf.clear();
        match bounded_read_line(&mut reader, &mut buf, MAX_LINE_BYTES).await {
            Ok(0) => break None,
            Ok(_) => match decode_line(&buf) {
                Ok(values) => {
                    if values.is_empty() {
                        continue;
                    }
                    if let Some(session) = session.upgrade() {
                        session.touch();
                    }
                    for value in values {
                        bus.publish(SessionEvent::Message(value));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping non-JSON line on backend stdout");
                }
            },
            Err(FramingError::MessageTooLarge { max_bytes }) => {
                tracing::warn!(max_bytes, "skipping oversized line on backend stdout");
            }
            Err(FramingError::Io(e)) => break Some(TransportError::Io(e)),
            Err(e @ FramingError::MalformedJson { .. }) => {
                tracing::warn!(error = %e, "skipping unreadable line on backend stdout");
            }
        }
    };

    let Some(session) = session.upgrade() else {
        return;
    };
    if session.is_closed() {
        return;
    }
    let error = failure.unwrap_or_else(|| TransportError::unexpected_exit(session.exit_status()));
    tracing::warn!(
        session_id = %session.id,
        server_id = %session.server_id,
        error = %error,
        "backend stdout closed unexpectedly"
    );
    session.fail(error);
}

async fn read_stderr(session_id: String, server_id: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match bounded_read_line(&mut reader, &mut buf, MAX_LINE_BYTES).await {
            Ok(0) | Err(FramingError::Io(_)) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(%session_id, %server_id, line, "backend stderr");
                }
            }
            Err(e) => tracing::debug!(%session_id, error = %e, "skipping backend stderr line"),
        }
    }
}
