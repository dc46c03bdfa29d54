//! Process supervision for the external assistant CLI.
//!
//! Spawns one child process per captured session, feeds its stdout through
//! the Parser → Correlator → Assembler pipeline, and finalizes the session
//! on exit. stderr is captured as diagnostics, never parsed as protocol.

use crate::{
    assembler::SessionAssembler,
    correlator::ToolCallCorrelator,
    parser::ProtocolParser,
    restart::{RestartDecision, RestartPolicy, RestartTracker},
    Result, ScribeError,
};
use chrono::Utc;
use dashmap::DashMap;
use scribe_types::{CapturedSession, SessionOutcome};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Flags forced onto every spawned CLI invocation to get structured
/// streaming output. `--verbose` is required alongside `-p` with
/// `--output-format=stream-json`.
const FORCED_ARGS: &[&str] = &["-p", "--verbose", "--output-format", "stream-json"];

/// Events emitted by the supervisor.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A session finished and was assembled.
    Finalized(Box<CapturedSession>),
    /// The child process exited.
    Exited {
        session_id: String,
        exit_code: Option<i32>,
    },
    /// Spawn failed before any output was read.
    SpawnFailed { session_id: String, message: String },
}

/// Options for one supervised capture.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Caller-chosen session id; replaced by the CLI's own id once the
    /// init envelope arrives.
    pub session_id: String,
    /// Caller args (prompt, model selection, ...). Forced streaming flags
    /// are appended by the supervisor.
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

struct ActiveSession {
    handle: tokio::task::JoinHandle<()>,
    pid: Option<u32>,
    stop_requested: Arc<AtomicBool>,
}

/// Manages supervised CLI processes, one per captured session.
pub struct ProcessSupervisor {
    cli_path: PathBuf,
    sessions: Arc<DashMap<String, ActiveSession>>,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl ProcessSupervisor {
    pub fn new(cli_path: PathBuf) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            cli_path,
            sessions: Arc::new(DashMap::new()),
            event_tx,
        }
    }

    /// Subscribe to supervisor events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn the CLI and run the capture pipeline until process exit.
    pub async fn spawn(&self, opts: SpawnOptions) -> Result<()> {
        if self.sessions.contains_key(&opts.session_id) {
            return Err(ScribeError::SessionAlreadyActive(opts.session_id));
        }

        if !self.cli_path.exists() {
            error!(target: "scribe::supervisor", "CLI binary not found at {:?}", self.cli_path);
            return Err(ScribeError::ProcessSpawnFailed(format!(
                "CLI binary not found at {:?}",
                self.cli_path
            )));
        }

        let mut cmd = tokio::process::Command::new(&self.cli_path);
        cmd.args(&opts.args);
        cmd.args(FORCED_ARGS);
        if let Some(dir) = &opts.working_dir {
            cmd.current_dir(dir);
        }
        // No interactive prompt: stdin is closed.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            target: "scribe::supervisor",
            "Spawning {:?} for session {} (args: {:?})",
            self.cli_path, opts.session_id, opts.args
        );

        let mut child = cmd.spawn().map_err(|e| {
            error!(target: "scribe::supervisor", "Spawn failed: {}", e);
            let _ = self.event_tx.send(SupervisorEvent::SpawnFailed {
                session_id: opts.session_id.clone(),
                message: e.to_string(),
            });
            ScribeError::ProcessSpawnFailed(e.to_string())
        })?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScribeError::ProcessSpawnFailed("no stdout pipe".into()))?;
        let stderr = child.stderr.take();

        let session_id = opts.session_id.clone();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let stop_flag = stop_requested.clone();
        let sessions = self.sessions.clone();
        let event_tx = self.event_tx.clone();

        // stderr is diagnostic only; collect it for the finalized session.
        let (stderr_tx, mut stderr_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        if let Some(stderr) = stderr {
            let sid = session_id.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "scribe::supervisor", "stderr [{}]: {}", sid, line);
                    if stderr_tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        let handle = tokio::spawn(async move {
            use tokio::io::{AsyncBufReadExt, BufReader};

            let mut parser = ProtocolParser::new();
            let mut correlator = ToolCallCorrelator::new();
            let mut assembler = SessionAssembler::new(session_id.clone(), Utc::now());

            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "scribe::supervisor", "stdout [{}]: {}", session_id, line);
                if let Some(envelope) = parser.parse_line(&line) {
                    correlator.observe(&envelope);
                    assembler.observe(&envelope);
                }
            }

            let exit_code = child.wait().await.ok().and_then(|s| s.code());
            info!(
                target: "scribe::supervisor",
                "Process for session {} exited with code {:?}",
                session_id, exit_code
            );

            // The reader task drops its sender at stderr EOF; drain until
            // the channel closes so the tail of any crash output is kept.
            while let Some(line) = stderr_rx.recv().await {
                assembler.push_diagnostic(line);
            }

            // A non-zero exit still yields a (partial) finalized session.
            let outcome = if stop_flag.load(Ordering::SeqCst) {
                SessionOutcome::Stopped
            } else if exit_code == Some(0) {
                SessionOutcome::Completed
            } else {
                SessionOutcome::Failed
            };

            let session = assembler.finalize(outcome, correlator.finish());

            // Deregister before announcing the exit so a monitor loop can
            // respawn under the same session id immediately.
            sessions.remove(&session_id);
            let _ = event_tx.send(SupervisorEvent::Finalized(Box::new(session)));
            let _ = event_tx.send(SupervisorEvent::Exited {
                session_id,
                exit_code,
            });
        });

        self.sessions.insert(
            opts.session_id,
            ActiveSession {
                handle,
                pid,
                stop_requested,
            },
        );

        Ok(())
    }

    /// Run a capture in monitor mode: respawn on exit according to the
    /// restart policy. Clean exits reset the failure streak but still
    /// count toward the attempt budget; repeated failures trip the
    /// circuit breaker.
    pub async fn run_monitored(&self, opts: SpawnOptions, policy: RestartPolicy) -> Result<()> {
        let mut tracker = RestartTracker::new(policy);
        let mut rx = self.subscribe();

        loop {
            self.spawn(opts.clone()).await?;

            let exit_code = loop {
                match rx.recv().await {
                    Ok(SupervisorEvent::Exited {
                        session_id,
                        exit_code,
                    }) if session_id == opts.session_id => break exit_code,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            };

            let decision = if exit_code == Some(0) {
                tracker.on_success()
            } else {
                tracker.on_failure()
            };

            match decision {
                RestartDecision::Retry(delay) => {
                    info!(
                        target: "scribe::supervisor",
                        "Restarting monitored session {} in {:?} (exit code {:?})",
                        opts.session_id, delay, exit_code
                    );
                    tokio::time::sleep(delay).await;
                }
                RestartDecision::GiveUp => {
                    info!(
                        target: "scribe::supervisor",
                        "Monitor for session {} stopped (exit code {:?})",
                        opts.session_id, exit_code
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Stop a session: SIGTERM to the child, which finalizes the pipeline
    /// with outcome `Stopped`. Pending tool calls become dangling.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| ScribeError::SessionNotFound(session_id.to_string()))?;

        session.stop_requested.store(true, Ordering::SeqCst);

        #[cfg(unix)]
        if let Some(pid) = session.pid {
            info!(target: "scribe::supervisor", "Sending SIGTERM to pid {} for session {}", pid, session_id);
            // SAFETY: signalling a pid we spawned and still track.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        if let Some(_pid) = session.pid {
            session.handle.abort();
        }

        Ok(())
    }

    /// Ids of sessions with a live child process.
    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether a session has an active process.
    pub fn is_active(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }
}
