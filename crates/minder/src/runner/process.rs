//! Runner adapter that drives a local subprocess per session.
//!
//! The command line comes from configuration (`MINDER_PROCESS_CMD`). One
//! child runs per session; its stdout lines become `output` events, stderr
//! lines become steps, human input is written to stdin, and the exit code
//! flows through `on_exit`. Stop kills the child and waits a bounded time
//! for it to die.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::SessionStore;

use super::{Runner, RunnerEvents};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
}

pub struct ProcessRunner {
    store: Arc<SessionStore>,
    events: Arc<dyn RunnerEvents>,
    command: Vec<String>,
    stop_timeout: Duration,
    children: DashMap<String, Arc<Mutex<ProcessHandle>>>,
}

impl ProcessRunner {
    pub fn new(
        store: Arc<SessionStore>,
        events: Arc<dyn RunnerEvents>,
        command_line: &str,
        stop_timeout: Duration,
    ) -> Result<Self> {
        let command: Vec<String> = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if command.is_empty() {
            bail!("process runner command is empty");
        }
        Ok(Self {
            store,
            events,
            command,
            stop_timeout,
            children: DashMap::new(),
        })
    }

    async fn spawn_child(&self, session_id: &str, prompt: &str) -> Result<()> {
        let workdir = self.store.get_workdir(session_id);
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .env("MINDER_SESSION_ID", session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning runner process: {}", self.command[0]))?;
        info!(session_id, command = %self.command[0], "Runner process spawned");

        let stdout = child.stdout.take().context("runner process has no stdout")?;
        let stderr = child.stderr.take().context("runner process has no stderr")?;
        let mut stdin = child.stdin.take().context("runner process has no stdin")?;

        stdin
            .write_all(format!("{prompt}\n").as_bytes())
            .await
            .context("writing prompt to runner process")?;

        let handle = Arc::new(Mutex::new(ProcessHandle {
            child,
            stdin: Some(stdin),
        }));
        self.children.insert(session_id.to_string(), Arc::clone(&handle));

        self.events
            .on_header(
                session_id,
                Some(&format!("process: {}", self.command.join(" "))),
                None,
                None,
                Some("subprocess"),
            )
            .await;

        // Stderr lines surface as step output.
        {
            let events = Arc::clone(&self.events);
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    events
                        .on_output(&session_id, "stderr", &line, Some("step"), false)
                        .await;
                }
            });
        }

        // Stdout pump plus exit supervision.
        let events = Arc::clone(&self.events);
        let store = Arc::clone(&self.store);
        let session_id = session_id.to_string();
        let child_handle = handle;
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let mut lines = BufReader::new(stdout).lines();
            let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await; // immediate first tick

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                events
                                    .on_output(&session_id, "stdout", &line, None, true)
                                    .await;
                            }
                            Ok(None) | Err(_) => break,
                        }
                    }
                    _ = heartbeat.tick() => {
                        events
                            .on_heartbeat(&session_id, started.elapsed().as_secs_f64(), false)
                            .await;
                    }
                }
            }

            let status = child_handle.lock().await.child.wait().await;
            let code = status.ok().and_then(|s| s.code());
            events
                .on_heartbeat(&session_id, started.elapsed().as_secs_f64(), true)
                .await;
            if store.is_stop_requested(&session_id) {
                debug!(session_id, "Runner process stopped on request");
            } else {
                events.on_exit(&session_id, code).await;
                if code == Some(0) {
                    events.on_awaiting_input(&session_id).await;
                }
            }
        });

        Ok(())
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn start(&self, session_id: &str, prompt: &str, approval_choice: u8) -> Result<()> {
        debug!(session_id, approval_choice, "Starting process session");
        self.store.clear_stop_requested(session_id);
        self.spawn_child(session_id, prompt).await
    }

    async fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        let live = self.children.get(session_id).map(|h| Arc::clone(&h));
        if let Some(handle) = live {
            let mut guard = handle.lock().await;
            if let Some(stdin) = guard.stdin.as_mut() {
                stdin
                    .write_all(format!("{text}\n").as_bytes())
                    .await
                    .context("writing input to runner process")?;
                return Ok(());
            }
        }
        // No live child: start a follow-up turn with the input as prompt.
        self.store.clear_stop_requested(session_id);
        self.spawn_child(session_id, text).await
    }

    async fn stop(&self, session_id: &str) -> Result<Option<i32>> {
        self.store.request_stop(session_id);
        let Some((_, handle)) = self.children.remove(session_id) else {
            self.store.clear_stop_requested(session_id);
            return Ok(None);
        };

        let mut guard = handle.lock().await;
        guard.stdin.take(); // close stdin first; well-behaved children exit
        let _ = guard.child.start_kill();
        let code = match tokio::time::timeout(self.stop_timeout, guard.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(err)) => {
                warn!(session_id, error = %err, "Waiting for runner process failed");
                None
            }
            Err(_) => {
                warn!(session_id, "Runner process ignored kill within timeout");
                None
            }
        };
        drop(guard);
        self.store.clear_stop_requested(session_id);
        Ok(code)
    }

    async fn update_permission_mode(&self, _session_id: &str, mode: &str) -> Result<()> {
        debug!(mode, "Process runner has no approval policy; ignoring");
        Ok(())
    }

    fn runner_type(&self) -> &'static str {
        "process"
    }
}
