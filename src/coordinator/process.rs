//! Terminal session supervisor.
//!
//! One external command per session, spawned under the configured shell with
//! fully piped stdio. Output is pushed through the hub as structured
//! [`ProcessEvent`]s as it occurs; nothing polls. Sessions are independent:
//! each owns its child handle exclusively, and unrelated sessions run fully
//! in parallel.
//!
//! `cd`, `pwd` and `clear` are handled as builtins without spawning a
//! process, against the session's own working directory, which persists
//! across commands for the same session id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use super::hub::BroadcastHub;
use super::models::{ProcessEvent, ProcessEventKind, ProcessState, TerminalSessionInfo};
use super::ws::WsMessage;
use crate::errors::ProcessError;

struct TerminalSession {
    command: String,
    cwd: PathBuf,
    state: ProcessState,
    started_at: DateTime<Utc>,
    stdin: Option<ChildStdin>,
    child: Option<Child>,
}

pub struct ProcessRunner {
    hub: Arc<BroadcastHub>,
    shell: String,
    default_cwd: PathBuf,
    sessions: Arc<Mutex<HashMap<String, TerminalSession>>>,
}

impl ProcessRunner {
    pub fn new(hub: Arc<BroadcastHub>, shell: &str, default_cwd: impl Into<PathBuf>) -> Self {
        Self {
            hub,
            shell: shell.to_string(),
            default_cwd: default_cwd.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn emit(hub: &BroadcastHub, event: ProcessEvent) {
        hub.broadcast(WsMessage::ProcessOutput { event });
    }

    /// Run `command` in the named session.
    ///
    /// Fails with `SessionAlreadyRunning` while a previous command for the
    /// same id is still alive. Spawn failures are not errors: they surface
    /// as a `stderr` event immediately followed by `exit`, per the stream
    /// contract.
    pub async fn start(
        &self,
        session_id: &str,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<(), ProcessError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(session_id)
            && existing.state == ProcessState::Running
        {
            return Err(ProcessError::SessionAlreadyRunning {
                session_id: session_id.to_string(),
            });
        }

        let cwd = cwd
            .map(PathBuf::from)
            .or_else(|| sessions.get(session_id).map(|s| s.cwd.clone()))
            .unwrap_or_else(|| self.default_cwd.clone());

        let trimmed = command.trim();

        // Builtins: no process is spawned. Matched on the first token so any
        // whitespace separator (`cd\t/x`) still hits the builtin path.
        let first_token = trimmed.split_whitespace().next().unwrap_or("");
        if trimmed == "pwd" || trimmed == "clear" || first_token == "cd" {
            let cwd = self.run_builtin(session_id, trimmed, cwd).await;
            upsert_idle(&mut sessions, session_id, command, cwd);
            return Ok(());
        }

        tracing::info!(session_id, command, "starting terminal command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                Self::emit(
                    &self.hub,
                    ProcessEvent::new(
                        session_id,
                        ProcessEventKind::Stderr,
                        format!("failed to start '{}': {}", command, e),
                    ),
                );
                Self::emit(&self.hub, ProcessEvent::exit(session_id, None));
                upsert_idle(&mut sessions, session_id, command, cwd);
                return Ok(());
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        sessions.insert(
            session_id.to_string(),
            TerminalSession {
                command: command.to_string(),
                cwd,
                state: ProcessState::Running,
                started_at: Utc::now(),
                stdin,
                child: Some(child),
            },
        );
        drop(sessions);

        let hub = self.hub.clone();
        let sessions = self.sessions.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            let out_task = stdout.map(|reader| {
                tokio::spawn(stream_lines(
                    hub.clone(),
                    sid.clone(),
                    reader,
                    ProcessEventKind::Stdout,
                ))
            });
            let err_task = stderr.map(|reader| {
                tokio::spawn(stream_lines(
                    hub.clone(),
                    sid.clone(),
                    reader,
                    ProcessEventKind::Stderr,
                ))
            });
            if let Some(task) = out_task {
                let _ = task.await;
            }
            if let Some(task) = err_task {
                let _ = task.await;
            }

            // Both pipes hit EOF; reap the child and close out the session.
            let child = {
                let mut sessions = sessions.lock().await;
                sessions.get_mut(&sid).and_then(|s| s.child.take())
            };
            let exit_code = match child {
                Some(mut child) => match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::warn!(session_id = %sid, "failed to reap child: {}", e);
                        None
                    }
                },
                None => None,
            };

            {
                let mut sessions = sessions.lock().await;
                if let Some(session) = sessions.get_mut(&sid) {
                    session.state = ProcessState::Exited;
                    session.stdin = None;
                }
            }

            tracing::info!(session_id = %sid, ?exit_code, "terminal command exited");
            Self::emit(&hub, ProcessEvent::exit(&sid, exit_code));
        });

        Ok(())
    }

    /// Handle a builtin against the session cwd, returning the (possibly
    /// updated) working directory.
    async fn run_builtin(&self, session_id: &str, command: &str, cwd: PathBuf) -> PathBuf {
        if command == "pwd" {
            Self::emit(
                &self.hub,
                ProcessEvent::new(
                    session_id,
                    ProcessEventKind::Stdout,
                    cwd.display().to_string(),
                ),
            );
            return cwd;
        }
        if command == "clear" {
            Self::emit(
                &self.hub,
                ProcessEvent::new(session_id, ProcessEventKind::Clear, ""),
            );
            return cwd;
        }

        // cd
        let target = command.strip_prefix("cd").unwrap_or("").trim();
        if target.is_empty() {
            Self::emit(
                &self.hub,
                ProcessEvent::new(session_id, ProcessEventKind::Stderr, "cd: missing argument"),
            );
            return cwd;
        }
        let candidate = if Path::new(target).is_absolute() {
            PathBuf::from(target)
        } else {
            cwd.join(target)
        };
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.is_dir() => tokio::fs::canonicalize(&candidate)
                .await
                .unwrap_or(candidate),
            Ok(_) => {
                Self::emit(
                    &self.hub,
                    ProcessEvent::new(
                        session_id,
                        ProcessEventKind::Stderr,
                        format!("cd: {}: Not a directory", target),
                    ),
                );
                cwd
            }
            Err(_) => {
                Self::emit(
                    &self.hub,
                    ProcessEvent::new(
                        session_id,
                        ProcessEventKind::Stderr,
                        format!("cd: {}: No such file or directory", target),
                    ),
                );
                cwd
            }
        }
    }

    /// Pipe `data` to the session's stdin. No-op if the session is unknown
    /// or has already exited.
    ///
    /// The stdin handle is taken out of the map and the guard dropped before
    /// awaiting the write: a child that never reads its stdin leaves the pipe
    /// full and parks the writer, and that must not block unrelated sessions
    /// or the `kill` that would unstick this one.
    pub async fn send_input(&self, session_id: &str, data: &str) {
        let stdin = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .get_mut(session_id)
                .and_then(|session| session.stdin.take())
        };
        let Some(mut stdin) = stdin else {
            return;
        };

        let ok = stdin.write_all(data.as_bytes()).await.is_ok() && stdin.flush().await.is_ok();
        if !ok {
            // Process went away underneath us; subsequent writes no-op.
            return;
        }

        // Restore the handle only if the slot is still ours: a session that
        // exited and was restarted meanwhile owns a fresh stdin.
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(session_id)
            && session.state == ProcessState::Running
            && session.stdin.is_none()
        {
            session.stdin = Some(stdin);
        }
    }

    /// Send a termination signal. Idempotent once the process has exited.
    pub async fn kill(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(session_id)
            && let Some(child) = session.child.as_mut()
        {
            tracing::info!(session_id, "killing terminal command");
            let _ = child.start_kill();
        }
    }

    /// Snapshot of every session seen so far, most recent first.
    pub async fn list(&self) -> Vec<TerminalSessionInfo> {
        let sessions = self.sessions.lock().await;
        let mut infos: Vec<TerminalSessionInfo> = sessions
            .iter()
            .map(|(session_id, s)| TerminalSessionInfo {
                session_id: session_id.clone(),
                command: s.command.clone(),
                working_directory: s.cwd.display().to_string(),
                state: s.state,
                started_at: s.started_at,
            })
            .collect();
        infos.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        infos
    }

    pub async fn state(&self, session_id: &str) -> Option<ProcessState> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.state)
    }
}

/// Record (or refresh) a session entry that has no live process.
fn upsert_idle(
    sessions: &mut HashMap<String, TerminalSession>,
    session_id: &str,
    command: &str,
    cwd: PathBuf,
) {
    let started_at = sessions
        .get(session_id)
        .map(|s| s.started_at)
        .unwrap_or_else(Utc::now);
    sessions.insert(
        session_id.to_string(),
        TerminalSession {
            command: command.to_string(),
            cwd,
            state: ProcessState::Exited,
            started_at,
            stdin: None,
            child: None,
        },
    );
}

async fn stream_lines<R: AsyncRead + Unpin>(
    hub: Arc<BroadcastHub>,
    session_id: String,
    reader: R,
    kind: ProcessEventKind,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        ProcessRunner::emit(&hub, ProcessEvent::new(&session_id, kind, line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::Receiver;

    fn runner() -> (ProcessRunner, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::new(256));
        (ProcessRunner::new(hub.clone(), "sh", "."), hub)
    }

    /// Drain process events for one session until an `exit` event arrives.
    async fn collect_until_exit(rx: &mut Receiver<WsMessage>, session_id: &str) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        loop {
            let msg = tokio::time::timeout(std::time::Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for process events")
                .expect("hub channel closed");
            if let WsMessage::ProcessOutput { event } = msg
                && event.session_id == session_id
            {
                let is_exit = event.kind == ProcessEventKind::Exit;
                events.push(event);
                if is_exit {
                    return events;
                }
            }
        }
    }

    #[tokio::test]
    async fn command_output_streams_then_exits_zero() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        runner.start("term-1", "echo hello", None).await.unwrap();
        let events = collect_until_exit(&mut rx, "term-1").await;

        let stdout: Vec<&ProcessEvent> = events
            .iter()
            .filter(|e| e.kind == ProcessEventKind::Stdout)
            .collect();
        assert_eq!(stdout.len(), 1);
        assert_eq!(stdout[0].content, "hello");

        let exit = events.last().unwrap();
        assert_eq!(exit.kind, ProcessEventKind::Exit);
        assert_eq!(exit.exit_code, Some(0));
        assert_eq!(runner.state("term-1").await, Some(ProcessState::Exited));
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported_as_event() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        runner.start("term-1", "exit 3", None).await.unwrap();
        let events = collect_until_exit(&mut rx, "term-1").await;
        assert_eq!(events.last().unwrap().exit_code, Some(3));
    }

    #[tokio::test]
    async fn stderr_lines_are_tagged_stderr() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        runner
            .start("term-1", "echo oops >&2", None)
            .await
            .unwrap();
        let events = collect_until_exit(&mut rx, "term-1").await;
        assert!(
            events
                .iter()
                .any(|e| e.kind == ProcessEventKind::Stderr && e.content == "oops")
        );
    }

    #[tokio::test]
    async fn duplicate_running_session_id_is_rejected() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        // `cat` blocks on stdin, keeping the session running.
        runner.start("term-1", "cat", None).await.unwrap();
        let err = runner.start("term-1", "echo nope", None).await.unwrap_err();
        assert!(matches!(err, ProcessError::SessionAlreadyRunning { .. }));

        runner.kill("term-1").await;
        collect_until_exit(&mut rx, "term-1").await;

        // Once exited the id is reusable
        runner.start("term-1", "echo again", None).await.unwrap();
        let events = collect_until_exit(&mut rx, "term-1").await;
        assert!(events.iter().any(|e| e.content == "again"));
    }

    #[tokio::test]
    async fn send_input_reaches_the_process() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        runner.start("term-1", "cat", None).await.unwrap();
        runner.send_input("term-1", "ping\n").await;
        runner.kill("term-1").await;

        let events = collect_until_exit(&mut rx, "term-1").await;
        assert!(
            events
                .iter()
                .any(|e| e.kind == ProcessEventKind::Stdout && e.content == "ping")
        );
    }

    #[tokio::test]
    async fn blocked_stdin_write_does_not_stall_other_sessions() {
        let (runner, hub) = runner();
        let runner = Arc::new(runner);
        let mut rx = hub.subscribe();

        // Neither child reads stdin, so a large enough write fills the pipe
        // and parks the writer.
        runner.start("stuck", "sleep 30", None).await.unwrap();
        runner.start("other", "sleep 30", None).await.unwrap();

        let writer = {
            let runner = runner.clone();
            tokio::spawn(async move {
                let payload = "x".repeat(4 * 1024 * 1024);
                runner.send_input("stuck", &payload).await;
            })
        };
        // Give the write time to park on the full pipe.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        // Unrelated sessions must stay reachable while the write is parked.
        tokio::time::timeout(std::time::Duration::from_secs(2), runner.kill("other"))
            .await
            .expect("kill of an unrelated session stalled behind a blocked stdin write");
        collect_until_exit(&mut rx, "other").await;

        // Killing the non-reading child errors the parked write out.
        tokio::time::timeout(std::time::Duration::from_secs(2), runner.kill("stuck"))
            .await
            .expect("kill of the written-to session stalled behind its own stdin write");
        collect_until_exit(&mut rx, "stuck").await;
        let _ = writer.await;
    }

    #[tokio::test]
    async fn send_input_after_exit_is_a_noop() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        runner.start("term-1", "true", None).await.unwrap();
        collect_until_exit(&mut rx, "term-1").await;

        // Must not panic or error
        runner.send_input("term-1", "anything\n").await;
        runner.send_input("never-started", "anything\n").await;
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        runner.start("term-1", "cat", None).await.unwrap();
        runner.kill("term-1").await;
        collect_until_exit(&mut rx, "term-1").await;
        runner.kill("term-1").await;
        runner.kill("unknown").await;
    }

    #[tokio::test]
    async fn pwd_builtin_emits_working_directory_without_spawning() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap();
        runner.start("term-1", "pwd", Some(dir_str)).await.unwrap();

        let msg = rx.recv().await.unwrap();
        match msg {
            WsMessage::ProcessOutput { event } => {
                assert_eq!(event.kind, ProcessEventKind::Stdout);
                assert_eq!(event.content, dir_str);
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn clear_builtin_emits_distinct_clear_event() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        runner.start("term-1", "clear", None).await.unwrap();
        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => {
                assert_eq!(event.kind, ProcessEventKind::Clear);
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cd_to_missing_directory_emits_single_stderr_and_keeps_cwd() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap().to_string();
        runner.start("term-1", "pwd", Some(&dir_str)).await.unwrap();
        let _ = rx.recv().await.unwrap();

        runner
            .start("term-1", "cd /nonexistent-path-xyz", None)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => {
                assert_eq!(event.kind, ProcessEventKind::Stderr);
                assert!(event.content.contains("No such file or directory"));
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
        // No further events follow the single stderr
        assert!(rx.try_recv().is_err());

        // Working directory unchanged
        runner.start("term-1", "pwd", None).await.unwrap();
        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => {
                assert_eq!(event.content, dir_str)
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cd_with_tab_separator_is_still_a_builtin() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap().to_string();
        runner
            .start("term-1", "cd\t/nonexistent-path-xyz", Some(&dir_str))
            .await
            .unwrap();

        // Handled as the builtin, not passed to the shell
        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => {
                assert_eq!(event.kind, ProcessEventKind::Stderr);
                assert!(event.content.contains("No such file or directory"));
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }

        runner.start("term-1", "pwd", None).await.unwrap();
        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => assert_eq!(event.content, dir_str),
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cd_to_valid_directory_updates_session_cwd() {
        let (runner, hub) = runner();
        let mut rx = hub.subscribe();

        let parent = tempfile::tempdir().unwrap();
        let sub = parent.path().join("sub");
        tokio::fs::create_dir(&sub).await.unwrap();

        runner
            .start("term-1", "cd sub", Some(parent.path().to_str().unwrap()))
            .await
            .unwrap();
        runner.start("term-1", "pwd", None).await.unwrap();

        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => {
                let canonical = tokio::fs::canonicalize(&sub).await.unwrap();
                assert_eq!(event.content, canonical.display().to_string());
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn spawn_failure_reports_stderr_then_exit() {
        let hub = Arc::new(BroadcastHub::new(64));
        // A shell binary that does not exist forces the spawn itself to fail.
        let runner = ProcessRunner::new(hub.clone(), "/nonexistent/shell-xyz", ".");
        let mut rx = hub.subscribe();

        runner.start("term-1", "echo hi", None).await.unwrap();

        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => {
                assert_eq!(event.kind, ProcessEventKind::Stderr);
                assert!(event.content.contains("failed to start"));
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            WsMessage::ProcessOutput { event } => {
                assert_eq!(event.kind, ProcessEventKind::Exit);
                assert_eq!(event.exit_code, None);
            }
            other => panic!("Expected ProcessOutput, got {:?}", other),
        }
        assert_eq!(runner.state("term-1").await, Some(ProcessState::Exited));
    }

    #[tokio::test]
    async fn sessions_run_independently() {
        let (runner, hub) = runner();
        let mut rx_a = hub.subscribe();
        let mut rx_b = hub.subscribe();

        runner.start("term-a", "echo alpha", None).await.unwrap();
        runner.start("term-b", "echo beta", None).await.unwrap();

        let (a, b) = tokio::join!(
            collect_until_exit(&mut rx_a, "term-a"),
            collect_until_exit(&mut rx_b, "term-b")
        );
        assert!(a.iter().any(|e| e.content == "alpha"));
        assert!(b.iter().any(|e| e.content == "beta"));
        assert_eq!(runner.list().await.len(), 2);
    }
}
