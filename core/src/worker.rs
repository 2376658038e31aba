//! Worker process boundary
//!
//! Workers are external processes. A doer receives its composed contract on
//! stdin and its stdout at exit is the candidate result; checkers and
//! classifiers are one-shot invocations of the same shape. The supervisor
//! never parses worker output beyond trailing verdict tokens, and it stops a
//! worker the way a process supervisor does: by killing the pid.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{OverseerError, Result};
use crate::session::{Session, SessionId};
use crate::store::kill_worker_pid;

/// How many trailing stderr lines ride along in a failure diagnostic
const STDERR_TAIL_LINES: usize = 5;

/// Terminal report of a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub success: bool,
    /// Captured stdout, trimmed; the candidate result when `success`
    pub output: String,
    /// Exit code or signal, plus a stderr tail on failure
    pub diagnostic: String,
}

impl WorkerExit {
    fn from_output(output: std::process::Output) -> WorkerExit {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostic = match output.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        if !output.status.success() {
            let tail = tail_lines(stderr.trim(), STDERR_TAIL_LINES);
            if !tail.is_empty() {
                diagnostic.push_str("; stderr: ");
                diagnostic.push_str(&tail);
            }
        }
        WorkerExit {
            success: output.status.success(),
            output: stdout,
            diagnostic,
        }
    }
}

/// Handle to a launched doer process
#[derive(Debug)]
pub struct LaunchedWorker {
    pub pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
    exit_rx: oneshot::Receiver<WorkerExit>,
}

impl LaunchedWorker {
    /// Split the handle into its kill side and its exit side; the
    /// supervisor keeps the former and awaits the latter
    pub fn split(self) -> (Option<u32>, oneshot::Sender<()>, oneshot::Receiver<WorkerExit>) {
        (self.pid, self.kill_tx, self.exit_rx)
    }
}

/// Capability seam for starting doer processes; tests substitute scripted
/// implementations
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, session: &Session, contract: String) -> Result<LaunchedWorker>;
}

/// Production launcher: spawns the configured worker command with the
/// contract on stdin and the session identity in the environment
pub struct ProcessLauncher {
    argv: Vec<String>,
    data_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(command_line: &str, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let argv = parse_command_line(command_line)?;
        Ok(ProcessLauncher {
            argv,
            data_dir: data_dir.into(),
        })
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, session: &Session, contract: String) -> Result<LaunchedWorker> {
        let (program, args) =
            self.argv
                .split_first()
                .ok_or_else(|| OverseerError::WorkerLaunchFailure {
                    session_id: session.id.to_string(),
                    message: "worker command is empty".to_string(),
                })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env("OVERSEER_SESSION_ID", session.id.as_str())
            .env("OVERSEER_DIR", &self.data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(parent) = &session.parent_id {
            command.env("OVERSEER_PARENT_ID", parent.as_str());
        }

        let mut child = command
            .spawn()
            .map_err(|err| OverseerError::WorkerLaunchFailure {
                session_id: session.id.to_string(),
                message: format!("failed to spawn {}: {}", program, err),
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = oneshot::channel::<WorkerExit>();

        // the child handle lives inside the driver task, so aborting kills
        // by pid; the kill task ends silently when the sender is dropped
        if let Some(pid) = pid {
            tokio::spawn(async move {
                if kill_rx.await.is_ok() {
                    kill_worker_pid(pid);
                }
            });
        }

        tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // a worker may exit without draining stdin; that is its call
                if let Err(err) = stdin.write_all(contract.as_bytes()).await {
                    debug!(error = %err, "worker closed stdin early");
                }
            }
            let exit = match child.wait_with_output().await {
                Ok(output) => WorkerExit::from_output(output),
                Err(err) => WorkerExit {
                    success: false,
                    output: String::new(),
                    diagnostic: format!("failed to collect worker exit: {}", err),
                },
            };
            let _ = exit_tx.send(exit);
        });

        Ok(LaunchedWorker {
            pid,
            kill_tx,
            exit_rx,
        })
    }
}

/// Run a checker or classifier invocation to completion, input on stdin,
/// output captured
pub async fn run_one_shot(
    argv: &[String],
    input: &str,
    session_id: &SessionId,
) -> Result<WorkerExit> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| OverseerError::WorkerLaunchFailure {
            session_id: session_id.to_string(),
            message: "command is empty".to_string(),
        })?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| OverseerError::WorkerLaunchFailure {
            session_id: session_id.to_string(),
            message: format!("failed to spawn {}: {}", program, err),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(err) = stdin.write_all(input.as_bytes()).await {
            debug!(error = %err, "command closed stdin early");
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|err| OverseerError::WorkerLaunchFailure {
            session_id: session_id.to_string(),
            message: format!("failed to collect exit of {}: {}", program, err),
        })?;
    Ok(WorkerExit::from_output(output))
}

/// Split a configured command line into argv, shell-quoting respected
pub fn parse_command_line(command_line: &str) -> Result<Vec<String>> {
    let argv = shell_words::split(command_line).map_err(|err| OverseerError::Config {
        message: format!("unparseable command line {:?}: {}", command_line, err),
    })?;
    if argv.is_empty() {
        return Err(OverseerError::Config {
            message: "command line is empty".to_string(),
        });
    }
    Ok(argv)
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" / ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use std::time::Duration;

    fn test_session() -> Session {
        Session::new(SessionId::root(0), None, "test task")
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_launch_captures_stdout_as_result() {
        let dir = std::env::temp_dir();
        let launcher =
            ProcessLauncher::new("/bin/sh -c 'cat > /dev/null; echo finished the task'", &dir)
                .unwrap();
        let worker = launcher
            .launch(&test_session(), "the contract".to_string())
            .await
            .unwrap();
        let (pid, _kill, exit_rx) = worker.split();
        assert!(pid.is_some());

        let exit = tokio::time::timeout(Duration::from_secs(5), exit_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(exit.success);
        assert_eq!(exit.output, "finished the task");
    }

    #[tokio::test]
    async fn test_launch_passes_session_identity_in_env() {
        let dir = std::env::temp_dir();
        let launcher = ProcessLauncher::new(
            "/bin/sh -c 'cat > /dev/null; echo $OVERSEER_SESSION_ID:$OVERSEER_PARENT_ID'",
            &dir,
        )
        .unwrap();
        let mut session = Session::new(
            SessionId::parse("3.1").unwrap(),
            Some(SessionId::parse("3").unwrap()),
            "child task",
        );
        session.alias = None;

        let worker = launcher.launch(&session, String::new()).await.unwrap();
        let (_, _kill, exit_rx) = worker.split();
        let exit = tokio::time::timeout(Duration::from_secs(5), exit_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.output, "3.1:3");
    }

    #[tokio::test]
    async fn test_kill_stops_a_running_worker() {
        let dir = std::env::temp_dir();
        let launcher = ProcessLauncher::new("/bin/sh -c 'sleep 30'", &dir).unwrap();
        let worker = launcher.launch(&test_session(), String::new()).await.unwrap();
        let (_, kill, exit_rx) = worker.split();

        kill.send(()).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), exit_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!exit.success);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_a_launch_failure() {
        let dir = std::env::temp_dir();
        let launcher = ProcessLauncher::new("/no/such/binary-overseer", &dir).unwrap();
        let err = launcher
            .launch(&test_session(), String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OverseerError::WorkerLaunchFailure { .. }));
    }

    #[tokio::test]
    async fn test_one_shot_reports_exit_code_and_stderr() {
        let id = SessionId::root(9);
        let exit = run_one_shot(&sh("echo oops >&2; exit 3"), "", &id).await.unwrap();
        assert!(!exit.success);
        assert!(exit.diagnostic.contains("exit code 3"));
        assert!(exit.diagnostic.contains("oops"));
    }

    #[tokio::test]
    async fn test_one_shot_feeds_stdin() {
        let id = SessionId::root(9);
        let exit = run_one_shot(&sh("tr a-z A-Z"), "hello", &id).await.unwrap();
        assert!(exit.success);
        assert_eq!(exit.output, "HELLO");
    }

    #[tokio::test]
    async fn test_one_shot_tolerates_commands_that_skip_stdin() {
        let id = SessionId::root(9);
        let exit = run_one_shot(&sh("exit 0"), "ignored input", &id).await.unwrap();
        assert!(exit.success);
    }

    #[test]
    fn test_command_line_parsing_respects_quotes() {
        let argv = parse_command_line("worker --flag 'two words'").unwrap();
        assert_eq!(argv, vec!["worker", "--flag", "two words"]);

        let err = parse_command_line("").unwrap_err();
        assert!(matches!(err, OverseerError::Config { .. }));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let text = "a\nb\nc\nd\ne\nf\ng";
        assert_eq!(tail_lines(text, 3), "e / f / g");
        assert_eq!(tail_lines("only", 3), "only");
    }
}
