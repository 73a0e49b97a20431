//! Subprocess execution with a hard timeout.
//!
//! Every external command intervene runs (git, fix actions, verification
//! commands) goes through [`run_with_timeout`]. The child is polled until it
//! exits or the deadline passes, in which case it is killed and reaped.
//! Output is collected under the same deadline: a background process that
//! inherits the pipes cannot hold the caller past it, though whatever it
//! writes after that point is lost.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Minimum time granted to the pipe readers after the child exits.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' timed out after {:.1}s", .timeout.as_secs_f32())]
    Timeout { program: String, timeout: Duration },
    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<CommandOutput, ProcessError> {
    let program = cmd.get_program().to_string_lossy().to_string();

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    // Drain both pipes on their own threads so a chatty child can't block on a full pipe.
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let deadline = Instant::now().checked_add(timeout);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                // Reader threads are left detached: grandchildren may still hold the pipes.
                kill(&mut child, &program);
                return Err(ProcessError::Timeout { program, timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(source) => {
                kill(&mut child, &program);
                return Err(ProcessError::Wait { program, source });
            }
        }
    };

    let output_deadline = deadline.map(|d| d.max(Instant::now() + OUTPUT_GRACE));
    let stdout = stdout_reader.finish(output_deadline, &program);
    let stderr = stderr_reader.finish(output_deadline, &program);
    debug!(program = %program, code = ?status.code(), "command finished");

    Ok(CommandOutput {
        status,
        stdout,
        stderr,
    })
}

/// Build a `sh -c <command>` invocation.
pub fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Quote a value for safe interpolation into a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '='))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Output of one pipe, filled by a reader thread until end of stream.
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl PipeReader {
    /// Wait for end of stream until `deadline`, then take what was read.
    fn finish(self, deadline: Option<Instant>, program: &str) -> String {
        let complete = match deadline {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                !matches!(self.done.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
            }
            None => {
                let _ = self.done.recv();
                true
            }
        };
        if !complete {
            warn!(program = %program, "output pipe still open after exit, keeping partial output");
        }
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> PipeReader {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    let sink = Arc::clone(&buf);
    thread::spawn(move || {
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
        }
        let _ = tx.send(());
    });
    PipeReader { buf, done }
}

fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill() {
        warn!(program = %program, error = %e, "failed to kill child process");
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_status() {
        let output = run_with_timeout(&mut shell("echo hello"), Duration::from_secs(5)).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn non_zero_exit_is_reported_not_errored() {
        let output =
            run_with_timeout(&mut shell("echo boom >&2; exit 3"), Duration::from_secs(5)).unwrap();
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.error_text(), "boom");
    }

    #[test]
    fn error_text_falls_back_to_stdout() {
        let output =
            run_with_timeout(&mut shell("echo only-stdout; exit 1"), Duration::from_secs(5))
                .unwrap();
        assert_eq!(output.error_text(), "only-stdout");
    }

    #[test]
    fn slow_command_is_killed_at_timeout() {
        let started = Instant::now();
        let err = run_with_timeout(&mut shell("sleep 5"), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn background_child_holding_pipes_does_not_block_past_deadline() {
        let started = Instant::now();
        let output = run_with_timeout(
            &mut shell("sleep 5 & echo started"),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run_with_timeout(
            &mut Command::new("intervene-definitely-not-a-program"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn shell_quote_leaves_plain_words_alone() {
        assert_eq!(shell_quote("requests"), "requests");
        assert_eq!(shell_quote("tests/unit/test_a.py::case"), "tests/unit/test_a.py::case");
    }

    #[test]
    fn shell_quote_escapes_metacharacters() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("x; rm -rf /"), "'x; rm -rf /'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
