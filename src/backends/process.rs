// Child process plumbing shared by all runners

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::Invocation;

/// Number of trailing stderr lines kept for the failure report.
const STDERR_TAIL_LINES: usize = 16;

/// Why a spawned unit process did not complete successfully.
#[derive(Debug)]
pub enum ProcessError {
    Spawn { program: String, source: io::Error },
    Wait(io::Error),
    Exited { status: ExitStatus, stderr: String },
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "failed to start `{}`: {}", program, source),
            Self::Wait(err) => write!(f, "failed to wait for process: {}", err),
            Self::Exited { status, stderr } if stderr.is_empty() => write!(f, "{}", status),
            Self::Exited { status, stderr } => write!(f, "{}: {}", status, stderr),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            Self::Wait(err) => Some(err),
            Self::Exited { .. } => None,
        }
    }
}

/// Spawns `command` and wires it to the invocation: input is streamed into
/// stdin, stdout is streamed into the output sink, and every stderr line is
/// forwarded to the log channel. A spawn failure or a non-zero exit is
/// reported through the error channel once the process is gone.
///
/// The three streams are pumped concurrently, so a process that interleaves
/// reading and writing never deadlocks on a full pipe.
pub(crate) async fn pipe_process(mut command: Command, invocation: &mut Invocation<'_>) {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let program = command.as_std().get_program().to_string_lossy().into_owned();

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            invocation
                .fail("failed to run", &ProcessError::Spawn { program, source })
                .await;
            return;
        }
    };
    invocation.log(&format!(
        "started `{}` (pid {})",
        program,
        child.id().unwrap_or_default()
    ));

    let (Some(mut stdin), Some(mut stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        invocation.fail("failed to run", &"process pipes unavailable").await;
        return;
    };

    let (output, input, events) = invocation.parts();

    let feed = async move {
        let copied = tokio::io::copy(input, &mut stdin).await;
        // Closing stdin signals end of input to the process.
        drop(stdin);
        if let Err(err) = copied {
            // The process may exit without consuming its input.
            if err.kind() != io::ErrorKind::BrokenPipe {
                events.log(&format!("failed to forward input: {}", err));
            }
        }
    };

    let drain = async move {
        if let Err(err) = tokio::io::copy(&mut stdout, &mut *output).await {
            events.log(&format!("output closed, discarding the rest: {}", err));
            let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
        }
        let _ = output.flush().await;
    };

    let logs = async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).split(b'\n');
        while let Ok(Some(raw)) = lines.next_segment().await {
            let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            events.log(&line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    };

    let ((), (), stderr_tail) = tokio::join!(feed, drain, logs);

    match child.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => {
            invocation
                .fail(
                    "execution failed",
                    &ProcessError::Exited {
                        status,
                        stderr: stderr_tail,
                    },
                )
                .await
        }
        Err(err) => {
            invocation
                .fail("execution failed", &ProcessError::Wait(err))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::testing::RecordingEvents;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn test_streams_input_to_output() {
        let events = RecordingEvents::default();
        let mut output = Vec::new();
        let mut input: &[u8] = b"hi";

        let mut invocation = Invocation::new(&mut output, &mut input, &events);
        pipe_process(sh("cat"), &mut invocation).await;

        assert_eq!(output, b"hi");
        assert!(events.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stderr_goes_to_log_channel() {
        let events = RecordingEvents::default();
        let mut output = Vec::new();
        let mut input = tokio::io::empty();

        let mut invocation = Invocation::new(&mut output, &mut input, &events);
        pipe_process(sh("echo progress >&2; printf done"), &mut invocation).await;

        assert_eq!(output, b"done");
        assert!(
            events
                .logs
                .lock()
                .unwrap()
                .iter()
                .any(|line| line == "progress")
        );
        assert!(events.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_error_after_output() {
        let events = RecordingEvents::default();
        let mut output = Vec::new();
        let mut input = tokio::io::empty();

        let mut invocation = Invocation::new(&mut output, &mut input, &events);
        pipe_process(sh("printf partial; echo broken >&2; exit 3"), &mut invocation).await;

        let errors = events.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "execution failed");
        assert!(errors[0].1.contains("broken"));

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("partial"));
        assert!(text.contains("ERR execution failed: exit status"));
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_missing_program_reports_spawn_failure() {
        let events = RecordingEvents::default();
        let mut output = Vec::new();
        let mut input = tokio::io::empty();

        let mut invocation = Invocation::new(&mut output, &mut input, &events);
        pipe_process(
            Command::new("unit-server-test-no-such-program"),
            &mut invocation,
        )
        .await;

        let errors = events.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("failed to start `unit-server-test-no-such-program`"));
    }

    #[tokio::test]
    async fn test_process_ignoring_input_is_not_an_error() {
        let events = RecordingEvents::default();
        let mut output = Vec::new();
        let payload = vec![b'x'; 1 << 20];
        let mut input: &[u8] = &payload;

        let mut invocation = Invocation::new(&mut output, &mut input, &events);
        pipe_process(sh("printf ok"), &mut invocation).await;

        assert_eq!(output, b"ok");
        assert!(events.errors.lock().unwrap().is_empty());
    }
}
