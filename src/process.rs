//! Runs external executables on `tokio::process`.
//!
//! A [`Runner`] describes one invocation. [`Runner::spawn`] starts it and hands
//! back a [`RunningProcess`] whose output can be consumed line by line with
//! [`RunningProcess::next_event`] while the process runs, or handled through
//! [`RunningProcess::wait_with`]. Completion succeeds only on exit status 0.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PortabookError, Result};

/// Number of stderr lines kept for the failure report
const STDERR_TAIL_LINES: usize = 20;

/// One line of output from a running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
}

/// A single external process invocation
#[derive(Debug, Clone)]
pub struct Runner {
    binary: String,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl Runner {
    pub fn new<S, I, A>(binary: S, args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            binary: binary.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }

    /// Run the process inside `dir`
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Kill the process when `token` is cancelled
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Kill the process if it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Start the process
    pub fn spawn(self) -> Result<RunningProcess> {
        if self.cancel.is_cancelled() {
            return Err(PortabookError::Cancelled);
        }

        debug!(
            "Executing: {} {} (in {})",
            self.binary,
            self.args
                .iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
            self.working_dir
                .as_deref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| ".".to_string())
        );

        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| PortabookError::Launch {
            binary: self.binary.clone(),
            source,
        })?;

        let (sender, events) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, sender.clone(), ProcessEvent::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, sender, ProcessEvent::Stderr);
        }

        Ok(RunningProcess {
            binary: self.binary,
            child,
            events,
            cancel: self.cancel,
            timeout: self.timeout,
        })
    }

    /// Run to completion, logging output lines
    pub async fn run(self) -> Result<()> {
        let binary = self.binary.clone();
        self.spawn()?.wait_with(|event| log_event(&binary, &event)).await
    }

    /// Run to completion and return everything written to stdout
    pub async fn capture_stdout(self) -> Result<String> {
        let binary = self.binary.clone();
        let mut stdout = String::new();

        self.spawn()?
            .wait_with(|event| match event {
                ProcessEvent::Stdout(line) => {
                    stdout.push_str(&line);
                    stdout.push('\n');
                }
                other => log_event(&binary, &other),
            })
            .await?;

        Ok(stdout)
    }
}

fn forward_lines<R, F>(reader: R, sender: mpsc::UnboundedSender<ProcessEvent>, wrap: F)
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn(String) -> ProcessEvent + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();
        // Keep reading after the receiver is gone so the pipe never fills up.
        // Bytes that are not UTF-8 are replaced, never dropped.
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(trim_line_ending(&buffer)).into_owned();
                    let _ = sender.send(wrap(line));
                }
                Err(e) => {
                    warn!("Stopped reading process output: {}", e);
                    break;
                }
            }
        }
    });
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn log_event(binary: &str, event: &ProcessEvent) {
    match event {
        ProcessEvent::Stdout(line) => debug!("[{} stdout] {}", binary, line),
        ProcessEvent::Stderr(line) => debug!("[{} stderr] {}", binary, line),
    }
}

/// Handle to a started process
#[derive(Debug)]
pub struct RunningProcess {
    binary: String,
    child: Child,
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl RunningProcess {
    /// Next line of output, or `None` once both streams are closed
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Wait for exit, discarding remaining output
    pub async fn wait(self) -> Result<()> {
        self.wait_with(|_| {}).await
    }

    /// Wait for exit, handing every remaining output line to `on_event`.
    ///
    /// Fails with `Exit` on a non-zero status, `Cancelled` when the token
    /// fires and `Timeout` when the deadline passes. The child is killed in
    /// the latter two cases.
    pub async fn wait_with<F>(mut self, mut on_event: F) -> Result<()>
    where
        F: FnMut(ProcessEvent),
    {
        let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut handle = |event: ProcessEvent, tail: &mut VecDeque<String>| {
            if let ProcessEvent::Stderr(line) = &event {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
            }
            on_event(event);
        };

        let timeout = self.timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                Some(event) = self.events.recv() => handle(event, &mut stderr_tail),
                status = self.child.wait() => {
                    break status.map_err(|source| PortabookError::Launch {
                        binary: self.binary.clone(),
                        source,
                    })?;
                }
                _ = self.cancel.cancelled() => {
                    warn!("Cancelling {}", self.binary);
                    let _ = self.child.kill().await;
                    return Err(PortabookError::Cancelled);
                }
                _ = &mut deadline => {
                    let seconds = timeout.map(|t| t.as_secs()).unwrap_or_default();
                    warn!("{} exceeded {}s, killing it", self.binary, seconds);
                    let _ = self.child.kill().await;
                    return Err(PortabookError::Timeout {
                        binary: self.binary.clone(),
                        seconds,
                    });
                }
            }
        };

        while let Some(event) = self.events.recv().await {
            handle(event, &mut stderr_tail);
        }

        if status.success() {
            debug!("{} finished successfully", self.binary);
            return Ok(());
        }

        for line in &stderr_tail {
            warn!("[{} stderr] {}", self.binary, line);
        }

        Err(PortabookError::Exit {
            binary: self.binary,
            code: status.code(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> Runner {
        Runner::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_run_success() {
        tokio_test::assert_ok!(shell("echo hello; echo oops >&2").run().await);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_exit_error() {
        let err = shell("exit 3").run().await.unwrap_err();
        match err {
            PortabookError::Exit { binary, code } => {
                assert_eq!(binary, "sh");
                assert_eq!(code, Some(3));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let err = Runner::new("portabook-no-such-binary", Vec::<String>::new())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PortabookError::Launch { ref binary, .. } if binary == "portabook-no-such-binary"));
    }

    #[tokio::test]
    async fn test_capture_stdout_keeps_lines_in_order() {
        let output = shell("printf 'one\\ntwo\\n'; echo noise >&2; echo three")
            .capture_stdout()
            .await
            .unwrap();
        assert_eq!(output, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_truncate_output() {
        let output = shell("printf 'one\\n\\377bad\\nthree\\r\\n'")
            .capture_stdout()
            .await
            .unwrap();
        assert_eq!(output, "one\n\u{FFFD}bad\nthree\n");
    }

    #[tokio::test]
    async fn test_final_line_without_newline_is_kept() {
        let output = shell("printf 'one\\nlast'").capture_stdout().await.unwrap();
        assert_eq!(output, "one\nlast\n");
    }

    #[tokio::test]
    async fn test_events_are_streamed() {
        let mut process = shell("echo out; echo err >&2").spawn().unwrap();

        let mut events = Vec::new();
        while let Some(event) = process.next_event().await {
            events.push(event);
        }
        process.wait().await.unwrap();

        assert!(events.contains(&ProcessEvent::Stdout("out".to_string())));
        assert!(events.contains(&ProcessEvent::Stderr("err".to_string())));
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = shell("pwd").current_dir(dir.path()).capture_stdout().await.unwrap();
        let reported = std::fs::canonicalize(output.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let token = CancellationToken::new();
        let process = shell("sleep 30").cancel_token(token.clone()).spawn().unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = process.wait().await.unwrap_err();
        assert!(matches!(err, PortabookError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancelled_token_prevents_spawn() {
        let token = CancellationToken::new();
        token.cancel();
        let err = shell("true").cancel_token(token).spawn().unwrap_err();
        assert!(matches!(err, PortabookError::Cancelled));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let err = shell("sleep 30")
            .timeout(Some(Duration::from_millis(200)))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PortabookError::Timeout { ref binary, .. } if binary == "sh"));
    }
}
