//! Runs one external command to completion or timeout.
//!
//! Exit is observed through `waitpid` (`Child::try_wait`), never through the
//! output pipes reaching EOF: the agent CLI leaves orphaned workers that keep
//! its stdout/stderr open long after the agent itself has exited. Pipes are
//! switched to non-blocking mode and drained from the polling loop, then
//! given a short grace window after exit and closed regardless.

use crate::logging;
use crate::memory::util::send_signal;
use std::io::{ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Exit code reported for a run that hit its timeout, as `timeout(1)` does.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

pub const DEFAULT_TERM_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_millis(500);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const READ_CHUNK_BYTES: usize = 8 * 1024;
const MAX_CHUNKS_PER_PUMP: usize = 4;
const MAX_PENDING_LINE_BYTES: usize = 64 * 1024;
/// Upper bound on the output kept per run; the oldest bytes go first.
pub const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

const AUTH_KEYWORDS: [&str; 4] = ["auth", "unauthorized", "api key", "login"];

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub envs: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub combined_output: String,
    pub timed_out: bool,
}

impl RunOutcome {
    pub fn spawn_failure(spec: &CommandSpec, err: &std::io::Error) -> Self {
        Self {
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            combined_output: format!(
                "failed to spawn {} ({}): {err}",
                spec.label,
                spec.program.display()
            ),
            timed_out: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn failure_reason(&self) -> String {
        if self.timed_out {
            "timed out".to_string()
        } else {
            format!("exit {}", self.exit_code)
        }
    }

    /// Last `max_chars` characters of the output, trimmed.
    pub fn output_tail(&self, max_chars: usize) -> String {
        let count = self.combined_output.chars().count();
        let tail: String = self
            .combined_output
            .chars()
            .skip(count.saturating_sub(max_chars))
            .collect();
        tail.trim().to_string()
    }
}

/// The execution seam the scheduler depends on; tests substitute a fake.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> RunOutcome;
}

pub fn looks_like_auth_failure(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    AUTH_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Appends to the capture buffer and cuts it back to `MAX_CAPTURED_BYTES`
/// once it grows past twice that.
fn append_capped(sink: &mut Vec<u8>, bytes: &[u8]) {
    sink.extend_from_slice(bytes);
    if sink.len() > 2 * MAX_CAPTURED_BYTES {
        keep_tail(sink, MAX_CAPTURED_BYTES);
    }
}

fn keep_tail(buf: &mut Vec<u8>, max: usize) {
    if buf.len() > max {
        let excess = buf.len() - max;
        buf.drain(..excess);
    }
}

fn set_nonblocking(fd: std::os::fd::RawFd) -> std::io::Result<()> {
    // SAFETY: fcntl on a pipe fd we own for the lifetime of the child handle.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// One captured output stream: accumulates raw bytes into the shared buffer
/// and echoes complete lines to the daemon log.
struct StreamPump<R> {
    name: &'static str,
    source: Option<R>,
    pending: Vec<u8>,
    echo: bool,
}

impl<R: Read + AsRawFd> StreamPump<R> {
    fn new(name: &'static str, source: Option<R>, echo: bool) -> std::io::Result<Self> {
        if let Some(src) = &source {
            set_nonblocking(src.as_raw_fd())?;
        }
        Ok(Self {
            name,
            source,
            pending: Vec::new(),
            echo,
        })
    }

    /// Read what is available, at most `MAX_CHUNKS_PER_PUMP` chunks, so a
    /// child that writes faster than we read cannot hold off the exit and
    /// timeout checks. Returns whether the pipe is still open.
    fn pump(&mut self, sink: &mut Vec<u8>) -> bool {
        let mut buf = [0u8; READ_CHUNK_BYTES];
        for _ in 0..MAX_CHUNKS_PER_PUMP {
            let Some(src) = self.source.as_mut() else {
                return false;
            };
            match src.read(&mut buf) {
                Ok(0) => {
                    self.close();
                    return false;
                }
                Ok(n) => {
                    append_capped(sink, &buf[..n]);
                    if self.echo {
                        self.pending.extend_from_slice(&buf[..n]);
                        self.echo_complete_lines();
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return true,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.close();
                    return false;
                }
            }
        }
        self.source.is_some()
    }

    fn echo_complete_lines(&mut self) {
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            self.echo_line(&self.pending[start..end]);
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING_LINE_BYTES {
            let rest = std::mem::take(&mut self.pending);
            self.echo_line(&rest);
        }
    }

    fn echo_line(&self, line: &[u8]) {
        if !self.echo {
            return;
        }
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        if !text.trim().is_empty() {
            logging::log(&format!("agent {}| {text}", self.name));
        }
    }

    /// Drop our end of the pipe, whatever still holds the other end.
    fn close(&mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.echo_line(&rest);
        }
        self.source = None;
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub term_grace: Duration,
    pub drain_grace: Duration,
    pub poll_interval: Duration,
    pub echo: bool,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            term_grace: DEFAULT_TERM_GRACE,
            drain_grace: DEFAULT_DRAIN_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            echo: true,
        }
    }
}

impl ProcessRunner {
    fn wait_for_exit(
        &self,
        spec: &CommandSpec,
        child: &mut Child,
        out: &mut StreamPump<std::process::ChildStdout>,
        err: &mut StreamPump<std::process::ChildStderr>,
        combined: &mut Vec<u8>,
    ) -> (Option<ExitStatus>, bool) {
        let started = Instant::now();
        let mut term_sent_at: Option<Instant> = None;

        loop {
            out.pump(combined);
            err.pump(combined);

            match child.try_wait() {
                Ok(Some(status)) => return (Some(status), term_sent_at.is_some()),
                Ok(None) => {}
                Err(wait_err) => {
                    logging::log(&format!("{}: wait failed: {wait_err}", spec.label));
                    let _ = child.kill();
                    return (child.wait().ok(), term_sent_at.is_some());
                }
            }

            match (spec.timeout, term_sent_at) {
                (Some(timeout), None) if started.elapsed() >= timeout => {
                    logging::log(&format!(
                        "{} timed out after {}s; sending SIGTERM",
                        spec.label,
                        timeout.as_secs()
                    ));
                    let _ = send_signal(child.id(), libc::SIGTERM);
                    term_sent_at = Some(Instant::now());
                }
                (_, Some(sent)) if sent.elapsed() >= self.term_grace => {
                    logging::log(&format!(
                        "{} ignored SIGTERM for {}s; sending SIGKILL",
                        spec.label,
                        self.term_grace.as_secs()
                    ));
                    let _ = child.kill();
                    return (child.wait().ok(), true);
                }
                _ => {}
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn drain(
        &self,
        out: &mut StreamPump<std::process::ChildStdout>,
        err: &mut StreamPump<std::process::ChildStderr>,
        combined: &mut Vec<u8>,
    ) {
        let deadline = Instant::now() + self.drain_grace;
        loop {
            let out_open = out.pump(combined);
            let err_open = err.pump(combined);
            if (!out_open && !err_open) || Instant::now() >= deadline {
                break;
            }
            thread::sleep(self.poll_interval.min(Duration::from_millis(25)));
        }
        out.close();
        err.close();
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec) -> RunOutcome {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let outcome = RunOutcome::spawn_failure(spec, &err);
                logging::log(&outcome.combined_output);
                return outcome;
            }
        };

        let pumps = StreamPump::new("out", child.stdout.take(), self.echo).and_then(|out| {
            StreamPump::new("err", child.stderr.take(), self.echo).map(|err| (out, err))
        });
        let (mut out, mut err) = match pumps {
            Ok(pumps) => pumps,
            Err(io_err) => {
                let _ = child.kill();
                let _ = child.wait();
                return RunOutcome {
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                    combined_output: format!(
                        "failed to capture output of {}: {io_err}",
                        spec.label
                    ),
                    timed_out: false,
                };
            }
        };

        let mut combined = Vec::new();
        let (status, timed_out) =
            self.wait_for_exit(spec, &mut child, &mut out, &mut err, &mut combined);
        self.drain(&mut out, &mut err, &mut combined);
        keep_tail(&mut combined, MAX_CAPTURED_BYTES);

        let exit_code = if timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            status.map(exit_code_of).unwrap_or(SPAWN_FAILURE_EXIT_CODE)
        };
        let combined_output = String::from_utf8_lossy(&combined).into_owned();

        if exit_code != 0 && !timed_out && looks_like_auth_failure(&combined_output) {
            logging::log(&format!(
                "{} failed with an authentication error; log in with the agent CLI or set CURSOR_API_KEY",
                spec.label
            ));
        }

        RunOutcome {
            exit_code,
            combined_output,
            timed_out,
        }
    }
}
