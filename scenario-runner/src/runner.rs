use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

/// Executable name the dispatch runtime installs under.
pub const DEFAULT_PROGRAM: &str = "scenario-runner";

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to keep collecting output after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Result of one scenario execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock time from spawn to exit or kill.
    pub elapsed: Duration,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The runtime exited on its own. `None` when killed by a signal.
    Exited(Option<i32>),
    /// Killed after exceeding the timeout.
    Timeout,
}

/// Optional measurements the runtime reports on stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
}

impl Execution {
    pub fn success(&self) -> bool {
        self.exit_reason == ExitReason::Exited(Some(0))
    }

    /// Metrics from stdout; only trusted when the run succeeded.
    pub fn metrics(&self) -> Metrics {
        if !self.success() {
            return Metrics::default();
        }
        parse_metrics(&self.stdout)
    }
}

/// Pull `gpu_time:<ms>` and `memory_used:<mb>` out of runtime output.
///
/// The first occurrence of each key wins; a value that does not parse as a
/// number is treated as absent.
pub fn parse_metrics(output: &str) -> Metrics {
    Metrics {
        gpu_time_ms: metric_value(output, "gpu_time:"),
        memory_mb: metric_value(output, "memory_used:"),
    }
}

fn metric_value(output: &str, key: &str) -> Option<f64> {
    let start = output.find(key)? + key.len();
    let token = output[start..].split_whitespace().next()?;
    let number = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    number.parse().ok()
}

/// Drives the external scenario runtime as a child process.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        ScenarioRunner::new(DEFAULT_PROGRAM)
    }
}

impl ScenarioRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ScenarioRunner {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Extra argument appended after `--scenario` and `--output`.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `program --scenario <scenario> --output <output_dir>` to completion.
    ///
    /// A run that outlives `timeout` is killed and reported as
    /// [`ExitReason::Timeout`], which is not an error.
    pub fn execute(
        &self,
        scenario: &Path,
        output_dir: &Path,
        timeout: Duration,
    ) -> Result<Execution, RunnerError> {
        let mut command = Command::new(&self.program);
        command
            .arg("--scenario")
            .arg(scenario)
            .arg("--output")
            .arg(output_dir)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        log::debug!("spawned {} (pid {})", self.program.display(), child.id());

        // Each pipe gets its own reader thread so a chatty child never blocks
        // on a full pipe while we poll for exit.
        let (tx, rx) = mpsc::channel::<(Stream, Vec<u8>)>();
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, Stream::Stdout, tx.clone());
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, Stream::Stderr, tx.clone());
        }
        drop(tx);

        let mut output = OutputCapture::default();
        let exit_reason = loop {
            while let Ok((stream, chunk)) = rx.try_recv() {
                output.feed(stream, &chunk);
            }
            if let Some(status) = child.try_wait()? {
                break ExitReason::Exited(status.code());
            }
            if start.elapsed() > timeout {
                log::warn!(
                    "{} exceeded {:.1}s timeout, killing",
                    scenario.display(),
                    timeout.as_secs_f64()
                );
                // already exited between try_wait and kill is fine
                let _ = child.kill();
                child.wait()?;
                break ExitReason::Timeout;
            }
            thread::sleep(POLL_INTERVAL);
        };
        let elapsed = start.elapsed();

        // Readers finish when the pipes close. A grandchild may keep them
        // open, so stop waiting after the grace period.
        let deadline = Instant::now() + DRAIN_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((stream, chunk)) => output.feed(stream, &chunk),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    log::debug!("output still open after exit, truncating");
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        log::debug!(
            "{} finished in {:.2} ms: {exit_reason:?}",
            scenario.display(),
            elapsed.as_secs_f64() * 1000.0
        );

        Ok(Execution {
            stdout: output.stdout_str(),
            stderr: output.stderr_str(),
            elapsed,
            exit_reason,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Default)]
struct OutputCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputCapture {
    fn feed(&mut self, stream: Stream, chunk: &[u8]) {
        match stream {
            Stream::Stdout => self.stdout.extend_from_slice(chunk),
            Stream::Stderr => self.stderr.extend_from_slice(chunk),
        }
    }

    fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    stream: Stream,
    tx: mpsc::Sender<(Stream, Vec<u8>)>,
) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((stream, buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("{stream:?} read error: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_parse_from_output() {
        let m = parse_metrics("loading...\ngpu_time: 12.5 ms\nmemory_used:48.25MB\ndone\n");
        assert_eq!(m.gpu_time_ms, Some(12.5));
        assert_eq!(m.memory_mb, Some(48.25));
    }

    #[test]
    fn metrics_absent_or_garbled() {
        assert_eq!(parse_metrics("no numbers here"), Metrics::default());
        let m = parse_metrics("gpu_time: fast");
        assert_eq!(m.gpu_time_ms, None);
    }

    #[test]
    fn failed_run_reports_no_metrics() {
        let exec = Execution {
            stdout: "gpu_time: 3.0".into(),
            stderr: String::new(),
            elapsed: Duration::from_millis(5),
            exit_reason: ExitReason::Exited(Some(1)),
        };
        assert!(!exec.success());
        assert_eq!(exec.metrics(), Metrics::default());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let runner = ScenarioRunner::new("/nonexistent/scenario-runner-binary");
        let err = runner
            .execute(Path::new("s.json"), Path::new("/tmp"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }), "got: {err}");
    }
}
