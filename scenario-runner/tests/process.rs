#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scenario_runner::{ExitReason, Monitor, MonitorConfig, RunnerError, ScenarioRunner};

/// ETXTBSY
const TEXT_FILE_BUSY: i32 = 26;

/// Write an executable shell script standing in for the dispatch runtime.
fn fake_runtime(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("runtime.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Retry while a parallel test's fork still holds the fresh script open for writing.
fn retry_busy<T>(mut f: impl FnMut() -> Result<T, RunnerError>) -> T {
    for _ in 0..20 {
        match f() {
            Err(RunnerError::Spawn { ref source, .. })
                if source.raw_os_error() == Some(TEXT_FILE_BUSY) =>
            {
                std::thread::sleep(Duration::from_millis(20));
            }
            result => return result.unwrap(),
        }
    }
    panic!("runtime script stayed busy");
}

#[test]
fn passes_scenario_and_output_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), r#"echo "$@""#);
    let runner = ScenarioRunner::new(runtime).arg("--quiet");
    let exec = retry_busy(|| {
        runner.execute(Path::new("s.json"), Path::new("out"), Duration::from_secs(10))
    });
    assert!(exec.success());
    assert_eq!(exec.stdout.trim(), "--scenario s.json --output out --quiet");
}

#[test]
fn captures_stderr_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), "echo 'bad shader' >&2\nexit 7");
    let runner = ScenarioRunner::new(runtime);
    let exec = retry_busy(|| {
        runner.execute(Path::new("s.json"), dir.path(), Duration::from_secs(10))
    });
    assert_eq!(exec.exit_reason, ExitReason::Exited(Some(7)));
    assert!(!exec.success());
    assert_eq!(exec.stderr.trim(), "bad shader");
}

#[test]
fn forwards_environment() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), r#"echo "$SCENARIO_TEST_LIB""#);
    let runner = ScenarioRunner::new(runtime).env("SCENARIO_TEST_LIB", "/usr/local/lib");
    let exec = retry_busy(|| {
        runner.execute(Path::new("s.json"), dir.path(), Duration::from_secs(10))
    });
    assert_eq!(exec.stdout.trim(), "/usr/local/lib");
}

#[test]
fn kills_runs_past_the_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), "exec sleep 30");
    let runner = ScenarioRunner::new(runtime);
    let exec = retry_busy(|| {
        runner.execute(Path::new("s.json"), dir.path(), Duration::from_millis(200))
    });
    assert_eq!(exec.exit_reason, ExitReason::Timeout);
    assert!(exec.elapsed < Duration::from_secs(10), "took {:?}", exec.elapsed);
}

#[test]
fn reports_runtime_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), "echo 'gpu_time: 4.25'\necho 'memory_used: 128'");
    let runner = ScenarioRunner::new(runtime);
    let exec = retry_busy(|| {
        runner.execute(Path::new("s.json"), dir.path(), Duration::from_secs(10))
    });
    let metrics = exec.metrics();
    assert_eq!(metrics.gpu_time_ms, Some(4.25));
    assert_eq!(metrics.memory_mb, Some(128.0));
}

#[test]
fn monitor_collects_samples_until_duration() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), "echo 'gpu_time: 1.5'");
    let config = MonitorConfig {
        duration: Duration::from_millis(300),
        interval: Duration::from_millis(10),
        queue_depth: 4,
        run_timeout: Duration::from_secs(10),
    };
    let monitor = Monitor::new(ScenarioRunner::new(runtime), "s.json", dir.path(), config);

    let mut seen = Vec::new();
    let report = retry_busy(|| {
        seen.clear();
        monitor.run(Arc::new(AtomicBool::new(false)), |s| seen.push(s.iteration))
    });

    assert!(!report.samples.is_empty());
    assert_eq!(seen, (1..=report.samples.len() as u64).collect::<Vec<_>>());
    assert!(report.samples.iter().all(|s| s.success));
    assert_eq!(report.summary.successful_runs, report.samples.len());
    assert_eq!(report.summary.mean_gpu_time_ms, Some(1.5));

    let path = dir.path().join("report.json");
    report.write(&path).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["samples"].as_array().unwrap().len(), report.samples.len());
}

#[test]
fn monitor_counts_failed_runs() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), "exit 2");
    let config = MonitorConfig {
        duration: Duration::from_millis(150),
        interval: Duration::from_millis(10),
        ..MonitorConfig::default()
    };
    let monitor = Monitor::new(ScenarioRunner::new(runtime), "s.json", dir.path(), config);
    let report = retry_busy(|| monitor.run(Arc::new(AtomicBool::new(false)), |_| {}));

    assert!(report.summary.total_iterations > 0);
    assert_eq!(report.summary.successful_runs, 0);
    assert_eq!(report.summary.mean_ms, 0.0);
}

#[test]
fn monitor_stops_mid_session_and_keeps_samples() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = fake_runtime(dir.path(), "echo 'gpu_time: 2.0'");
    let config = MonitorConfig {
        duration: Duration::from_secs(60),
        interval: Duration::from_millis(5),
        queue_depth: 1,
        run_timeout: Duration::from_secs(10),
    };
    let monitor = Monitor::new(ScenarioRunner::new(runtime), "s.json", dir.path(), config);

    let start = Instant::now();
    let report = retry_busy(|| {
        // same flag the interrupt handler sets
        let stop = Arc::new(AtomicBool::new(false));
        let stop_after = Arc::clone(&stop);
        monitor.run(stop, move |s| {
            if s.iteration == 3 {
                stop_after.store(true, Ordering::Relaxed);
            }
        })
    });

    assert!(start.elapsed() < Duration::from_secs(30), "took {:?}", start.elapsed());
    assert!(report.samples.len() >= 3, "got {} samples", report.samples.len());
    assert!(report.samples.len() < 10, "got {} samples", report.samples.len());
    assert_eq!(report.summary.total_iterations, report.samples.len());
    assert_eq!(report.summary.mean_gpu_time_ms, Some(2.0));
}
