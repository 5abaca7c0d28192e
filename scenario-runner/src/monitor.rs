//! Repeated scenario execution with live samples and a summary report.
//!
//! A worker thread runs the scenario back to back and pushes one [`Sample`]
//! per run through a bounded channel; the calling thread consumes them as
//! they arrive. The stop flag is checked between runs only, so a run in
//! progress ends by exiting or by its own timeout.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;
use crate::runner::ScenarioRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Stop starting new runs after this long.
    pub duration: Duration,
    /// Pause between runs.
    pub interval: Duration,
    /// Samples buffered before the worker blocks.
    pub queue_depth: usize,
    /// Per-run timeout.
    pub run_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            duration: Duration::from_secs(60),
            interval: Duration::from_millis(100),
            queue_depth: 64,
            run_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub iteration: u64,
    pub elapsed_ms: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
}

impl Sample {
    pub fn fps(&self) -> f64 {
        if self.elapsed_ms > 0.0 {
            1000.0 / self.elapsed_ms
        } else {
            0.0
        }
    }
}

/// Statistics over the successful runs of a monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_iterations: usize,
    pub successful_runs: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Population standard deviation.
    pub std_dev_ms: f64,
    /// `100 - coefficient of variation`, floored at zero.
    pub consistency_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_gpu_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_memory_mb: Option<f64>,
}

impl Summary {
    /// All timing fields are zero when no run succeeded.
    pub fn from_samples(samples: &[Sample]) -> Summary {
        let ok: Vec<&Sample> = samples.iter().filter(|s| s.success).collect();
        let times: Vec<f64> = ok.iter().map(|s| s.elapsed_ms).collect();

        let (mean_ms, min_ms, max_ms, std_dev_ms) = match mean(&times) {
            Some(mean) => {
                let variance =
                    times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / times.len() as f64;
                (
                    mean,
                    times.iter().copied().fold(f64::INFINITY, f64::min),
                    times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    variance.sqrt(),
                )
            }
            None => (0.0, 0.0, 0.0, 0.0),
        };
        let consistency_pct = if mean_ms > 0.0 {
            (100.0 - std_dev_ms / mean_ms * 100.0).max(0.0)
        } else {
            0.0
        };

        let gpu: Vec<f64> = ok.iter().filter_map(|s| s.gpu_time_ms).collect();
        let peak_memory_mb = ok
            .iter()
            .filter_map(|s| s.memory_mb)
            .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |a| a.max(m))));

        Summary {
            total_iterations: samples.len(),
            successful_runs: ok.len(),
            mean_ms,
            min_ms,
            max_ms,
            std_dev_ms,
            consistency_pct,
            mean_gpu_time_ms: mean(&gpu),
            peak_memory_mb,
        }
    }

    pub fn mean_fps(&self) -> f64 {
        if self.mean_ms > 0.0 {
            1000.0 / self.mean_ms
        } else {
            0.0
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Everything a monitoring session measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: Summary,
    pub samples: Vec<Sample>,
}

impl Report {
    pub fn new(samples: Vec<Sample>) -> Report {
        Report {
            summary: Summary::from_samples(&samples),
            samples,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), RunnerError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        fs::write(path, json)?;
        Ok(())
    }
}

pub struct Monitor {
    runner: ScenarioRunner,
    scenario: PathBuf,
    output_dir: PathBuf,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        runner: ScenarioRunner,
        scenario: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        config: MonitorConfig,
    ) -> Self {
        Monitor {
            runner,
            scenario: scenario.into(),
            output_dir: output_dir.into(),
            config,
        }
    }

    /// Run until the configured duration elapses or `stop` is set.
    ///
    /// `on_sample` sees every sample on the calling thread as soon as it is
    /// received. A runner error ends the session and is returned.
    pub fn run(
        &self,
        stop: Arc<AtomicBool>,
        mut on_sample: impl FnMut(&Sample),
    ) -> Result<Report, RunnerError> {
        let (tx, rx) = mpsc::sync_channel::<Result<Sample, RunnerError>>(self.config.queue_depth);

        let runner = self.runner.clone();
        let scenario = self.scenario.clone();
        let output_dir = self.output_dir.clone();
        let config = self.config.clone();
        let stop_w = Arc::clone(&stop);

        let worker = thread::spawn(move || {
            let start = Instant::now();
            let mut iteration = 0u64;
            while !stop_w.load(Ordering::Relaxed) && start.elapsed() < config.duration {
                iteration += 1;
                let result = runner
                    .execute(&scenario, &output_dir, config.run_timeout)
                    .map(|exec| {
                        let metrics = exec.metrics();
                        Sample {
                            iteration,
                            elapsed_ms: exec.elapsed.as_secs_f64() * 1000.0,
                            success: exec.success(),
                            gpu_time_ms: metrics.gpu_time_ms,
                            memory_mb: metrics.memory_mb,
                        }
                    });
                let failed = result.is_err();
                if tx.send(result).is_err() || failed {
                    break;
                }
                thread::sleep(config.interval);
            }
            log::debug!("monitor worker done after {iteration} iterations");
        });

        let mut samples = Vec::new();
        let mut error = None;
        for result in rx.iter() {
            match result {
                Ok(sample) => {
                    on_sample(&sample);
                    samples.push(sample);
                }
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        stop.store(true, Ordering::Relaxed);
        // unblocks a worker waiting on a full queue
        drop(rx);
        if worker.join().is_err() {
            log::error!("monitor worker panicked");
        }

        match error {
            Some(e) => Err(e),
            None => {
                let report = Report::new(samples);
                log::info!(
                    "{}/{} runs succeeded, mean {:.2} ms",
                    report.summary.successful_runs,
                    report.summary.total_iterations,
                    report.summary.mean_ms
                );
                Ok(report)
            }
        }
    }
}
