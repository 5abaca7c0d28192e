use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scenario_runner::{Monitor, MonitorConfig, Report, ScenarioRunner, DEFAULT_PROGRAM};

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut scenario: Option<PathBuf> = None;
    let mut program = PathBuf::from(DEFAULT_PROGRAM);
    let mut output_dir = std::env::temp_dir().join("scenario_output");
    let mut report_path = PathBuf::from("performance_report.json");
    let mut config = MonitorConfig::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--runner" => program = PathBuf::from(next(&mut args, "--runner requires a path")),
            "--output" => {
                output_dir = PathBuf::from(next(&mut args, "--output requires a directory"));
            }
            "--report" => {
                report_path = PathBuf::from(next(&mut args, "--report requires a file"));
            }
            "--duration" => {
                config.duration = Duration::from_secs(seconds(&mut args, "--duration"));
            }
            "--timeout" => {
                config.run_timeout = Duration::from_secs(seconds(&mut args, "--timeout"));
            }
            "--interval" => {
                config.interval = Duration::from_millis(
                    next(&mut args, "--interval requires milliseconds")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("--interval requires milliseconds");
                            process::exit(1);
                        }),
                );
            }
            "--help" | "-h" => {
                eprintln!("Usage: scenario-monitor [OPTIONS] <SCENARIO_JSON>");
                eprintln!();
                eprintln!("Run a scenario repeatedly and report execution time statistics.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --runner <PATH>    Runtime executable (default: {DEFAULT_PROGRAM})");
                eprintln!("  --duration <SECS>  Monitoring duration (default: 60)");
                eprintln!("  --timeout <SECS>   Per-run timeout (default: 30)");
                eprintln!("  --interval <MS>    Pause between runs (default: 100)");
                eprintln!("  --output <DIR>     Runtime output directory");
                eprintln!("                     (default: $TMPDIR/scenario_output)");
                eprintln!("  --report <FILE>    JSON report path");
                eprintln!("                     (default: performance_report.json)");
                eprintln!();
                eprintln!("Environment:");
                eprintln!("  RUST_LOG=debug   Show every run");
                process::exit(0);
            }
            _ => {
                if scenario.is_none() {
                    scenario = Some(PathBuf::from(arg));
                } else {
                    eprintln!("unexpected argument: {arg}");
                    process::exit(1);
                }
            }
        }
    }

    let scenario = scenario.unwrap_or_else(|| {
        eprintln!("Usage: scenario-monitor [OPTIONS] <SCENARIO_JSON>");
        eprintln!("       scenario-monitor --help for more info");
        process::exit(1);
    });

    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        eprintln!("error: creating {}: {e}", output_dir.display());
        process::exit(1);
    }

    eprintln!("=== Performance Monitor ===");
    eprintln!("Monitoring: {}", scenario.display());
    eprintln!("Duration: {} seconds", config.duration.as_secs());
    eprintln!("Press Ctrl-C or Enter to stop early");
    eprintln!();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_signal = Arc::clone(&stop);
    // The session still ends normally, so the summary and report are kept.
    if let Err(e) = ctrlc::set_handler(move || stop_signal.store(true, Ordering::Relaxed)) {
        eprintln!("error: installing interrupt handler: {e}");
        process::exit(1);
    }
    let stop_input = Arc::clone(&stop);
    // Detached: a blocked stdin read must not hold up exit.
    thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().lock().read_line(&mut line) {
            if n > 0 {
                stop_input.store(true, Ordering::Relaxed);
            }
        }
    });

    println!("Iteration | Time (ms) | FPS    | Status");
    println!("----------|-----------|--------|-------");

    let monitor = Monitor::new(ScenarioRunner::new(program), scenario, output_dir, config);
    let report = monitor
        .run(stop, |s| {
            let status = if s.success { "OK" } else { "FAIL" };
            println!(
                "{:9} | {:9.2} | {:6.1} | {status}",
                s.iteration,
                s.elapsed_ms,
                s.fps()
            );
        })
        .unwrap_or_else(|e| {
            eprintln!("error: {e}");
            process::exit(1);
        });

    print_summary(&report);

    if let Err(e) = report.write(&report_path) {
        eprintln!("error: {e}");
        process::exit(1);
    }
    eprintln!();
    eprintln!("Detailed report saved to: {}", report_path.display());
}

fn print_summary(report: &Report) {
    let s = &report.summary;
    println!();
    println!("=== Performance Summary ===");
    if s.total_iterations == 0 {
        println!("No metrics collected");
        return;
    }
    println!("Runs: {} ({} succeeded)", s.total_iterations, s.successful_runs);
    if s.successful_runs == 0 {
        return;
    }
    println!("Average execution time: {:.2} ms", s.mean_ms);
    println!("Min execution time: {:.2} ms", s.min_ms);
    println!("Max execution time: {:.2} ms", s.max_ms);
    println!("Average FPS: {:.1}", s.mean_fps());
    println!("Standard deviation: {:.2} ms", s.std_dev_ms);
    println!("Performance consistency: {:.1}%", s.consistency_pct);
    if let Some(gpu) = s.mean_gpu_time_ms {
        println!("Average GPU time: {gpu:.2} ms");
    }
    if let Some(mem) = s.peak_memory_mb {
        println!("Peak memory: {mem:.1} MB");
    }
}

fn next(args: &mut impl Iterator<Item = String>, message: &str) -> String {
    args.next().unwrap_or_else(|| {
        eprintln!("{message}");
        process::exit(1);
    })
}

fn seconds(args: &mut impl Iterator<Item = String>, flag: &str) -> u64 {
    args.next()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            eprintln!("{flag} requires a number of seconds");
            process::exit(1);
        })
}
