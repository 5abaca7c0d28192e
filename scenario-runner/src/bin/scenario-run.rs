use std::path::PathBuf;
use std::process;
use std::time::Duration;

use scenario_compiler::{DeviceTarget, OptimizationProfile};
use scenario_runner::{compare_files, ExitReason, ScenarioRunner, Tolerance, DEFAULT_PROGRAM};

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut scenario: Option<PathBuf> = None;
    let mut program = PathBuf::from(DEFAULT_PROGRAM);
    let mut output_dir = PathBuf::from("output");
    let mut timeout_secs: u64 = 60;
    let mut reference: Option<PathBuf> = None;
    let mut actual: Option<PathBuf> = None;
    let mut target = DeviceTarget::Generic;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--runner" => program = PathBuf::from(next(&mut args, "--runner requires a path")),
            "--output" => {
                output_dir = PathBuf::from(next(&mut args, "--output requires a directory"));
            }
            "--timeout" => {
                timeout_secs = args
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--timeout requires a number of seconds");
                        process::exit(1);
                    });
            }
            "--reference" => {
                reference = Some(PathBuf::from(next(&mut args, "--reference requires a file")));
            }
            "--actual" => actual = Some(PathBuf::from(next(&mut args, "--actual requires a file"))),
            "--target" => {
                target = next(&mut args, "--target requires apple_silicon or generic")
                    .parse()
                    .unwrap_or_else(|e: String| {
                        eprintln!("error: {e}");
                        process::exit(1);
                    });
            }
            "--help" | "-h" => {
                eprintln!("Usage: scenario-run [OPTIONS] <SCENARIO_JSON>");
                eprintln!();
                eprintln!("Execute a compiled scenario once through the dispatch runtime.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --runner <PATH>      Runtime executable (default: {DEFAULT_PROGRAM})");
                eprintln!("  --output <DIR>       Output directory (default: output)");
                eprintln!("  --timeout <SECS>     Timeout in seconds (default: 60)");
                eprintln!("  --reference <FILE>   Raw f32 reference to validate against");
                eprintln!("  --actual <FILE>      Raw f32 output to validate");
                eprintln!("                       (default: <output>/output.bin)");
                eprintln!("  --target <T>         Compile target, selects the tolerance");
                eprintln!("                       (default: generic)");
                eprintln!();
                eprintln!("Environment:");
                eprintln!("  RUST_LOG=debug   Show process activity");
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
        eprintln!("Usage: scenario-run [OPTIONS] <SCENARIO_JSON>");
        eprintln!("       scenario-run --help for more info");
        process::exit(1);
    });

    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        eprintln!("error: creating {}: {e}", output_dir.display());
        process::exit(1);
    }

    eprintln!("==> Executing: {}", scenario.display());
    let runner = ScenarioRunner::new(program);
    let result = runner
        .execute(&scenario, &output_dir, Duration::from_secs(timeout_secs))
        .unwrap_or_else(|e| {
            eprintln!("error: {e}");
            process::exit(1);
        });

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);

    match &result.exit_reason {
        ExitReason::Exited(Some(0)) => {
            eprintln!("==> Done in {:.2} ms", result.elapsed.as_secs_f64() * 1000.0);
        }
        ExitReason::Exited(code) => {
            match code {
                Some(code) => eprintln!("==> Runtime exited with status {code}"),
                None => eprintln!("==> Runtime killed by a signal"),
            }
            process::exit(1);
        }
        ExitReason::Timeout => {
            eprintln!("==> Timed out after {timeout_secs}s");
            process::exit(1);
        }
    }

    let metrics = result.metrics();
    if let Some(gpu) = metrics.gpu_time_ms {
        eprintln!("    gpu time: {gpu:.3} ms");
    }
    if let Some(mem) = metrics.memory_mb {
        eprintln!("    memory:   {mem:.1} MB");
    }

    if let Some(reference) = reference {
        let actual = actual.unwrap_or_else(|| output_dir.join("output.bin"));
        let profile = OptimizationProfile::resolve(target);
        let status = compare_files(&reference, &actual, Tolerance::for_profile(&profile))
            .unwrap_or_else(|e| {
                eprintln!("error: {e}");
                process::exit(1);
            });
        eprintln!("==> Validation: {status}");
        if !status.is_passed() {
            process::exit(1);
        }
    }
}

fn next(args: &mut impl Iterator<Item = String>, message: &str) -> String {
    args.next().unwrap_or_else(|| {
        eprintln!("{message}");
        process::exit(1);
    })
}
