//! Compile a JSON pipeline description into a scenario document.
//!
//! Usage:
//!   scenario-compile pipeline.json -o scenario.json --target apple_silicon
//!   scenario-compile --check scenario.json

use std::fs;
use std::path::PathBuf;
use std::process;

use scenario_compiler::parse::PipelineDescription;
use scenario_compiler::{DeviceTarget, Scenario};

const USAGE: &str = "\
Usage: scenario-compile <pipeline.json> [-o <out.json>] [--target <T>] [--shader-dir <DIR>]
       scenario-compile --check <scenario.json>";

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut input: Option<PathBuf> = None;
    let mut out: Option<PathBuf> = None;
    let mut target: Option<DeviceTarget> = None;
    let mut shader_dir: Option<String> = None;
    let mut check = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--out" | "-o" => {
                i += 1;
                out = Some(PathBuf::from(value(&args, i, "-o requires a file path")));
            }
            "--target" => {
                i += 1;
                let name = value(&args, i, "--target requires apple_silicon or generic");
                target = Some(name.parse().unwrap_or_else(|e: String| {
                    eprintln!("error: {e}");
                    process::exit(1);
                }));
            }
            "--shader-dir" => {
                i += 1;
                shader_dir = Some(value(&args, i, "--shader-dir requires a directory").to_string());
            }
            "--check" => check = true,
            "--help" | "-h" => {
                eprintln!("{USAGE}");
                eprintln!();
                eprintln!("Compile an operation pipeline into a GPU compute scenario.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  -o, --out <FILE>      Output file (default: stdout)");
                eprintln!("  --target <T>          apple_silicon | generic");
                eprintln!("                        (overrides the pipeline)");
                eprintln!("  --shader-dir <DIR>    Directory shader src paths point into");
                eprintln!("  --check               Validate an existing scenario document instead");
                eprintln!();
                eprintln!("Environment:");
                eprintln!("  RUST_LOG=debug   Show every compile stage");
                process::exit(0);
            }
            other if input.is_none() && !other.starts_with('-') => {
                input = Some(PathBuf::from(other));
            }
            other => {
                eprintln!("unexpected argument: {other}");
                eprintln!("{USAGE}");
                process::exit(1);
            }
        }
        i += 1;
    }

    let input = input.unwrap_or_else(|| {
        eprintln!("{USAGE}");
        process::exit(1);
    });
    let text = fs::read_to_string(&input).unwrap_or_else(|e| {
        eprintln!("error: reading {}: {e}", input.display());
        process::exit(1);
    });

    if check {
        let scenario = Scenario::from_json(&text).unwrap_or_else(|e| fail(e));
        eprintln!(
            "{}: ok ({} resources, {} commands)",
            scenario.name(),
            scenario.resources().len(),
            scenario.commands().len()
        );
        return;
    }

    let mut pipeline = PipelineDescription::from_json(&text).unwrap_or_else(|e| fail(e));
    if target.is_some() {
        pipeline.target = target;
    }
    if shader_dir.is_some() {
        pipeline.shader_dir = shader_dir;
    }

    let scenario = pipeline.compile().unwrap_or_else(|e| fail(e));
    let json = scenario.to_json().unwrap_or_else(|e| fail(e));

    match out {
        Some(path) => {
            if let Err(e) = fs::write(&path, json) {
                eprintln!("error: writing {}: {e}", path.display());
                process::exit(1);
            }
            eprintln!(
                "Wrote {} ({} resources, {} commands)",
                path.display(),
                scenario.resources().len(),
                scenario.commands().len()
            );
        }
        None => print!("{json}"),
    }
}

fn value<'a>(args: &'a [String], i: usize, message: &str) -> &'a str {
    args.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("error: {message}");
        process::exit(1);
    })
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("error: {e}");
    process::exit(1);
}
