//! Command line front end for the generator, for running it outside a build script:
//!
//! ```text
//! weft gen [DIR]            generate DIR/weft_gen.rs from the sources under DIR/src
//! weft check [DIR] [--json] plan only, reporting diagnostics (and optionally the plans)
//! ```

use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::process;
use weft_codegen::build_rs;
use weft_codegen::{InjectorPlan, WeftError};

#[derive(Serialize)]
struct CheckReport {
    injectors: Vec<CheckInjector>,
    errors: Vec<CheckError>,
}

#[derive(Serialize)]
struct CheckInjector {
    name: String,
    package: String,
    plan: Option<InjectorPlan>,
}

#[derive(Serialize)]
struct CheckError {
    kind: String,
    message: String,
}

fn usage() -> ! {
    eprintln!("usage: weft <gen|check> [DIR] [--json]");
    process::exit(2);
}

fn main() {
    let mut args = env::args().skip(1);
    let mode = match args.next() {
        Some(mode) => mode,
        None => usage(),
    };

    let mut dir = PathBuf::from(".");
    let mut json = false;
    for arg in args {
        if arg == "--json" {
            json = true;
        } else if arg.starts_with('-') {
            usage();
        } else {
            dir = PathBuf::from(arg);
        }
    }

    match mode.as_str() {
        "gen" => {
            let stdout = std::io::stdout();
            let stderr = std::io::stderr();
            match build_rs::generate_internal(
                &mut stdout.lock(),
                &mut stderr.lock(),
                &dir,
                &dir,
            ) {
                Ok(manifest) => {
                    println!("weft: generated {} file(s)", manifest.files.len());
                }
                Err(e) => {
                    eprintln!("weft: {}", e);
                    process::exit(1);
                }
            }
        }
        "check" => {
            let plan = build_rs::plan_dir(&dir.join("src"));
            if json {
                let report = CheckReport {
                    injectors: plan
                        .injectors
                        .iter()
                        .map(|p| CheckInjector {
                            name: p.spec.name().to_owned(),
                            package: p.spec.pkg().import_path.clone(),
                            plan: p.plan.clone(),
                        })
                        .collect(),
                    errors: plan.errors.iter().map(check_error).collect(),
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).expect("report serializes")
                );
            } else {
                for error in &plan.errors {
                    eprintln!("{}", error);
                }
                if plan.errors.is_empty() {
                    println!("weft: {} injector(s) planned, no problems", plan.injectors.len());
                }
            }
            if !plan.errors.is_empty() {
                process::exit(1);
            }
        }
        _ => usage(),
    }
}

fn check_error(e: &WeftError) -> CheckError {
    CheckError {
        kind: e.kind().as_ref().to_owned(),
        message: e.to_string(),
    }
}
