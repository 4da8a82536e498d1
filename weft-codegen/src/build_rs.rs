//! This module contains the code that is used within a dependent crate's `build.rs` file to run
//! the generator: it loads the crate's sources, plans every injector, and writes the generated
//! initialization file into `OUT_DIR` where the crate picks it up with `include!`.  All
//! progress and diagnostics go to the supplied `Write` handles so the same entry points serve
//! the build script, the `weft` binary, and the tests.

use crate::error::{WeftError, WeftResult};
use crate::gen;
use crate::load;
use crate::{plan_program, ProgramPlan};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::hash::Hasher;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use twox_hash::XxHash64;

/// One generated file and the hash of its contents
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GenFileRecord {
    pub path: String,
    pub hash: String,
}

/// Serializable record of what a generation run produced.  Written next to the generated file
/// so later runs (and humans) can tell whether the output is stale.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GenManifest {
    pub files: Vec<GenFileRecord>,
}

const MANIFEST_NAME: &str = "weft-manifest.json";

impl GenManifest {
    pub fn save(&self, out_dir: &Path) -> WeftResult<PathBuf> {
        let path = out_dir.join(MANIFEST_NAME);
        let file = File::create(&path).map_err(|e| {
            WeftError::io_error(format!("could not create {}: {}", path.display(), e))
        })?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, self).map_err(|e| {
            WeftError::io_error(format!("could not write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }

    pub fn load(out_dir: &Path) -> WeftResult<GenManifest> {
        let path = out_dir.join(MANIFEST_NAME);
        let file = File::open(&path).map_err(|e| {
            WeftError::io_error(format!("could not read {}: {}", path.display(), e))
        })?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| {
            WeftError::io_error(format!("could not parse {}: {}", path.display(), e))
        })
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = XxHash64::with_seed(42);
    hasher.write(content.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Called from the `build.rs` of crates which use the weft markers, e.g.:
///
/// ```no_execute
/// // build.rs
/// fn main() {
///     weft_codegen::generate();
/// }
/// ```
///
/// On failure the diagnostics have already been printed, and the process exits forcefully so
/// the build stops.
pub fn generate() {
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();

    let mut out_handle = stdout.lock();
    let mut err_handle = stderr.lock();

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            writeln!(
                err_handle,
                "CARGO_MANIFEST_DIR is not set; are you sure you're calling this from within build.rs?"
            )
            .unwrap();
            std::process::exit(-1);
        }
    };
    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            writeln!(err_handle, "OUT_DIR is not set; are you sure you're calling this from within build.rs?")
                .unwrap();
            std::process::exit(-1);
        }
    };

    match generate_internal(&mut out_handle, &mut err_handle, &manifest_dir, &out_dir) {
        Ok(manifest) => {
            writeln!(out_handle, "weft: generated {} file(s)", manifest.files.len()).unwrap()
        }
        Err(e) => {
            writeln!(err_handle, "weft: {}", e).unwrap();
            std::process::exit(-1);
        }
    }
}

/// Loads the sources under `manifest_dir/src`, plans every injector, and on success writes
/// `weft_gen.rs` plus the manifest into `out_dir`.  Diagnostics are printed to `err`; any at
/// all means nothing is written.
pub fn generate_internal<OUT: Write, ERR: Write>(
    out: &mut OUT,
    err: &mut ERR,
    manifest_dir: &Path,
    out_dir: &Path,
) -> WeftResult<GenManifest> {
    let src_dir = manifest_dir.join("src");
    let plan = plan_dir(&src_dir);

    if !plan.errors.is_empty() {
        for error in &plan.errors {
            writeln!(err, "{}", error).unwrap();
        }
        return Err(WeftError::code_generation(format!(
            "{} error(s); no code was generated",
            plan.errors.len()
        )));
    }

    let solved: Vec<_> = plan
        .injectors
        .iter()
        .filter_map(|p| p.plan.as_ref().map(|plan| (&p.spec, plan)))
        .collect();
    let content = gen::render_file(&solved);

    let gen_path = out_dir.join("weft_gen.rs");
    write_atomic(&gen_path, &content)?;
    writeln!(out, "cargo:rerun-if-changed={}", src_dir.display()).unwrap();
    writeln!(out, "weft: wrote {}", gen_path.display()).unwrap();

    let manifest = GenManifest {
        files: vec![GenFileRecord {
            path: "weft_gen.rs".to_owned(),
            hash: content_hash(&content),
        }],
    };
    manifest.save(out_dir)?;

    Ok(manifest)
}

/// Plans without writing anything; the `check` mode of the `weft` binary
pub fn check_internal<ERR: Write>(err: &mut ERR, manifest_dir: &Path) -> WeftResult<usize> {
    let plan = plan_dir(&manifest_dir.join("src"));
    if plan.errors.is_empty() {
        Ok(plan.injectors.len())
    } else {
        for error in &plan.errors {
            writeln!(err, "{}", error).unwrap();
        }
        Err(WeftError::code_generation(format!(
            "{} error(s)",
            plan.errors.len()
        )))
    }
}

/// Loads a source directory and runs the planning pipeline.  Loader diagnostics gate the
/// pipeline: a program that did not load cleanly is not planned, so the user fixes the
/// reported problems first.
pub fn plan_dir(src_dir: &Path) -> ProgramPlan {
    let (model, load_errors) = load::load_dir(src_dir);
    if !load_errors.is_empty() {
        return ProgramPlan {
            injectors: Vec::new(),
            errors: load_errors,
        };
    }
    plan_program(&model)
}

/// Writes through a temp file in the target directory and renames into place, so a crashed or
/// concurrent run never leaves a half-written generated file
fn write_atomic(path: &Path, content: &str) -> WeftResult<()> {
    let dir = path.parent().ok_or_else(|| {
        WeftError::io_error(format!("output path {} has no parent", path.display()))
    })?;
    std::fs::create_dir_all(dir).map_err(|e| {
        WeftError::io_error(format!("could not create {}: {}", dir.display(), e))
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        WeftError::io_error(format!("could not create temp file in {}: {}", dir.display(), e))
    })?;
    tmp.write_all(content.as_bytes()).map_err(|e| {
        WeftError::io_error(format!("could not write {}: {}", path.display(), e))
    })?;
    tmp.persist(path).map_err(|e| {
        WeftError::io_error(format!("could not persist {}: {}", path.display(), e))
    })?;
    Ok(())
}
