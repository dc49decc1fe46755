//! Reduction driver.
//!
//! Runs the external `glsl-reduce` tool on one shader job of a test. The
//! reducer decides which candidate is interesting by running the
//! interestingness test named after `--`; the driver only builds the command
//! line, records everything in `command.log` and hands the output directory
//! back. The reducer reports its outcome through files in that directory, so
//! its exit code is logged but never treated as a failure here.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::binaries::catalog::GRAPHICSFUZZ_TOOL_NAME;
use crate::binaries::{BinaryError, BinaryManager};
use crate::interrupt::{InterruptError, InterruptLatch};
use crate::logging::LogStack;
use crate::process::{self, ProcessError, RunOptions};

/// Primary shader description file of a shader job bundle.
pub const SHADER_JOB: &str = "shader.json";

pub const COMMAND_LOG: &str = "command.log";

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("Shader job not found: {0}")]
    MissingShaderJob(PathBuf),

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error("Could not find {tool} next to {binary} in {dir}")]
    ToolNotFound { tool: String, binary: String, dir: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Interrupted(#[from] InterruptError),
}

impl ReduceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReduceError::MissingShaderJob(_) => "missing_shader_job",
            ReduceError::Binary(err) => err.kind(),
            ReduceError::ToolNotFound { .. } => "tool_not_found",
            ReduceError::Io { .. } => "io",
            ReduceError::Process(err) => err.kind(),
            ReduceError::Interrupted(err) => err.kind(),
        }
    }
}

/// Knobs for [`run_reduce`].
#[derive(Debug, Clone)]
pub struct ReduceOptions {
    /// Only apply semantics-preserving reductions.
    pub preserve_semantics: bool,
    /// Passed to the reducer before the `--` separator.
    pub extra_args: Vec<String>,
    /// Binary whose directory contains the reducer.
    pub reducer_binary: String,
    pub reducer_tool: String,
    /// Entry point the reducer runs on each candidate; looked up on `PATH` by the reducer.
    pub interestingness_test: String,
    /// Checked once before the reducer is started.
    pub interrupt: Option<InterruptLatch>,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            preserve_semantics: false,
            extra_args: Vec::new(),
            reducer_binary: GRAPHICSFUZZ_TOOL_NAME.to_string(),
            reducer_tool: "glsl-reduce".to_string(),
            interestingness_test: "gfauto_interestingness_test".to_string(),
            interrupt: None,
        }
    }
}

/// Command line for reducing `source_dir/target_name/shader.json` with `reducer`.
///
/// The interestingness test receives `source_dir` and
/// `--override_shader_job <target_name>`; the reducer appends the candidate
/// shader job path itself.
pub fn build_reduce_command(
    reducer: &Path,
    source_dir: &Path,
    target_name: &str,
    output_dir: &Path,
    options: &ReduceOptions,
) -> Vec<OsString> {
    let input_shader_job = source_dir.join(target_name).join(SHADER_JOB);

    let mut cmd: Vec<OsString> = vec![
        reducer.into(),
        input_shader_job.into(),
        "--output".into(),
        output_dir.into(),
    ];
    if options.preserve_semantics {
        cmd.push("--preserve-semantics".into());
    }
    cmd.extend(options.extra_args.iter().map(OsString::from));
    // Everything after `--` is positional.
    cmd.push("--".into());
    cmd.push(options.interestingness_test.as_str().into());
    cmd.push(source_dir.into());
    cmd.push("--override_shader_job".into());
    cmd.push(target_name.into());
    cmd
}

/// Locate the reducer tool in the directory of the `reducer_binary`.
pub fn find_reducer(
    binary_manager: &BinaryManager,
    options: &ReduceOptions,
) -> Result<PathBuf, ReduceError> {
    let resolved = binary_manager.get_binary_path_by_name(&options.reducer_binary)?;
    let dir = resolved.path.parent().map(Path::to_path_buf).unwrap_or_default();
    which::which_in(&options.reducer_tool, Some(&dir), &dir).map_err(|_| ReduceError::ToolNotFound {
        tool: options.reducer_tool.clone(),
        binary: options.reducer_binary.clone(),
        dir,
    })
}

/// Reduce shader job `target_name` of the test in `source_dir`, writing
/// results to `output_dir`, and return `output_dir`.
///
/// Returns successfully whatever the reducer's exit code; `output_dir` always
/// contains `command.log` afterwards. Errors are limited to problems that
/// stop the reducer from being started at all.
pub fn run_reduce(
    source_dir: &Path,
    target_name: &str,
    output_dir: &Path,
    binary_manager: &BinaryManager,
    options: &ReduceOptions,
    log: &LogStack,
) -> Result<PathBuf, ReduceError> {
    let input_shader_job = source_dir.join(target_name).join(SHADER_JOB);
    if !input_shader_job.is_file() {
        return Err(ReduceError::MissingShaderJob(input_shader_job));
    }
    if let Some(latch) = &options.interrupt {
        latch.interrupt_if_needed()?;
    }

    let reducer = find_reducer(binary_manager, options)?;
    let cmd = build_reduce_command(&reducer, source_dir, target_name, output_dir, options);

    fs::create_dir_all(output_dir)
        .map_err(|source| ReduceError::Io { path: output_dir.to_path_buf(), source })?;
    let log_path = output_dir.join(COMMAND_LOG);
    let log_file = fs::File::create(&log_path)
        .map_err(|source| ReduceError::Io { path: log_path.clone(), source })?;

    let completed = {
        let _guard = log.push(log_file);
        let run_options =
            RunOptions { check_exit_code: false, verbose: true, ..RunOptions::default() };
        process::run(&cmd, &run_options, log)?
    };

    tracing::info!(
        target_name,
        output_dir = %output_dir.display(),
        exit_code = completed.exit_code,
        "Reducer finished"
    );
    // The reducer was allowed to finish; the caller decides what not to start next.
    if let Some(latch) = &options.interrupt {
        latch.report_if_interrupted();
    }
    Ok(output_dir.to_path_buf())
}
