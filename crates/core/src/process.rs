//! Running external tools.
//!
//! Every invocation is logged through a [`LogStack`]: the command line, the
//! exit code, and (on failure or when verbose) the captured stdout/stderr.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;

use crate::logging::LogStack;

pub const LOG_COMMAND_FAILED_PREFIX: &str = "Command failed: ";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Empty command line")]
    EmptyCommand,
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with code {exit_code}")]
    Failed { program: String, exit_code: i32, stdout: String, stderr: String },
}

impl ProcessError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::EmptyCommand => "empty_command",
            ProcessError::Spawn { .. } => "spawn",
            ProcessError::Failed { .. } => "failed",
        }
    }
}

/// Options for [`run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Treat a non-zero exit code as [`ProcessError::Failed`].
    pub check_exit_code: bool,
    /// Log stdout/stderr even when the command succeeds.
    pub verbose: bool,
    /// Extra environment variables for the child.
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { check_exit_code: true, verbose: false, env: BTreeMap::new(), working_dir: None }
    }
}

/// Result of a completed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedProcess {
    pub args: Vec<OsString>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CompletedProcess {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `cmd` to completion, capturing its output.
///
/// No timeout is applied; the call blocks until the child exits.
pub fn run(
    cmd: &[OsString],
    options: &RunOptions,
    log: &LogStack,
) -> Result<CompletedProcess, ProcessError> {
    let (program, args) = cmd.split_first().ok_or(ProcessError::EmptyCommand)?;
    let program_display = program.to_string_lossy().to_string();
    let cmd_display = format_command(cmd);

    log.log(&format!("Exec{}{}", if options.verbose { " (verbose):" } else { ":" }, cmd_display));
    if !options.env.is_empty() {
        log.log(&format!("Extra environment variables are: {:?}", options.env));
    }

    let mut command = Command::new(program);
    command.args(args).envs(&options.env);
    if let Some(dir) = &options.working_dir {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .map_err(|source| ProcessError::Spawn { program: program_display.clone(), source })?;

    let completed = CompletedProcess {
        args: cmd.to_vec(),
        exit_code: exit_code_of(&output.status),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };

    if options.check_exit_code && !completed.success() {
        log.log(&format!("{LOG_COMMAND_FAILED_PREFIX}{cmd_display}"));
        log_returncode(log, completed.exit_code);
        log_stdout_stderr(log, &completed);
        return Err(ProcessError::Failed {
            program: program_display,
            exit_code: completed.exit_code,
            stdout: completed.stdout,
            stderr: completed.stderr,
        });
    }

    log_returncode(log, completed.exit_code);
    if options.verbose {
        log_stdout_stderr(log, &completed);
    }

    Ok(completed)
}

/// Map an exit status to a single integer code.
///
/// A child killed by a signal reports `128 + signal`, matching shell
/// conventions.
pub fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Render a command line for logs.
pub fn format_command(cmd: &[OsString]) -> String {
    let parts: Vec<String> =
        cmd.iter().map(|a| format!("{:?}", a.to_string_lossy().as_ref())).collect();
    format!("[{}]", parts.join(", "))
}

fn log_returncode(log: &LogStack, exit_code: i32) {
    log.log(&format!("RETURNCODE: {exit_code}"));
}

fn log_stdout_stderr(log: &LogStack, completed: &CompletedProcess) {
    log.log("STDOUT:");
    log.log(&completed.stdout);
    log.log("");
    log.log("STDERR:");
    log.log(&completed.stderr);
    log.log("");
}
