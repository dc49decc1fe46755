//! Run a managed binary by name.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;

use crate::binaries::{self, BinaryError, BinaryManager};
use crate::process::{exit_code_of, format_command};
use crate::settings::{self, SettingsError};

/// Failures that stop the binary from being run. Once it runs, its exit code
/// is the result, whatever it is.
#[derive(Debug, Error)]
pub enum RunBinError {
    /// Defaults were written to the path; the user should review them.
    #[error(
        "Could not find \"{}\" so one was created with default values. \
         Please review it and try again.",
        .0.display()
    )]
    NoSettingsFile(PathBuf),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Binary not found: {0}")]
    BinaryNotFound(String),

    #[error(transparent)]
    Binary(BinaryError),

    #[error("Failed to run {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunBinError {
    pub fn kind(&self) -> &'static str {
        match self {
            RunBinError::NoSettingsFile(_) => "no_settings_file",
            RunBinError::Settings(err) => err.kind(),
            RunBinError::BinaryNotFound(_) => "binary_not_found",
            RunBinError::Binary(err) => err.kind(),
            RunBinError::Spawn { .. } => "spawn",
        }
    }

    /// Process exit code reported for this failure. Distinct from anything a
    /// typical tool returns so callers can tell "not run" from "ran and failed".
    pub fn exit_code(&self) -> i32 {
        match self {
            RunBinError::NoSettingsFile(_) => 3,
            RunBinError::BinaryNotFound(_) => 4,
            _ => 5,
        }
    }
}

impl From<BinaryError> for RunBinError {
    fn from(err: BinaryError) -> Self {
        match err {
            BinaryError::NotFound(name) => RunBinError::BinaryNotFound(name),
            other => RunBinError::Binary(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunBinOptions {
    pub settings_path: PathBuf,
    /// Cache root for the binary manager built from settings; the default
    /// cache root when `None`.
    pub cache_root: Option<PathBuf>,
}

impl Default for RunBinOptions {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from(settings::DEFAULT_SETTINGS_FILE_NAME),
            cache_root: None,
        }
    }
}

/// Build the root binary manager from the settings file, creating the file
/// (and failing with [`RunBinError::NoSettingsFile`]) if it is missing.
pub fn manager_from_settings(options: &RunBinOptions) -> Result<BinaryManager, RunBinError> {
    let loaded = settings::read_or_create(&options.settings_path)?;
    if loaded.created {
        return Err(RunBinError::NoSettingsFile(loaded.path));
    }
    let cache_root = options.cache_root.clone().unwrap_or_else(binaries::default_cache_root);
    Ok(binaries::get_binary_manager_with_cache(&loaded.settings, cache_root))
}

/// Run binary `name` with `args` and inherited stdio; return its exit code.
///
/// `binary_manager` is built from settings when not supplied.
pub fn run_bin(
    name: &str,
    args: &[OsString],
    binary_manager: Option<&BinaryManager>,
    options: &RunBinOptions,
) -> Result<i32, RunBinError> {
    let owned;
    let manager = match binary_manager {
        Some(manager) => manager,
        None => {
            owned = manager_from_settings(options)?;
            &owned
        }
    };

    let resolved = manager.get_binary_path_by_name(name)?;
    let mut cmd = vec![OsString::from(&resolved.path)];
    cmd.extend(args.iter().cloned());
    tracing::info!(binary = name, version = resolved.version(), "Exec: {}", format_command(&cmd));

    let status = Command::new(&resolved.path)
        .args(args)
        .status()
        .map_err(|source| RunBinError::Spawn { path: resolved.path.clone(), source })?;
    let exit_code = exit_code_of(&status);
    tracing::debug!(binary = name, exit_code, "Binary exited");
    Ok(exit_code)
}
