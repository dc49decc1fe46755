use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gfauto::commands::{
    init_settings_command, list_binaries_command, run_bin_command, update_binary_versions_command,
    GlobalOptions,
};
use gfauto::init_tracing;

/// Tool-binary management for shader compiler fuzzing.
///
/// This CLI is a thin wrapper around `gfauto-core` (exposed in code as
/// `gfauto_core`). All substantive logic lives in the library so it can be
/// tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "gfauto",
    version,
    about = "Shader compiler fuzzing tool manager",
    long_about = None
)]
struct Cli {
    /// Settings file. Created with defaults by `run-bin` if missing.
    #[arg(long, global = true, default_value = "settings.json")]
    settings: PathBuf,

    /// Binary cache directory. Defaults to $GFAUTO_BINARY_CACHE or the user cache directory.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a binary managed by gfauto, downloading it first if needed.
    ///
    /// The exit code is the binary's own. If the binary could not be run,
    /// the exit code is 3 (settings file was missing and has been created),
    /// 4 (unknown binary name) or 5 (any other failure).
    RunBin {
        /// Symbolic binary name, e.g. `spirv-opt`.
        binary_name: String,

        /// Arguments passed to the binary. Use `--` before arguments that start with `-`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<OsString>,
    },

    /// List the binaries that can be resolved with the current settings.
    ListBinaries {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Probe the host for devices and write a default settings file.
    InitSettings {
        /// Overwrite an existing settings file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Look up the newest gfbuild releases and record them in the settings file.
    UpdateBinaryVersions,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let options = GlobalOptions { settings_path: cli.settings, cache_dir: cli.cache_dir };

    let result: Result<i32> = match cli.command {
        Command::RunBin { binary_name, args } => Ok(run_bin_command(&options, &binary_name, &args)),
        Command::ListBinaries { json } => list_binaries_command(&options, json).map(|_| 0),
        Command::InitSettings { force } => init_settings_command(&options, force).map(|_| 0),
        Command::UpdateBinaryVersions => update_binary_versions_command(&options).map(|_| 0),
    };

    let code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}
