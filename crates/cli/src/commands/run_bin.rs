use std::ffi::OsString;

use gfauto_core::services::run_bin::{run_bin, RunBinOptions};

use crate::commands::GlobalOptions;

/// Run a managed binary and return the exit code for this process.
///
/// Resolution failures are reported on stderr and mapped to their own exit
/// codes (3: settings file was missing, 4: unknown binary, 5: anything else).
pub fn run_bin_command(options: &GlobalOptions, name: &str, args: &[OsString]) -> i32 {
    tracing::debug!(
        binary = name,
        settings = %options.settings_path.display(),
        "Running managed binary"
    );
    let run_options = RunBinOptions {
        settings_path: options.settings_path.clone(),
        cache_root: Some(options.cache_root()),
    };
    match run_bin(name, args, None, &run_options) {
        Ok(exit_code) => exit_code,
        Err(err) => {
            eprintln!("Error ({}): {}", err.kind(), err);
            err.exit_code()
        }
    }
}
