//! gfauto-core
//!
//! Core library for driving shader test-case reduction against a fleet of
//! external tools (shader compilers, validators, disassemblers, reducers).
//!
//! This crate defines the settings store and device model, the binary manager
//! that resolves symbolic tool names to cached executables, the interrupt
//! latch used for cooperative cancellation, and the reduction driver.
//!
//! The goal is to keep all substantive logic here so it is fully testable and
//! reusable from multiple frontends (the `gfauto` CLI, a fuzzing loop, etc.).

pub mod binaries;
pub mod interrupt;
pub mod logging;
pub mod platform;
pub mod process;
pub mod services;
pub mod settings;

use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hasher.finalize();
    Ok(format!("{:x}", digest))
}

/// Compute the SHA-256 hash of an in-memory buffer as a hex string.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
