//! Settings store.
//!
//! Settings live in a JSON file (by default `settings.json` in the working
//! directory). Writes are canonical: keys are sorted and the layout is stable,
//! so writing equal settings twice produces byte-identical files. Reads ignore
//! unknown fields and fill missing ones with defaults.
//!
//! A *missing* settings file can be replaced with defaults via
//! [`read_or_create`]; a *malformed* one is always an error.

pub mod devices;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::binaries::BinaryReference;
use crate::logging::LogStack;

pub use devices::{active_devices, probe_device_list, Device, DeviceKind};

pub const DEFAULT_SETTINGS_FILE_NAME: &str = "settings.json";

pub const DEFAULT_MAXIMUM_DUPLICATE_CRASHES: u32 = 3;

pub const DEFAULT_MAXIMUM_FUZZ_FAILURES: u32 = 10;

/// Error type for settings operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings file not found: {0}")]
    NotFound(PathBuf),

    /// The file exists but does not parse. Never replaced with defaults.
    #[error("Malformed settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("I/O error on settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Active device '{0}' is not in the device list")]
    UnknownDevice(String),
}

impl SettingsError {
    pub fn kind(&self) -> &'static str {
        match self {
            SettingsError::NotFound(_) => "not_found",
            SettingsError::Malformed { .. } => "malformed",
            SettingsError::Serialize(_) => "serialize",
            SettingsError::Io { .. } => "io",
            SettingsError::UnknownDevice(_) => "unknown_device",
        }
    }
}

/// Convenience result type for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Versioned configuration record for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How many crashes with the same signature are kept before new ones are ignored.
    pub maximum_duplicate_crashes: u32,
    pub maximum_fuzz_failures: u32,
    pub device_list: Vec<Device>,
    /// Names (from `device_list`) of the devices that tests run on.
    pub active_device_names: Vec<String>,
    /// Highest-priority binary references; they replace defaults of the same name.
    pub binary_overrides: Vec<BinaryReference>,
    /// When non-empty, replaces the compiled-in default binary table.
    pub latest_binary_versions: Vec<BinaryReference>,
    pub reduce_tool_crashes: bool,
    pub reduce_crashes: bool,
    pub reduce_bad_images: bool,
    pub extra_graphics_fuzz_generate_args: Vec<String>,
    pub extra_graphics_fuzz_reduce_args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_reduce_signature_regex: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            maximum_duplicate_crashes: DEFAULT_MAXIMUM_DUPLICATE_CRASHES,
            maximum_fuzz_failures: DEFAULT_MAXIMUM_FUZZ_FAILURES,
            device_list: Vec::new(),
            active_device_names: Vec::new(),
            binary_overrides: Vec::new(),
            latest_binary_versions: Vec::new(),
            reduce_tool_crashes: true,
            reduce_crashes: true,
            reduce_bad_images: true,
            extra_graphics_fuzz_generate_args: Vec::new(),
            extra_graphics_fuzz_reduce_args: Vec::new(),
            only_reduce_signature_regex: None,
        }
    }
}

/// Settings plus whether they were just created from defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSettings {
    pub settings: Settings,
    /// `true` when the file was missing and defaults were written.
    pub created: bool,
    pub path: PathBuf,
}

/// Read settings from `path`.
pub fn read(path: &Path) -> SettingsResult<Settings> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(SettingsError::NotFound(path.to_path_buf()));
        }
        Err(source) => return Err(SettingsError::Io { path: path.to_path_buf(), source }),
    };
    serde_json::from_str(&text)
        .map_err(|source| SettingsError::Malformed { path: path.to_path_buf(), source })
}

/// Render settings in canonical form: sorted keys, two-space indent, trailing newline.
pub fn to_canonical_json(settings: &Settings) -> SettingsResult<String> {
    // serde_json::Value objects are BTreeMap-backed, which sorts keys.
    let value = serde_json::to_value(settings).map_err(SettingsError::Serialize)?;
    let mut text = serde_json::to_string_pretty(&value).map_err(SettingsError::Serialize)?;
    text.push('\n');
    Ok(text)
}

/// Write settings to `path` in canonical form and return the written path.
///
/// The file is replaced atomically so concurrent readers never observe a
/// partial write.
pub fn write(path: &Path, settings: &Settings) -> SettingsResult<PathBuf> {
    let text = to_canonical_json(settings)?;
    let io_err = |source| SettingsError::Io { path: path.to_path_buf(), source };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
    tmp.write_all(text.as_bytes()).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(path.to_path_buf())
}

/// Default settings with the given device list; all probed devices except
/// the example offline compiler are active.
pub fn default_settings(device_list: Vec<Device>) -> Settings {
    let active_device_names = device_list
        .iter()
        .filter(|d| !matches!(d.kind, DeviceKind::ShaderCompiler { .. }))
        .map(|d| d.name.clone())
        .collect();
    Settings { device_list, active_device_names, ..Settings::default() }
}

/// Probe the host for devices, write default settings to `path`, and return them.
pub fn write_default(path: &Path) -> SettingsResult<Settings> {
    let settings = default_settings(probe_device_list(LogStack::global()));
    write(path, &settings)?;
    tracing::info!(
        path = %path.display(),
        devices = settings.device_list.len(),
        "Wrote default settings"
    );
    Ok(settings)
}

/// Read settings, creating a default file first if none exists.
///
/// Only a missing file triggers defaults; a malformed file is returned as
/// [`SettingsError::Malformed`].
pub fn read_or_create(path: &Path) -> SettingsResult<LoadedSettings> {
    match read(path) {
        Ok(settings) => Ok(LoadedSettings { settings, created: false, path: path.to_path_buf() }),
        Err(SettingsError::NotFound(_)) => {
            write_default(path)?;
            let settings = read(path)?;
            Ok(LoadedSettings { settings, created: true, path: path.to_path_buf() })
        }
        Err(err) => Err(err),
    }
}

/// One-time notice to show when [`read_or_create`] created the file.
pub fn created_notice(path: &Path) -> String {
    format!(
        "Could not find \"{}\" so one was created with default values. \
         Please review it and try again.",
        path.display()
    )
}
