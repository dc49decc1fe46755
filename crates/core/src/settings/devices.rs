use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::binaries::BinaryReference;
use crate::logging::LogStack;
use crate::settings::{Settings, SettingsError};

/// A device that tests can run on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
    /// Binaries this device pins, taking priority over defaults for tests run on it.
    #[serde(default)]
    pub binaries: Vec<BinaryReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceKind {
    /// Runs the host preprocessing pipeline only (glslang, spirv-opt, ...).
    Preprocess,
    SwiftShader,
    Host,
    Android {
        serial: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// An offline shader compiler invoked as a named binary.
    ShaderCompiler {
        binary: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Device {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self { name: name.into(), kind, binaries: Vec::new() }
    }
}

pub fn device_preprocessor() -> Device {
    Device::new("host_preprocessor", DeviceKind::Preprocess)
}

pub fn swift_shader_device() -> Device {
    Device::new("swift_shader", DeviceKind::SwiftShader)
}

pub fn device_host() -> Device {
    Device::new("host", DeviceKind::Host)
}

/// Example offline compiler device; not active by default.
pub fn offline_compiler_device() -> Device {
    Device::new(
        "offline_compiler_1",
        DeviceKind::ShaderCompiler {
            binary: "amdllpc".to_string(),
            args: vec![
                "-gfxip=9.0.0".to_string(),
                "-verify-ir".to_string(),
                "-auto-layout-desc".to_string(),
            ],
        },
    )
}

/// Probe the host for available devices.
///
/// Always yields the host preprocessor, SwiftShader and host devices. Android
/// devices are added when `adb` can be found; otherwise a warning is logged.
pub fn probe_device_list(log: &LogStack) -> Vec<Device> {
    let mut devices = vec![device_preprocessor(), swift_shader_device(), device_host()];

    match find_adb() {
        Some(adb) => match Command::new(&adb).args(["devices", "-l"]).output() {
            Ok(output) if output.status.success() => {
                devices.extend(parse_adb_devices(&String::from_utf8_lossy(&output.stdout)));
            }
            Ok(output) => {
                log.log(&format!("WARNING: adb devices exited with {}", output.status));
            }
            Err(err) => {
                log.log(&format!("WARNING: failed to run {}: {}", adb.display(), err));
            }
        },
        None => log.log(
            "WARNING: adb was not found on PATH nor was ANDROID_HOME set; \
             Android devices will not be added to settings",
        ),
    }

    devices.push(offline_compiler_device());
    devices
}

fn find_adb() -> Option<std::path::PathBuf> {
    if let Ok(path) = which::which("adb") {
        return Some(path);
    }
    let home = std::env::var_os("ANDROID_HOME")?;
    let candidate = std::path::PathBuf::from(home)
        .join("platform-tools")
        .join(if cfg!(windows) { "adb.exe" } else { "adb" });
    candidate.is_file().then_some(candidate)
}

/// Parse the output of `adb devices -l` into Android devices.
///
/// Only entries in the `device` state are returned; unauthorized or offline
/// devices are skipped.
pub fn parse_adb_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            if fields.next()? != "device" {
                return None;
            }
            let model =
                fields.find_map(|f| f.strip_prefix("model:")).map(|m| m.to_string());
            let name = match &model {
                Some(model) => format!("{}_{}", model, serial),
                None => serial.to_string(),
            };
            Some(Device::new(
                name,
                DeviceKind::Android { serial: serial.to_string(), model },
            ))
        })
        .collect()
}

/// Resolve `active_device_names` against `device_list`, preserving order.
pub fn active_devices(settings: &Settings) -> Result<Vec<&Device>, SettingsError> {
    settings
        .active_device_names
        .iter()
        .map(|name| {
            settings
                .device_list
                .iter()
                .find(|d| &d.name == name)
                .ok_or_else(|| SettingsError::UnknownDevice(name.clone()))
        })
        .collect()
}
