use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use gfauto_core::binaries::{self, BinaryManager};
use gfauto_core::settings::{self, Settings, SettingsError};

/// Options shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub settings_path: PathBuf,
    pub cache_dir: Option<PathBuf>,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self { settings_path: PathBuf::from(settings::DEFAULT_SETTINGS_FILE_NAME), cache_dir: None }
    }
}

impl GlobalOptions {
    /// `--cache-dir`, else `GFAUTO_BINARY_CACHE`, else the platform cache directory.
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(binaries::default_cache_root)
    }
}

/// Load an existing settings file; a missing file is an error here.
pub fn load_settings(path: &Path) -> Result<Settings> {
    match settings::read(path) {
        Ok(settings) => Ok(settings),
        Err(SettingsError::NotFound(_)) => Err(anyhow!(
            "Settings file not found: {} (run `gfauto init-settings` to create one)",
            path.display()
        )),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to load settings from {}", path.display()))
        }
    }
}

/// Root binary manager for an existing settings file.
pub fn load_binary_manager(options: &GlobalOptions) -> Result<BinaryManager> {
    let settings = load_settings(&options.settings_path)?;
    Ok(binaries::get_binary_manager_with_cache(&settings, options.cache_root()))
}
