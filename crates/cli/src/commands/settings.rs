use anyhow::{anyhow, Context, Result};
use gfauto_core::settings;

use crate::absolute_from_current;
use crate::commands::GlobalOptions;

/// Probe the host and write a default settings file.
pub fn init_settings_command(options: &GlobalOptions, force: bool) -> Result<()> {
    let path = absolute_from_current(&options.settings_path)?;
    if path.exists() && !force {
        return Err(anyhow!(
            "Settings file already exists: {} (pass --force to overwrite)",
            path.display()
        ));
    }

    let written = settings::write_default(&path)
        .with_context(|| format!("Failed to write default settings to {}", path.display()))?;

    println!("Wrote settings:");
    println!("  Path: {}", path.display());
    println!("  Devices: {}", written.device_list.len());
    for device in &written.device_list {
        let active = written.active_device_names.contains(&device.name);
        println!("    - {}{}", device.name, if active { "" } else { " (inactive)" });
    }
    Ok(())
}
