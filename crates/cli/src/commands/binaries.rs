use std::collections::BTreeSet;

use anyhow::{Context, Result};
use gfauto_core::binaries::{catalog, BinaryReference};
use gfauto_core::settings;

use crate::commands::{load_binary_manager, load_settings, GlobalOptions};

/// List every binary the root manager can resolve, without fetching anything.
pub fn list_binaries_command(options: &GlobalOptions, json: bool) -> Result<()> {
    let manager = load_binary_manager(options)?;
    let binaries = manager.binaries();

    if json {
        let serialized = serde_json::to_string_pretty(&binaries)
            .context("Failed to serialize binaries to JSON")?;
        println!("{}", serialized);
        return Ok(());
    }

    println!("Binaries ({}):", binaries.len());
    if binaries.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for binary in binaries {
        println!("  - {}", describe_binary(&binary));
    }
    Ok(())
}

/// One-line human-readable summary of a binary reference.
pub fn describe_binary(binary: &BinaryReference) -> String {
    let tags = if binary.tags.is_empty() {
        "-".to_string()
    } else {
        binary.tags.iter().cloned().collect::<Vec<_>>().join(",")
    };
    match &binary.path {
        Some(path) => {
            format!("{} {} [tags: {}] path={}", binary.name, binary.version, tags, path.display())
        }
        None => format!("{} {} [tags: {}]", binary.name, binary.version, tags),
    }
}

/// Query GitHub for the newest release of each default binary and store the
/// result in `latest_binary_versions`.
pub fn update_binary_versions_command(options: &GlobalOptions) -> Result<()> {
    let mut settings = load_settings(&options.settings_path)?;
    let latest = catalog::latest_versions().context("Failed to look up latest binary versions")?;

    let before: BTreeSet<BinaryReference> =
        settings.latest_binary_versions.iter().cloned().collect();
    let changed = latest.iter().filter(|b| !before.contains(*b)).count();
    settings.latest_binary_versions = latest;

    let path = settings::write(&options.settings_path, &settings)
        .with_context(|| format!("Failed to write {}", options.settings_path.display()))?;
    println!("Updated {} binary versions in {}", changed, path.display());
    Ok(())
}
