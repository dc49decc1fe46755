//! Built-in binary table and release archive recipes.
//!
//! Every default binary is published as part of a `gfbuild-<project>` GitHub
//! release. The archive for a binary depends on its project, version,
//! platform and build config (taken from the binary's tags).

use std::path::PathBuf;

use serde::Deserialize;

use crate::binaries::cache::CacheKey;
use crate::binaries::{BinaryError, BinaryReference, BinaryResult};
use crate::platform::Platform;

pub const GLSLANG_VALIDATOR_NAME: &str = "glslangValidator";
pub const SPIRV_OPT_NAME: &str = "spirv-opt";
pub const SPIRV_VAL_NAME: &str = "spirv-val";
pub const SPIRV_DIS_NAME: &str = "spirv-dis";
pub const SWIFT_SHADER_NAME: &str = "swift_shader_icd";
pub const AMBER_NAME: &str = "amber";
pub const GRAPHICSFUZZ_TOOL_NAME: &str = "graphicsfuzz-tool";

pub const CONFIGS: [&str; 3] = ["Release", "Debug", "RelWithDebInfo"];

pub const DEFAULT_SPIRV_TOOLS_VERSION: &str = "983b5b4fccea17cab053de24d51403efb4829158";
const DEFAULT_AMBER_VERSION: &str = "f231728f60cb3b0f21d7423aed24fd3b317f38c9";

/// The default binary table used when settings do not pin versions.
pub fn default_binaries() -> Vec<BinaryReference> {
    let debug =
        |name: &str, version: &str| BinaryReference::new(name, version).with_tags(["Debug"]);
    vec![
        debug(GLSLANG_VALIDATOR_NAME, "1afa2b8cc57b92c6b769eb44a6854510b6921a0b"),
        debug(SPIRV_OPT_NAME, DEFAULT_SPIRV_TOOLS_VERSION),
        debug(SPIRV_DIS_NAME, DEFAULT_SPIRV_TOOLS_VERSION),
        debug("spirv-as", DEFAULT_SPIRV_TOOLS_VERSION),
        debug(SPIRV_VAL_NAME, DEFAULT_SPIRV_TOOLS_VERSION),
        debug("spirv-fuzz", DEFAULT_SPIRV_TOOLS_VERSION),
        debug("spirv-reduce", DEFAULT_SPIRV_TOOLS_VERSION),
        debug(SWIFT_SHADER_NAME, "cf79a622ec5c993fa48f8557c28e23b8407d1efd"),
        debug(AMBER_NAME, DEFAULT_AMBER_VERSION),
        debug("amber_apk", DEFAULT_AMBER_VERSION),
        debug("amber_apk_test", DEFAULT_AMBER_VERSION),
        BinaryReference::new(GRAPHICSFUZZ_TOOL_NAME, "7b143bcb3ad38b64ddc17d132886636b229b6684"),
        debug("amdllpc", "c21d76dceaf26361f9b6b3838a955ec3301506b5"),
    ]
}

/// Map a binary name to the project whose releases contain it.
pub fn project_name(binary_name: &str) -> BinaryResult<&'static str> {
    let project = match binary_name {
        "glslangValidator" => "glslang",
        "spirv-opt" | "spirv-as" | "spirv-dis" | "spirv-val" | "spirv-fuzz" | "spirv-reduce" => {
            "SPIRV-Tools"
        }
        "swift_shader_icd" => "swiftshader",
        "amber" | "amber_apk" | "amber_apk_test" => "amber",
        "graphicsfuzz-tool" => "graphicsfuzz",
        "amdllpc" => "llpc",
        other => {
            return Err(BinaryError::NoRecipe {
                name: other.to_string(),
                reason: "not published by any gfbuild- project".to_string(),
            })
        }
    };
    Ok(project)
}

/// Platform named in the binary's tags, or `default` if none is.
pub fn platform_of(binary: &BinaryReference, default: Platform) -> BinaryResult<Platform> {
    let platforms: Vec<Platform> =
        binary.tags.iter().filter_map(|t| Platform::from_tag(t)).collect();
    match platforms.as_slice() {
        [] => Ok(default),
        [platform] => Ok(*platform),
        _ => Err(BinaryError::NoRecipe {
            name: binary.name.clone(),
            reason: format!("more than one platform tag in {:?}", binary.tags),
        }),
    }
}

/// Build config (`Release`, `Debug`, `RelWithDebInfo`) from the binary's tags.
pub fn config_of(binary: &BinaryReference) -> BinaryResult<&'static str> {
    let configs: Vec<&'static str> =
        CONFIGS.into_iter().filter(|c| binary.tags.contains(*c)).collect();
    match configs.as_slice() {
        [config] => Ok(*config),
        [] => Err(BinaryError::NoRecipe {
            name: binary.name.clone(),
            reason: format!("no build config in tags {:?}", binary.tags),
        }),
        _ => Err(BinaryError::NoRecipe {
            name: binary.name.clone(),
            reason: format!("more than one build config in tags {:?}", binary.tags),
        }),
    }
}

/// Where to download a binary from and where it lives inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    /// `gfbuild-` project publishing the archive.
    pub project: String,
    pub version: String,
    /// Release asset name without the `.zip` extension. Encodes platform and
    /// build config where the archive depends on them.
    pub artifact: String,
    pub url: String,
    /// File name to save the download as.
    pub file_name: String,
    /// Directory (relative to the cache entry) the archive is extracted into.
    pub output_directory: String,
    /// Path of the binary relative to the cache entry.
    pub inner_path: PathBuf,
    /// Whether the binary should be marked executable after extraction.
    pub executable: bool,
}

impl ArchiveSpec {
    /// Cache entry holding this archive. Every binary shipped in the same
    /// archive shares the entry.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.project, &self.version, &self.artifact)
    }
}

/// Release archive for `binary` on `platform`.
pub fn github_release_archive(
    binary: &BinaryReference,
    platform: Platform,
) -> BinaryResult<ArchiveSpec> {
    let project = project_name(&binary.name)?;
    let version = &binary.version;
    let repo_name = format!("gfbuild-{project}");

    let artifact_name = match (project, binary.name.as_str()) {
        // Platform independent artifacts.
        ("graphicsfuzz", _) => format!("gfbuild-{project}-{version}"),
        ("amber", "amber_apk" | "amber_apk_test") => {
            format!("gfbuild-{project}-{version}-android_apk")
        }
        _ => {
            let config = config_of(binary)?;
            format!("gfbuild-{project}-{version}-{platform}_x64_{config}")
        }
    };

    let exe = platform.executable_suffix();
    let (inner, executable) = match binary.name.as_str() {
        "glslangValidator" => (format!("bin/glslangValidator{exe}"), true),
        "spirv-opt" | "spirv-as" | "spirv-dis" | "spirv-val" | "spirv-fuzz" | "spirv-reduce" => {
            (format!("bin/{}{exe}", binary.name), true)
        }
        "swift_shader_icd" => ("lib/vk_swiftshader_icd.json".to_string(), false),
        "amber" => (format!("bin/amber{exe}"), true),
        "amber_apk" => ("amber.apk".to_string(), false),
        "amber_apk_test" => ("amber-test.apk".to_string(), false),
        "graphicsfuzz-tool" => ("python/drivers/graphicsfuzz-tool".to_string(), true),
        "amdllpc" => {
            if platform != Platform::Linux {
                return Err(BinaryError::NoRecipe {
                    name: binary.name.clone(),
                    reason: "amdllpc is only available on Linux".to_string(),
                });
            }
            (format!("bin/amdllpc{exe}"), true)
        }
        other => {
            return Err(BinaryError::NoRecipe {
                name: other.to_string(),
                reason: "unknown archive layout".to_string(),
            })
        }
    };

    let repo_url = format!("https://github.com/google/{repo_name}");
    let release_url = format!("{repo_url}/releases/download/github/google/{repo_name}/{version}");
    Ok(ArchiveSpec {
        project: project.to_string(),
        version: version.clone(),
        url: format!("{release_url}/{artifact_name}.zip"),
        artifact: artifact_name,
        file_name: format!("{project}.zip"),
        output_directory: project.to_string(),
        inner_path: PathBuf::from(project).join(inner),
        executable,
    })
}

/// A GitHub release as returned by the releases API (only the fields used).
#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<serde_json::Value>,
}

/// Number of assets a complete release of each project has. Releases with a
/// different count are still being uploaded (or broken) and are skipped.
pub fn expected_asset_count(project: &str) -> Option<usize> {
    match project {
        "amber" => Some(19),
        "glslang" | "SPIRV-Tools" | "swiftshader" => Some(15),
        "graphicsfuzz" => Some(5),
        "llpc" => Some(7),
        _ => None,
    }
}

/// Pick the newest complete release's version from a list of releases
/// (newest first, as the API returns them).
pub fn version_from_releases(project: &str, releases: &[GithubRelease]) -> BinaryResult<String> {
    let no_version = |reason: String| BinaryError::NoRecipe { name: project.to_string(), reason };
    let expected = expected_asset_count(project)
        .ok_or_else(|| no_version("unknown project".to_string()))?;

    for release in releases {
        if release.assets.len() != expected {
            tracing::info!(
                project,
                assets = release.assets.len(),
                expected,
                "Skipping incomplete release"
            );
            continue;
        }
        let (_, version) = release
            .tag_name
            .rsplit_once('/')
            .ok_or_else(|| no_version(format!("unexpected tag name {}", release.tag_name)))?;
        return Ok(version.to_string());
    }
    Err(no_version(format!("no release with {expected} assets")))
}

/// Query GitHub for the newest version of each default binary's project.
pub fn latest_versions() -> BinaryResult<Vec<BinaryReference>> {
    let mut binaries = default_binaries();
    let mut versions: std::collections::BTreeMap<&'static str, String> = Default::default();
    for binary in &mut binaries {
        let project = project_name(&binary.name)?;
        if !versions.contains_key(project) {
            let url = format!("https://api.github.com/repos/google/gfbuild-{project}/releases");
            tracing::info!(%url, "Checking latest release");
            let releases: Vec<GithubRelease> = ureq::get(url.as_str())
                .header("User-Agent", "gfauto")
                .call()
                .and_then(|mut response| response.body_mut().read_json())
                .map_err(|e| BinaryError::Download { url: url.clone(), message: e.to_string() })?;
            versions.insert(project, version_from_releases(project, &releases)?);
        }
        if let Some(version) = versions.get(project) {
            binary.version = version.clone();
        }
    }
    Ok(binaries)
}
