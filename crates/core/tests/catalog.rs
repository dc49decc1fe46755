use std::path::Path;

use gfauto_core::binaries::catalog::{
    config_of, default_binaries, github_release_archive, platform_of, project_name,
    version_from_releases, GithubRelease,
};
use gfauto_core::binaries::BinaryReference;
use gfauto_core::platform::Platform;

fn release(tag: &str, assets: usize) -> GithubRelease {
    GithubRelease { tag_name: tag.to_string(), assets: vec![serde_json::Value::Null; assets] }
}

#[test]
fn default_table_has_unique_names_with_known_projects() {
    let binaries = default_binaries();
    let mut names: Vec<&str> = binaries.iter().map(|b| b.name.as_str()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), binaries.len());
    for binary in &binaries {
        project_name(&binary.name).expect("every default binary has a project");
    }
}

#[test]
fn windows_archive_uses_exe_suffix_and_config() {
    let binary = BinaryReference::new("glslangValidator", "v1").with_tags(["Release"]);
    let archive = github_release_archive(&binary, Platform::Windows).unwrap();
    assert_eq!(
        archive.url,
        "https://github.com/google/gfbuild-glslang/releases/download/github/google/\
         gfbuild-glslang/v1/gfbuild-glslang-v1-Windows_x64_Release.zip"
    );
    assert_eq!(archive.artifact, "gfbuild-glslang-v1-Windows_x64_Release");
    assert_eq!(archive.inner_path, Path::new("glslang/bin/glslangValidator.exe"));
    assert!(archive.executable);
}

#[test]
fn graphicsfuzz_archive_is_platform_independent() {
    let binary = BinaryReference::new("graphicsfuzz-tool", "g1");
    let linux = github_release_archive(&binary, Platform::Linux).unwrap();
    let mac = github_release_archive(&binary, Platform::Mac).unwrap();
    assert_eq!(linux.url, mac.url);
    assert!(linux.url.ends_with("/g1/gfbuild-graphicsfuzz-g1.zip"));
    assert_eq!(linux.inner_path, Path::new("graphicsfuzz/python/drivers/graphicsfuzz-tool"));
}

#[test]
fn swiftshader_icd_is_not_marked_executable() {
    let binary = BinaryReference::new("swift_shader_icd", "s1").with_tags(["Debug"]);
    let archive = github_release_archive(&binary, Platform::Linux).unwrap();
    assert!(!archive.executable);
    assert_eq!(archive.inner_path, Path::new("swiftshader/lib/vk_swiftshader_icd.json"));
}

#[test]
fn amdllpc_is_linux_only() {
    let binary = BinaryReference::new("amdllpc", "l1").with_tags(["Debug"]);
    assert!(github_release_archive(&binary, Platform::Linux).is_ok());
    let err = github_release_archive(&binary, Platform::Mac).unwrap_err();
    assert_eq!(err.kind(), "no_recipe");
}

#[test]
fn unknown_binary_has_no_project() {
    assert_eq!(project_name("mystery").unwrap_err().kind(), "no_recipe");
}

#[test]
fn platform_tag_overrides_host_platform() {
    let tagged = BinaryReference::new("spirv-opt", "v").with_tags(["Debug", "Mac"]);
    assert_eq!(platform_of(&tagged, Platform::Linux).unwrap(), Platform::Mac);
    let untagged = BinaryReference::new("spirv-opt", "v").with_tags(["Debug"]);
    assert_eq!(platform_of(&untagged, Platform::Windows).unwrap(), Platform::Windows);
    let ambiguous = BinaryReference::new("spirv-opt", "v").with_tags(["Mac", "Linux"]);
    assert!(platform_of(&ambiguous, Platform::Linux).is_err());
}

#[test]
fn exactly_one_config_tag_is_required() {
    let both = BinaryReference::new("spirv-opt", "v").with_tags(["Debug", "Release"]);
    assert!(config_of(&both).is_err());
    let one = BinaryReference::new("spirv-opt", "v").with_tags(["RelWithDebInfo"]);
    assert_eq!(config_of(&one).unwrap(), "RelWithDebInfo");
}

#[test]
fn latest_version_skips_incomplete_releases() {
    let releases = vec![
        release("github/google/gfbuild-graphicsfuzz/newest", 2),
        release("github/google/gfbuild-graphicsfuzz/complete", 5),
        release("github/google/gfbuild-graphicsfuzz/older", 5),
    ];
    assert_eq!(version_from_releases("graphicsfuzz", &releases).unwrap(), "complete");
}

#[test]
fn latest_version_fails_without_complete_release() {
    let releases = vec![release("github/google/gfbuild-llpc/x", 3)];
    assert!(version_from_releases("llpc", &releases).is_err());
    assert!(version_from_releases("unknown-project", &[]).is_err());
}
