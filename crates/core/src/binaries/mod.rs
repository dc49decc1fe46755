//! Binary manager.
//!
//! Code never hard-codes tool paths; it asks a [`BinaryManager`] for a binary
//! by symbolic name (`spirv-opt`, `graphicsfuzz-tool`, ...). The manager finds
//! the [`BinaryReference`] for that name by consulting an ordered list of
//! [`BinarySource`]s:
//!
//! 1. overrides from settings,
//! 2. binaries declared by the current job (for example a test's metadata),
//! 3. the default table.
//!
//! The first source that knows the name wins; fields are never merged across
//! sources. The reference is then resolved to a local path, downloading and
//! extracting the release archive into the on-disk cache if needed.
//!
//! Child managers ([`BinaryManager::get_child_binary_manager`]) are scoped to a
//! subset of names and share the parent's [`BinaryStore`], so anything the
//! parent already fetched is reused.

pub mod cache;
pub mod catalog;
pub mod fetch;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;
use crate::settings::Settings;

pub use cache::{BinaryCache, CacheKey};
pub use fetch::{ArchiveFetcher, HttpFetcher};

/// Environment variable overriding the default binary cache directory.
pub const BINARY_CACHE_ENV: &str = "GFAUTO_BINARY_CACHE";

/// Error type for binary lookup and resolution.
#[derive(Debug, Error)]
pub enum BinaryError {
    /// The name is not resolvable in this manager's scope.
    #[error("Could not find binary named '{0}' in this binary manager's scope")]
    NotFound(String),

    #[error("Binary '{0}' is not registered in the parent binary manager")]
    NotInParentScope(String),

    #[error(
        "Binary '{name}' is overridden at version {override_version} \
         but the job declares version {job_version}"
    )]
    ConflictingVersions { name: String, override_version: String, job_version: String },

    #[error("No download recipe for binary '{name}': {reason}")]
    NoRecipe { name: String, reason: String },

    #[error("Binary path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("Failed to extract {archive}: {message}")]
    Extract { archive: PathBuf, message: String },

    #[error("Checksum mismatch for {path}: expected {expected}, found {actual}")]
    ChecksumMismatch { path: PathBuf, expected: String, actual: String },

    /// The entry at `path` holds a different archive than the one requested.
    #[error("Cache entry {path} was built from {cached_url}, not {requested_url}")]
    StaleEntry { path: PathBuf, cached_url: String, requested_url: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BinaryError {
    pub fn kind(&self) -> &'static str {
        match self {
            BinaryError::NotFound(_) => "binary_not_found",
            BinaryError::NotInParentScope(_) => "not_in_parent_scope",
            BinaryError::ConflictingVersions { .. } => "conflicting_versions",
            BinaryError::NoRecipe { .. } => "no_recipe",
            BinaryError::PathNotFound(_) => "path_not_found",
            BinaryError::Download { .. } => "download",
            BinaryError::Extract { .. } => "extract",
            BinaryError::ChecksumMismatch { .. } => "checksum_mismatch",
            BinaryError::StaleEntry { .. } => "stale_entry",
            BinaryError::Io { .. } => "io",
        }
    }

    /// Configuration errors are caller mistakes; everything else is a failure
    /// to resolve one particular binary.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BinaryError::NotFound(_)
                | BinaryError::NotInParentScope(_)
                | BinaryError::ConflictingVersions { .. }
        )
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        BinaryError::Io { path: path.to_path_buf(), source }
    }
}

pub type BinaryResult<T> = Result<T, BinaryError>;

/// Identifies one resolvable executable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BinaryReference {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Local executable to use as-is instead of downloading (e.g. a custom build).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl BinaryReference {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), tags: BTreeSet::new(), path: None }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A binary reference resolved to a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    pub path: PathBuf,
    pub binary: BinaryReference,
}

impl ResolvedBinary {
    pub fn version(&self) -> &str {
        &self.binary.version
    }
}

/// Priority class of a [`BinarySource`]; lower sorts first and wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourcePriority {
    Override,
    Job,
    Default,
}

/// A pure mapping from binary name to reference.
#[derive(Debug, Clone)]
pub struct BinarySource {
    pub priority: SourcePriority,
    entries: BTreeMap<String, BinaryReference>,
}

impl BinarySource {
    /// Build a source; if a name appears more than once, the last one wins.
    pub fn new(
        priority: SourcePriority,
        binaries: impl IntoIterator<Item = BinaryReference>,
    ) -> Self {
        let entries = binaries.into_iter().map(|b| (b.name.clone(), b)).collect();
        Self { priority, entries }
    }

    pub fn get(&self, name: &str) -> Option<&BinaryReference> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

/// Key of the per-process resolution map: the whole reference (tags included)
/// plus the platform it was resolved for.
type ResolvedKey = (BinaryReference, Platform);

/// Shared state behind a manager and all of its children: the on-disk cache,
/// the fetcher, and the per-process map of resolved paths.
pub struct BinaryStore {
    cache: BinaryCache,
    fetcher: Arc<dyn ArchiveFetcher>,
    resolved: Mutex<HashMap<ResolvedKey, PathBuf>>,
}

impl BinaryStore {
    pub fn new(cache_root: impl Into<PathBuf>, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        Self { cache: BinaryCache::new(cache_root), fetcher, resolved: Mutex::new(HashMap::new()) }
    }

    pub fn cache(&self) -> &BinaryCache {
        &self.cache
    }

    fn resolve(&self, binary: &BinaryReference, platform: Platform) -> BinaryResult<PathBuf> {
        let key = (binary.clone(), platform);
        if let Some(path) = self.lock_resolved().get(&key) {
            return Ok(path.clone());
        }

        tracing::info!(
            name = %binary.name,
            version = %binary.version,
            %platform,
            "Finding path of binary"
        );
        let archive = catalog::github_release_archive(binary, platform)?;
        let entry_dir = self.cache.ensure(&archive, self.fetcher.as_ref())?;
        let path = entry_dir.join(&archive.inner_path);
        if !path.exists() {
            return Err(BinaryError::PathNotFound(path));
        }
        // The entry may have been built for another binary in the same archive.
        if archive.executable {
            fetch::mark_executable(&path)?;
        }

        // Another thread may have raced us here; keep whichever landed first
        // so every caller in this process sees the same path.
        let mut resolved = self.lock_resolved();
        Ok(resolved.entry(key).or_insert(path).clone())
    }

    fn lock_resolved(&self) -> std::sync::MutexGuard<'_, HashMap<ResolvedKey, PathBuf>> {
        self.resolved.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Resolves symbolic binary names to local executables.
#[derive(Clone)]
pub struct BinaryManager {
    sources: Vec<BinarySource>,
    /// `None` means every name known to `sources` is resolvable.
    scope: Option<BTreeSet<String>>,
    platform: Platform,
    store: Arc<BinaryStore>,
}

impl std::fmt::Debug for BinaryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryManager")
            .field("sources", &self.sources)
            .field("scope", &self.scope)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl BinaryManager {
    pub fn new(
        mut sources: Vec<BinarySource>,
        platform: Platform,
        store: Arc<BinaryStore>,
    ) -> Self {
        sources.sort_by_key(|s| s.priority);
        Self { sources, scope: None, platform, store }
    }

    /// Root manager for `settings`: overrides from settings, then the default
    /// table (`latest_binary_versions` when non-empty, else the built-in one).
    pub fn from_settings(settings: &Settings, store: Arc<BinaryStore>) -> Self {
        let defaults = if settings.latest_binary_versions.is_empty() {
            catalog::default_binaries()
        } else {
            settings.latest_binary_versions.clone()
        };
        Self::new(
            vec![
                BinarySource::new(SourcePriority::Override, settings.binary_overrides.clone()),
                BinarySource::new(SourcePriority::Default, defaults),
            ],
            Platform::current(),
            store,
        )
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn store(&self) -> &Arc<BinaryStore> {
        &self.store
    }

    fn in_scope(&self, name: &str) -> bool {
        self.scope.as_ref().map_or(true, |scope| scope.contains(name))
    }

    /// The reference that `name` resolves to in this scope.
    pub fn get_binary_by_name(&self, name: &str) -> BinaryResult<BinaryReference> {
        if !self.in_scope(name) {
            return Err(BinaryError::NotFound(name.to_string()));
        }
        self.sources
            .iter()
            .find_map(|source| source.get(name))
            .cloned()
            .ok_or_else(|| BinaryError::NotFound(name.to_string()))
    }

    /// Resolve `name` to a local path, fetching it into the cache if needed.
    pub fn get_binary_path_by_name(&self, name: &str) -> BinaryResult<ResolvedBinary> {
        let binary = self.get_binary_by_name(name)?;
        let path = self.get_binary_path(&binary)?;
        Ok(ResolvedBinary { path, binary })
    }

    /// Resolve a specific reference to a local path.
    pub fn get_binary_path(&self, binary: &BinaryReference) -> BinaryResult<PathBuf> {
        if let Some(path) = &binary.path {
            if !path.exists() {
                return Err(BinaryError::PathNotFound(path.clone()));
            }
            return Ok(path.clone());
        }
        let platform = catalog::platform_of(binary, self.platform)?;
        self.store.resolve(binary, platform)
    }

    /// Sorted names resolvable in this scope.
    pub fn names(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self.sources.iter().flat_map(|s| s.names()).collect();
        all.into_iter().filter(|n| self.in_scope(n)).cloned().collect()
    }

    /// The effective reference for every resolvable name, sorted by name.
    pub fn binaries(&self) -> Vec<BinaryReference> {
        self.names().iter().filter_map(|n| self.get_binary_by_name(n).ok()).collect()
    }

    /// A manager whose resolvable names are exactly those in `binary_list`.
    ///
    /// The listed references become job-declared binaries, taking priority
    /// over defaults but not over settings overrides. Every name must already
    /// be resolvable in `self`; a job that needs a binary this manager does
    /// not know about must not silently run with something else.
    pub fn get_child_binary_manager(
        &self,
        binary_list: &[BinaryReference],
    ) -> BinaryResult<BinaryManager> {
        for binary in binary_list {
            if self.get_binary_by_name(&binary.name).is_err() {
                return Err(BinaryError::NotInParentScope(binary.name.clone()));
            }
            let overridden = self
                .sources
                .iter()
                .filter(|s| s.priority == SourcePriority::Override)
                .find_map(|s| s.get(&binary.name));
            if let Some(overridden) = overridden {
                if overridden.version != binary.version {
                    return Err(BinaryError::ConflictingVersions {
                        name: binary.name.clone(),
                        override_version: overridden.version.clone(),
                        job_version: binary.version.clone(),
                    });
                }
            }
        }

        let mut sources: Vec<BinarySource> = self
            .sources
            .iter()
            .filter(|s| s.priority == SourcePriority::Override)
            .cloned()
            .collect();
        sources.push(BinarySource::new(SourcePriority::Job, binary_list.iter().cloned()));
        sources.extend(
            self.sources.iter().filter(|s| s.priority != SourcePriority::Override).cloned(),
        );

        Ok(BinaryManager {
            sources,
            scope: Some(binary_list.iter().map(|b| b.name.clone()).collect()),
            platform: self.platform,
            store: Arc::clone(&self.store),
        })
    }
}

/// Default cache directory: `$GFAUTO_BINARY_CACHE`, else the platform cache
/// directory, else `./binaries`.
pub fn default_cache_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(BINARY_CACHE_ENV) {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("gfauto").join("binaries"))
        .unwrap_or_else(|| PathBuf::from("binaries"))
}

/// Root-scope manager for `settings` using the default cache and HTTP fetcher.
pub fn get_default_binary_manager(settings: &Settings) -> BinaryManager {
    get_binary_manager_with_cache(settings, default_cache_root())
}

/// Root-scope manager for `settings` with an explicit cache directory.
pub fn get_binary_manager_with_cache(settings: &Settings, cache_root: PathBuf) -> BinaryManager {
    let store = Arc::new(BinaryStore::new(cache_root, Arc::new(HttpFetcher)));
    BinaryManager::from_settings(settings, store)
}

/// Binaries declared by a test's metadata file (`test.json`): the device's
/// binaries first, then the test's own.
pub fn binaries_from_test_metadata(test_json: &Path) -> anyhow::Result<Vec<BinaryReference>> {
    use anyhow::Context;

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct DeviceBinaries {
        binaries: Vec<BinaryReference>,
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct TestMetadata {
        device: Option<DeviceBinaries>,
        binaries: Vec<BinaryReference>,
    }

    let text = std::fs::read_to_string(test_json)
        .with_context(|| format!("Failed to read test metadata at {}", test_json.display()))?;
    let metadata: TestMetadata =
        serde_json::from_str(&text).context("Failed to parse test metadata JSON")?;

    let mut result = metadata.device.map(|d| d.binaries).unwrap_or_default();
    result.extend(metadata.binaries);
    Ok(result)
}
