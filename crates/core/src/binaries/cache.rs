//! On-disk binary cache.
//!
//! Layout: `<root>/<project>/<version>/<artifact>/` holds one extracted release
//! archive plus an `entry.json` manifest recording the archive URL and the
//! SHA-256 of every extracted file. The artifact name encodes platform and
//! build config, and all binaries shipped in one archive share its entry.
//! Entries are built in a staging directory next to their final location and
//! renamed into place, so a reader either sees a complete entry or none at
//! all. An exclusive lock on `<root>/<project>/<version>/<artifact>.lock`
//! serializes fetches of the same archive across threads and processes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::binaries::catalog::ArchiveSpec;
use crate::binaries::fetch::{extract_zip, mark_executable, ArchiveFetcher};
use crate::binaries::{BinaryError, BinaryResult};

pub const ENTRY_MANIFEST_FILE: &str = "entry.json";

/// Identity of one cache entry: a single release archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub project: String,
    pub version: String,
    pub artifact: String,
}

impl CacheKey {
    pub fn new(project: &str, version: &str, artifact: &str) -> Self {
        Self {
            project: project.to_string(),
            version: version.to_string(),
            artifact: artifact.to_string(),
        }
    }
}

/// Contents of `entry.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryManifest {
    pub project: String,
    pub version: String,
    pub artifact: String,
    pub archive_url: String,
    pub archive_sha256: String,
    /// Extracted file (relative path, `/`-separated) to SHA-256.
    pub files: BTreeMap<String, String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct BinaryCache {
    root: PathBuf,
}

impl BinaryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.project).join(&key.version).join(&key.artifact)
    }

    pub fn lock_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.project).join(&key.version).join(format!("{}.lock", key.artifact))
    }

    /// Path of a complete, valid entry for `archive`, if there is one.
    pub fn lookup(&self, archive: &ArchiveSpec) -> Option<PathBuf> {
        let dir = self.entry_dir(&archive.cache_key());
        verify_entry_for(&dir, archive).ok().map(|_| dir)
    }

    /// Return the entry directory for `archive`, fetching and extracting it
    /// first if no valid entry exists.
    ///
    /// An entry that fails verification, or that was built from a different
    /// URL, is discarded and rebuilt.
    pub fn ensure(
        &self,
        archive: &ArchiveSpec,
        fetcher: &dyn ArchiveFetcher,
    ) -> BinaryResult<PathBuf> {
        if let Some(dir) = self.lookup(archive) {
            return Ok(dir);
        }

        let key = archive.cache_key();
        let lock_path = self.lock_path(&key);
        let parent = lock_path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| BinaryError::io(&parent, e))?;
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| BinaryError::io(&lock_path, e))?;
        lock_file.lock_exclusive().map_err(|e| BinaryError::io(&lock_path, e))?;

        let result = self.build_entry(&key, archive, fetcher, &parent);

        if let Err(err) = FileExt::unlock(&lock_file) {
            tracing::warn!(
                path = %lock_path.display(),
                error = %err,
                "Failed to release cache lock"
            );
        }
        result
    }

    /// Must be called with the key's lock held.
    fn build_entry(
        &self,
        key: &CacheKey,
        archive: &ArchiveSpec,
        fetcher: &dyn ArchiveFetcher,
        parent: &Path,
    ) -> BinaryResult<PathBuf> {
        let dir = self.entry_dir(key);
        // Someone else may have finished while we waited for the lock.
        match verify_entry_for(&dir, archive) {
            Ok(()) => return Ok(dir),
            Err(err) if dir.exists() => {
                tracing::warn!(
                    path = %dir.display(),
                    error = %err,
                    "Discarding invalid cache entry"
                );
                fs::remove_dir_all(&dir).map_err(|e| BinaryError::io(&dir, e))?;
            }
            Err(_) => {}
        }

        let staging = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempdir_in(parent)
            .map_err(|e| BinaryError::io(parent, e))?;
        let download = staging.path().join(&archive.file_name);
        fetcher.fetch(&archive.url, &download)?;
        let archive_sha256 = hash_file(&download)?;

        let staged_entry = staging.path().join("entry");
        extract_zip(&download, &staged_entry.join(&archive.output_directory))?;

        let staged_binary = staged_entry.join(&archive.inner_path);
        if !staged_binary.exists() {
            return Err(BinaryError::Extract {
                archive: download,
                message: format!("archive does not contain {}", archive.inner_path.display()),
            });
        }
        if archive.executable {
            mark_executable(&staged_binary)?;
        }

        let manifest = EntryManifest {
            project: key.project.clone(),
            version: key.version.clone(),
            artifact: key.artifact.clone(),
            archive_url: archive.url.clone(),
            archive_sha256,
            files: hash_tree(&staged_entry)?,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let manifest_path = staged_entry.join(ENTRY_MANIFEST_FILE);
        let text = serde_json::to_string_pretty(&manifest).map_err(|e| BinaryError::Extract {
            archive: download.clone(),
            message: e.to_string(),
        })?;
        fs::write(&manifest_path, text).map_err(|e| BinaryError::io(&manifest_path, e))?;

        if let Err(err) = fs::rename(&staged_entry, &dir) {
            if verify_entry_for(&dir, archive).is_err() {
                return Err(BinaryError::io(&dir, err));
            }
        }
        verify_entry_for(&dir, archive)?;
        tracing::info!(
            project = %key.project,
            version = %key.version,
            artifact = %key.artifact,
            path = %dir.display(),
            "Cached release archive"
        );
        Ok(dir)
    }
}

/// Check that `dir` is a complete entry whose files match its manifest.
pub fn verify_entry(dir: &Path) -> BinaryResult<EntryManifest> {
    let manifest_path = dir.join(ENTRY_MANIFEST_FILE);
    let text =
        fs::read_to_string(&manifest_path).map_err(|e| BinaryError::io(&manifest_path, e))?;
    let manifest: EntryManifest =
        serde_json::from_str(&text).map_err(|e| BinaryError::Extract {
            archive: manifest_path.clone(),
            message: format!("unreadable cache manifest: {e}"),
        })?;

    for (relative, expected) in &manifest.files {
        let path = dir.join(relative);
        let actual = hash_file(&path)?;
        if &actual != expected {
            return Err(BinaryError::ChecksumMismatch { path, expected: expected.clone(), actual });
        }
    }
    Ok(manifest)
}

/// [`verify_entry`], and the entry must have been built from `archive`.
fn verify_entry_for(dir: &Path, archive: &ArchiveSpec) -> BinaryResult<()> {
    let manifest = verify_entry(dir)?;
    if manifest.archive_url != archive.url {
        return Err(BinaryError::StaleEntry {
            path: dir.to_path_buf(),
            cached_url: manifest.archive_url,
            requested_url: archive.url.clone(),
        });
    }
    Ok(())
}

fn hash_file(path: &Path) -> BinaryResult<String> {
    crate::sha256_file(path).map_err(|e| BinaryError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(format!("{e:#}")),
    })
}

/// SHA-256 of every regular file under `root`, keyed by relative path.
fn hash_tree(root: &Path) -> BinaryResult<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir).map_err(|e| BinaryError::io(&dir, e))? {
            let entry = entry.map_err(|e| BinaryError::io(&dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| BinaryError::io(&path, e))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.insert(relative, hash_file(&path)?);
            }
        }
    }
    Ok(files)
}
