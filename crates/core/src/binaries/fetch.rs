//! Downloading and extracting release archives.

use std::fs;
use std::io;
use std::path::Path;

use crate::binaries::{BinaryError, BinaryResult};

/// Fetches an archive from `url` into the file `dest`.
///
/// The binary cache calls this at most once per cache key and process while
/// holding the key's lock; implementations do not need their own locking.
pub trait ArchiveFetcher: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> BinaryResult<()>;
}

/// Fetches over HTTP(S) with `ureq`; `file://` URLs are copied locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> BinaryResult<()> {
        tracing::info!(%url, dest = %dest.display(), "Downloading");

        if let Some(local) = url.strip_prefix("file://") {
            fs::copy(local, dest).map_err(|e| BinaryError::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            return Ok(());
        }

        let response = ureq::get(url)
            .header("User-Agent", "gfauto")
            .call()
            .map_err(|e| BinaryError::Download { url: url.to_string(), message: e.to_string() })?;
        let mut reader = response.into_body().into_reader();
        let mut file = fs::File::create(dest).map_err(|e| BinaryError::io(dest, e))?;
        io::copy(&mut reader, &mut file)
            .map_err(|e| BinaryError::Download { url: url.to_string(), message: e.to_string() })?;
        Ok(())
    }
}

/// Executable bits for user, group and other.
const ALL_EXECUTABLE_PERMISSION_BITS: u32 = 0o111;

/// Extract a zip archive into `dest`, keeping executable bits recorded by
/// Unix archivers.
pub fn extract_zip(archive: &Path, dest: &Path) -> BinaryResult<()> {
    let extract_err =
        |message: String| BinaryError::Extract { archive: archive.to_path_buf(), message };

    let file = fs::File::open(archive).map_err(|e| BinaryError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| extract_err(e.to_string()))?;
    fs::create_dir_all(dest).map_err(|e| BinaryError::io(dest, e))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| extract_err(e.to_string()))?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| extract_err(format!("unsafe path in archive: {}", entry.name())))?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| BinaryError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BinaryError::io(parent, e))?;
        }
        let mut out = fs::File::create(&out_path).map_err(|e| BinaryError::io(&out_path, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| BinaryError::io(&out_path, e))?;

        if let Some(mode) = entry.unix_mode() {
            let exec_bits = mode & ALL_EXECUTABLE_PERMISSION_BITS;
            if exec_bits != 0 {
                add_permission_bits(&out_path, exec_bits)?;
            }
        }
    }
    Ok(())
}

/// Mark `path` executable for everyone who can read it.
pub fn mark_executable(path: &Path) -> BinaryResult<()> {
    add_permission_bits(path, ALL_EXECUTABLE_PERMISSION_BITS)
}

#[cfg(unix)]
fn add_permission_bits(path: &Path, bits: u32) -> BinaryResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path).map_err(|e| BinaryError::io(path, e))?.permissions();
    let mode = permissions.mode();
    if mode | bits != mode {
        permissions.set_mode(mode | bits);
        fs::set_permissions(path, permissions).map_err(|e| BinaryError::io(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn add_permission_bits(_path: &Path, _bits: u32) -> BinaryResult<()> {
    Ok(())
}
