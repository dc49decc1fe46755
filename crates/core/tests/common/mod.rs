#![allow(dead_code)]

use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gfauto_core::binaries::{
    ArchiveFetcher, BinaryError, BinaryManager, BinaryReference, BinaryResult, BinarySource,
    BinaryStore, SourcePriority,
};
use gfauto_core::platform::Platform;

pub const TOOLS_VERSION: &str = "tools-v1";

/// Every in-archive path the test binaries need, whatever project the
/// archive is for.
pub const ARCHIVE_FILES: &[(&str, &[u8])] = &[
    ("bin/spirv-opt", b"#!/bin/sh\necho spirv-opt \"$@\"\n"),
    ("bin/spirv-dis", b"#!/bin/sh\necho spirv-dis \"$@\"\n"),
    ("bin/spirv-val", b"#!/bin/sh\nexit 0\n"),
    ("bin/glslangValidator", b"#!/bin/sh\nexit 0\n"),
    ("python/drivers/graphicsfuzz-tool", b"#!/bin/sh\nexit 0\n"),
];

/// Build an in-memory zip archive.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o755);
    for (name, contents) in files {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(contents).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Serves the same test archive for every URL and counts fetches.
#[derive(Default)]
pub struct CountingFetcher {
    count: AtomicUsize,
    urls: Mutex<Vec<String>>,
    /// URLs containing this substring fail to download.
    pub fail_matching: Option<String>,
}

impl CountingFetcher {
    pub fn failing(pattern: &str) -> Self {
        Self { fail_matching: Some(pattern.to_string()), ..Self::default() }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl ArchiveFetcher for CountingFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> BinaryResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(pattern) = &self.fail_matching {
            if url.contains(pattern.as_str()) {
                return Err(BinaryError::Download {
                    url: url.to_string(),
                    message: "simulated failure".to_string(),
                });
            }
        }
        std::fs::write(dest, zip_bytes(ARCHIVE_FILES))
            .map_err(|e| BinaryError::Io { path: dest.to_path_buf(), source: e })
    }
}

pub fn debug_binary(name: &str) -> BinaryReference {
    BinaryReference::new(name, TOOLS_VERSION).with_tags(["Debug"])
}

/// Default table used by tests: a few SPIR-V tools and glslang, all Debug.
pub fn test_defaults() -> Vec<BinaryReference> {
    vec![
        debug_binary("spirv-opt"),
        debug_binary("spirv-dis"),
        debug_binary("spirv-val"),
        debug_binary("glslangValidator"),
    ]
}

pub fn store(cache_root: &Path, fetcher: Arc<CountingFetcher>) -> Arc<BinaryStore> {
    Arc::new(BinaryStore::new(cache_root.to_path_buf(), fetcher))
}

/// Root manager with `overrides` and the test default table, on Linux.
pub fn manager(
    cache_root: &Path,
    fetcher: Arc<CountingFetcher>,
    overrides: Vec<BinaryReference>,
) -> BinaryManager {
    BinaryManager::new(
        vec![
            BinarySource::new(SourcePriority::Default, test_defaults()),
            BinarySource::new(SourcePriority::Override, overrides),
        ],
        Platform::Linux,
        store(cache_root, fetcher),
    )
}

/// Write an executable shell script.
pub fn write_script(path: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
    path.to_path_buf()
}

/// Log output captured from a `tracing` subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with tracing output on this thread captured.
pub fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, CapturedLogs) {
    let logs = CapturedLogs::default();
    let subscriber =
        tracing_subscriber::fmt().with_writer(logs.clone()).with_ansi(false).finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs)
}
