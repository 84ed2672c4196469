//! Object-store capability and the local filesystem implementation.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{SinkError, SinkResult};

/// Where a finalized object landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedObject {
    pub bucket: String,
    pub key: String,
    pub uri: String,
    /// Uncompressed bytes accepted by the writer.
    pub bytes: u64,
}

/// A scoped byte sink for one object.
///
/// Nothing becomes visible until [`ObjectWriter::finalize`] succeeds.
/// Dropping a writer without finalizing discards everything written.
pub trait ObjectWriter: Write {
    fn finalize(self: Box<Self>) -> SinkResult<PublishedObject>;
}

/// Opens writers for objects addressed by bucket and key.
pub trait ObjectStore {
    fn open(&self, bucket: &str, key: &str) -> SinkResult<Box<dyn ObjectWriter>>;
}

/// Check an object key: relative, `/`-separated, no empty, `.` or `..` segments.
pub fn validate_object_key(key: &str) -> SinkResult<()> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(SinkError::message(format!("Invalid object key: {:?}", key)));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(SinkError::message(format!(
            "Object key must not contain relative segments: {:?}",
            key
        )));
    }
    Ok(())
}

fn validate_bucket(bucket: &str) -> SinkResult<()> {
    let valid = !bucket.is_empty()
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && bucket != "."
        && bucket != "..";
    if valid {
        Ok(())
    } else {
        Err(SinkError::message(format!("Invalid bucket name: {:?}", bucket)))
    }
}

/// Object store backed by a local directory.
///
/// Objects live at `<root>/<bucket>/<key>` and are gzip-compressed on write.
/// Each write is staged to a hidden `.<name>.tmp` sibling and renamed into
/// place on finalize, so readers never observe a partial object and a
/// re-run replaces the previous object whole.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.root.join(bucket), |path, segment| path.join(segment))
    }
}

impl ObjectStore for LocalObjectStore {
    fn open(&self, bucket: &str, key: &str) -> SinkResult<Box<dyn ObjectWriter>> {
        validate_bucket(bucket)?;
        validate_object_key(key)?;

        let final_path = self.object_path(bucket, key);
        let (dir, file_name) = match (final_path.parent(), final_path.file_name()) {
            (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_string_lossy().to_string()),
            _ => {
                return Err(SinkError::message(format!(
                    "Object path has no file name: {}",
                    final_path.display()
                )))
            }
        };

        std::fs::create_dir_all(&dir).map_err(|e| {
            SinkError::io(
                format!("Failed to create object directory: {}", dir.display()),
                e,
            )
        })?;

        // Write to temp file first for atomic rename
        let temp_path = dir.join(format!(".{}.tmp", file_name));
        let file = File::create(&temp_path).map_err(|e| {
            SinkError::io(
                format!("Failed to create temp object: {}", temp_path.display()),
                e,
            )
        })?;

        debug!(
            "Opened object {}/{} (temp: {})",
            bucket,
            key,
            temp_path.display()
        );

        Ok(Box::new(LocalObjectWriter {
            encoder: Some(GzEncoder::new(BufWriter::new(file), Compression::default())),
            bucket: bucket.to_string(),
            key: key.to_string(),
            temp_path,
            final_path,
            bytes: 0,
            committed: false,
        }))
    }
}

struct LocalObjectWriter {
    encoder: Option<GzEncoder<BufWriter<File>>>,
    bucket: String,
    key: String,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes: u64,
    /// True once the temp file has been promoted
    committed: bool,
}

impl Write for LocalObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "object writer already closed"))?;
        let written = encoder.write(buf)?;
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(()),
        }
    }
}

impl ObjectWriter for LocalObjectWriter {
    fn finalize(mut self: Box<Self>) -> SinkResult<PublishedObject> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| SinkError::message("Object writer already finalized"))?;

        let file = encoder
            .finish()
            .and_then(|buffered| buffered.into_inner().map_err(|e| e.into_error()))
            .map_err(|e| {
                SinkError::io(
                    format!("Failed to flush object: {}", self.temp_path.display()),
                    e,
                )
            })?;
        file.sync_all().map_err(|e| {
            SinkError::io(
                format!("Failed to sync object: {}", self.temp_path.display()),
                e,
            )
        })?;
        drop(file);

        std::fs::rename(&self.temp_path, &self.final_path).map_err(|e| {
            SinkError::io(
                format!(
                    "Failed to rename {} -> {}",
                    self.temp_path.display(),
                    self.final_path.display()
                ),
                e,
            )
        })?;
        self.committed = true;

        info!(
            "Published object: {} ({} bytes uncompressed)",
            self.final_path.display(),
            self.bytes
        );

        Ok(PublishedObject {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            uri: format!("file://{}", self.final_path.display()),
            bytes: self.bytes,
        })
    }
}

impl Drop for LocalObjectWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Cleanup temp file if we didn't finish properly
        drop(self.encoder.take());
        if self.temp_path.exists() {
            let _ = std::fs::remove_file(&self.temp_path);
            warn!("Discarded unfinished object: {}", self.temp_path.display());
        }
    }
}
