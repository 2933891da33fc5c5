//! # Local Store
//!
//! Reads and writes artifacts on the local tier. Relative paths resolve
//! against the store root; absolute paths are used as given.
//!
//! ## Atomic Writes
//!
//! Every write goes to a `NamedTempFile` in the destination directory which
//! is fsynced and persisted over the destination. The temp file is removed
//! when dropped unpersisted, so an I/O failure never leaves a torn artifact
//! or stray temp file behind.
//!
//! Local failures are never retried.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tiercache_core::Checksum;

use crate::error::LocalStoreError;

/// Size and modification time of a local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// The local tier rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path against the root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Atomically write `bytes` to `path` and return their checksum.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> Result<Checksum, LocalStoreError> {
        let dest = self.resolve(path);
        let temp = temp_beside(&dest)?;
        temp.as_file()
            .write_all(bytes)
            .map_err(|e| LocalStoreError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| LocalStoreError::io(temp.path(), e))?;
        persist(temp, &dest)?;
        tracing::debug!(path = %dest.display(), size = bytes.len(), "wrote local file");
        Ok(Checksum::of_bytes(bytes))
    }

    /// Atomically copy `source` to `dest`, returning the checksum and size
    /// of what landed at `dest`.
    pub fn copy_in(&self, source: &Path, dest: &Path) -> Result<(Checksum, u64), LocalStoreError> {
        let dest = self.resolve(dest);
        let mut input = File::open(source).map_err(|e| LocalStoreError::io(source, e))?;
        let mut temp = temp_beside(&dest)?;
        let size = std::io::copy(&mut input, temp.as_file_mut())
            .map_err(|e| LocalStoreError::io(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| LocalStoreError::io(temp.path(), e))?;
        let checksum = checksum_path(temp.path())?;
        persist(temp, &dest)?;
        tracing::debug!(from = %source.display(), to = %dest.display(), size, "copied into local tier");
        Ok((checksum, size))
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>, LocalStoreError> {
        let path = self.resolve(path);
        fs::read(&path).map_err(|e| LocalStoreError::io(path, e))
    }

    pub fn stat(&self, path: &Path) -> Result<FileStat, LocalStoreError> {
        let path = self.resolve(path);
        let meta = fs::metadata(&path).map_err(|e| LocalStoreError::io(&path, e))?;
        if !meta.is_file() {
            return Err(LocalStoreError::NotFound(path));
        }
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .map_err(|e| LocalStoreError::io(&path, e))?;
        Ok(FileStat {
            size: meta.len(),
            modified,
        })
    }

    /// Streaming SHA-256 of a file.
    pub fn checksum(&self, path: &Path) -> Result<Checksum, LocalStoreError> {
        checksum_path(&self.resolve(path))
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_file()
    }

    /// Remove a file. Returns `false` if it was already absent.
    ///
    /// Empty parent directories up to the root are pruned.
    pub fn remove(&self, path: &Path) -> Result<bool, LocalStoreError> {
        let path = self.resolve(path);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_parents(&path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LocalStoreError::io(path, e)),
        }
    }

    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

fn checksum_path(path: &Path) -> Result<Checksum, LocalStoreError> {
    let file = File::open(path).map_err(|e| LocalStoreError::io(path, e))?;
    Checksum::from_reader(std::io::BufReader::new(file)).map_err(|e| LocalStoreError::io(path, e))
}

// ---------------------------------------------------------------------------
// Temp files
// ---------------------------------------------------------------------------

/// A temp file in `dest`'s directory, so the final rename stays on one
/// filesystem.
fn temp_beside(dest: &Path) -> Result<NamedTempFile, LocalStoreError> {
    let parent = dest
        .parent()
        .ok_or_else(|| LocalStoreError::NotFound(dest.to_path_buf()))?;
    fs::create_dir_all(parent).map_err(|e| LocalStoreError::io(parent, e))?;
    NamedTempFile::new_in(parent).map_err(|e| LocalStoreError::io(parent, e))
}

/// Rename over `dest`. On failure the returned temp file is dropped, which
/// removes it.
fn persist(temp: NamedTempFile, dest: &Path) -> Result<(), LocalStoreError> {
    temp.persist(dest)
        .map(drop)
        .map_err(|e| LocalStoreError::io(dest, e.error))
}
