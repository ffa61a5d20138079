//! Durable storage for the persisted cache blob.
//!
//! The whole cache is written as one JSON record; reads and writes are
//! treated as fast and synchronous.

use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::Result;

pub trait CacheStorage: Send + Sync {
    /// The stored blob, or `None` if nothing was persisted yet.
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, blob: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Single-file storage; writes go to a sibling temp file and are renamed
/// into place.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStorage for FileStorage {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// In-process storage, handy for tests and for hosts that persist the blob
/// themselves.
#[derive(Default)]
pub struct MemoryStorage {
    blob: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.blob.lock().clone()
    }
}

impl CacheStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.blob.lock().clone())
    }

    fn save(&self, blob: &str) -> Result<()> {
        *self.blob.lock() = Some(blob.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.blob.lock() = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
