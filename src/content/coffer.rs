//! Static asset cache.
//!
//! # Responsibilities
//! - Define the `Coffer` contract consulted by file serving
//! - Provide an in-memory coffer preloaded from disk
//!
//! # Design Decisions
//! - Keys are absolute paths so lookups match what file serving resolves
//! - Checksums are SHA-256, computed once at load time

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Precomputed metadata and content of a static file.
#[derive(Debug, Clone)]
pub struct Asset {
    pub content: Bytes,
    pub mime_type: String,
    pub checksum: [u8; 32],
    pub mod_time: SystemTime,
}

impl Asset {
    pub fn new(path: &Path, content: Bytes, mod_time: SystemTime) -> Self {
        let checksum: [u8; 32] = Sha256::digest(&content).into();
        let mime_type = mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default();
        Self {
            content,
            mime_type,
            checksum,
            mod_time,
        }
    }
}

/// Looks up cached assets by absolute path.
pub trait Coffer: Send + Sync {
    /// `Ok(None)` means "not cached"; callers fall back to the filesystem.
    fn asset(&self, path: &Path) -> io::Result<Option<Arc<Asset>>>;
}

/// Coffer that never has anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCoffer;

impl Coffer for NoCoffer {
    fn asset(&self, _path: &Path) -> io::Result<Option<Arc<Asset>>> {
        Ok(None)
    }
}

/// Coffer holding assets in memory.
#[derive(Debug, Default)]
pub struct MemoryCoffer {
    assets: DashMap<PathBuf, Arc<Asset>>,
}

impl MemoryCoffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache every regular file under `root`, recursively.
    pub fn load_dir(&self, root: &Path) -> io::Result<usize> {
        let root = std::path::absolute(root)?;
        let mut pending = vec![root];
        let mut loaded = 0;

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let mod_time = entry.metadata()?.modified()?;
                    let content = Bytes::from(fs::read(&path)?);
                    self.insert(&path, Asset::new(&path, content, mod_time));
                    loaded += 1;
                }
            }
        }

        tracing::debug!(assets = loaded, "Coffer loaded");
        Ok(loaded)
    }

    pub fn insert(&self, path: &Path, asset: Asset) {
        self.assets.insert(path.to_path_buf(), Arc::new(asset));
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl Coffer for MemoryCoffer {
    fn asset(&self, path: &Path) -> io::Result<Option<Arc<Asset>>> {
        Ok(self.assets.get(path).map(|a| Arc::clone(a.value())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_dir_indexes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();
        fs::write(dir.path().join("css/site.css"), "p{}").unwrap();

        let coffer = MemoryCoffer::new();
        assert_eq!(coffer.load_dir(dir.path()).unwrap(), 2);

        let root = std::path::absolute(dir.path()).unwrap();
        let asset = coffer.asset(&root.join("css/site.css")).unwrap().unwrap();
        assert_eq!(asset.mime_type, "text/css");
        assert_eq!(asset.content, Bytes::from_static(b"p{}"));
        assert_eq!(asset.checksum, <[u8; 32]>::from(Sha256::digest(b"p{}")));
    }

    #[test]
    fn misses_are_not_errors() {
        assert!(NoCoffer.asset(Path::new("/x")).unwrap().is_none());
        assert!(MemoryCoffer::new().asset(Path::new("/x")).unwrap().is_none());
    }
}
