//! Filesystem backend.
//!
//! Objects live as plain files under a root directory, one file per key.
//! Writes go through a temp file and rename so readers never observe a
//! partial object. The conditional write runs under an advisory lock file,
//! making it atomic across processes on one host.

use crate::backend::{ObjectInfo, StorageBackend};
use crate::error::{Result, StoreError};
use crate::types::Timestamp;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Name of the lock file guarding conditional writes.
const CAS_LOCK_FILE: &str = ".cas.lock";

/// Backend storing each object as a file under a root directory.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open a backend rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(unavailable)?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Write bytes to a temp file next to the target, then rename into place.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidFormat(format!("bad key path: {:?}", path)))?;
        fs::create_dir_all(parent).map_err(unavailable)?;

        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(unavailable)?;
        file.write_all(bytes).map_err(unavailable)?;
        file.sync_all().map_err(unavailable)?;
        fs::rename(&tmp, path).map_err(unavailable)?;
        Ok(())
    }

    /// Take the exclusive advisory lock for the CAS critical section.
    fn cas_lock(&self) -> Result<File> {
        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(CAS_LOCK_FILE))
            .map_err(unavailable)?;
        lock.lock_exclusive().map_err(unavailable)?;
        Ok(lock)
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<ObjectInfo>) -> Result<()> {
        for entry in fs::read_dir(dir).map_err(unavailable)? {
            let entry = entry.map_err(unavailable)?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(unavailable)?;

            if file_type.is_dir() {
                self.walk(&path, prefix, out)?;
                continue;
            }

            let key = match path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if !key.starts_with(prefix) || key == CAS_LOCK_FILE || key.ends_with(".tmp") {
                continue;
            }

            let meta = entry.metadata().map_err(unavailable)?;
            let created = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| Timestamp(d.as_micros() as i64))
                .unwrap_or_default();

            out.push(ObjectInfo {
                key,
                size: meta.len(),
                created,
            });
        }
        Ok(())
    }
}

impl StorageBackend for FsBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.write_atomic(&self.object_path(key), bytes)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(e)),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(unavailable)?;
        Ok(Some(bytes))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.object_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(unavailable(e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        // Descend only into the directory portion of the prefix.
        let start = match prefix.rfind('/') {
            Some(pos) => self.root.join(&prefix[..pos]),
            None => self.root.clone(),
        };
        if !start.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        self.walk(&start, prefix, &mut out)?;
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: &[u8]) -> Result<bool> {
        let lock = self.cas_lock()?;

        let current = self.get(key)?;
        let matches = match (&current, expected) {
            (None, None) => true,
            (Some(cur), Some(exp)) => cur.as_slice() == exp,
            _ => false,
        };

        let swapped = if matches {
            self.write_atomic(&self.object_path(key), new)?;
            true
        } else {
            false
        };

        FileExt::unlock(&lock).map_err(unavailable)?;
        Ok(swapped)
    }
}

fn unavailable(e: std::io::Error) -> StoreError {
    StoreError::BackendUnavailable(e.to_string())
}
