//! In-memory backend for tests and ephemeral stores.

use crate::backend::{ObjectInfo, StorageBackend};
use crate::error::Result;
use crate::types::Timestamp;
use parking_lot::RwLock;
use std::collections::BTreeMap;

struct Entry {
    bytes: Vec<u8>,
    created: Timestamp,
}

/// Backend keeping all objects in a process-local map.
#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects (test helper).
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut objects = self.objects.write();
        // Preserve the original creation time on idempotent re-put.
        let created = objects
            .get(key)
            .map(|e| e.created)
            .unwrap_or_else(Timestamp::now);
        objects.insert(
            key.to_string(),
            Entry {
                bytes: bytes.to_vec(),
                created,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().get(key).map(|e| e.bytes.clone()))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| ObjectInfo {
                key: k.clone(),
                size: e.bytes.len() as u64,
                created: e.created,
            })
            .collect())
    }

    fn compare_and_swap(&self, key: &str, expected: Option<&[u8]>, new: &[u8]) -> Result<bool> {
        let mut objects = self.objects.write();
        let current = objects.get(key).map(|e| e.bytes.as_slice());
        if current != expected {
            return Ok(false);
        }
        let created = objects
            .get(key)
            .map(|e| e.created)
            .unwrap_or_else(Timestamp::now);
        objects.insert(
            key.to_string(),
            Entry {
                bytes: new.to_vec(),
                created,
            },
        );
        Ok(true)
    }
}
