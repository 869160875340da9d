//! Branch manager implementation.

use crate::backend::StorageBackend;
use crate::checkpoints::CheckpointLog;
use crate::error::{Result, StoreError};
use crate::types::CheckpointId;
use std::sync::Arc;
use tracing::debug;

/// Key prefix for branch refs.
pub(crate) const REF_PREFIX: &str = "refs/";

/// Conventional name of the default branch.
pub const MAIN_BRANCH: &str = "main";

/// A branch name and its current head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    pub head: CheckpointId,
}

/// Manages named refs over the backend's conditional-write primitive.
pub struct BranchManager {
    backend: Arc<dyn StorageBackend>,
    checkpoints: Arc<CheckpointLog>,
}

impl BranchManager {
    /// Create a branch manager.
    pub fn new(backend: Arc<dyn StorageBackend>, checkpoints: Arc<CheckpointLog>) -> Self {
        Self {
            backend,
            checkpoints,
        }
    }

    /// Create a branch pointing at an existing checkpoint.
    pub fn create(&self, name: &str, head: CheckpointId) -> Result<Branch> {
        validate_name(name)?;
        if !self.checkpoints.exists(&head)? {
            return Err(StoreError::CheckpointNotFound(head));
        }

        let created = self
            .backend
            .compare_and_swap(&ref_key(name), None, head.to_hex().as_bytes())?;
        if !created {
            return Err(StoreError::BranchExists(name.to_string()));
        }

        debug!(branch = name, head = %head, "created branch");
        Ok(Branch {
            name: name.to_string(),
            head,
        })
    }

    /// Atomically advance a branch from `expected_old` to `new_head`.
    ///
    /// `expected_old = None` creates the branch (it must not exist yet).
    /// If another committer moved the head first, fails with `Conflict`
    /// carrying the head that was actually observed; the caller re-resolves
    /// against it and retries.
    pub fn advance(
        &self,
        name: &str,
        expected_old: Option<&CheckpointId>,
        new_head: CheckpointId,
    ) -> Result<()> {
        validate_name(name)?;
        if !self.checkpoints.exists(&new_head)? {
            return Err(StoreError::CheckpointNotFound(new_head));
        }

        let expected_bytes = expected_old.map(|id| id.to_hex().into_bytes());
        let swapped = self.backend.compare_and_swap(
            &ref_key(name),
            expected_bytes.as_deref(),
            new_head.to_hex().as_bytes(),
        )?;

        if !swapped {
            let actual = self.head(name).ok();
            return Err(StoreError::Conflict {
                branch: name.to_string(),
                expected: expected_old.copied(),
                actual,
            });
        }

        debug!(branch = name, head = %new_head, "advanced branch");
        Ok(())
    }

    /// Create `new_name` pointing at `source`'s current head.
    ///
    /// The fork shares every checkpoint and chunk with its source; nothing
    /// is copied.
    pub fn fork(&self, new_name: &str, source: &str) -> Result<Branch> {
        let head = self.head(source)?;
        self.create(new_name, head)
    }

    /// Current head of a branch.
    pub fn head(&self, name: &str) -> Result<CheckpointId> {
        let raw = self
            .backend
            .get(&ref_key(name))?
            .ok_or_else(|| StoreError::BranchNotFound(name.to_string()))?;
        parse_ref(name, &raw)
    }

    /// Whether a branch exists.
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.backend.get(&ref_key(name))?.is_some())
    }

    /// All branches with their heads, sorted by name.
    pub fn list(&self) -> Result<Vec<Branch>> {
        let mut branches = Vec::new();
        for info in self.backend.list(REF_PREFIX)? {
            let name = info.key[REF_PREFIX.len()..].to_string();
            let raw = match self.backend.get(&info.key)? {
                Some(raw) => raw,
                None => continue,
            };
            branches.push(Branch {
                head: parse_ref(&name, &raw)?,
                name,
            });
        }
        Ok(branches)
    }

    /// Number of branches.
    pub fn branch_count(&self) -> Result<u64> {
        Ok(self.backend.list(REF_PREFIX)?.len() as u64)
    }

    /// Delete a branch name.
    ///
    /// Removes only the pointer. Checkpoints and chunks stay until no other
    /// branch or pin reaches them and GC collects them.
    pub fn delete(&self, name: &str) -> Result<()> {
        let existed = self.backend.delete(&ref_key(name))?;
        if !existed {
            return Err(StoreError::BranchNotFound(name.to_string()));
        }
        debug!(branch = name, "deleted branch");
        Ok(())
    }
}

fn ref_key(name: &str) -> String {
    format!("{}{}", REF_PREFIX, name)
}

/// Branch names become backend keys, so keep them to one path segment.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\0') || name.starts_with('.') {
        return Err(StoreError::InvalidFormat(format!(
            "invalid branch name: {:?}",
            name
        )));
    }
    Ok(())
}

fn parse_ref(name: &str, raw: &[u8]) -> Result<CheckpointId> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|hex| CheckpointId::from_hex(hex).ok())
        .ok_or_else(|| StoreError::CorruptEncoding(format!("malformed ref for branch {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::types::ChunkId;

    fn test_manager() -> (Arc<CheckpointLog>, BranchManager) {
        let backend = Arc::new(MemoryBackend::new()) as Arc<dyn StorageBackend>;
        let checkpoints = Arc::new(CheckpointLog::new(Arc::clone(&backend)));
        let manager = BranchManager::new(backend, Arc::clone(&checkpoints));
        (checkpoints, manager)
    }

    fn checkpoint(log: &CheckpointLog, parents: &[CheckpointId], tag: &str) -> CheckpointId {
        let chunk = ChunkId::from_bytes(tag.as_bytes());
        log.append(parents, &[chunk]).unwrap()
    }

    #[test]
    fn test_create_and_head() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");

        let branch = manager.create(MAIN_BRANCH, c1).unwrap();
        assert_eq!(branch.head, c1);
        assert_eq!(manager.head(MAIN_BRANCH).unwrap(), c1);
    }

    #[test]
    fn test_create_duplicate() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");

        manager.create(MAIN_BRANCH, c1).unwrap();
        assert!(matches!(
            manager.create(MAIN_BRANCH, c1),
            Err(StoreError::BranchExists(_))
        ));
    }

    #[test]
    fn test_create_requires_checkpoint() {
        let (_, manager) = test_manager();
        let ghost = CheckpointId::from_bytes(b"ghost");

        assert!(matches!(
            manager.create(MAIN_BRANCH, ghost),
            Err(StoreError::CheckpointNotFound(_))
        ));
    }

    #[test]
    fn test_advance_happy_path() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");
        let c2 = checkpoint(&log, &[c1], "c2");

        manager.create(MAIN_BRANCH, c1).unwrap();
        manager.advance(MAIN_BRANCH, Some(&c1), c2).unwrap();
        assert_eq!(manager.head(MAIN_BRANCH).unwrap(), c2);
    }

    #[test]
    fn test_advance_stale_base_conflicts() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");
        let c2 = checkpoint(&log, &[c1], "c2");
        let c3 = checkpoint(&log, &[c1], "c3");

        manager.create(MAIN_BRANCH, c1).unwrap();
        manager.advance(MAIN_BRANCH, Some(&c1), c2).unwrap();

        // A second committer still based on c1 must lose.
        let err = manager.advance(MAIN_BRANCH, Some(&c1), c3).unwrap_err();
        assert!(err.is_retryable());
        match &err {
            StoreError::Conflict { actual, .. } => assert_eq!(*actual, Some(c2)),
            other => panic!("expected Conflict, got {:?}", other),
        }

        // The loser retries against the observed head and wins.
        let c4 = checkpoint(&log, &[c2], "c4");
        manager.advance(MAIN_BRANCH, Some(&c2), c4).unwrap();
        assert_eq!(manager.head(MAIN_BRANCH).unwrap(), c4);
    }

    #[test]
    fn test_concurrent_advance_single_winner() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");
        manager.create(MAIN_BRANCH, c1).unwrap();

        let manager = Arc::new(manager);
        let heads: Vec<_> = (0..4)
            .map(|i| checkpoint(&log, &[c1], &format!("child-{}", i)))
            .collect();

        let handles: Vec<_> = heads
            .into_iter()
            .map(|head| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.advance(MAIN_BRANCH, Some(&c1), head).is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_fork_points_at_source_head() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");
        let c2 = checkpoint(&log, &[c1], "c2");

        manager.create(MAIN_BRANCH, c1).unwrap();
        manager.advance(MAIN_BRANCH, Some(&c1), c2).unwrap();

        let fork = manager.fork("experiment", MAIN_BRANCH).unwrap();
        assert_eq!(fork.head, c2);

        // Advancing the fork leaves the source untouched.
        let c3 = checkpoint(&log, &[c2], "c3");
        manager.advance("experiment", Some(&c2), c3).unwrap();
        assert_eq!(manager.head(MAIN_BRANCH).unwrap(), c2);
    }

    #[test]
    fn test_list_and_delete() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");

        manager.create(MAIN_BRANCH, c1).unwrap();
        manager.create("dev", c1).unwrap();

        let branches = manager.list().unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].name, "dev");
        assert_eq!(branches[1].name, MAIN_BRANCH);

        manager.delete("dev").unwrap();
        assert_eq!(manager.branch_count().unwrap(), 1);
        assert!(matches!(
            manager.head("dev"),
            Err(StoreError::BranchNotFound(_))
        ));

        // The checkpoint itself is untouched.
        assert!(log.exists(&c1).unwrap());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (log, manager) = test_manager();
        let c1 = checkpoint(&log, &[], "c1");

        for name in ["", "a/b", ".hidden"] {
            assert!(matches!(
                manager.create(name, c1),
                Err(StoreError::InvalidFormat(_))
            ));
        }
    }
}
