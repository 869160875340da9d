//! Garbage collection safety and liveness tests.

use epoch_store::{CheckpointId, Store, Tree, MAIN_BRANCH};
use std::sync::Arc;
use std::time::Duration;

/// Commit the base tree plus one extra file.
fn commit_one(
    store: &Store,
    branch: &str,
    base: Option<CheckpointId>,
    path: &str,
    content: &[u8],
) -> CheckpointId {
    let mut tree = match base {
        Some(id) => store.read_tree(id).unwrap(),
        None => Tree::new(),
    };
    tree.push(store.store_file(path, content).unwrap());
    store.commit(branch, base, &tree).unwrap()
}

/// Everything reachable from a head at mark time survives the sweep.
#[test]
fn test_gc_safety_reachable_history_survives() {
    let store = Store::in_memory().unwrap();

    let c1 = commit_one(&store, MAIN_BRANCH, None, "/one.txt", b"first");
    let c2 = commit_one(&store, MAIN_BRANCH, Some(c1), "/two.txt", b"second");
    let c3 = commit_one(&store, MAIN_BRANCH, Some(c2), "/three.txt", b"third");

    std::thread::sleep(Duration::from_millis(2));
    let result = store.run_gc(&[]).unwrap();
    assert_eq!(result.swept_checkpoints, 0);
    assert_eq!(result.swept_chunks, 0);
    assert_eq!(result.reachable_checkpoints, 3);

    // Every historical snapshot still reads back in full.
    for (ckpt, files) in [(c1, 1), (c2, 2), (c3, 3)] {
        let tree = store.read_tree(ckpt).unwrap();
        assert_eq!(tree.len(), files);
        for file in tree.files() {
            store.read_file(file).unwrap();
        }
    }
}

/// Orphaned data older than the cutoff is gone afterwards.
#[test]
fn test_gc_liveness_orphans_collected() {
    let store = Store::in_memory().unwrap();

    let c1 = commit_one(&store, MAIN_BRANCH, None, "/keep.txt", b"keep");

    // Orphan chunk: stored, never referenced by any commit.
    let orphan = store.put_chunk(b"orphaned bytes").unwrap();

    // Orphan history: a whole branch's worth of data, then the ref deleted.
    store.fork("scratch", MAIN_BRANCH).unwrap();
    let s1 = commit_one(&store, "scratch", Some(c1), "/scratch.txt", b"temp");
    store.delete_branch("scratch").unwrap();

    std::thread::sleep(Duration::from_millis(2));
    let result = store.run_gc(&[]).unwrap();
    assert!(result.swept_chunks >= 2);
    assert_eq!(result.swept_checkpoints, 1);

    assert!(!store.chunk_exists(&orphan).unwrap());
    assert!(store.read_tree(s1).is_err());

    // The shared base commit is untouched.
    let tree = store.read_tree(c1).unwrap();
    assert_eq!(
        store.read_file(tree.get("/keep.txt").unwrap()).unwrap(),
        b"keep"
    );
}

/// A pinned checkpoint survives even with no branch pointing anywhere near it.
#[test]
fn test_gc_respects_pins() {
    let store = Store::in_memory().unwrap();

    let c1 = commit_one(&store, MAIN_BRANCH, None, "/a.txt", b"a");
    let c2 = commit_one(&store, MAIN_BRANCH, Some(c1), "/b.txt", b"b");

    // Rewind main to c1 by deleting and recreating, stranding c2.
    store.delete_branch(MAIN_BRANCH).unwrap();
    store.create_branch(MAIN_BRANCH, c1).unwrap();

    store.pin(c2).unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let result = store.run_gc(&[]).unwrap();
    assert_eq!(result.swept_checkpoints, 0);
    assert!(store.read_tree(c2).is_ok());

    // Unpin, and the stranded checkpoint is collected on the next cycle.
    store.unpin(c2).unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let result = store.run_gc(&[]).unwrap();
    assert_eq!(result.swept_checkpoints, 1);
    assert!(store.read_tree(c2).is_err());
    assert!(store.read_tree(c1).is_ok());
}

/// Ad-hoc pins passed to run_gc behave like persisted ones for that cycle.
#[test]
fn test_gc_extra_pins() {
    let store = Store::in_memory().unwrap();

    let c1 = commit_one(&store, MAIN_BRANCH, None, "/a.txt", b"a");
    let c2 = commit_one(&store, MAIN_BRANCH, Some(c1), "/b.txt", b"b");
    store.delete_branch(MAIN_BRANCH).unwrap();
    store.create_branch(MAIN_BRANCH, c1).unwrap();

    std::thread::sleep(Duration::from_millis(2));
    let result = store.run_gc(&[c2]).unwrap();
    assert_eq!(result.swept_checkpoints, 0);
    assert!(store.read_tree(c2).is_ok());
}

/// Re-running after a completed sweep deletes nothing further.
#[test]
fn test_gc_idempotent_rerun() {
    let store = Store::in_memory().unwrap();

    let c1 = commit_one(&store, MAIN_BRANCH, None, "/a.txt", b"a");
    store.put_chunk(b"garbage 1").unwrap();
    store.put_chunk(b"garbage 2").unwrap();

    std::thread::sleep(Duration::from_millis(2));
    let first = store.run_gc(&[]).unwrap();
    assert_eq!(first.swept_chunks, 2);

    std::thread::sleep(Duration::from_millis(2));
    let second = store.run_gc(&[]).unwrap();
    assert_eq!(second.swept_chunks, 0);
    assert_eq!(second.swept_checkpoints, 0);

    assert!(store.read_tree(c1).is_ok());
}

/// Commits racing a GC cycle keep everything they publish.
#[test]
fn test_gc_concurrent_with_commits() {
    let store = Arc::new(Store::in_memory().unwrap());

    let seed = commit_one(&store, "writer", None, "/seed.txt", b"seed");
    for i in 0..20 {
        store
            .put_chunk(format!("pre-existing garbage {}", i).as_bytes())
            .unwrap();
    }
    std::thread::sleep(Duration::from_millis(2));

    let writer = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            let mut base = seed;
            for i in 0..30 {
                let path = format!("/file-{}.txt", i);
                base = commit_one(&store, "writer", Some(base), &path, b"written during gc");
            }
            base
        })
    };

    let collector = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || store.run_gc(&[]).unwrap())
    };

    let head = writer.join().unwrap();
    collector.join().unwrap();

    // Every commit the writer published is fully readable.
    let history = store.history(head, 100).unwrap();
    assert_eq!(history.len(), 31);
    for record in &history {
        let tree = store.read_tree(record.id).unwrap();
        for file in tree.files() {
            store.read_file(file).unwrap();
        }
    }
}

/// GC works identically over the filesystem backend.
#[test]
fn test_gc_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Store::open_path(dir.path().join("store")).unwrap();

    let c1 = commit_one(&store, MAIN_BRANCH, None, "/a.txt", b"durable");
    let orphan = store.put_chunk(b"doomed").unwrap();

    std::thread::sleep(Duration::from_millis(20));
    let result = store.run_gc(&[]).unwrap();
    assert_eq!(result.swept_chunks, 1);

    assert!(!store.chunk_exists(&orphan).unwrap());
    let tree = store.read_tree(c1).unwrap();
    assert_eq!(
        store.read_file(tree.get("/a.txt").unwrap()).unwrap(),
        b"durable"
    );
}
