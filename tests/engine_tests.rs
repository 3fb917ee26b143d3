use dedup_fs::config::AppConfig;
use dedup_fs::error::StorageError;
use dedup_fs::models::file::{CopyRequest, StoreOutcome, StoreRequest};
use dedup_fs::models::version::NewVersion;
use dedup_fs::services::StorageManager;
use dedup_fs::workers::{IngestJob, WorkerPool};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn open() -> (StorageManager, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = AppConfig::with_data_dir(tmp.path().to_str().unwrap());
    (StorageManager::open(config).unwrap(), tmp)
}

fn store(manager: &StorageManager, name: &str, content: &[u8]) -> StoreOutcome {
    manager
        .store_file(
            Cursor::new(content.to_vec()),
            StoreRequest {
                filename: name.into(),
                ..Default::default()
            },
        )
        .unwrap()
}

fn tree(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }
    out.sort();
    out
}

#[test]
fn test_same_bytes_under_two_names_share_a_hash() {
    let (manager, _tmp) = open();
    let first = store(&manager, "one.txt", b"the same payload");
    let second = store(&manager, "two.txt", b"the same payload");

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(first.file.hash, second.file.hash);
    assert_eq!(manager.index().len(), 1);
}

#[test]
fn test_hard_delete_by_hash_removes_entry_and_bytes() {
    let (manager, _tmp) = open();
    let stored = store(&manager, "gone.txt", b"soon gone");
    let physical = manager.storage_path(&stored.file.stored_path);
    assert!(physical.exists());

    let result = manager.hard_delete_file(&stored.file.hash).unwrap();
    assert_eq!(result.space_reclaimed, 9);
    assert!(!physical.exists());
    assert!(matches!(
        manager.get_file(&stored.file.hash),
        Err(StorageError::NotFound(_))
    ));
}

#[test]
fn test_hard_delete_keeps_bytes_for_remaining_links() {
    let (manager, _tmp) = open();
    let source = store(&manager, "shared.txt", b"linked bytes");
    let link = manager
        .copy_file(
            &source.file.id,
            CopyRequest {
                id: source.file.id.clone(),
                hard_link: true,
                ..Default::default()
            },
        )
        .unwrap();

    let result = manager.hard_delete_file(&source.file.id).unwrap();
    assert_eq!(result.space_reclaimed, 0);
    assert!(manager.storage_path(&link.stored_path).exists());
    assert_eq!(manager.get_file(&link.id).unwrap().hash, source.file.hash);
}

#[test]
fn test_soft_delete_then_restore_is_lossless() {
    let (manager, _tmp) = open();
    let before = store(&manager, "keep.txt", b"keep me").file;

    manager.soft_delete_file(&before.id).unwrap();
    assert!(manager.get_file(&before.id).unwrap().is_deleted());

    let after = manager.restore_file(&before.id).unwrap();
    assert_eq!(after, before);
}

#[test]
fn test_version_history_and_revert() {
    let (manager, _tmp) = open();
    let versions = manager.versions();
    for n in 1..=4 {
        versions
            .create_version(
                "report",
                Cursor::new(format!("revision {}", n)),
                NewVersion {
                    filename: "report.txt".into(),
                    uploaded_by: "ana".into(),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    let listed = versions.list_versions("report").unwrap();
    assert_eq!(listed.len(), 4);
    let mut numbers: Vec<u32> = listed.iter().map(|v| v.version).collect();
    numbers.sort();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    let current: Vec<u32> = listed
        .iter()
        .filter(|v| v.is_current)
        .map(|v| v.version)
        .collect();
    assert_eq!(current, vec![4]);

    let before: Vec<_> = versions.list_versions("report").unwrap();
    let reverted = versions.revert_version("report", 2, None, "ben").unwrap();
    assert_eq!(reverted.version, 5);
    assert_eq!(reverted.hash, versions.get_version("report", 2).unwrap().hash);

    for old in before {
        let now = versions.get_version("report", old.version).unwrap();
        assert_eq!(now.hash, old.hash);
        assert_eq!(now.comment, old.comment);
        assert!(!now.is_current);
    }
}

#[test]
fn test_hard_link_copy_shares_hash_and_path() {
    let (manager, _tmp) = open();
    let source = store(&manager, "photo.jpg", b"\xFF\xD8\xFF\xE0 jpeg-ish");
    let copy = manager
        .copy_file(
            &source.file.hash,
            CopyRequest {
                id: source.file.hash.clone(),
                new_name: Some("alias.jpg".into()),
                hard_link: true,
                ..Default::default()
            },
        )
        .unwrap();

    assert_ne!(copy.id, source.file.id);
    assert_eq!(copy.hash, source.file.hash);
    assert_eq!(copy.stored_path, source.file.stored_path);
    assert!(copy.is_hard_link);
    assert_eq!(copy.linked_to.as_deref(), Some(source.file.id.as_str()));
}

#[test]
fn test_batch_delete_reports_in_input_order() {
    let (manager, _tmp) = open();
    let a = store(&manager, "a.txt", b"a");
    let b = store(&manager, "b.txt", b"b");
    let ids = vec![a.file.id.clone(), "no-such-file".to_string(), b.file.id.clone()];

    let result = manager.batch_delete(&ids, false);
    assert_eq!(result.total_deleted, 2);
    assert_eq!(result.total_failed, 1);
    let order: Vec<&str> = result.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, ids.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(result.results[0].success);
    assert!(!result.results[1].success);
    assert!(result.results[1].error.is_some());
    assert!(result.results[2].success);
}

#[test]
fn test_worker_results_sorted_by_index_match_submission() {
    let (manager, tmp) = open();
    let manager = Arc::new(manager);
    let pool = WorkerPool::new(4, 32, 32);
    pool.start(manager).unwrap();

    let count = 20;
    for i in 0..count {
        let path = tmp.path().join(format!("job{:02}.txt", i));
        // Uneven sizes so completion order differs from submission order.
        std::fs::write(&path, "z".repeat((count - i) * 2048)).unwrap();
        pool.submit(IngestJob {
            index: i,
            filename: format!("job{:02}.txt", i),
            path,
            content_type: None,
            metadata: BTreeMap::new(),
            category_hint: None,
            storage_override: None,
        })
        .unwrap();
    }

    let mut results: Vec<_> = pool.results().iter().take(count).collect();
    pool.shutdown();
    results.sort_by_key(|r| r.index);

    let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
    assert_eq!(indices, (0..count).collect::<Vec<_>>());
    for r in &results {
        let outcome = r.outcome.as_ref().unwrap();
        assert_eq!(outcome.file.original_name, format!("job{:02}.txt", r.index));
    }
}

#[test]
fn test_rename_traversal_fails_before_touching_disk() {
    let (manager, _tmp) = open();
    let stored = store(&manager, "safe.txt", b"untouched");
    let before = tree(&manager.config().storage_dir());

    let err = manager
        .rename_file(&stored.file.hash, "../../etc/passwd", true)
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidFilename(_)));
    assert_eq!(tree(&manager.config().storage_dir()), before);
    assert_eq!(manager.get_file(&stored.file.id).unwrap(), stored.file);
}

#[test]
fn test_move_unknown_file_leaves_disk_unchanged() {
    let (manager, _tmp) = open();
    store(&manager, "resident.txt", b"resident");
    let before = tree(&manager.config().storage_dir());

    let err = manager.move_file("feedfacefeedface", "elsewhere").unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    assert_eq!(tree(&manager.config().storage_dir()), before);
}

#[test]
fn test_state_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let config = AppConfig::with_data_dir(tmp.path().to_str().unwrap());
    let (kept, moved) = {
        let manager = StorageManager::open(config.clone()).unwrap();
        let kept = store(&manager, "kept.txt", b"kept");
        let moved = store(&manager, "moved.txt", b"moved");
        manager.move_file(&moved.file.id, "projects/x").unwrap();
        (kept.file, moved.file)
    };

    let (manager, report) = StorageManager::open_with_report(config).unwrap();
    assert!(report.replayed_entries > 0);
    assert_eq!(manager.get_file(&kept.id).unwrap(), kept);
    assert_eq!(manager.get_file(&moved.id).unwrap().category, "projects/x");
}
