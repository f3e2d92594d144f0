//! Tests for the backing tree
//!
//! These tests verify:
//! - Creating, checkpointing and reopening tree files
//! - Seeking in both directions and within bounds
//! - Exclusive writers and merge semantics
//! - Detection of corrupt and mismatched files
//! - Degraded trees and consistency checks

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::ops::Bound;
use std::path::PathBuf;

use tempfile::TempDir;
use token_scan_store::layout::{TokenScanKey, TokenScanValue};
use token_scan_store::merge::MergePolicy;
use token_scan_store::tree::{IoLimiter, SeekDirection, Tree};
use token_scan_store::writelog::NoopWriteMonitor;
use token_scan_store::ScanStoreError;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_tree() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    (temp_dir, path)
}

fn key(token_id: u32, id_range: u64) -> TokenScanKey {
    TokenScanKey::new(token_id, id_range)
}

/// Merge `(token, range, bits)` adds through one writer session
fn add_all(tree: &Tree, entries: &[(u32, u64, u64)]) {
    let mut writer = tree.writer().unwrap();
    for &(token_id, id_range, bits) in entries {
        writer
            .merge(
                key(token_id, id_range),
                TokenScanValue::new(bits),
                MergePolicy::Add,
                &NoopWriteMonitor,
            )
            .unwrap();
    }
    writer.close().unwrap();
}

fn keys_of(cursor: impl Iterator<Item = (TokenScanKey, TokenScanValue)>) -> Vec<(u32, u64)> {
    cursor.map(|(k, _)| (k.token_id, k.id_range)).collect()
}

// =============================================================================
// Create/Open Tests
// =============================================================================

#[test]
fn test_create_empty_tree() {
    let (_temp, path) = setup_temp_tree();

    let tree = Tree::create(&path, b"hdr").unwrap();

    assert!(path.exists());
    assert!(tree.is_empty());
    assert_eq!(tree.len(), 0);
    assert_eq!(tree.header(), b"hdr".to_vec());
    assert!(tree.is_persistent());
}

#[test]
fn test_create_makes_parent_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("dir").join("test.db");

    Tree::create(&path, &[]).unwrap();

    assert!(path.exists());
}

#[test]
fn test_open_missing_file() {
    let (_temp, path) = setup_temp_tree();

    let result = Tree::open(&path);

    assert!(matches!(result, Err(ScanStoreError::TreeFileNotFound(_))));
}

#[test]
fn test_checkpoint_and_reopen() {
    let (_temp, path) = setup_temp_tree();

    {
        let tree = Tree::create(&path, b"v1").unwrap();
        add_all(&tree, &[(1, 0, 0b11), (1, 5, 0b1), (0, 2, 1 << 63)]);
        tree.checkpoint(&IoLimiter::UNLIMITED, b"v2").unwrap();
        assert_eq!(tree.header(), b"v2".to_vec());
    }

    let tree = Tree::open(&path).unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.header(), b"v2".to_vec());
    let all: Vec<_> = tree.seek_all().collect();
    assert_eq!(
        all,
        vec![
            (key(0, 2), TokenScanValue::new(1 << 63)),
            (key(1, 0), TokenScanValue::new(0b11)),
            (key(1, 5), TokenScanValue::new(0b1)),
        ]
    );
}

#[test]
fn test_unflushed_changes_not_on_disk() {
    let (_temp, path) = setup_temp_tree();

    {
        let tree = Tree::create(&path, &[]).unwrap();
        add_all(&tree, &[(1, 0, 1)]);
    }

    let tree = Tree::open(&path).unwrap();
    assert!(tree.is_empty());
}

#[test]
fn test_checkpoint_with_limiter() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();
    let entries: Vec<(u32, u64, u64)> = (0..100).map(|r| (0, r, 1)).collect();
    add_all(&tree, &entries);

    tree.checkpoint(&IoLimiter::bytes_per_second(1024 * 1024 * 1024), &[])
        .unwrap();

    assert_eq!(Tree::open(&path).unwrap().len(), 100);
    assert!(IoLimiter::default().is_unlimited());
}

#[test]
fn test_checkpoint_leaves_no_temp_file() {
    let (temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();
    add_all(&tree, &[(3, 3, 3)]);
    tree.checkpoint(&IoLimiter::UNLIMITED, &[]).unwrap();

    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["test.db".to_string()]);
}

// =============================================================================
// Seek Tests
// =============================================================================

#[test]
fn test_seek_forward_and_backward() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();
    add_all(&tree, &[(1, 0, 1), (1, 1, 1), (1, 7, 1), (2, 0, 1)]);

    let forward = tree.seek(
        Bound::Included(key(1, 0)),
        Bound::Included(key(1, 7)),
        SeekDirection::Forward,
    );
    assert_eq!(keys_of(forward), vec![(1, 0), (1, 1), (1, 7)]);

    let backward = tree.seek(
        Bound::Included(key(1, 0)),
        Bound::Included(key(1, 7)),
        SeekDirection::Backward,
    );
    assert_eq!(backward.direction(), SeekDirection::Backward);
    assert_eq!(keys_of(backward), vec![(1, 7), (1, 1), (1, 0)]);
}

#[test]
fn test_seek_range_excludes_upper_bound() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();
    add_all(&tree, &[(1, 0, 1), (1, 1, 1), (1, 2, 1)]);

    let cursor = tree.seek_range(key(1, 0), key(1, 2));

    assert_eq!(keys_of(cursor), vec![(1, 0), (1, 1)]);
}

#[test]
fn test_seek_inverted_bounds_is_empty() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();
    add_all(&tree, &[(1, 0, 1), (1, 5, 1)]);

    let cursor = tree.seek(
        Bound::Included(key(1, 5)),
        Bound::Excluded(key(1, 5)),
        SeekDirection::Forward,
    );
    assert_eq!(cursor.count(), 0);

    let cursor = tree.seek(
        Bound::Included(key(1, 9)),
        Bound::Included(key(1, 0)),
        SeekDirection::Backward,
    );
    assert_eq!(cursor.count(), 0);
}

#[test]
fn test_seek_spans_many_batches() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();
    let entries: Vec<(u32, u64, u64)> = (0..1_000).map(|r| (4, r, 1)).collect();
    add_all(&tree, &entries);

    let forward: Vec<u64> = tree
        .seek_range(TokenScanKey::lowest_of(4), TokenScanKey::highest_of(4))
        .map(|(k, _)| k.id_range)
        .collect();
    assert_eq!(forward, (0..1_000).collect::<Vec<_>>());

    let backward: Vec<u64> = tree
        .seek(Bound::Unbounded, Bound::Unbounded, SeekDirection::Backward)
        .map(|(k, _)| k.id_range)
        .collect();
    assert_eq!(backward, (0..1_000).rev().collect::<Vec<_>>());
}

#[test]
fn test_cursor_sees_merges_after_its_position() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();
    let entries: Vec<(u32, u64, u64)> = (0..200).map(|r| (1, r, 1)).collect();
    add_all(&tree, &entries);

    let mut cursor = tree.seek_all();
    assert_eq!(cursor.next().unwrap().0, key(1, 0));

    // Past the first batch, so the cursor has not fetched it yet
    add_all(&tree, &[(1, 150, 0b10)]);

    let seen = cursor.find(|(k, _)| *k == key(1, 150)).unwrap();
    assert_eq!(seen.1.bits, 0b11);
}

// =============================================================================
// Writer Tests
// =============================================================================

#[test]
fn test_single_writer() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();

    let writer = tree.writer().unwrap();
    assert!(tree.has_open_writer());
    assert!(matches!(tree.writer(), Err(ScanStoreError::WriterAlreadyOpen)));

    writer.close().unwrap();
    assert!(!tree.has_open_writer());
    tree.writer().unwrap().close().unwrap();
}

#[test]
fn test_dropped_writer_releases_slot() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();

    {
        let _writer = tree.writer().unwrap();
    }

    assert!(!tree.has_open_writer());
    assert!(tree.writer().is_ok());
}

#[test]
fn test_writer_merges() {
    let (_temp, path) = setup_temp_tree();
    let tree = Tree::create(&path, &[]).unwrap();

    let mut writer = tree.writer().unwrap();
    let k = key(1, 0);
    writer
        .merge(k, TokenScanValue::new(0b0110), MergePolicy::Add, &NoopWriteMonitor)
        .unwrap();
    writer
        .merge(k, TokenScanValue::new(0b0011), MergePolicy::Add, &NoopWriteMonitor)
        .unwrap();
    writer
        .merge(k, TokenScanValue::new(0b0100), MergePolicy::Remove, &NoopWriteMonitor)
        .unwrap();
    // Removing from a missing key creates nothing
    writer
        .merge(key(2, 0), TokenScanValue::new(1), MergePolicy::Remove, &NoopWriteMonitor)
        .unwrap();
    assert_eq!(writer.merged(), 4);
    writer.close().unwrap();

    let all: Vec<_> = tree.seek_all().collect();
    assert_eq!(all, vec![(k, TokenScanValue::new(0b0011))]);
}

// =============================================================================
// Corruption Tests
// =============================================================================

fn checkpointed_tree(path: &PathBuf) {
    let tree = Tree::create(path, b"header").unwrap();
    add_all(&tree, &[(1, 0, 1), (1, 1, 2), (2, 9, 3)]);
    tree.checkpoint(&IoLimiter::UNLIMITED, b"header").unwrap();
}

#[test]
fn test_open_empty_file() {
    let (_temp, path) = setup_temp_tree();
    fs::File::create(&path).unwrap();

    let err = Tree::open(&path).err().unwrap();

    assert!(matches!(err, ScanStoreError::MetadataMismatch(_)));
    assert!(err.is_structural());
}

#[test]
fn test_open_bad_magic() {
    let (_temp, path) = setup_temp_tree();
    checkpointed_tree(&path);

    let mut bytes = fs::read(&path).unwrap();
    bytes[0..4].copy_from_slice(b"NOPE");
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(Tree::open(&path), Err(ScanStoreError::MetadataMismatch(_))));
}

#[test]
fn test_open_flipped_data_byte() {
    let (_temp, path) = setup_temp_tree();
    checkpointed_tree(&path);

    let mut bytes = fs::read(&path).unwrap();
    let index = bytes.len() - 12;
    bytes[index] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(Tree::open(&path), Err(ScanStoreError::Corrupted(_))));
}

#[test]
fn test_open_truncated_file() {
    let (_temp, path) = setup_temp_tree();
    checkpointed_tree(&path);

    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 5).unwrap();

    assert!(matches!(Tree::open(&path), Err(ScanStoreError::Corrupted(_))));
}

#[test]
fn test_open_appended_garbage() {
    let (_temp, path) = setup_temp_tree();
    checkpointed_tree(&path);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[7u8; 18]).unwrap();

    let err = Tree::open(&path).err().unwrap();
    assert!(err.is_structural());
}

// =============================================================================
// Degraded Tree and Consistency Tests
// =============================================================================

#[test]
fn test_degraded_tree_never_writes_file() {
    let (_temp, path) = setup_temp_tree();

    let tree = Tree::degraded(&path);
    add_all(&tree, &[(1, 0, 1)]);
    tree.checkpoint(&IoLimiter::UNLIMITED, b"x").unwrap();

    assert!(!tree.is_persistent());
    assert!(!path.exists());
    assert_eq!(tree.path(), path.as_path());
}

#[test]
fn test_consistency_check_clean() {
    let (_temp, path) = setup_temp_tree();
    checkpointed_tree(&path);
    let tree = Tree::open(&path).unwrap();

    let mut issues: Vec<String> = Vec::new();
    assert!(tree.consistency_check(&mut issues).unwrap());
    assert!(issues.is_empty());
}

#[test]
fn test_consistency_check_reports_corrupt_file() {
    let (_temp, path) = setup_temp_tree();
    checkpointed_tree(&path);
    let tree = Tree::open(&path).unwrap();

    let mut bytes = fs::read(&path).unwrap();
    let index = bytes.len() - 12;
    bytes[index] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let mut issues: Vec<String> = Vec::new();
    assert!(!tree.consistency_check(&mut issues).unwrap());
    assert_eq!(issues.len(), 1);
    assert!(issues[0].contains("checksum"));
}

#[test]
fn test_consistency_check_reports_missing_file() {
    let (_temp, path) = setup_temp_tree();
    checkpointed_tree(&path);
    let tree = Tree::open(&path).unwrap();
    fs::remove_file(&path).unwrap();

    let mut issues: Vec<String> = Vec::new();
    assert!(!tree.consistency_check(&mut issues).unwrap());
    assert!(issues[0].contains("missing"));
}
