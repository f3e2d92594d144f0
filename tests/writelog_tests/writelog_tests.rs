//! Tests for the diagnostic write log
//!
//! These tests verify:
//! - Records written by the writers decode back to the same operations
//! - Size based rotation and replay across rotated files
//! - Pruning of old rotated files
//! - Torn tails and malformed records
//! - Transaction filters and the text dump

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use token_scan_store::config::WriteLogConfig;
use token_scan_store::layout::TokenScanValue;
use token_scan_store::writelog::{
    dump_write_log, read_events, rotated_write_log_path, rotated_write_logs, write_log_files,
    write_log_path, DumpOptions, DumpSummary, TxFilter, WriteLog, WriteLogEvent, WriteLogReader,
    WriteMonitor,
};
use token_scan_store::{
    Config, EmptyStream, EntityTokenUpdate, ScanStoreError, TokenScanStore, TokenScanWriter,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store_file() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let store_file = temp_dir.path().join("test.db");
    (temp_dir, store_file)
}

fn log_config(rotation_threshold: u64) -> WriteLogConfig {
    WriteLogConfig {
        enabled: true,
        rotation_threshold,
        prune_threshold: Duration::from_secs(24 * 60 * 60),
    }
}

/// One session adding `offset` of range 0 to token 1 in transaction `tx_id`
fn add_session(log: &WriteLog, tx_id: u64, offset: u32) {
    log.flushed();
    log.range(0, 1);
    log.prepare_add(tx_id, offset);
    log.session_ended();
}

fn prepared_adds(events: &[WriteLogEvent]) -> Vec<(u64, u64)> {
    events
        .iter()
        .filter_map(|e| match *e {
            WriteLogEvent::PrepareAdd {
                tx_id, entity_id, ..
            } => Some((tx_id, entity_id)),
            _ => None,
        })
        .collect()
}

fn logging_store(dir: &Path) -> TokenScanStore {
    let config = Config::builder()
        .store_dir(dir)
        .write_log_enabled(true)
        .build();
    TokenScanStore::open(config, EmptyStream).unwrap()
}

// =============================================================================
// Record Tests
// =============================================================================

#[test]
fn test_records_decode_in_order() {
    let (_temp, store_file) = setup_store_file();
    let log = WriteLog::open(&store_file, log_config(u64::MAX)).unwrap();

    log.flushed();
    log.range(3, 7);
    log.prepare_add(11, 2);
    log.prepare_remove(12, 63);
    log.merge_add(&TokenScanValue::new(0b1), &TokenScanValue::new(0b100));
    log.merge_remove(&TokenScanValue::new(0b101), &TokenScanValue::new(0b1));
    log.session_ended();
    log.close().unwrap();

    let events = read_events(&store_file).unwrap();
    assert_eq!(
        events,
        vec![
            WriteLogEvent::Flush,
            WriteLogEvent::Range {
                id_range: 3,
                token_id: 7
            },
            WriteLogEvent::PrepareAdd {
                tx_id: 11,
                entity_id: 194,
                token_id: 7
            },
            WriteLogEvent::PrepareRemove {
                tx_id: 12,
                entity_id: 255,
                token_id: 7
            },
            WriteLogEvent::MergeAdd {
                id_range: 3,
                token_id: 7,
                existing: TokenScanValue::new(0b1),
                delta: TokenScanValue::new(0b100)
            },
            WriteLogEvent::MergeRemove {
                id_range: 3,
                token_id: 7,
                existing: TokenScanValue::new(0b101),
                delta: TokenScanValue::new(0b1)
            },
            WriteLogEvent::SessionEnd,
        ]
    );
    // 1 + 13 + 10 + 10 + 17 + 17 + 1
    assert_eq!(log.position(), 69);
}

#[test]
fn test_log_reopens_in_append_mode() {
    let (_temp, store_file) = setup_store_file();
    {
        let log = WriteLog::open(&store_file, log_config(u64::MAX)).unwrap();
        add_session(&log, 1, 1);
    }
    {
        let log = WriteLog::open(&store_file, log_config(u64::MAX)).unwrap();
        add_session(&log, 2, 2);
    }

    let events = read_events(&store_file).unwrap();
    assert_eq!(prepared_adds(&events), vec![(1, 1), (2, 2)]);
}

#[test]
fn test_store_writer_sessions_are_logged() {
    let temp = TempDir::new().unwrap();
    let store = logging_store(temp.path());

    let mut writer = store.new_writer().unwrap();
    writer
        .write(&EntityTokenUpdate::token_changes(65, &[], &[1, 2]).with_tx_id(3))
        .unwrap();
    writer.close().unwrap();

    let mut writer = store.new_writer().unwrap();
    writer
        .write(&EntityTokenUpdate::token_changes(65, &[1, 2], &[2]).with_tx_id(4))
        .unwrap();
    writer.close().unwrap();
    store.force(&Default::default()).unwrap();

    let events = read_events(store.path()).unwrap();
    assert_eq!(prepared_adds(&events), vec![(3, 65), (3, 65)]);
    assert!(events.contains(&WriteLogEvent::PrepareRemove {
        tx_id: 4,
        entity_id: 65,
        token_id: 1
    }));
    assert!(events.contains(&WriteLogEvent::MergeRemove {
        id_range: 1,
        token_id: 1,
        existing: TokenScanValue::new(0b10),
        delta: TokenScanValue::new(0b10)
    }));
    // Rebuild at open plus two writer sessions
    let sessions = events
        .iter()
        .filter(|e| **e == WriteLogEvent::SessionEnd)
        .count();
    assert_eq!(sessions, 3);
}

#[test]
fn test_write_log_disabled_by_default() {
    let temp = TempDir::new().unwrap();
    let store = TokenScanStore::open(Config::builder().store_dir(temp.path()).build(), EmptyStream)
        .unwrap();

    let mut writer = store.new_writer().unwrap();
    writer
        .write(&EntityTokenUpdate::token_changes(1, &[], &[1]))
        .unwrap();
    writer.close().unwrap();

    assert!(!write_log_path(store.path()).exists());
}

// =============================================================================
// Rotation and Pruning Tests
// =============================================================================

#[test]
fn test_rotation_and_replay() {
    let (_temp, store_file) = setup_store_file();
    // Each session is 25 bytes, so every second session rotates
    let log = WriteLog::open(&store_file, log_config(40)).unwrap();

    let mut issued = Vec::new();
    for tx_id in 0..10u64 {
        add_session(&log, tx_id, tx_id as u32);
        issued.push((tx_id, tx_id));
    }
    log.close().unwrap();

    assert_eq!(log.rotation_count(), 5);
    assert_eq!(rotated_write_logs(&store_file).unwrap().len(), 5);
    assert_eq!(log.position(), 0);

    let files = write_log_files(&store_file).unwrap();
    assert_eq!(files.len(), 6);
    assert_eq!(files.last().unwrap(), &write_log_path(&store_file));

    let events = read_events(&store_file).unwrap();
    assert_eq!(prepared_adds(&events), issued);
}

#[test]
fn test_range_context_carries_across_rotation() {
    let (_temp, store_file) = setup_store_file();
    fs::write(rotated_write_log_path(&store_file, 5_000), {
        let mut bytes = vec![4u8];
        bytes.extend_from_slice(&2u64.to_be_bytes());
        bytes.extend_from_slice(&9u32.to_be_bytes());
        bytes
    })
    .unwrap();
    fs::write(write_log_path(&store_file), {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&77u64.to_be_bytes());
        bytes.push(1);
        bytes
    })
    .unwrap();

    let events = read_events(&store_file).unwrap();

    assert_eq!(
        events[1],
        WriteLogEvent::PrepareAdd {
            tx_id: 77,
            entity_id: 129,
            token_id: 9
        }
    );
}

#[test]
fn test_old_rotated_files_are_pruned() {
    let (_temp, store_file) = setup_store_file();
    let ancient = rotated_write_log_path(&store_file, 1_000);
    fs::write(&ancient, [6u8]).unwrap();

    let log = WriteLog::open(&store_file, log_config(1)).unwrap();
    add_session(&log, 1, 1);

    assert!(!ancient.exists());
    let remaining = rotated_write_logs(&store_file).unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].0 > 1_000);
}

#[test]
fn test_recent_rotated_files_are_kept() {
    let (_temp, store_file) = setup_store_file();
    let config = WriteLogConfig {
        enabled: true,
        rotation_threshold: 1,
        prune_threshold: Duration::from_secs(3_600),
    };

    let log = WriteLog::open(&store_file, config).unwrap();
    add_session(&log, 1, 1);
    add_session(&log, 2, 2);

    assert_eq!(rotated_write_logs(&store_file).unwrap().len(), 2);
}

// =============================================================================
// Decoder Edge Case Tests
// =============================================================================

#[test]
fn test_torn_tail_is_ignored() {
    let (_temp, store_file) = setup_store_file();
    {
        let log = WriteLog::open(&store_file, log_config(u64::MAX)).unwrap();
        add_session(&log, 5, 5);
        log.close().unwrap();
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(write_log_path(&store_file))
        .unwrap();
    // Half of a PREPARE_ADD record
    file.write_all(&[0u8, 0, 0, 0, 1]).unwrap();

    let events = read_events(&store_file).unwrap();
    assert_eq!(prepared_adds(&events), vec![(5, 5)]);

    let mut reader = WriteLogReader::open(&write_log_path(&store_file)).unwrap();
    while reader.next_event().unwrap().is_some() {}
    assert!(reader.is_torn());
}

#[test]
fn test_unknown_record_type() {
    let mut reader = WriteLogReader::from_bytes(vec![5, 42]);

    assert_eq!(reader.next_event().unwrap(), Some(WriteLogEvent::Flush));
    assert!(matches!(reader.next_event(), Err(ScanStoreError::WriteLog(_))));
}

#[test]
fn test_prepare_before_range() {
    let mut bytes = vec![1u8];
    bytes.extend_from_slice(&3u64.to_be_bytes());
    bytes.push(0);

    let mut reader = WriteLogReader::from_bytes(bytes);

    assert!(matches!(reader.next_event(), Err(ScanStoreError::WriteLog(_))));
}

#[test]
fn test_reader_as_iterator() {
    let reader = WriteLogReader::from_bytes(vec![5, 6, 5]);

    let events: Vec<WriteLogEvent> = reader.map(|e| e.unwrap()).collect();

    assert_eq!(
        events,
        vec![WriteLogEvent::Flush, WriteLogEvent::SessionEnd, WriteLogEvent::Flush]
    );
}

// =============================================================================
// Transaction Filter Tests
// =============================================================================

#[test]
fn test_tx_filter_parse() {
    let filter = TxFilter::parse("1, 5-9,42").unwrap();

    for tx_id in [1u64, 5, 7, 9, 42] {
        assert!(filter.contains(tx_id), "should contain {}", tx_id);
    }
    for tx_id in [0u64, 2, 4, 10, 41, 43] {
        assert!(!filter.contains(tx_id), "should not contain {}", tx_id);
    }
}

#[test]
fn test_tx_filter_invalid() {
    assert!(matches!(TxFilter::parse("a"), Err(ScanStoreError::Config(_))));
    assert!(matches!(TxFilter::parse("9-5"), Err(ScanStoreError::Config(_))));
    assert!(matches!(TxFilter::parse(" , "), Err(ScanStoreError::Config(_))));
    assert!(matches!(TxFilter::parse("1-"), Err(ScanStoreError::Config(_))));
}

// =============================================================================
// Dump Tests
// =============================================================================

fn dump_to_string(store_file: &Path, options: &DumpOptions) -> (String, DumpSummary) {
    let mut out = Vec::new();
    let summary = dump_write_log(store_file, options, &mut out).unwrap();
    (String::from_utf8(out).unwrap(), summary)
}

#[test]
fn test_dump_entity_changes() {
    let (_temp, store_file) = setup_store_file();
    let log = WriteLog::open(&store_file, log_config(u64::MAX)).unwrap();
    log.range(1, 4);
    log.prepare_add(3, 1);
    log.prepare_remove(8, 2);
    log.merge_add(&TokenScanValue::new(0), &TokenScanValue::new(0b10));
    log.session_ended();

    let (text, summary) = dump_to_string(&store_file, &DumpOptions::default());

    assert!(text.contains("tx:3 +65 token:4"));
    assert!(text.contains("tx:8 -66 token:4"));
    assert!(!text.contains("merge-add"));
    assert_eq!(summary.files, 1);
    assert_eq!(summary.records, 5);
    assert_eq!(summary.entity_changes, 2);
    assert_eq!(summary.sessions, 1);
    assert_eq!(summary.torn_files, 0);
}

#[test]
fn test_dump_with_tx_filter() {
    let (_temp, store_file) = setup_store_file();
    let log = WriteLog::open(&store_file, log_config(u64::MAX)).unwrap();
    for tx_id in 1..=10u64 {
        add_session(&log, tx_id, tx_id as u32);
    }

    let options = DumpOptions {
        tx_filter: Some(TxFilter::parse("2,5-6").unwrap()),
        verbose: false,
    };
    let (text, summary) = dump_to_string(&store_file, &options);

    assert_eq!(summary.entity_changes, 3);
    assert!(text.contains("tx:2 +2 token:1"));
    assert!(text.contains("tx:6 +6 token:1"));
    assert!(!text.contains("tx:3 "));
}

#[test]
fn test_dump_verbose() {
    let (_temp, store_file) = setup_store_file();
    let log = WriteLog::open(&store_file, log_config(u64::MAX)).unwrap();
    log.flushed();
    log.range(0, 2);
    log.merge_add(&TokenScanValue::new(0b1), &TokenScanValue::new(0b10));
    log.session_ended();

    let options = DumpOptions {
        tx_filter: None,
        verbose: true,
    };
    let (text, _) = dump_to_string(&store_file, &options);

    assert!(text.contains("flush"));
    assert!(text.contains("range:0 token:2"));
    assert!(text.contains("merge-add range:0 token:2"));
    assert!(text.contains(&format!("  result   {:064b}", 0b11)));
    assert!(text.contains("--- session end ---"));
}

#[test]
fn test_dump_reports_torn_file() {
    let (_temp, store_file) = setup_store_file();
    fs::write(write_log_path(&store_file), [4u8, 0, 0]).unwrap();

    let (text, summary) = dump_to_string(&store_file, &DumpOptions::default());

    assert_eq!(summary.torn_files, 1);
    assert!(text.contains("(partial record at end of file)"));
}
