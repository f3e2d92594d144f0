//! Tree file I/O
//!
//! Whole-file image writes (checkpoints) and reads (open, consistency check).

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{Result, ScanStoreError};
use crate::layout::{TokenScanKey, TokenScanValue, KEY_SIZE, RECORD_SIZE, VALUE_SIZE};

use super::{IoLimiter, FIXED_HEADER_SIZE, FOOTER_SIZE, MAGIC, VERSION};

/// Records written between limiter checks
const LIMIT_CHUNK_RECORDS: u64 = 4096;

/// Decoded contents of a tree file
pub(super) struct TreeImage {
    pub header: Vec<u8>,
    pub entries: BTreeMap<TokenScanKey, TokenScanValue>,
}

/// Write a complete tree image to `path`.
///
/// Entries must come in ascending key order. The image goes to a sibling
/// temp file first and is renamed into place once synced, so a crash leaves
/// either the old or the new image. Returns the file size.
pub(super) fn write_tree_file(
    path: &Path,
    header: &[u8],
    entries: impl Iterator<Item = (TokenScanKey, TokenScanValue)>,
    entry_count: u64,
    limiter: &IoLimiter,
) -> Result<u64> {
    let tmp_path = temp_path(path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;

    let mut writer = BufWriter::new(file);
    let mut hasher = crc32fast::Hasher::new();
    let started = Instant::now();

    // Header
    let mut fixed = [0u8; FIXED_HEADER_SIZE];
    fixed[0..4].copy_from_slice(MAGIC);
    fixed[4..6].copy_from_slice(&VERSION.to_le_bytes());
    fixed[6..8].copy_from_slice(&(KEY_SIZE as u16).to_le_bytes());
    fixed[8..10].copy_from_slice(&(VALUE_SIZE as u16).to_le_bytes());
    fixed[10..14].copy_from_slice(&(header.len() as u32).to_le_bytes());
    let count_bytes = entry_count.to_le_bytes();

    for part in [&fixed[..], header, &count_bytes[..]] {
        writer.write_all(part)?;
        hasher.update(part);
    }

    // Data block
    let mut record = [0u8; RECORD_SIZE];
    let mut written: u64 = 0;
    for (key, value) in entries {
        key.write_to(&mut record[..KEY_SIZE]);
        value.write_to(&mut record[KEY_SIZE..]);
        writer.write_all(&record)?;
        hasher.update(&record);

        written += 1;
        if written % LIMIT_CHUNK_RECORDS == 0 {
            limiter.maybe_limit(started, written * RECORD_SIZE as u64);
        }
    }

    if written != entry_count {
        return Err(ScanStoreError::IllegalState(format!(
            "Tree image announced {} entries but {} were written",
            entry_count, written
        )));
    }

    // Footer
    writer.write_all(&hasher.finalize().to_le_bytes())?;
    writer.write_all(&[0u8; 4])?; // Padding for alignment
    writer.flush()?;

    let file = writer.into_inner().map_err(|e| {
        ScanStoreError::Io(io::Error::new(
            e.error().kind(),
            format!("Failed to flush tree file: {}", e.error()),
        ))
    })?;
    file.sync_all()?;
    let size = file.metadata()?.len();
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(size)
}

/// Read and validate a complete tree image
pub(super) fn read_tree_file(path: &Path) -> Result<TreeImage> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ScanStoreError::TreeFileNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    if bytes.len() < FIXED_HEADER_SIZE {
        return Err(ScanStoreError::MetadataMismatch(format!(
            "file is {} bytes, shorter than the {} byte header",
            bytes.len(),
            FIXED_HEADER_SIZE
        )));
    }

    // Validate fixed header
    if &bytes[0..4] != MAGIC {
        return Err(ScanStoreError::MetadataMismatch(format!(
            "invalid magic: expected TSST, got {:?}",
            &bytes[0..4]
        )));
    }

    let version = read_u16(&bytes[4..6]);
    if version != VERSION {
        return Err(ScanStoreError::MetadataMismatch(format!(
            "unsupported format version: {}",
            version
        )));
    }

    let key_size = read_u16(&bytes[6..8]) as usize;
    let value_size = read_u16(&bytes[8..10]) as usize;
    if key_size != KEY_SIZE || value_size != VALUE_SIZE {
        return Err(ScanStoreError::MetadataMismatch(format!(
            "record layout {}+{} bytes, expected {}+{}",
            key_size, value_size, KEY_SIZE, VALUE_SIZE
        )));
    }

    let header_len = read_u32(&bytes[10..14]) as usize;
    let count_offset = FIXED_HEADER_SIZE + header_len;
    let data_offset = count_offset + 8;
    if bytes.len() < data_offset + FOOTER_SIZE {
        return Err(ScanStoreError::Corrupted(format!(
            "header announces {} payload bytes but file is {} bytes",
            header_len,
            bytes.len()
        )));
    }

    let header = bytes[FIXED_HEADER_SIZE..count_offset].to_vec();
    let entry_count = read_u64(&bytes[count_offset..data_offset]);

    let expected_len = (entry_count as u128) * RECORD_SIZE as u128
        + data_offset as u128
        + FOOTER_SIZE as u128;
    if expected_len != bytes.len() as u128 {
        return Err(ScanStoreError::Corrupted(format!(
            "{} entries need {} bytes, file is {} bytes",
            entry_count,
            expected_len,
            bytes.len()
        )));
    }

    // Validate checksum
    let footer_offset = bytes.len() - FOOTER_SIZE;
    let stored_crc = read_u32(&bytes[footer_offset..footer_offset + 4]);
    let actual_crc = crc32fast::hash(&bytes[..footer_offset]);
    if stored_crc != actual_crc {
        return Err(ScanStoreError::Corrupted(format!(
            "checksum mismatch: stored {:08x}, computed {:08x}",
            stored_crc, actual_crc
        )));
    }

    // Parse records
    let mut entries = BTreeMap::new();
    let mut previous: Option<TokenScanKey> = None;
    for record in bytes[data_offset..footer_offset].chunks_exact(RECORD_SIZE) {
        let key = TokenScanKey::read_from(&record[..KEY_SIZE])?;
        let value = TokenScanValue::read_from(&record[KEY_SIZE..])?;

        if let Some(prev) = previous {
            if key <= prev {
                return Err(ScanStoreError::Corrupted(format!(
                    "keys out of order: {} follows {}",
                    key, prev
                )));
            }
        }
        previous = Some(key);
        entries.insert(key, value);
    }

    Ok(TreeImage { header, entries })
}

/// Sibling path used while a checkpoint is being written
fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn read_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[..8]);
    u64::from_le_bytes(buf)
}
