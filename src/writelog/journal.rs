//! File-backed write monitor
//!
//! Appends one binary record per observed write to `<store>.writelog`,
//! rotating the file at session end once it outgrows the configured size and
//! pruning rotated files past the configured age.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::WriteLogConfig;
use crate::error::Result;
use crate::layout::TokenScanValue;

use super::{
    rotated_write_log_path, rotated_write_logs, write_log_path, WriteMonitor, TYPE_FLUSH,
    TYPE_MERGE_ADD, TYPE_MERGE_REMOVE, TYPE_PREPARE_ADD, TYPE_PREPARE_REMOVE, TYPE_RANGE,
    TYPE_SESSION_END,
};

/// Write buffer size of the live file
const BUFFER_SIZE: usize = 1024 * 1024;

/// Open live file plus the scratch buffer records are encoded into
struct Channel {
    writer: BufWriter<File>,
    /// Bytes in the live file, including buffered ones
    position: u64,
    scratch: BytesMut,
}

/// Binary journal of index writes
///
/// The channel mutex is held for each record, for `force`, and across a
/// rotation, so `force` never sees a half-swapped file.
pub struct WriteLog {
    store_file: PathBuf,
    config: WriteLogConfig,
    channel: Mutex<Channel>,
    rotations: AtomicU64,
}

impl WriteLog {
    /// Open (or create) the live write log of `store_file`
    pub fn open(store_file: &Path, config: WriteLogConfig) -> Result<Self> {
        let path = write_log_path(store_file);
        let file = open_live(&path, false)?;
        let position = file.metadata()?.len();

        debug!(path = %path.display(), position, "opened write log");

        Ok(Self {
            store_file: store_file.to_path_buf(),
            config,
            channel: Mutex::new(Channel {
                writer: BufWriter::with_capacity(BUFFER_SIZE, file),
                position,
                scratch: BytesMut::with_capacity(32),
            }),
            rotations: AtomicU64::new(0),
        })
    }

    /// Path of the live file
    pub fn path(&self) -> PathBuf {
        write_log_path(&self.store_file)
    }

    /// Bytes written to the live file so far
    pub fn position(&self) -> u64 {
        self.channel.lock().position
    }

    /// Rotations performed since open
    pub fn rotation_count(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Encode one record and append it
    fn record(&self, encode: impl FnOnce(&mut BytesMut)) {
        let mut channel = self.channel.lock();
        let Channel {
            writer,
            position,
            scratch,
        } = &mut *channel;

        scratch.clear();
        encode(scratch);
        match writer.write_all(&scratch[..]) {
            Ok(()) => *position += scratch.len() as u64,
            Err(e) => warn!(error = %e, "failed to append write log record"),
        }
    }

    /// Swap the live file for a fresh one (channel lock held)
    fn rotate(&self, channel: &mut Channel) -> Result<()> {
        channel.writer.flush()?;
        channel.writer.get_ref().sync_all()?;

        let live = write_log_path(&self.store_file);
        let mut millis = epoch_millis();
        let mut rotated = rotated_write_log_path(&self.store_file, millis);
        while rotated.exists() {
            millis += 1;
            rotated = rotated_write_log_path(&self.store_file, millis);
        }

        fs::rename(&live, &rotated)?;
        channel.writer = BufWriter::with_capacity(BUFFER_SIZE, open_live(&live, true)?);
        let rotated_bytes = channel.position;
        channel.position = 0;
        self.rotations.fetch_add(1, Ordering::Relaxed);

        info!(
            rotated = %rotated.display(),
            bytes = rotated_bytes,
            "rotated write log"
        );
        Ok(())
    }

    /// Delete rotated files older than the prune threshold
    fn prune(&self) -> Result<()> {
        let now = epoch_millis();
        let max_age = self.config.prune_threshold.as_millis() as u64;

        for (millis, path) in rotated_write_logs(&self.store_file)? {
            if now.saturating_sub(millis) > max_age {
                fs::remove_file(&path)?;
                debug!(path = %path.display(), "pruned write log");
            }
        }
        Ok(())
    }

    fn end_session(&self) -> Result<()> {
        {
            let mut guard = self.channel.lock();
            let channel = &mut *guard;
            channel.writer.write_all(&[TYPE_SESSION_END])?;
            channel.position += 1;
            channel.writer.flush()?;

            if channel.position < self.config.rotation_threshold {
                return Ok(());
            }
            self.rotate(channel)?;
        }
        self.prune()
    }
}

impl WriteMonitor for WriteLog {
    fn range(&self, id_range: u64, token_id: u32) {
        self.record(|buf| {
            buf.put_u8(TYPE_RANGE);
            buf.put_u64(id_range);
            buf.put_u32(token_id);
        });
    }

    fn prepare_add(&self, tx_id: u64, offset: u32) {
        self.record(|buf| {
            buf.put_u8(TYPE_PREPARE_ADD);
            buf.put_u64(tx_id);
            buf.put_u8(offset as u8);
        });
    }

    fn prepare_remove(&self, tx_id: u64, offset: u32) {
        self.record(|buf| {
            buf.put_u8(TYPE_PREPARE_REMOVE);
            buf.put_u64(tx_id);
            buf.put_u8(offset as u8);
        });
    }

    fn merge_add(&self, existing: &TokenScanValue, delta: &TokenScanValue) {
        self.record(|buf| {
            buf.put_u8(TYPE_MERGE_ADD);
            buf.put_u64(existing.bits);
            buf.put_u64(delta.bits);
        });
    }

    fn merge_remove(&self, existing: &TokenScanValue, delta: &TokenScanValue) {
        self.record(|buf| {
            buf.put_u8(TYPE_MERGE_REMOVE);
            buf.put_u64(existing.bits);
            buf.put_u64(delta.bits);
        });
    }

    fn flushed(&self) {
        self.record(|buf| buf.put_u8(TYPE_FLUSH));
    }

    fn session_ended(&self) {
        if let Err(e) = self.end_session() {
            warn!(error = %e, path = %self.path().display(), "write log session end failed");
        }
    }

    fn force(&self) -> Result<()> {
        let mut channel = self.channel.lock();
        channel.writer.flush()?;
        channel.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut channel = self.channel.lock();
        channel.writer.flush()?;
        channel.writer.get_ref().sync_all()?;
        debug!(path = %self.path().display(), "closed write log");
        Ok(())
    }
}

fn open_live(path: &Path, truncate: bool) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .append(!truncate)
        .write(true)
        .truncate(truncate)
        .open(path)?;
    Ok(file)
}

/// Milliseconds since the unix epoch
pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
