//! Write log decoder
//!
//! Turns the binary journal back into logical events. Prepare and merge
//! records are resolved against the most recent RANGE record, so events carry
//! absolute entity ids and token ids.

use std::fs;
use std::path::Path;

use bytes::{Buf, Bytes};
use tracing::warn;

use crate::error::{Result, ScanStoreError};
use crate::layout::{first_entity_of, TokenScanValue};

use super::{
    write_log_files, TYPE_FLUSH, TYPE_MERGE_ADD, TYPE_MERGE_REMOVE, TYPE_PREPARE_ADD,
    TYPE_PREPARE_REMOVE, TYPE_RANGE, TYPE_SESSION_END,
};

/// One decoded write log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLogEvent {
    /// Subsequent records apply to this range of this token
    Range { id_range: u64, token_id: u32 },

    /// `entity_id` gains `token_id` in transaction `tx_id`
    PrepareAdd {
        tx_id: u64,
        entity_id: u64,
        token_id: u32,
    },

    /// `entity_id` loses `token_id` in transaction `tx_id`
    PrepareRemove {
        tx_id: u64,
        entity_id: u64,
        token_id: u32,
    },

    /// Add delta merged into the stored bitmap
    MergeAdd {
        id_range: u64,
        token_id: u32,
        existing: TokenScanValue,
        delta: TokenScanValue,
    },

    /// Remove delta merged into the stored bitmap
    MergeRemove {
        id_range: u64,
        token_id: u32,
        existing: TokenScanValue,
        delta: TokenScanValue,
    },

    /// Pending changes handed to the tree
    Flush,

    /// Writer session closed
    SessionEnd,
}

/// Sequential decoder over one write log file
pub struct WriteLogReader {
    data: Bytes,
    /// Bytes consumed so far, for error messages
    offset: usize,
    /// Range/token of the last RANGE record
    current: Option<(u64, u32)>,
    /// A truncated record was found at the end
    torn: bool,
}

impl WriteLogReader {
    /// Read a whole write log file
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    /// Decode records held in memory
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
            offset: 0,
            current: None,
            torn: false,
        }
    }

    /// Carry the range context over from the previous file
    pub fn continuing(mut self, previous: &WriteLogReader) -> Self {
        self.current = previous.current;
        self
    }

    /// Whether the file ended in the middle of a record
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Decode the next record, `None` at end of file or at a torn tail
    pub fn next_event(&mut self) -> Result<Option<WriteLogEvent>> {
        if !self.data.has_remaining() || self.torn {
            return Ok(None);
        }

        let tag = self.data[0];
        let payload = match tag {
            TYPE_PREPARE_ADD | TYPE_PREPARE_REMOVE => 9,
            TYPE_MERGE_ADD | TYPE_MERGE_REMOVE => 16,
            TYPE_RANGE => 12,
            TYPE_FLUSH | TYPE_SESSION_END => 0,
            _ => {
                return Err(ScanStoreError::WriteLog(format!(
                    "unknown record type {} at offset {}",
                    tag, self.offset
                )));
            }
        };

        if self.data.remaining() < 1 + payload {
            warn!(
                offset = self.offset,
                remaining = self.data.remaining(),
                "write log ends with a partial record"
            );
            self.torn = true;
            return Ok(None);
        }

        let record_offset = self.offset;
        self.data.advance(1);
        self.offset += 1 + payload;

        let event = match tag {
            TYPE_RANGE => {
                let id_range = self.data.get_u64();
                let token_id = self.data.get_u32();
                self.current = Some((id_range, token_id));
                WriteLogEvent::Range { id_range, token_id }
            }
            TYPE_PREPARE_ADD | TYPE_PREPARE_REMOVE => {
                let tx_id = self.data.get_u64();
                let offset = self.data.get_u8() as u64;
                let (id_range, token_id) = self.require_range(record_offset)?;
                let entity_id = first_entity_of(id_range) + offset;
                if tag == TYPE_PREPARE_ADD {
                    WriteLogEvent::PrepareAdd {
                        tx_id,
                        entity_id,
                        token_id,
                    }
                } else {
                    WriteLogEvent::PrepareRemove {
                        tx_id,
                        entity_id,
                        token_id,
                    }
                }
            }
            TYPE_MERGE_ADD | TYPE_MERGE_REMOVE => {
                let existing = TokenScanValue::new(self.data.get_u64());
                let delta = TokenScanValue::new(self.data.get_u64());
                let (id_range, token_id) = self.require_range(record_offset)?;
                if tag == TYPE_MERGE_ADD {
                    WriteLogEvent::MergeAdd {
                        id_range,
                        token_id,
                        existing,
                        delta,
                    }
                } else {
                    WriteLogEvent::MergeRemove {
                        id_range,
                        token_id,
                        existing,
                        delta,
                    }
                }
            }
            TYPE_FLUSH => WriteLogEvent::Flush,
            _ => WriteLogEvent::SessionEnd,
        };

        Ok(Some(event))
    }

    fn require_range(&self, record_offset: usize) -> Result<(u64, u32)> {
        self.current.ok_or_else(|| {
            ScanStoreError::WriteLog(format!(
                "record at offset {} precedes any range record",
                record_offset
            ))
        })
    }
}

impl Iterator for WriteLogReader {
    type Item = Result<WriteLogEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

/// Decode every write log file of `store_file`, oldest first
pub fn read_events(store_file: &Path) -> Result<Vec<WriteLogEvent>> {
    let mut events = Vec::new();
    let mut previous: Option<WriteLogReader> = None;

    for path in write_log_files(store_file)? {
        let mut reader = WriteLogReader::open(&path)?;
        if let Some(prev) = &previous {
            reader = reader.continuing(prev);
        }
        while let Some(event) = reader.next_event()? {
            events.push(event);
        }
        previous = Some(reader);
    }

    Ok(events)
}
