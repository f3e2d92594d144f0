//! Human readable write log dump
//!
//! Used by the `dump-writelog` tool command to inspect what the writers did.

use std::io::Write;
use std::path::Path;

use crate::error::{Result, ScanStoreError};
use crate::layout::TokenScanValue;

use super::{write_log_files, WriteLogEvent, WriteLogReader};

/// Set of transaction id ranges, parsed from `"3,10-20,42"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFilter {
    /// Inclusive `(low, high)` pairs
    ranges: Vec<(u64, u64)>,
}

impl TxFilter {
    /// Parse comma separated single ids and `low-high` ranges
    pub fn parse(spec: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let range = match part.split_once('-') {
                Some((low, high)) => (parse_tx(low, part)?, parse_tx(high, part)?),
                None => {
                    let id = parse_tx(part, part)?;
                    (id, id)
                }
            };
            if range.0 > range.1 {
                return Err(ScanStoreError::Config(format!(
                    "transaction range '{}' has its low end above its high end",
                    part
                )));
            }
            ranges.push(range);
        }

        if ranges.is_empty() {
            return Err(ScanStoreError::Config(format!(
                "transaction filter '{}' names no transactions",
                spec
            )));
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, tx_id: u64) -> bool {
        self.ranges
            .iter()
            .any(|(low, high)| (*low..=*high).contains(&tx_id))
    }
}

fn parse_tx(text: &str, part: &str) -> Result<u64> {
    text.trim().parse().map_err(|_| {
        ScanStoreError::Config(format!("invalid transaction id '{}' in '{}'", text, part))
    })
}

/// What to print
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Only print entity changes of these transactions
    pub tx_filter: Option<TxFilter>,

    /// Also print ranges, merges (as aligned bitmaps), flushes and session ends
    pub verbose: bool,
}

/// Counters gathered while dumping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub files: usize,
    pub records: u64,
    pub entity_changes: u64,
    pub sessions: u64,
    pub torn_files: usize,
}

/// Print every write log file of `store_file`, oldest first, to `out`
pub fn dump_write_log(
    store_file: &Path,
    options: &DumpOptions,
    out: &mut dyn Write,
) -> Result<DumpSummary> {
    let mut summary = DumpSummary::default();
    let mut previous: Option<WriteLogReader> = None;

    for path in write_log_files(store_file)? {
        writeln!(out, "=== {} ===", path.display())?;
        let mut reader = WriteLogReader::open(&path)?;
        if let Some(prev) = &previous {
            reader = reader.continuing(prev);
        }

        while let Some(event) = reader.next_event()? {
            summary.records += 1;
            write_event(&event, options, &mut summary, out)?;
        }

        if reader.is_torn() {
            summary.torn_files += 1;
            writeln!(out, "(partial record at end of file)")?;
        }
        summary.files += 1;
        previous = Some(reader);
    }

    Ok(summary)
}

fn write_event(
    event: &WriteLogEvent,
    options: &DumpOptions,
    summary: &mut DumpSummary,
    out: &mut dyn Write,
) -> Result<()> {
    let unfiltered = options.tx_filter.is_none();
    match *event {
        WriteLogEvent::PrepareAdd {
            tx_id,
            entity_id,
            token_id,
        } => {
            if options.tx_filter.as_ref().map_or(true, |f| f.contains(tx_id)) {
                summary.entity_changes += 1;
                writeln!(out, "tx:{} +{} token:{}", tx_id, entity_id, token_id)?;
            }
        }
        WriteLogEvent::PrepareRemove {
            tx_id,
            entity_id,
            token_id,
        } => {
            if options.tx_filter.as_ref().map_or(true, |f| f.contains(tx_id)) {
                summary.entity_changes += 1;
                writeln!(out, "tx:{} -{} token:{}", tx_id, entity_id, token_id)?;
            }
        }
        WriteLogEvent::Range { id_range, token_id } => {
            if options.verbose && unfiltered {
                writeln!(out, "range:{} token:{}", id_range, token_id)?;
            }
        }
        WriteLogEvent::MergeAdd {
            id_range,
            token_id,
            existing,
            delta,
        } => {
            if options.verbose && unfiltered {
                let mut result = existing;
                result.add(&delta);
                write_merge(out, "merge-add", id_range, token_id, &existing, &delta, &result)?;
            }
        }
        WriteLogEvent::MergeRemove {
            id_range,
            token_id,
            existing,
            delta,
        } => {
            if options.verbose && unfiltered {
                let mut result = existing;
                result.remove(&delta);
                write_merge(out, "merge-remove", id_range, token_id, &existing, &delta, &result)?;
            }
        }
        WriteLogEvent::Flush => {
            if options.verbose && unfiltered {
                writeln!(out, "flush")?;
            }
        }
        WriteLogEvent::SessionEnd => {
            summary.sessions += 1;
            if options.verbose {
                writeln!(out, "--- session end ---")?;
            }
        }
    }
    Ok(())
}

/// Bitmaps are printed one above the other so changed bits line up
fn write_merge(
    out: &mut dyn Write,
    label: &str,
    id_range: u64,
    token_id: u32,
    existing: &TokenScanValue,
    delta: &TokenScanValue,
    result: &TokenScanValue,
) -> Result<()> {
    writeln!(out, "{} range:{} token:{}", label, id_range, token_id)?;
    writeln!(out, "  existing {}", existing)?;
    writeln!(out, "  delta    {}", delta)?;
    writeln!(out, "  result   {}", result)?;
    Ok(())
}
