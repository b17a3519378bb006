//! Shared, crash-safe alert log.
//!
//! Every camera appends to the same destination, so appends are serialized
//! behind a single mutex. Two layouts are supported:
//!
//! - `JsonArray`: the file is one JSON array that stays valid after every
//!   append. The new element is spliced in over the closing bracket; bytes
//!   before it are never rewritten.
//! - `Ndjson`: one record per line, written with a single append.

use crate::config::{AlertLogConfig, LogFormat};
use crate::record::AlertRecord;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Bytes read per step while scanning the file backwards.
const SCAN_CHUNK: usize = 4096;

/// Errors that can occur while appending to the alert log.
#[derive(Debug, Error)]
pub enum LogWriteError {
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Alert log I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Statistics for the alert log.
#[derive(Debug, Default, Clone)]
pub struct AlertLogStats {
    pub records_written: u64,
    pub write_failures: u64,
    pub recoveries: u64,
}

struct LogState {
    stats: AlertLogStats,
}

/// Single-writer alert log shared by all cameras.
pub struct AlertLog {
    path: PathBuf,
    format: LogFormat,
    state: Mutex<LogState>,
}

impl AlertLog {
    /// Create the log and, for the JSON array layout, initialize a missing
    /// file as an empty array.
    pub fn open(config: &AlertLogConfig) -> Result<Self, LogWriteError> {
        let log = Self {
            path: config.path.clone(),
            format: config.format,
            state: Mutex::new(LogState {
                stats: AlertLogStats::default(),
            }),
        };

        if log.format == LogFormat::JsonArray && !log.path.exists() {
            let mut file = File::create(&log.path).map_err(|e| log.io_error(e))?;
            file.write_all(b"[]").map_err(|e| log.io_error(e))?;
        }

        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> AlertLogStats {
        self.state.lock().stats.clone()
    }

    /// Append one record. On error nothing is retried; the caller decides
    /// whether to drop the record.
    pub fn append(&self, record: &AlertRecord) -> Result<(), LogWriteError> {
        let body = serde_json::to_vec(record)?;

        let mut state = self.state.lock();
        let result = match self.format {
            LogFormat::JsonArray => self.splice_into_array(&body, &mut state.stats),
            LogFormat::Ndjson => self.append_line(&body),
        };

        match result {
            Ok(()) => {
                state.stats.records_written += 1;
                debug!(
                    path = %self.path.display(),
                    kind = record.kind(),
                    camera_id = %record.camera_id(),
                    "Alert record appended"
                );
                Ok(())
            }
            Err(e) => {
                state.stats.write_failures += 1;
                Err(self.io_error(e))
            }
        }
    }

    fn append_line(&self, body: &[u8]) -> io::Result<()> {
        let mut line = Vec::with_capacity(body.len() + 1);
        line.extend_from_slice(body);
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()
    }

    fn splice_into_array(&self, body: &[u8], stats: &mut AlertLogStats) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        let len = file.seek(SeekFrom::End(0))?;

        // The final `]` only closes the array when it follows a complete
        // element or the opening bracket; anything else is a torn write.
        let close = rfind(&mut file, len, |b| b == b']')?;
        let before_close = match close {
            Some(pos) => match rfind(&mut file, pos, |b| !b.is_ascii_whitespace())? {
                Some(p) => Some((p, read_byte(&mut file, p)?)),
                None => None,
            },
            None => None,
        };
        let opening = first_non_whitespace(&mut file, len)?;

        let (pos, prefix): (u64, &[u8]) = match (close, before_close, opening) {
            (Some(pos), Some((at, b'[')), Some((start, b'['))) if at == start => (pos, b"\n"),
            (Some(pos), Some((_, b'}')), Some((_, b'['))) => (pos, b",\n"),
            _ => {
                warn!(
                    path = %self.path.display(),
                    "Alert log has no valid array terminator, resetting"
                );
                stats.recoveries += 1;
                file.set_len(0)?;
                (0, b"[\n")
            }
        };

        let mut chunk = Vec::with_capacity(prefix.len() + body.len() + 2);
        chunk.extend_from_slice(prefix);
        chunk.extend_from_slice(body);
        chunk.extend_from_slice(b"\n]");

        file.seek(SeekFrom::Start(pos))?;
        file.write_all(&chunk)?;
        file.set_len(pos + chunk.len() as u64)?;
        file.flush()?;
        file.sync_data()
    }

    fn io_error(&self, source: io::Error) -> LogWriteError {
        LogWriteError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Position of the last byte before `end` matching `pred`.
fn rfind(file: &mut File, end: u64, pred: impl Fn(u8) -> bool) -> io::Result<Option<u64>> {
    let mut buf = vec![0u8; SCAN_CHUNK];
    let mut end = end;

    while end > 0 {
        let start = end.saturating_sub(SCAN_CHUNK as u64);
        let n = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;

        if let Some(i) = buf[..n].iter().rposition(|b| pred(*b)) {
            return Ok(Some(start + i as u64));
        }
        end = start;
    }

    Ok(None)
}

/// Position and value of the first non-whitespace byte.
fn first_non_whitespace(file: &mut File, len: u64) -> io::Result<Option<(u64, u8)>> {
    let mut buf = vec![0u8; SCAN_CHUNK];
    let mut start = 0u64;

    while start < len {
        let n = ((len - start) as usize).min(SCAN_CHUNK);
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf[..n])?;

        if let Some(i) = buf[..n].iter().position(|b| !b.is_ascii_whitespace()) {
            return Ok(Some((start + i as u64, buf[i])));
        }
        start += n as u64;
    }

    Ok(None)
}

fn read_byte(file: &mut File, pos: u64) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut byte)?;
    Ok(byte[0])
}
