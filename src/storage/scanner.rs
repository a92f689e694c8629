//! Time-bounded record scans
//!
//! [`LogScanner`] yields records with `since <= checked_at < until`. It is a
//! finite, forward-only iterator over one of:
//!
//! - **Memory**: the in-memory probe histories (no log file configured)
//! - **File**: one log file, parsed lazily, optionally restricted to byte ranges
//! - **Merged**: several files merged in time order (rotated logs)
//!
//! File scans rely on the log being append-ordered by wall clock, give or
//! take about an hour of skew. A file scan stops at the first record at or
//! after `until` without reading further, so callers should widen their
//! query by that margin when they need exact edges.

use crate::storage::types::Record;
use chrono::{DateTime, FixedOffset};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// A byte segment of a log file to read. `end: None` reads to EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSegment {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteSegment {
    pub fn to_eof(start: u64) -> Self {
        Self { start, end: None }
    }
}

impl From<Range<u64>> for ByteSegment {
    fn from(range: Range<u64>) -> Self {
        Self {
            start: range.start,
            end: Some(range.end),
        }
    }
}

/// Records from a sequence of in-memory records.
#[derive(Debug)]
pub struct MemoryScanner {
    records: std::vec::IntoIter<Record>,
}

impl MemoryScanner {
    /// Keep records within `[since, until)`, ordered by time then target.
    pub fn new(records: Vec<Record>, since: DateTime<FixedOffset>, until: DateTime<FixedOffset>) -> Self {
        let mut records: Vec<Record> = records
            .into_iter()
            .filter(|r| since <= r.checked_at && r.checked_at < until)
            .collect();
        records.sort_by(|a, b| {
            a.checked_at
                .cmp(&b.checked_at)
                .then_with(|| a.target.as_str().cmp(b.target.as_str()))
        });
        Self {
            records: records.into_iter(),
        }
    }
}

impl Iterator for MemoryScanner {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.records.next()
    }
}

/// Records parsed lazily from one log file.
#[derive(Debug)]
pub struct FileScanner {
    path: PathBuf,
    reader: BufReader<File>,
    segments: VecDeque<ByteSegment>,
    /// End of the segment being read; `Some(None)` reads to EOF
    active: Option<Option<u64>>,
    pos: u64,
    since: DateTime<FixedOffset>,
    until: DateTime<FixedOffset>,
    finished: bool,
    line: Vec<u8>,
}

impl FileScanner {
    /// Scan the whole file.
    pub fn open(
        path: impl AsRef<Path>,
        since: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> std::io::Result<Self> {
        Self::with_segments(path, vec![ByteSegment::to_eof(0)], since, until)
    }

    /// Scan only the given byte segments, in order.
    ///
    /// Segment boundaries must fall on line starts.
    pub fn with_segments(
        path: impl AsRef<Path>,
        segments: Vec<ByteSegment>,
        since: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            reader: BufReader::new(file),
            segments: segments.into(),
            active: None,
            pos: 0,
            since,
            until,
            finished: false,
            line: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn start_next_segment(&mut self) -> bool {
        let Some(segment) = self.segments.pop_front() else {
            return false;
        };
        if let Err(e) = self.reader.seek(SeekFrom::Start(segment.start)) {
            tracing::warn!(path = ?self.path, error = %e, "Failed to seek log file");
            return false;
        }
        self.pos = segment.start;
        self.active = Some(segment.end);
        true
    }
}

impl Iterator for FileScanner {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while !self.finished {
            let end = match self.active {
                Some(end) => end,
                None => {
                    if !self.start_next_segment() {
                        self.finished = true;
                    }
                    continue;
                }
            };
            if end.is_some_and(|end| self.pos >= end) {
                self.active = None;
                continue;
            }

            self.line.clear();
            let n = match self.reader.read_until(b'\n', &mut self.line) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(path = ?self.path, error = %e, "Failed to read log file");
                    self.finished = true;
                    continue;
                }
            };
            if n == 0 {
                self.active = None;
                continue;
            }
            self.pos += n as u64;

            let record: Record = match String::from_utf8_lossy(&self.line).parse() {
                Ok(record) => record,
                Err(e) => {
                    tracing::debug!(path = ?self.path, offset = self.pos, error = %e, "Skipping invalid log line");
                    continue;
                }
            };
            if record.checked_at < self.since {
                continue;
            }
            if record.checked_at >= self.until {
                self.finished = true;
                continue;
            }
            return Some(record);
        }
        None
    }
}

/// Several file scans merged into one time-ordered sequence.
#[derive(Debug)]
pub struct MergedScanner {
    scanners: Vec<FileScanner>,
    heads: Vec<Option<Record>>,
    exhausted: Vec<bool>,
}

impl MergedScanner {
    pub fn new(scanners: Vec<FileScanner>) -> Self {
        let n = scanners.len();
        Self {
            scanners,
            heads: vec![None; n],
            exhausted: vec![false; n],
        }
    }
}

impl Iterator for MergedScanner {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        for (i, scanner) in self.scanners.iter_mut().enumerate() {
            if self.heads[i].is_none() && !self.exhausted[i] {
                self.heads[i] = scanner.next();
                self.exhausted[i] = self.heads[i].is_none();
            }
        }

        let next = self
            .heads
            .iter()
            .enumerate()
            .filter_map(|(i, head)| head.as_ref().map(|r| (i, r.checked_at)))
            .min_by_key(|&(i, checked_at)| (checked_at, i))
            .map(|(i, _)| i)?;
        self.heads[next].take()
    }
}

/// A time-bounded scan over the store's records.
#[derive(Debug)]
pub enum LogScanner {
    Memory(MemoryScanner),
    File(FileScanner),
    Merged(MergedScanner),
}

impl LogScanner {
    /// A scan that yields nothing.
    pub fn empty() -> Self {
        LogScanner::Memory(MemoryScanner {
            records: Vec::new().into_iter(),
        })
    }

    /// Release the underlying files. Dropping the scanner does the same.
    pub fn close(self) {}
}

impl Iterator for LogScanner {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        match self {
            LogScanner::Memory(s) => s.next(),
            LogScanner::File(s) => s.next(),
            LogScanner::Merged(s) => s.next(),
        }
    }
}
