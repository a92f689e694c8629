//! Background log writer
//!
//! All disk I/O for appends happens on one blocking task that drains a
//! bounded queue. For every record it:
//!
//! 1. opens the file named by the log pattern for the current time (append mode)
//! 2. appends the serialized line
//! 3. indexes the written byte range, rebuilding the index when it is stale
//! 4. echoes the line to the console sink
//!
//! A failed append never propagates to the reporter. It is kept in a small
//! rolling error log and surfaced as a synthetic `FAILURE` record for the
//! store's own `statuslog:log` target; the first successful append afterwards
//! resolves it with a `HEALTHY` record.

use crate::index::{Indexer, Pattern};
use crate::storage::clock::Clock;
use crate::storage::engine::Shared;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{internal_log_target, Record, Status};
use chrono::SecondsFormat;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the write queue. A full queue blocks reporters.
pub const WRITE_QUEUE_LEN: usize = 32;

/// Number of write errors kept for [`crate::storage::Store::errors`].
pub const ERROR_LOG_LEN: usize = 10;

/// Line-oriented sink that receives every reported record.
pub type Console = Box<dyn Write + Send>;

/// Messages consumed by the writer task
#[derive(Debug)]
pub(crate) enum WriterMessage {
    Append(Record),
    Shutdown,
}

/// The index together with the file it describes.
#[derive(Debug, Default)]
pub(crate) struct IndexState {
    pub path: Option<PathBuf>,
    pub indexer: Indexer,
}

impl IndexState {
    pub fn new(interval: usize) -> Self {
        Self {
            path: None,
            indexer: Indexer::new(interval),
        }
    }
}

/// Health of the write path.
#[derive(Debug)]
pub(crate) struct WriterHealth {
    healthy: bool,
    /// Oldest first, at most [`ERROR_LOG_LEN`]
    errors: VecDeque<String>,
}

impl Default for WriterHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            errors: VecDeque::with_capacity(ERROR_LOG_LEN),
        }
    }
}

impl WriterHealth {
    fn record_failure(&mut self, entry: String) {
        self.healthy = false;
        self.errors.push_back(entry);
        while self.errors.len() > ERROR_LOG_LEN {
            self.errors.pop_front();
        }
    }

    fn record_success(&mut self) {
        self.healthy = true;
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn snapshot(&self) -> (bool, Vec<String>) {
        (self.healthy, self.errors.iter().cloned().collect())
    }
}

/// Splits a stream into lines, yielding each line's byte span and parsed record.
///
/// Lines that fail to parse yield `None`. A trailing line without a newline
/// is still yielded.
pub(crate) struct LineSpans<R> {
    reader: R,
    offset: u64,
    line: Vec<u8>,
}

impl<R: BufRead> LineSpans<R> {
    /// `offset` is the stream position of `reader`.
    pub fn new(reader: R, offset: u64) -> Self {
        Self {
            reader,
            offset,
            line: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for LineSpans<R> {
    type Item = io::Result<(u64, u64, Option<Record>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        let n = match self.reader.read_until(b'\n', &mut self.line) {
            Ok(0) => return None,
            Ok(n) => n as u64,
            Err(e) => return Some(Err(e)),
        };
        let start = self.offset;
        self.offset += n;
        let record = String::from_utf8_lossy(&self.line).parse::<Record>().ok();
        Some(Ok((start, self.offset, record)))
    }
}

/// Index the lines of `reader` into `indexer`, calling `each` for every parsed record.
pub(crate) fn index_lines<R: BufRead>(
    indexer: &mut Indexer,
    reader: R,
    offset: u64,
    limit: Option<u64>,
    mut each: impl FnMut(Record),
) -> StorageResult<()> {
    for span in LineSpans::new(reader, offset) {
        let (start, end, record) = span?;
        if limit.is_some_and(|limit| end > limit) {
            break;
        }
        match record {
            Some(record) => {
                indexer.append_entry(start, end, &record.checked_at)?;
                each(record);
            }
            None => indexer.append_invalid_range(start, end)?,
        }
    }
    Ok(())
}

/// Position `reader` at the first line start at or after `offset`.
///
/// Returns the new offset. Offset 0 is always a line start; elsewhere the
/// (possibly partial) line containing `offset` is skipped.
pub(crate) fn skip_partial_line<R: BufRead + Seek>(reader: &mut R, offset: u64) -> io::Result<u64> {
    if offset == 0 {
        reader.seek(SeekFrom::Start(0))?;
        return Ok(0);
    }
    reader.seek(SeekFrom::Start(offset))?;
    let mut skipped = Vec::new();
    let n = reader.read_until(b'\n', &mut skipped)? as u64;
    Ok(offset + n)
}

/// The writer task state.
pub(crate) struct LogWriter {
    pattern: Option<Pattern>,
    console: Console,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    restore_bytes: u64,
}

impl LogWriter {
    pub fn new(
        pattern: Option<Pattern>,
        console: Console,
        clock: Arc<dyn Clock>,
        shared: Arc<Shared>,
        restore_bytes: u64,
    ) -> Self {
        Self {
            pattern,
            console,
            clock,
            shared,
            restore_bytes,
        }
    }

    /// Drain the queue until shutdown or until every sender is gone.
    ///
    /// Must run on a blocking thread.
    pub fn run(mut self, mut rx: mpsc::Receiver<WriterMessage>) {
        tracing::debug!(pattern = ?self.pattern.as_ref().map(|p| p.to_string()), "Log writer started");
        while let Some(message) = rx.blocking_recv() {
            match message {
                WriterMessage::Append(record) => self.write(record),
                WriterMessage::Shutdown => break,
            }
        }
        if let Err(e) = self.console.flush() {
            tracing::warn!(error = %e, "Failed to flush console");
        }
        tracing::debug!("Log writer stopped");
    }

    fn write(&mut self, record: Record) {
        let line = record.to_string();
        let result = match self.pattern.clone() {
            Some(pattern) => self.append(&pattern, &line),
            None => Ok(()),
        };
        self.echo(&line);

        match result {
            Ok(()) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
    }

    fn append(&mut self, pattern: &Pattern, line: &str) -> StorageResult<()> {
        let path = PathBuf::from(pattern.build(&self.clock.now()));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let start = file.metadata()?.len();
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        file.write_all(&buf)?;

        self.index_append(&path, start, start + buf.len() as u64, line);
        Ok(())
    }

    /// Index a just-written line. Index trouble never fails the append.
    fn index_append(&self, path: &Path, start: u64, end: u64, line: &str) {
        let mut state = self.shared.index.lock();

        if state.path.as_deref() != Some(path) {
            if state.path.is_some() {
                tracing::info!(path = ?path, "Log file rotated");
            }
            state.indexer.reset();
            state.path = Some(path.to_path_buf());
        }

        if state.indexer.end().unwrap_or(0) != start {
            if !state.indexer.is_empty() {
                tracing::warn!(path = ?path, start, expected = ?state.indexer.end(), "Index is stale, rebuilding");
            }
            state.indexer.reset();
            if let Err(e) = self.rebuild_index(&mut state.indexer, path, start) {
                tracing::warn!(path = ?path, error = %e, "Failed to rebuild index");
                state.indexer.reset();
                return;
            }
        }

        let appended = match line.parse::<Record>() {
            Ok(record) => state.indexer.append_entry(start, end, &record.checked_at),
            Err(_) => state.indexer.append_invalid_range(start, end),
        };
        if let Err(e) = appended {
            tracing::warn!(path = ?path, error = %e, "Dropping index after failed append");
            state.indexer.reset();
        }
    }

    /// Re-index `[0, upto)` of `path`, or only its last `restore_bytes` bytes.
    fn rebuild_index(&self, indexer: &mut Indexer, path: &Path, upto: u64) -> StorageResult<()> {
        if upto == 0 {
            return Ok(());
        }
        let mut reader = BufReader::new(File::open(path)?);
        let from = skip_partial_line(&mut reader, upto.saturating_sub(self.restore_bytes))?;
        index_lines(indexer, reader, from, Some(upto), |_| {})?;
        if indexer.end().unwrap_or(from) != upto {
            // Unterminated prefix; start indexing at the append point instead.
            indexer.reset();
        }
        tracing::debug!(path = ?path, records = indexer.record_count(), "Index rebuilt");
        Ok(())
    }

    fn echo(&mut self, line: &str) {
        if let Err(e) = writeln!(self.console, "{line}") {
            tracing::warn!(error = %e, "Failed to write to console");
        }
    }

    // The synthetic record is applied before the health flag flips, so
    // anyone observing the flag also sees the record.
    fn on_failure(&mut self, err: StorageError) {
        let now = self.clock.now();
        let message = format!("failed to write log: {err}");
        tracing::error!(error = %err, "Failed to write log");

        self.internal_record(Record::new(now, Status::Failure, internal_log_target()).message(message.clone()));
        self.shared
            .health
            .lock()
            .record_failure(format!("{}\t{}", now.to_rfc3339_opts(SecondsFormat::Secs, true), message));
    }

    fn on_success(&mut self) {
        if self.shared.health.lock().is_healthy() {
            return;
        }
        tracing::info!("Log writes recovered");
        let record = Record::new(self.clock.now(), Status::Healthy, internal_log_target())
            .message("log writes recovered");
        self.internal_record(record);
        self.shared.health.lock().record_success();
    }

    /// Surface a write-path record without queueing it for disk.
    ///
    /// The store reports on itself, so its own target is always active.
    fn internal_record(&mut self, record: Record) {
        self.echo(&record.to_string());
        let source = record.target.clone();
        let notices = self
            .shared
            .history
            .blocking_write()
            .apply(Some(&source), &record, true);
        self.shared.notify(&notices);
    }
}
