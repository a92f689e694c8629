//! Status store
//!
//! The store orchestrates all components:
//! - Write path: Record → queue → writer task → log file + index + console
//! - Live state: Record → incident tracker + probe history (under one lock)
//! - Read path: open_log → Pattern → Indexer / point search → FileScanner
//!
//! Locks are never nested: the history lives behind a Tokio `RwLock`, the
//! index and the write-health log each behind their own `parking_lot` mutex.

use crate::index::{point_search, point_search_range, Indexer, Pattern, DEFAULT_PERIOD_RECORDS};
use crate::storage::clock::{Clock, SystemClock};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::history::{ProbeHistoryMap, ProbeHistorySnapshot, PROBE_HISTORY_LEN};
use crate::storage::incident::{Incident, IncidentTracker};
use crate::storage::scanner::{ByteSegment, FileScanner, LogScanner, MemoryScanner, MergedScanner};
use crate::storage::types::{internal_target, is_pseudo_target, Record, Status};
use crate::storage::writer::{
    index_lines, skip_partial_line, Console, IndexState, LogWriter, WriterHealth, WriterMessage,
    WRITE_QUEUE_LEN,
};
use chrono::{DateTime, Duration, FixedOffset};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use url::Url;

/// Default restore window: only the last 100 MiB of a log are replayed.
pub const DEFAULT_RESTORE_BYTES: u64 = 100 * 1024 * 1024;

/// Logs at least this large get an informational notice on restore.
pub const LARGE_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Clock skew tolerated between neighbouring lines of one log.
const LOG_SKEW_HOURS: i64 = 1;

/// Accuracy of the seek into a file that is not indexed.
const SEEK_ACCURACY: u64 = 64 * 1024;

/// Called synchronously with the record that opened or resolved an incident.
pub type IncidentCallback = Arc<dyn Fn(&Record) + Send + Sync>;

/// Configuration for the status store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Log file template (may contain `%Y%m%d%H%M` placeholders); `None` keeps records in memory only
    pub log_path: Option<String>,
    /// Records per index period (default: 10000)
    pub index_interval: usize,
    /// Bytes replayed by `restore` at most (default: 100MiB)
    pub restore_bytes: u64,
    /// Size from which `restore` suggests rotating the log (default: 10MiB)
    pub large_log_bytes: u64,
    /// Never create or append to log files; records only reach the console
    pub read_only: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            index_interval: DEFAULT_PERIOD_RECORDS,
            restore_bytes: DEFAULT_RESTORE_BYTES,
            large_log_bytes: LARGE_LOG_BYTES,
            read_only: false,
        }
    }
}

impl StoreConfig {
    /// Store backed by a log file. An empty path means memory only.
    pub fn new(log_path: impl Into<String>) -> Self {
        let log_path = log_path.into();
        Self {
            log_path: (!log_path.is_empty()).then_some(log_path),
            ..Default::default()
        }
    }

    /// Store without a log file
    pub fn memory() -> Self {
        Self::default()
    }

    /// Read the log without ever writing to it.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Check the settings before the store is opened.
    pub fn validate(&self) -> StorageResult<()> {
        if self.index_interval == 0 {
            return Err(StorageError::Config("index_interval must be at least 1".to_string()));
        }
        if self.restore_bytes == 0 {
            return Err(StorageError::Config("restore_bytes must be at least 1".to_string()));
        }
        Ok(())
    }

    fn pattern(&self) -> Option<Pattern> {
        self.log_path.as_deref().map(Pattern::parse)
    }
}

/// Live state derived from reported records.
#[derive(Debug, Default)]
pub(crate) struct HistoryState {
    probes: ProbeHistoryMap,
    incidents: IncidentTracker,
}

impl HistoryState {
    /// Apply one record; returns the records to notify about.
    pub fn apply(&mut self, source: Option<&Url>, record: &Record, live: bool) -> Vec<Record> {
        if is_pseudo_target(&record.target) {
            return Vec::new();
        }
        let later = self
            .probes
            .get(record.target_key())
            .and_then(|h| h.first_after(record.checked_at))
            .cloned();
        let notices = self.incidents.classify(record, later.as_ref(), live);
        self.probes.append(source, record.clone());
        notices
    }

    fn active_incidents<'a>(&self, incidents: impl Iterator<Item = &'a Incident>) -> Vec<Incident> {
        incidents
            .filter(|i| self.probes.is_active(i.target.as_str()))
            .cloned()
            .collect()
    }
}

/// State shared between the store and its writer task.
pub(crate) struct Shared {
    pub history: RwLock<HistoryState>,
    pub index: parking_lot::Mutex<IndexState>,
    pub health: parking_lot::Mutex<WriterHealth>,
    callbacks: parking_lot::RwLock<Vec<IncidentCallback>>,
}

impl Shared {
    /// Invoke every callback for every notice. Call without holding `history`.
    pub fn notify(&self, notices: &[Record]) {
        if notices.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read().clone();
        for notice in notices {
            tracing::debug!(target_url = %notice.target, status = %notice.status, "Incident notification");
            for callback in &callbacks {
                callback(notice);
            }
        }
    }
}

/// Snapshot of everything the status pages show.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Active targets keyed by target URL
    pub probe_history: BTreeMap<String, ProbeHistorySnapshot>,
    pub current_incidents: Vec<Incident>,
    pub incident_history: Vec<Incident>,
    /// Incidents opened since the store started or was restored
    pub incident_count: u64,
    pub reported_at: DateTime<FixedOffset>,
}

/// The status store
pub struct Store {
    config: StoreConfig,
    pattern: Option<Pattern>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    tx: mpsc::Sender<WriterMessage>,
    writer: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Open the store and start its writer task.
    pub async fn new(config: StoreConfig, console: Console) -> StorageResult<Self> {
        Self::with_clock(config, console, Arc::new(SystemClock)).await
    }

    /// Like [`Store::new`], reading time from `clock`.
    pub async fn with_clock(
        config: StoreConfig,
        console: Console,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        config.validate()?;
        let pattern = config.pattern();
        let write_pattern = pattern.clone().filter(|_| !config.read_only);

        // Fail fast when the log cannot be opened for appending.
        if let Some(pattern) = &write_pattern {
            let path = PathBuf::from(pattern.build(&clock.now()));
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(&path)?;
            tracing::info!(path = ?path, "Opened status log");
        } else if let Some(pattern) = &pattern {
            tracing::info!(pattern = %pattern, "Opened status log read-only");
        } else {
            tracing::info!("Status log disabled, keeping records in memory");
        }

        let shared = Arc::new(Shared {
            history: RwLock::new(HistoryState::default()),
            index: parking_lot::Mutex::new(IndexState::new(config.index_interval)),
            health: parking_lot::Mutex::new(WriterHealth::default()),
            callbacks: parking_lot::RwLock::new(Vec::new()),
        });

        let (tx, rx) = mpsc::channel(WRITE_QUEUE_LEN);
        let writer = LogWriter::new(
            write_pattern,
            console,
            Arc::clone(&clock),
            Arc::clone(&shared),
            config.restore_bytes,
        );
        let handle = tokio::task::spawn_blocking(move || writer.run(rx));

        Ok(Self {
            config,
            pattern,
            clock,
            shared,
            tx,
            writer: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// Record a check result reported by `source`.
    ///
    /// Waits while the write queue is full. Disk failures are handled by the
    /// writer and never fail this call; only a closed store does.
    pub async fn report(&self, source: &Url, record: Record) -> StorageResult<()> {
        let record = record.sanitized();
        self.tx
            .send(WriterMessage::Append(record.clone()))
            .await
            .map_err(|_| StorageError::Closed)?;

        let notices = self
            .shared
            .history
            .write()
            .await
            .apply(Some(source), &record, true);
        self.shared.notify(&notices);
        Ok(())
    }

    /// Rebuild all live state by replaying the current log file.
    ///
    /// Replayed targets start inactive. A missing file leaves an empty store.
    pub async fn restore(&self) -> StorageResult<()> {
        let Some(pattern) = &self.pattern else {
            return Ok(());
        };
        let now = self.clock.now();
        let path = PathBuf::from(pattern.build(&now));

        let (read_path, restore_bytes, interval) =
            (path.clone(), self.config.restore_bytes, self.config.index_interval);
        let tail = tokio::task::spawn_blocking(move || read_log_tail(&read_path, restore_bytes, interval))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;

        let Some(tail) = tail else {
            *self.shared.history.write().await = HistoryState::default();
            tracing::info!(path = ?path, "No status log to restore");
            return Ok(());
        };

        let mut notices = Vec::new();
        if tail.start > 0 {
            tracing::warn!(path = ?path, size = tail.size, restored = tail.size - tail.start, "Status log too large, restoring only its tail");
            notices.push(
                Record::new(now, Status::Debased, internal_target("restore")).message(format!(
                    "log file is too large; restored only the last {restore_bytes} bytes"
                )),
            );
        }
        if tail.size >= self.config.large_log_bytes {
            tracing::warn!(path = ?path, size = tail.size, "Status log is large, consider rotating it");
            notices.push(
                Record::new(now, Status::Healthy, internal_target("restore")).message(format!(
                    "log file is large ({} bytes); consider rotating it",
                    tail.size
                )),
            );
        }

        {
            let mut state = self.shared.history.write().await;
            *state = HistoryState::default();
            for record in &tail.records {
                state.apply(None, record, false);
            }
            tracing::info!(path = ?path, records = tail.records.len(), targets = state.probes.len(), "Restored status log");
        }

        {
            let mut index = self.shared.index.lock();
            index.path = Some(path);
            index.indexer = tail.indexer;
        }

        let source = internal_target("restore");
        for notice in notices {
            self.report(&source, notice).await?;
        }
        Ok(())
    }

    /// Attach `source` to `target`, creating its history if needed.
    pub async fn activate_target(&self, source: &Url, target: &Url) {
        self.shared.history.write().await.probes.activate(source, target);
    }

    /// Detach `source` from each of `targets`.
    pub async fn deactivate_target(&self, source: &Url, targets: &[Url]) {
        let mut state = self.shared.history.write().await;
        for target in targets {
            state.probes.deactivate(source, target);
        }
    }

    /// Every known target, active or not, sorted.
    pub async fn targets(&self) -> Vec<Url> {
        let mut targets: Vec<Url> = self
            .shared
            .history
            .read()
            .await
            .probes
            .iter()
            .map(|h| h.target().clone())
            .collect();
        targets.sort();
        targets
    }

    /// Histories of active targets, most severe first.
    pub async fn probe_history(&self) -> Vec<ProbeHistorySnapshot> {
        self.shared
            .history
            .read()
            .await
            .probes
            .active_snapshots(PROBE_HISTORY_LEN)
    }

    /// Open incidents of active targets, oldest first.
    pub async fn current_incidents(&self) -> Vec<Incident> {
        let state = self.shared.history.read().await;
        state.active_incidents(state.incidents.current_incidents().iter())
    }

    /// Resolved incidents of active targets, in resolution order.
    pub async fn incident_history(&self) -> Vec<Incident> {
        let state = self.shared.history.read().await;
        state.active_incidents(state.incidents.history())
    }

    /// Everything the status pages need, with at most `records` records per target.
    pub async fn make_report(&self, records: usize) -> Report {
        let state = self.shared.history.read().await;
        let probe_history = state
            .probes
            .active_snapshots(records)
            .into_iter()
            .map(|s| (s.target.to_string(), s))
            .collect();

        Report {
            probe_history,
            current_incidents: state.active_incidents(state.incidents.current_incidents().iter()),
            incident_history: state.active_incidents(state.incidents.history()),
            incident_count: state.incidents.opened_count(),
            reported_at: self.clock.now(),
        }
    }

    /// Health of the write path and the most recent write errors.
    pub fn errors(&self) -> (bool, Vec<String>) {
        self.shared.health.lock().snapshot()
    }

    /// Register a callback for incident notifications.
    pub fn on_incident(&self, callback: IncidentCallback) {
        self.shared.callbacks.write().push(callback);
    }

    /// Records checked within `[since, until)`.
    ///
    /// Without a log file the in-memory histories are scanned. On disk, the
    /// files the log pattern could have produced for the span are scanned in
    /// time order.
    pub async fn open_log(
        &self,
        since: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> StorageResult<LogScanner> {
        let Some(pattern) = &self.pattern else {
            let state = self.shared.history.read().await;
            let records = state
                .probes
                .iter()
                .flat_map(|h| h.records().iter().cloned())
                .collect();
            return Ok(LogScanner::Memory(MemoryScanner::new(records, since, until)));
        };

        // File names carry the writer's local time.
        let offset = *self.clock.now().offset();
        let (since, until) = (since.with_timezone(&offset), until.with_timezone(&offset));

        let mut scanners = Vec::new();
        for path in candidate_files(pattern, &since, &until)? {
            match self.open_file(&path, since, until) {
                Ok(scanner) => scanners.push(scanner),
                Err(StorageError::Io(e)) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(files = scanners.len(), %since, %until, "Opened log scan");

        Ok(match scanners.len() {
            0 => LogScanner::empty(),
            1 => match scanners.pop() {
                Some(scanner) => LogScanner::File(scanner),
                None => LogScanner::empty(),
            },
            _ => LogScanner::Merged(MergedScanner::new(scanners)),
        })
    }

    /// Scan one file, reading only indexed ranges when the index covers it.
    fn open_file(
        &self,
        path: &Path,
        since: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> StorageResult<FileScanner> {
        let skew = Duration::hours(LOG_SKEW_HOURS);
        let lower = since - skew;

        let indexed = {
            let index = self.shared.index.lock();
            match index.indexer.covered_end() {
                Some(end) if index.path.as_deref() == Some(path) => {
                    Some((index.indexer.search(&lower, &(until + skew)), end))
                }
                _ => None,
            }
        };

        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let segments = match indexed {
            Some((ranges, end)) if end <= len => {
                let tail = point_search_range(&mut file, end..len, &lower, 0)?;
                ranges
                    .into_iter()
                    .map(ByteSegment::from)
                    .chain(std::iter::once(ByteSegment::to_eof(tail)))
                    .collect()
            }
            _ => vec![ByteSegment::to_eof(point_search(&mut file, &lower, SEEK_ACCURACY)?)],
        };

        Ok(FileScanner::with_segments(path, segments, since, until)?)
    }

    /// Stop accepting records and wait for the writer to drain the queue.
    pub async fn close(&self) -> StorageResult<()> {
        let Some(handle) = self.writer.lock().take() else {
            return Ok(());
        };
        // Queued records are written before the shutdown message is seen.
        if self.tx.send(WriterMessage::Shutdown).await.is_err() {
            tracing::debug!("Log writer already stopped");
        }
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Log writer panicked");
            return Err(StorageError::Closed);
        }
        tracing::info!("Status store closed");
        Ok(())
    }
}

/// The replayable end of one log file.
struct LogTail {
    records: Vec<Record>,
    indexer: Indexer,
    size: u64,
    /// First replayed byte; non-zero when the file exceeds the restore window
    start: u64,
}

/// Read and index at most the last `restore_bytes` of `path`. `None` if it does not exist.
fn read_log_tail(path: &Path, restore_bytes: u64, interval: usize) -> StorageResult<Option<LogTail>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let start = skip_partial_line(&mut reader, size.saturating_sub(restore_bytes))?;

    let mut indexer = Indexer::new(interval);
    let mut records = Vec::new();
    index_lines(&mut indexer, reader, start, None, |record| records.push(record))?;
    Ok(Some(LogTail {
        records,
        indexer,
        size,
        start,
    }))
}

/// Files the log pattern could have produced for `[since, until]`, widened by the skew.
fn candidate_files(
    pattern: &Pattern,
    since: &DateTime<FixedOffset>,
    until: &DateTime<FixedOffset>,
) -> StorageResult<Vec<PathBuf>> {
    let sample = PathBuf::from(pattern.build(since));
    if !pattern.has_placeholders() {
        return Ok(vec![sample]);
    }

    let skew = Duration::hours(LOG_SKEW_HOURS);
    let (lower, upper) = (*since - skew, *until + skew);

    // Placeholders are only supported in the file name.
    let parent = sample.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = parent.unwrap_or_else(|| Path::new("."));
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = match parent {
            Some(parent) => parent.join(entry.file_name()),
            None => PathBuf::from(entry.file_name()),
        };
        if pattern.matches(&path.to_string_lossy(), &lower, &upper) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
