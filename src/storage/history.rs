//! Per-target probe history
//!
//! Each target keeps a bounded, time-ordered buffer of its most recent
//! records plus the set of sources currently reporting to it. A target is
//! active while at least one source is attached.

use crate::storage::types::{Record, Status};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use url::Url;

/// Maximum number of records kept per target.
pub const PROBE_HISTORY_LEN: usize = 60;

/// Recent records for one target.
#[derive(Debug, Clone)]
pub struct ProbeHistory {
    target: Url,
    /// Oldest first
    records: Vec<Record>,
    sources: HashSet<String>,
}

impl ProbeHistory {
    pub fn new(target: Url) -> Self {
        Self {
            target,
            records: Vec::new(),
            sources: HashSet::new(),
        }
    }

    /// Insert a record, keeping chronological order and the length bound.
    ///
    /// Near-simultaneous reports may arrive slightly out of order, so the
    /// buffer is re-sorted (stably) after every insert.
    pub fn append(&mut self, record: Record) {
        self.records.push(record);
        self.records.sort_by_key(|r| r.checked_at);
        if self.records.len() > PROBE_HISTORY_LEN {
            let excess = self.records.len() - PROBE_HISTORY_LEN;
            self.records.drain(..excess);
        }
    }

    pub fn add_source(&mut self, source: &Url) {
        self.sources.insert(source.as_str().to_string());
    }

    pub fn remove_source(&mut self, source: &Url) {
        self.sources.remove(source.as_str());
    }

    pub fn is_active(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn latest(&self) -> Option<&Record> {
        self.records.last()
    }

    /// The earliest known record strictly after `time`.
    pub fn first_after(&self, time: DateTime<FixedOffset>) -> Option<&Record> {
        self.records.iter().find(|r| r.checked_at > time)
    }

    /// Immutable copy for read models, limited to the newest `limit` records.
    pub fn snapshot(&self, limit: usize) -> ProbeHistorySnapshot {
        let skip = self.records.len().saturating_sub(limit);
        let latest = self.latest();
        ProbeHistorySnapshot {
            target: self.target.clone(),
            status: latest.map(|r| r.status).unwrap_or_default(),
            updated: latest.map(|r| r.checked_at),
            records: self.records[skip..].to_vec(),
        }
    }
}

/// Read-only view of one target's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeHistorySnapshot {
    #[serde(serialize_with = "serialize_url")]
    pub target: Url,
    /// Status of the latest record, `Unknown` when there is none
    pub status: Status,
    pub updated: Option<DateTime<FixedOffset>>,
    pub records: Vec<Record>,
}

fn serialize_url<S: serde::Serializer>(target: &Url, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(target.as_str())
}

/// All probe histories keyed by target URL string.
#[derive(Debug, Default)]
pub struct ProbeHistoryMap {
    histories: HashMap<String, ProbeHistory>,
}

impl ProbeHistoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, target: &Url) -> &mut ProbeHistory {
        self.histories
            .entry(target.as_str().to_string())
            .or_insert_with(|| ProbeHistory::new(target.clone()))
    }

    /// Append a record, attaching `source` to the target when given.
    pub fn append(&mut self, source: Option<&Url>, record: Record) {
        let history = self.entry(&record.target);
        if let Some(source) = source {
            history.add_source(source);
        }
        history.append(record);
    }

    /// Attach a source to a target, creating its history if needed.
    pub fn activate(&mut self, source: &Url, target: &Url) {
        self.entry(target).add_source(source);
    }

    /// Detach a source from a target. Unknown targets are ignored.
    pub fn deactivate(&mut self, source: &Url, target: &Url) {
        if let Some(history) = self.histories.get_mut(target.as_str()) {
            history.remove_source(source);
        }
    }

    pub fn get(&self, target: &str) -> Option<&ProbeHistory> {
        self.histories.get(target)
    }

    pub fn is_active(&self, target: &str) -> bool {
        self.get(target).is_some_and(ProbeHistory::is_active)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeHistory> {
        self.histories.values()
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Snapshots of active targets, most severe status first, then by target.
    pub fn active_snapshots(&self, limit: usize) -> Vec<ProbeHistorySnapshot> {
        let mut snapshots: Vec<ProbeHistorySnapshot> = self
            .histories
            .values()
            .filter(|h| h.is_active())
            .map(|h| h.snapshot(limit))
            .collect();
        snapshots.sort_by(|a, b| {
            a.status
                .severity_rank()
                .cmp(&b.status.severity_rank())
                .then_with(|| a.target.as_str().cmp(b.target.as_str()))
        });
        snapshots
    }
}
