//! Incident detection
//!
//! An incident is a maximal run of consecutive non-healthy records for one
//! target that share exactly the same status and message. The tracker keeps
//! at most one open incident per target and a bounded history of resolved
//! ones.
//!
//! Records may arrive late (backfilled or reordered), so classification
//! looks at the surrounding history instead of assuming monotonic time:
//!
//! ```text
//! record r for target T
//!   Aborted?                          → ignored
//!   open incident for T relevant?     → continue it, or close it at r
//!   resolved incident covering r?     → same status+message: continuation
//!   r non-healthy                     → open a new incident; if a later record
//!                                       for T already exists, close it there
//! ```

use crate::storage::types::{Record, Status};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use url::Url;

/// Maximum number of resolved incidents retained.
pub const INCIDENT_HISTORY_LEN: usize = 20;

/// A run of identical non-healthy results for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    #[serde(serialize_with = "serialize_url")]
    pub target: Url,
    pub status: Status,
    pub message: String,
    pub started_at: DateTime<FixedOffset>,
    /// `None` while the incident is still open
    pub ended_at: Option<DateTime<FixedOffset>>,
}

fn serialize_url<S: serde::Serializer>(target: &Url, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(target.as_str())
}

impl Incident {
    /// Open an incident starting at `record`.
    pub fn new(record: &Record) -> Self {
        Self {
            target: record.target.clone(),
            status: record.status,
            message: record.message.clone(),
            started_at: record.checked_at,
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Whether `record` has the same status and message.
    pub fn same_kind(&self, record: &Record) -> bool {
        self.status == record.status && self.message == record.message
    }

    /// Whether `time` falls inside `[started_at, ended_at)`.
    pub fn covers(&self, time: DateTime<FixedOffset>) -> bool {
        self.started_at <= time && self.ended_at.map_or(true, |end| time < end)
    }
}

/// Open and resolved incidents for all targets.
#[derive(Debug, Default)]
pub struct IncidentTracker {
    current: HashMap<String, Incident>,
    /// Oldest first
    history: VecDeque<Incident>,
    opened: u64,
}

impl IncidentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a newly appended record.
    ///
    /// `later` is the earliest already-known record for the same target that
    /// postdates `record`, if any. Returns the records that should trigger
    /// change notifications; always empty when `live` is false (log replay).
    pub fn classify(&mut self, record: &Record, later: Option<&Record>, live: bool) -> Vec<Record> {
        let mut notices = Vec::new();
        if record.status == Status::Aborted {
            return notices;
        }

        let key = record.target_key();
        if let Some(mut open) = self.current.remove(key) {
            let precedes_open = later.is_some_and(|l| l.checked_at <= open.started_at);
            let relevant = later.is_none()
                || record.checked_at >= open.started_at
                || (precedes_open && open.same_kind(record));
            if !relevant {
                // Stale noise: older than what we already know, outside the open run.
                self.current.insert(key.to_string(), open);
                return notices;
            }

            if open.same_kind(record) {
                if record.checked_at < open.started_at {
                    open.started_at = record.checked_at;
                }
                self.current.insert(key.to_string(), open);
                return notices;
            }

            open.ended_at = Some(record.checked_at);
            tracing::debug!(target_url = %open.target, status = %open.status, "incident resolved");
            self.push_history(open);
            if live && record.status == Status::Healthy {
                notices.push(record.clone());
            }
        } else if self
            .history
            .iter()
            .rev()
            .any(|i| i.target.as_str() == key && i.covers(record.checked_at) && i.same_kind(record))
        {
            // Backfilled record inside an already-resolved run.
            return notices;
        }

        if record.status == Status::Healthy {
            return notices;
        }

        let mut incident = Incident::new(record);
        self.opened += 1;
        tracing::debug!(target_url = %incident.target, status = %incident.status, "incident opened");
        if live {
            notices.push(record.clone());
        }

        match later {
            Some(later) => {
                incident.ended_at = Some(later.checked_at);
                self.push_history(incident);
                if live && later.status == Status::Healthy {
                    notices.push(later.clone());
                }
            }
            None => {
                self.current.insert(key.to_string(), incident);
            }
        }

        notices
    }

    fn push_history(&mut self, incident: Incident) {
        self.history.push_back(incident);
        while self.history.len() > INCIDENT_HISTORY_LEN {
            self.history.pop_front();
        }
    }

    pub fn current(&self, target: &str) -> Option<&Incident> {
        self.current.get(target)
    }

    /// Open incidents, sorted by start time.
    pub fn current_incidents(&self) -> Vec<Incident> {
        let mut incidents: Vec<Incident> = self.current.values().cloned().collect();
        incidents.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.target.as_str().cmp(b.target.as_str()))
        });
        incidents
    }

    /// Resolved incidents in the order they were resolved.
    pub fn history(&self) -> impl Iterator<Item = &Incident> {
        self.history.iter()
    }

    /// Number of incidents opened so far. Continuations never count.
    pub fn opened_count(&self) -> u64 {
        self.opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2021-01-02T13:00:00Z").unwrap() + Duration::seconds(secs)
    }

    fn record(target: &str, secs: i64, status: Status, message: &str) -> Record {
        Record::new(at(secs), status, Url::parse(target).unwrap()).message(message)
    }

    fn feed(tracker: &mut IncidentTracker, records: &[Record]) -> Vec<Record> {
        records
            .iter()
            .flat_map(|r| tracker.classify(r, None, true))
            .collect()
    }

    #[test]
    fn test_failure_run_resolves_on_healthy() {
        let mut tracker = IncidentTracker::new();
        let notices = feed(
            &mut tracker,
            &[
                record("dummy:#a", 0, Status::Healthy, ""),
                record("dummy:#a", 1, Status::Failure, "x"),
                record("dummy:#a", 2, Status::Failure, "x"),
                record("dummy:#a", 3, Status::Healthy, ""),
            ],
        );

        assert!(tracker.current_incidents().is_empty());
        let history: Vec<_> = tracker.history().cloned().collect();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, Status::Failure);
        assert_eq!(history[0].message, "x");
        assert_eq!(history[0].started_at, at(1));
        assert_eq!(history[0].ended_at, Some(at(3)));
        assert_eq!(tracker.opened_count(), 1);

        // One notice for opening, one for resolving to healthy.
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].checked_at, at(1));
        assert_eq!(notices[1].checked_at, at(3));
    }

    #[test]
    fn test_aborted_is_invisible() {
        let mut tracker = IncidentTracker::new();
        let notices = feed(&mut tracker, &[record("dummy:#b", 0, Status::Aborted, "")]);
        assert!(notices.is_empty());
        assert!(tracker.current_incidents().is_empty());
        assert_eq!(tracker.history().count(), 0);

        feed(&mut tracker, &[record("dummy:#b", 1, Status::Failure, "x")]);
        feed(&mut tracker, &[record("dummy:#b", 2, Status::Aborted, "")]);
        assert_eq!(tracker.current("dummy:#b").unwrap().status, Status::Failure);
    }

    #[test]
    fn test_message_change_starts_new_incident() {
        let mut tracker = IncidentTracker::new();
        let notices = feed(
            &mut tracker,
            &[
                record("dummy:#a", 0, Status::Failure, "x"),
                record("dummy:#a", 1, Status::Failure, "y"),
                record("dummy:#a", 2, Status::Debased, "y"),
            ],
        );

        assert_eq!(tracker.opened_count(), 3);
        assert_eq!(tracker.history().count(), 2);
        let current = tracker.current("dummy:#a").unwrap();
        assert_eq!(current.status, Status::Debased);
        assert_eq!(current.started_at, at(2));
        // Closing into another failure does not notify as a recovery.
        assert_eq!(notices.len(), 3);
    }

    #[test]
    fn test_at_most_one_open_incident_per_target() {
        let mut tracker = IncidentTracker::new();
        feed(
            &mut tracker,
            &[
                record("dummy:#a", 0, Status::Failure, "x"),
                record("dummy:#b", 0, Status::Failure, "x"),
                record("dummy:#a", 1, Status::Failure, "z"),
            ],
        );
        let current = tracker.current_incidents();
        assert_eq!(current.len(), 2);
        assert_eq!(current[0].target.as_str(), "dummy:#b");
        assert_eq!(current[1].message, "z");
    }

    #[test]
    fn test_replay_does_not_notify() {
        let mut tracker = IncidentTracker::new();
        for r in [
            record("dummy:#a", 1, Status::Failure, "x"),
            record("dummy:#a", 2, Status::Healthy, ""),
        ] {
            assert!(tracker.classify(&r, None, false).is_empty());
        }
        assert_eq!(tracker.history().count(), 1);
    }

    #[test]
    fn test_out_of_order_failure_is_closed_by_later_record() {
        let mut tracker = IncidentTracker::new();
        let later = record("dummy:#a", 10, Status::Healthy, "");
        feed(&mut tracker, &[later.clone()]);

        let late = record("dummy:#a", 5, Status::Failure, "x");
        let notices = tracker.classify(&late, Some(&later), true);

        assert!(tracker.current("dummy:#a").is_none());
        let history: Vec<_> = tracker.history().cloned().collect();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].started_at, at(5));
        assert_eq!(history[0].ended_at, Some(at(10)));
        assert_eq!(notices, vec![late, later]);
    }

    #[test]
    fn test_backfill_extends_open_incident() {
        let mut tracker = IncidentTracker::new();
        let first = record("dummy:#a", 10, Status::Failure, "x");
        feed(&mut tracker, &[first.clone()]);

        let backfill = record("dummy:#a", 5, Status::Failure, "x");
        assert!(tracker.classify(&backfill, Some(&first), true).is_empty());
        assert_eq!(tracker.current("dummy:#a").unwrap().started_at, at(5));
        assert_eq!(tracker.opened_count(), 1);
    }

    #[test]
    fn test_stale_record_is_ignored() {
        let mut tracker = IncidentTracker::new();
        let open = record("dummy:#a", 10, Status::Failure, "x");
        feed(&mut tracker, &[open.clone()]);
        let newer = record("dummy:#a", 20, Status::Failure, "x");
        feed(&mut tracker, &[newer.clone()]);

        let stale = record("dummy:#a", 5, Status::Healthy, "");
        assert!(tracker.classify(&stale, Some(&open), true).is_empty());
        assert_eq!(tracker.current("dummy:#a").unwrap().started_at, at(10));
        assert_eq!(tracker.history().count(), 0);
    }

    #[test]
    fn test_backfill_inside_resolved_incident() {
        let mut tracker = IncidentTracker::new();
        feed(
            &mut tracker,
            &[
                record("dummy:#a", 1, Status::Failure, "x"),
                record("dummy:#a", 5, Status::Healthy, ""),
            ],
        );
        let later = record("dummy:#a", 5, Status::Healthy, "");
        let backfill = record("dummy:#a", 3, Status::Failure, "x");
        assert!(tracker.classify(&backfill, Some(&later), true).is_empty());
        assert_eq!(tracker.history().count(), 1);
        assert_eq!(tracker.opened_count(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = IncidentTracker::new();
        for i in 0..30 {
            feed(
                &mut tracker,
                &[
                    record("dummy:#a", i * 2, Status::Failure, &format!("e{i}")),
                    record("dummy:#a", i * 2 + 1, Status::Healthy, ""),
                ],
            );
        }
        let history: Vec<_> = tracker.history().collect();
        assert_eq!(history.len(), INCIDENT_HISTORY_LEN);
        assert_eq!(history[0].message, "e10");
        assert_eq!(history[INCIDENT_HISTORY_LEN - 1].message, "e29");
        assert_eq!(tracker.opened_count(), 30);
    }
}
