//! Sparse byte-range index over one log file
//!
//! The log is summarized as a sequence of contiguous periods, each covering
//! up to `interval` records with their byte range and min/max timestamp.
//! Ranges that failed to parse become zero-record "invalid" periods, so the
//! index never claims coverage it cannot back up.
//!
//! ```text
//! bytes:   0 ─────────── 812 ──── 840 ─────────── 1650
//! period:  [ 10 records ]  [invalid] [ 10 records ]
//! search(t1..t2) → only the periods whose [min,max] overlaps
//! ```
//!
//! Appends must be contiguous: a period's start equals the previous end.
//! Anything else means the file changed underneath us (truncation or
//! rotation) and the caller must reset and rebuild.

use crate::storage::{StorageError, StorageResult};
use chrono::{DateTime, TimeZone};
use std::ops::Range;

/// Default number of records summarized by one period.
pub const DEFAULT_PERIOD_RECORDS: usize = 10_000;

/// Summary of a contiguous run of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPeriod {
    /// First byte of the run
    pub start: u64,
    /// One past the last byte of the run
    pub end: u64,
    /// Earliest record, unix microseconds
    pub min: i64,
    /// Latest record, unix microseconds
    pub max: i64,
    /// Number of records; 0 for invalid ranges
    pub count: usize,
}

impl IndexPeriod {
    fn overlaps(&self, since: i64, until: i64) -> bool {
        self.count > 0 && self.min <= until && self.max >= since
    }
}

/// Append-only sparse index for one log file.
#[derive(Debug, Clone)]
pub struct Indexer {
    periods: Vec<IndexPeriod>,
    interval: usize,
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD_RECORDS)
    }
}

impl Indexer {
    /// Create an index that starts a new period every `interval` records
    pub fn new(interval: usize) -> Self {
        Self {
            periods: Vec::new(),
            interval: interval.max(1),
        }
    }

    fn check_contiguous(&self, start: u64) -> StorageResult<()> {
        match self.periods.last() {
            Some(last) if last.end != start => Err(StorageError::StaleIndex {
                start,
                expected: last.end,
            }),
            _ => Ok(()),
        }
    }

    /// Record that bytes `[start, end)` hold one record checked at `time`.
    pub fn append_entry<Tz: TimeZone>(
        &mut self,
        start: u64,
        end: u64,
        time: &DateTime<Tz>,
    ) -> StorageResult<()> {
        self.check_contiguous(start)?;
        let micros = time.timestamp_micros();

        match self.periods.last_mut() {
            Some(last) if last.count > 0 && last.count < self.interval => {
                last.end = end;
                last.min = last.min.min(micros);
                last.max = last.max.max(micros);
                last.count += 1;
            }
            _ => self.periods.push(IndexPeriod {
                start,
                end,
                min: micros,
                max: micros,
                count: 1,
            }),
        }
        Ok(())
    }

    /// Record that bytes `[start, end)` could not be parsed.
    pub fn append_invalid_range(&mut self, start: u64, end: u64) -> StorageResult<()> {
        self.check_contiguous(start)?;

        match self.periods.last_mut() {
            Some(last) if last.count == 0 => last.end = end,
            _ => self.periods.push(IndexPeriod {
                start,
                end,
                min: 0,
                max: 0,
                count: 0,
            }),
        }
        Ok(())
    }

    /// Byte ranges that may hold records within `[since, until]`.
    ///
    /// Ranges are disjoint and in file order; adjacent selected periods are
    /// merged. The answer is approximate, so callers still filter parsed
    /// records by exact time.
    pub fn search<Tz: TimeZone>(&self, since: &DateTime<Tz>, until: &DateTime<Tz>) -> Vec<Range<u64>> {
        let since = since.timestamp_micros();
        let until = until.timestamp_micros();

        let mut ranges: Vec<Range<u64>> = Vec::new();
        for period in self.periods.iter().filter(|p| p.overlaps(since, until)) {
            match ranges.last_mut() {
                Some(last) if last.end == period.start => last.end = period.end,
                _ => ranges.push(period.start..period.end),
            }
        }
        ranges
    }

    /// Drop all periods.
    pub fn reset(&mut self) {
        self.periods.clear();
    }

    pub fn periods(&self) -> &[IndexPeriod] {
        &self.periods
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Byte offset where the next append must start.
    pub fn end(&self) -> Option<u64> {
        self.periods.last().map(|p| p.end)
    }

    /// End of the indexed prefix when the index covers the file from offset 0.
    pub fn covered_end(&self) -> Option<u64> {
        match self.periods.first() {
            Some(first) if first.start == 0 => self.end(),
            _ => None,
        }
    }

    /// Total number of indexed records.
    pub fn record_count(&self) -> usize {
        self.periods.iter().map(|p| p.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_non_contiguous_append_is_stale() {
        let mut index = Indexer::default();
        index.append_entry(0, 100, &t(1)).unwrap();

        let err = index.append_entry(0, 50, &t(2)).unwrap_err();
        assert!(matches!(
            err,
            StorageError::StaleIndex {
                start: 0,
                expected: 100
            }
        ));
        assert!(index.append_invalid_range(90, 120).unwrap_err().is_stale_index());
    }

    #[test]
    fn test_first_append_may_start_anywhere() {
        let mut index = Indexer::default();
        index.append_entry(500, 600, &t(1)).unwrap();
        assert_eq!(index.end(), Some(600));
        assert_eq!(index.covered_end(), None);
    }

    #[test]
    fn test_period_rollover() {
        let mut index = Indexer::new(3);
        for i in 0..7u64 {
            index.append_entry(i * 10, i * 10 + 10, &t(i as i64)).unwrap();
        }

        let periods = index.periods();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[0].count, 3);
        assert_eq!(periods[0].start, 0);
        assert_eq!(periods[0].end, 30);
        assert_eq!(periods[1].start, 30);
        assert_eq!(periods[2].count, 1);
        assert_eq!(index.record_count(), 7);
        assert_eq!(index.covered_end(), Some(70));
    }

    #[test]
    fn test_invalid_ranges_merge() {
        let mut index = Indexer::new(3);
        index.append_entry(0, 10, &t(1)).unwrap();
        index.append_invalid_range(10, 15).unwrap();
        index.append_invalid_range(15, 20).unwrap();
        index.append_entry(20, 30, &t(2)).unwrap();

        let periods = index.periods();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[1], IndexPeriod { start: 10, end: 20, min: 0, max: 0, count: 0 });
        assert_eq!(periods[2].start, 20);
    }

    #[test]
    fn test_search_selects_overlapping_periods() {
        let mut index = Indexer::new(2);
        // periods: [0,20) t1..t2, [20,40) t3..t4, [40,45) invalid, [45,65) t5..t6
        index.append_entry(0, 10, &t(1)).unwrap();
        index.append_entry(10, 20, &t(2)).unwrap();
        index.append_entry(20, 30, &t(3)).unwrap();
        index.append_entry(30, 40, &t(4)).unwrap();
        index.append_invalid_range(40, 45).unwrap();
        index.append_entry(45, 55, &t(5)).unwrap();
        index.append_entry(55, 65, &t(6)).unwrap();

        assert_eq!(index.search(&t(0), &t(100)), vec![0..40, 45..65]);
        assert_eq!(index.search(&t(3), &t(3)), vec![20..40]);
        assert_eq!(index.search(&t(2), &t(3)), vec![0..40]);
        assert_eq!(index.search(&t(4), &t(5)), vec![20..40, 45..65]);
        assert!(index.search(&t(7), &t(9)).is_empty());
    }

    #[test]
    fn test_reset() {
        let mut index = Indexer::default();
        index.append_entry(0, 10, &t(1)).unwrap();
        index.reset();
        assert!(index.is_empty());
        assert!(index.search(&t(0), &t(10)).is_empty());
        // After a reset any start offset is accepted again.
        index.append_entry(0, 10, &t(1)).unwrap();
    }

    proptest! {
        #[test]
        fn prop_full_search_covers_all_records(
            ops in prop::collection::vec((any::<bool>(), 1u64..200, 0i64..10_000), 1..200),
            interval in 1usize..20,
        ) {
            let mut index = Indexer::new(interval);
            let mut offset = 0u64;
            let mut record_spans = Vec::new();
            for (valid, len, secs) in ops {
                if valid {
                    index.append_entry(offset, offset + len, &t(secs)).unwrap();
                    record_spans.push(offset..offset + len);
                } else {
                    index.append_invalid_range(offset, offset + len).unwrap();
                }
                offset += len;
            }

            let ranges = index.search(&t(-1), &t(10_001));
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
            for span in &record_spans {
                prop_assert!(ranges.iter().any(|r| r.start <= span.start && span.end <= r.end));
            }
            let total: usize = index
                .periods()
                .iter()
                .filter(|p| ranges.iter().any(|r| r.start <= p.start && p.end <= r.end))
                .map(|p| p.count)
                .sum();
            prop_assert_eq!(total, record_spans.len());
        }
    }
}
