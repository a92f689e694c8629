//! Binary search for a timestamp inside one log file
//!
//! Finds a byte offset at or before the first line whose checked-at time is
//! not earlier than a target, without parsing the whole file. Each probe
//! seeks into the middle of the remaining window, skips to the next line
//! boundary and parses only the timestamp field. Unparsable lines are
//! stepped over.
//!
//! The search stops once the window is at most `accuracy` bytes wide
//! (0 = exact line). The sparse index already narrows reads to whole
//! periods, so exact precision is only worth paying for on the unindexed
//! tail of a live log.

use crate::storage::Record;
use chrono::{DateTime, TimeZone};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;

/// Search the whole stream. Leaves the stream positioned at the result.
pub fn point_search<R, Tz>(reader: &mut R, target: &DateTime<Tz>, accuracy: u64) -> io::Result<u64>
where
    R: Read + Seek,
    Tz: TimeZone,
{
    let len = reader.seek(SeekFrom::End(0))?;
    point_search_range(reader, 0..len, target, accuracy)
}

/// Search within `range`, whose start must be a line boundary.
///
/// Returns an offset in `range` (or `range.end`) and leaves the stream there.
pub fn point_search_range<R, Tz>(
    reader: &mut R,
    range: Range<u64>,
    target: &DateTime<Tz>,
    accuracy: u64,
) -> io::Result<u64>
where
    R: Read + Seek,
    Tz: TimeZone,
{
    let target = target.timestamp_micros();
    let mut lo = range.start;
    let mut hi = range.end.max(range.start);

    // Invariants: `lo` is a line start and every line before it is earlier
    // than the target; the answer is a line start in [lo, hi].
    while hi - lo > accuracy {
        let mid = lo + (hi - lo) / 2;
        let probe = if mid == lo {
            lo
        } else {
            next_line_start(reader, mid, hi)?
        };

        if probe >= hi {
            // No line starts in [mid, hi): step over the line at `lo`.
            match read_line_at(reader, lo, hi)? {
                Some((line, next)) => match line_time(&line) {
                    Some(t) if t >= target => hi = lo,
                    _ => lo = next,
                },
                None => hi = lo,
            }
            continue;
        }

        match first_parsable_from(reader, probe, hi)? {
            Some((t, _, next)) if t < target => lo = next,
            // Lines in [probe, found) are unparsable, so `probe` is a safe upper bound.
            Some(_) | None => hi = probe,
        }
    }

    reader.seek(SeekFrom::Start(lo))?;
    Ok(lo)
}

/// Offset of the first line start at or after `pos` (capped at `limit`).
fn next_line_start<R: Read + Seek>(reader: &mut R, pos: u64, limit: u64) -> io::Result<u64> {
    // A line starts at `pos` if the byte before it is a newline.
    reader.seek(SeekFrom::Start(pos - 1))?;
    let mut buf = BufReader::new(&mut *reader);
    let mut skipped = Vec::new();
    let n = buf.read_until(b'\n', &mut skipped)? as u64;
    if n == 0 || skipped.last() != Some(&b'\n') {
        return Ok(limit);
    }
    Ok((pos - 1 + n).min(limit))
}

/// Read the line starting at `pos`, returning it and the next line's offset.
fn read_line_at<R: Read + Seek>(reader: &mut R, pos: u64, limit: u64) -> io::Result<Option<(Vec<u8>, u64)>> {
    if pos >= limit {
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(pos))?;
    let mut buf = BufReader::new(&mut *reader);
    let mut line = Vec::new();
    let n = buf.read_until(b'\n', &mut line)? as u64;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some((line, (pos + n).min(limit))))
}

/// From `pos`, find the first line with a parsable timestamp before `limit`.
///
/// Returns (time, line start, next line start).
fn first_parsable_from<R: Read + Seek>(
    reader: &mut R,
    mut pos: u64,
    limit: u64,
) -> io::Result<Option<(i64, u64, u64)>> {
    while let Some((line, next)) = read_line_at(reader, pos, limit)? {
        if let Some(t) = line_time(&line) {
            return Ok(Some((t, pos, next)));
        }
        pos = next;
    }
    Ok(None)
}

fn line_time(line: &[u8]) -> Option<i64> {
    let field_end = line
        .iter()
        .position(|&b| b == b'\t' || b == b'\n')
        .unwrap_or(line.len());
    let field = std::str::from_utf8(&line[..field_end]).ok()?;
    Record::parse_time(field).ok().map(|t| t.timestamp_micros())
}
