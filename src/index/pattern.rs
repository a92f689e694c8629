//! Filename templates with date/time placeholders
//!
//! A pattern like `status_%Y%m%d.log` names one file per day. The writer
//! uses [`Pattern::build`] to pick the file for "now"; readers use
//! [`Pattern::matches`] as a cheap pre-filter to decide whether a file on
//! disk could hold records for a time span.
//!
//! Supported escapes:
//!
//! | escape | meaning           | width |
//! |--------|-------------------|-------|
//! | `%Y`   | year              | 4     |
//! | `%y`   | year (2 digits)   | 2     |
//! | `%m`   | month             | 2     |
//! | `%d`   | day of month      | 2     |
//! | `%H`   | hour (24h)        | 2     |
//! | `%M`   | minute            | 2     |
//! | `%%`   | literal `%`       |       |
//!
//! Any other `%X` is kept literally.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Timelike};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Fragment {
    Literal(String),
    Year4,
    Year2,
    Month,
    Day,
    Hour,
    Minute,
}

impl Fragment {
    fn width(&self) -> usize {
        match self {
            Fragment::Literal(s) => s.len(),
            Fragment::Year4 => 4,
            _ => 2,
        }
    }
}

/// A parsed filename template. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    fragments: Vec<Fragment>,
}

impl Pattern {
    /// Parse a template. Never fails: unknown escapes stay literal.
    pub fn parse(template: &str) -> Self {
        let mut fragments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            let placeholder = match chars.next() {
                Some('Y') => Fragment::Year4,
                Some('y') => Fragment::Year2,
                Some('m') => Fragment::Month,
                Some('d') => Fragment::Day,
                Some('H') => Fragment::Hour,
                Some('M') => Fragment::Minute,
                Some('%') => {
                    literal.push('%');
                    continue;
                }
                Some(other) => {
                    literal.push('%');
                    literal.push(other);
                    continue;
                }
                None => {
                    literal.push('%');
                    continue;
                }
            };
            if !literal.is_empty() {
                fragments.push(Fragment::Literal(std::mem::take(&mut literal)));
            }
            fragments.push(placeholder);
        }
        if !literal.is_empty() {
            fragments.push(Fragment::Literal(literal));
        }

        Self { fragments }
    }

    /// Whether the template contains any date/time placeholder.
    pub fn has_placeholders(&self) -> bool {
        self.fragments
            .iter()
            .any(|f| !matches!(f, Fragment::Literal(_)))
    }

    /// Render the concrete name for `t`.
    pub fn build<T: Datelike + Timelike>(&self, t: &T) -> String {
        let mut out = String::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(s) => out.push_str(s),
                Fragment::Year4 => out.push_str(&format!("{:04}", t.year())),
                Fragment::Year2 => out.push_str(&format!("{:02}", t.year().rem_euclid(100))),
                Fragment::Month => out.push_str(&format!("{:02}", t.month())),
                Fragment::Day => out.push_str(&format!("{:02}", t.day())),
                Fragment::Hour => out.push_str(&format!("{:02}", t.hour())),
                Fragment::Minute => out.push_str(&format!("{:02}", t.minute())),
            }
        }
        out
    }

    /// Whether `name` could hold records checked within `[since, until]`.
    ///
    /// Permissive: each placeholder is checked on its own against
    /// the values its unit takes over the span (with wraparound, e.g. hours
    /// crossing midnight). Exact filtering happens later on parsed records.
    pub fn matches(&self, name: &str, since: &DateTime<FixedOffset>, until: &DateTime<FixedOffset>) -> bool {
        let (since, until) = if since <= until {
            (*since, *until)
        } else {
            (*until, *since)
        };
        let span = Span {
            since: since.naive_local(),
            until: until.with_timezone(since.offset()).naive_local(),
        };

        let mut rest = name;
        for fragment in &self.fragments {
            let width = fragment.width();
            let Some(slice) = rest.get(..width) else {
                return false;
            };
            rest = &rest[width..];

            let ok = match fragment {
                Fragment::Literal(s) => slice == s,
                placeholder => match parse_digits(slice) {
                    Some(value) => span.admits(placeholder, value),
                    None => false,
                },
            };
            if !ok {
                return false;
            }
        }
        rest.is_empty()
    }
}

impl fmt::Display for Pattern {
    /// Render back to template syntax
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Literal(s) => f.write_str(&s.replace('%', "%%"))?,
                Fragment::Year4 => f.write_str("%Y")?,
                Fragment::Year2 => f.write_str("%y")?,
                Fragment::Month => f.write_str("%m")?,
                Fragment::Day => f.write_str("%d")?,
                Fragment::Hour => f.write_str("%H")?,
                Fragment::Minute => f.write_str("%M")?,
            }
        }
        Ok(())
    }
}

fn parse_digits(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Local wall-clock span being matched against.
struct Span {
    since: NaiveDateTime,
    until: NaiveDateTime,
}

impl Span {
    fn admits(&self, fragment: &Fragment, value: i64) -> bool {
        match fragment {
            Fragment::Literal(_) => true,
            Fragment::Year4 => {
                (i64::from(self.since.year())..=i64::from(self.until.year())).contains(&value)
            }
            Fragment::Year2 => {
                let (from, to) = (i64::from(self.since.year()), i64::from(self.until.year()));
                (0..100).contains(&value)
                    && (to - from >= 99 || (from..=to).any(|y| y.rem_euclid(100) == value))
            }
            Fragment::Month => {
                if !(1..=12).contains(&value) {
                    return false;
                }
                let months = |t: &NaiveDateTime| i64::from(t.year()) * 12 + i64::from(t.month0());
                let span = months(&self.until) - months(&self.since);
                cyclic(i64::from(self.since.month0()), value - 1, span, 12)
            }
            Fragment::Day => {
                if !(1..=31).contains(&value) {
                    return false;
                }
                let from = self.since.date();
                let to = self.until.date();
                if (to - from).num_days() >= 61 {
                    return true;
                }
                from.iter_days()
                    .take_while(|d| *d <= to)
                    .any(|d| i64::from(d.day()) == value)
            }
            Fragment::Hour => {
                if !(0..=23).contains(&value) {
                    return false;
                }
                let hours = |t: &NaiveDateTime| t.and_utc().timestamp().div_euclid(3600);
                let span = hours(&self.until) - hours(&self.since);
                cyclic(i64::from(self.since.hour()), value, span, 24)
            }
            Fragment::Minute => {
                if !(0..=59).contains(&value) {
                    return false;
                }
                let minutes = |t: &NaiveDateTime| t.and_utc().timestamp().div_euclid(60);
                let span = minutes(&self.until) - minutes(&self.since);
                cyclic(i64::from(self.since.minute()), value, span, 60)
            }
        }
    }
}

/// Whether `value` is reached walking `span` steps from `start` on a cycle of `modulus`.
fn cyclic(start: i64, value: i64, span: i64, modulus: i64) -> bool {
    span >= modulus - 1 || (value - start).rem_euclid(modulus) <= span
}
