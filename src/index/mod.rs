//! Index structures for time-range reads
//!
//! Three primitives keep scans from touching unrelated bytes:
//!
//! - **Pattern**: filename templates; shortlists rotated files by name
//! - **Indexer**: sparse byte-range index over the live log file
//! - **point_search**: binary search for a timestamp inside one file
//!
//! # Architecture
//!
//! ```text
//! Query: "records between 09:00 and 10:00"
//!        ↓
//! Pattern: which files could hold that span?  → [status_20240501.log]
//!        ↓
//! Indexer: which byte ranges of the live file? → [0..81920, 163840..170003]
//!        ↓
//! point_search: where does the unindexed tail start? → 170003 + k
//!        ↓
//! Parse only those bytes, filter by exact time
//! ```

mod indexer;
mod pattern;
mod point_search;

pub use indexer::{IndexPeriod, Indexer, DEFAULT_PERIOD_RECORDS};
pub use pattern::Pattern;
pub use point_search::{point_search, point_search_range};
