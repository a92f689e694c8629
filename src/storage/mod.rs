//! Status store
//!
//! This module provides the core record storage functionality:
//!
//! - **types**: Core data structures (Record, Status) and the line codec
//! - **history**: Bounded per-target probe histories
//! - **incident**: Incident detection over the record stream
//! - **writer**: Background writer task, write-path health
//! - **scanner**: Time-bounded scans over memory or log files
//! - **clock**: Injectable wall clock
//! - **engine**: The store orchestrating all components
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   report → queue (32) → writer → log file → index
//!          ↘ incident tracker + probe history (synchronous)
//!
//! Read Path:
//!   open_log → candidate files → index ranges / point search → parse → filter
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use statuslog::storage::{Record, Status, Store, StoreConfig};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::new(StoreConfig::new("./status.log"), Box::new(std::io::stdout())).await?;
//!     store.restore().await?;
//!
//!     let target = Url::parse("https://example.com/health")?;
//!     let now = chrono::Local::now().fixed_offset();
//!     store.report(&target, Record::new(now, Status::Healthy, target.clone())).await?;
//!
//!     for incident in store.current_incidents().await {
//!         println!("{} {} since {}", incident.target, incident.status, incident.started_at);
//!     }
//!
//!     store.close().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod engine;
pub mod error;
pub mod history;
pub mod incident;
pub mod scanner;
pub mod types;
pub mod writer;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{IncidentCallback, Report, Store, StoreConfig, DEFAULT_RESTORE_BYTES, LARGE_LOG_BYTES};
pub use error::{StorageError, StorageResult};
pub use history::{ProbeHistory, ProbeHistoryMap, ProbeHistorySnapshot, PROBE_HISTORY_LEN};
pub use incident::{Incident, IncidentTracker, INCIDENT_HISTORY_LEN};
pub use scanner::{ByteSegment, FileScanner, LogScanner, MemoryScanner, MergedScanner};
pub use types::{
    escape_message, internal_log_target, is_pseudo_target, redact_target, unescape_message,
    Record, Status, ALERT_SCHEME, INTERNAL_SCHEME,
};
pub use writer::{Console, ERROR_LOG_LEN, WRITE_QUEUE_LEN};
