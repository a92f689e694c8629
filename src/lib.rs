//! # statuslog
//!
//! Log-structured status store for a health-monitoring daemon: every check
//! result is appended to a plain-text log, tracked in memory for live
//! dashboards and made searchable by time range without reading whole files.
//!
//! ## Features
//!
//! - **Durable append path**: one background writer, bounded queue with backpressure
//! - **Incident detection**: tolerant of late and out-of-order records
//! - **Sparse index**: time-range reads touch only the relevant byte ranges
//! - **Rotation aware**: date-templated log names, multi-file scans merged in time order
//! - **Self-monitoring**: write failures surface as incidents of the store itself
//!
//! ## Modules
//!
//! - [`storage`]: The store, records, incidents and scans
//! - [`index`]: Index structures for time-range reads
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use statuslog::storage::*;
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open the log and rebuild state from it
//!     let store = Store::new(StoreConfig::new("./status.log"), Box::new(std::io::stdout())).await?;
//!     store.restore().await?;
//!
//!     // Be told about incidents
//!     store.on_incident(std::sync::Arc::new(|record: &Record| {
//!         eprintln!("incident: {} is {}", record.target, record.status);
//!     }));
//!
//!     // Report a check result
//!     let target = Url::parse("ping:example.com")?;
//!     let now = chrono::Local::now().fixed_offset();
//!     store
//!         .report(&target, Record::new(now, Status::Failure, target.clone()).message("timeout"))
//!         .await?;
//!
//!     // Read the last day back
//!     for record in store.open_log(now - chrono::Duration::days(1), now + chrono::Duration::seconds(1)).await? {
//!         println!("{record}");
//!     }
//!
//!     // Graceful shutdown
//!     store.close().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Incident, LogScanner, ProbeHistorySnapshot, Record, Report, Status, StorageError,
    StorageResult, Store, StoreConfig,
};

pub use index::{IndexPeriod, Indexer, Pattern};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig, StoreSettings};
