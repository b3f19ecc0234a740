//! Local persistence for compost monitor readings.
//!
//! This crate provides the append-only CSV log that is the single source of
//! truth for every sample taken on the device. Remote sync never modifies
//! it; the only sync state kept on disk is a delivery watermark beside the
//! log, used to resume retries after a restart.
//!
//! # Features
//!
//! - Monotonic, gap-free sequence ids that survive restarts
//! - Every append flushed to the medium before it is acknowledged
//! - Repair of a torn trailing record after power loss
//! - Atomic clear (stage, flush, rename)
//! - Lock-free export through point-in-time snapshots
//! - A persisted delivery watermark for reconciling after a restart
//!
//! # Example
//!
//! ```no_run
//! use compost_store::{DurableLog, LogOptions};
//! use compost_types::{Sample, Timestamp};
//!
//! let mut log = DurableLog::open("/var/lib/compost", LogOptions::default())?;
//! let entry = log.append(Sample {
//!     timestamp: Timestamp::Uptime(60),
//!     temperature_c: 55.0,
//!     humidity_pct: 48.0,
//!     methane_ppm: 90.0,
//! })?;
//! assert_eq!(entry.sequence_id(), log.last_id());
//! # Ok::<(), compost_store::Error>(())
//! ```

mod error;
mod export;
mod models;
mod schema;
mod store;

pub use error::{Error, Result};
pub use export::LogSnapshot;
pub use schema::{CSV_HEADER, CURSOR_FILE_NAME, LOG_FILE_NAME};
pub use store::{DurableLog, LogOptions};

/// Default log directory following platform conventions.
///
/// - Linux: `~/.local/share/compost`
/// - macOS: `~/Library/Application Support/compost`
/// - Windows: `C:\Users\<user>\AppData\Local\compost`
pub fn default_log_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("compost")
}
