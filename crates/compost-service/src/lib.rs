//! Local-first logger, cloud sync and HTTP dashboard for the compost monitor.
//!
//! This crate provides a service that:
//! - Samples the temperature, humidity and methane channels on a short period
//! - Appends one sample per log period to the durable CSV log
//! - Mirrors each new record to a remote REST endpoint, best effort
//! - Serves a dashboard, a JSON snapshot, the CSV export and a clear action
//! - Starts and stops the web server on `SIGUSR1`
//!
//! # HTTP Endpoints
//!
//! - `GET /` - Dashboard
//! - `GET /data.json` - Latest sample
//! - `GET /csv` - Full log
//! - `GET /delete` - Clear the log
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Scheduler and sync counters
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/compost/monitor.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:80"
//!
//! [storage]
//! dir = "/var/lib/compost"
//!
//! [sensor]
//! backend = "sysfs"
//!
//! [schedule]
//! sample_interval_secs = 2
//! log_interval_secs = 60
//!
//! [sync]
//! enabled = true
//! endpoint = "https://telemetry.example.com/rest/v1/lecturas"
//!
//! [sync.headers]
//! apikey = "..."
//! Authorization = "Bearer ..."
//! ```

pub mod api;
pub mod config;
pub mod control;
pub mod scheduler;
pub mod state;
pub mod sync;

pub use config::{
    BackendKind, Config, ConfigError, ControlConfig, ScheduleConfig, SensorConfig, ServerConfig,
    StorageConfig, SyncConfig,
};
pub use control::{ToggleControl, ToggleSignal, WebServer};
pub use scheduler::{Scheduler, SchedulerError};
pub use state::{AppState, SchedulerStats};
pub use sync::{Reachability, SyncAgent, SyncError, TcpProbe};
