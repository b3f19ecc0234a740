//! Application state shared across handlers and the scheduler.
//!
//! The scheduler is the only writer. HTTP handlers see:
//!
//! - **`log`** (Mutex): held only long enough to take a snapshot or clear
//! - **`latest`** (watch): the most recent [`Sample`], copied out on read
//! - **`scheduler.stats`** (RwLock): counters for `/api/status`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use compost_store::DurableLog;
use compost_types::{DeliveryResult, Sample};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The durable log.
    pub log: Mutex<DurableLog>,
    /// Configuration as loaded at startup.
    pub config: RwLock<Config>,
    /// Latest sample published by the scheduler.
    latest_tx: watch::Sender<Option<Sample>>,
    /// Scheduler control and counters.
    pub scheduler: SchedulerState,
}

impl AppState {
    /// Create new application state.
    pub fn new(log: DurableLog, config: Config) -> Arc<Self> {
        let (latest_tx, _) = watch::channel(None);
        Arc::new(Self {
            log: Mutex::new(log),
            config: RwLock::new(config),
            latest_tx,
            scheduler: SchedulerState::new(),
        })
    }

    /// Replace the latest sample.
    pub fn publish_sample(&self, sample: Sample) {
        self.latest_tx.send_replace(Some(sample));
    }

    /// The latest sample, if one has been taken.
    pub fn latest_sample(&self) -> Option<Sample> {
        *self.latest_tx.borrow()
    }
}

/// State for tracking and controlling the scheduler.
pub struct SchedulerState {
    running: AtomicBool,
    /// When the scheduler entered its loop (Unix timestamp).
    started_at: AtomicU64,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    /// Counters reported by `/api/status`.
    pub stats: RwLock<SchedulerStats>,
}

impl SchedulerState {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            stop_tx,
            stop_rx,
            stats: RwLock::new(SchedulerStats::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    pub fn started_at(&self) -> Option<OffsetDateTime> {
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Ask the scheduler loop to finish its current tick and exit.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub samples_taken: u64,
    pub appends: u64,
    pub append_failures: u64,
    pub delivered: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    /// Entries waiting in the in-memory retry queue.
    pub backlog_len: usize,
    /// Id of the most recent durable record.
    pub last_id: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_append_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    /// Whether a sample is waiting to be appended after a storage failure.
    pub append_owed: bool,
    pub web_enabled: bool,
}

impl SchedulerStats {
    /// Count one delivery outcome.
    pub fn record_delivery(&mut self, result: DeliveryResult) {
        match result {
            DeliveryResult::Delivered => self.delivered += 1,
            DeliveryResult::TransientFailure => self.transient_failures += 1,
            DeliveryResult::PermanentFailure => self.permanent_failures += 1,
        }
    }
}
