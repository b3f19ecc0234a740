//! The sampling, logging and sync loop.
//!
//! One task drives everything on fixed periods:
//!
//! - **sample tick** (short): read the sensors, publish the sample for the
//!   live view
//! - **log tick** (long): append one sample to the durable log, then try to
//!   deliver the new record, then retry a few older transient failures
//! - **toggle poll**: react to web server toggle requests
//!
//! Local durability always comes first. A record is handed to the sync agent
//! only after the append returned, and nothing the agent reports changes the
//! log. The store keeps a delivery watermark beside the log; on start the
//! loop reloads the records after it into the retry backlog.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info, warn};

use compost_core::{Clock, SampleSource, SensorBackend};
use compost_types::{DeliveryResult, LogEntry, Sample};

use crate::config::ScheduleConfig;
use crate::control::ToggleControl;
use crate::state::AppState;
use crate::sync::{SyncAgent, SyncError};

/// How often the loop checks for toggle requests.
const TOGGLE_POLL: Duration = Duration::from_millis(50);

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Failed to set up sync: {0}")]
    Sync(#[from] SyncError),
    #[error("Failed to bind web server to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// Drives sampling, durable logging and best-effort sync.
pub struct Scheduler<B, C> {
    state: Arc<AppState>,
    source: SampleSource<B, C>,
    sync: Option<SyncAgent>,
    control: Option<ToggleControl>,
    schedule: ScheduleConfig,
    /// Entries whose last delivery failed transiently, oldest first.
    backlog: VecDeque<LogEntry>,
    /// A sample whose append failed, retried at the next log tick.
    owed: Option<Sample>,
}

impl<B: SensorBackend, C: Clock> Scheduler<B, C> {
    pub fn new(state: Arc<AppState>, source: SampleSource<B, C>, schedule: ScheduleConfig) -> Self {
        Self {
            state,
            source,
            sync: None,
            control: None,
            schedule,
            backlog: VecDeque::new(),
            owed: None,
        }
    }

    /// Mirror durable records to a remote endpoint.
    pub fn with_sync(mut self, agent: SyncAgent) -> Self {
        self.sync = Some(agent);
        self
    }

    /// Let the loop start and stop the web server on request.
    pub fn with_control(mut self, control: ToggleControl) -> Self {
        self.control = Some(control);
        self
    }

    /// Run until the stop signal is raised.
    pub async fn run(mut self) {
        let mut stop_rx = self.state.scheduler.subscribe_stop();
        if *stop_rx.borrow() {
            return;
        }

        self.reconcile().await;

        let warmup = self.schedule.warmup();
        if !warmup.is_zero() {
            info!("Warming up sensors for {}s", warmup.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(warmup) => {}
                _ = stop_rx.changed() => {
                    self.shutdown().await;
                    return;
                }
            }
        }

        let sample_period = self.schedule.sample_interval();
        let log_period = self.schedule.log_interval();
        info!(
            "Scheduler started (sample every {}s, log every {}s, sync {})",
            sample_period.as_secs(),
            log_period.as_secs(),
            if self.sync.is_some() { "on" } else { "off" }
        );

        let mut sample_timer = interval(sample_period);
        sample_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut log_timer = interval_at(Instant::now() + log_period, log_period);
        log_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut toggle_timer = interval(TOGGLE_POLL);
        toggle_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.state.scheduler.set_running(true);

        loop {
            tokio::select! {
                _ = sample_timer.tick() => {
                    self.take_sample().await;
                }
                _ = log_timer.tick() => {
                    self.log_tick().await;
                }
                _ = toggle_timer.tick(), if self.control.is_some() => {
                    if let Some(control) = self.control.as_mut() {
                        control.poll().await;
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Scheduler stopped");
    }

    async fn shutdown(&mut self) {
        if let Some(control) = self.control.as_mut() {
            control.shutdown().await;
        }
        self.state.scheduler.set_running(false);
        if !self.backlog.is_empty() {
            info!(
                "{} undelivered record(s) remain in the local log",
                self.backlog.len()
            );
        }
    }

    /// Reload records appended but not settled before the last shutdown.
    ///
    /// At most `backlog_capacity` of the newest ones are queued, the same
    /// records an overflowing backlog would have kept. Returns how many.
    pub async fn reconcile(&mut self) -> usize {
        if self.sync.is_none() || self.schedule.backlog_capacity == 0 {
            return 0;
        }

        let capacity = self.schedule.backlog_capacity;
        let loaded = {
            let log = self.state.log.lock().await;
            let unsettled = log.last_id() - log.delivered_through();
            if unsettled > capacity as u64 {
                warn!(
                    "{} records were never delivered, retrying the newest {}",
                    unsettled, capacity
                );
            }
            let after = log
                .delivered_through()
                .max(log.last_id().saturating_sub(capacity as u64));
            log.readings_after(after, capacity)
        };

        let readings = match loaded {
            Ok(readings) => readings,
            Err(e) => {
                warn!("Failed to reload undelivered records: {}", e);
                return 0;
            }
        };

        let count = readings.len();
        self.backlog.clear();
        self.backlog.extend(readings.into_iter().map(LogEntry::pending));
        self.state.scheduler.stats.write().await.backlog_len = self.backlog.len();
        if count > 0 {
            info!("Queued {} undelivered record(s) from the local log", count);
        }
        count
    }

    /// Read the sensors and publish the result.
    pub async fn take_sample(&mut self) -> Sample {
        let sample = self.source.sample().await;
        self.state.publish_sample(sample);
        self.state.scheduler.stats.write().await.samples_taken += 1;
        sample
    }

    /// Append one sample, then deliver.
    ///
    /// A sample whose append failed is owed and takes this tick's slot ahead
    /// of a fresh one, so its id and timestamp stay in order.
    pub async fn log_tick(&mut self) -> Option<LogEntry> {
        let sample = match self.owed.take() {
            Some(sample) => sample,
            None => self.take_sample().await,
        };

        let appended = {
            let mut log = self.state.log.lock().await;
            log.append(sample)
        };

        let entry = match appended {
            Ok(entry) => entry,
            Err(e) => {
                if e.is_retryable() {
                    warn!("Append failed, will retry next tick: {}", e);
                } else {
                    error!("Append failed: {}", e);
                }
                self.owed = Some(sample);
                let mut stats = self.state.scheduler.stats.write().await;
                stats.append_failures += 1;
                stats.append_owed = true;
                stats.last_error = Some(e.to_string());
                return None;
            }
        };

        debug!("Logged record {}", entry.sequence_id());
        {
            let mut stats = self.state.scheduler.stats.write().await;
            stats.appends += 1;
            stats.append_owed = false;
            stats.last_id = entry.sequence_id();
            stats.last_append_at = Some(OffsetDateTime::now_utc());
        }

        Some(self.sync_entry(entry).await)
    }

    async fn sync_entry(&mut self, mut entry: LogEntry) -> LogEntry {
        let Some(agent) = self.sync.as_ref() else {
            return entry;
        };

        let result = agent.try_deliver(&entry).await;
        entry.record(result);
        self.state.scheduler.stats.write().await.record_delivery(result);

        match result {
            DeliveryResult::Delivered => self.drain_backlog().await,
            DeliveryResult::TransientFailure => self.push_backlog(entry),
            DeliveryResult::PermanentFailure => {
                warn!(
                    "Record {} rejected by the endpoint; it stays in the local log only",
                    entry.sequence_id()
                );
            }
        }
        self.state.scheduler.stats.write().await.backlog_len = self.backlog.len();
        self.advance_watermark(entry.sequence_id()).await;

        entry
    }

    /// Everything before the oldest backlog entry is settled; with an empty
    /// backlog, everything up to the newest record is.
    async fn advance_watermark(&self, newest: u64) {
        let through = self
            .backlog
            .front()
            .map_or(newest, |oldest| oldest.sequence_id() - 1);
        if let Err(e) = self.state.log.lock().await.set_delivered_through(through) {
            warn!("Failed to persist delivery watermark: {}", e);
        }
    }

    /// Retry up to `backlog_per_tick` entries, oldest first.
    async fn drain_backlog(&mut self) {
        let Some(agent) = self.sync.as_ref() else {
            return;
        };

        for _ in 0..self.schedule.backlog_per_tick {
            let Some(mut entry) = self.backlog.pop_front() else {
                break;
            };
            let result = agent.try_deliver(&entry).await;
            entry.record(result);
            self.state.scheduler.stats.write().await.record_delivery(result);

            if result == DeliveryResult::TransientFailure {
                self.backlog.push_front(entry);
                break;
            }
        }
    }

    fn push_backlog(&mut self, entry: LogEntry) {
        if self.schedule.backlog_capacity == 0 {
            return;
        }
        if self.backlog.len() >= self.schedule.backlog_capacity
            && let Some(dropped) = self.backlog.pop_front()
        {
            warn!(
                "Retry backlog full, no longer retrying record {} (it remains in the local log)",
                dropped.sequence_id()
            );
        }
        self.backlog.push_back(entry);
    }

    /// Ids waiting for another delivery attempt, oldest first.
    pub fn backlog_ids(&self) -> Vec<u64> {
        self.backlog.iter().map(LogEntry::sequence_id).collect()
    }

    /// Whether a sample is waiting for its append to be retried.
    pub fn has_owed_sample(&self) -> bool {
        self.owed.is_some()
    }
}
