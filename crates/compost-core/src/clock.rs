//! Time sources for stamping samples.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use compost_types::Timestamp;
use time::{OffsetDateTime, UtcOffset};

/// Earliest wall-clock time considered synchronised (2024-01-01T00:00:00Z).
///
/// A board that boots without a battery-backed RTC starts near the epoch
/// until a time sync completes.
pub const SYNCED_AFTER_UNIX: i64 = 1_704_067_200;

/// Source of wall-clock time and uptime.
pub trait Clock: Send + Sync {
    /// Current wall-clock time, or `None` while the clock is not trustworthy.
    fn wall_clock(&self) -> Option<OffsetDateTime>;

    /// Time elapsed since start-up.
    fn uptime(&self) -> Duration;

    /// Best available timestamp: wall clock when synchronised, uptime otherwise.
    fn timestamp(&self) -> Timestamp {
        match self.wall_clock() {
            Some(at) => Timestamp::from_wall_clock(at),
            None => Timestamp::from_uptime(self.uptime()),
        }
    }
}

/// The host clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
    offset: UtcOffset,
}

impl SystemClock {
    /// A clock reporting UTC.
    pub fn new() -> Self {
        Self::with_offset(UtcOffset::UTC)
    }

    /// A clock reporting wall-clock time at a fixed UTC offset.
    pub fn with_offset(offset: UtcOffset) -> Self {
        Self {
            started: Instant::now(),
            offset,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn wall_clock(&self) -> Option<OffsetDateTime> {
        let now = OffsetDateTime::now_utc();
        if now.unix_timestamp() < SYNCED_AFTER_UNIX {
            return None;
        }
        Some(now.to_offset(self.offset))
    }

    fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A clock driven by hand, for tests and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    wall: Mutex<Option<OffsetDateTime>>,
    uptime: Mutex<Duration>,
}

impl ManualClock {
    /// An unsynchronised clock at zero uptime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or clear) the wall-clock time.
    pub fn set_wall_clock(&self, at: Option<OffsetDateTime>) {
        if let Ok(mut wall) = self.wall.lock() {
            *wall = at;
        }
    }

    /// Advance uptime and, if set, the wall clock.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut uptime) = self.uptime.lock() {
            *uptime += by;
        }
        if let Ok(mut wall) = self.wall.lock()
            && let Some(at) = wall.as_mut()
        {
            *at += by;
        }
    }
}

impl Clock for ManualClock {
    fn wall_clock(&self) -> Option<OffsetDateTime> {
        self.wall.lock().ok().and_then(|wall| *wall)
    }

    fn uptime(&self) -> Duration {
        self.uptime.lock().map(|u| *u).unwrap_or_default()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn wall_clock(&self) -> Option<OffsetDateTime> {
        (**self).wall_clock()
    }

    fn uptime(&self) -> Duration {
        (**self).uptime()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_unsynced_clock_falls_back_to_uptime() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(95));
        assert_eq!(clock.timestamp(), Timestamp::Uptime(95));
    }

    #[test]
    fn test_synced_clock_uses_wall_time() {
        let clock = ManualClock::new();
        clock.set_wall_clock(Some(datetime!(2025-05-01 12:00:00 UTC)));
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.timestamp().to_string(), "2025-05-01 12:00:30");
    }

    #[test]
    fn test_system_clock_is_synced_on_a_normal_host() {
        let clock = SystemClock::new();
        assert!(clock.wall_clock().is_some());
        assert!(clock.timestamp().is_wall_clock());
    }
}
