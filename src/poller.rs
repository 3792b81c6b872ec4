use std::time::Duration;

use chrono::NaiveDateTime;

use crate::{alarm::AlarmId, registry::AlarmRegistry};

/// wall clock, swappable so tests can pick the time
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Compares the clock against the registry once per `interval`, at minute resolution.
#[derive(Debug, Clone, Copy)]
pub struct ClockPoller {
    interval: Duration,
}

impl Default for ClockPoller {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ClockPoller {
    /// `interval` is capped at a minute so no matching minute can be skipped while awake
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.clamp(Duration::from_millis(10), Duration::from_secs(60)),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// The first alarm, in insertion order, that should ring now. Coinciding alarms wait
    /// for a later tick, which may never come if their minute runs out first.
    #[must_use]
    pub fn due(&self, now: NaiveDateTime, registry: &AlarmRegistry) -> Option<AlarmId> {
        registry
            .list()
            .find(|alarm| alarm.is_due(now))
            .map(|alarm| alarm.id())
    }
}
