use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{NaiveDateTime, NaiveTime, Timelike};

use crate::error::AlarmError;

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// identifies an alarm for its whole life,
/// derived from the creation time in milliseconds, bumped when two alarms share a millisecond
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmId(pub u64);

impl AlarmId {
    #[must_use]
    pub fn next() -> Self {
        let millis = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
        let mut prev = LAST_ID.load(Ordering::Relaxed);
        loop {
            let id = millis.max(prev + 1);
            match LAST_ID.compare_exchange_weak(prev, id, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return Self(id),
                Err(actual) => prev = actual,
            }
        }
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlarmId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// a time of day with minute resolution, written "HH:MM" (24 hour)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduledTime(NaiveTime);

impl ScheduledTime {
    #[must_use]
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// the minute `now` falls in
    #[must_use]
    pub fn of(now: NaiveDateTime) -> Self {
        Self::from_time(now.time())
    }

    #[must_use]
    pub fn from_time(time: NaiveTime) -> Self {
        Self(NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time))
    }

    #[must_use]
    pub const fn time(self) -> NaiveTime {
        self.0
    }

    /// wraps around midnight
    #[must_use]
    pub fn add_minutes(self, minutes: u32) -> Self {
        Self(self.0 + chrono::Duration::minutes(i64::from(minutes)))
    }
}

impl FromStr for ScheduledTime {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AlarmError::MissingTime);
        }
        let invalid = || AlarmError::InvalidTime(s.to_string());
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(hour) || !two_digits(minute) {
            return Err(invalid());
        }
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }
}

impl fmt::Display for ScheduledTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// `now` with seconds and below dropped
#[must_use]
pub fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.date().and_time(ScheduledTime::of(now).time())
}

/// playable audio owned by the alarm that resolved it
///
/// Clones share one payload; it is released when the last clone (normally the
/// owning [`Alarm`]) is dropped.
#[derive(Clone)]
pub struct AudioHandle {
    bytes: Arc<[u8]>,
    origin: &'static str,
}

impl AudioHandle {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>, origin: &'static str) -> Self {
        Self {
            bytes: bytes.into(),
            origin,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn shared(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    #[must_use]
    pub const fn origin(&self) -> &'static str {
        self.origin
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for AudioHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioHandle")
            .field("origin", &self.origin)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// a validated request for a new alarm, before its audio is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmDraft {
    pub time: ScheduledTime,
    pub message: String,
}

impl AlarmDraft {
    pub fn new(time: &str, message: &str) -> Result<Self, AlarmError> {
        if time.trim().is_empty() {
            return Err(AlarmError::MissingTime);
        }
        if message.trim().is_empty() {
            return Err(AlarmError::MissingMessage);
        }
        Ok(Self {
            time: time.parse()?,
            message: message.trim().to_string(),
        })
    }
}

/// represents an alarm:
/// the time it goes off at, what it says and, when resolved, the audio it says it with
#[derive(Debug, Clone)]
pub struct Alarm {
    pub(crate) id: AlarmId,
    pub(crate) time: ScheduledTime,
    pub(crate) message: String,
    pub(crate) audio: Option<AudioHandle>,
    pub(crate) active: bool,
    pub(crate) snoozed_until: Option<ScheduledTime>,
    // minute of the last fire, so one minute never rings twice
    pub(crate) last_rang: Option<NaiveDateTime>,
}

impl Alarm {
    #[must_use]
    pub fn new(draft: AlarmDraft, audio: Option<AudioHandle>) -> Self {
        Self {
            id: AlarmId::next(),
            time: draft.time,
            message: draft.message,
            audio,
            active: true,
            snoozed_until: None,
            last_rang: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> AlarmId {
        self.id
    }

    #[must_use]
    pub const fn time(&self) -> ScheduledTime {
        self.time
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn audio(&self) -> Option<&AudioHandle> {
        self.audio.as_ref()
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn snoozed_until(&self) -> Option<ScheduledTime> {
        self.snoozed_until
    }

    #[must_use]
    pub const fn last_rang(&self) -> Option<NaiveDateTime> {
        self.last_rang
    }

    /// should this alarm ring during the minute `now` falls in
    #[must_use]
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        let minute = ScheduledTime::of(now);
        self.active
            && (self.time == minute || self.snoozed_until == Some(minute))
            && self.last_rang != Some(truncate_to_minute(now))
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {:?} ({}, {})",
            self.id,
            self.time,
            self.message,
            if self.active { "on" } else { "off" },
            self.audio.as_ref().map_or("system voice", AudioHandle::origin),
        )?;
        if let Some(until) = self.snoozed_until {
            write!(f, " snoozed until {until}")?;
        }
        Ok(())
    }
}
