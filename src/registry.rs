//! The ordered set of alarms. Pure data: nothing in here knows what time it is.

use chrono::NaiveDateTime;

use crate::{
    alarm::{truncate_to_minute, Alarm, AlarmDraft, AlarmId, AudioHandle, ScheduledTime},
    error::AlarmError,
};

/// Alarms in insertion order. Several alarms may share a time.
#[derive(Debug, Default)]
pub struct AlarmRegistry {
    alarms: Vec<Alarm>,
}

impl AlarmRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an active alarm with no resolved audio.
    pub fn add(&mut self, time: &str, message: &str) -> Result<&Alarm, AlarmError> {
        let draft = AlarmDraft::new(time, message)?;
        Ok(self.insert(draft, None))
    }

    pub fn insert(&mut self, draft: AlarmDraft, audio: Option<AudioHandle>) -> &Alarm {
        let alarm = Alarm::new(draft, audio);
        log::info!("added alarm {alarm}");
        self.alarms.push(alarm);
        &self.alarms[self.alarms.len() - 1]
    }

    /// Deleting an unknown id is a no-op. The alarm's audio goes with it.
    pub fn remove(&mut self, id: AlarmId) -> Option<Alarm> {
        let index = self.alarms.iter().position(|alarm| alarm.id == id)?;
        let alarm = self.alarms.remove(index);
        log::info!("removed alarm {alarm}");
        Some(alarm)
    }

    pub fn deactivate(&mut self, id: AlarmId) -> bool {
        self.get_mut(id).map_or(false, |alarm| {
            alarm.active = false;
            alarm.snoozed_until = None;
            true
        })
    }

    /// Flips `is_active`, returning the new value.
    pub fn toggle(&mut self, id: AlarmId) -> Option<bool> {
        let alarm = self.get_mut(id)?;
        alarm.active = !alarm.active;
        alarm.snoozed_until = None;
        Some(alarm.active)
    }

    pub fn snooze(&mut self, id: AlarmId, until: ScheduledTime) -> bool {
        self.get_mut(id).map_or(false, |alarm| {
            alarm.snoozed_until = Some(until);
            true
        })
    }

    /// Records that `id` rang during the minute `now` falls in and consumes any snooze.
    pub fn mark_rang(&mut self, id: AlarmId, now: NaiveDateTime) {
        if let Some(alarm) = self.get_mut(id) {
            alarm.last_rang = Some(truncate_to_minute(now));
            alarm.snoozed_until = None;
        }
    }

    #[must_use]
    pub fn get(&self, id: AlarmId) -> Option<&Alarm> {
        self.alarms.iter().find(|alarm| alarm.id == id)
    }

    pub fn get_mut(&mut self, id: AlarmId) -> Option<&mut Alarm> {
        self.alarms.iter_mut().find(|alarm| alarm.id == id)
    }

    pub fn list(&self) -> impl Iterator<Item = &Alarm> {
        self.alarms.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_missing_fields_without_change() {
        let mut registry = AlarmRegistry::new();
        assert_eq!(registry.add("", "hi").unwrap_err(), AlarmError::MissingTime);
        assert_eq!(
            registry.add("07:00", "").unwrap_err(),
            AlarmError::MissingMessage
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn keeps_insertion_order_and_duplicate_times() {
        let mut registry = AlarmRegistry::new();
        let first = registry.add("08:30", "stretch").unwrap().id();
        let second = registry.add("08:30", "water").unwrap().id();
        let third = registry.add("06:00", "run").unwrap().id();
        let ids: Vec<_> = registry.list().map(Alarm::id).collect();
        assert_eq!(ids, vec![first, second, third]);
        assert!(registry.list().all(Alarm::is_active));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = AlarmRegistry::new();
        let id = registry.add("08:30", "stretch").unwrap().id();
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.remove(AlarmId(1)).is_none());
    }

    #[test]
    fn remove_releases_audio() {
        let mut registry = AlarmRegistry::new();
        let handle = AudioHandle::new(vec![0_u8; 16], "remote voice");
        let payload = handle.shared();
        let draft = AlarmDraft::new("08:30", "stretch").unwrap();
        let id = registry.insert(draft, Some(handle)).id();
        assert_eq!(std::sync::Arc::strong_count(&payload), 2);
        drop(registry.remove(id));
        assert_eq!(std::sync::Arc::strong_count(&payload), 1);
    }

    #[test]
    fn toggle_and_deactivate() {
        let mut registry = AlarmRegistry::new();
        let id = registry.add("08:30", "stretch").unwrap().id();
        assert_eq!(registry.toggle(id), Some(false));
        assert_eq!(registry.toggle(id), Some(true));
        assert!(registry.snooze(id, ScheduledTime::from_hm(8, 39).unwrap()));
        assert!(registry.deactivate(id));
        let alarm = registry.get(id).unwrap();
        assert!(!alarm.is_active());
        assert_eq!(alarm.snoozed_until(), None);
        assert_eq!(registry.toggle(AlarmId(1)), None);
        assert!(!registry.deactivate(AlarmId(1)));
    }
}
