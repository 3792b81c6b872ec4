//! Owns "is an alarm ringing right now". At most one session exists at a time, and a
//! session that has been stopped or snoozed can't make a sound again: its token is dead.

use std::{fmt, time::Instant};

use crate::{
    alarm::{Alarm, AlarmId, ScheduledTime},
    playback::ClipPlayer,
    registry::AlarmRegistry,
    speech::{SpeechEvent, SpeechLoopDriver, SpeechSynthesizer},
};

/// Tells one ringing session from the next. Issued in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(pub u64);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session #{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStrategy {
    /// the alarm's resolved audio, looped
    Clip,
    /// the message through the on-device voice, repeated
    SpeechLoop,
}

impl fmt::Display for PlaybackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clip => "clip",
            Self::SpeechLoop => "system voice",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Ringing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingingSession {
    pub alarm_id: AlarmId,
    pub strategy: PlaybackStrategy,
    pub token: SessionToken,
}

#[derive(Debug)]
pub struct SessionController<P, S> {
    player: P,
    speech: SpeechLoopDriver<S>,
    session: Option<RingingSession>,
    last_token: u64,
}

impl<P: ClipPlayer, S: SpeechSynthesizer> SessionController<P, S> {
    pub const fn new(player: P, speech: SpeechLoopDriver<S>) -> Self {
        Self {
            player,
            speech,
            session: None,
            last_token: 0,
        }
    }

    /// Starts ringing `alarm`. Refused (`None`) only while another session rings or when
    /// the alarm is inactive; a clip the host won't play falls back to the speech loop.
    pub fn ring(&mut self, alarm: &Alarm, now: Instant) -> Option<&RingingSession> {
        if self.session.is_some() || !alarm.is_active() {
            return None;
        }
        self.last_token += 1;
        let token = SessionToken(self.last_token);
        let strategy = match alarm.audio() {
            Some(clip) => match self.player.play_looping(clip) {
                Ok(()) => PlaybackStrategy::Clip,
                Err(e) => {
                    log::warn!("alarm {} clip blocked ({e}), speaking instead", alarm.id());
                    self.speech.start(alarm.message(), token, now);
                    PlaybackStrategy::SpeechLoop
                }
            },
            None => {
                self.speech.start(alarm.message(), token, now);
                PlaybackStrategy::SpeechLoop
            }
        };
        log::info!("alarm {} ringing with {strategy} ({token})", alarm.id());
        self.session = Some(RingingSession {
            alarm_id: alarm.id(),
            strategy,
            token,
        });
        self.session.as_ref()
    }

    /// Silences the session and deactivates its alarm.
    pub fn stop(&mut self, registry: &mut AlarmRegistry) -> Option<AlarmId> {
        let session = self.dismiss()?;
        registry.deactivate(session.alarm_id);
        log::info!("alarm {} stopped", session.alarm_id);
        Some(session.alarm_id)
    }

    /// Silences the session, leaving the alarm active to ring again at `until`.
    pub fn snooze(&mut self, registry: &mut AlarmRegistry, until: ScheduledTime) -> Option<AlarmId> {
        let session = self.dismiss()?;
        registry.snooze(session.alarm_id, until);
        log::info!("alarm {} snoozed until {until}", session.alarm_id);
        Some(session.alarm_id)
    }

    /// Ends the session without touching its alarm, for when the alarm itself is going away.
    pub fn dismiss(&mut self) -> Option<RingingSession> {
        let session = self.session.take()?;
        self.player.stop();
        self.speech.cancel(session.token);
        Some(session)
    }

    pub fn on_speech_event(&mut self, event: &SpeechEvent, now: Instant) {
        self.speech.on_event(event, now);
    }

    pub fn poll(&mut self, now: Instant) {
        self.speech.poll(now);
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.speech.next_deadline()
    }

    #[must_use]
    pub const fn session(&self) -> Option<&RingingSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Ringing
        } else {
            SessionState::Idle
        }
    }

    #[must_use]
    pub const fn is_ringing(&self) -> bool {
        self.session.is_some()
    }

    pub const fn player(&self) -> &P {
        &self.player
    }

    pub const fn speech(&self) -> &SpeechLoopDriver<S> {
        &self.speech
    }
}
