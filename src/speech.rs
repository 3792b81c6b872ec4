//! The speech loop: says the alarm message with the on-device voice, waits, says it
//! again, until the ringing session that started it is gone.
//!
//! Backends report the end of an utterance asynchronously and those reports can arrive
//! after the alarm was stopped. Every utterance is therefore tagged with the
//! [`SessionToken`] of the session that asked for it, and the driver ignores anything
//! tagged with a token other than the live one.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{config::SpeechSettings, error::SpeechError, session::SessionToken};

/// progress report from a speech backend, tagged with the session that spoke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Started(SessionToken),
    Ended(SessionToken),
    Failed(SessionToken, String),
}

/// how the backend will let us know the utterance is over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utterance {
    /// a [`SpeechEvent`] will follow
    Notified,
    /// no notification, assume it's over after this long
    Estimated(Duration),
}

/// delivers backend events to whoever runs the driver
pub type SpeechNotifier = Arc<dyn Fn(SpeechEvent) + Send + Sync>;

pub trait SpeechSynthesizer {
    fn speak(&mut self, text: &str, token: SessionToken) -> Result<Utterance, SpeechError>;

    /// best effort, what is already being said may finish
    fn stop(&mut self);
}

impl<S: SpeechSynthesizer + ?Sized> SpeechSynthesizer for Box<S> {
    fn speak(&mut self, text: &str, token: SessionToken) -> Result<Utterance, SpeechError> {
        (**self).speak(text, token)
    }

    fn stop(&mut self) {
        (**self).stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Speaking { assumed_end: Option<Instant> },
    Pausing { until: Instant },
}

#[derive(Debug)]
struct SpeechLoop {
    token: SessionToken,
    message: String,
    phase: Phase,
    utterances: u32,
}

#[derive(Debug)]
pub struct SpeechLoopDriver<S> {
    synth: S,
    pause: Duration,
    current: Option<SpeechLoop>,
}

/// longest wait between two utterances
pub const MAX_PAUSE: Duration = Duration::from_secs(60);

impl<S: SpeechSynthesizer> SpeechLoopDriver<S> {
    /// `pause` is capped at [`MAX_PAUSE`]
    pub fn new(synth: S, pause: Duration) -> Self {
        Self {
            synth,
            pause: pause.min(MAX_PAUSE),
            current: None,
        }
    }

    /// replaces any running loop
    pub fn start(&mut self, message: &str, token: SessionToken, now: Instant) {
        if self.current.is_some() {
            self.synth.stop();
        }
        self.current = Some(SpeechLoop {
            token,
            message: message.to_string(),
            phase: Phase::Pausing { until: now },
            utterances: 0,
        });
        self.speak(now);
    }

    /// invalidates `token`, a no-op if it isn't the live one; returns whether a loop was cancelled
    pub fn cancel(&mut self, token: SessionToken) -> bool {
        if !self.is_live(token) {
            return false;
        }
        if let Some(speech_loop) = self.current.take() {
            log::debug!(
                "cancelled speech loop {token} after {} utterances",
                speech_loop.utterances
            );
        }
        self.synth.stop();
        true
    }

    pub fn on_event(&mut self, event: &SpeechEvent, now: Instant) {
        match event {
            SpeechEvent::Started(token) => log::trace!("utterance started for {token}"),
            SpeechEvent::Ended(token) => self.finish_utterance(*token, now),
            SpeechEvent::Failed(token, reason) => {
                log::warn!("utterance failed for {token}: {reason}");
                self.finish_utterance(*token, now);
            }
        }
    }

    /// runs whatever is due at `now`: an estimated utterance ending or a pause running out
    pub fn poll(&mut self, now: Instant) {
        let pause = self.pause;
        let Some(speech_loop) = &mut self.current else {
            return;
        };
        if let Phase::Speaking {
            assumed_end: Some(end),
        } = speech_loop.phase
        {
            if now >= end {
                speech_loop.phase = Phase::Pausing { until: end + pause };
            }
        }
        if matches!(speech_loop.phase, Phase::Pausing { until } if now >= until) {
            self.speak(now);
        }
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.current.as_ref()?.phase {
            Phase::Speaking { assumed_end } => assumed_end,
            Phase::Pausing { until } => Some(until),
        }
    }

    #[must_use]
    pub fn is_live(&self, token: SessionToken) -> bool {
        self.current
            .as_ref()
            .is_some_and(|speech_loop| speech_loop.token == token)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    pub const fn synth(&self) -> &S {
        &self.synth
    }

    fn finish_utterance(&mut self, token: SessionToken, now: Instant) {
        let pause = self.pause;
        match &mut self.current {
            Some(speech_loop)
                if speech_loop.token == token
                    && matches!(speech_loop.phase, Phase::Speaking { .. }) =>
            {
                speech_loop.phase = Phase::Pausing { until: now + pause };
            }
            _ => log::trace!("ignoring stale speech event for {token}"),
        }
    }

    fn speak(&mut self, now: Instant) {
        let Some(speech_loop) = &mut self.current else {
            return;
        };
        speech_loop.utterances += 1;
        log::debug!(
            "speaking utterance {} for {}",
            speech_loop.utterances,
            speech_loop.token
        );
        speech_loop.phase = match self.synth.speak(&speech_loop.message, speech_loop.token) {
            Ok(Utterance::Notified) => Phase::Speaking { assumed_end: None },
            Ok(Utterance::Estimated(length)) => Phase::Speaking {
                assumed_end: Some(now + length),
            },
            Err(e) => {
                log::warn!("couldn't speak alarm message: {e}");
                Phase::Pausing {
                    until: now + self.pause,
                }
            }
        };
    }
}

/// rough length of `text` spoken at `rate` (1.0 = ~170 words per minute)
#[must_use]
pub fn estimate_duration(text: &str, rate: f32) -> Duration {
    let words = text.split_whitespace().count().max(1);
    #[allow(clippy::cast_precision_loss)]
    let seconds = words as f32 * 60.0 / (170.0 * rate.max(0.1));
    Duration::from_secs_f32(seconds + 0.5)
}

/// `espeak` in a child process. Linux has no speech backend in the `tts` crate
/// without speech-dispatcher, so this is what the alarm speaks with there.
pub struct Espeak {
    words_per_minute: u32,
    pitch: u32,
    notify: SpeechNotifier,
    running: Option<Arc<std::sync::Mutex<Option<std::process::Child>>>>,
}

impl Espeak {
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(settings: SpeechSettings, notify: SpeechNotifier) -> Self {
        Self {
            words_per_minute: (175.0 * settings.rate).clamp(80.0, 450.0) as u32,
            pitch: (50.0 * settings.pitch).clamp(0.0, 99.0) as u32,
            notify,
            running: None,
        }
    }
}

impl SpeechSynthesizer for Espeak {
    fn speak(&mut self, text: &str, token: SessionToken) -> Result<Utterance, SpeechError> {
        use std::process::{Command, Stdio};

        self.stop();
        let child = Command::new("espeak")
            .arg("-s")
            .arg(self.words_per_minute.to_string())
            .arg("-p")
            .arg(self.pitch.to_string())
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SpeechError::Unavailable(format!("couldn't run espeak: {e}")))?;
        (self.notify)(SpeechEvent::Started(token));

        let slot = Arc::new(std::sync::Mutex::new(Some(child)));
        self.running = Some(Arc::clone(&slot));
        let notify = Arc::clone(&self.notify);
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_millis(50));
            let Ok(mut guard) = slot.lock() else {
                break;
            };
            // emptied by stop(): the session is gone, nobody is listening
            let Some(child) = guard.as_mut() else {
                break;
            };
            let event = match child.try_wait() {
                Ok(None) => continue,
                Ok(Some(status)) if status.success() => SpeechEvent::Ended(token),
                Ok(Some(status)) => SpeechEvent::Failed(token, format!("espeak exited with {status}")),
                Err(e) => SpeechEvent::Failed(token, e.to_string()),
            };
            guard.take();
            drop(guard);
            notify(event);
            break;
        });
        Ok(Utterance::Notified)
    }

    fn stop(&mut self) {
        let Some(slot) = self.running.take() else {
            return;
        };
        if let Ok(mut slot) = slot.lock() {
            if let Some(mut child) = slot.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        };
    }
}

#[cfg(not(target_os = "linux"))]
pub use system::SystemSpeech;

#[cfg(not(target_os = "linux"))]
mod system {
    use std::sync::{Arc, Mutex};

    use tts::{Tts, UtteranceId};

    use super::{
        estimate_duration, SessionToken, SpeechError, SpeechEvent, SpeechNotifier,
        SpeechSynthesizer, Utterance,
    };
    use crate::config::SpeechSettings;

    type Pending = Arc<Mutex<Vec<(UtteranceId, SessionToken)>>>;

    fn take_token(pending: &Pending, id: UtteranceId) -> Option<SessionToken> {
        let mut pending = pending.lock().ok()?;
        let index = pending.iter().position(|(pending_id, _)| *pending_id == id)?;
        Some(pending.remove(index).1)
    }

    /// the platform voice through the `tts` crate
    pub struct SystemSpeech {
        tts: Tts,
        pending: Pending,
        callbacks: bool,
        rate: f32,
    }

    impl SystemSpeech {
        pub fn new(settings: SpeechSettings, notify: SpeechNotifier) -> Result<Self, SpeechError> {
            let mut tts = Tts::default().map_err(|e| SpeechError::Unavailable(e.to_string()))?;
            let features = tts.supported_features();
            if features.rate {
                let rate = (tts.normal_rate() * settings.rate).clamp(tts.min_rate(), tts.max_rate());
                let _ = tts.set_rate(rate);
            }
            if features.pitch {
                let pitch =
                    (tts.normal_pitch() * settings.pitch).clamp(tts.min_pitch(), tts.max_pitch());
                let _ = tts.set_pitch(pitch);
            }

            let pending: Pending = Arc::default();
            let callbacks = features.utterance_callbacks;
            if callbacks {
                let (begin_pending, begin_notify) = (Arc::clone(&pending), Arc::clone(&notify));
                tts.on_utterance_begin(Some(Box::new(move |id| {
                    let started = begin_pending.lock().ok().and_then(|pending| {
                        pending
                            .iter()
                            .find(|(pending_id, _)| *pending_id == id)
                            .map(|(_, token)| *token)
                    });
                    if let Some(token) = started {
                        begin_notify(SpeechEvent::Started(token));
                    }
                })))
                .map_err(|e| SpeechError::Backend(e.to_string()))?;

                let (end_pending, end_notify) = (Arc::clone(&pending), Arc::clone(&notify));
                tts.on_utterance_end(Some(Box::new(move |id| {
                    if let Some(token) = take_token(&end_pending, id) {
                        end_notify(SpeechEvent::Ended(token));
                    }
                })))
                .map_err(|e| SpeechError::Backend(e.to_string()))?;

                // interrupted utterances never report an end, so just forget them
                let stop_pending = Arc::clone(&pending);
                tts.on_utterance_stop(Some(Box::new(move |id| {
                    take_token(&stop_pending, id);
                })))
                .map_err(|e| SpeechError::Backend(e.to_string()))?;
            }

            Ok(Self {
                tts,
                pending,
                callbacks,
                rate: settings.rate,
            })
        }
    }

    impl SpeechSynthesizer for SystemSpeech {
        fn speak(&mut self, text: &str, token: SessionToken) -> Result<Utterance, SpeechError> {
            let id = self
                .tts
                .speak(text, true)
                .map_err(|e| SpeechError::Backend(e.to_string()))?;
            match id {
                Some(id) if self.callbacks => {
                    if let Ok(mut pending) = self.pending.lock() {
                        pending.push((id, token));
                    }
                    Ok(Utterance::Notified)
                }
                _ => Ok(Utterance::Estimated(estimate_duration(text, self.rate))),
            }
        }

        fn stop(&mut self) {
            let _ = self.tts.stop();
        }
    }
}
