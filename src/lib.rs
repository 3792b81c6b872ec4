#![warn(clippy::pedantic, clippy::nursery, clippy::cargo)]
#![deny(clippy::use_self, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! Spoken alarms: schedule a message for a time of day and hear it, in a cloned
//! voice when one could be synthesized, in the system voice otherwise.

pub mod alarm;
pub mod communication;
pub mod config;
pub mod engine;
pub mod error;
pub mod playback;
pub mod poller;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod speech;

use speech::{Espeak, SpeechNotifier, SpeechSynthesizer};

/// The best on-device voice this platform has: the `tts` crate where it works,
/// `espeak` otherwise.
#[must_use]
pub fn system_voice(
    settings: config::SpeechSettings,
    notify: SpeechNotifier,
) -> Box<dyn SpeechSynthesizer> {
    #[cfg(not(target_os = "linux"))]
    {
        match speech::SystemSpeech::new(settings, std::sync::Arc::clone(&notify)) {
            Ok(speech) => return Box::new(speech),
            Err(e) => log::warn!("{e}, falling back to espeak"),
        }
    }
    Box::new(Espeak::new(settings, notify))
}
