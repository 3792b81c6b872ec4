//! Looping playback of a resolved audio clip.

use std::io::Cursor;

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};

use crate::{alarm::AudioHandle, error::PlaybackError};

pub trait ClipPlayer {
    /// Starts playing `clip` on repeat. An error means the host wouldn't play it.
    fn play_looping(&mut self, clip: &AudioHandle) -> Result<(), PlaybackError>;

    fn stop(&mut self);
}

/// Plays clips through the default output device.
///
/// The device is opened on first use, so a machine without one still starts and
/// every alarm falls back to speech.
pub struct RodioPlayer {
    // the stream must outlive the sinks created from its handle
    output: Option<(OutputStream, OutputStreamHandle)>,
    sink: Option<Sink>,
    volume: f32,
}

impl RodioPlayer {
    /// `volume` is a percentage
    #[must_use]
    pub const fn new(volume: f32) -> Self {
        Self {
            output: None,
            sink: None,
            volume,
        }
    }

    fn handle(&mut self) -> Result<&OutputStreamHandle, PlaybackError> {
        if self.output.is_none() {
            let output =
                OutputStream::try_default().map_err(|e| PlaybackError::Output(e.to_string()))?;
            log::info!("opened default audio output");
            self.output = Some(output);
        }
        self.output
            .as_ref()
            .map(|(_, handle)| handle)
            .ok_or_else(|| PlaybackError::Output("output stream closed".to_string()))
    }
}

impl ClipPlayer for RodioPlayer {
    fn play_looping(&mut self, clip: &AudioHandle) -> Result<(), PlaybackError> {
        self.stop();
        let source = Decoder::new(Cursor::new(clip.shared()))
            .map_err(|e| PlaybackError::Decode(e.to_string()))?
            .repeat_infinite();
        let sink =
            Sink::try_new(self.handle()?).map_err(|e| PlaybackError::Output(e.to_string()))?;
        sink.set_volume(self.volume / 100.0);
        sink.append(source);
        sink.play();
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_clip_is_a_decode_failure() {
        let mut player = RodioPlayer::new(100.0);
        let clip = AudioHandle::new(vec![0_u8; 64], "remote voice");
        assert!(matches!(
            player.play_looping(&clip),
            Err(PlaybackError::Decode(_))
        ));
        // never opened a device for it
        assert!(player.output.is_none());
    }
}
