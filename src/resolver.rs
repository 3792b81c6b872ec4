//! Turns an alarm's message into playable audio, once, when the alarm is created.
//!
//! The fallback chain is a list of [`AudioStrategy`]s tried in order; the first one
//! that produces a handle wins. Running off the end of the list is not an error: the
//! alarm simply speaks with the on-device voice when it fires.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use sha2::{Digest, Sha256};

use crate::{alarm::AudioHandle, config::VoiceSettings, error::ResolveError};

pub trait AudioStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the strategy doesn't apply (nothing configured), which is not reported.
    fn attempt(&self, message: &str) -> Result<Option<AudioHandle>, ResolveError>;
}

#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub error: ResolveError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// outcome of running the chain; `handle` is `None` when every strategy failed or was skipped
#[derive(Debug, Default)]
pub struct Resolution {
    pub handle: Option<AudioHandle>,
    pub failures: Vec<StrategyFailure>,
}

#[derive(Default)]
pub struct AudioSourceResolver {
    strategies: Vec<Box<dyn AudioStrategy>>,
}

impl fmt::Debug for AudioSourceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|strategy| strategy.name()))
            .finish()
    }
}

impl AudioSourceResolver {
    /// An empty chain: every alarm falls back to the system voice.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// remote voice, then the recorded clip; remote audio is kept under `cache_dir` when given
    pub fn from_settings(
        settings: &VoiceSettings,
        cache_dir: Option<&Path>,
    ) -> Result<Self, ResolveError> {
        let remote = RemoteVoice::new(settings)?;
        let resolver = match cache_dir {
            Some(dir) => Self::new().with_strategy(CachedVoice::new(remote, dir.join("voice"))),
            None => Self::new().with_strategy(remote),
        };
        Ok(resolver.with_strategy(RecordedClip::new(settings.recorded_clip.clone())))
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: impl AudioStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn resolve(&self, message: &str) -> Resolution {
        let mut resolution = Resolution::default();
        for strategy in &self.strategies {
            match strategy.attempt(message) {
                Ok(Some(handle)) => {
                    log::info!(
                        "resolved {} bytes of audio with {}",
                        handle.len(),
                        strategy.name()
                    );
                    resolution.handle = Some(handle);
                    break;
                }
                Ok(None) => log::debug!("{} not configured, skipping", strategy.name()),
                Err(error) => {
                    log::warn!("{} failed: {error}", strategy.name());
                    resolution.failures.push(StrategyFailure {
                        strategy: strategy.name(),
                        error,
                    });
                }
            }
        }
        resolution
    }
}

/// Speech synthesis through the remote voice-clone service.
#[derive(Debug)]
pub struct RemoteVoice {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model_id: String,
}

impl RemoteVoice {
    pub fn new(settings: &VoiceSettings) -> Result<Self, ResolveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/text-to-speech/{}?optimize_streaming_latency=0",
                settings.base_url.trim_end_matches('/'),
                settings.voice_id
            ),
            api_key: settings.api_key().map(str::to_string),
            model_id: settings.model_id.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl AudioStrategy for RemoteVoice {
    fn name(&self) -> &'static str {
        "remote voice"
    }

    fn attempt(&self, message: &str) -> Result<Option<AudioHandle>, ResolveError> {
        let Some(api_key) = &self.api_key else {
            return Ok(None);
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("xi-api-key", api_key)
            .json(&serde_json::json!({ "text": message, "model_id": self.model_id }))
            .send()?;
        if !response.status().is_success() {
            return Err(ResolveError::Status(response.status()));
        }
        let audio = response.bytes()?;
        if audio.is_empty() {
            return Err(ResolveError::EmptyAudio);
        }
        Ok(Some(AudioHandle::new(audio.to_vec(), self.name())))
    }
}

/// Remote voice audio saved on disk, so restarting doesn't pay for the same
/// synthesis again. A cached clip is used even when no key is configured anymore.
#[derive(Debug)]
pub struct CachedVoice {
    remote: RemoteVoice,
    dir: PathBuf,
}

impl CachedVoice {
    #[must_use]
    pub const fn new(remote: RemoteVoice, dir: PathBuf) -> Self {
        Self { remote, dir }
    }

    /// one file per voice, model and message
    #[must_use]
    pub fn clip_path(&self, message: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(self.remote.endpoint.as_bytes());
        hasher.update([0]);
        hasher.update(self.remote.model_id.as_bytes());
        hasher.update([0]);
        hasher.update(message.as_bytes());
        self.dir.join(format!("{:x}.mp3", hasher.finalize()))
    }
}

impl AudioStrategy for CachedVoice {
    fn name(&self) -> &'static str {
        self.remote.name()
    }

    fn attempt(&self, message: &str) -> Result<Option<AudioHandle>, ResolveError> {
        let path = self.clip_path(message);
        match fs::read(&path) {
            Ok(clip) if !clip.is_empty() => {
                log::debug!("using cached voice clip {}", path.display());
                return Ok(Some(AudioHandle::new(clip, "cached voice")));
            }
            _ => {}
        }
        let Some(handle) = self.remote.attempt(message)? else {
            return Ok(None);
        };
        if let Err(e) = fs::create_dir_all(&self.dir).and_then(|()| fs::write(&path, handle.bytes())) {
            log::warn!("couldn't cache voice clip at {}: {e}", path.display());
        }
        Ok(Some(handle))
    }
}

/// A clip the user recorded in the voice lab, played instead of synthesized audio.
#[derive(Debug)]
pub struct RecordedClip {
    path: Option<PathBuf>,
}

impl RecordedClip {
    #[must_use]
    pub const fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl AudioStrategy for RecordedClip {
    fn name(&self) -> &'static str {
        "recorded clip"
    }

    fn attempt(&self, _message: &str) -> Result<Option<AudioHandle>, ResolveError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let clip = fs::read(path).map_err(|source| ResolveError::Clip {
            path: path.clone(),
            source,
        })?;
        Ok((!clip.is_empty()).then(|| AudioHandle::new(clip, self.name())))
    }
}
