//! Error types, one enum per concern.

use std::path::PathBuf;

/// Reasons an alarm can't be created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlarmError {
    #[error("an alarm needs a time")]
    MissingTime,

    #[error("an alarm needs a message")]
    MissingMessage,

    /// Not a 24-hour "HH:MM" time.
    #[error("invalid alarm time {0:?}, expected HH:MM")]
    InvalidTime(String),
}

/// Failure of a single audio strategy.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("voice service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("voice service responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("voice service returned no audio")]
    EmptyAudio,

    #[error("couldn't read recorded clip {path}: {source}")]
    Clip {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The host refused to play a clip.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("no audio output available: {0}")]
    Output(String),

    #[error("couldn't decode audio clip: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("speech synthesis is unavailable: {0}")]
    Unavailable(String),

    #[error("speech synthesis failed: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't determine the config directory")]
    NoProjectDirs,

    #[error("couldn't read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("couldn't parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("couldn't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("couldn't write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
