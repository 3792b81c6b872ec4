use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{Alarm, AlarmDraft, ScheduledTime},
    error::ConfigError,
};

/// wins over `voice.api_key` from the file
pub const API_KEY_VAR: &str = "SPOKEN_ALARM_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub tick_interval_ms: u64,
    pub repeat_pause_ms: u64,
    pub snooze_minutes: u32,
    pub volume: f32,
    pub voice: VoiceSettings,
    pub speech: SpeechSettings,
    pub alarms: Vec<SavedAlarm>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            repeat_pause_ms: 1500,
            snooze_minutes: 9,
            volume: 100.0,
            voice: VoiceSettings::default(),
            speech: SpeechSettings::default(),
            alarms: vec![],
        }
    }
}

/// where synthesized alarm audio comes from
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct VoiceSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub voice_id: String,
    pub model_id: String,
    pub timeout_secs: u64,
    /// clip recorded by the voice lab, used when remote synthesis isn't available
    pub recorded_clip: Option<PathBuf>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.elevenlabs.io".to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_monolingual_v1".to_string(),
            timeout_secs: 30,
            recorded_clip: None,
        }
    }
}

impl VoiceSettings {
    /// a blank key counts as no key
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// on-device voice used by the speech loop
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct SpeechSettings {
    /// 1.0 is the backend's normal rate
    pub rate: f32,
    pub pitch: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.0,
        }
    }
}

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

/// what survives a restart; resolved audio does not and is fetched again
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SavedAlarm {
    #[serde(with = "toml_datetime_compat")]
    pub time: NaiveTime,
    pub message: String,
    #[serde(default = "always_true")]
    pub enabled: bool,
}

impl From<&Alarm> for SavedAlarm {
    fn from(alarm: &Alarm) -> Self {
        Self {
            time: alarm.time().time(),
            message: alarm.message().to_string(),
            enabled: alarm.is_active(),
        }
    }
}

impl SavedAlarm {
    #[must_use]
    pub fn new(draft: &AlarmDraft, enabled: bool) -> Self {
        Self {
            time: draft.time.time(),
            message: draft.message.clone(),
            enabled,
        }
    }

    #[must_use]
    pub fn time(&self) -> ScheduledTime {
        ScheduledTime::from_time(self.time)
    }
}

fn project_dirs() -> Result<directories::ProjectDirs, ConfigError> {
    directories::ProjectDirs::from("", "", "spoken_alarm").ok_or(ConfigError::NoProjectDirs)
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// a missing file is the default config
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = match std::fs::read_to_string(path) {
            Ok(config) => config,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&config).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let config = toml::to_string(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        std::fs::write(path, config).map_err(write_err)
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let mut path = project_dirs()?.config_dir().to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    /// where synthesized voice clips are kept between runs
    pub fn cache_dir() -> Result<PathBuf, ConfigError> {
        Ok(project_dirs()?.cache_dir().to_path_buf())
    }

    /// applies `SPOKEN_ALARM_API_KEY` if set
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_VAR) {
            self.voice.api_key = Some(key);
        }
        self
    }
}
