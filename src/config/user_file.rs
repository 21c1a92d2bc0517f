//! Optional user config file (`~/.config/plumbit-voice/config.toml`).
//!
//! Values here sit below command-line flags and environment variables.
//! Unknown keys are ignored so older builds can read newer files.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_DIR_ENV: &str = "PLUMBIT_VOICE_CONFIG_DIR";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub agent: Option<String>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub frame_samples: Option<u32>,
    pub talking_fallback_ms: Option<u64>,
    pub schedule_margin_ms: Option<u64>,
}

/// A config file problem that did not stop startup. Collected while loading and
/// reported once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    UnreadableFile { path: PathBuf, reason: String },
    MalformedFile { path: PathBuf, reason: String },
    UnknownAgent(String),
    OutOfRange { key: &'static str, value: u64 },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::UnreadableFile { path, reason } => {
                write!(f, "cannot read {}; using defaults: {reason}", path.display())
            }
            ConfigWarning::MalformedFile { path, reason } => {
                write!(f, "malformed {}; using defaults: {reason}", path.display())
            }
            ConfigWarning::UnknownAgent(name) => {
                write!(f, "unknown agent '{name}' in config file ignored")
            }
            ConfigWarning::OutOfRange { key, value } => {
                write!(f, "{key} = {value} in config file is out of range; ignored")
            }
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::config_dir().map(|dir| dir.join("plumbit-voice"))
}

pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

pub fn parse_user_config(contents: &str) -> Result<UserConfig, toml::de::Error> {
    toml::from_str(contents)
}

/// Load the user config file. A missing file yields defaults; an unreadable or
/// malformed one yields defaults plus a warning for the caller to report.
pub fn load_user_config() -> (UserConfig, Option<ConfigWarning>) {
    let Some(path) = config_file_path() else {
        return (UserConfig::default(), None);
    };
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return (UserConfig::default(), None),
        Err(err) => {
            let reason = err.to_string();
            return (
                UserConfig::default(),
                Some(ConfigWarning::UnreadableFile { path, reason }),
            );
        }
    };
    match parse_user_config(&contents) {
        Ok(config) => (config, None),
        Err(err) => {
            let reason = err.message().to_string();
            (
                UserConfig::default(),
                Some(ConfigWarning::MalformedFile { path, reason }),
            )
        }
    }
}
