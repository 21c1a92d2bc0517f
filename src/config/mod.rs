//! Command-line and environment configuration for the voice client.
//!
//! Precedence, highest first: explicit flag, environment variable, user config
//! file, built-in default.

mod user_file;

pub use user_file::{
    config_file_path, load_user_config, parse_user_config, ConfigWarning, UserConfig,
};

use crate::persona::{self, AgentKind, AgentPersona};
use crate::session::{SessionSettings, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const MIN_FRAME_SAMPLES: u32 = 256;
pub const MAX_FRAME_SAMPLES: u32 = 16_384;
pub const DEFAULT_FRAME_SAMPLES: u32 = crate::audio::DEFAULT_FRAME_SAMPLES as u32;
pub const DEFAULT_TALKING_FALLBACK_MS: u64 = 2_000;
pub const MIN_TALKING_FALLBACK_MS: u64 = 100;
pub const MAX_TALKING_FALLBACK_MS: u64 = 30_000;
pub const DEFAULT_SCHEDULE_MARGIN_MS: u64 = 50;
pub const MAX_SCHEDULE_MARGIN_MS: u64 = 1_000;

/// Talk to the Plumbit front desk or emergency dispatcher by voice.
#[derive(Clone, Parser)]
#[command(name = "plumbit-voice", version, about)]
pub struct AppConfig {
    /// Which line to call
    #[arg(long, value_enum, default_value_t = AgentKind::Support)]
    pub agent: AgentKind,

    /// API key for the voice model
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Websocket endpoint of the live voice service
    #[arg(long, env = "PLUMBIT_VOICE_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Voice model id
    #[arg(long, env = "PLUMBIT_VOICE_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Microphone name (substring match); system default when omitted
    #[arg(long)]
    pub input_device: Option<String>,

    /// Speaker name (substring match); system default when omitted
    #[arg(long)]
    pub output_device: Option<String>,

    /// Samples per outbound microphone frame at 16 kHz
    #[arg(
        long,
        default_value_t = DEFAULT_FRAME_SAMPLES,
        value_parser = clap::value_parser!(u32).range(i64::from(MIN_FRAME_SAMPLES)..=i64::from(MAX_FRAME_SAMPLES))
    )]
    pub frame_samples: u32,

    /// How long the talking indicator stays on after the last audio chunk
    #[arg(
        long,
        default_value_t = DEFAULT_TALKING_FALLBACK_MS,
        value_parser = clap::value_parser!(u64).range(MIN_TALKING_FALLBACK_MS..=MAX_TALKING_FALLBACK_MS)
    )]
    pub talking_fallback_ms: u64,

    /// Lead time before the first queued reply chunk plays
    #[arg(
        long,
        default_value_t = DEFAULT_SCHEDULE_MARGIN_MS,
        value_parser = clap::value_parser!(u64).range(0..=MAX_SCHEDULE_MARGIN_MS)
    )]
    pub schedule_margin_ms: u64,

    /// Print available microphones and exit
    #[arg(long)]
    pub list_input_devices: bool,

    /// Print available speakers and exit
    #[arg(long)]
    pub list_output_devices: bool,

    /// Write a JSON trace log
    #[arg(long)]
    pub logs: bool,

    /// Disable all logging (overrides --logs)
    #[arg(long)]
    pub no_logs: bool,

    /// Config file problems found while loading; reported after logging starts.
    #[arg(skip)]
    pub warnings: Vec<ConfigWarning>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("agent", &self.agent)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("input_device", &self.input_device)
            .field("output_device", &self.output_device)
            .field("frame_samples", &self.frame_samples)
            .field("talking_fallback_ms", &self.talking_fallback_ms)
            .field("schedule_margin_ms", &self.schedule_margin_ms)
            .field("logs", &self.logs)
            .field("no_logs", &self.no_logs)
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

/// Which settings the user set on the command line or through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplicitFlags {
    pub agent: bool,
    pub endpoint: bool,
    pub model: bool,
    pub input_device: bool,
    pub output_device: bool,
    pub frame_samples: bool,
    pub talking_fallback_ms: bool,
    pub schedule_margin_ms: bool,
}

fn is_explicit(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

impl ExplicitFlags {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            agent: is_explicit(matches, "agent"),
            endpoint: is_explicit(matches, "endpoint"),
            model: is_explicit(matches, "model"),
            input_device: is_explicit(matches, "input_device"),
            output_device: is_explicit(matches, "output_device"),
            frame_samples: is_explicit(matches, "frame_samples"),
            talking_fallback_ms: is_explicit(matches, "talking_fallback_ms"),
            schedule_margin_ms: is_explicit(matches, "schedule_margin_ms"),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Fill in settings the user did not set explicitly from the config file.
/// Unknown or out-of-range file values are skipped and returned as warnings.
pub fn apply_user_config(
    user: &UserConfig,
    config: &mut AppConfig,
    explicit: &ExplicitFlags,
) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();
    if !explicit.agent {
        if let Some(name) = user.agent.as_deref() {
            match AgentKind::parse_name(name) {
                Some(kind) => config.agent = kind,
                None => warnings.push(ConfigWarning::UnknownAgent(name.to_string())),
            }
        }
    }
    if !explicit.endpoint {
        if let Some(endpoint) = non_empty(&user.endpoint) {
            config.endpoint = endpoint;
        }
    }
    if !explicit.model {
        if let Some(model) = non_empty(&user.model) {
            config.model = model;
        }
    }
    if !explicit.input_device && user.input_device.is_some() {
        config.input_device = non_empty(&user.input_device);
    }
    if !explicit.output_device && user.output_device.is_some() {
        config.output_device = non_empty(&user.output_device);
    }
    if !explicit.frame_samples {
        if let Some(frames) = user.frame_samples {
            if (MIN_FRAME_SAMPLES..=MAX_FRAME_SAMPLES).contains(&frames) {
                config.frame_samples = frames;
            } else {
                warnings.push(ConfigWarning::OutOfRange {
                    key: "frame_samples",
                    value: u64::from(frames),
                });
            }
        }
    }
    if !explicit.talking_fallback_ms {
        if let Some(ms) = user.talking_fallback_ms {
            if (MIN_TALKING_FALLBACK_MS..=MAX_TALKING_FALLBACK_MS).contains(&ms) {
                config.talking_fallback_ms = ms;
            } else {
                warnings.push(ConfigWarning::OutOfRange {
                    key: "talking_fallback_ms",
                    value: ms,
                });
            }
        }
    }
    if !explicit.schedule_margin_ms {
        if let Some(ms) = user.schedule_margin_ms {
            if ms <= MAX_SCHEDULE_MARGIN_MS {
                config.schedule_margin_ms = ms;
            } else {
                warnings.push(ConfigWarning::OutOfRange {
                    key: "schedule_margin_ms",
                    value: ms,
                });
            }
        }
    }
    warnings
}

impl AppConfig {
    /// Parse `args`, then merge the user config file underneath them.
    pub fn load_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let (user, file_warning) = load_user_config();
        let mut config = Self::load_with_user(args, &user)?;
        if let Some(warning) = file_warning {
            config.warnings.insert(0, warning);
        }
        Ok(config)
    }

    pub fn load_with_user<I, T>(args: I, user: &UserConfig) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut config = Self::from_arg_matches(&matches)?;
        let explicit = ExplicitFlags::from_matches(&matches);
        config.warnings = apply_user_config(user, &mut config, &explicit);
        Ok(config)
    }

    /// Process arguments; prints usage and exits on a parse error.
    pub fn load() -> Self {
        match Self::load_from(std::env::args_os()) {
            Ok(config) => config,
            Err(err) => err.exit(),
        }
    }

    pub fn persona(&self) -> &'static AgentPersona {
        persona::lookup(self.agent)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            api_key: non_empty(&self.api_key),
            model: self.model.clone(),
            input_device: non_empty(&self.input_device),
            output_device: non_empty(&self.output_device),
            frame_samples: self.frame_samples as usize,
            talking_fallback: Duration::from_millis(self.talking_fallback_ms),
            schedule_margin: Duration::from_millis(self.schedule_margin_ms),
        }
    }
}
