//! Server configuration loading from file and environment variables.

use confab_types::Robot;
use confab_voice::ProviderConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// At most this many configured robot slots are honored.
const MAX_ROBOT_SLOTS: usize = 100;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider endpoints and credentials.
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Model selection.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Conversation behavior.
    #[serde(default)]
    pub behavior: BehaviorConfig,

    /// Configured robot personas.
    #[serde(default)]
    pub robots: Vec<RobotSlot>,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTPS port. TLS termination is handled by the deployment; the value
    /// is surfaced in the startup log only.
    #[serde(default)]
    pub https_port: Option<u16>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "confab_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Model selection for the three provider subsystems.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_asr_model")]
    pub asr_model: String,

    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
}

/// Conversation behavior knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct BehaviorConfig {
    /// System prompt of the synthesized default robot.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Target word budget folded into the system prompt.
    #[serde(default = "default_reply_limit")]
    pub reply_limit: u32,

    /// Turns kept as rolling history.
    #[serde(default = "default_chat_window")]
    pub chat_window: usize,

    /// Cosmetic prefix on the first sentence of a reply.
    #[serde(default)]
    pub reply_prefix: String,

    /// Default ASR language hint.
    #[serde(default = "default_asr_language")]
    pub asr_language: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Idle seconds before a stage is removed.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Development mode: stages expire after 30 seconds instead.
    #[serde(default)]
    pub development: bool,

    /// Keep transient audio files instead of deleting them.
    #[serde(default)]
    pub keep_files: bool,

    /// Synthesize a "default" robot from the globals.
    #[serde(default = "default_true")]
    pub default_robot: bool,

    /// Directory for transient audio files and welcome clips.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

/// One configured robot persona; unset fields fall back to the globals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RobotSlot {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub prompt: String,
    pub language: Option<String>,
    pub prefix: Option<String>,
    pub model: Option<String>,
    pub chat_window: Option<usize>,
    pub reply_limit: Option<u32>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3001
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chat_model() -> String {
    "gpt-4-turbo-preview".to_string()
}

fn default_asr_model() -> String {
    "whisper-1".to_string()
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_tts_voice() -> String {
    "nova".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_reply_limit() -> u32 {
    30
}

fn default_chat_window() -> usize {
    5
}

fn default_asr_language() -> String {
    "en".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.9
}

fn default_stage_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_work_dir() -> String {
    ".".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            https_port: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat_model: default_chat_model(),
            asr_model: default_asr_model(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            reply_limit: default_reply_limit(),
            chat_window: default_chat_window(),
            reply_prefix: String::new(),
            asr_language: default_asr_language(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            stage_timeout_secs: default_stage_timeout(),
            development: false,
            keep_files: false,
            default_robot: default_true(),
            work_dir: default_work_dir(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CONFAB_HOST` overrides `server.host`
/// - `CONFAB_PORT` overrides `server.port`
/// - `CONFAB_LOG_LEVEL` overrides `logging.level`
/// - `CONFAB_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CONFAB_API_KEY` overrides `providers.api_key`
/// - `CONFAB_WORK_DIR` overrides `behavior.work_dir`
/// - `CONFAB_DEVELOPMENT` overrides `behavior.development`
/// - `CONFAB_KEEP_FILES` overrides `behavior.keep_files`
/// - `CONFAB_STAGE_TIMEOUT` overrides `behavior.stage_timeout_secs`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("CONFAB_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("CONFAB_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(level) = std::env::var("CONFAB_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("CONFAB_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key) = std::env::var("CONFAB_API_KEY") {
        config.providers.api_key = key;
    }
    if let Ok(dir) = std::env::var("CONFAB_WORK_DIR") {
        config.behavior.work_dir = dir;
    }
    if let Ok(dev) = std::env::var("CONFAB_DEVELOPMENT") {
        config.behavior.development = dev == "true" || dev == "1";
    }
    if let Ok(keep) = std::env::var("CONFAB_KEEP_FILES") {
        config.behavior.keep_files = keep == "true" || keep == "1";
    }
    if let Ok(timeout) = std::env::var("CONFAB_STAGE_TIMEOUT") {
        if let Ok(parsed) = timeout.parse() {
            config.behavior.stage_timeout_secs = parsed;
        }
    }

    Ok(config)
}

impl Config {
    /// Effective stage idle timeout: 30 seconds in development mode,
    /// otherwise the configured value.
    pub fn stage_timeout(&self) -> Duration {
        if self.behavior.development {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(self.behavior.stage_timeout_secs)
        }
    }

    /// Builds the robot roster: the optional synthesized default robot plus
    /// every complete configured slot, with per-robot overrides falling
    /// back to the globals. Incomplete slots are skipped with a warning and
    /// at most 100 slots are honored.
    pub fn robots(&self) -> Vec<Robot> {
        let mut robots = Vec::new();

        if self.behavior.default_robot {
            robots.push(Robot {
                uuid: "default".to_string(),
                label: "Default".to_string(),
                prompt: self.behavior.system_prompt.clone(),
                asr_language: self.behavior.asr_language.clone(),
                reply_prefix: self.behavior.reply_prefix.clone(),
                voice: Robot::welcome_voice(&self.behavior.asr_language).to_string(),
                reply_limit: self.behavior.reply_limit,
                chat_model: self.models.chat_model.clone(),
                chat_window: self.behavior.chat_window,
            });
        }

        for (index, slot) in self.robots.iter().enumerate() {
            if index >= MAX_ROBOT_SLOTS {
                tracing::warn!(
                    configured = self.robots.len(),
                    limit = MAX_ROBOT_SLOTS,
                    "ignoring robot slots beyond the limit"
                );
                break;
            }
            if slot.id.is_empty() || slot.label.is_empty() || slot.prompt.is_empty() {
                tracing::warn!(
                    index,
                    id = %slot.id,
                    label = %slot.label,
                    "ignoring incomplete robot slot"
                );
                continue;
            }

            let language = slot
                .language
                .clone()
                .unwrap_or_else(|| self.behavior.asr_language.clone());
            robots.push(Robot {
                uuid: slot.id.clone(),
                label: slot.label.clone(),
                prompt: slot.prompt.clone(),
                voice: Robot::welcome_voice(&language).to_string(),
                asr_language: language,
                reply_prefix: slot
                    .prefix
                    .clone()
                    .unwrap_or_else(|| self.behavior.reply_prefix.clone()),
                reply_limit: slot.reply_limit.unwrap_or(self.behavior.reply_limit),
                chat_model: slot
                    .model
                    .clone()
                    .unwrap_or_else(|| self.models.chat_model.clone()),
                chat_window: slot.chat_window.unwrap_or(self.behavior.chat_window),
            });
        }

        robots
    }
}
