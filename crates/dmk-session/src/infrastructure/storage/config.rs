//! TOML-based configuration for device sessions.
//!
//! The file is usually called `dmk.toml` and sits next to whatever
//! application embeds the kit.  Every field has a default, so an empty file
//! (or no file at all) gives a USB HID setup with the intent queue enabled.
//!
//! ```toml
//! [transport]
//! frame_size = 64
//! use_channel = true
//! channel = 0x0101
//! tag = 5
//! pad_final_frame = true
//!
//! [session]
//! unsafe_bypass_intent_queue = false
//! command_timeout_ms = 30000
//!
//! [logging]
//! log_level = "info"
//! ```
//!
//! # Serde default values (for beginners)
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  A config
//! written by an older version therefore still loads after new fields are
//! added.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dmk_core::framing::{APDU_FRAME_TAG, USB_HID_DEFAULT_CHANNEL, USB_HID_FRAME_SIZE};
use dmk_core::FrameConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::application::device_session::SessionConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DmkConfig {
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How APDUs are cut into frames on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportSettings {
    /// Maximum size of one frame in bytes, header included.
    #[serde(default = "default_frame_size")]
    pub frame_size: u16,
    /// Whether frames start with a channel id.  Off for BLE.
    #[serde(default = "default_true")]
    pub use_channel: bool,
    /// Channel id written big-endian at the start of every frame.
    #[serde(default = "default_channel")]
    pub channel: u16,
    #[serde(default = "default_tag")]
    pub tag: u8,
    /// Zero-pad the last frame up to `frame_size`.
    #[serde(default = "default_true")]
    pub pad_final_frame: bool,
}

/// Per-session behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettings {
    /// Let concurrent device actions interleave their commands.
    #[serde(default)]
    pub unsafe_bypass_intent_queue: bool,
    /// Deadline for a single command, in milliseconds.  No deadline when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_frame_size() -> u16 {
    USB_HID_FRAME_SIZE
}
fn default_channel() -> u16 {
    u16::from_be_bytes(USB_HID_DEFAULT_CHANNEL)
}
fn default_tag() -> u8 {
    APDU_FRAME_TAG
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
            use_channel: default_true(),
            channel: default_channel(),
            tag: default_tag(),
            pad_final_frame: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl TransportSettings {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            frame_size: self.frame_size,
            channel: self.use_channel.then(|| self.channel.to_be_bytes()),
            tag: self.tag,
            pad_final_frame: self.pad_final_frame,
        }
    }
}

impl LoggingConfig {
    /// Filter for the embedding application's `tracing` subscriber.
    ///
    /// `RUST_LOG` wins when set; otherwise `log_level` applies.  The kit
    /// itself never installs a subscriber.
    ///
    /// ```rust,no_run
    /// use dmk_session::DmkConfig;
    ///
    /// let config = DmkConfig::default();
    /// tracing_subscriber::fmt()
    ///     .with_env_filter(config.logging.env_filter())
    ///     .init();
    /// ```
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| self.configured_filter())
    }

    /// Filter built from `log_level` alone.  An unparsable level falls back
    /// to `info`.
    pub fn configured_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new(default_log_level()))
    }
}

impl DmkConfig {
    /// Runtime settings for a new [`crate::DeviceSession`].
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            frame: self.transport.frame_config(),
            unsafe_bypass_intent_queue: self.session.unsafe_bypass_intent_queue,
            abort_timeout: self.session.command_timeout_ms.map(Duration::from_millis),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Loads [`DmkConfig`] from `path`, returning the defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<DmkConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DmkConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &DmkConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
