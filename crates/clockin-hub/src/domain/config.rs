//! Hub configuration types and the optional TOML configuration file.
//!
//! [`HubConfig`] is the single source of truth for all runtime settings.  It
//! is assembled at startup from three layers, highest precedence first:
//!
//! 1. command-line flags (each with a `CLOCKIN_*` environment variable),
//! 2. an optional TOML file passed with `--config`,
//! 3. the built-in defaults from [`HubConfig::default`].
//!
//! # File format
//!
//! Every key is optional; a missing key keeps the default:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8787"
//! ping_interval_secs = 20
//! outbound_capacity = 64
//!
//! [codes]
//! length = 6
//! validity_secs = 30
//!
//! [delivery]
//! timeout_ms = 3000
//! max_concurrent = 32
//! ```
//!
//! Unknown keys are rejected so a typo such as `validty_secs` fails loudly at
//! startup instead of silently keeping the default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clockin_core::domain::code::{
    CodeError, DEFAULT_CODE_LENGTH, DEFAULT_VALIDITY, MAX_CODE_LENGTH, MIN_CODE_LENGTH,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port the hub listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 8787;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A socket address string could not be parsed.
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    /// The code settings are out of range.
    #[error(transparent)]
    Code(#[from] CodeError),

    /// A duration or capacity that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

// ── HubConfig ─────────────────────────────────────────────────────────────────

/// All runtime configuration for the hub.
///
/// Build this once at startup and share it behind an `Arc`.
///
/// ```rust
/// use clockin_hub::domain::HubConfig;
///
/// let cfg = HubConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 8787);
/// assert_eq!(cfg.code_length, 6);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Address and port of the WebSocket listener.
    pub ws_bind_addr: SocketAddr,

    /// How long a freshly issued code stays valid.  Automatic rotation runs on
    /// the same period, so a manager screen always shows a live code.
    pub validity: Duration,

    /// Number of digits in a code.
    pub code_length: usize,

    /// Longest a single subscriber may take to accept one event before it is
    /// declared unresponsive and disconnected.
    pub delivery_timeout: Duration,

    /// Interval between WebSocket keepalive pings.
    pub ping_interval: Duration,

    /// Outbound messages buffered per connection.  A browser that falls this
    /// far behind hits the delivery timeout.
    pub outbound_capacity: usize,

    /// Upper bound on deliveries in flight for one published event.
    pub max_concurrent_deliveries: usize,
}

impl Default for HubConfig {
    /// | Field                     | Default        |
    /// |---------------------------|----------------|
    /// | ws_bind_addr              | `0.0.0.0:8787` |
    /// | validity                  | 30 seconds     |
    /// | code_length               | 6              |
    /// | delivery_timeout          | 3 seconds      |
    /// | ping_interval             | 20 seconds     |
    /// | outbound_capacity         | 64             |
    /// | max_concurrent_deliveries | 32             |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            validity: DEFAULT_VALIDITY,
            code_length: DEFAULT_CODE_LENGTH,
            delivery_timeout: Duration::from_secs(3),
            ping_interval: Duration::from_secs(20),
            outbound_capacity: 64,
            max_concurrent_deliveries: 32,
        }
    }
}

impl HubConfig {
    /// Checks every setting for a usable value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Code`] for a code length outside
    /// `4..=12` or a zero validity, and [`ConfigError::Zero`] for any other
    /// zero duration or capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&self.code_length) {
            return Err(CodeError::InvalidLength(self.code_length).into());
        }
        if self.validity.is_zero() {
            return Err(CodeError::ZeroValidity.into());
        }
        if self.delivery_timeout.is_zero() {
            return Err(ConfigError::Zero("delivery timeout"));
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::Zero("ping interval"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound capacity"));
        }
        if self.max_concurrent_deliveries == 0 {
            return Err(ConfigError::Zero("max concurrent deliveries"));
        }
        Ok(())
    }

    /// Overlays every value present in `file` on top of `self`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `server.bind` does not parse.
    pub fn apply_file(&mut self, file: &FileConfig) -> Result<(), ConfigError> {
        if let Some(bind) = &file.server.bind {
            self.ws_bind_addr = bind
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(bind.clone()))?;
        }
        if let Some(secs) = file.server.ping_interval_secs {
            self.ping_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = file.server.outbound_capacity {
            self.outbound_capacity = capacity;
        }
        if let Some(length) = file.codes.length {
            self.code_length = length;
        }
        if let Some(secs) = file.codes.validity_secs {
            self.validity = Duration::from_secs(secs);
        }
        if let Some(ms) = file.delivery.timeout_ms {
            self.delivery_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = file.delivery.max_concurrent {
            self.max_concurrent_deliveries = max;
        }
        Ok(())
    }
}

// ── TOML file ─────────────────────────────────────────────────────────────────

/// On-disk shape of the optional configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub codes: CodeSection,
    #[serde(default)]
    pub delivery: DeliverySection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub ping_interval_secs: Option<u64>,
    pub outbound_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeSection {
    pub length: Option<usize>,
    pub validity_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySection {
    pub timeout_ms: Option<u64>,
    pub max_concurrent: Option<usize>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML or unknown keys.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its content is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
