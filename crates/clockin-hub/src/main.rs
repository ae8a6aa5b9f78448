//! Clock-in verification hub: entry point.
//!
//! This binary serves the rotating clock-in codes of every team over
//! WebSocket.  Managers see the current code; employees submit it; everyone
//! subscribed to the team sees the result.
//!
//! # Usage
//!
//! ```text
//! clockin-hub [OPTIONS]
//!
//! Options:
//!   --config <FILE>                  Optional TOML configuration file
//!   --bind <ADDR>                    WebSocket listen address [default: 0.0.0.0:8787]
//!   --validity-secs <SECS>           Code validity and rotation period [default: 30]
//!   --code-length <DIGITS>           Digits per code [default: 6]
//!   --delivery-timeout-ms <MS>       Per-subscriber delivery timeout [default: 3000]
//!   --ping-interval-secs <SECS>      WebSocket keepalive interval [default: 20]
//!   --outbound-capacity <N>          Queued messages per connection [default: 64]
//!   --max-concurrent-deliveries <N>  Deliveries in flight per event [default: 32]
//!   --log-level <FILTER>             Used when RUST_LOG is unset [default: info]
//! ```
//!
//! # Precedence
//!
//! A flag beats its environment variable, which beats the config file, which
//! beats the built-in default.
//!
//! | Variable                            | Flag                          |
//! |-------------------------------------|-------------------------------|
//! | `CLOCKIN_CONFIG`                    | `--config`                    |
//! | `CLOCKIN_BIND`                      | `--bind`                      |
//! | `CLOCKIN_VALIDITY_SECS`             | `--validity-secs`             |
//! | `CLOCKIN_CODE_LENGTH`               | `--code-length`               |
//! | `CLOCKIN_DELIVERY_TIMEOUT_MS`       | `--delivery-timeout-ms`       |
//! | `CLOCKIN_PING_INTERVAL_SECS`        | `--ping-interval-secs`        |
//! | `CLOCKIN_OUTBOUND_CAPACITY`         | `--outbound-capacity`         |
//! | `CLOCKIN_MAX_CONCURRENT_DELIVERIES` | `--max-concurrent-deliveries` |
//! | `CLOCKIN_LOG_LEVEL`                 | `--log-level`                 |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clockin_hub::domain::{FileConfig, HubConfig};
use clockin_hub::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Clock-in verification hub.
///
/// Every flag is optional; unset flags fall back to the config file and then
/// to the defaults.
#[derive(Debug, Parser)]
#[command(
    name = "clockin-hub",
    about = "Rotating clock-in codes with team-scoped realtime delivery",
    version
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "CLOCKIN_CONFIG")]
    config: Option<PathBuf>,

    /// Address and port of the WebSocket listener.
    #[arg(long, env = "CLOCKIN_BIND")]
    bind: Option<SocketAddr>,

    /// Seconds a code stays valid; automatic rotation uses the same period.
    #[arg(long, env = "CLOCKIN_VALIDITY_SECS")]
    validity_secs: Option<u64>,

    /// Number of digits in a code (4 to 12).
    #[arg(long, env = "CLOCKIN_CODE_LENGTH")]
    code_length: Option<usize>,

    /// Milliseconds a subscriber may take to accept one event.
    #[arg(long, env = "CLOCKIN_DELIVERY_TIMEOUT_MS")]
    delivery_timeout_ms: Option<u64>,

    /// Seconds between WebSocket keepalive pings.
    #[arg(long, env = "CLOCKIN_PING_INTERVAL_SECS")]
    ping_interval_secs: Option<u64>,

    /// Outbound messages buffered per connection.
    #[arg(long, env = "CLOCKIN_OUTBOUND_CAPACITY")]
    outbound_capacity: Option<usize>,

    /// Deliveries in flight per published event.
    #[arg(long, env = "CLOCKIN_MAX_CONCURRENT_DELIVERIES")]
    max_concurrent_deliveries: Option<usize>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info", env = "CLOCKIN_LOG_LEVEL")]
    log_level: String,
}

impl Cli {
    /// Layers defaults, the config file and the flags into a [`HubConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if the
    /// merged configuration does not validate.
    fn into_hub_config(self) -> anyhow::Result<HubConfig> {
        let mut config = HubConfig::default();

        if let Some(path) = &self.config {
            let file = FileConfig::load(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            config.apply_file(&file)?;
        }

        if let Some(bind) = self.bind {
            config.ws_bind_addr = bind;
        }
        if let Some(secs) = self.validity_secs {
            config.validity = Duration::from_secs(secs);
        }
        if let Some(length) = self.code_length {
            config.code_length = length;
        }
        if let Some(ms) = self.delivery_timeout_ms {
            config.delivery_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = self.ping_interval_secs {
            config.ping_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = self.outbound_capacity {
            config.outbound_capacity = capacity;
        }
        if let Some(max) = self.max_concurrent_deliveries {
            config.max_concurrent_deliveries = max;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed with `clap`.
/// 2. `tracing_subscriber` is initialised from `RUST_LOG`, or `--log-level`
///    when `RUST_LOG` is absent or invalid.
/// 3. A [`HubConfig`] is assembled from defaults, file and flags.
/// 4. A Ctrl+C handler clears a shared `AtomicBool`.
/// 5. [`run_server`] serves until that flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.into_hub_config()?;
    info!(
        "clock-in hub starting: bind={}, validity={:?}, code_length={}",
        config.ws_bind_addr, config.validity, config.code_length
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("clock-in hub stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
