//! Domain layer for the hub: configuration only.
//!
//! Teams, codes and messages live in `clockin-core`; this module holds the
//! settings that are specific to running the hub process.

pub mod config;

pub use config::{ConfigError, FileConfig, HubConfig};
