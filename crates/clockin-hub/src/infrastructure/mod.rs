//! Infrastructure layer for clockin-hub.
//!
//! Handles all network I/O: binding the listener, the WebSocket upgrade, and
//! the per-connection reader/writer tasks.
//!
//! # What does NOT belong here?
//!
//! - Code rotation, membership and validation (that is the application layer)
//! - Message type definitions (those live in `clockin-core`)
//! - Configuration parsing (that is done in `main.rs`)

pub mod ws_server;

pub use ws_server::{run_server, serve};
