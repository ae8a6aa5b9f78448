//! clockin-hub library crate.
//!
//! Issues rotating clock-in verification codes per team and pushes code
//! rotations and clock-in results to the browsers subscribed to that team.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON over WebSocket)
//!         ↕
//! [clockin-hub]
//!   ├── domain/           HubConfig and the optional TOML file
//!   ├── application/      CodeRegistry, SubscriptionHub, EventBroadcaster,
//!   │                     ClockInValidator, ClockHub service
//!   └── infrastructure/
//!         └── ws_server/  accept loop, per-connection reader/writer tasks
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O apart from reading the config file.
//! - `application` depends on `domain` and `clockin-core`; it uses tokio for
//!   timers and timeouts but never opens a socket.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`.
//!
//! # For beginners: the two channels of a team
//!
//! Every team has a `manager:{team}` channel and a `team:{team}` channel.
//! When a code rotates, managers receive the new digits and employees only
//! the new expiry time.  Employees learn the digits by reading the manager's
//! screen, which is the whole point: a clock-in proves physical presence.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: codes, membership, fan-out, validation.
pub mod application;

/// Infrastructure layer: WebSocket server.
pub mod infrastructure;

pub use application::{ClockHub, HubError};
pub use domain::HubConfig;
