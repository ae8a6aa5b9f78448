//! Application layer for clockin-hub.
//!
//! Everything the hub *does*, independent of how connections arrive:
//!
//! - [`code_registry`]: one active code per team, rotation timers
//! - [`subscription_hub`]: channel membership and manager presence
//! - [`broadcaster`]: ordered, bounded fan-out to channel subscribers
//! - [`clock_in`]: validation of submitted codes
//! - [`service`]: the [`ClockHub`] facade the transport calls
//!
//! # What does NOT belong here?
//!
//! - Sockets and WebSocket framing (infrastructure)
//! - Parsing CLI flags or config files (domain + `main.rs`)

pub mod broadcaster;
pub mod clock_in;
pub mod code_registry;
pub mod service;
pub mod subscriber;
pub mod subscription_hub;

pub use broadcaster::{DeliveryReport, EventBroadcaster};
pub use clock_in::ClockInValidator;
pub use code_registry::CodeRegistry;
pub use service::{ClockHub, HubError};
pub use subscriber::{ChannelSink, DeliveryError, OutboundSink, Subscriber, SubscriberId};
pub use subscription_hub::{ChannelGate, JoinOutcome, LeaveOutcome, ManagerPresence, SubscriptionHub};
