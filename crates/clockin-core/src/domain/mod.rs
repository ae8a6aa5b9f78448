//! Domain layer: pure business-logic types with no I/O.
//!
//! # What belongs in the domain layer?
//!
//! - Identity types (`TeamId`, `Role`, `ChannelId`)
//! - The verification code and its generator
//! - Clock-in outcomes
//! - The time source abstraction
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - Locks or shared registries (those live in `clockin-hub`)

pub mod clock;
pub mod code;
pub mod event;
pub mod team;
