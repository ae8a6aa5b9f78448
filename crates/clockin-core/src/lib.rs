//! # clockin-core
//!
//! Shared library for the clock-in verification hub containing the domain
//! entities (teams, channels, verification codes, clock events) and the JSON
//! wire protocol spoken between browsers and the hub.
//!
//! It has zero dependencies on sockets, async runtimes, or UI frameworks, so
//! every type here can be unit tested without a network.
//!
//! # Architecture overview (for beginners)
//!
//! A manager opens the team dashboard and sees a 6-digit code that changes
//! every 30 seconds.  Employees type that code to clock in.  The hub checks
//! the code and pushes the result to everyone watching the team.
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`domain`** – Pure business logic: `TeamId`, `ChannelId`, the
//!   `VerificationCode` with its validity window, the `CodeGenerator` that
//!   produces codes, the `Clock` abstraction, and the `ClockEvent` outcome.
//!
//! - **`protocol`** – How messages travel over the WebSocket.  Every frame is
//!   a JSON object with a `"type"` discriminant, decoded into typed Rust enums.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `clockin_core::TeamId` instead of `clockin_core::domain::team::TeamId`.
pub use domain::clock::{Clock, ManualClock, SystemClock};
pub use domain::code::{
    CodeError, CodeGenerator, CodeSource, RandomCodeSource, ScriptedCodeSource, VerificationCode,
};
pub use domain::event::{ClockEvent, ClockOutcome, CodeState};
pub use domain::team::{ChannelId, Role, TeamId, TeamIdError};
pub use protocol::codec::{decode_client_msg, encode_server_envelope, ProtocolError};
pub use protocol::messages::{ClientMsg, ServerEnvelope, ServerMsg};
