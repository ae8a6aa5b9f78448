//! JSON message types for the browser-facing WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Browser → Hub:  JSON text frame  →  ClientMsg
//! Hub → Browser:  ServerMsg  →  ServerEnvelope  →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with a `"type"` field that identifies the
//! variant.  Variant and field names are camelCase on the wire:
//!
//! ```json
//! {"type":"submitCode","teamId":"T1","employeeId":"E7","code":"482913"}
//! ```
//!
//! # Why separate inbound and outbound message types?
//!
//! The two directions carry different information.  Using two distinct enums
//! makes it a compile-time error to send a client-only message to a browser.

use serde::{Deserialize, Serialize};

use crate::domain::code::VerificationCode;
use crate::domain::event::{ClockEvent, ClockOutcome};
use crate::domain::team::Role;

// ── Browser → Hub messages ────────────────────────────────────────────────────

/// Everything a browser can send to the hub.
///
/// The sender's identity and role come from the identity layer in front of the
/// hub; the hub trusts the values as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Subscribe to the team's channel for `role`.
    Join { team_id: String, role: Role },

    /// Unsubscribe from the team.  Without a role both channels are left.
    Leave {
        team_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },

    /// Employee clock-in attempt.
    SubmitCode {
        team_id: String,
        employee_id: String,
        code: String,
    },

    /// Manager asks for a fresh code immediately.
    RotateNow { team_id: String },
}

impl ClientMsg {
    /// Short variant name for log lines.
    ///
    /// Logging the whole message would print submitted codes.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMsg::Join { .. } => "join",
            ClientMsg::Leave { .. } => "leave",
            ClientMsg::SubmitCode { .. } => "submitCode",
            ClientMsg::RotateNow { .. } => "rotateNow",
        }
    }
}

// ── Hub → Browser messages ────────────────────────────────────────────────────

/// Everything the hub sends to a browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// A team's code was replaced.  `code` is present only on the manager
    /// channel.
    CodeRotated {
        team_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Expiry in milliseconds since the Unix epoch.
        expires_at: u64,
    },

    /// Outcome of a clock-in attempt.  The submitted code is not echoed.
    ClockResult {
        team_id: String,
        employee_id: String,
        outcome: ClockOutcome,
        /// Milliseconds since the Unix epoch.
        timestamp: u64,
    },

    /// Direct reply to `join`.
    Joined {
        team_id: String,
        role: Role,
        channel: String,
    },

    /// Direct reply to `leave`, one per channel actually left.
    Left { team_id: String, channel: String },

    /// Direct reply to a request that could not be carried out.
    Error { reason: String },
}

impl ServerMsg {
    /// Builds a `codeRotated` message, including the digits only when asked.
    pub fn code_rotated(code: &VerificationCode, include_code: bool) -> Self {
        ServerMsg::CodeRotated {
            team_id: code.team_id().to_string(),
            code: include_code.then(|| code.value().to_string()),
            expires_at: code.expires_at_ms(),
        }
    }

    pub fn clock_result(event: &ClockEvent) -> Self {
        ServerMsg::ClockResult {
            team_id: event.team_id.to_string(),
            employee_id: event.employee_id.clone(),
            outcome: event.outcome,
            timestamp: event.timestamp_ms,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        ServerMsg::Error {
            reason: reason.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMsg::CodeRotated { .. } => "codeRotated",
            ServerMsg::ClockResult { .. } => "clockResult",
            ServerMsg::Joined { .. } => "joined",
            ServerMsg::Left { .. } => "left",
            ServerMsg::Error { .. } => "error",
        }
    }
}

/// A [`ServerMsg`] as written to the socket.
///
/// Broadcasts carry the channel name and its per-channel sequence number so a
/// browser can tell which subscription an event came from and spot gaps.
/// Direct replies leave both fields out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub msg: ServerMsg,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl ServerEnvelope {
    pub fn direct(msg: ServerMsg) -> Self {
        Self {
            msg,
            channel: None,
            seq: None,
        }
    }

    pub fn broadcast(msg: ServerMsg, channel: String, seq: u64) -> Self {
        Self {
            msg,
            channel: Some(channel),
            seq: Some(seq),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
