//! Clock-in outcomes and per-team code state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::team::TeamId;

/// Result of checking a submitted code.
///
/// Rejections are ordinary data returned to the caller, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClockOutcome {
    /// The code matched the team's active, unexpired code.
    Accepted,
    /// The team's last code has passed its expiry.
    RejectedExpired,
    /// The team has an active code but the submission differs.
    RejectedMismatch,
    /// No code was ever issued for the team (for example after a restart).
    RejectedNoCode,
}

impl ClockOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, ClockOutcome::Accepted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClockOutcome::Accepted => "ACCEPTED",
            ClockOutcome::RejectedExpired => "REJECTED_EXPIRED",
            ClockOutcome::RejectedMismatch => "REJECTED_MISMATCH",
            ClockOutcome::RejectedNoCode => "REJECTED_NO_CODE",
        }
    }
}

impl fmt::Display for ClockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single clock-in attempt and its outcome.
///
/// Emitted to subscribers and returned to the caller; persisting it is the
/// job of whoever consumes the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockEvent {
    pub team_id: TeamId,
    pub employee_id: String,
    pub submitted_code: String,
    pub outcome: ClockOutcome,
    pub timestamp_ms: u64,
}

/// Where a team sits in the code lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    NoCode,
    Active,
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_names() {
        let json = serde_json::to_string(&ClockOutcome::RejectedNoCode).unwrap();
        assert_eq!(json, "\"REJECTED_NO_CODE\"");
        assert_eq!(ClockOutcome::RejectedNoCode.as_str(), "REJECTED_NO_CODE");
    }

    #[test]
    fn test_only_accepted_is_accepted() {
        assert!(ClockOutcome::Accepted.is_accepted());
        assert!(!ClockOutcome::RejectedExpired.is_accepted());
        assert!(!ClockOutcome::RejectedMismatch.is_accepted());
        assert!(!ClockOutcome::RejectedNoCode.is_accepted());
    }
}
