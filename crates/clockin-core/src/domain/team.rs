//! Team identity, subscriber roles, and broadcast channel naming.
//!
//! Every team has exactly two logical broadcast channels:
//!
//! ```text
//! manager:{team_id}   managers only; codeRotated carries the code value
//! team:{team_id}      employees; codeRotated omits the code value
//! ```
//!
//! Keeping the code off the employee channel means an employee can only learn
//! the current code by looking at the manager's screen.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest team identifier the hub accepts, in bytes.
pub const MAX_TEAM_ID_LEN: usize = 128;

/// Reasons a raw string is not a usable team identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TeamIdError {
    /// The identifier was empty or contained only whitespace.
    #[error("team id must not be empty")]
    Empty,

    /// The identifier exceeded [`MAX_TEAM_ID_LEN`] bytes.
    #[error("team id is {len} bytes; the limit is {MAX_TEAM_ID_LEN}")]
    TooLong { len: usize },
}

/// Identifier of a team, as issued by the surrounding application.
///
/// The hub treats the value as opaque: it never checks that the team exists in
/// any database.  Unknown teams are created on first use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TeamId(String);

impl TeamId {
    /// Parses a team identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`TeamIdError`] if the trimmed value is empty or too long.
    pub fn parse(raw: &str) -> Result<Self, TeamIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TeamIdError::Empty);
        }
        if trimmed.len() > MAX_TEAM_ID_LEN {
            return Err(TeamIdError::TooLong { len: trimmed.len() });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role a connection claims when joining a team.
///
/// The role is supplied by the identity collaborator upstream of the hub and
/// is trusted as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sees the code and drives rotation.
    Manager,
    /// Submits codes and sees clock-in results.
    Employee,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Employee => "employee",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// `team:{id}`, joined by employees.
    Team(TeamId),
    /// `manager:{id}`, joined by managers.
    Manager(TeamId),
}

impl ChannelId {
    /// Returns the channel a subscriber with `role` joins for `team`.
    pub fn for_role(team: TeamId, role: Role) -> Self {
        match role {
            Role::Manager => ChannelId::Manager(team),
            Role::Employee => ChannelId::Team(team),
        }
    }

    pub fn team(&self) -> &TeamId {
        match self {
            ChannelId::Team(team) | ChannelId::Manager(team) => team,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            ChannelId::Team(_) => Role::Employee,
            ChannelId::Manager(_) => Role::Manager,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Team(team) => write!(f, "team:{team}"),
            ChannelId::Manager(team) => write!(f, "manager:{team}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_whitespace() {
        let team = TeamId::parse("  T1 ").unwrap();
        assert_eq!(team.as_str(), "T1");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(TeamId::parse(""), Err(TeamIdError::Empty));
        assert_eq!(TeamId::parse("   "), Err(TeamIdError::Empty));
    }

    #[test]
    fn test_parse_rejects_oversized_id() {
        let raw = "x".repeat(MAX_TEAM_ID_LEN + 1);
        assert_eq!(
            TeamId::parse(&raw),
            Err(TeamIdError::TooLong {
                len: MAX_TEAM_ID_LEN + 1
            })
        );
    }

    #[test]
    fn test_parse_accepts_limit_length() {
        let raw = "x".repeat(MAX_TEAM_ID_LEN);
        assert!(TeamId::parse(&raw).is_ok());
    }

    #[test]
    fn test_channel_names_follow_prefix_convention() {
        let team = TeamId::parse("T1").unwrap();
        assert_eq!(ChannelId::Team(team.clone()).to_string(), "team:T1");
        assert_eq!(ChannelId::Manager(team).to_string(), "manager:T1");
    }

    #[test]
    fn test_for_role_maps_manager_to_manager_channel() {
        let team = TeamId::parse("T1").unwrap();
        let channel = ChannelId::for_role(team.clone(), Role::Manager);
        assert_eq!(channel, ChannelId::Manager(team));
        assert_eq!(channel.role(), Role::Manager);
    }

    #[test]
    fn test_for_role_maps_employee_to_team_channel() {
        let team = TeamId::parse("T1").unwrap();
        let channel = ChannelId::for_role(team.clone(), Role::Employee);
        assert_eq!(channel, ChannelId::Team(team.clone()));
        assert_eq!(channel.team(), &team);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Manager).unwrap(), "\"manager\"");
        let role: Role = serde_json::from_str("\"employee\"").unwrap();
        assert_eq!(role, Role::Employee);
    }
}
