//! Clock-in submissions.

use std::sync::Arc;

use clockin_core::{ChannelId, Clock, ClockEvent, ServerMsg, TeamId};
use tracing::info;

use crate::application::broadcaster::EventBroadcaster;
use crate::application::code_registry::CodeRegistry;

/// Checks submitted codes and tells the team about the result.
pub struct ClockInValidator {
    registry: Arc<CodeRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    clock: Arc<dyn Clock>,
}

impl ClockInValidator {
    pub fn new(registry: Arc<CodeRegistry>, broadcaster: Arc<EventBroadcaster>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            broadcaster,
            clock,
        }
    }

    /// Validates `code` for `team`, publishes `clockResult` on both of the
    /// team's channels, and returns the event.
    ///
    /// The result is returned whatever happens to the broadcast.  The
    /// submitted code is kept in the returned event but never broadcast.
    pub async fn submit(&self, team: &TeamId, employee_id: &str, code: &str) -> ClockEvent {
        let outcome = self.registry.validate(team, code);
        let event = ClockEvent {
            team_id: team.clone(),
            employee_id: employee_id.to_string(),
            submitted_code: code.to_string(),
            outcome,
            timestamp_ms: self.clock.now_ms(),
        };
        info!(team = %team, employee = employee_id, outcome = %outcome, "clock-in attempt");

        let msg = ServerMsg::clock_result(&event);
        self.broadcaster
            .publish(&ChannelId::Team(team.clone()), msg.clone())
            .await;
        self.broadcaster
            .publish(&ChannelId::Manager(team.clone()), msg)
            .await;
        event
    }
}
