//! The hub service: every operation a connection can trigger.
//!
//! [`ClockHub`] wires the four components together and is the only type the
//! transport talks to:
//!
//! ```text
//!            ┌──────────────────── ClockHub ────────────────────┐
//! session ──►│ handle(sub, ClientMsg)                           │
//!            │   join/leave ──► SubscriptionHub ──► presence ───┼──► CodeRegistry timers
//!            │   rotateNow  ──► CodeRegistry ──┐                │
//!            │   submitCode ──► ClockInValidator┴─► EventBroadcaster ──► subscribers
//!            └──────────────────────────────────────────────────┘
//! ```
//!
//! The hub returns manager presence changes and the service applies them to
//! the registry; the hub never holds the registry.

use std::sync::Arc;

use clockin_core::{
    ChannelId, ClientMsg, Clock, ClockEvent, CodeGenerator, CodeSource, RandomCodeSource, Role,
    ServerMsg, SystemClock, TeamId, TeamIdError, VerificationCode,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::broadcaster::EventBroadcaster;
use crate::application::clock_in::ClockInValidator;
use crate::application::code_registry::CodeRegistry;
use crate::application::subscriber::{OutboundSink, Subscriber};
use crate::application::subscription_hub::{JoinOutcome, LeaveOutcome, ManagerPresence, SubscriptionHub};
use crate::domain::config::{ConfigError, HubConfig};

/// Errors an operation reports back to the requesting connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The team id was empty or too long.
    #[error("invalid team id: {0}")]
    InvalidTeam(#[from] TeamIdError),

    /// `rotateNow` from a connection that has not joined the team as manager.
    #[error("not a manager of team {0}")]
    NotManager(TeamId),
}

/// Composition root for the clock-in hub.
pub struct ClockHub {
    config: HubConfig,
    hub: Arc<SubscriptionHub>,
    broadcaster: Arc<EventBroadcaster>,
    registry: Arc<CodeRegistry>,
    validator: ClockInValidator,
}

impl ClockHub {
    /// Builds a hub with random codes and the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn new(config: HubConfig) -> Result<Self, ConfigError> {
        Self::from_parts(config, Arc::new(RandomCodeSource), Arc::new(SystemClock::new()))
    }

    /// Builds a hub with a caller-supplied digit source and clock.
    ///
    /// Tests use this with a scripted source and a manual clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn from_parts(
        config: HubConfig,
        source: Arc<dyn CodeSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let generator = CodeGenerator::with_source(source, config.code_length, config.validity)?;
        let hub = Arc::new(SubscriptionHub::new());
        let broadcaster = Arc::new(EventBroadcaster::new(
            Arc::clone(&hub),
            config.delivery_timeout,
            config.max_concurrent_deliveries,
        ));
        let registry = CodeRegistry::new(generator, Arc::clone(&clock), Arc::clone(&broadcaster));
        let validator = ClockInValidator::new(Arc::clone(&registry), Arc::clone(&broadcaster), clock);
        Ok(Self {
            config,
            hub,
            broadcaster,
            registry,
            validator,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    pub fn registry(&self) -> &Arc<CodeRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    /// Registers a new connection.  It belongs to no channel yet.
    pub fn connect(&self, sink: Arc<dyn OutboundSink>) -> Arc<Subscriber> {
        let subscriber = Subscriber::new(sink);
        debug!(subscriber = %subscriber.id(), "subscriber connected");
        subscriber
    }

    /// Joins `team` in `role`.
    ///
    /// The first manager of a team resumes automatic rotation and gets a fresh
    /// code.  A manager joining a team that already has one receives the
    /// current code directly.
    pub async fn join(&self, subscriber: &Arc<Subscriber>, team: &TeamId, role: Role) -> JoinOutcome {
        let outcome = self.hub.join(subscriber, team, role);
        let resumed = match &outcome.presence {
            Some(presence) => self.apply_presence(presence).await,
            None => false,
        };

        if role == Role::Manager && outcome.newly_joined && !resumed {
            let channel = ChannelId::Manager(team.clone());
            let sent = self
                .broadcaster
                .send_direct_ordered(&channel, subscriber, || {
                    self.registry
                        .current(team)
                        .map(|code| ServerMsg::code_rotated(&code, true))
                })
                .await;
            if let Err(e) = sent {
                debug!(subscriber = %subscriber.id(), "could not hand over current code: {e}");
            }
        }
        outcome
    }

    /// Leaves both channels of `team`, or only the one for `role`.
    pub async fn leave(&self, subscriber: &Arc<Subscriber>, team: &TeamId, role: Option<Role>) -> LeaveOutcome {
        let outcome = match role {
            Some(role) => self.hub.leave_role(subscriber, team, role),
            None => self.hub.leave(subscriber, team),
        };
        if let Some(presence) = &outcome.presence {
            self.apply_presence(presence).await;
        }
        outcome
    }

    /// Removes the connection from every channel.
    pub async fn disconnect(&self, subscriber: &Arc<Subscriber>) {
        for presence in self.hub.disconnect(subscriber) {
            self.apply_presence(&presence).await;
        }
    }

    async fn apply_presence(&self, presence: &ManagerPresence) -> bool {
        let resumed = self.registry.apply_presence(presence);
        if resumed {
            self.registry.rotate(&presence.team).await;
        }
        resumed
    }

    // ── Codes ─────────────────────────────────────────────────────────────────

    /// Rotates `team`'s code on behalf of a manager.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotManager`] unless `subscriber` is currently joined
    /// to the team's manager channel.
    pub async fn rotate_now(&self, subscriber: &Subscriber, team: &TeamId) -> Result<VerificationCode, HubError> {
        if !subscriber.is_joined(&ChannelId::Manager(team.clone())) {
            return Err(HubError::NotManager(team.clone()));
        }
        info!(team = %team, subscriber = %subscriber.id(), "manual rotation requested");
        Ok(self.registry.rotate(team).await)
    }

    /// Validates an employee's code and broadcasts the result.
    pub async fn submit(&self, team: &TeamId, employee_id: &str, code: &str) -> ClockEvent {
        self.validator.submit(team, employee_id, code).await
    }

    /// Stops every rotation timer.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    // ── Inbound messages ──────────────────────────────────────────────────────

    /// Runs one inbound message and returns the direct replies for the sender.
    ///
    /// Broadcasts caused by the message go out through the broadcaster as a
    /// side effect and are not part of the returned list.
    pub async fn handle(&self, subscriber: &Arc<Subscriber>, msg: ClientMsg) -> Vec<ServerMsg> {
        debug!(subscriber = %subscriber.id(), kind = msg.type_name(), "inbound message");
        match self.dispatch(subscriber, msg).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!(subscriber = %subscriber.id(), "request rejected: {e}");
                vec![ServerMsg::error(e.to_string())]
            }
        }
    }

    async fn dispatch(&self, subscriber: &Arc<Subscriber>, msg: ClientMsg) -> Result<Vec<ServerMsg>, HubError> {
        match msg {
            ClientMsg::Join { team_id, role } => {
                let team = TeamId::parse(&team_id)?;
                let outcome = self.join(subscriber, &team, role).await;
                Ok(vec![ServerMsg::Joined {
                    team_id: team.to_string(),
                    role,
                    channel: outcome.channel.to_string(),
                }])
            }

            ClientMsg::Leave { team_id, role } => {
                let team = TeamId::parse(&team_id)?;
                let outcome = self.leave(subscriber, &team, role).await;
                Ok(outcome
                    .left
                    .into_iter()
                    .map(|channel| ServerMsg::Left {
                        team_id: team.to_string(),
                        channel: channel.to_string(),
                    })
                    .collect())
            }

            ClientMsg::SubmitCode {
                team_id,
                employee_id,
                code,
            } => {
                let team = TeamId::parse(&team_id)?;
                let event = self.submit(&team, &employee_id, &code).await;
                Ok(vec![ServerMsg::clock_result(&event)])
            }

            ClientMsg::RotateNow { team_id } => {
                let team = TeamId::parse(&team_id)?;
                self.rotate_now(subscriber, &team).await?;
                Ok(Vec::new())
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::subscriber::ChannelSink;
    use clockin_core::{ClockOutcome, ManualClock, ScriptedCodeSource, ServerEnvelope};
    use tokio::sync::mpsc;

    fn hub_with(codes: &[&str]) -> (ClockHub, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let hub = ClockHub::from_parts(
            HubConfig::default(),
            Arc::new(ScriptedCodeSource::new(codes.iter().copied())),
            clock.clone(),
        )
        .unwrap();
        (hub, clock)
    }

    fn connect(hub: &ClockHub) -> (Arc<Subscriber>, mpsc::Receiver<Arc<ServerEnvelope>>) {
        let (sink, rx) = ChannelSink::bounded(16);
        (hub.connect(Arc::new(sink)), rx)
    }

    fn join_msg(role: Role) -> ClientMsg {
        ClientMsg::Join {
            team_id: "T1".into(),
            role,
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = HubConfig {
            code_length: 20,
            ..HubConfig::default()
        };
        assert!(ClockHub::new(config).is_err());
    }

    #[tokio::test]
    async fn test_join_replies_with_channel() {
        let (hub, _clock) = hub_with(&["482913"]);
        let (sub, _rx) = connect(&hub);

        let replies = hub.handle(&sub, join_msg(Role::Employee)).await;

        assert_eq!(
            replies,
            vec![ServerMsg::Joined {
                team_id: "T1".into(),
                role: Role::Employee,
                channel: "team:T1".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_first_manager_triggers_rotation() {
        // Arrange
        let (hub, _clock) = hub_with(&["482913"]);
        let (manager, mut rx) = connect(&hub);

        // Act
        hub.handle(&manager, join_msg(Role::Manager)).await;

        // Assert
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.channel.as_deref(), Some("manager:T1"));
        assert!(matches!(
            &envelope.msg,
            ServerMsg::CodeRotated { code: Some(code), .. } if code == "482913"
        ));
        assert_eq!(hub.registry().active_timers(), 1);
    }

    #[tokio::test]
    async fn test_second_manager_receives_current_code_directly() {
        // Arrange
        let (hub, _clock) = hub_with(&["482913", "999999"]);
        let (first, _first_rx) = connect(&hub);
        let (second, mut second_rx) = connect(&hub);
        hub.handle(&first, join_msg(Role::Manager)).await;

        // Act
        hub.handle(&second, join_msg(Role::Manager)).await;

        // Assert
        let envelope = second_rx.recv().await.unwrap();
        assert_eq!(envelope.seq, None);
        assert!(matches!(
            &envelope.msg,
            ServerMsg::CodeRotated { code: Some(code), .. } if code == "482913"
        ));
        assert_eq!(hub.registry().generation(&TeamId::parse("T1").unwrap()), 1);
    }

    #[tokio::test]
    async fn test_rotate_now_requires_manager_membership() {
        let (hub, _clock) = hub_with(&["482913"]);
        let (employee, _rx) = connect(&hub);
        hub.handle(&employee, join_msg(Role::Employee)).await;

        let replies = hub
            .handle(&employee, ClientMsg::RotateNow { team_id: "T1".into() })
            .await;

        assert_eq!(replies, vec![ServerMsg::error("not a manager of team T1")]);
    }

    #[tokio::test]
    async fn test_rotate_now_by_manager_issues_new_generation() {
        let (hub, _clock) = hub_with(&["111111", "222222"]);
        let (manager, _rx) = connect(&hub);
        hub.handle(&manager, join_msg(Role::Manager)).await;

        let replies = hub
            .handle(&manager, ClientMsg::RotateNow { team_id: "T1".into() })
            .await;

        assert!(replies.is_empty());
        let team = TeamId::parse("T1").unwrap();
        assert_eq!(hub.registry().generation(&team), 2);
        assert_eq!(hub.registry().validate(&team, "222222"), ClockOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_invalid_team_produces_error_reply() {
        let (hub, _clock) = hub_with(&["482913"]);
        let (sub, _rx) = connect(&hub);

        let replies = hub
            .handle(
                &sub,
                ClientMsg::Join {
                    team_id: "   ".into(),
                    role: Role::Manager,
                },
            )
            .await;

        assert!(matches!(&replies[..], [ServerMsg::Error { .. }]));
    }

    #[tokio::test]
    async fn test_submit_replies_with_result() {
        let (hub, clock) = hub_with(&["482913"]);
        let (manager, _rx) = connect(&hub);
        let (employee, _employee_rx) = connect(&hub);
        hub.handle(&manager, join_msg(Role::Manager)).await;
        clock.set_ms(10_000);

        let replies = hub
            .handle(
                &employee,
                ClientMsg::SubmitCode {
                    team_id: "T1".into(),
                    employee_id: "E7".into(),
                    code: "482913".into(),
                },
            )
            .await;

        assert_eq!(
            replies,
            vec![ServerMsg::ClockResult {
                team_id: "T1".into(),
                employee_id: "E7".into(),
                outcome: ClockOutcome::Accepted,
                timestamp: 10_000
            }]
        );
    }

    #[tokio::test]
    async fn test_leave_without_role_replies_per_channel() {
        let (hub, _clock) = hub_with(&["482913"]);
        let (sub, _rx) = connect(&hub);
        hub.handle(&sub, join_msg(Role::Manager)).await;
        hub.handle(&sub, join_msg(Role::Employee)).await;

        let replies = hub
            .handle(
                &sub,
                ClientMsg::Leave {
                    team_id: "T1".into(),
                    role: None,
                },
            )
            .await;

        assert_eq!(replies.len(), 2);
        assert_eq!(hub.registry().active_timers(), 0);
    }
}
