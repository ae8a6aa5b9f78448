//! Team channel membership.
//!
//! The [`SubscriptionHub`] records which subscribers belong to which channel.
//! Each team owns one record holding both of its channels:
//!
//! ```text
//! teams: RwLock<HashMap<TeamId, Arc<Mutex<TeamChannels>>>>
//!                                       │
//!                                       ├── team:     members + gate
//!                                       ├── managers: members + gate
//!                                       └── presence_epoch
//! ```
//!
//! The outer `RwLock` is held only long enough to find or create a team
//! record; all membership changes for a team happen under that team's own
//! `Mutex`.  Neither lock is ever held across an `.await`.
//!
//! # Manager presence
//!
//! Rotation only runs while a team has at least one manager.  The hub does not
//! start or stop timers itself; it reports a [`ManagerPresence`] transition
//! whenever the manager channel goes from empty to non-empty or back, tagged
//! with a per-team epoch.  Whoever owns the timers applies the transitions and
//! ignores any whose epoch is older than the last one applied, so racing
//! join/leave calls settle on the most recent state.
//!
//! # Lock order
//!
//! Team record first, then the subscriber's own channel set.  `disconnect`
//! drains the subscriber's set before touching any team record.  `join`
//! records the channel in that set and then re-checks the closing flag, so a
//! join racing a disconnect is either drained by it or rolled back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use clockin_core::{ChannelId, Role, TeamId};
use tracing::debug;

use crate::application::subscriber::{Subscriber, SubscriberId};

/// Per-channel ordering gate.
///
/// Publishers hold it for the length of one fan-out; the value is the last
/// sequence number assigned on the channel.  `tokio::sync::Mutex` queues
/// waiters in FIFO order.
pub type ChannelGate = tokio::sync::Mutex<u64>;

/// A change in whether a team has any manager connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerPresence {
    pub team: TeamId,
    pub present: bool,
    /// Strictly increasing per team.
    pub epoch: u64,
}

/// Result of [`SubscriptionHub::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub channel: ChannelId,
    /// `false` when the subscriber was already a member (or is closing).
    pub newly_joined: bool,
    /// Set when this join brought the first manager to the team.
    pub presence: Option<ManagerPresence>,
}

/// Result of [`SubscriptionHub::leave`] and [`SubscriptionHub::leave_role`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Channels the subscriber was actually removed from.
    pub left: Vec<ChannelId>,
    /// Set when this leave removed the team's last manager.
    pub presence: Option<ManagerPresence>,
}

#[derive(Default)]
struct ChannelState {
    members: HashMap<SubscriberId, Weak<Subscriber>>,
    gate: Arc<ChannelGate>,
}

impl ChannelState {
    /// Counts members whose connection still exists.
    fn live_count(&self) -> usize {
        self.members
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[derive(Default)]
struct TeamChannels {
    team: ChannelState,
    managers: ChannelState,
    presence_epoch: u64,
}

impl TeamChannels {
    fn channel_mut(&mut self, role: Role) -> &mut ChannelState {
        match role {
            Role::Manager => &mut self.managers,
            Role::Employee => &mut self.team,
        }
    }

    fn channel(&self, role: Role) -> &ChannelState {
        match role {
            Role::Manager => &self.managers,
            Role::Employee => &self.team,
        }
    }

    fn next_presence(&mut self, team: &TeamId, present: bool) -> ManagerPresence {
        self.presence_epoch += 1;
        ManagerPresence {
            team: team.clone(),
            present,
            epoch: self.presence_epoch,
        }
    }

    /// Removes `id` from the channel for `role`, reporting a presence change
    /// if that emptied the manager channel.
    fn remove(
        &mut self,
        team: &TeamId,
        role: Role,
        id: SubscriberId,
    ) -> (bool, Option<ManagerPresence>) {
        let channel = self.channel_mut(role);
        let had_managers = role == Role::Manager && channel.live_count() > 0;
        let removed = channel.members.remove(&id).is_some();
        if removed {
            channel.members.retain(|_, weak| weak.strong_count() > 0);
        }
        let presence = (removed && had_managers && self.managers.live_count() == 0)
            .then(|| self.next_presence(team, false));
        (removed, presence)
    }
}

// ── SubscriptionHub ───────────────────────────────────────────────────────────

/// Which connected subscribers belong to which team channel.
#[derive(Default)]
pub struct SubscriptionHub {
    teams: RwLock<HashMap<TeamId, Arc<Mutex<TeamChannels>>>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `subscriber` to the channel for `role` in `team`.
    ///
    /// Joining a channel twice is a no-op.  A subscriber already flagged
    /// closing is not added anywhere.
    pub fn join(&self, subscriber: &Arc<Subscriber>, team: &TeamId, role: Role) -> JoinOutcome {
        let channel = ChannelId::for_role(team.clone(), role);
        if subscriber.is_closing() {
            return JoinOutcome {
                channel,
                newly_joined: false,
                presence: None,
            };
        }

        let record = self.team_or_create(team);
        let mut record = lock(&record);

        let had_managers = record.managers.live_count() > 0;
        let state = record.channel_mut(role);
        let mut newly_joined = !state.members.contains_key(&subscriber.id());
        if newly_joined {
            state
                .members
                .insert(subscriber.id(), Arc::downgrade(subscriber));
            subscriber.record_join(&channel);
            // A disconnect that drained the channel set before `record_join`
            // would never see this membership, so undo it here.
            if subscriber.is_closing() {
                state.members.remove(&subscriber.id());
                subscriber.record_leave(&channel);
                newly_joined = false;
            } else {
                debug!(subscriber = %subscriber.id(), channel = %channel, "joined channel");
            }
        }

        let presence = (role == Role::Manager && newly_joined && !had_managers)
            .then(|| record.next_presence(team, true));

        JoinOutcome {
            channel,
            newly_joined,
            presence,
        }
    }

    /// Removes `subscriber` from both channels of `team`.
    pub fn leave(&self, subscriber: &Arc<Subscriber>, team: &TeamId) -> LeaveOutcome {
        let Some(record) = self.team(team) else {
            return LeaveOutcome::default();
        };
        let mut record = lock(&record);
        let mut outcome = LeaveOutcome::default();
        for role in [Role::Employee, Role::Manager] {
            let (removed, presence) = record.remove(team, role, subscriber.id());
            if removed {
                let channel = ChannelId::for_role(team.clone(), role);
                subscriber.record_leave(&channel);
                debug!(subscriber = %subscriber.id(), channel = %channel, "left channel");
                outcome.left.push(channel);
            }
            if presence.is_some() {
                outcome.presence = presence;
            }
        }
        outcome
    }

    /// Removes `subscriber` from the channel for `role` in `team` only.
    pub fn leave_role(&self, subscriber: &Arc<Subscriber>, team: &TeamId, role: Role) -> LeaveOutcome {
        let Some(record) = self.team(team) else {
            return LeaveOutcome::default();
        };
        let mut record = lock(&record);
        let (removed, presence) = record.remove(team, role, subscriber.id());
        let mut left = Vec::new();
        if removed {
            let channel = ChannelId::for_role(team.clone(), role);
            subscriber.record_leave(&channel);
            debug!(subscriber = %subscriber.id(), channel = %channel, "left channel");
            left.push(channel);
        }
        LeaveOutcome { left, presence }
    }

    /// Removes `subscriber` from every channel it joined.
    ///
    /// The subscriber is flagged closing first so a join racing the
    /// disconnect cannot re-add it.  Returns one presence transition per team
    /// that lost its last manager.
    pub fn disconnect(&self, subscriber: &Arc<Subscriber>) -> Vec<ManagerPresence> {
        subscriber.request_close();
        let channels = subscriber.take_channels();
        let mut transitions = Vec::new();
        for channel in channels {
            let team = channel.team();
            let Some(record) = self.team(team) else {
                continue;
            };
            let mut record = lock(&record);
            let (_, presence) = record.remove(team, channel.role(), subscriber.id());
            transitions.extend(presence);
        }
        debug!(subscriber = %subscriber.id(), "subscriber disconnected");
        transitions
    }

    /// The ordering gate for `channel`, or `None` if nobody ever joined the
    /// team.
    pub fn gate(&self, channel: &ChannelId) -> Option<Arc<ChannelGate>> {
        let record = self.team(channel.team())?;
        let record = lock(&record);
        Some(Arc::clone(&record.channel(channel.role()).gate))
    }

    /// The live, non-closing subscribers of `channel`.
    pub fn snapshot(&self, channel: &ChannelId) -> Vec<Arc<Subscriber>> {
        let Some(record) = self.team(channel.team()) else {
            return Vec::new();
        };
        let record = lock(&record);
        record
            .channel(channel.role())
            .members
            .values()
            .filter_map(Weak::upgrade)
            .filter(|sub| !sub.is_closing())
            .collect()
    }

    /// Number of live members of `channel`.
    pub fn member_count(&self, channel: &ChannelId) -> usize {
        self.team(channel.team())
            .map(|record| lock(&record).channel(channel.role()).live_count())
            .unwrap_or(0)
    }

    pub fn contains(&self, channel: &ChannelId, id: SubscriberId) -> bool {
        self.team(channel.team())
            .map(|record| lock(&record).channel(channel.role()).members.contains_key(&id))
            .unwrap_or(false)
    }

    fn team(&self, team: &TeamId) -> Option<Arc<Mutex<TeamChannels>>> {
        self.teams
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(team)
            .cloned()
    }

    fn team_or_create(&self, team: &TeamId) -> Arc<Mutex<TeamChannels>> {
        if let Some(record) = self.team(team) {
            return record;
        }
        let mut teams = self
            .teams
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = teams.entry(team.clone()).or_default();
        Arc::clone(entry)
    }
}

fn lock(record: &Mutex<TeamChannels>) -> MutexGuard<'_, TeamChannels> {
    record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
