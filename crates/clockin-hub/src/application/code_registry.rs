//! Process-wide store of each team's active verification code.
//!
//! # State per team
//!
//! ```text
//!            rotate                    now > expires_at
//! NO_CODE ──────────► ACTIVE ─────────────────────────► EXPIRED
//!                      ▲  │                                │
//!                      └──┴────────── rotate ◄─────────────┘
//! ```
//!
//! A team has at most one code at a time; `rotate` overwrites it.  Every
//! rotation bumps the team's generation number, and the generation is what
//! lets a late publish or a late timer tick recognise that it has been
//! superseded.
//!
//! # Automatic rotation
//!
//! While a team has a manager connected, a tokio task rotates its code once
//! per validity window.  The task only holds a `Weak` reference to the
//! registry and stops on its own once the registry is dropped.
//!
//! Every timer owns a re-arm [`Notify`].  A manual rotation signals it, and
//! the task restarts its window from that moment, so a code is never replaced
//! by the timer before the expiry its subscribers were told.  Suspending
//! rotation clears the timer id from the slot and signals the same `Notify`:
//! a tick already publishing finishes its fan-out to both channels, then the
//! task sees its id gone and exits.
//!
//! # Locking
//!
//! `slots: RwLock<HashMap<TeamId, Arc<Mutex<TeamSlot>>>>`.  The map lock is
//! held only to find or create a slot.  Each slot's `Mutex` guards a short,
//! synchronous critical section (generate-and-store, or compare) and is
//! always released before publishing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use clockin_core::{
    ChannelId, Clock, ClockOutcome, CodeGenerator, CodeState, ServerMsg, TeamId, VerificationCode,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::application::broadcaster::EventBroadcaster;
use crate::application::subscription_hub::ManagerPresence;

struct RotationTimer {
    id: u64,
    rearm: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// What a timer tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerTick {
    /// Installed and announced this generation.
    Rotated(u64),
    /// A manual rotation got there first; the timer re-arms instead.
    Superseded,
    /// The timer is no longer the team's active timer.
    Cancelled,
}

#[derive(Default)]
struct TeamSlot {
    code: Option<VerificationCode>,
    generation: u64,
    presence_epoch: u64,
    next_timer_id: u64,
    timer: Option<RotationTimer>,
}

/// Team → active code, plus the timers that keep codes fresh.
pub struct CodeRegistry {
    generator: CodeGenerator,
    clock: Arc<dyn Clock>,
    broadcaster: Arc<EventBroadcaster>,
    slots: RwLock<HashMap<TeamId, Arc<Mutex<TeamSlot>>>>,
}

impl CodeRegistry {
    pub fn new(
        generator: CodeGenerator,
        clock: Arc<dyn Clock>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Arc<Self> {
        Arc::new(Self {
            generator,
            clock,
            broadcaster,
            slots: RwLock::new(HashMap::new()),
        })
    }

    pub fn validity(&self) -> Duration {
        self.generator.validity()
    }

    // ── Rotation ──────────────────────────────────────────────────────────────

    /// Replaces the team's code with a fresh one and announces it.
    ///
    /// The manager channel receives the digits, the team channel only the
    /// expiry.  Manual rotation always wins over whatever code was active and
    /// restarts the team's rotation window.
    pub async fn rotate(&self, team: &TeamId) -> VerificationCode {
        let code = {
            let slot = self.slot_or_create(team);
            let mut slot = lock(&slot);
            let code = self.install_new_code(team, &mut slot);
            if let Some(timer) = &slot.timer {
                timer.rearm.notify_one();
            }
            code
        };
        self.announce(&code).await;
        code
    }

    /// Rotates only if timer `timer_id` is still the team's active timer and
    /// nobody rotated since it was armed at generation `armed_for`.
    async fn rotate_from_timer(&self, team: &TeamId, timer_id: u64, armed_for: u64) -> TimerTick {
        let code = {
            let Some(slot) = self.slot(team) else {
                return TimerTick::Cancelled;
            };
            let mut slot = lock(&slot);
            if slot.timer.as_ref().map(|t| t.id) != Some(timer_id) {
                return TimerTick::Cancelled;
            }
            if slot.generation != armed_for {
                return TimerTick::Superseded;
            }
            self.install_new_code(team, &mut slot)
        };
        self.announce(&code).await;
        TimerTick::Rotated(code.generation())
    }

    /// The generation timer `timer_id` should replace, or `None` once the
    /// timer has been cancelled.
    fn armed_generation(&self, team: &TeamId, timer_id: u64) -> Option<u64> {
        let slot = self.slot(team)?;
        let slot = lock(&slot);
        (slot.timer.as_ref().map(|t| t.id) == Some(timer_id)).then_some(slot.generation)
    }

    fn install_new_code(&self, team: &TeamId, slot: &mut TeamSlot) -> VerificationCode {
        let generation = slot.generation + 1;
        let previous = slot.code.as_ref().map_or(0, VerificationCode::generation);
        if previous >= generation {
            error!(
                team = %team,
                previous,
                generation,
                "ConcurrentRotationRace: generation did not increase"
            );
            debug_assert!(
                previous < generation,
                "ConcurrentRotationRace on team {team}: {previous} >= {generation}"
            );
        }

        let code = self.generator.generate(team, generation, self.clock.now_ms());
        slot.generation = generation;
        slot.code = Some(code.clone());
        debug!(
            team = %team,
            generation,
            expires_at = code.expires_at_ms(),
            "rotated verification code"
        );
        code
    }

    async fn announce(&self, code: &VerificationCode) {
        let team = code.team_id();
        for (channel, include_code) in [
            (ChannelId::Manager(team.clone()), true),
            (ChannelId::Team(team.clone()), false),
        ] {
            self.broadcaster
                .publish_if(&channel, ServerMsg::code_rotated(code, include_code), || {
                    self.is_current(code)
                })
                .await;
        }
    }

    fn is_current(&self, code: &VerificationCode) -> bool {
        self.slot(code.team_id())
            .map(|slot| lock(&slot).generation == code.generation())
            .unwrap_or(false)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Checks `submitted` against the team's code at the current time.
    ///
    /// Never creates a slot, so probing unknown teams costs nothing.
    pub fn validate(&self, team: &TeamId, submitted: &str) -> ClockOutcome {
        let Some(slot) = self.slot(team) else {
            return ClockOutcome::RejectedNoCode;
        };
        let slot = lock(&slot);
        let Some(code) = &slot.code else {
            return ClockOutcome::RejectedNoCode;
        };
        if code.is_expired_at(self.clock.now_ms()) {
            ClockOutcome::RejectedExpired
        } else if code.matches(submitted) {
            ClockOutcome::Accepted
        } else {
            ClockOutcome::RejectedMismatch
        }
    }

    pub fn state(&self, team: &TeamId) -> CodeState {
        let Some(slot) = self.slot(team) else {
            return CodeState::NoCode;
        };
        let slot = lock(&slot);
        match &slot.code {
            None => CodeState::NoCode,
            Some(code) if code.is_expired_at(self.clock.now_ms()) => CodeState::Expired,
            Some(_) => CodeState::Active,
        }
    }

    /// The team's code if it has not expired yet.
    pub fn current(&self, team: &TeamId) -> Option<VerificationCode> {
        let slot = self.slot(team)?;
        let slot = lock(&slot);
        slot.code
            .as_ref()
            .filter(|code| !code.is_expired_at(self.clock.now_ms()))
            .cloned()
    }

    /// Latest generation issued for the team (0 if none).
    pub fn generation(&self, team: &TeamId) -> u64 {
        self.slot(team).map(|slot| lock(&slot).generation).unwrap_or(0)
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    /// Starts or stops automatic rotation for a presence change.
    ///
    /// Transitions older than the last one applied are ignored.  Returns
    /// `true` when rotation was resumed; the caller then rotates immediately
    /// so the new manager sees a fresh code.
    ///
    /// Must be called from within a tokio runtime.
    pub fn apply_presence(self: &Arc<Self>, presence: &ManagerPresence) -> bool {
        let team = &presence.team;
        let slot = self.slot_or_create(team);
        let mut slot = lock(&slot);
        if presence.epoch <= slot.presence_epoch {
            debug!(team = %team, epoch = presence.epoch, "stale presence change ignored");
            return false;
        }
        slot.presence_epoch = presence.epoch;

        if presence.present {
            if slot.timer.is_some() {
                return false;
            }
            slot.next_timer_id += 1;
            let id = slot.next_timer_id;
            let rearm = Arc::new(Notify::new());
            let handle = tokio::spawn(rotation_loop(
                Arc::downgrade(self),
                team.clone(),
                id,
                self.generator.validity(),
                Arc::clone(&rearm),
            ));
            slot.timer = Some(RotationTimer { id, rearm, handle });
            info!(team = %team, "code rotation resumed");
            true
        } else {
            if let Some(timer) = slot.timer.take() {
                // Not aborted: an in-flight tick still reaches both channels.
                timer.rearm.notify_one();
                info!(team = %team, "code rotation suspended");
            }
            false
        }
    }

    /// Number of teams with automatic rotation running.
    pub fn active_timers(&self) -> usize {
        self.read_slots()
            .values()
            .filter(|slot| lock(slot).timer.is_some())
            .count()
    }

    /// Stops every rotation timer.
    pub fn shutdown(&self) {
        for slot in self.read_slots().values() {
            if let Some(timer) = lock(slot).timer.take() {
                timer.handle.abort();
            }
        }
    }

    // ── Slot lookup ───────────────────────────────────────────────────────────

    fn read_slots(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TeamId, Arc<Mutex<TeamSlot>>>> {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, team: &TeamId) -> Option<Arc<Mutex<TeamSlot>>> {
        self.read_slots().get(team).cloned()
    }

    fn slot_or_create(&self, team: &TeamId) -> Arc<Mutex<TeamSlot>> {
        if let Some(slot) = self.slot(team) {
            return slot;
        }
        let mut slots = self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = slots.entry(team.clone()).or_default();
        Arc::clone(entry)
    }
}

impl Drop for CodeRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Rotates `team`'s code every `period` until cancelled.
///
/// The first rotation happens one full period after start; the immediate
/// rotation on resume is done by the caller.  A signal on `rearm` restarts
/// the period, or ends the loop if the timer was cancelled.
async fn rotation_loop(
    registry: Weak<CodeRegistry>,
    team: TeamId,
    timer_id: u64,
    period: Duration,
    rearm: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut armed_for = armed_generation(&registry, &team, timer_id);
    while let Some(generation) = armed_for {
        tokio::select! {
            biased;
            () = rearm.notified() => {
                armed_for = armed_generation(&registry, &team, timer_id);
                ticker.reset();
                continue;
            }
            _ = ticker.tick() => {}
        }
        let Some(strong) = registry.upgrade() else {
            break;
        };
        armed_for = match strong.rotate_from_timer(&team, timer_id, generation).await {
            TimerTick::Rotated(next) => Some(next),
            // The manual rotation left a re-arm signal behind.
            TimerTick::Superseded => Some(generation),
            TimerTick::Cancelled => None,
        };
    }
    debug!(team = %team, timer_id, "rotation timer stopped");
}

fn armed_generation(registry: &Weak<CodeRegistry>, team: &TeamId, timer_id: u64) -> Option<u64> {
    registry.upgrade()?.armed_generation(team, timer_id)
}

fn lock(slot: &Mutex<TeamSlot>) -> MutexGuard<'_, TeamSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::subscriber::{ChannelSink, DeliveryError, OutboundSink, Subscriber};
    use crate::application::subscription_hub::SubscriptionHub;
    use async_trait::async_trait;
    use clockin_core::{ManualClock, Role, ScriptedCodeSource, ServerEnvelope};
    use tokio::sync::mpsc;

    /// Forwards each envelope after a fixed delay.
    struct SlowSink {
        delay: Duration,
        tx: mpsc::Sender<Arc<ServerEnvelope>>,
    }

    #[async_trait]
    impl OutboundSink for SlowSink {
        async fn deliver(&self, envelope: Arc<ServerEnvelope>) -> Result<(), DeliveryError> {
            tokio::time::sleep(self.delay).await;
            self.tx.send(envelope).await.map_err(|_| DeliveryError::Closed)
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        hub: Arc<SubscriptionHub>,
        registry: Arc<CodeRegistry>,
    }

    fn fixture(codes: &[&str]) -> Fixture {
        let clock = Arc::new(ManualClock::new(0));
        let hub = Arc::new(SubscriptionHub::new());
        let broadcaster = Arc::new(EventBroadcaster::new(Arc::clone(&hub), Duration::from_secs(3), 8));
        let generator = CodeGenerator::with_source(
            Arc::new(ScriptedCodeSource::new(codes.iter().copied())),
            6,
            Duration::from_secs(30),
        )
        .unwrap();
        let registry = CodeRegistry::new(generator, clock.clone(), broadcaster);
        Fixture {
            clock,
            hub,
            registry,
        }
    }

    fn team() -> TeamId {
        TeamId::parse("T1").unwrap()
    }

    fn join(hub: &SubscriptionHub, role: Role) -> (Arc<Subscriber>, mpsc::Receiver<Arc<ServerEnvelope>>) {
        let (sink, rx) = ChannelSink::bounded(16);
        let sub = Subscriber::new(Arc::new(sink));
        hub.join(&sub, &team(), role);
        (sub, rx)
    }

    #[tokio::test]
    async fn test_validate_without_code_is_no_code() {
        let f = fixture(&["482913"]);
        assert_eq!(f.registry.validate(&team(), "482913"), ClockOutcome::RejectedNoCode);
        assert_eq!(f.registry.state(&team()), CodeState::NoCode);
        assert_eq!(f.registry.generation(&team()), 0);
    }

    #[tokio::test]
    async fn test_rotate_then_validate_lifecycle() {
        // Arrange
        let f = fixture(&["482913"]);

        // Act
        let code = f.registry.rotate(&team()).await;

        // Assert
        assert_eq!(code.value(), "482913");
        assert_eq!(f.registry.state(&team()), CodeState::Active);
        assert_eq!(f.registry.validate(&team(), "482913"), ClockOutcome::Accepted);
        assert_eq!(f.registry.validate(&team(), "000000"), ClockOutcome::RejectedMismatch);

        f.clock.set_ms(30_000);
        assert_eq!(f.registry.validate(&team(), "482913"), ClockOutcome::Accepted);

        f.clock.set_ms(30_001);
        assert_eq!(f.registry.state(&team()), CodeState::Expired);
        assert_eq!(f.registry.validate(&team(), "482913"), ClockOutcome::RejectedExpired);
        assert_eq!(f.registry.validate(&team(), "000000"), ClockOutcome::RejectedExpired);
        assert!(f.registry.current(&team()).is_none());
    }

    #[tokio::test]
    async fn test_rotate_replaces_previous_code() {
        let f = fixture(&["111111", "222222"]);
        f.registry.rotate(&team()).await;
        let second = f.registry.rotate(&team()).await;

        assert_eq!(second.generation(), 2);
        assert_eq!(f.registry.validate(&team(), "111111"), ClockOutcome::RejectedMismatch);
        assert_eq!(f.registry.validate(&team(), "222222"), ClockOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_rotate_sends_code_only_to_managers() {
        // Arrange
        let f = fixture(&["482913"]);
        let (_manager, mut manager_rx) = join(&f.hub, Role::Manager);
        let (_employee, mut employee_rx) = join(&f.hub, Role::Employee);

        // Act
        f.registry.rotate(&team()).await;

        // Assert
        let to_manager = manager_rx.recv().await.unwrap();
        let to_employee = employee_rx.recv().await.unwrap();
        assert_eq!(
            to_manager.msg,
            ServerMsg::CodeRotated {
                team_id: "T1".into(),
                code: Some("482913".into()),
                expires_at: 30_000
            }
        );
        assert_eq!(
            to_employee.msg,
            ServerMsg::CodeRotated {
                team_id: "T1".into(),
                code: None,
                expires_at: 30_000
            }
        );
    }

    #[tokio::test]
    async fn test_stale_presence_is_ignored() {
        // Arrange
        let f = fixture(&["482913"]);
        let gone = ManagerPresence {
            team: team(),
            present: false,
            epoch: 2,
        };
        let back = ManagerPresence {
            team: team(),
            present: true,
            epoch: 1,
        };

        // Act
        f.registry.apply_presence(&gone);
        let resumed = f.registry.apply_presence(&back);

        // Assert
        assert!(!resumed);
        assert_eq!(f.registry.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rotates_each_window_until_suspended() {
        // Arrange
        let f = fixture(&["000001", "000002", "000003", "000004"]);
        let presence = |present, epoch| ManagerPresence {
            team: team(),
            present,
            epoch,
        };

        // Act: resume, then let two windows pass.
        assert!(f.registry.apply_presence(&presence(true, 1)));
        f.registry.rotate(&team()).await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        // Assert
        assert_eq!(f.registry.generation(&team()), 3);

        // Act: suspend and let several windows pass.
        f.registry.apply_presence(&presence(false, 2));
        tokio::time::sleep(Duration::from_secs(150)).await;

        // Assert
        assert_eq!(f.registry.generation(&team()), 3);
        assert_eq!(f.registry.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_rotation_restarts_the_window() {
        // Arrange
        let f = fixture(&["000001", "000002", "000003"]);
        f.registry.apply_presence(&ManagerPresence {
            team: team(),
            present: true,
            epoch: 1,
        });
        f.registry.rotate(&team()).await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        // Act: rotate 20s into the window, then pass the old tick.
        f.registry.rotate(&team()).await;
        tokio::time::sleep(Duration::from_secs(15)).await;

        // Assert
        assert_eq!(f.registry.generation(&team()), 2);

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(f.registry.generation(&team()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_lets_in_flight_tick_reach_both_channels() {
        // Arrange
        let f = fixture(&["000001"]);
        let (tx, mut manager_rx) = mpsc::channel(4);
        let manager = Subscriber::new(Arc::new(SlowSink {
            delay: Duration::from_secs(1),
            tx,
        }));
        f.hub.join(&manager, &team(), Role::Manager);
        let (_employee, mut employee_rx) = join(&f.hub, Role::Employee);
        f.registry.apply_presence(&ManagerPresence {
            team: team(),
            present: true,
            epoch: 1,
        });

        // Act: suspend while the first tick is still delivering to the manager.
        tokio::time::sleep(Duration::from_millis(30_500)).await;
        f.registry.apply_presence(&ManagerPresence {
            team: team(),
            present: false,
            epoch: 2,
        });
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Assert
        assert!(manager_rx.try_recv().is_ok());
        let to_employee = employee_rx.try_recv().unwrap();
        assert!(matches!(to_employee.msg, ServerMsg::CodeRotated { code: None, .. }));
        assert_eq!(f.registry.generation(&team()), 1);
        assert_eq!(f.registry.active_timers(), 0);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(f.registry.generation(&team()), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_timers() {
        let f = fixture(&["482913"]);
        for (i, name) in ["A", "B"].iter().enumerate() {
            f.registry.apply_presence(&ManagerPresence {
                team: TeamId::parse(name).unwrap(),
                present: true,
                epoch: i as u64 + 1,
            });
        }
        assert_eq!(f.registry.active_timers(), 2);

        f.registry.shutdown();

        assert_eq!(f.registry.active_timers(), 0);
    }
}
