//! Integration tests for the code lifecycle seen by one team.
//!
//! # Purpose
//!
//! These tests drive [`ClockHub`] through its public API with a manual clock
//! and a scripted code source, so every timestamp and every code is known in
//! advance.  They verify:
//!
//! - The reference scenario: a code issued at t=0 is accepted at t=10 s,
//!   rejected as expired at t=31 s, and a wrong code is a mismatch.
//! - Codes are reusable by any number of employees until expiry.
//! - An expired code stays expired no matter how often it is submitted.
//! - A team that never had a code rejects everything as `REJECTED_NO_CODE`.
//!
//! ```text
//! t=0s    rotate(T1)            → "482913", expires t=30s
//! t=5s    submit(E9, "000000")  → REJECTED_MISMATCH
//! t=10s   submit(E7, "482913")  → ACCEPTED
//! t=31s   submit(E8, "482913")  → REJECTED_EXPIRED
//! ```

use std::sync::Arc;
use std::time::Duration;

use clockin_core::{ClockOutcome, CodeState, ManualClock, ScriptedCodeSource, TeamId};
use clockin_hub::{ClockHub, HubConfig};

fn hub_with_code(code: &str) -> (ClockHub, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let config = HubConfig {
        validity: Duration::from_secs(30),
        ..HubConfig::default()
    };
    let hub = ClockHub::from_parts(config, Arc::new(ScriptedCodeSource::new([code])), clock.clone())
        .expect("default config is valid");
    (hub, clock)
}

fn t1() -> TeamId {
    TeamId::parse("T1").unwrap()
}

// ── Reference scenario ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reference_scenario() {
    // Arrange
    let (hub, clock) = hub_with_code("482913");
    let code = hub.registry().rotate(&t1()).await;
    assert_eq!(code.value(), "482913");
    assert_eq!(code.expires_at_ms(), 30_000);

    // Act + Assert: wrong code while active.
    clock.set_ms(5_000);
    let e9 = hub.submit(&t1(), "E9", "000000").await;
    assert_eq!(e9.outcome, ClockOutcome::RejectedMismatch);

    // Act + Assert: right code while active.
    clock.set_ms(10_000);
    let e7 = hub.submit(&t1(), "E7", "482913").await;
    assert_eq!(e7.outcome, ClockOutcome::Accepted);
    assert_eq!(e7.timestamp_ms, 10_000);
    assert_eq!(e7.employee_id, "E7");

    // Act + Assert: right code after expiry.
    clock.set_ms(31_000);
    let e8 = hub.submit(&t1(), "E8", "482913").await;
    assert_eq!(e8.outcome, ClockOutcome::RejectedExpired);
}

// ── Reuse and expiry ──────────────────────────────────────────────────────────

/// Several employees reading the same screen all clock in with one code.
#[tokio::test]
async fn test_code_is_reusable_until_expiry() {
    let (hub, clock) = hub_with_code("482913");
    hub.registry().rotate(&t1()).await;
    clock.set_ms(1_000);

    for employee in ["E1", "E2", "E3", "E4"] {
        let event = hub.submit(&t1(), employee, "482913").await;
        assert_eq!(event.outcome, ClockOutcome::Accepted, "{employee}");
    }
}

#[tokio::test]
async fn test_expired_code_stays_expired() {
    let (hub, clock) = hub_with_code("482913");
    hub.registry().rotate(&t1()).await;
    clock.set_ms(30_001);

    for _ in 0..5 {
        let event = hub.submit(&t1(), "E8", "482913").await;
        assert_eq!(event.outcome, ClockOutcome::RejectedExpired);
    }
    assert_eq!(hub.registry().state(&t1()), CodeState::Expired);
}

#[tokio::test]
async fn test_submission_at_exact_expiry_is_accepted() {
    let (hub, clock) = hub_with_code("482913");
    hub.registry().rotate(&t1()).await;
    clock.set_ms(30_000);

    let event = hub.submit(&t1(), "E7", "482913").await;

    assert_eq!(event.outcome, ClockOutcome::Accepted);
}

#[tokio::test]
async fn test_team_without_code_rejects_everything() {
    let (hub, _clock) = hub_with_code("482913");

    let event = hub.submit(&t1(), "E1", "482913").await;

    assert_eq!(event.outcome, ClockOutcome::RejectedNoCode);
    assert_eq!(hub.registry().state(&t1()), CodeState::NoCode);
}

#[tokio::test]
async fn test_codes_are_scoped_per_team() {
    let (hub, clock) = hub_with_code("482913");
    hub.registry().rotate(&t1()).await;
    clock.set_ms(1_000);

    let other = hub.submit(&TeamId::parse("T2").unwrap(), "E1", "482913").await;

    assert_eq!(other.outcome, ClockOutcome::RejectedNoCode);
}
