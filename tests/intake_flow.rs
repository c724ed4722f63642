//! Producer pipeline tests: dedup, throttling, and the emergency brake

use std::sync::Arc;

use triage_queue::config::{Config, ThrottleConfig};
use triage_queue::core::{Checklist, Priority, TicketReport};
use triage_queue::fallback::FallbackQueue;
use triage_queue::intake::{IntakeOutcome, TicketIntake};
use triage_queue::storage::{SqliteTicketStore, TicketStore};
use triage_queue::throttle::ThrottleGate;

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<SqliteTicketStore>,
    throttle: Arc<ThrottleGate>,
    intake: TicketIntake,
}

fn fixture(throttle_config: ThrottleConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.store.path = dir.path().join("tickets.db");
    config.fallback.path = dir.path().join("fallback.json");
    config.throttle = throttle_config;

    let store = Arc::new(SqliteTicketStore::open(&config).unwrap());
    let throttle = Arc::new(ThrottleGate::new(config.throttle.clone()));
    let intake = TicketIntake::new(
        store.clone(),
        throttle.clone(),
        Arc::new(FallbackQueue::new(config.fallback.path.clone())),
    );
    Fixture {
        _dir: dir,
        store,
        throttle,
        intake,
    }
}

fn report(priority: Priority, message: &str, source: &str) -> TicketReport {
    TicketReport::new(priority, "Error", message, source)
}

#[test]
fn duplicate_suppressed_until_completion() {
    let fx = fixture(ThrottleConfig::default());

    let first = fx
        .intake
        .submit(report(Priority::P2, "connection reset by peer 4821", "db.py:1"))
        .unwrap();
    let IntakeOutcome::Created(ticket) = first else {
        panic!("expected Created, got {first:?}");
    };

    // Volatile digits collapse into the same guard
    let second = fx
        .intake
        .submit(report(Priority::P2, "connection reset by peer 9377", "db.py:1"))
        .unwrap();
    assert!(matches!(second, IntakeOutcome::Duplicate { .. }));
    assert_eq!(fx.store.count(&|_| true).unwrap(), 1);

    // Completion frees the guard (default retention is zero)
    fx.store
        .acquire_lock(&ticket.id, "w1", std::time::Duration::from_secs(60))
        .unwrap()
        .unwrap();
    fx.store
        .mark_complete(&ticket.id, "w1", "fixed", Checklist::complete())
        .unwrap();

    let third = fx
        .intake
        .submit(report(Priority::P2, "connection reset by peer 1111", "db.py:1"))
        .unwrap();
    assert!(matches!(third, IntakeOutcome::Created(_)));
    assert_eq!(fx.store.count(&|_| true).unwrap(), 2);
}

#[test]
fn different_sources_are_not_duplicates() {
    let fx = fixture(ThrottleConfig::default());

    let a = fx
        .intake
        .submit(report(Priority::P2, "timeout after 30s", "api.rs:10"))
        .unwrap();
    let b = fx
        .intake
        .submit(report(Priority::P2, "timeout after 30s", "worker.rs:55"))
        .unwrap();
    assert!(matches!(a, IntakeOutcome::Created(_)));
    assert!(matches!(b, IntakeOutcome::Created(_)));
}

#[test]
fn p2_cap_admits_exactly_three_of_five() {
    let fx = fixture(ThrottleConfig {
        p2_hourly_cap: 3,
        emergency_cap: 100,
        ..ThrottleConfig::default()
    });

    let mut created = 0;
    let mut throttled = 0;
    for n in 0..5 {
        let outcome = fx
            .intake
            .submit(report(
                Priority::P2,
                &format!("distinct p2 failure {n}"),
                &format!("mod{n}.rs:1"),
            ))
            .unwrap();
        match outcome {
            IntakeOutcome::Created(_) => created += 1,
            IntakeOutcome::Throttled { priority } => {
                assert_eq!(priority, Priority::P2);
                throttled += 1;
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(created, 3);
    assert_eq!(throttled, 2);

    // P0 ignores the same window entirely
    for n in 0..5 {
        let outcome = fx
            .intake
            .submit(report(
                Priority::P0,
                &format!("distinct p0 crash {n}"),
                &format!("crit{n}.rs:1"),
            ))
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Created(_)), "P0 #{n}");
    }
    assert_eq!(fx.store.count(&|_| true).unwrap(), 8);
}

#[test]
fn emergency_brake_stops_background_tiers() {
    let fx = fixture(ThrottleConfig {
        p2_hourly_cap: 100,
        p3_four_hour_cap: 100,
        emergency_cap: 3,
        emergency_window_secs: 60,
        ..ThrottleConfig::default()
    });

    // A P1 burst fills the global window; P1 itself is never denied
    for n in 0..3 {
        let outcome = fx
            .intake
            .submit(report(
                Priority::P1,
                &format!("burst failure {n}"),
                &format!("burst{n}.rs:1"),
            ))
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Created(_)));
    }

    // Background tiers are braked despite tier-cap headroom
    let p2 = fx
        .intake
        .submit(report(Priority::P2, "ordinary failure", "calm.rs:1"))
        .unwrap();
    assert!(matches!(p2, IntakeOutcome::Throttled { .. }));
    let p3 = fx
        .intake
        .submit(report(Priority::P3, "minor failure", "calm.rs:2"))
        .unwrap();
    assert!(matches!(p3, IntakeOutcome::Throttled { .. }));

    // Exempt tiers keep flowing
    let p0 = fx
        .intake
        .submit(report(Priority::P0, "still urgent", "hot.rs:1"))
        .unwrap();
    assert!(matches!(p0, IntakeOutcome::Created(_)));
}

#[test]
fn throttle_stats_reflect_usage() {
    let fx = fixture(ThrottleConfig {
        p2_hourly_cap: 10,
        ..ThrottleConfig::default()
    });

    for n in 0..4 {
        fx.intake
            .submit(report(
                Priority::P2,
                &format!("stat sample {n}"),
                &format!("stats{n}.rs:1"),
            ))
            .unwrap();
    }

    let stats = fx.throttle.stats();
    assert_eq!(stats.p2.count, 4);
    assert_eq!(stats.p2.cap, 10);
    assert_eq!(stats.emergency.count, 4);
}

#[test]
fn store_stats_track_pipeline_results() {
    let fx = fixture(ThrottleConfig::default());

    fx.intake
        .submit(report(Priority::P0, "crash one", "a.rs:1"))
        .unwrap();
    fx.intake
        .submit(report(Priority::P2, "slow two", "b.rs:1"))
        .unwrap();
    // Duplicate of the first
    fx.intake
        .submit(report(Priority::P0, "crash one", "a.rs:1"))
        .unwrap();

    let stats = fx.store.stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.open, 2);
    assert_eq!(stats.claimable, 2);
    assert_eq!(stats.open_by_priority.get(&Priority::P0), Some(&1));
    assert_eq!(stats.open_by_priority.get(&Priority::P2), Some(&1));
}
