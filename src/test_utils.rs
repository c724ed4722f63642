//! Test utilities for triage-queue
//!
//! Common fixtures bundling a temp-directory store, throttle gate, and
//! fallback queue so component tests don't repeat the wiring.

#![cfg(test)]

use crate::config::Config;
use crate::core::{Priority, Ticket, TicketReport};
use crate::dispatch::Dispatcher;
use crate::fallback::FallbackQueue;
use crate::intake::TicketIntake;
use crate::storage::{SqliteTicketStore, TicketStore};
use crate::throttle::ThrottleGate;
use std::sync::Arc;
use std::sync::Once;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Install a tracing subscriber honoring `RUST_LOG`, once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fixture owning every collaborator on a temp directory
pub struct TestHarness {
    pub temp_dir: TempDir,
    pub config: Config,
    pub store: Arc<SqliteTicketStore>,
    pub throttle: Arc<ThrottleGate>,
    pub fallback: Arc<FallbackQueue>,
}

impl TestHarness {
    /// Harness with the default configuration
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Harness with custom caps and intervals; paths are always redirected
    /// into the temp directory
    pub fn with_config(mut config: Config) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        config.store.path = temp_dir.path().join("tickets.db");
        config.fallback.path = temp_dir.path().join("fallback.json");

        let store = Arc::new(SqliteTicketStore::open(&config).expect("Failed to open store"));
        let throttle = Arc::new(ThrottleGate::new(config.throttle.clone()));
        let fallback = Arc::new(FallbackQueue::new(config.fallback.path.clone()));

        Self {
            temp_dir,
            config,
            store,
            throttle,
            fallback,
        }
    }

    /// An intake wired to this harness's collaborators
    pub fn intake(&self) -> TicketIntake {
        TicketIntake::new(
            self.store.clone(),
            self.throttle.clone(),
            self.fallback.clone(),
        )
    }

    /// A dispatcher wired to this harness's store and config
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.store.clone(), &self.config)
    }

    /// A second store handle on the same database, as a separate worker
    /// process would open
    pub fn store_handle(&self) -> SqliteTicketStore {
        SqliteTicketStore::open(&self.config).expect("Failed to reopen store")
    }

    /// Create and insert a ticket, panicking on duplicates
    pub fn seed_ticket(&self, priority: Priority, message: &str) -> Ticket {
        let ticket = Ticket::from_report(&sample_report(priority, message));
        assert!(
            self.store.create(&ticket).expect("Failed to create ticket"),
            "seed collided with an existing duplicate guard"
        );
        ticket
    }
}

/// A report with distinct identifying fields derived from the message
pub fn sample_report(priority: Priority, message: &str) -> TicketReport {
    TicketReport::new(priority, "TestError", message, format!("test.rs:{message}"))
}
