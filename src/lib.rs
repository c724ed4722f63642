//! triage-queue - a durable ticket work-queue for error reports
//!
//! This crate ingests error/incident reports from many concurrent producers
//! and exposes them to competing workers that claim, process, and complete
//! them exactly once. The core pieces:
//! - Lease-based atomic claim/dispatch built on conditional updates in the
//!   ticket store
//! - Duplicate-fingerprint suppression with numeric normalization
//! - A durable fallback log for store outages, replayed on recovery
//! - Priority-tiered creation throttling with a global emergency brake
//!
//! # Concurrent Safety
//!
//! Workers coordinate only through the store's atomic conditional updates;
//! there is no shared in-memory lock, so workers may live in separate
//! processes. Claim, renew, release, and complete are all compare-and-swap
//! operations, and expired leases are reclaimed automatically so a crashed
//! worker never strands a ticket.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use triage_queue::config::Config;
//! use triage_queue::core::{Priority, TicketReport};
//! use triage_queue::fallback::FallbackQueue;
//! use triage_queue::intake::TicketIntake;
//! use triage_queue::storage::SqliteTicketStore;
//! use triage_queue::throttle::ThrottleGate;
//!
//! let config = Config::load_or_default(None)?;
//! let store = Arc::new(SqliteTicketStore::open(&config)?);
//! let intake = TicketIntake::new(
//!     store.clone(),
//!     Arc::new(ThrottleGate::new(config.throttle.clone())),
//!     Arc::new(FallbackQueue::new(config.fallback.path.clone())),
//! );
//!
//! let report = TicketReport::new(Priority::P1, "Timeout", "upstream timed out", "gateway.rs:42");
//! let outcome = intake.submit(report)?;
//! ```

// Allow missing error documentation for internal implementations
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fallback;
pub mod intake;
pub mod storage;
pub mod throttle;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use error::{Result, TriageError};
