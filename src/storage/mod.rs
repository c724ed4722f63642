//! Durable ticket storage
//!
//! The [`TicketStore`] trait is the crate's synchronization boundary: every
//! mutation it exposes is an atomic conditional update, so any number of
//! workers in any number of processes can share one database without an
//! in-memory lock. The shipped backend is SQLite ([`SqliteTicketStore`]);
//! test doubles implement the same contract.

mod sqlite;

pub use sqlite::SqliteTicketStore;

use crate::core::{Checklist, Lease, Priority, Status, Ticket, TicketId};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Storage contract for the ticket work-queue
///
/// Lock-state transitions (`acquire_lock`, `renew_lock`, `release_lock`,
/// `claim_next`, `mark_complete`) are compare-and-swap operations: each one
/// is a single conditioned update, never a read-then-write pair, and a
/// failed condition is reported through the return value rather than an
/// error. Transient storage contention during a claim is likewise a claim
/// failure, not a crash.
pub trait TicketStore: Send + Sync {
    /// Insert a ticket unless an active ticket already holds its duplicate
    /// guard
    ///
    /// Returns `Ok(false)` on a duplicate; that is a normal outcome, not an
    /// error. "Active" means non-completed, or completed within the dedup
    /// retention window.
    fn create(&self, ticket: &Ticket) -> Result<bool>;

    /// Fetch a ticket by id
    fn get(&self, id: &TicketId) -> Result<Option<Ticket>>;

    /// Atomically lock a specific ticket for `holder`
    ///
    /// Succeeds only if the row is unlocked or its lease has expired.
    /// Returns `Ok(None)` when someone else holds an unexpired lease.
    fn acquire_lock(&self, id: &TicketId, holder: &str, lease: Duration) -> Result<Option<Lease>>;

    /// Extend the caller's own unexpired lease
    ///
    /// A mismatched holder or an already-expired lease is a no-op failure
    /// (`Ok(None)`).
    fn renew_lock(&self, id: &TicketId, holder: &str, lease: Duration) -> Result<Option<Lease>>;

    /// Release the caller's own lock, making the ticket claimable again
    ///
    /// A mismatched holder is a no-op failure (`Ok(false)`).
    fn release_lock(&self, id: &TicketId, holder: &str) -> Result<bool>;

    /// Select and lock the next eligible ticket as one indivisible operation
    ///
    /// Eligible means Open and unlocked-or-lease-expired. Preference is
    /// strictly higher priority first, then older creation time; no ordering
    /// is guaranteed across ties. `priority` restricts the scan to exactly
    /// that tier.
    fn claim_next(
        &self,
        holder: &str,
        priority: Option<Priority>,
        lease: Duration,
    ) -> Result<Option<Ticket>>;

    /// Transition a ticket to Completed
    ///
    /// Idempotent: completing an already-completed ticket returns `Ok(true)`
    /// without touching the stored summary (first-write-wins). A stale
    /// worker whose lease was reclaimed by another holder gets `Ok(false)`.
    fn mark_complete(
        &self,
        id: &TicketId,
        holder: &str,
        summary: &str,
        checklist: Checklist,
    ) -> Result<bool>;

    /// Clear holder and lease fields on every row whose lease has expired
    ///
    /// This is the self-healing path for crashed workers; returns how many
    /// rows became claimable again.
    fn reclaim_expired(&self) -> Result<usize>;

    /// Counts by status, priority, and lock state
    fn stats(&self) -> Result<StoreStats>;

    /// Tickets matching a predicate
    fn find(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>>;

    /// Count of tickets matching a predicate
    fn count(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<usize>;

    /// All Open tickets, claimable or not
    fn open_tickets(&self) -> Result<Vec<Ticket>> {
        self.find(&|t| t.status == Status::Open)
    }
}

/// Snapshot of store contents for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub open: usize,
    pub completed: usize,
    /// Open tickets under an unexpired lease
    pub in_progress: usize,
    /// Open tickets a claim would currently consider
    pub claimable: usize,
    pub open_by_priority: BTreeMap<Priority, usize>,
}
