//! Worker dispatch loop
//!
//! Each [`Dispatcher`] runs claim → handle → complete-or-release against the
//! shared store. Any number of dispatchers, in threads or separate
//! processes, may run simultaneously; the store's atomic claim guarantees no
//! two ever receive the same ticket, so there is no coordination here beyond
//! the store itself.
//!
//! Cancellation is cooperative and happens between iterations. An in-flight
//! handler is never interrupted; if it wedges, its lease expires and
//! `reclaim_expired` (run opportunistically on idle polls) hands the ticket
//! to someone else.

use crate::config::{Config, DispatchConfig};
use crate::core::{Checklist, Priority, Ticket, default_holder};
use crate::error::Result;
use crate::events::{NotificationSink, NullSink, TicketEvent};
use crate::storage::TicketStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Externally supplied ticket handler
///
/// Returns the completion summary on success; any error releases the claim
/// so the ticket stays available.
pub type Handler = dyn Fn(&Ticket) -> anyhow::Result<String> + Send + Sync;

/// Counters from one `run_loop` invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
}

enum Step {
    Idle,
    Completed(Ticket),
    Failed(Ticket),
}

/// The claim/process/complete loop run by one worker
pub struct Dispatcher {
    store: Arc<dyn TicketStore>,
    holder: String,
    lease_ttl: Duration,
    config: DispatchConfig,
    priority_filter: Option<Priority>,
    sink: Arc<dyn NotificationSink>,
}

impl Dispatcher {
    /// Build a dispatcher with a generated worker identity
    pub fn new(store: Arc<dyn TicketStore>, config: &Config) -> Self {
        Self {
            store,
            holder: default_holder(),
            lease_ttl: config.lease.ttl(),
            config: config.dispatch.clone(),
            priority_filter: None,
            sink: Arc::new(NullSink),
        }
    }

    /// Name this worker explicitly
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Restrict claims to exactly one priority tier
    #[must_use]
    pub const fn with_priority_filter(mut self, priority: Priority) -> Self {
        self.priority_filter = Some(priority);
        self
    }

    /// Replace the notification sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The worker identity used for claims
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Claim and process one ticket
    ///
    /// Returns `Ok(None)` when nothing is eligible. On handler success the
    /// ticket is completed with the handler's summary; on handler failure
    /// the lock is released so the ticket stays claimable. Either way the
    /// claimed ticket is returned.
    pub fn process_next(&self, handler: &Handler) -> Result<Option<Ticket>> {
        match self.step(handler)? {
            Step::Idle => Ok(None),
            Step::Completed(ticket) | Step::Failed(ticket) => Ok(Some(ticket)),
        }
    }

    fn step(&self, handler: &Handler) -> Result<Step> {
        let Some(ticket) =
            self.store
                .claim_next(&self.holder, self.priority_filter, self.lease_ttl)?
        else {
            return Ok(Step::Idle);
        };
        self.sink.notify(&TicketEvent::Claimed {
            ticket_id: ticket.id.clone(),
            holder: self.holder.clone(),
        });

        match handler(&ticket) {
            Ok(summary) => {
                let completed = self.store.mark_complete(
                    &ticket.id,
                    &self.holder,
                    &summary,
                    Checklist::complete(),
                )?;
                if completed {
                    self.sink.notify(&TicketEvent::Completed {
                        ticket_id: ticket.id.clone(),
                        summary,
                    });
                } else {
                    // Lease expired mid-handler and someone else took over.
                    warn!(
                        id = %ticket.id.short(),
                        holder = %self.holder,
                        "handler finished but the lease was lost"
                    );
                }
                Ok(Step::Completed(ticket))
            }
            Err(err) => {
                warn!(
                    id = %ticket.id.short(),
                    holder = %self.holder,
                    error = %format!("{err:#}"),
                    "handler failed, releasing claim"
                );
                self.store.release_lock(&ticket.id, &self.holder)?;
                self.sink.notify(&TicketEvent::Released {
                    ticket_id: ticket.id.clone(),
                    holder: self.holder.clone(),
                });
                Ok(Step::Failed(ticket))
            }
        }
    }

    /// Process tickets until stopped or the idle budget runs out
    ///
    /// Idle polls sleep with exponential backoff up to the configured
    /// maximum and run `reclaim_expired` opportunistically. With an idle
    /// budget configured, the loop returns after the queue has stayed empty
    /// that long; otherwise it polls until `stop` is set.
    pub fn run_loop(&self, handler: &Handler, stop: &AtomicBool) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        let mut interval = self.config.poll_interval();
        let mut idle_since: Option<Instant> = None;

        info!(holder = %self.holder, "dispatch loop started");
        while !stop.load(Ordering::Relaxed) {
            match self.step(handler)? {
                Step::Completed(_) => {
                    summary.processed += 1;
                    summary.completed += 1;
                    interval = self.config.poll_interval();
                    idle_since = None;
                }
                Step::Failed(_) => {
                    summary.processed += 1;
                    summary.failed += 1;
                    interval = self.config.poll_interval();
                    idle_since = None;
                }
                Step::Idle => {
                    let reclaimed = self.store.reclaim_expired()?;
                    if reclaimed > 0 {
                        self.sink.notify(&TicketEvent::Reclaimed { count: reclaimed });
                        // Reclaimed rows may be claimable right away
                        continue;
                    }

                    let since = *idle_since.get_or_insert_with(Instant::now);
                    if let Some(budget) = self.config.idle_budget() {
                        if since.elapsed() >= budget {
                            debug!(holder = %self.holder, "idle budget exhausted");
                            break;
                        }
                    }

                    sleep_responsive(interval, stop);
                    interval = (interval * 2).min(self.config.max_poll_interval());
                }
            }
        }

        info!(
            holder = %self.holder,
            processed = summary.processed,
            completed = summary.completed,
            failed = summary.failed,
            "dispatch loop stopped"
        );
        Ok(summary)
    }
}

/// Sleep in short slices so a stop request is seen promptly
fn sleep_responsive(total: Duration, stop: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
        std::thread::sleep(SLICE.min(deadline.saturating_duration_since(Instant::now())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Priority, Status, TicketReport};
    use crate::test_utils::TestHarness;
    use anyhow::anyhow;

    fn seed(harness: &TestHarness, priority: Priority, message: &str) -> Ticket {
        // Distinct sources keep the seeds from colliding on one guard
        let report = TicketReport::new(priority, "Error", message, format!("src.rs:{message}"));
        let ticket = Ticket::from_report(&report);
        assert!(harness.store.create(&ticket).unwrap());
        ticket
    }

    #[test]
    fn test_process_next_completes_on_success() {
        let harness = TestHarness::new();
        let seeded = seed(&harness, Priority::P2, "fixable");
        let dispatcher = harness.dispatcher().with_holder("w1");

        let handled = dispatcher
            .process_next(&|t: &Ticket| Ok(format!("handled {}", t.id.short())))
            .unwrap()
            .unwrap();
        assert_eq!(handled.id, seeded.id);

        let stored = harness.store.get(&seeded.id).unwrap().unwrap();
        assert_eq!(stored.status, Status::Completed);
        assert_eq!(
            stored.completion_summary.as_deref(),
            Some(format!("handled {}", seeded.id.short()).as_str())
        );
        assert_eq!(stored.checklist, Checklist::complete());
    }

    #[test]
    fn test_process_next_releases_on_failure() {
        let harness = TestHarness::new();
        let seeded = seed(&harness, Priority::P2, "stubborn");
        let dispatcher = harness.dispatcher().with_holder("w1");

        let handled = dispatcher
            .process_next(&|_: &Ticket| Err(anyhow!("handler blew up")))
            .unwrap()
            .unwrap();
        assert_eq!(handled.id, seeded.id);

        // No completion, no data loss: the ticket is claimable again
        let stored = harness.store.get(&seeded.id).unwrap().unwrap();
        assert_eq!(stored.status, Status::Open);
        assert!(stored.locked_by.is_none());
    }

    #[test]
    fn test_process_next_empty_queue() {
        let harness = TestHarness::new();
        let dispatcher = harness.dispatcher();
        let handled = dispatcher
            .process_next(&|_: &Ticket| Ok("never called".to_string()))
            .unwrap();
        assert!(handled.is_none());
    }

    #[test]
    fn test_priority_filter_restricts_claims() {
        let harness = TestHarness::new();
        seed(&harness, Priority::P0, "urgent");
        let p3 = seed(&harness, Priority::P3, "background");
        let dispatcher = harness
            .dispatcher()
            .with_holder("bg-worker")
            .with_priority_filter(Priority::P3);

        let handled = dispatcher
            .process_next(&|_: &Ticket| Ok("done".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(handled.id, p3.id);
        assert!(
            dispatcher
                .process_next(&|_: &Ticket| Ok("done".to_string()))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_run_loop_drains_and_stops_on_idle_budget() {
        let mut config = Config::default();
        config.dispatch.poll_interval_ms = 10;
        config.dispatch.idle_budget_ms = Some(50);
        let harness = TestHarness::with_config(config);
        for n in 0..3 {
            seed(&harness, Priority::P2, &format!("job number {n} of batch"));
        }

        let dispatcher = harness.dispatcher();
        let stop = AtomicBool::new(false);
        let summary = dispatcher
            .run_loop(&|_: &Ticket| Ok("done".to_string()), &stop)
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(harness.store.stats().unwrap().completed, 3);
    }

    #[test]
    fn test_run_loop_counts_failures() {
        let mut config = Config::default();
        config.dispatch.poll_interval_ms = 10;
        config.dispatch.idle_budget_ms = Some(50);
        let harness = TestHarness::with_config(config);
        seed(&harness, Priority::P2, "will fail");

        let dispatcher = harness.dispatcher();
        let stop = AtomicBool::new(false);
        let summary = dispatcher
            .run_loop(&|_: &Ticket| Err(anyhow!("nope")), &stop)
            .unwrap();

        // The single ticket fails once per claim until the loop goes idle;
        // every attempt is a failure and nothing completes.
        assert!(summary.failed >= 1);
        assert_eq!(summary.completed, 0);
        assert_eq!(harness.store.stats().unwrap().completed, 0);
    }

    #[test]
    fn test_run_loop_observes_stop_flag() {
        let harness = TestHarness::new();
        let dispatcher = harness.dispatcher();
        let stop = AtomicBool::new(true);
        let summary = dispatcher
            .run_loop(&|_: &Ticket| Ok("never".to_string()), &stop)
            .unwrap();
        assert_eq!(summary.processed, 0);
    }

    #[test]
    fn test_run_loop_reclaims_expired_leases() {
        let mut config = Config::default();
        config.dispatch.poll_interval_ms = 10;
        config.dispatch.idle_budget_ms = Some(200);
        let harness = TestHarness::with_config(config);
        let seeded = seed(&harness, Priority::P2, "abandoned");

        // A crashed worker left a short lease behind
        harness
            .store
            .acquire_lock(&seeded.id, "crashed-worker", Duration::from_millis(30))
            .unwrap()
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let dispatcher = harness.dispatcher().with_holder("healthy-worker");
        let stop = AtomicBool::new(false);
        let summary = dispatcher
            .run_loop(&|_: &Ticket| Ok("rescued".to_string()), &stop)
            .unwrap();

        assert_eq!(summary.completed, 1);
        let stored = harness.store.get(&seeded.id).unwrap().unwrap();
        assert_eq!(stored.status, Status::Completed);
    }
}
