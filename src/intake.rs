//! Producer-facing ticket intake
//!
//! The pipeline in front of the store: fingerprint, throttle check, insert,
//! and degradation to the fallback log when the store is unreachable. No
//! submission on this path propagates an unhandled failure to the producer;
//! every report resolves to created, duplicate-skipped, throttle-rejected,
//! or deferred. The only exceptions are precondition violations (malformed
//! input) and a failure of the fallback append itself, at which point
//! nothing holds the payload.

use crate::core::{Ticket, TicketReport};
use crate::error::Result;
use crate::events::{NotificationSink, NullSink, TicketEvent};
use crate::fallback::{FallbackEntry, FallbackQueue};
use crate::storage::TicketStore;
use crate::throttle::ThrottleGate;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a submission resolved
///
/// Only `Created` put a row in the primary store; the other outcomes are
/// still success-like for the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Created(Ticket),
    /// An active ticket already holds this duplicate guard
    Duplicate { guard: String },
    /// Rejected by the throttle gate; identical in effect to a duplicate
    Throttled { priority: crate::core::Priority },
    /// Accepted into the fallback log while the store is unreachable
    Deferred { guard: String },
}

/// Producer pipeline holding its injected collaborators
pub struct TicketIntake {
    store: Arc<dyn TicketStore>,
    throttle: Arc<ThrottleGate>,
    fallback: Arc<FallbackQueue>,
    sink: Arc<dyn NotificationSink>,
}

impl TicketIntake {
    pub fn new(
        store: Arc<dyn TicketStore>,
        throttle: Arc<ThrottleGate>,
        fallback: Arc<FallbackQueue>,
    ) -> Self {
        Self {
            store,
            throttle,
            fallback,
            sink: Arc::new(NullSink),
        }
    }

    /// Replace the notification sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Submit an error report
    ///
    /// # Errors
    ///
    /// Propagates only programmer errors from the report contents, storage
    /// failures that are not availability problems, and a failed fallback
    /// append. Outages, duplicates, and throttling resolve to an
    /// [`IntakeOutcome`], not an error.
    pub fn submit(&self, report: TicketReport) -> Result<IntakeOutcome> {
        let decision = self.throttle.check(report.priority, &report.error_type);
        if !decision.is_allowed() {
            self.sink.notify(&TicketEvent::Throttled {
                priority: report.priority,
                error_type: report.error_type.clone(),
            });
            return Ok(IntakeOutcome::Throttled {
                priority: report.priority,
            });
        }

        let ticket = Ticket::from_report(&report);
        match self.store.create(&ticket) {
            Ok(true) => {
                self.throttle
                    .record(ticket.priority, &ticket.id, &ticket.error_type);
                self.sink.notify(&TicketEvent::Created {
                    ticket: ticket.clone(),
                });
                Ok(IntakeOutcome::Created(ticket))
            }
            Ok(false) => {
                debug!(guard = %ticket.duplicate_guard, "duplicate report skipped");
                Ok(IntakeOutcome::Duplicate {
                    guard: ticket.duplicate_guard,
                })
            }
            // Branch on the error kind, not on catching arbitrary failures:
            // only an availability problem degrades to the fallback log.
            Err(err) if err.is_storage_unavailable() => {
                warn!(
                    guard = %ticket.duplicate_guard,
                    error = %err,
                    "store unreachable, deferring ticket to fallback log"
                );
                let guard = ticket.duplicate_guard.clone();
                self.throttle
                    .record(ticket.priority, &ticket.id, &ticket.error_type);
                self.fallback.enqueue(FallbackEntry::from_ticket(&ticket))?;
                self.sink.notify(&TicketEvent::Deferred {
                    guard: guard.clone(),
                    priority: ticket.priority,
                });
                Ok(IntakeOutcome::Deferred { guard })
            }
            Err(err) => Err(err),
        }
    }

    /// Drain the fallback log into the store, once it is healthy again
    pub fn replay_fallback(&self) -> Result<usize> {
        self.fallback.replay(self.store.as_ref())
    }

    /// Entries still waiting in the fallback log
    pub fn fallback_pending(&self) -> Result<usize> {
        self.fallback.pending()
    }
}
