//! State-transition notifications
//!
//! The intake and dispatcher announce ticket transitions through a
//! [`NotificationSink`]. Delivery is best-effort and fire-and-forget: the
//! core never waits on a sink and never reacts to one misbehaving. Sinks are
//! constructor-injected; the crate ships [`LogSink`] (tracing) and
//! [`NullSink`].

use crate::core::{Priority, Ticket, TicketId};
use tracing::info;

/// A ticket state transition worth announcing
#[derive(Debug, Clone)]
pub enum TicketEvent {
    /// A ticket landed in the store
    Created { ticket: Ticket },
    /// The store was unreachable; the payload went to the fallback log
    Deferred { guard: String, priority: Priority },
    /// A creation was rejected by the throttle gate
    Throttled {
        priority: Priority,
        error_type: String,
    },
    /// A worker claimed a ticket
    Claimed { ticket_id: TicketId, holder: String },
    /// A worker released its claim after a handler failure
    Released { ticket_id: TicketId, holder: String },
    /// A ticket completed
    Completed { ticket_id: TicketId, summary: String },
    /// Expired leases were cleared
    Reclaimed { count: usize },
}

/// Best-effort observer of ticket transitions
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &TicketEvent);
}

/// Sink that logs every event through `tracing`
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: &TicketEvent) {
        match event {
            TicketEvent::Created { ticket } => {
                info!(id = %ticket.id.short(), priority = %ticket.priority, "ticket created");
            }
            TicketEvent::Deferred { guard, priority } => {
                info!(%guard, %priority, "ticket deferred to fallback");
            }
            TicketEvent::Throttled {
                priority,
                error_type,
            } => {
                info!(%priority, error_type, "ticket throttled");
            }
            TicketEvent::Claimed { ticket_id, holder } => {
                info!(id = %ticket_id.short(), %holder, "ticket claimed");
            }
            TicketEvent::Released { ticket_id, holder } => {
                info!(id = %ticket_id.short(), %holder, "ticket released");
            }
            TicketEvent::Completed { ticket_id, summary } => {
                info!(id = %ticket_id.short(), summary, "ticket completed");
            }
            TicketEvent::Reclaimed { count } => {
                info!(count, "expired leases reclaimed");
            }
        }
    }
}

/// Sink that discards every event
#[derive(Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _event: &TicketEvent) {}
}
