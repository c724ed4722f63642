//! Core domain types for the triage queue
//!
//! Everything here is pure data and pure functions; durability and
//! coordination live in the `storage`, `fallback`, and `throttle` modules.

pub mod builders;
pub mod fingerprint;

mod ticket;

pub use builders::{ReportBuilder, TicketBuilder};
pub use fingerprint::fingerprint;
pub use ticket::{
    Checklist, Lease, Priority, Status, Ticket, TicketId, TicketReport, default_holder,
};
