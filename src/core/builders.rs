use super::fingerprint::fingerprint;
use super::{Checklist, Priority, Status, Ticket, TicketId, TicketReport};
use chrono::{DateTime, Utc};

/// Builder for creating Ticket instances
#[derive(Default)]
pub struct TicketBuilder {
    id: Option<TicketId>,
    priority: Option<Priority>,
    error_type: Option<String>,
    message: Option<String>,
    source: Option<String>,
    stack_trace: Option<String>,
    status: Option<Status>,
    duplicate_guard: Option<String>,
    created_at: Option<DateTime<Utc>>,
    correlation_id: Option<String>,
    run_label: Option<String>,
    checklist: Option<Checklist>,
}

impl TicketBuilder {
    /// Create a new ticket builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ticket ID
    #[must_use]
    pub fn id(mut self, id: TicketId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the priority
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the error type
    #[must_use]
    pub fn error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Set the message
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the source locator
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the stack trace
    #[must_use]
    pub fn stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Set the status
    #[must_use]
    pub const fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Set an explicit duplicate guard instead of the computed fingerprint
    #[must_use]
    pub fn duplicate_guard(mut self, guard: impl Into<String>) -> Self {
        self.duplicate_guard = Some(guard.into());
        self
    }

    /// Set `created_at` timestamp
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Set the correlation id
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the run label
    #[must_use]
    pub fn run_label(mut self, run_label: impl Into<String>) -> Self {
        self.run_label = Some(run_label.into());
        self
    }

    /// Set the checklist
    #[must_use]
    pub const fn checklist(mut self, checklist: Checklist) -> Self {
        self.checklist = Some(checklist);
        self
    }

    /// Build the ticket
    ///
    /// Missing fields fall back to defaults; the duplicate guard is computed
    /// from the identifying fields unless one was set explicitly.
    pub fn build(self) -> Ticket {
        let error_type = self.error_type.unwrap_or_default();
        let message = self.message.unwrap_or_default();
        let source = self.source.unwrap_or_default();
        let stack_trace = self.stack_trace;
        let duplicate_guard = self.duplicate_guard.unwrap_or_else(|| {
            fingerprint(&source, &message, &error_type, stack_trace.as_deref())
        });
        let created_at = self.created_at.unwrap_or_else(Utc::now);

        Ticket {
            id: self.id.unwrap_or_default(),
            priority: self.priority.unwrap_or(Priority::P3),
            error_type,
            message,
            source,
            stack_trace,
            status: self.status.unwrap_or_default(),
            locked_by: None,
            locked_at: None,
            lease_expires: None,
            completion_summary: None,
            duplicate_guard,
            created_at,
            updated_at: created_at,
            correlation_id: self.correlation_id,
            run_label: self.run_label,
            checklist: self.checklist.unwrap_or_default(),
        }
    }
}

/// Builder for creating TicketReport instances
#[derive(Default)]
pub struct ReportBuilder {
    priority: Option<Priority>,
    error_type: Option<String>,
    message: Option<String>,
    source: Option<String>,
    stack_trace: Option<String>,
    correlation_id: Option<String>,
    run_label: Option<String>,
}

impl ReportBuilder {
    /// Create a new report builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the priority
    #[must_use]
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the error type
    #[must_use]
    pub fn error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Set the message
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the source locator
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the stack trace
    #[must_use]
    pub fn stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// Set the correlation id
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the run label
    #[must_use]
    pub fn run_label(mut self, run_label: impl Into<String>) -> Self {
        self.run_label = Some(run_label.into());
        self
    }

    /// Build the report
    pub fn build(self) -> TicketReport {
        TicketReport {
            priority: self.priority.unwrap_or(Priority::P3),
            error_type: self.error_type.unwrap_or_default(),
            message: self.message.unwrap_or_default(),
            source: self.source.unwrap_or_default(),
            stack_trace: self.stack_trace,
            correlation_id: self.correlation_id,
            run_label: self.run_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_builder() {
        let ticket = TicketBuilder::new()
            .priority(Priority::P1)
            .error_type("Timeout")
            .message("request timed out after 30s")
            .source("gateway.rs:42")
            .run_label("nightly")
            .build();

        assert_eq!(ticket.priority, Priority::P1);
        assert_eq!(ticket.error_type, "Timeout");
        assert_eq!(ticket.status, Status::Open);
        assert_eq!(ticket.run_label.as_deref(), Some("nightly"));
        assert_eq!(ticket.created_at, ticket.updated_at);
        assert_eq!(ticket.duplicate_guard.len(), 32);
    }

    #[test]
    fn test_ticket_builder_guard_matches_report() {
        let report = ReportBuilder::new()
            .priority(Priority::P2)
            .error_type("ValueError")
            .message("error 123")
            .source("db.py:1")
            .build();

        let ticket = TicketBuilder::new()
            .priority(Priority::P2)
            .error_type("ValueError")
            .message("error 123")
            .source("db.py:1")
            .build();

        assert_eq!(ticket.duplicate_guard, report.fingerprint());
    }

    #[test]
    fn test_explicit_guard_wins() {
        let ticket = TicketBuilder::new()
            .message("anything")
            .duplicate_guard("cafecafecafecafecafecafecafecafe")
            .build();

        assert_eq!(ticket.duplicate_guard, "cafecafecafecafecafecafecafecafe");
    }

    #[test]
    fn test_report_builder_defaults() {
        let report = ReportBuilder::new().build();
        assert_eq!(report.priority, Priority::P3);
        assert!(report.stack_trace.is_none());
    }
}
