//! Ticket domain types
//!
//! A ticket moves through exactly one lifecycle transition, Open to
//! Completed. While Open it may carry a lease (holder plus expiry) that
//! grants one worker exclusive processing rights until the lease expires or
//! is released.

use crate::core::fingerprint::fingerprint;
use crate::error::{Result, TriageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a ticket
///
/// Date-partitioned with a random suffix: `TCK-YYYYMMDD-xxxxxxxx` where the
/// suffix is eight lowercase hex characters. The date partition keeps ids
/// human-scannable in logs; uniqueness comes from the random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Generate a new ticket id partitioned on today's date
    #[must_use]
    pub fn new() -> Self {
        let date = Utc::now().format("%Y%m%d");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("TCK-{date}-{}", &suffix[..8]))
    }

    /// Parse a ticket id, validating its shape
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidTicketId` when the input does not match
    /// `TCK-YYYYMMDD-xxxxxxxx`.
    pub fn parse_str(s: &str) -> Result<Self> {
        let invalid = || TriageError::InvalidTicketId {
            value: s.to_string(),
        };

        let rest = s.strip_prefix("TCK-").ok_or_else(invalid)?;
        let (date, suffix) = rest.split_once('-').ok_or_else(invalid)?;
        if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if suffix.len() != 8
            || !suffix
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    /// The random suffix, convenient for compact log lines
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.rsplit('-').next().unwrap_or(&self.0)
    }

    /// The full id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TicketId {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

/// Ticket priority, P0 highest
///
/// The ordinal ordering (`P0 < P1 < ...`) is relied on by claim ordering:
/// lower ordinal claims first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    /// All priorities in claim order
    pub const ALL: [Self; 5] = [Self::P0, Self::P1, Self::P2, Self::P3, Self::P4];

    /// String form used in storage and wire shapes
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::P4 => "P4",
        }
    }

    /// P0 and P1 bypass creation throttling entirely
    #[must_use]
    pub const fn is_throttle_exempt(self) -> bool {
        matches!(self, Self::P0 | Self::P1)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            "P3" => Ok(Self::P3),
            "P4" => Ok(Self::P4),
            _ => Err(TriageError::InvalidPriority {
                value: s.to_string(),
            }),
        }
    }
}

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Open,
    Completed,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Completed => "Completed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Open" => Ok(Self::Open),
            "Completed" => Ok(Self::Completed),
            _ => Err(TriageError::custom(format!("invalid status: '{s}'"))),
        }
    }
}

/// Reporting checklist attached to a ticket
///
/// Used only for reporting; the store never branches on these flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    #[serde(default)]
    pub documented: bool,
    #[serde(default)]
    pub functioning: bool,
    #[serde(default)]
    pub tested: bool,
    #[serde(default)]
    pub completed: bool,
}

impl Checklist {
    /// A checklist with every item ticked
    #[must_use]
    pub const fn complete() -> Self {
        Self {
            documented: true,
            functioning: true,
            tested: true,
            completed: true,
        }
    }
}

/// A granted lease on a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub ticket_id: TicketId,
    pub holder: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease has expired as of `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the lease has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// A producer-submitted error report, the input to ticket creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketReport {
    pub priority: Priority,
    pub error_type: String,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
}

impl TicketReport {
    /// Create a report with the required fields
    pub fn new(
        priority: Priority,
        error_type: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            priority,
            error_type: error_type.into(),
            message: message.into(),
            source: source.into(),
            stack_trace: None,
            correlation_id: None,
            run_label: None,
        }
    }

    /// The duplicate guard this report hashes to
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.source,
            &self.message,
            &self.error_type,
            self.stack_trace.as_deref(),
        )
    }
}

/// The central work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub priority: Priority,
    pub error_type: String,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_summary: Option<String>,
    pub duplicate_guard: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
    #[serde(default)]
    pub checklist: Checklist,
}

impl Ticket {
    /// Build a fresh Open ticket from a producer report
    ///
    /// Stamps a new id, the current time, and the duplicate guard.
    #[must_use]
    pub fn from_report(report: &TicketReport) -> Self {
        let now = Utc::now();
        Self {
            id: TicketId::new(),
            priority: report.priority,
            error_type: report.error_type.clone(),
            message: report.message.clone(),
            source: report.source.clone(),
            stack_trace: report.stack_trace.clone(),
            status: Status::Open,
            locked_by: None,
            locked_at: None,
            lease_expires: None,
            completion_summary: None,
            duplicate_guard: report.fingerprint(),
            created_at: now,
            updated_at: now,
            correlation_id: report.correlation_id.clone(),
            run_label: report.run_label.clone(),
            checklist: Checklist::default(),
        }
    }

    /// Whether a holder currently has an unexpired lease as of `now`
    #[must_use]
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Open
            && self.locked_by.is_some()
            && self.lease_expires.is_some_and(|exp| exp > now)
    }

    /// Whether the ticket is eligible for a claim as of `now`
    #[must_use]
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Open && !self.is_locked_at(now)
    }
}

/// Produce a worker identity for dispatchers that do not name themselves
///
/// Combines the process id with a random suffix so restarted workers never
/// collide with their predecessor's stale leases.
#[must_use]
pub fn default_holder() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("worker-{}-{}", std::process::id(), &suffix[..6])
}
