//! Durable fallback queue for store outages
//!
//! When the primary store is unreachable, ticket payloads land in an ordered
//! JSON log on disk and the producer still gets a success-like outcome.
//! Once the store is healthy again, [`FallbackQueue::replay`] drains the log
//! FIFO, removing each entry only after its insert (or duplicate-guard
//! match) succeeded, so a crash mid-replay never duplicates nor drops an
//! entry.
//!
//! Every rewrite goes through write-temp-then-rename with file and
//! directory fsync, and an unparsable log is quarantined next to itself
//! instead of crashing the producer path.

use crate::core::{Checklist, Priority, Status, Ticket, TicketId};
use crate::error::{Result, TriageError};
use crate::storage::TicketStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A self-contained copy of everything needed to recreate a ticket
///
/// Lock and lease state is deliberately absent; a replayed ticket starts
/// unclaimed. Blank optional fields are compacted away before serialization
/// to bound log growth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub id: TicketId,
    pub priority: Priority,
    pub error_type: String,
    pub message: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub duplicate_guard: String,
    pub created_at: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
}

impl FallbackEntry {
    /// Capture a ticket that failed to reach the store
    #[must_use]
    pub fn from_ticket(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id.clone(),
            priority: ticket.priority,
            error_type: ticket.error_type.clone(),
            message: ticket.message.clone(),
            source: ticket.source.clone(),
            stack_trace: compact(ticket.stack_trace.clone()),
            duplicate_guard: ticket.duplicate_guard.clone(),
            created_at: ticket.created_at,
            queued_at: Utc::now(),
            correlation_id: compact(ticket.correlation_id.clone()),
            run_label: compact(ticket.run_label.clone()),
        }
    }

    /// Rebuild the ticket this entry preserves
    #[must_use]
    pub fn to_ticket(&self) -> Ticket {
        Ticket {
            id: self.id.clone(),
            priority: self.priority,
            error_type: self.error_type.clone(),
            message: self.message.clone(),
            source: self.source.clone(),
            stack_trace: self.stack_trace.clone(),
            status: Status::Open,
            locked_by: None,
            locked_at: None,
            lease_expires: None,
            completion_summary: None,
            duplicate_guard: self.duplicate_guard.clone(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            correlation_id: self.correlation_id.clone(),
            run_label: self.run_label.clone(),
            checklist: Checklist::default(),
        }
    }
}

/// Drop empty and whitespace-only optional values
fn compact(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Durable ordered overflow log
///
/// Process-local: each producer process owns its own log file.
#[derive(Debug)]
pub struct FallbackQueue {
    path: PathBuf,
}

impl FallbackQueue {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry to the log
    ///
    /// # Errors
    ///
    /// Returns an IO error when the rewritten log cannot be persisted; this
    /// is the one producer-path failure that propagates, because at that
    /// point nothing holds the payload.
    pub fn enqueue(&self, entry: FallbackEntry) -> Result<()> {
        let mut entries = self.load()?;
        debug!(id = %entry.id.short(), guard = %entry.duplicate_guard, "ticket deferred to fallback log");
        entries.push(entry);
        self.write(&entries)
    }

    /// Drain entries FIFO into a healthy store
    ///
    /// Each drained entry (inserted, or already present via its duplicate
    /// guard) is removed and the log rewritten before the next is attempted,
    /// so the log never claims a drained entry is still pending. On the
    /// first storage failure replay stops; the remaining entries stay
    /// queued. Returns how many entries were drained.
    pub fn replay(&self, store: &dyn TicketStore) -> Result<usize> {
        let mut entries = self.load()?;
        if entries.is_empty() {
            return Ok(0);
        }
        info!(pending = entries.len(), "replaying fallback log");

        let mut drained = 0;
        while !entries.is_empty() {
            let entry = &entries[0];
            match store.create(&entry.to_ticket()) {
                Ok(created) => {
                    if created {
                        debug!(id = %entry.id.short(), "fallback entry replayed");
                    } else {
                        debug!(id = %entry.id.short(), "fallback entry already present, slot freed");
                    }
                    entries.remove(0);
                    self.write(&entries)?;
                    drained += 1;
                }
                Err(err) => {
                    warn!(
                        id = %entry.id.short(),
                        remaining = entries.len(),
                        error = %err,
                        "replay stopped, entries stay queued"
                    );
                    break;
                }
            }
        }
        Ok(drained)
    }

    /// Number of entries waiting for replay
    pub fn pending(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    /// Snapshot of the queued entries
    pub fn entries(&self) -> Result<Vec<FallbackEntry>> {
        self.load()
    }

    /// Read the log, quarantining it when unparsable
    fn load(&self) -> Result<Vec<FallbackEntry>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                let backup = self.quarantine(&err.to_string())?;
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    "fallback log unparsable, quarantined and continuing empty"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Move the damaged log aside rather than deleting it
    fn quarantine(&self, reason: &str) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let backup = PathBuf::from(format!("{}.corrupt-{stamp}", self.path.display()));
        std::fs::rename(&self.path, &backup).map_err(|err| TriageError::CorruptFallbackLog {
            path: self.path.clone(),
            reason: format!("{reason}; backup failed: {err}"),
        })?;
        Ok(backup)
    }

    /// Atomically rewrite the whole log
    fn write(&self, entries: &[FallbackEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(entries)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        fsync_dir(&self.path)?;
        Ok(())
    }
}

/// Make a rename durable by syncing the containing directory
fn fsync_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}
