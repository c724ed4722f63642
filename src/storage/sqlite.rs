//! SQLite implementation of [`TicketStore`]
//!
//! One connection behind a mutex per process; separate worker processes open
//! their own handles on the same database file. WAL journal mode plus
//! immediate transactions make every lock-state transition a single
//! compare-and-swap visible to all handles, which is the only
//! synchronization primitive the claim protocol relies on.
//!
//! # Schema Versioning
//!
//! A `schema_version` table tracks the installed schema. To change the
//! schema, increment `CURRENT_SCHEMA_VERSION` and add a migration arm in
//! `run_migrations()`; migrations run sequentially from the stored version
//! to the target.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info, warn};

use super::{StoreStats, TicketStore};
use crate::config::Config;
use crate::core::{Checklist, Lease, Priority, Status, Ticket, TicketId};
use crate::error::{Result, TriageError};

/// Current schema version. Increment when the schema changes and add the
/// migration arm in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

const TICKET_COLUMNS: &str = "id, priority, error_type, message, source, stack_trace, status, \
     locked_by, locked_at, lease_expires, completion_summary, duplicate_guard, \
     created_at, updated_at, correlation_id, run_label, checklist";

/// SQLite-backed ticket store
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
    /// How long a completed ticket keeps blocking its duplicate guard
    dedup_retention: Duration,
}

impl SqliteTicketStore {
    /// Open the store described by `config`
    ///
    /// Creates the database file, schema, and parent directory as needed,
    /// and runs pending migrations on an existing database.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` when the file cannot be opened or WAL
    /// mode cannot be enabled (some network filesystems refuse it), and
    /// `Storage` for schema failures.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with(
            &config.store.path,
            config.store.busy_timeout(),
            config.dedup.retention(),
        )
    }

    /// Open a store at `path` with default timeouts and retention
    pub fn open_at(path: &Path) -> Result<Self> {
        let config = Config::default();
        Self::open_with(path, config.store.busy_timeout(), config.dedup.retention())
    }

    fn open_with(path: &Path, busy_timeout: Duration, dedup_retention: Duration) -> Result<Self> {
        let path_str = path.to_string_lossy();
        let is_in_memory = path_str == ":memory:";
        if !is_in_memory {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let conn = Connection::open(path).map_err(|e| TriageError::StorageUnavailable {
            reason: format!("cannot open {}: {e}", path.display()),
        })?;

        // SQLite can silently keep DELETE mode on filesystems without shared
        // memory support, so verify WAL actually took. In-memory databases
        // report "memory", which is fine; they are ephemeral by design.
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(TriageError::StorageUnavailable {
                reason: format!(
                    "WAL journal mode required for claim atomicity, got '{journal_mode}'"
                ),
            });
        }

        conn.execute_batch(&format!(
            "PRAGMA synchronous = FULL;\n\
             PRAGMA busy_timeout = {};\n\
             PRAGMA foreign_keys = ON;",
            busy_timeout.as_millis()
        ))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );",
        )?;
        let current_version: i64 = conn
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |r| {
                r.get(0)
            })
            .optional()?
            .unwrap_or(0);
        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Mutex::new(conn),
            dedup_retention,
        })
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<()> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(TriageError::custom(format!(
                "database schema version {from_version} is newer than supported {CURRENT_SCHEMA_VERSION}"
            )));
        }
        for version in from_version..CURRENT_SCHEMA_VERSION {
            match version {
                0 => {
                    conn.execute_batch(
                        "CREATE TABLE tickets (
                            id TEXT PRIMARY KEY,
                            priority TEXT NOT NULL,
                            error_type TEXT NOT NULL,
                            message TEXT NOT NULL,
                            source TEXT NOT NULL,
                            stack_trace TEXT,
                            status TEXT NOT NULL DEFAULT 'Open',
                            locked_by TEXT,
                            locked_at INTEGER,
                            lease_expires INTEGER,
                            completion_summary TEXT,
                            duplicate_guard TEXT NOT NULL,
                            created_at INTEGER NOT NULL,
                            updated_at INTEGER NOT NULL,
                            completed_at INTEGER,
                            correlation_id TEXT,
                            run_label TEXT,
                            checklist TEXT NOT NULL DEFAULT '{}'
                        );
                        CREATE INDEX idx_tickets_guard ON tickets (duplicate_guard);
                        CREATE INDEX idx_tickets_claim ON tickets (status, priority, created_at);",
                    )?;
                }
                v => {
                    return Err(TriageError::custom(format!("no migration from version {v}")));
                }
            }
            conn.execute(
                "INSERT INTO schema_version (id, version) VALUES (1, ?1)
                 ON CONFLICT (id) DO UPDATE SET version = ?1",
                params![version + 1],
            )?;
            info!(version = version + 1, "migrated ticket store schema");
        }
        Ok(())
    }

    fn lease_ms(lease: Duration) -> i64 {
        i64::try_from(lease.as_millis()).unwrap_or(i64::MAX)
    }

    fn retention_cutoff_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(Self::lease_ms(self.dedup_retention))
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn parse_col<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = TriageError>,
{
    value.parse().map_err(|e: TriageError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn read_ticket(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ticket> {
    let id: String = row.get(0)?;
    let priority: String = row.get(1)?;
    let status: String = row.get(6)?;
    let checklist: String = row.get(16)?;
    Ok(Ticket {
        id: parse_col::<TicketId>(0, &id)?,
        priority: parse_col::<Priority>(1, &priority)?,
        error_type: row.get(2)?,
        message: row.get(3)?,
        source: row.get(4)?,
        stack_trace: row.get(5)?,
        status: parse_col::<Status>(6, &status)?,
        locked_by: row.get(7)?,
        locked_at: row.get::<_, Option<i64>>(8)?.map(from_ms),
        lease_expires: row.get::<_, Option<i64>>(9)?.map(from_ms),
        completion_summary: row.get(10)?,
        duplicate_guard: row.get(11)?,
        created_at: from_ms(row.get(12)?),
        updated_at: from_ms(row.get(13)?),
        correlation_id: row.get(14)?,
        run_label: row.get(15)?,
        checklist: serde_json::from_str(&checklist).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(16, rusqlite::types::Type::Text, Box::new(e))
        })?,
    })
}

impl TicketStore for SqliteTicketStore {
    fn create(&self, ticket: &Ticket) -> Result<bool> {
        let now = now_ms();
        let cutoff = self.retention_cutoff_ms(now);
        let checklist = serde_json::to_string(&ticket.checklist)?;
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Guard uniqueness is enforced here, at insert time: the insert only
        // fires when no active ticket (Open, or completed within the
        // retention window) holds the same guard.
        let changed = tx.execute(
            "INSERT INTO tickets (id, priority, error_type, message, source, stack_trace,
                                  status, completion_summary, duplicate_guard,
                                  created_at, updated_at, correlation_id, run_label, checklist)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, 'Open', NULL, ?7, ?8, ?8, ?9, ?10, ?11
             WHERE NOT EXISTS (
                 SELECT 1 FROM tickets
                 WHERE duplicate_guard = ?7
                   AND (status = 'Open'
                        OR (completed_at IS NOT NULL AND completed_at > ?12))
             )",
            params![
                ticket.id.as_str(),
                ticket.priority.as_str(),
                ticket.error_type,
                ticket.message,
                ticket.source,
                ticket.stack_trace,
                ticket.duplicate_guard,
                ticket.created_at.timestamp_millis(),
                ticket.correlation_id,
                ticket.run_label,
                checklist,
                cutoff,
            ],
        )?;
        tx.commit()?;

        if changed == 1 {
            debug!(id = %ticket.id, guard = %ticket.duplicate_guard, "ticket inserted");
            Ok(true)
        } else {
            debug!(guard = %ticket.duplicate_guard, "duplicate guard active, insert skipped");
            Ok(false)
        }
    }

    fn get(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let ticket = conn
            .query_row(
                &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
                params![id.as_str()],
                read_ticket,
            )
            .optional()?;
        Ok(ticket)
    }

    fn acquire_lock(&self, id: &TicketId, holder: &str, lease: Duration) -> Result<Option<Lease>> {
        let now = now_ms();
        let expires = now.saturating_add(Self::lease_ms(lease));
        let conn = self.conn.lock().expect("store mutex poisoned");
        let result = conn.execute(
            "UPDATE tickets
             SET locked_by = ?2, locked_at = ?3, lease_expires = ?4, updated_at = ?3
             WHERE id = ?1 AND status = 'Open'
               AND (locked_by IS NULL OR lease_expires IS NULL OR lease_expires <= ?3)",
            params![id.as_str(), holder, now, expires],
        );
        let changed = match result {
            Ok(n) => n,
            Err(e) => {
                let err = TriageError::from(e);
                if err.is_storage_unavailable() {
                    debug!(id = %id, %holder, "lock acquire hit storage contention, treating as claim failure");
                    return Ok(None);
                }
                return Err(err);
            }
        };
        if changed == 1 {
            debug!(id = %id.short(), %holder, "lease acquired");
            Ok(Some(Lease {
                ticket_id: id.clone(),
                holder: holder.to_string(),
                granted_at: from_ms(now),
                expires_at: from_ms(expires),
            }))
        } else {
            Ok(None)
        }
    }

    fn renew_lock(&self, id: &TicketId, holder: &str, lease: Duration) -> Result<Option<Lease>> {
        let now = now_ms();
        let expires = now.saturating_add(Self::lease_ms(lease));
        let conn = self.conn.lock().expect("store mutex poisoned");
        // An expired lease cannot be renewed; the holder must re-claim.
        let changed = conn.execute(
            "UPDATE tickets
             SET lease_expires = ?4, updated_at = ?3
             WHERE id = ?1 AND status = 'Open' AND locked_by = ?2 AND lease_expires > ?3",
            params![id.as_str(), holder, now, expires],
        )?;
        if changed == 1 {
            debug!(id = %id.short(), %holder, "lease renewed");
            Ok(Some(Lease {
                ticket_id: id.clone(),
                holder: holder.to_string(),
                granted_at: from_ms(now),
                expires_at: from_ms(expires),
            }))
        } else {
            Ok(None)
        }
    }

    fn release_lock(&self, id: &TicketId, holder: &str) -> Result<bool> {
        let now = now_ms();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "UPDATE tickets
             SET locked_by = NULL, locked_at = NULL, lease_expires = NULL, updated_at = ?3
             WHERE id = ?1 AND status = 'Open' AND locked_by = ?2",
            params![id.as_str(), holder, now],
        )?;
        if changed == 1 {
            debug!(id = %id.short(), %holder, "lease released");
        }
        Ok(changed == 1)
    }

    fn claim_next(
        &self,
        holder: &str,
        priority: Option<Priority>,
        lease: Duration,
    ) -> Result<Option<Ticket>> {
        let now = now_ms();
        let expires = now.saturating_add(Self::lease_ms(lease));
        let mut conn = self.conn.lock().expect("store mutex poisoned");

        // The immediate transaction makes candidate selection and the
        // conditioned lock one indivisible step; without it two workers could
        // select the same row before either locks it. BEGIN IMMEDIATE can
        // itself report busy under cross-process contention, which is a
        // claim failure for the caller to retry, never a crash.
        let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(tx) => tx,
            Err(e) => {
                let err = TriageError::from(e);
                if err.is_storage_unavailable() {
                    debug!(%holder, "claim hit storage contention, treating as empty");
                    return Ok(None);
                }
                return Err(err);
            }
        };

        let filter = priority.map(Priority::as_str);
        let candidate: Option<String> = tx
            .query_row(
                // 'P0' < 'P1' < ... sorts tiers correctly as text.
                "SELECT id FROM tickets
                 WHERE status = 'Open'
                   AND (locked_by IS NULL OR lease_expires IS NULL OR lease_expires <= ?1)
                   AND (?2 IS NULL OR priority = ?2)
                 ORDER BY priority ASC, created_at ASC
                 LIMIT 1",
                params![now, filter],
                |row| row.get(0),
            )
            .optional()?;
        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE tickets
             SET locked_by = ?2, locked_at = ?3, lease_expires = ?4, updated_at = ?3
             WHERE id = ?1 AND status = 'Open'
               AND (locked_by IS NULL OR lease_expires IS NULL OR lease_expires <= ?3)",
            params![candidate, holder, now, expires],
        )?;
        if changed != 1 {
            return Ok(None);
        }

        let ticket = tx.query_row(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
            params![candidate],
            read_ticket,
        )?;
        tx.commit()?;

        debug!(id = %ticket.id.short(), %holder, priority = %ticket.priority, "ticket claimed");
        Ok(Some(ticket))
    }

    fn mark_complete(
        &self,
        id: &TicketId,
        holder: &str,
        summary: &str,
        checklist: Checklist,
    ) -> Result<bool> {
        let now = now_ms();
        let checklist_json = serde_json::to_string(&checklist)?;
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM tickets WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = current else {
            warn!(id = %id, "mark_complete on unknown ticket");
            return Ok(false);
        };
        if status == Status::Completed.as_str() {
            // First-write-wins: completion evidence is immutable, so a repeat
            // call succeeds without touching the stored summary.
            info!(id = %id.short(), "ticket already completed");
            return Ok(true);
        }

        let changed = tx.execute(
            "UPDATE tickets
             SET status = 'Completed', completion_summary = ?2, completed_at = ?3,
                 updated_at = ?3, locked_by = NULL, locked_at = NULL, lease_expires = NULL,
                 checklist = ?4
             WHERE id = ?1 AND status = 'Open'
               AND (locked_by IS NULL OR locked_by = ?5)",
            params![id.as_str(), summary, now, checklist_json, holder],
        )?;
        tx.commit()?;

        if changed == 1 {
            info!(id = %id.short(), %holder, "ticket completed");
            Ok(true)
        } else {
            // The lease was reclaimed and another worker holds the row now.
            warn!(id = %id.short(), %holder, "completion refused, holder no longer owns the lease");
            Ok(false)
        }
    }

    fn reclaim_expired(&self) -> Result<usize> {
        let now = now_ms();
        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(
            "UPDATE tickets
             SET locked_by = NULL, locked_at = NULL, lease_expires = NULL, updated_at = ?1
             WHERE status = 'Open' AND locked_by IS NOT NULL
               AND lease_expires IS NOT NULL AND lease_expires <= ?1",
            params![now],
        )?;
        if changed > 0 {
            info!(count = changed, "reclaimed expired leases");
        }
        Ok(changed)
    }

    fn stats(&self) -> Result<StoreStats> {
        let now = now_ms();
        let conn = self.conn.lock().expect("store mutex poisoned");

        let (total, open, completed, in_progress, claimable) = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'Open'),
                    COUNT(*) FILTER (WHERE status = 'Completed'),
                    COUNT(*) FILTER (WHERE status = 'Open' AND locked_by IS NOT NULL
                                       AND lease_expires IS NOT NULL AND lease_expires > ?1),
                    COUNT(*) FILTER (WHERE status = 'Open'
                                       AND (locked_by IS NULL OR lease_expires IS NULL
                                            OR lease_expires <= ?1))
             FROM tickets",
            params![now],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;
        let as_usize = |n: i64| usize::try_from(n).unwrap_or(0);
        let (total, open, completed, in_progress, claimable) = (
            as_usize(total),
            as_usize(open),
            as_usize(completed),
            as_usize(in_progress),
            as_usize(claimable),
        );

        let mut open_by_priority = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT priority, COUNT(*) FROM tickets WHERE status = 'Open' GROUP BY priority",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (priority, n) = row?;
            open_by_priority.insert(priority.parse::<Priority>()?, usize::try_from(n).unwrap_or(0));
        }

        Ok(StoreStats {
            total,
            open,
            completed,
            in_progress,
            claimable,
            open_by_priority,
        })
    }

    fn find(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map([], read_ticket)?;
        let mut tickets = Vec::new();
        for row in rows {
            let ticket = row?;
            if predicate(&ticket) {
                tickets.push(ticket);
            }
        }
        Ok(tickets)
    }

    fn count(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<usize> {
        Ok(self.find(predicate)?.len())
    }
}
