//! SQLite persistence for role assignments and log-channel bindings.
//!
//! One row per (subject, role) pair. Timestamps are stored as Unix
//! milliseconds. Every mutating call commits before returning; the
//! connection runs with `synchronous=FULL` so a committed row survives a
//! crash.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::expiry;
use crate::ids::{ChannelId, GuildId, RoleId, UserId};

/// A stored role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub guild_id: GuildId,
    pub subject_id: UserId,
    pub role_id: RoleId,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: UserId,
}

pub struct Store {
    db: Mutex<Connection>,
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn map_assignment(row: &rusqlite::Row) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        guild_id: row.get(0)?,
        subject_id: row.get(1)?,
        role_id: row.get(2)?,
        assigned_at: from_millis(row.get(3)?),
        expires_at: row.get::<_, Option<i64>>(4)?.map(from_millis),
        granted_by: row.get(5)?,
    })
}

const ASSIGNMENT_COLUMNS: &str =
    "guild_id, subject_id, role_id, assigned_at, expires_at, granted_by";

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        let store = Self { db: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { db: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let db = self.db.lock();
        db.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS assignments (
                subject_id  INTEGER NOT NULL,
                role_id     INTEGER NOT NULL,
                guild_id    INTEGER NOT NULL,
                assigned_at INTEGER NOT NULL,
                expires_at  INTEGER,
                granted_by  INTEGER NOT NULL,
                PRIMARY KEY (subject_id, role_id)
            );

            CREATE INDEX IF NOT EXISTS idx_assignments_role ON assignments(role_id);
            CREATE INDEX IF NOT EXISTS idx_assignments_expiry
                ON assignments(expires_at) WHERE expires_at IS NOT NULL;

            CREATE TABLE IF NOT EXISTS log_channels (
                guild_id   INTEGER PRIMARY KEY,
                channel_id INTEGER
            );
            ",
        )?;
        Ok(())
    }

    // ── Assignments ────────────────────────────────────────────────────

    pub fn exists(&self, subject: UserId, role: RoleId) -> Result<bool> {
        let db = self.db.lock();
        let found = db
            .query_row(
                "SELECT 1 FROM assignments WHERE subject_id = ?1 AND role_id = ?2",
                params![subject, role],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get(&self, subject: UserId, role: RoleId) -> Result<Option<Assignment>> {
        let db = self.db.lock();
        let row = db
            .query_row(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM assignments
                     WHERE subject_id = ?1 AND role_id = ?2"
                ),
                params![subject, role],
                map_assignment,
            )
            .optional()?;
        Ok(row)
    }

    /// Record a new assignment. Rejects an existing pair without touching it.
    pub fn create(
        &self,
        guild: GuildId,
        subject: UserId,
        role: RoleId,
        duration_days: Option<i64>,
        granted_by: UserId,
        now: DateTime<Utc>,
    ) -> Result<Assignment> {
        let assignment = Assignment {
            guild_id: guild,
            subject_id: subject,
            role_id: role,
            assigned_at: now,
            expires_at: expiry::compute_expiry(now, duration_days),
            granted_by,
        };
        let db = self.db.lock();
        let inserted = db.execute(
            "INSERT INTO assignments (guild_id, subject_id, role_id, assigned_at, expires_at, granted_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(subject_id, role_id) DO NOTHING",
            params![
                guild,
                subject,
                role,
                to_millis(assignment.assigned_at),
                assignment.expires_at.map(to_millis),
                granted_by,
            ],
        )?;
        if inserted == 0 {
            return Err(Error::DuplicateAssignment { subject, role });
        }
        Ok(assignment)
    }

    /// Remove an assignment. Returns whether a row existed.
    pub fn delete(&self, subject: UserId, role: RoleId) -> Result<bool> {
        let db = self.db.lock();
        let n = db.execute(
            "DELETE FROM assignments WHERE subject_id = ?1 AND role_id = ?2",
            params![subject, role],
        )?;
        Ok(n > 0)
    }

    pub fn get_for_subject(&self, subject: UserId) -> Result<Vec<(RoleId, Option<DateTime<Utc>>)>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT role_id, expires_at FROM assignments WHERE subject_id = ?1",
        )?;
        let rows: Vec<(RoleId, Option<DateTime<Utc>>)> = stmt
            .query_map(params![subject], |row| {
                Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.map(from_millis)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_for_role(&self, role: RoleId) -> Result<Vec<(UserId, Option<DateTime<Utc>>)>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT subject_id, expires_at FROM assignments WHERE role_id = ?1",
        )?;
        let rows: Vec<(UserId, Option<DateTime<Utc>>)> = stmt
            .query_map(params![role], |row| {
                Ok((row.get(0)?, row.get::<_, Option<i64>>(1)?.map(from_millis)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every assignment whose expiry is at or before `now`.
    pub fn get_expired(&self, now: DateTime<Utc>) -> Result<Vec<Assignment>> {
        self.query_assignments(
            "expires_at IS NOT NULL AND expires_at <= ?1 ORDER BY expires_at ASC",
            now,
        )
    }

    /// Time-limited assignments still active at `now`, soonest first.
    pub fn get_expiring(&self, now: DateTime<Utc>) -> Result<Vec<Assignment>> {
        self.query_assignments(
            "expires_at IS NOT NULL AND expires_at > ?1 ORDER BY expires_at ASC",
            now,
        )
    }

    fn query_assignments(&self, filter: &str, now: DateTime<Utc>) -> Result<Vec<Assignment>> {
        let db = self.db.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE {filter}"
        ))?;
        let rows = stmt
            .query_map(params![to_millis(now)], map_assignment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Extend an assignment by `extra_days` and return the new expiry.
    pub fn prolong(
        &self,
        subject: UserId,
        role: RoleId,
        extra_days: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let current: Option<Option<i64>> = tx
            .query_row(
                "SELECT expires_at FROM assignments WHERE subject_id = ?1 AND role_id = ?2",
                params![subject, role],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Err(Error::NotFound { subject, role });
        };
        let new_expiry = expiry::prolong(current.map(from_millis), now, extra_days);
        tx.execute(
            "UPDATE assignments SET expires_at = ?1 WHERE subject_id = ?2 AND role_id = ?3",
            params![to_millis(new_expiry), subject, role],
        )?;
        tx.commit()?;
        Ok(new_expiry)
    }

    // ── Log channels ───────────────────────────────────────────────────

    /// Bind (or with `None`, disable) the notification channel for a guild.
    pub fn set_log_channel(&self, guild: GuildId, channel: Option<ChannelId>) -> Result<()> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO log_channels (guild_id, channel_id) VALUES (?1, ?2)
             ON CONFLICT(guild_id) DO UPDATE SET channel_id = excluded.channel_id",
            params![guild, channel],
        )?;
        Ok(())
    }

    pub fn get_log_channel(&self, guild: GuildId) -> Result<Option<ChannelId>> {
        let db = self.db.lock();
        let channel: Option<Option<ChannelId>> = db
            .query_row(
                "SELECT channel_id FROM log_channels WHERE guild_id = ?1",
                params![guild],
                |row| row.get(0),
            )
            .optional()?;
        Ok(channel.flatten())
    }

    // ── Backup ─────────────────────────────────────────────────────────

    /// A consistent copy of the whole database as SQLite file bytes.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "rolekeeper-snapshot-{}-{nanos}.db",
            std::process::id()
        ));
        let target = path.to_string_lossy().into_owned();
        {
            let db = self.db.lock();
            db.execute("VACUUM INTO ?1", params![target])?;
        }
        let bytes = std::fs::read(&path);
        let _ = std::fs::remove_file(&path);
        Ok(bytes?)
    }
}
