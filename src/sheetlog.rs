//! Activity log writers: an idempotent daily-activity upsert and an
//! append-only per-session turn log.
//!
//! The store mirrors the spreadsheet it stands in for: the daily log is one
//! fixed partition with a `LogId` dedupe column, the session log is one
//! partition per sanitized session id. Partitions and their schema are
//! created on demand before any data write.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

/// Daily-log columns, in sheet order:
/// DateUTC, User, Ups, Calls, FollowUps, Appointments, LogId.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLogEntry {
    pub user: String,
    pub ups: String,
    pub calls: String,
    pub followups: String,
    pub appointments: String,
}

/// Whether an upsert landed as a fresh row or overwrote the day's existing
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertMode {
    Append,
    Update,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyLogOutcome {
    pub mode: UpsertMode,
    pub log_id: String,
}

/// Session-log columns, in sheet order: TimestampUTC, UserName, SessionId,
/// Scenario, Step, TargetPayment, OfferPayment, Band, Message.
#[derive(Debug, Clone, Serialize)]
pub struct SessionLogRow {
    pub session_id: String,
    pub user_name: String,
    pub scenario: String,
    pub step: u32,
    pub target_payment: Option<i64>,
    pub offer_payment: Option<i64>,
    pub band: String,
    pub message: String,
}

/// A stored daily-log row, read back for diagnostics and tests.
#[derive(Debug, Clone, Serialize)]
pub struct StoredDailyRow {
    pub date_utc: String,
    pub user: String,
    pub ups: String,
    pub calls: String,
    pub followups: String,
    pub appointments: String,
    pub log_id: String,
}

/// Seam for the external log store. The orchestrator treats both writes as
/// blocking calls and never surfaces their failures to the end user.
pub trait ActivityLog: Send + Sync {
    /// Upsert keyed by `lowercase(user)|YYYY-MM-DD`: at most one row per
    /// user per day, latest submission wins.
    fn daily_log_upsert(&self, entry: &DailyLogEntry) -> Result<DailyLogOutcome>;

    /// Append one turn to the session's partition. Returns the partition
    /// name actually written to.
    fn session_log_append(&self, row: &SessionLogRow) -> Result<String>;
}

/// Replace path-hostile characters, cap the length, and never return an
/// empty partition name.
pub fn sanitize_partition(session_id: &str) -> String {
    let trimmed = session_id.trim();
    let replaced: String = trimmed
        .chars()
        .map(|c| match c {
            ':' | '\\' | '/' | '?' | '*' | '[' | ']' | '"' => '-',
            other => other,
        })
        .collect();
    let capped: String = replaced.chars().take(99).collect();
    if capped.is_empty() {
        "session".to_string()
    } else {
        capped
    }
}

/// rusqlite-backed activity log.
pub struct SqliteActivityLog {
    conn: Mutex<Connection>,
}

impl SqliteActivityLog {
    /// Create or open the store.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let log = Self {
            conn: Mutex::new(conn),
        };
        log.ensure_daily_partition()?;
        Ok(log)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Log store lock poisoned: {}", e))
    }

    fn ensure_daily_partition(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS daily_log (
                date_utc TEXT NOT NULL,
                user TEXT NOT NULL,
                ups TEXT NOT NULL,
                calls TEXT NOT NULL,
                follow_ups TEXT NOT NULL,
                appointments TEXT NOT NULL,
                log_id TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn ensure_session_partition(conn: &Connection, partition: &str) -> Result<()> {
        // Partition name is sanitized but still dynamic, so it is quoted as
        // an identifier rather than bound as a parameter.
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    timestamp_utc TEXT NOT NULL,
                    user_name TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    scenario TEXT NOT NULL,
                    step INTEGER NOT NULL,
                    target_payment INTEGER,
                    offer_payment INTEGER,
                    band TEXT NOT NULL,
                    message TEXT NOT NULL
                )",
                partition
            ),
            [],
        )?;
        Ok(())
    }

    /// All stored daily rows, in insertion order.
    pub fn daily_log_rows(&self) -> Result<Vec<StoredDailyRow>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT date_utc, user, ups, calls, follow_ups, appointments, log_id
             FROM daily_log ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredDailyRow {
                    date_utc: row.get(0)?,
                    user: row.get(1)?,
                    ups: row.get(2)?,
                    calls: row.get(3)?,
                    followups: row.get(4)?,
                    appointments: row.get(5)?,
                    log_id: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of rows in a session partition; 0 if the partition was never
    /// created.
    pub fn session_log_len(&self, session_id: &str) -> Result<usize> {
        let partition = sanitize_partition(session_id);
        let conn = self.lock_conn()?;
        let count: std::result::Result<i64, _> = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", partition),
            [],
            |row| row.get(0),
        );
        match count {
            Ok(n) => Ok(n as usize),
            // Missing partition means nothing was ever logged.
            Err(rusqlite::Error::SqliteFailure(..)) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl ActivityLog for SqliteActivityLog {
    fn daily_log_upsert(&self, entry: &DailyLogEntry) -> Result<DailyLogOutcome> {
        let now_utc = Utc::now();
        let timestamp = now_utc.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        let log_id = format!("{}|{}", entry.user, now_utc.format("%Y-%m-%d")).to_lowercase();

        let conn = self.lock_conn()?;

        // Scan-then-write, not an atomic upsert: two sessions logging the
        // same user on the same day can race. Accepted contract boundary,
        // callers serialize per session only.
        let mut stmt = conn.prepare("SELECT rowid, log_id FROM daily_log")?;
        let existing = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let found = existing
            .iter()
            .find(|(_, stored)| stored.trim().eq_ignore_ascii_case(&log_id))
            .map(|(rowid, _)| *rowid);

        if let Some(rowid) = found {
            conn.execute(
                "UPDATE daily_log
                 SET date_utc = ?1, user = ?2, ups = ?3, calls = ?4,
                     follow_ups = ?5, appointments = ?6, log_id = ?7
                 WHERE rowid = ?8",
                params![
                    timestamp,
                    entry.user,
                    entry.ups,
                    entry.calls,
                    entry.followups,
                    entry.appointments,
                    log_id,
                    rowid
                ],
            )?;
            tracing::info!("Daily log updated in place for {}", log_id);
            Ok(DailyLogOutcome {
                mode: UpsertMode::Update,
                log_id,
            })
        } else {
            conn.execute(
                "INSERT INTO daily_log
                 (date_utc, user, ups, calls, follow_ups, appointments, log_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    timestamp,
                    entry.user,
                    entry.ups,
                    entry.calls,
                    entry.followups,
                    entry.appointments,
                    log_id
                ],
            )?;
            tracing::info!("Daily log appended for {}", log_id);
            Ok(DailyLogOutcome {
                mode: UpsertMode::Append,
                log_id,
            })
        }
    }

    fn session_log_append(&self, row: &SessionLogRow) -> Result<String> {
        let partition = sanitize_partition(&row.session_id);
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();

        let conn = self.lock_conn()?;
        Self::ensure_session_partition(&conn, &partition)?;
        conn.execute(
            &format!(
                "INSERT INTO \"{}\"
                 (timestamp_utc, user_name, session_id, scenario, step,
                  target_payment, offer_payment, band, message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                partition
            ),
            params![
                timestamp,
                row.user_name,
                row.session_id,
                row.scenario,
                row.step,
                row.target_payment,
                row.offer_payment,
                row.band,
                row.message
            ],
        )?;
        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_log(dir: &tempfile::TempDir) -> SqliteActivityLog {
        SqliteActivityLog::new(dir.path().join("activity.db")).unwrap()
    }

    fn entry(user: &str, ups: &str) -> DailyLogEntry {
        DailyLogEntry {
            user: user.to_string(),
            ups: ups.to_string(),
            calls: "10".to_string(),
            followups: "3".to_string(),
            appointments: "1".to_string(),
        }
    }

    fn turn(session_id: &str, message: &str) -> SessionLogRow {
        SessionLogRow {
            session_id: session_id.to_string(),
            user_name: "Sam".to_string(),
            scenario: "price".to_string(),
            step: 2,
            target_payment: Some(450),
            offer_payment: Some(480),
            band: "B".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn same_day_resubmission_updates_not_duplicates() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        let first = log.daily_log_upsert(&entry("Sam", "4")).unwrap();
        assert_eq!(first.mode, UpsertMode::Append);

        let second = log.daily_log_upsert(&entry("Sam", "7")).unwrap();
        assert_eq!(second.mode, UpsertMode::Update);
        assert_eq!(second.log_id, first.log_id);

        let rows = log.daily_log_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ups, "7");
    }

    #[test]
    fn log_id_match_is_case_insensitive() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        log.daily_log_upsert(&entry("Sam", "4")).unwrap();
        let second = log.daily_log_upsert(&entry("SAM", "9")).unwrap();
        assert_eq!(second.mode, UpsertMode::Update);
        assert_eq!(log.daily_log_rows().unwrap().len(), 1);
    }

    #[test]
    fn different_users_get_separate_rows() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        log.daily_log_upsert(&entry("Sam", "4")).unwrap();
        log.daily_log_upsert(&entry("Alex", "2")).unwrap();
        assert_eq!(log.daily_log_rows().unwrap().len(), 2);
    }

    #[test]
    fn session_append_accumulates_rows() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        log.session_log_append(&turn("sess-abc", "first")).unwrap();
        log.session_log_append(&turn("sess-abc", "second")).unwrap();
        assert_eq!(log.session_log_len("sess-abc").unwrap(), 2);
        assert_eq!(log.session_log_len("sess-other").unwrap(), 0);
    }

    #[test]
    fn hostile_session_ids_share_a_sanitized_partition() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        let partition = log
            .session_log_append(&turn("a/b:c?d", "hello"))
            .unwrap();
        assert_eq!(partition, "a-b-c-d");
        assert_eq!(log.session_log_len("a/b:c?d").unwrap(), 1);
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_partition("sess-1"), "sess-1");
        assert_eq!(sanitize_partition(r#"a\b[c]"d""#), "a-b-c--d-");
        assert_eq!(sanitize_partition(""), "session");
        assert_eq!(sanitize_partition("   "), "session");
        let long = "x".repeat(150);
        assert_eq!(sanitize_partition(&long).len(), 99);
    }
}
