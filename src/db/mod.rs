//! # Record Store - Data Persistence Layer
//!
//! This module owns the replicated record tables (bulletins, mail, channel
//! directory) plus the append-only message log used by the stats flows. It is
//! pure CRUD with identifier generation and has no network awareness; the
//! replication layer in [`crate::sync`] sits on top of it.
//!
//! ## Identity model
//!
//! Every bulletin and mail record carries two identifiers:
//!
//! - `id` - the store-local autoincrement rowid. Used for menu selection only
//!   and never sent to other nodes.
//! - `unique_id` - a UUID assigned exactly once at first local creation. This
//!   is the only stable cross-node handle; replica applies pass it through
//!   verbatim and never mint a new one.
//!
//! Creates with an already-present `unique_id` are treated as duplicate
//! replica applies and return the existing record, which makes replication
//! idempotent at the store boundary. Deletes of an absent `unique_id` are
//! silent no-ops so sync messages may arrive in any order.
//!
//! ## Concurrency
//!
//! A single `Mutex<Connection>` serializes all writers; SQLite runs in WAL
//! mode. Each operation is one statement, so there are no multi-record
//! transactions to coordinate.

mod analytics;

pub use analytics::{HourlySnr, MessageStats, NodeReliability};

use chrono::Utc;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// The fixed bulletin board set. Board matching is case-insensitive.
pub const BOARDS: [&str; 4] = ["General", "Info", "News", "Urgent"];

/// Resolve user input to a canonical board name. Accepts the full name
/// (any case), the bracketed menu letter, or the numeric board index.
pub fn resolve_board(input: &str) -> Option<&'static str> {
    let t = input.trim();
    if let Ok(idx) = t.parse::<usize>() {
        return BOARDS.get(idx).copied();
    }
    let lower = t.to_lowercase();
    for board in BOARDS {
        if board.to_lowercase() == lower {
            return Some(board);
        }
    }
    match lower.as_str() {
        "g" => Some("General"),
        "i" => Some("Info"),
        "n" => Some("News"),
        "u" => Some("Urgent"),
        _ => None,
    }
}

/// Record dates use a compact minute-resolution format to fit small frames.
pub fn now_date() -> String {
    Utc::now().format("%Y-%m-%d %H:%M").to_string()
}

/// Errors that can arise at the record store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around SQLite errors.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when the requester is not allowed to touch the record.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Connection mutex poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bulletin {
    pub id: i64,
    pub board: String,
    pub sender_short_name: String,
    pub date: String,
    pub subject: String,
    pub content: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailRecord {
    pub id: i64,
    pub sender: String,
    pub sender_short_name: String,
    pub recipient: String,
    pub date: String,
    pub subject: String,
    pub content: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEntry {
    pub id: i64,
    pub name: String,
    pub url: String,
}

/// One row for the append-only message log (read by the stats flows).
#[derive(Debug, Clone, Default)]
pub struct LogEntry {
    pub timestamp: i64,
    pub sender_id: String,
    pub sender_short_name: String,
    pub to_id: String,
    pub channel_index: i64,
    pub message: String,
    pub snr: Option<f64>,
    pub rssi: Option<i64>,
    pub hop_limit: Option<i64>,
}

/// Main storage interface
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and initialize) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::initialize(&conn)?;
        info!("Record store opened at {}", path.as_ref().display());
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and the status command.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    fn initialize(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS bulletins (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                board             TEXT NOT NULL,
                sender_short_name TEXT NOT NULL,
                date              TEXT NOT NULL,
                subject           TEXT NOT NULL,
                content           TEXT NOT NULL,
                unique_id         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bulletins_board
                ON bulletins(board);
            CREATE INDEX IF NOT EXISTS idx_bulletins_unique_id
                ON bulletins(unique_id);

            CREATE TABLE IF NOT EXISTS mail (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                sender            TEXT NOT NULL,
                sender_short_name TEXT NOT NULL,
                recipient         TEXT NOT NULL,
                date              TEXT NOT NULL,
                subject           TEXT NOT NULL,
                content           TEXT NOT NULL,
                unique_id         TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_mail_recipient
                ON mail(recipient);
            CREATE INDEX IF NOT EXISTS idx_mail_unique_id
                ON mail(unique_id);

            CREATE TABLE IF NOT EXISTS channels (
                id   INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                url  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS message_logs (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp         INTEGER NOT NULL,
                sender_id         TEXT NOT NULL,
                sender_short_name TEXT NOT NULL,
                to_id             TEXT NOT NULL,
                channel_index     INTEGER,
                message           TEXT NOT NULL,
                snr               REAL,
                rssi              INTEGER,
                hop_limit         INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_message_logs_timestamp
                ON message_logs(timestamp);
            ",
        )?;
        Ok(())
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    // -- Bulletins --

    /// Create a bulletin. When `unique_id` is supplied (replica apply) it is
    /// stored verbatim; a duplicate apply returns the existing record instead
    /// of inserting a second copy. When absent (local origin) a fresh UUID is
    /// minted. Likewise `date` defaults to now for local-origin creates.
    pub fn create_bulletin(
        &self,
        board: &str,
        sender_short_name: &str,
        subject: &str,
        content: &str,
        unique_id: Option<&str>,
        date: Option<&str>,
    ) -> Result<Bulletin, StoreError> {
        self.with_conn(|conn| {
            if let Some(uid) = unique_id {
                if let Some(existing) = query_bulletin_by_uid(conn, uid)? {
                    return Ok(existing);
                }
            }
            let uid = unique_id
                .map(|s| s.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let date = date.map(|s| s.to_string()).unwrap_or_else(now_date);
            conn.execute(
                "INSERT INTO bulletins (board, sender_short_name, date, subject, content, unique_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![board, sender_short_name, date, subject, content, uid],
            )?;
            let id = conn.last_insert_rowid();
            Ok(Bulletin {
                id,
                board: board.to_string(),
                sender_short_name: sender_short_name.to_string(),
                date,
                subject: subject.to_string(),
                content: content.to_string(),
                unique_id: uid,
            })
        })
    }

    /// All bulletins on a board, in insertion order. Board matching is
    /// case-insensitive.
    pub fn bulletins(&self, board: &str) -> Result<Vec<Bulletin>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, board, sender_short_name, date, subject, content, unique_id
                 FROM bulletins WHERE board = ?1 COLLATE NOCASE ORDER BY id",
            )?;
            let rows = stmt.query_map(params![board], bulletin_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn bulletin(&self, local_id: i64) -> Result<Bulletin, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, board, sender_short_name, date, subject, content, unique_id
                 FROM bulletins WHERE id = ?1",
                params![local_id],
                bulletin_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("bulletin {}", local_id)))
        })
    }

    /// Delete a bulletin by local id, returning the removed record so the
    /// caller can fan out the delete by `unique_id`.
    pub fn delete_bulletin(&self, local_id: i64) -> Result<Bulletin, StoreError> {
        self.with_conn(|conn| {
            let record = conn
                .query_row(
                    "SELECT id, board, sender_short_name, date, subject, content, unique_id
                     FROM bulletins WHERE id = ?1",
                    params![local_id],
                    bulletin_from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("bulletin {}", local_id)))?;
            conn.execute("DELETE FROM bulletins WHERE id = ?1", params![local_id])?;
            Ok(record)
        })
    }

    /// Replica-apply path: delete by unique id. Absent ids are a no-op, not an
    /// error, since a delete may outrun its create on the mesh.
    pub fn delete_bulletin_by_uid(&self, unique_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM bulletins WHERE unique_id = ?1",
                params![unique_id],
            )?;
            Ok(n > 0)
        })
    }

    // -- Mail --

    /// Create a mail record; `unique_id`/`date` semantics match
    /// [`Store::create_bulletin`].
    #[allow(clippy::too_many_arguments)]
    pub fn create_mail(
        &self,
        sender: &str,
        sender_short_name: &str,
        recipient: &str,
        subject: &str,
        content: &str,
        unique_id: Option<&str>,
        date: Option<&str>,
    ) -> Result<MailRecord, StoreError> {
        self.with_conn(|conn| {
            if let Some(uid) = unique_id {
                if let Some(existing) = query_mail_by_uid(conn, uid)? {
                    return Ok(existing);
                }
            }
            let uid = unique_id
                .map(|s| s.to_string())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let date = date.map(|s| s.to_string()).unwrap_or_else(now_date);
            conn.execute(
                "INSERT INTO mail (sender, sender_short_name, recipient, date, subject, content, unique_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![sender, sender_short_name, recipient, date, subject, content, uid],
            )?;
            let id = conn.last_insert_rowid();
            Ok(MailRecord {
                id,
                sender: sender.to_string(),
                sender_short_name: sender_short_name.to_string(),
                recipient: recipient.to_string(),
                date,
                subject: subject.to_string(),
                content: content.to_string(),
                unique_id: uid,
            })
        })
    }

    /// The recipient's inbox, in insertion order.
    pub fn mail_for(&self, recipient: &str) -> Result<Vec<MailRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, sender_short_name, recipient, date, subject, content, unique_id
                 FROM mail WHERE recipient = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![recipient], mail_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Fetch one mail item. The recipient filter is part of the query itself:
    /// asking for someone else's mail is indistinguishable from it not
    /// existing.
    pub fn mail_item(&self, local_id: i64, recipient: &str) -> Result<MailRecord, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, sender, sender_short_name, recipient, date, subject, content, unique_id
                 FROM mail WHERE id = ?1 AND recipient = ?2",
                params![local_id, recipient],
                mail_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("mail {}", local_id)))
        })
    }

    /// Delete a mail record on behalf of `requester`. Fails with
    /// [`StoreError::NotFound`] when no record carries `unique_id`, and with
    /// [`StoreError::PermissionDenied`] when the requester is not the stored
    /// recipient.
    pub fn delete_mail(&self, unique_id: &str, requester: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let recipient: Option<String> = conn
                .query_row(
                    "SELECT recipient FROM mail WHERE unique_id = ?1",
                    params![unique_id],
                    |row| row.get(0),
                )
                .optional()?;
            let recipient =
                recipient.ok_or_else(|| StoreError::NotFound(format!("mail {}", unique_id)))?;
            if recipient != requester {
                return Err(StoreError::PermissionDenied(format!(
                    "mail {} belongs to {}",
                    unique_id, recipient
                )));
            }
            conn.execute("DELETE FROM mail WHERE unique_id = ?1", params![unique_id])?;
            Ok(())
        })
    }

    /// Replica-apply path: the origin node already enforced the recipient
    /// check, so peers delete unconditionally. Absent ids are a no-op.
    pub fn delete_mail_by_uid(&self, unique_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM mail WHERE unique_id = ?1", params![unique_id])?;
            Ok(n > 0)
        })
    }

    /// Sender node id of a mail item, used to address replies.
    pub fn mail_sender(&self, local_id: i64) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT sender FROM mail WHERE id = ?1",
                    params![local_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    // -- Channel directory --

    /// Append a channel entry. Duplicates by name are permitted; the directory
    /// has no delete path.
    pub fn add_channel(&self, name: &str, url: &str) -> Result<ChannelEntry, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (name, url) VALUES (?1, ?2)",
                params![name, url],
            )?;
            Ok(ChannelEntry {
                id: conn.last_insert_rowid(),
                name: name.to_string(),
                url: url.to_string(),
            })
        })
    }

    pub fn channels(&self) -> Result<Vec<ChannelEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name, url FROM channels ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(ChannelEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    // -- Message log --

    /// Append one row to the message log. Write-only from the BBS core's
    /// perspective; the stats flows read the aggregate queries defined
    /// alongside it.
    pub fn log_message(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_logs
                 (timestamp, sender_id, sender_short_name, to_id, channel_index, message, snr, rssi, hop_limit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.timestamp,
                    entry.sender_id,
                    entry.sender_short_name,
                    entry.to_id,
                    entry.channel_index,
                    entry.message,
                    entry.snr,
                    entry.rssi,
                    entry.hop_limit,
                ],
            )?;
            Ok(())
        })
    }

    // -- Counters for the status command --

    pub fn bulletin_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM bulletins", [], |row| row.get(0))?)
        })
    }

    pub fn mail_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM mail", [], |row| row.get(0))?)
        })
    }

    pub fn channel_count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM channels", [], |row| row.get(0))?)
        })
    }
}

fn bulletin_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bulletin> {
    Ok(Bulletin {
        id: row.get(0)?,
        board: row.get(1)?,
        sender_short_name: row.get(2)?,
        date: row.get(3)?,
        subject: row.get(4)?,
        content: row.get(5)?,
        unique_id: row.get(6)?,
    })
}

fn mail_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MailRecord> {
    Ok(MailRecord {
        id: row.get(0)?,
        sender: row.get(1)?,
        sender_short_name: row.get(2)?,
        recipient: row.get(3)?,
        date: row.get(4)?,
        subject: row.get(5)?,
        content: row.get(6)?,
        unique_id: row.get(7)?,
    })
}

fn query_bulletin_by_uid(
    conn: &Connection,
    unique_id: &str,
) -> Result<Option<Bulletin>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, board, sender_short_name, date, subject, content, unique_id
             FROM bulletins WHERE unique_id = ?1",
            params![unique_id],
            bulletin_from_row,
        )
        .optional()?)
}

fn query_mail_by_uid(conn: &Connection, unique_id: &str) -> Result<Option<MailRecord>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, sender, sender_short_name, recipient, date, subject, content, unique_id
             FROM mail WHERE unique_id = ?1",
            params![unique_id],
            mail_from_row,
        )
        .optional()?)
}
