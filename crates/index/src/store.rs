// Persistent index backing using SQLite

use std::path::Path;

use matchbook_core::Record;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::IndexError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    slot INTEGER PRIMARY KEY,      -- stable in-memory slot
    identity TEXT NOT NULL UNIQUE,
    body TEXT NOT NULL             -- serde_json encoded record
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Record journal for a persistent index.
///
/// The index stages every write here and flushes the batch in one
/// transaction at commit. Only records are stored; token buckets and
/// blocking keys are derived from them when the index is reopened.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    pending: Vec<(u32, String, String)>,
}

impl SqliteStore {
    /// Opens or creates the store at `path`. `kind` guards against opening a
    /// token index file as a blocking index and vice versa.
    pub fn open(path: &Path, kind: &'static str) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let found: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'kind'", [], |row| row.get(0))
            .optional()?;
        match found {
            Some(found) if found != kind => {
                return Err(IndexError::KindMismatch { expected: kind, found });
            }
            Some(_) => {}
            None => {
                conn.execute("INSERT INTO meta (key, value) VALUES ('kind', ?1)", params![kind])?;
            }
        }

        Ok(Self { conn: Mutex::new(conn), pending: Vec::new() })
    }

    /// All committed records in slot order.
    pub fn load(&self) -> Result<Vec<Record>, IndexError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT body FROM records ORDER BY slot")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut records = Vec::with_capacity(bodies.len());
        for body in bodies {
            records.push(serde_json::from_str(&body)?);
        }
        Ok(records)
    }

    pub fn stage(&mut self, slot: u32, identity: &str, record: &Record) -> Result<(), IndexError> {
        let body = serde_json::to_string(record)?;
        self.pending.push((slot, identity.to_string(), body));
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Writes all staged records. Returns how many were written.
    pub fn flush(&mut self) -> Result<usize, IndexError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.get_mut();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO records (slot, identity, body) VALUES (?1, ?2, ?3)",
            )?;
            for (slot, identity, body) in &self.pending {
                stmt.execute(params![slot, identity, body])?;
            }
        }
        tx.commit()?;
        let written = self.pending.len();
        self.pending.clear();
        Ok(written)
    }
}
