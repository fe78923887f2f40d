// Link table in SQLite

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use crate::error::LinkStoreError;
use crate::link::{Link, LinkKind, LinkStatus, PairKey, Provenance};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS links (
    id1 TEXT NOT NULL,
    id2 TEXT NOT NULL,             -- id1 >= id2
    kind INTEGER NOT NULL,         -- 1=same, 2=possible, 3=different
    status INTEGER NOT NULL,       -- 2=asserted, 1=inferred, 0=retracted
    provenance INTEGER NOT NULL,   -- 0=direct, 1=transitive
    confidence REAL NOT NULL,
    timestamp TEXT NOT NULL,       -- RFC 3339, microseconds, UTC
    PRIMARY KEY (id1, id2)
);

CREATE INDEX IF NOT EXISTS links_id2 ON links (id2);
"#;

pub(crate) struct SqliteLinks {
    conn: Connection,
}

fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn corrupt(id1: &str, id2: &str, message: impl Into<String>) -> LinkStoreError {
    LinkStoreError::CorruptRow { id1: id1.to_string(), id2: id2.to_string(), message: message.into() }
}

impl SqliteLinks {
    pub fn open(path: &Path) -> Result<Self, LinkStoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn load(&self) -> Result<Vec<Link>, LinkStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id1, id2, kind, status, provenance, confidence, timestamp FROM links ORDER BY id1, id2",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut links = Vec::with_capacity(rows.len());
        for (id1, id2, kind, status, provenance, confidence, timestamp) in rows {
            let kind = LinkKind::from_code(kind).ok_or_else(|| corrupt(&id1, &id2, format!("kind {kind}")))?;
            let status =
                LinkStatus::from_code(status).ok_or_else(|| corrupt(&id1, &id2, format!("status {status}")))?;
            let provenance = Provenance::from_code(provenance)
                .ok_or_else(|| corrupt(&id1, &id2, format!("provenance {provenance}")))?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| corrupt(&id1, &id2, format!("timestamp '{timestamp}': {e}")))?
                .with_timezone(&Utc);
            links.push(Link { id1, id2, status, kind, confidence, timestamp, provenance });
        }
        Ok(links)
    }

    /// Applies one batch of changes in a single transaction.
    pub fn write(&mut self, upserts: &[&Link], deletes: &[&PairKey]) -> Result<(), LinkStoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT OR REPLACE INTO links (id1, id2, kind, status, provenance, confidence, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for link in upserts {
                upsert.execute(params![
                    link.id1,
                    link.id2,
                    link.kind.code(),
                    link.status.code(),
                    link.provenance.code(),
                    link.confidence,
                    encode_time(&link.timestamp),
                ])?;
            }
            let mut delete = tx.prepare("DELETE FROM links WHERE id1 = ?1 AND id2 = ?2")?;
            for (id1, id2) in deletes {
                delete.execute(params![id1, id2])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
