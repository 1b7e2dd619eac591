//! Persistent result cache
//!
//! Key is the content+config fingerprint; value is the full file report
//! plus the cost paid to produce it. Expiry is lazy: entries older than
//! their TTL read as misses, and an optional compaction pass physically
//! removes them. A corrupt entry is a miss, never a failure.

use crate::fingerprint::FingerprintKey;
use crate::types::FileReport;
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::warn;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS results (
    key TEXT PRIMARY KEY,
    report_json TEXT NOT NULL,
    cost REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,    -- unix seconds
    ttl_secs INTEGER NOT NULL
);
"#;

pub struct ResultCache {
    conn: Connection,
}

impl ResultCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Fetch a live entry. Expired entries and unreadable entries are
    /// both misses; corruption is logged and the bad row dropped.
    pub fn get(&self, key: &FingerprintKey) -> Result<Option<FileReport>> {
        let row: Option<(String, i64, i64)> = self
            .conn
            .query_row(
                "SELECT report_json, created_at, ttl_secs FROM results WHERE key = ?1",
                [key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (json, created_at, ttl_secs) = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        if Utc::now().timestamp() >= created_at + ttl_secs {
            return Ok(None);
        }

        match serde_json::from_str::<FileReport>(&json) {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "corrupt cache entry, treating as miss");
                self.conn
                    .execute("DELETE FROM results WHERE key = ?1", [key.as_str()])?;
                Ok(None)
            }
        }
    }

    /// Store a result. Last write wins for the same key; results for
    /// identical (content, config) pairs are expected to be equivalent.
    pub fn put(&self, key: &FingerprintKey, report: &FileReport, cost: f64, ttl_secs: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO results (key, report_json, cost, created_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.as_str(),
                serde_json::to_string(report)?,
                cost,
                Utc::now().timestamp(),
                ttl_secs,
            ],
        )?;
        Ok(())
    }

    pub fn invalidate(&self, key: &FingerprintKey) -> Result<()> {
        self.conn
            .execute("DELETE FROM results WHERE key = ?1", [key.as_str()])?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM results", [])?;
        Ok(())
    }

    /// Physically remove expired entries; returns how many were dropped
    pub fn compact(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM results WHERE ?1 >= created_at + ttl_secs",
            [Utc::now().timestamp()],
        )?;
        Ok(removed)
    }

    /// (live entries, total cost recorded across them)
    pub fn stats(&self) -> Result<(i64, f64)> {
        let row = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(cost), 0.0) FROM results
             WHERE ?1 < created_at + ttl_secs",
            [Utc::now().timestamp()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(row)
    }
}
