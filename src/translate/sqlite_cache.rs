//! Persistent copy of the translation cache backed by SQLite.
//! The in-memory cache stays authoritative; this table is rewritten from a
//! snapshot on shutdown and after sweeps, and read back on startup.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::{debug, info};

use super::cache::{CacheEntry, Fingerprint};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open (or create) the cache database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_cache (
                fingerprint BLOB PRIMARY KEY,
                translated_text TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                last_accessed_at_ms INTEGER NOT NULL,
                access_count INTEGER NOT NULL,
                ttl_minutes INTEGER NOT NULL
            );",
        )?;

        info!(path = %db_path.display(), "cache database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Replace the stored rows with `entries` in one transaction.
    pub fn save_snapshot(&self, entries: &[CacheEntry]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM translation_cache", [])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO translation_cache
                 (fingerprint, translated_text, created_at_ms, last_accessed_at_ms,
                  access_count, ttl_minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for e in entries {
                stmt.execute(params![
                    e.fingerprint.as_bytes().as_slice(),
                    e.translated_text,
                    e.created_at_ms,
                    e.last_accessed_at_ms,
                    e.access_count as i64,
                    e.ttl_minutes as i64,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = entries.len(), "cache snapshot saved");
        Ok(())
    }

    /// Every stored row. Rows with a malformed key are skipped.
    pub fn load_all(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT fingerprint, translated_text, created_at_ms, last_accessed_at_ms,
                    access_count, ttl_minutes
             FROM translation_cache",
        )?;
        let rows = stmt.query_map([], |row| {
            let key: Vec<u8> = row.get(0)?;
            Ok((
                key,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, translated_text, created_at_ms, last_accessed_at_ms, count, ttl) = row?;
            let Ok(bytes) = <[u8; 32]>::try_from(key.as_slice()) else {
                continue;
            };
            out.push(CacheEntry {
                fingerprint: Fingerprint::from_bytes(bytes),
                translated_text,
                created_at_ms,
                last_accessed_at_ms,
                access_count: count.max(0) as u64,
                ttl_minutes: ttl.max(0) as u64,
            });
        }
        Ok(out)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM translation_cache", [])?)
    }
}
