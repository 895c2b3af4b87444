//! Translation history with async batch writing.
//! Records are buffered in a channel and flushed to SQLite every 300ms, so the
//! translate path never waits on disk. Only the newest `limit` rows are kept.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::translate::sqlite_cache::StoreError;
use crate::translate::{TranslationObserver, TranslationRequest, TranslationResult};

pub const DEFAULT_HISTORY_LIMIT: usize = 1000;
const FLUSH_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub request_id: String,
    pub source_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
    /// `Cache`, `Provider(name)` or `PassThrough`.
    pub method: String,
    pub created_at_ms: i64,
}

pub struct HistoryStore {
    tx: Mutex<Option<mpsc::UnboundedSender<HistoryRecord>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    read_conn: Mutex<Connection>,
}

fn open_conn(db_path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

impl HistoryStore {
    /// Open (or create) the history database and start the batch writer.
    /// Must be called inside a tokio runtime.
    pub fn open(db_path: &Path, limit: usize) -> Result<Arc<Self>, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let read_conn = open_conn(db_path)?;
        read_conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL,
                source_text TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                source_lang TEXT NOT NULL,
                target_lang TEXT NOT NULL,
                method TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );",
        )?;
        // Separate writer connection so queries never wait on a batch.
        let write_conn = open_conn(db_path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(flush_loop(rx, write_conn, limit.max(1)));

        info!(path = %db_path.display(), limit, "history store opened");
        Ok(Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            read_conn: Mutex::new(read_conn),
        }))
    }

    /// Queue a record for the batch writer. Never blocks.
    pub fn push(&self, record: HistoryRecord) {
        match self.tx.lock().as_ref() {
            Some(tx) => {
                if tx.send(record).is_err() {
                    warn!("history writer has stopped; record dropped");
                }
            }
            None => debug!("history store closed; record dropped"),
        }
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let conn = self.read_conn.lock();
        let mut stmt = conn.prepare(
            "SELECT request_id, source_text, translated_text, source_lang,
                    target_lang, method, created_at_ms
             FROM history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(HistoryRecord {
                request_id: row.get(0)?,
                source_text: row.get(1)?,
                translated_text: row.get(2)?,
                source_lang: row.get(3)?,
                target_lang: row.get(4)?,
                method: row.get(5)?,
                created_at_ms: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        let conn = self.read_conn.lock();
        let removed = conn.execute("DELETE FROM history", [])?;
        info!(removed, "history cleared");
        Ok(removed)
    }

    /// Stop accepting records and wait for the writer to flush what it holds.
    pub async fn close(&self) {
        drop(self.tx.lock().take());
        let writer = self.writer.lock().take();
        if let Some(handle) = writer {
            if let Err(e) = handle.await {
                warn!(error = %e, "history writer task failed");
            }
        }
    }
}

impl TranslationObserver for HistoryStore {
    fn record(&self, request: &TranslationRequest, result: &TranslationResult) {
        if !result.success {
            return;
        }
        let Some(method) = &result.method else {
            return;
        };
        self.push(HistoryRecord {
            request_id: request.request_id.clone(),
            source_text: request.text.trim().to_string(),
            translated_text: result.translated_text.clone(),
            source_lang: result.resolved_source_lang.clone(),
            target_lang: result.target_lang.clone(),
            method: method.to_string(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        });
    }
}

async fn flush_loop(
    mut rx: mpsc::UnboundedReceiver<HistoryRecord>,
    conn: Connection,
    limit: usize,
) {
    let mut buffer: Vec<HistoryRecord> = Vec::with_capacity(32);
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            msg = rx.recv() => match msg {
                Some(record) => {
                    buffer.push(record);
                    continue;
                }
                None => {
                    if !buffer.is_empty() {
                        flush_batch(&conn, &buffer, limit);
                    }
                    debug!("history flush loop exiting");
                    return;
                }
            }
        }

        while let Ok(record) = rx.try_recv() {
            buffer.push(record);
        }
        if !buffer.is_empty() {
            flush_batch(&conn, &buffer, limit);
            buffer.clear();
        }
    }
}

/// Insert a batch and trim to the newest `limit` rows, in one transaction.
fn flush_batch(conn: &Connection, records: &[HistoryRecord], limit: usize) {
    let start = std::time::Instant::now();
    let result = (|| -> Result<usize, rusqlite::Error> {
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO history
                 (request_id, source_text, translated_text, source_lang,
                  target_lang, method, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.request_id,
                    r.source_text,
                    r.translated_text,
                    r.source_lang,
                    r.target_lang,
                    r.method,
                    r.created_at_ms,
                ])?;
            }
        }
        let trimmed = tx.execute(
            "DELETE FROM history WHERE id NOT IN
                (SELECT id FROM history ORDER BY id DESC LIMIT ?1)",
            params![limit as i64],
        )?;
        tx.commit()?;
        Ok(trimmed)
    })();

    match result {
        Ok(trimmed) => debug!(
            count = records.len(),
            trimmed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "history batch flushed"
        ),
        Err(e) => warn!(error = %e, count = records.len(), "history batch failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::Method;

    fn done(text: &str, translated: &str) -> (TranslationRequest, TranslationResult) {
        let req = TranslationRequest::new(text, "auto", "en");
        let res = TranslationResult {
            request_id: req.request_id.clone(),
            success: true,
            translated_text: translated.into(),
            resolved_source_lang: "fr".into(),
            target_lang: "en".into(),
            detected_lang: Some("fr".into()),
            method: Some(Method::Provider("google".into())),
            error_kind: None,
            error_message: None,
            elapsed_ms: 1.0,
        };
        (req, res)
    }

    #[tokio::test]
    async fn records_are_flushed_newest_first_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(&dir.path().join("history.db"), 2).unwrap();

        for (src, dst) in [("un", "one"), ("deux", "two"), ("trois", "three")] {
            let (req, res) = done(src, dst);
            store.record(&req, &res);
        }
        store.close().await;

        let rows = store.recent(10).unwrap();
        let texts: Vec<_> = rows.iter().map(|r| r.translated_text.as_str()).collect();
        assert_eq!(texts, ["three", "two"]);
        assert_eq!(rows[0].method, "Provider(google)");
        assert_eq!(rows[0].source_lang, "fr");
    }

    #[tokio::test]
    async fn failures_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(&dir.path().join("history.db"), 10).unwrap();
        let (req, mut res) = done("x", "");
        res.success = false;
        res.method = None;
        store.record(&req, &res);
        store.close().await;

        assert!(store.recent(10).unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }
}
