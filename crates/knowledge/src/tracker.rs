//! Scan record bookkeeping.
//!
//! One SQLite row per scanned source: `(uuid, relative_path, status)`. A row
//! starts `Unfinished` while its vectors are being embedded and flips to
//! `Finished` once they are in the index. Rows left unfinished after a crash
//! or cancellation tell the next scan what to clean up.

use chrono::{DateTime, Utc};
use mnemo_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// Lifecycle state of a scan record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Unfinished,
    Finished,
}

impl RecordStatus {
    fn as_flag(self) -> i64 {
        match self {
            RecordStatus::Unfinished => 1,
            RecordStatus::Finished => 0,
        }
    }

    fn from_flag(flag: i64) -> Self {
        if flag == 0 {
            RecordStatus::Finished
        } else {
            RecordStatus::Unfinished
        }
    }
}

/// One tracked source.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub relative_path: String,
    pub uuid: String,
    pub status: RecordStatus,
}

fn tracker_err(action: &str) -> impl Fn(rusqlite::Error) -> AppError + '_ {
    move |e| AppError::Tracker(format!("Failed to {}: {}", action, e))
}

/// SQLite-backed scan record table.
#[derive(Debug)]
pub struct ScanRecordTracker {
    conn: Connection,
}

impl ScanRecordTracker {
    /// Open (or create) the tracker database at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Tracker(format!("Failed to create tracker directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(tracker_err("open scan record database"))?;
        Self::init(conn)
    }

    /// A tracker that lives only in memory.
    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(tracker_err("open scan record database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scan_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                uuid TEXT NOT NULL,
                unfinished INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_scan_records_path ON scan_records(relative_path);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_scan_records_uuid ON scan_records(uuid);
            CREATE INDEX IF NOT EXISTS idx_scan_records_unfinished ON scan_records(unfinished);
            "#,
        )
        .map_err(tracker_err("create scan record table"))?;

        Ok(Self { conn })
    }

    /// Insert a record; returns its row id.
    pub fn add(&self, relative_path: &str, uuid: &str, status: RecordStatus) -> AppResult<i64> {
        tracing::info!(
            "Adding {:?} scan record: {} - {}",
            status,
            relative_path,
            uuid
        );

        self.conn
            .execute(
                "INSERT INTO scan_records (timestamp, relative_path, uuid, unfinished) VALUES (?1, ?2, ?3, ?4)",
                params![Utc::now().to_rfc3339(), relative_path, uuid, status.as_flag()],
            )
            .map_err(tracker_err("insert scan record"))?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Whether `relative_path` has a finished record.
    pub fn is_recorded(&self, relative_path: &str) -> AppResult<bool> {
        Ok(self.status_of(relative_path)? == Some(RecordStatus::Finished))
    }

    /// Whether `relative_path` has an unfinished record.
    pub fn is_unfinished(&self, relative_path: &str) -> AppResult<bool> {
        Ok(self.status_of(relative_path)? == Some(RecordStatus::Unfinished))
    }

    fn status_of(&self, relative_path: &str) -> AppResult<Option<RecordStatus>> {
        let flag: Option<i64> = self
            .conn
            .query_row(
                "SELECT unfinished FROM scan_records WHERE relative_path = ?1",
                params![relative_path],
                |row| row.get(0),
            )
            .optional()
            .map_err(tracker_err("look up scan record"))?;
        Ok(flag.map(RecordStatus::from_flag))
    }

    pub fn get_uuid(&self, relative_path: &str, status: RecordStatus) -> AppResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT uuid FROM scan_records WHERE relative_path = ?1 AND unfinished = ?2",
                params![relative_path, status.as_flag()],
                |row| row.get(0),
            )
            .optional()
            .map_err(tracker_err("look up scan record"))
    }

    pub fn get_relative_path(&self, uuid: &str, status: RecordStatus) -> AppResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT relative_path FROM scan_records WHERE uuid = ?1 AND unfinished = ?2",
                params![uuid, status.as_flag()],
                |row| row.get(0),
            )
            .optional()
            .map_err(tracker_err("look up scan record"))
    }

    /// All records with `status`, oldest first.
    pub fn all_records(&self, status: RecordStatus) -> AppResult<Vec<ScanRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, relative_path, uuid, unfinished FROM scan_records
                 WHERE unfinished = ?1 ORDER BY id",
            )
            .map_err(tracker_err("prepare scan record query"))?;

        let rows = stmt
            .query_map(params![status.as_flag()], |row| {
                let timestamp: String = row.get(1)?;
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;

                Ok(ScanRecord {
                    id: row.get(0)?,
                    timestamp,
                    relative_path: row.get(2)?,
                    uuid: row.get(3)?,
                    status: RecordStatus::from_flag(row.get(4)?),
                })
            })
            .map_err(tracker_err("query scan records"))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(tracker_err("read scan records"))
    }

    pub fn count(&self, status: RecordStatus) -> AppResult<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM scan_records WHERE unfinished = ?1",
                params![status.as_flag()],
                |row| row.get(0),
            )
            .map_err(tracker_err("count scan records"))?;
        Ok(count as usize)
    }

    /// Move a finished record to a new path.
    pub fn update_path(&self, new_relative_path: &str, old_relative_path: &str) -> AppResult<bool> {
        tracing::info!(
            "Moving scan record path: {} -> {}",
            old_relative_path,
            new_relative_path
        );

        let changed = self
            .conn
            .execute(
                "UPDATE scan_records SET relative_path = ?1 WHERE relative_path = ?2 AND unfinished = 0",
                params![new_relative_path, old_relative_path],
            )
            .map_err(tracker_err("update scan record"))?;
        Ok(changed > 0)
    }

    /// Flip the record of `relative_path` to finished.
    pub fn mark_finished(&self, relative_path: &str) -> AppResult<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE scan_records SET unfinished = 0, timestamp = ?1 WHERE relative_path = ?2",
                params![Utc::now().to_rfc3339(), relative_path],
            )
            .map_err(tracker_err("update scan record"))?;
        Ok(changed > 0)
    }

    /// Delete the record of `relative_path`, restricted to `status` when given.
    pub fn remove_by_path(&self, relative_path: &str, status: Option<RecordStatus>) -> AppResult<bool> {
        tracing::info!("Removing scan record: {}", relative_path);
        let changed = match status {
            Some(status) => self.conn.execute(
                "DELETE FROM scan_records WHERE relative_path = ?1 AND unfinished = ?2",
                params![relative_path, status.as_flag()],
            ),
            None => self.conn.execute(
                "DELETE FROM scan_records WHERE relative_path = ?1",
                params![relative_path],
            ),
        }
        .map_err(tracker_err("delete scan record"))?;
        Ok(changed > 0)
    }

    /// Delete the record of `uuid`, restricted to `status` when given.
    pub fn remove_by_uuid(&self, uuid: &str, status: Option<RecordStatus>) -> AppResult<bool> {
        tracing::info!("Removing scan record: {}", uuid);
        let changed = match status {
            Some(status) => self.conn.execute(
                "DELETE FROM scan_records WHERE uuid = ?1 AND unfinished = ?2",
                params![uuid, status.as_flag()],
            ),
            None => self
                .conn
                .execute("DELETE FROM scan_records WHERE uuid = ?1", params![uuid]),
        }
        .map_err(tracker_err("delete scan record"))?;
        Ok(changed > 0)
    }

    /// Drop the whole scan history.
    pub fn clear(&self) -> AppResult<()> {
        tracing::warn!("Cleaning scan record history");
        self.conn
            .execute("DELETE FROM scan_records", [])
            .map_err(tracker_err("clear scan records"))?;
        Ok(())
    }
}

/// Scoped "work in progress" marker.
///
/// Creating it inserts an unfinished record; [`UnfinishedMarker::finish`]
/// flips it to finished. Dropping it unfinished leaves the row in place so
/// the caller can clean up what the interrupted work produced.
#[derive(Debug)]
pub struct UnfinishedMarker<'a> {
    tracker: &'a ScanRecordTracker,
    relative_path: String,
    uuid: String,
    finished: bool,
}

impl<'a> UnfinishedMarker<'a> {
    pub fn begin(tracker: &'a ScanRecordTracker, relative_path: &str, uuid: &str) -> AppResult<Self> {
        tracker.add(relative_path, uuid, RecordStatus::Unfinished)?;
        Ok(Self {
            tracker,
            relative_path: relative_path.to_string(),
            uuid: uuid.to_string(),
            finished: false,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Mark the work done.
    pub fn finish(mut self) -> AppResult<()> {
        self.tracker.mark_finished(&self.relative_path)?;
        self.finished = true;
        Ok(())
    }

    /// Drop the unfinished record, for use after the caller cleaned up.
    pub fn discard(mut self) -> AppResult<()> {
        self.tracker
            .remove_by_path(&self.relative_path, Some(RecordStatus::Unfinished))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for UnfinishedMarker<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "Scan of {} ({}) did not finish, leaving unfinished record",
                self.relative_path,
                self.uuid
            );
        }
    }
}
