use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::config::StorageOptions;
use crate::error::{AppError, AppResult};
use crate::geo::Position;

mod schema;

const NOTE_COLUMNS: &str = "id, title, body, latitude, longitude, created_at";

#[derive(Debug, Clone, Copy)]
pub struct WalCheckpointStats {
    pub busy_frames: i64,
    pub wal_frames: i64,
    pub checkpointed_frames: i64,
}

/// A stored note. `id` is the primary key and is derived from the creation
/// time in milliseconds; `created_at` is RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: String,
}

impl NoteRecord {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// Async persistence seam consumed by the controller and the query layer.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Insert or overwrite by `note.id`; resolves once the write is committed.
    async fn add_note(&self, note: &NoteRecord) -> AppResult<()>;
    /// Every stored note, in no particular order.
    async fn get_all_notes(&self) -> AppResult<Vec<NoteRecord>>;
    /// Removing an absent id is not an error.
    async fn delete_note(&self, id: i64) -> AppResult<()>;
}

#[derive(Clone)]
pub struct StorageHandle {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    db_path: PathBuf,
    options: StorageOptions,
    initialized: OnceCell<()>,
}

impl StorageHandle {
    /// Does no I/O; the database and schema are created on first access.
    pub fn open(options: &StorageOptions) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                db_path: options.database_path.clone(),
                options: options.clone(),
                initialized: OnceCell::new(),
            }),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.inner.db_path
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.get().is_some()
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        self.inner
            .initialized
            .get_or_try_init(|| {
                let db_path = &self.inner.db_path;
                if db_path.as_os_str().is_empty() {
                    bail!("no database path configured");
                }
                if let Some(parent) = db_path.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("creating data directory {}", parent.display())
                    })?;
                }
                let conn = Connection::open(db_path)
                    .with_context(|| format!("opening database {}", db_path.display()))?;
                prepare_connection(&conn, &self.inner.options)?;
                schema::apply(&conn)?;
                tracing::debug!(path = %db_path.display(), "note store initialised");
                Ok(())
            })
            .map(|_| ())
    }

    pub fn connect(&self) -> Result<Connection> {
        self.ensure_initialized()?;
        let db_path = &self.inner.db_path;
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        prepare_connection(&conn, &self.inner.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.connect()?;
        f(&mut conn)
    }

    pub fn run_wal_health_check(&self) -> Result<WalCheckpointStats> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("PRAGMA wal_checkpoint(PASSIVE)")
                .context("preparing wal checkpoint pragma")?;
            let mut rows = stmt.query([]).context("executing wal checkpoint pragma")?;
            if let Some(row) = rows.next()? {
                Ok(WalCheckpointStats {
                    busy_frames: row.get(0)?,
                    wal_frames: row.get(1)?,
                    checkpointed_frames: row.get(2)?,
                })
            } else {
                bail!("wal checkpoint returned no rows");
            }
        })
    }

    pub fn upsert_note(&self, note: &NoteRecord) -> Result<()> {
        self.with_connection(|conn| {
            let tx = conn.transaction().context("starting note write")?;
            upsert_in(&tx, note)?;
            tx.commit().context("committing note write")?;
            Ok(())
        })
    }

    pub fn fetch_all_notes(&self) -> Result<Vec<NoteRecord>> {
        self.with_connection(|conn| {
            let sql = format!("SELECT {NOTE_COLUMNS} FROM notes");
            let mut stmt = conn.prepare(&sql).context("preparing note scan")?;
            let notes = stmt
                .query_map([], NoteRecord::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("reading notes")?;
            Ok(notes)
        })
    }

    pub fn fetch_note_by_id(&self, note_id: i64) -> Result<Option<NoteRecord>> {
        self.with_connection(|conn| {
            let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1");
            conn.query_row(&sql, params![note_id], NoteRecord::from_row)
                .optional()
                .with_context(|| format!("loading note {note_id}"))
        })
    }

    /// Returns whether a row was actually removed.
    pub fn remove_note(&self, note_id: i64) -> Result<bool> {
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM notes WHERE id = ?1", params![note_id])
                .with_context(|| format!("deleting note {note_id}"))?;
            Ok(removed > 0)
        })
    }

    pub fn count_notes(&self) -> Result<usize> {
        self.with_connection(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
                .context("counting notes")?;
            Ok(count as usize)
        })
    }

    pub fn export_json(&self, path: &Path) -> Result<usize> {
        let mut notes = self.fetch_all_notes()?;
        notes.sort_by_key(|note| note.id);
        let json = serde_json::to_vec_pretty(&notes).context("serialising notes")?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating export dir {}", parent.display()))?;
            }
        }
        fs::write(path, json).with_context(|| format!("writing export {}", path.display()))?;
        Ok(notes.len())
    }

    /// Upserts every note in the file inside one transaction.
    pub fn import_json(&self, path: &Path) -> Result<usize> {
        let raw = fs::read(path).with_context(|| format!("reading import {}", path.display()))?;
        let notes: Vec<NoteRecord> = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing import {}", path.display()))?;
        for note in &notes {
            if !note.position().is_valid() {
                bail!("note {} has out-of-range coordinates", note.id);
            }
        }
        self.with_connection(|conn| {
            let tx = conn.transaction().context("starting import")?;
            for note in &notes {
                upsert_in(&tx, note)?;
            }
            tx.commit().context("committing import")?;
            Ok(notes.len())
        })
    }

    async fn blocking<F, T>(&self, op: &'static str, f: F) -> AppResult<T>
    where
        F: FnOnce(&StorageHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.clone();
        let joined = tokio::task::spawn_blocking(move || f(&handle))
            .await
            .map_err(|err| AppError::Storage(format!("{op} task failed: {err}")))?;
        joined.map_err(|err| {
            let err = AppError::storage(err);
            tracing::error!(op, %err, "storage operation failed");
            err
        })
    }
}

#[async_trait]
impl NoteStore for StorageHandle {
    async fn add_note(&self, note: &NoteRecord) -> AppResult<()> {
        let note = note.clone();
        self.blocking("add_note", move |handle| handle.upsert_note(&note))
            .await
    }

    async fn get_all_notes(&self) -> AppResult<Vec<NoteRecord>> {
        self.blocking("get_all_notes", |handle| handle.fetch_all_notes())
            .await
    }

    async fn delete_note(&self, id: i64) -> AppResult<()> {
        self.blocking("delete_note", move |handle| handle.remove_note(id).map(|_| ()))
            .await
    }
}

fn upsert_in(conn: &Connection, note: &NoteRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO notes (id, title, body, latitude, longitude, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            created_at = excluded.created_at",
        params![
            note.id,
            note.title,
            note.body,
            note.latitude,
            note.longitude,
            note.created_at
        ],
    )
    .with_context(|| format!("writing note {}", note.id))?;
    Ok(())
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}
