use crate::api::models::Chat;
use crate::error::StorageError;
use crate::sync::chats::{ChatChanges, sort_for_display};
use directories::ProjectDirs;
use rusqlite::{Connection, params};
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "BlueBubblesSync")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

// Caches the last reconciled chat snapshot so a restart diffs against it
// instead of treating every chat as new.
pub struct ChatCache {
    conn: Connection,
}

impl ChatCache {
    pub fn open_default() -> Result<Self, StorageError> {
        let path = db_path().ok_or(StorageError::NoDataDir)?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                unread_count INTEGER NOT NULL DEFAULT 0,
                raw_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS chats_by_timestamp ON chats (timestamp DESC);
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Persist one reconciliation cycle atomically.
    pub fn apply_changes(&mut self, changes: &ChatChanges) -> Result<(), StorageError> {
        if changes.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                r#"
                INSERT INTO chats (id, name, timestamp, unread_count, raw_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name,
                    timestamp=excluded.timestamp,
                    unread_count=excluded.unread_count,
                    raw_json=excluded.raw_json
                "#,
            )?;
            for chat in changes.added.iter().chain(&changes.updated) {
                let raw = serde_json::to_string(chat).map_err(|e| StorageError::Corrupt {
                    id: chat.id.clone(),
                    reason: e.to_string(),
                })?;
                upsert.execute(params![chat.id, chat.name, chat.timestamp, chat.unread_count, raw])?;
            }

            let mut delete = tx.prepare("DELETE FROM chats WHERE id = ?1")?;
            for id in &changes.removed {
                delete.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load(&self, limit: Option<usize>) -> Result<Vec<Chat>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, raw_json FROM chats ORDER BY timestamp DESC LIMIT ?1")?;
        let lim = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![lim], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, raw) = row?;
            let chat: Chat = serde_json::from_str(&raw)
                .map_err(|e| StorageError::Corrupt { id, reason: e.to_string() })?;
            out.push(chat);
        }
        sort_for_display(&mut out);
        Ok(out)
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
