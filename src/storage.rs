use crate::error::{ClientError, Result};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const TOKENS_KEY: &str = "auth_tokens";
pub const RECENT_SEARCHES_KEY: &str = "recent_searches";
pub const MAX_RECENT_SEARCHES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Small on-device key/value store. Values are opaque JSON.
pub struct DeviceStore {
    conn: Mutex<Connection>,
}

fn db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "EstateClient")?;
    Some(proj.data_dir().join("device.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

impl DeviceStore {
    pub fn open_default() -> Result<Self> {
        let path = db_path().ok_or_else(|| ClientError::Storage("no data dir".into()))?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        ensure_dir(path)?;
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ClientError::Storage("device store lock poisoned".into()))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value=excluded.value,
                updated_at=excluded.updated_at
            "#,
            params![key, text, chrono::Utc::now()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn()?.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn tokens(&self) -> Result<Option<TokenPair>> {
        self.get_json(TOKENS_KEY)
    }

    pub fn save_tokens(&self, pair: &TokenPair) -> Result<()> {
        self.put_json(TOKENS_KEY, pair)
    }

    pub fn clear_tokens(&self) -> Result<()> {
        self.remove(TOKENS_KEY)
    }

    /// Most recent first.
    pub fn recent_searches(&self) -> Result<Vec<String>> {
        Ok(self.get_json(RECENT_SEARCHES_KEY)?.unwrap_or_default())
    }

    pub fn push_recent_search(&self, query: &str) -> Result<Vec<String>> {
        let query = query.trim();
        let mut list = self.recent_searches()?;
        if query.is_empty() {
            return Ok(list);
        }
        let lowered = query.to_lowercase();
        list.retain(|q| q.to_lowercase() != lowered);
        list.insert(0, query.to_string());
        list.truncate(MAX_RECENT_SEARCHES);
        self.put_json(RECENT_SEARCHES_KEY, &list)?;
        Ok(list)
    }

    pub fn clear_recent_searches(&self) -> Result<()> {
        self.remove(RECENT_SEARCHES_KEY)
    }
}
