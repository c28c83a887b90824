//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CacheKey, ResourceEntry};
use crate::net::Response;

/// Summary of one stored generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationInfo {
  pub label: String,
  pub active: bool,
  pub entries: usize,
  pub created_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Every call is atomic: readers never observe a half-written entry or batch.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the generation if it does not exist yet. Returns true when created.
  fn open_generation(&self, label: &str) -> Result<bool>;

  /// All generation labels, oldest first.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Delete a generation and every entry it owns. Returns false if it did not exist.
  fn delete_generation(&self, label: &str) -> Result<bool>;

  /// Mark `label` as the only serving generation.
  fn set_active(&self, label: &str) -> Result<()>;

  /// The persisted serving generation, if any.
  fn active_generation(&self) -> Result<Option<String>>;

  /// Look up one entry.
  fn get_entry(&self, label: &str, key: &CacheKey) -> Result<Option<ResourceEntry>>;

  /// Store (or wholesale replace) one entry. Fails if the generation is gone.
  fn put_entry(&self, label: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// Store a batch of entries in a single transaction.
  fn put_entries(&self, label: &str, entries: &[(CacheKey, Response)]) -> Result<()>;

  /// Identities of all entries in a generation.
  fn keys(&self, label: &str) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
#[derive(Debug)]
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    Ok(crate::config::data_dir()?.join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation; at most one is active
CREATE TABLE IF NOT EXISTS generations (
    label TEXT PRIMARY KEY,
    active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity hash
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    identity TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);
"#;

fn generation_exists(conn: &Connection, label: &str) -> Result<bool> {
  conn
    .query_row(
      "SELECT 1 FROM generations WHERE label = ?",
      params![label],
      |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
    .map_err(|e| eyre!("Failed to look up generation {}: {}", label, e))
}

fn insert_entry(conn: &Connection, label: &str, key: &CacheKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (generation, entry_key, identity, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        label,
        key.cache_hash(),
        key.identity(),
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key.identity(), e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_generation(&self, label: &str) -> Result<bool> {
    let conn = self.lock()?;

    let inserted = conn
      .execute(
        "INSERT OR IGNORE INTO generations (label, active, created_at) VALUES (?, 0, datetime('now'))",
        params![label],
      )
      .map_err(|e| eyre!("Failed to open generation {}: {}", label, e))?;

    Ok(inserted > 0)
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT g.label, g.active, g.created_at,
                (SELECT COUNT(*) FROM entries e WHERE e.generation = g.label)
         FROM generations g
         ORDER BY g.created_at, g.rowid",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, bool, String, i64)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read generation row: {}", e))?;

    rows
      .into_iter()
      .map(|(label, active, created_at, entries)| {
        Ok(GenerationInfo {
          label,
          active,
          entries: entries as usize,
          created_at: parse_datetime(&created_at)?,
        })
      })
      .collect()
  }

  fn delete_generation(&self, label: &str) -> Result<bool> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![label])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", label, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE label = ?", params![label])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", label, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn set_active(&self, label: &str) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    if !generation_exists(&tx, label)? {
      return Err(eyre!("Cannot activate unknown generation {}", label));
    }
    tx.execute("UPDATE generations SET active = (label = ?)", params![label])
      .map_err(|e| eyre!("Failed to mark {} active: {}", label, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let conn = self.lock()?;

    conn
      .query_row(
        "SELECT label FROM generations WHERE active = 1 LIMIT 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active generation: {}", e))
  }

  fn get_entry(&self, label: &str, key: &CacheKey) -> Result<Option<ResourceEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE generation = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![label, key.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key.identity(), e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        Ok(Some(ResourceEntry {
          response: Response::new(status, headers, body),
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put_entry(&self, label: &str, key: &CacheKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;

    if !generation_exists(&conn, label)? {
      return Err(eyre!("Generation {} no longer exists", label));
    }
    insert_entry(&conn, label, key, response)
  }

  fn put_entries(&self, label: &str, entries: &[(CacheKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    if !generation_exists(&tx, label)? {
      return Err(eyre!("Generation {} no longer exists", label));
    }
    for (key, response) in entries {
      insert_entry(&tx, label, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn keys(&self, label: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT identity FROM entries WHERE generation = ? ORDER BY identity")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![label], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key row: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
