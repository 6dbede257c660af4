//! Rezn persistence: a small key/value store holding the declared state.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use tracing::debug;

/// Path used when neither an argument nor `REZN_DB_PATH` names one.
pub const DEFAULT_DB_PATH: &str = "/var/lib/rezn/rezn.db";

pub trait Store: Send + Sync {
    /// `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// SQLite-backed store. Simple, synchronous; one caller at a time.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open the store at `REZN_DB_PATH`, or the system default.
    pub fn open_default() -> Result<Self> {
        Self::open(resolve_path(None))
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let started = std::time::Instant::now();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating store directory {}", dir.display()))?;
        }
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path.display()))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )
        .context("creating kv table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path = %path.display(), "store opened");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        // A panic while holding the lock cannot leave a half-written row behind.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let started = std::time::Instant::now();
        let db = self.conn();
        let mut stmt = db.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        let out = match rows.next()? {
            Some(row) => Some(row.get::<_, Vec<u8>>(0)?),
            None => None,
        };
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let started = std::time::Instant::now();
        let db = self.conn();
        db.execute(
            "INSERT INTO kv(key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            (key, value, now_ts()),
        )
        .with_context(|| format!("writing key {}", key))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemStore {
    map: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: &str, value: impl Into<Vec<u8>>) -> Self {
        let s = Self::new();
        s.map.lock().unwrap_or_else(|p| p.into_inner()).insert(key.to_string(), value.into());
        s
    }
}

impl Store for MemStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().unwrap_or_else(|p| p.into_inner()).get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.lock().unwrap_or_else(|p| p.into_inner()).insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Resolve the store path: explicit argument, then `REZN_DB_PATH`, then the default.
pub fn resolve_path(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var_os("REZN_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

pub fn now_ts() -> i64 {
    // seconds since epoch
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir();
        let f = format!("rezn-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f)
    }

    #[test]
    fn put_get_overwrite() {
        let path = temp_db();
        let s = SqliteStore::open(&path).unwrap();
        assert_eq!(s.get("desired").unwrap(), None);
        s.put("desired", b"[]").unwrap();
        assert_eq!(s.get("desired").unwrap().as_deref(), Some(&b"[]"[..]));
        s.put("desired", b"[1]").unwrap();
        assert_eq!(s.get("desired").unwrap().as_deref(), Some(&b"[1]"[..]));
        assert_eq!(s.get("other").unwrap(), None);
    }

    #[test]
    fn reopen_keeps_values() {
        let path = temp_db();
        {
            let s = SqliteStore::open(&path).unwrap();
            s.put("desired", b"{}").unwrap();
        }
        let s = SqliteStore::open(&path).unwrap();
        assert_eq!(s.get("desired").unwrap().as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn open_creates_missing_parent_dir() {
        let dir = temp_db().with_extension("d");
        let path = dir.join("nested").join("rezn.db");
        let s = SqliteStore::open(&path).unwrap();
        s.put("k", b"v").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let blocker = temp_db().with_extension("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let err = SqliteStore::open(blocker.join("rezn.db")).err().expect("open should fail");
        assert!(format!("{:#}", err).contains("creating store directory"), "err={:#}", err);
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn mem_store_roundtrip() {
        let s = MemStore::with("desired", "[]");
        assert_eq!(s.get("desired").unwrap().as_deref(), Some(&b"[]"[..]));
        assert_eq!(s.get("missing").unwrap(), None);
    }

    #[test]
    fn resolve_path_prefers_argument() {
        let p = resolve_path(Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(p, PathBuf::from("/tmp/x.db"));
    }
}
