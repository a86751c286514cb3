//! SQLite implementation of the Medium trait.
//!
//! Each store name maps to one database file, `<dir>/<name>.sqlite3`. Blocking
//! SQLite calls run on `tokio::task::spawn_blocking`. The medium can force-close
//! every live session with [`SqliteMedium::close_all`], which is how a host
//! evicting storage looks to the session driver.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

use crate::error::{Result, StoreError};
use crate::medium::{Access, Medium, ObjectStore, Opened, Session};
use crate::migration;
use crate::traits::RawItem;

/// File name of the throwaway database opened by the capability probe.
const PROBE_DATABASE: &str = "_probe.sqlite3";

struct LiveSession {
    closed: Arc<AtomicBool>,
    notify: oneshot::Sender<()>,
}

impl LiveSession {
    fn abandoned(&self) -> bool {
        self.notify.is_closed()
    }
}

/// SQLite-backed medium rooted at a directory.
pub struct SqliteMedium {
    dir: PathBuf,
    live: Mutex<Vec<LiveSession>>,
}

impl SqliteMedium {
    /// Create a medium storing databases under `dir`.
    ///
    /// The directory is not created; a missing directory makes the medium
    /// report itself unavailable.
    pub fn new(dir: impl AsRef<Path>) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.as_ref().to_path_buf(),
            live: Mutex::new(Vec::new()),
        })
    }

    /// Directory holding the database files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Close every live session without being asked.
    pub fn close_all(&self) {
        let live = std::mem::take(&mut *self.live.lock().unwrap_or_else(PoisonError::into_inner));
        for session in live {
            session.closed.store(true, Ordering::SeqCst);
            let _ = session.notify.send(());
        }
    }

    /// Number of sessions whose owner still watches for their close.
    pub fn live_sessions(&self) -> usize {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.retain(|session| !session.abandoned());
        live.len()
    }

    fn database_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StoreError::Medium(format!("invalid store name: {:?}", name)));
        }
        Ok(self.dir.join(format!("{}.sqlite3", name)))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[async_trait]
impl Medium for SqliteMedium {
    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }

    async fn probe(&self) -> Result<()> {
        let path = self.dir.join(PROBE_DATABASE);
        blocking(move || {
            let conn = Connection::open(path)?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn open(&self, name: &str) -> Result<Opened> {
        let path = self.database_path(name)?;
        let (conn, version) = blocking(move || {
            let conn = Connection::open(path)?;
            let version = migration::current_version(&conn)?;
            Ok((conn, version))
        })
        .await?;

        let closed = Arc::new(AtomicBool::new(false));
        let (notify, closed_rx) = oneshot::channel();
        {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            live.retain(|session| !session.abandoned());
            live.push(LiveSession {
                closed: Arc::clone(&closed),
                notify,
            });
        }

        Ok(Opened {
            session: Arc::new(SqliteSession {
                conn: Arc::new(Mutex::new(conn)),
                closed,
            }),
            upgrade_needed: version < migration::CURRENT_VERSION,
            closed: closed_rx,
        })
    }
}

struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Session for SqliteSession {
    async fn upgrade(&self, container: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let container = container.to_string();
        blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Medium(format!("mutex poisoned: {}", e)))?;
            migration::migrate(&mut conn, &container)
        })
        .await
    }

    fn object_store(&self, container: &str, access: Access) -> Result<Box<dyn ObjectStore>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Medium("session closed".into()));
        }
        if !migration::is_identifier(container) {
            return Err(StoreError::Medium(format!("invalid container: {:?}", container)));
        }
        Ok(Box::new(SqliteObjectStore {
            conn: Arc::clone(&self.conn),
            closed: Arc::clone(&self.closed),
            table: container.to_string(),
            access,
        }))
    }
}

struct SqliteObjectStore {
    conn: Arc<Mutex<Connection>>,
    closed: Arc<AtomicBool>,
    table: String,
    access: Access,
}

impl SqliteObjectStore {
    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, write: bool, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if write && self.access == Access::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Medium("session closed".into()));
        }

        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Medium(format!("mutex poisoned: {}", e)))?;
            f(&*conn, table.as_str())
        })
        .await
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn get(&self, key: &str) -> Result<Option<RawItem>> {
        let key = key.to_string();
        self.run(false, move |conn, table| {
            let stored: Option<String> = conn
                .query_row(
                    &format!(r#"SELECT value FROM "{}" WHERE key = ?1"#, table),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;

            match stored {
                Some(json) => Ok(Some(RawItem::new(key, serde_json::from_str(&json)?))),
                None => Ok(None),
            }
        })
        .await
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        self.run(false, |conn, table| {
            let mut stmt = conn.prepare(&format!(r#"SELECT key FROM "{}""#, table))?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn put(&self, item: RawItem) -> Result<()> {
        self.run(true, move |conn, table| {
            let json = serde_json::to_string(&item.value)?;
            conn.execute(
                &format!(
                    r#"INSERT INTO "{}" (key, value) VALUES (?1, ?2)
                       ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
                    table
                ),
                params![item.key, json],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run(true, move |conn, table| {
            conn.execute(&format!(r#"DELETE FROM "{}" WHERE key = ?1"#, table), params![key])?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.run(true, |conn, table| {
            conn.execute(&format!(r#"DELETE FROM "{}""#, table), [])?;
            Ok(())
        })
        .await
    }
}
