//! A scripted in-memory medium for testing.
//!
//! Behaves like a well-mannered host storage API until told otherwise: it can
//! report itself unavailable, fail the capability probe, fail the next N
//! opens, hold opens at a gate, delay individual reads, and close every live
//! session on demand. Every record operation is appended to a log so tests
//! can assert on the order in which requests reached the medium.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{oneshot, watch};

use crate::error::{Result, StoreError};
use crate::medium::{Access, Medium, ObjectStore, Opened, Session};
use crate::traits::RawItem;

/// Schema version written by `Session::upgrade`.
const SCRIPTED_SCHEMA_VERSION: u32 = 1;

#[derive(Default)]
struct Database {
    version: u32,
    containers: HashMap<String, BTreeMap<String, Value>>,
}

struct LiveSession {
    closed: Arc<AtomicBool>,
    notify: oneshot::Sender<()>,
}

impl LiveSession {
    /// Nobody is listening for this session's close any more.
    fn abandoned(&self) -> bool {
        self.notify.is_closed()
    }
}

#[derive(Default)]
struct Script {
    unavailable: bool,
    probe_fails: bool,
    failing_opens: usize,
    opens: usize,
    upgrades: usize,
    read_delays: HashMap<String, Duration>,
    databases: HashMap<String, Arc<Mutex<Database>>>,
    live: Vec<LiveSession>,
    log: Vec<String>,
}

struct Inner {
    script: Mutex<Script>,
    gate: watch::Sender<bool>,
}

impl Inner {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory medium with fault injection.
pub struct ScriptedMedium {
    inner: Arc<Inner>,
}

impl ScriptedMedium {
    /// Create an available medium with no databases.
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            inner: Arc::new(Inner {
                script: Mutex::new(Script::default()),
                gate,
            }),
        })
    }

    /// Toggle the environment check.
    pub fn set_available(&self, available: bool) {
        self.inner.script().unavailable = !available;
    }

    /// Make the capability probe fail (or succeed again).
    pub fn fail_probe(&self, fail: bool) {
        self.inner.script().probe_fails = fail;
    }

    /// Fail the next `count` open attempts.
    pub fn fail_next_opens(&self, count: usize) {
        self.inner.script().failing_opens = count;
    }

    /// Hold every open attempt until [`ScriptedMedium::resume_opens`].
    pub fn pause_opens(&self) {
        self.inner.gate.send_replace(false);
    }

    /// Release held open attempts.
    pub fn resume_opens(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Delay reads of `key` by `delay`.
    pub fn set_read_delay(&self, key: impl Into<String>, delay: Duration) {
        self.inner.script().read_delays.insert(key.into(), delay);
    }

    /// Close every live session without being asked, as a host does on eviction.
    pub fn close_all(&self) {
        let live = std::mem::take(&mut self.inner.script().live);
        for session in live {
            session.closed.store(true, Ordering::SeqCst);
            let _ = session.notify.send(());
        }
    }

    /// Number of sessions whose owner still watches for their close.
    pub fn live_sessions(&self) -> usize {
        let mut script = self.inner.script();
        script.live.retain(|session| !session.abandoned());
        script.live.len()
    }

    /// Number of open attempts so far.
    pub fn open_count(&self) -> usize {
        self.inner.script().opens
    }

    /// Number of schema upgrades so far.
    pub fn upgrade_count(&self) -> usize {
        self.inner.script().upgrades
    }

    /// Drain the record-operation log.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut self.inner.script().log)
    }

    /// Snapshot of the records of `database`.
    pub fn records(&self, database: &str) -> BTreeMap<String, Value> {
        let db = self.inner.script().databases.get(database).cloned();
        db.map(|db| {
            let db = db.lock().unwrap_or_else(PoisonError::into_inner);
            db.containers.values().flatten().map(|(k, v)| (k.clone(), v.clone())).collect()
        })
        .unwrap_or_default()
    }
}

#[async_trait]
impl Medium for ScriptedMedium {
    fn is_available(&self) -> bool {
        !self.inner.script().unavailable
    }

    async fn probe(&self) -> Result<()> {
        if self.inner.script().probe_fails {
            return Err(StoreError::Medium("scripted probe failure".into()));
        }
        Ok(())
    }

    async fn open(&self, name: &str) -> Result<Opened> {
        self.inner.script().opens += 1;

        let mut gate = self.inner.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| StoreError::Medium(e.to_string()))?;

        let mut script = self.inner.script();
        if script.failing_opens > 0 {
            script.failing_opens -= 1;
            return Err(StoreError::Medium("scripted open failure".into()));
        }

        let db = script.databases.entry(name.to_string()).or_default().clone();
        let upgrade_needed = db.lock().unwrap_or_else(PoisonError::into_inner).version
            < SCRIPTED_SCHEMA_VERSION;

        let closed = Arc::new(AtomicBool::new(false));
        let (notify, closed_rx) = oneshot::channel();
        script.live.retain(|session| !session.abandoned());
        script.live.push(LiveSession {
            closed: Arc::clone(&closed),
            notify,
        });

        Ok(Opened {
            session: Arc::new(ScriptedSession {
                medium: Arc::clone(&self.inner),
                db,
                closed,
            }),
            upgrade_needed,
            closed: closed_rx,
        })
    }
}

struct ScriptedSession {
    medium: Arc<Inner>,
    db: Arc<Mutex<Database>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn upgrade(&self, container: &str) -> Result<()> {
        {
            let mut db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
            db.containers.entry(container.to_string()).or_default();
            db.version = SCRIPTED_SCHEMA_VERSION;
        }
        self.medium.script().upgrades += 1;
        Ok(())
    }

    fn object_store(&self, container: &str, access: Access) -> Result<Box<dyn ObjectStore>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Medium("session closed".into()));
        }
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        if !db.containers.contains_key(container) {
            return Err(StoreError::Medium(format!("no container named {}", container)));
        }
        Ok(Box::new(ScriptedObjectStore {
            medium: Arc::clone(&self.medium),
            db: Arc::clone(&self.db),
            closed: Arc::clone(&self.closed),
            container: container.to_string(),
            access,
        }))
    }
}

struct ScriptedObjectStore {
    medium: Arc<Inner>,
    db: Arc<Mutex<Database>>,
    closed: Arc<AtomicBool>,
    container: String,
    access: Access,
}

impl ScriptedObjectStore {
    /// Log the request and check that it may proceed.
    fn begin(&self, entry: String, write: bool) -> Result<()> {
        self.medium.script().log.push(entry);
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Medium("session closed".into()));
        }
        if write && self.access == Access::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Value>) -> T) -> T {
        let mut db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(db.containers.entry(self.container.clone()).or_default())
    }
}

#[async_trait]
impl ObjectStore for ScriptedObjectStore {
    async fn get(&self, key: &str) -> Result<Option<RawItem>> {
        self.begin(format!("get {}", key), false)?;

        let delay = self.medium.script().read_delays.get(key).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self.with_records(|records| {
            records
                .get(key)
                .map(|value| RawItem::new(key, value.clone()))
        }))
    }

    async fn all_keys(&self) -> Result<Vec<String>> {
        self.begin("keys".into(), false)?;
        Ok(self.with_records(|records| records.keys().cloned().collect()))
    }

    async fn put(&self, item: RawItem) -> Result<()> {
        self.begin(format!("put {}", item.key), true)?;
        self.with_records(|records| records.insert(item.key, item.value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.begin(format!("delete {}", key), true)?;
        self.with_records(|records| records.remove(key));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.begin("clear".into(), true)?;
        self.with_records(|records| records.clear());
        Ok(())
    }
}
