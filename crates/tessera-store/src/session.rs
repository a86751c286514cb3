//! Session driver: a [`Driver`] over any [`Medium`].
//!
//! The driver owns the connection lifecycle:
//!
//! ```text
//!  Uninitialized ──open──▶ Opening ──success──▶ Open
//!        ▲                    │                  │
//!        └──────failure───────┘         unsolicited close
//!                             ▲                  │
//!                             └──reopen delay── Closed
//! ```
//!
//! Operations that need the session while it is `Opening` or `Closed` are
//! parked on the open-job queue and resumed, in arrival order, by the next
//! successful open. At most one open attempt is in flight at a time.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::medium::{Access, Medium, ObjectStore, Session};
use crate::traits::{Driver, DriverKind, RawItem};

/// Name of the single record container inside a session database.
pub const RECORD_CONTAINER: &str = "tessera";

/// Per-record ceiling for session media (100 MiB).
pub const SESSION_ITEM_SIZE_LIMIT: usize = 100 * 1024 * 1024;

/// Delay between an unsolicited close and the reopen attempt.
pub const DEFAULT_REOPEN_DELAY: Duration = Duration::from_millis(10);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Opening,
    Open,
    Closed,
}

/// Configuration for the session driver.
#[derive(Debug, Clone)]
pub struct SessionDriverConfig {
    /// Wait before reopening after an unsolicited close.
    pub reopen_delay: Duration,
    /// Ceiling reported through [`Driver::max_raw_size`].
    pub max_raw_size: usize,
}

impl Default for SessionDriverConfig {
    fn default() -> Self {
        Self {
            reopen_delay: DEFAULT_REOPEN_DELAY,
            max_raw_size: SESSION_ITEM_SIZE_LIMIT,
        }
    }
}

struct Connection {
    state: ConnectionState,
    session: Option<Arc<dyn Session>>,
    /// Bumped on every successful open; stale close notifications are ignored.
    generation: u64,
    open_jobs: VecDeque<oneshot::Sender<()>>,
}

impl Connection {
    fn park(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.open_jobs.push_back(tx);
        rx
    }
}

struct Shared<M> {
    name: String,
    medium: Arc<M>,
    config: SessionDriverConfig,
    connection: Mutex<Connection>,
    /// Never sent on; close watchers exit once this is dropped with the driver.
    shutdown: watch::Sender<()>,
}

/// An open attempt in flight. Unless settled, dropping it returns the
/// connection to `Uninitialized`, whether the attempt failed or its future
/// was cancelled.
struct OpenAttempt<'a, M: Medium> {
    shared: &'a Shared<M>,
    settled: bool,
}

impl<M: Medium> Drop for OpenAttempt<'_, M> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.fail_open();
        }
    }
}

/// Driver over a session-based medium.
pub struct SessionDriver<M: Medium> {
    shared: Arc<Shared<M>>,
}

impl<M: Medium> SessionDriver<M> {
    /// Create a driver for the store `name` with default configuration.
    pub fn new(name: impl Into<String>, medium: Arc<M>) -> Self {
        Self::with_config(name, medium, SessionDriverConfig::default())
    }

    /// Create a driver with explicit configuration.
    pub fn with_config(name: impl Into<String>, medium: Arc<M>, config: SessionDriverConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                medium,
                config,
                connection: Mutex::new(Connection {
                    state: ConnectionState::Uninitialized,
                    session: None,
                    generation: 0,
                    open_jobs: VecDeque::new(),
                }),
                shutdown: watch::channel(()).0,
            }),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Number of operations parked on the open-job queue.
    pub fn pending_jobs(&self) -> usize {
        self.shared.lock().open_jobs.len()
    }
}

impl<M: Medium> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the connection up, joining an open already in flight.
    async fn open(self: &Arc<Self>) -> Result<()> {
        loop {
            let waiter = {
                let mut conn = self.lock();
                match conn.state {
                    ConnectionState::Open if conn.session.is_some() => return Ok(()),
                    ConnectionState::Opening => Some(conn.park()),
                    _ => {
                        conn.state = ConnectionState::Opening;
                        None
                    }
                }
            };

            match waiter {
                Some(waiter) => {
                    let _ = waiter.await;
                    if self.lock().state == ConnectionState::Uninitialized {
                        return Err(StoreError::StorageNotAvailable);
                    }
                }
                None => return self.connect().await,
            }
        }
    }

    /// Perform one open attempt. The caller has already moved to `Opening`.
    async fn connect(self: &Arc<Self>) -> Result<()> {
        debug!(store = %self.name, "opening session");
        let mut attempt = OpenAttempt {
            shared: self.as_ref(),
            settled: false,
        };

        let opened = self.medium.open(&self.name).await?;
        if opened.upgrade_needed {
            debug!(store = %self.name, container = RECORD_CONTAINER, "creating record container");
            opened.session.upgrade(RECORD_CONTAINER).await?;
        }
        attempt.settled = true;

        let (generation, jobs) = {
            let mut conn = self.lock();
            conn.generation += 1;
            conn.state = ConnectionState::Open;
            conn.session = Some(opened.session);
            (conn.generation, std::mem::take(&mut conn.open_jobs))
        };

        debug!(store = %self.name, jobs = jobs.len(), "session open");
        for job in jobs {
            let _ = job.send(());
        }

        self.watch_close(generation, opened.closed);
        Ok(())
    }

    fn fail_open(&self) {
        let jobs = {
            let mut conn = self.lock();
            conn.state = ConnectionState::Uninitialized;
            conn.session = None;
            std::mem::take(&mut conn.open_jobs)
        };
        // Dropping the senders wakes the parked operations; they re-request
        // the handle and observe `Uninitialized`.
        drop(jobs);
    }

    fn watch_close(self: &Arc<Self>, generation: u64, closed: oneshot::Receiver<()>) {
        let shared = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed => {}
                _ = shutdown.changed() => return,
            }
            if let Some(shared) = shared.upgrade() {
                shared.on_unsolicited_close(generation);
            }
        });
    }

    fn on_unsolicited_close(self: &Arc<Self>, generation: u64) {
        {
            let mut conn = self.lock();
            if conn.generation != generation || conn.state != ConnectionState::Open {
                return;
            }
            conn.session = None;
            conn.state = ConnectionState::Closed;
        }

        let delay = self.config.reopen_delay;
        warn!(store = %self.name, ?delay, "session closed unexpectedly, scheduling reopen");

        let shared = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.reopen().await;
            }
        });
    }

    async fn reopen(self: &Arc<Self>) {
        {
            let mut conn = self.lock();
            if conn.state != ConnectionState::Closed {
                return;
            }
            conn.state = ConnectionState::Opening;
        }

        if let Err(e) = self.connect().await {
            warn!(store = %self.name, error = %e, "reopen failed");
        }
    }

    /// Get an object store handle, waiting out a reconnect if one is underway.
    async fn object_store(&self, access: Access) -> Result<Box<dyn ObjectStore>> {
        loop {
            let waiter = {
                let mut conn = self.lock();
                if let Some(session) = &conn.session {
                    return session.object_store(RECORD_CONTAINER, access);
                }
                match conn.state {
                    ConnectionState::Uninitialized | ConnectionState::Open => {
                        return Err(StoreError::StorageNotInitialized)
                    }
                    ConnectionState::Opening | ConnectionState::Closed => conn.park(),
                }
            };

            let _ = waiter.await;
        }
    }
}

#[async_trait]
impl<M: Medium> Driver for SessionDriver<M> {
    fn kind(&self) -> DriverKind {
        DriverKind::Session
    }

    fn max_raw_size(&self) -> usize {
        self.shared.config.max_raw_size
    }

    async fn init(&self) -> Result<()> {
        let shared = &self.shared;

        if !shared.medium.is_available() {
            debug!(store = %shared.name, "medium reports unavailable");
            return Err(StoreError::StorageNotAvailable);
        }
        if let Err(e) = shared.medium.probe().await {
            debug!(store = %shared.name, error = %e, "capability probe failed");
            return Err(StoreError::StorageNotAvailable);
        }

        shared.open().await.map_err(|e| {
            warn!(store = %shared.name, error = %e, "failed to open session");
            StoreError::StorageNotAvailable
        })
    }

    async fn clear(&self) -> Result<()> {
        let store = self.shared.object_store(Access::ReadWrite).await?;
        store.clear().await
    }

    async fn all_raw_keys(&self) -> Result<Vec<String>> {
        let store = self.shared.object_store(Access::ReadOnly).await?;
        store.all_keys().await
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Value>> {
        let store = self.shared.object_store(Access::ReadOnly).await?;
        Ok(store.get(key).await?.map(|item| item.value))
    }

    async fn set_raw(&self, items: Vec<RawItem>) -> Result<()> {
        let store = self.shared.object_store(Access::ReadWrite).await?;
        try_join_all(items.into_iter().map(|item| store.put(item))).await?;
        Ok(())
    }

    async fn remove_raw(&self, keys: Vec<String>) -> Result<()> {
        let store = self.shared.object_store(Access::ReadWrite).await?;
        try_join_all(keys.iter().map(|key| store.delete(key))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedMedium;
    use serde_json::json;

    fn driver(medium: &Arc<ScriptedMedium>) -> Arc<SessionDriver<ScriptedMedium>> {
        Arc::new(SessionDriver::with_config(
            "churn",
            Arc::clone(medium),
            SessionDriverConfig {
                reopen_delay: Duration::from_millis(5),
                ..Default::default()
            },
        ))
    }

    async fn wait_for_state(driver: &SessionDriver<ScriptedMedium>, state: ConnectionState) {
        while driver.state() != state {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn wait_for_pending(driver: &SessionDriver<ScriptedMedium>, count: usize) {
        while driver.pending_jobs() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_init_opens_and_upgrades_once() {
        let medium = ScriptedMedium::new();
        let driver = driver(&medium);
        assert_eq!(driver.state(), ConnectionState::Uninitialized);

        driver.init().await.unwrap();
        assert_eq!(driver.state(), ConnectionState::Open);
        assert_eq!(medium.open_count(), 1);
        assert_eq!(medium.upgrade_count(), 1);

        // A second driver on the same database finds the schema in place.
        let again = SessionDriver::new("churn", Arc::clone(&medium));
        again.init().await.unwrap();
        assert_eq!(medium.open_count(), 2);
        assert_eq!(medium.upgrade_count(), 1);
    }

    #[tokio::test]
    async fn test_init_twice_is_noop() {
        let medium = ScriptedMedium::new();
        let driver = driver(&medium);
        driver.init().await.unwrap();
        driver.init().await.unwrap();
        assert_eq!(medium.open_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_medium() {
        let medium = ScriptedMedium::new();
        medium.set_available(false);
        let err = driver(&medium).init().await.unwrap_err();
        assert!(matches!(err, StoreError::StorageNotAvailable));
        assert_eq!(medium.open_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_probe_skips_open() {
        let medium = ScriptedMedium::new();
        medium.fail_probe(true);
        let err = driver(&medium).init().await.unwrap_err();
        assert!(matches!(err, StoreError::StorageNotAvailable));
        assert_eq!(medium.open_count(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_returns_to_uninitialized() {
        let medium = ScriptedMedium::new();
        medium.fail_next_opens(1);
        let driver = driver(&medium);

        let err = driver.init().await.unwrap_err();
        assert!(matches!(err, StoreError::StorageNotAvailable));
        assert_eq!(driver.state(), ConnectionState::Uninitialized);

        // Never opened: raw operations fail fast.
        let err = driver.get_raw("a.0").await.unwrap_err();
        assert!(matches!(err, StoreError::StorageNotInitialized));

        // The driver can still recover on the next init.
        driver.init().await.unwrap();
        assert_eq!(driver.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_raw_operations() {
        let medium = ScriptedMedium::new();
        let driver = driver(&medium);
        driver.init().await.unwrap();

        driver
            .set_raw(vec![
                RawItem::new("a.0", json!({ "data": "x" })),
                RawItem::new("b.0", json!({ "data": "y" })),
            ])
            .await
            .unwrap();
        assert_eq!(
            driver.get_raw("a.0").await.unwrap(),
            Some(json!({ "data": "x" }))
        );

        driver.remove_raw(vec!["a.0".into()]).await.unwrap();
        assert_eq!(driver.get_raw("a.0").await.unwrap(), None);
        assert_eq!(driver.all_raw_keys().await.unwrap(), vec!["b.0"]);

        driver.clear().await.unwrap();
        assert!(driver.all_raw_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_after_unsolicited_close() {
        let medium = ScriptedMedium::new();
        let driver = driver(&medium);
        driver.init().await.unwrap();
        driver
            .set_raw(vec![RawItem::new("a.0", json!("kept"))])
            .await
            .unwrap();

        medium.close_all();
        while medium.open_count() < 2 || driver.state() != ConnectionState::Open {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(medium.open_count(), 2);
        assert_eq!(medium.upgrade_count(), 1);
        assert_eq!(driver.get_raw("a.0").await.unwrap(), Some(json!("kept")));
    }

    #[tokio::test]
    async fn test_requests_during_reconnect_complete_in_order() {
        let medium = ScriptedMedium::new();
        let driver = driver(&medium);
        driver.init().await.unwrap();
        driver
            .set_raw(vec![
                RawItem::new("a.0", json!(1)),
                RawItem::new("b.0", json!(2)),
                RawItem::new("c.0", json!(3)),
            ])
            .await
            .unwrap();

        medium.pause_opens();
        medium.close_all();
        wait_for_state(&driver, ConnectionState::Opening).await;
        medium.take_log();

        let mut handles = Vec::new();
        for (i, key) in ["a.0", "b.0", "c.0"].into_iter().enumerate() {
            let worker = Arc::clone(&driver);
            handles.push(tokio::spawn(async move { worker.get_raw(key).await }));
            wait_for_pending(&driver, i + 1).await;
        }
        assert_eq!(driver.state(), ConnectionState::Opening);

        medium.resume_opens();

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(values, vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]);
        assert_eq!(medium.take_log(), vec!["get a.0", "get b.0", "get c.0"]);
        assert_eq!(driver.pending_jobs(), 0);
    }

    #[tokio::test]
    async fn test_failed_reopen_releases_waiters() {
        let medium = ScriptedMedium::new();
        let driver = driver(&medium);
        driver.init().await.unwrap();

        medium.pause_opens();
        medium.fail_next_opens(1);
        medium.close_all();
        wait_for_state(&driver, ConnectionState::Opening).await;

        let waiting = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.get_raw("a.0").await })
        };
        wait_for_pending(&driver, 1).await;
        medium.resume_opens();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::StorageNotInitialized));
        assert_eq!(driver.state(), ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_concurrent_init_opens_once() {
        let medium = ScriptedMedium::new();
        medium.pause_opens();
        let driver = driver(&medium);

        let first = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.init().await })
        };
        wait_for_state(&driver, ConnectionState::Opening).await;

        let second = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.init().await })
        };
        wait_for_pending(&driver, 1).await;

        medium.resume_opens();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(medium.open_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_init_leaves_driver_usable() {
        let medium = ScriptedMedium::new();
        medium.pause_opens();
        let driver = driver(&medium);

        let waiting = {
            let worker = Arc::clone(&driver);
            tokio::spawn(async move {
                wait_for_state(&worker, ConnectionState::Opening).await;
                worker.shared.object_store(Access::ReadOnly).await.map(|_| ())
            })
        };
        let timed_out = tokio::time::timeout(Duration::from_millis(20), driver.init()).await;
        assert!(timed_out.is_err());
        assert_eq!(driver.state(), ConnectionState::Uninitialized);
        assert_eq!(driver.pending_jobs(), 0);

        // Anything parked behind the abandoned open is released.
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::StorageNotInitialized));

        medium.resume_opens();
        driver.init().await.unwrap();
        assert_eq!(driver.state(), ConnectionState::Open);
        driver.set_raw(vec![RawItem::new("a.0", json!(1))]).await.unwrap();
        assert_eq!(driver.get_raw("a.0").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_dropped_drivers_release_their_sessions() {
        let medium = ScriptedMedium::new();
        for _ in 0..5 {
            let driver = driver(&medium);
            driver.init().await.unwrap();
        }

        // Each dropped driver's close watcher exits and lets go of its session.
        for _ in 0..100 {
            if medium.live_sessions() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(medium.live_sessions(), 0);

        let driver = driver(&medium);
        driver.init().await.unwrap();
        assert_eq!(medium.live_sessions(), 1);
        assert_eq!(medium.open_count(), 6);
    }

    #[tokio::test]
    async fn test_readonly_handle_rejects_writes() {
        let medium = ScriptedMedium::new();
        let driver = driver(&medium);
        driver.init().await.unwrap();

        let store = driver.shared.object_store(Access::ReadOnly).await.unwrap();
        let err = store.put(RawItem::new("a.0", json!(1))).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
    }
}
