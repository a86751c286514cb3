//! Session-based media.
//!
//! A medium is a host storage API that hands out sessions asynchronously,
//! may refuse to open, and may close a live session without being asked.
//! [`SessionDriver`](crate::session::SessionDriver) turns any medium into a
//! [`Driver`](crate::traits::Driver).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::traits::RawItem;

/// Declared access mode of an object store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// A freshly opened session.
pub struct Opened {
    /// The live session.
    pub session: Arc<dyn Session>,
    /// True when the schema has never been created for this store.
    pub upgrade_needed: bool,
    /// Resolves (or errors) when the medium closes the session on its own.
    pub closed: oneshot::Receiver<()>,
}

/// A host storage API.
#[async_trait]
pub trait Medium: Send + Sync + 'static {
    /// Cheap environment check: does this host plausibly support the medium?
    fn is_available(&self) -> bool;

    /// Capability probe. Opens a throwaway auxiliary database and reports
    /// whether that worked.
    async fn probe(&self) -> Result<()>;

    /// Open a session on the database called `name`.
    async fn open(&self, name: &str) -> Result<Opened>;
}

/// One live connection to a medium.
#[async_trait]
pub trait Session: Send + Sync {
    /// Create the record container. Called only when `Opened::upgrade_needed`.
    async fn upgrade(&self, container: &str) -> Result<()>;

    /// Get a handle on `container` for the given access mode.
    fn object_store(&self, container: &str, access: Access) -> Result<Box<dyn ObjectStore>>;
}

/// Record operations on one container of a session.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RawItem>>;

    async fn all_keys(&self) -> Result<Vec<String>>;

    async fn put(&self, item: RawItem) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}
