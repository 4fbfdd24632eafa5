//! Session cache backends.
//!
//! The cache holds exactly one pair: the backend bearer token and the last
//! known principal snapshot. The pair is written and cleared together,
//! never one half without the other; a snapshot missing either half reads
//! back as no session at all.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::principal::Principal;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The persisted pair: backend bearer token plus principal snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub token: String,
    pub principal: Principal,
}

impl SessionSnapshot {
    /// Presence of both halves is necessary and sufficient for
    /// "is authenticated" to hold.
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty()
    }
}

/// Storage for the cached session pair.
///
/// Implementations must be thread-safe; the synchronizer and background
/// tasks access the store concurrently.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the cached pair. Incomplete snapshots read as `None`.
    async fn load(&self) -> SessionResult<Option<SessionSnapshot>>;

    /// Persist the pair, replacing any previous one atomically.
    async fn store(&self, snapshot: &SessionSnapshot) -> SessionResult<()>;

    /// Remove the pair. Clearing an empty store is a no-op.
    async fn clear(&self) -> SessionResult<()>;
}

pub type SharedSessionStore = Arc<dyn SessionStore>;

/// In-memory store for tests and short-lived processes.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Option<SessionSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> SessionResult<Option<SessionSnapshot>> {
        Ok(self.inner.lock().clone().filter(SessionSnapshot::is_complete))
    }

    async fn store(&self, snapshot: &SessionSnapshot) -> SessionResult<()> {
        *self.inner.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn clear(&self) -> SessionResult<()> {
        *self.inner.lock() = None;
        Ok(())
    }
}

/// Durable single-file store.
///
/// Writes go to a temp file in the same directory followed by a rename, so
/// the token/principal pair is replaced atomically and can never be
/// observed half-written.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> SessionResult<Option<SessionSnapshot>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot: SessionSnapshot = serde_json::from_str(&contents)?;
        if !snapshot.is_complete() {
            tracing::warn!("Cached session snapshot is incomplete, treating as signed out");
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    async fn store(&self, snapshot: &SessionSnapshot) -> SessionResult<()> {
        let contents = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, &contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    async fn clear(&self) -> SessionResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
