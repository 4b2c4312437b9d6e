//! Connection status and its persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Controller endpoint used when no status has been persisted.
pub const DEFAULT_URL: &str = "ws://localhost:18765";

/// Last known connection state, mirrored to a [`StatusStore`] on every
/// mutation.
///
/// The mirror is best-effort: live connectivity is always derived from
/// the transport handle, never read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Last known transport state.
    pub is_connected: bool,
    /// Policy intent: whether the manager should keep a connection up.
    /// Survives restarts independently of `is_connected`.
    pub should_connect: bool,
    /// Target endpoint.
    pub url: String,
    /// Set on every status mutation.
    pub last_updated: DateTime<Utc>,
}

impl ConnectionStatus {
    /// The fallback used when the store is empty or unreadable:
    /// disconnected, no connect intent, default endpoint.
    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            should_connect: false,
            url: DEFAULT_URL.to_string(),
            last_updated: Utc::now(),
        }
    }
}

/// Store read/write failure. Logged by the manager, never fatal.
#[derive(thiserror::Error, Debug)]
#[error("status store: {0}")]
pub struct StoreError(pub String);

/// Persistence backend for [`ConnectionStatus`].
#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    /// Load the persisted status, `None` when nothing was stored yet.
    async fn load(&self) -> Result<Option<ConnectionStatus>, StoreError>;

    /// Persist a snapshot.
    async fn save(&self, status: &ConnectionStatus) -> Result<(), StoreError>;
}

/// In-memory store. Keeps the manager usable without a host-supplied
/// backend; also serves as the test double.
#[derive(Default)]
pub struct MemoryStatusStore {
    inner: Mutex<Option<ConnectionStatus>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn load(&self) -> Result<Option<ConnectionStatus>, StoreError> {
        Ok(self.inner.lock().clone())
    }

    async fn save(&self, status: &ConnectionStatus) -> Result<(), StoreError> {
        *self.inner.lock() = Some(status.clone());
        Ok(())
    }
}
