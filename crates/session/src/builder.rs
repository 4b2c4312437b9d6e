//! Builder pattern for constructing a [`SessionManager`].

use std::sync::Arc;
use std::time::Duration;

use tether_protocol::MAX_FRAME_BYTES;

use crate::error::SessionError;
use crate::executor::CallExecutor;
use crate::manager::SessionManager;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::reconnect::ReconnectPolicy;
use crate::store::{MemoryStatusStore, StatusStore};

/// Fluent builder for [`SessionManager`].
///
/// # Example
///
/// ```rust,no_run
/// # use tether_session::{SessionBuilder, CallExecutor, CallResult};
/// # struct Fetch;
/// # #[async_trait::async_trait]
/// # impl CallExecutor for Fetch {
/// #     async fn execute(&self, payload: serde_json::Value) -> CallResult { Ok(payload) }
/// # }
/// # async fn demo() {
/// let handle = SessionBuilder::new()
///     .url("ws://localhost:18765")
///     .executor(Fetch)
///     .heartbeat_interval(std::time::Duration::from_secs(10))
///     .build()
///     .unwrap()
///     .start()
///     .await;
/// handle.connect(None).unwrap();
/// # }
/// ```
pub struct SessionBuilder {
    url: Option<String>,
    heartbeat_interval: Duration,
    reconnect: ReconnectPolicy,
    queue_capacity: usize,
    max_frame_bytes: usize,
    max_concurrent_calls: usize,
    executor: Option<Arc<dyn CallExecutor>>,
    store: Option<Arc<dyn StatusStore>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            heartbeat_interval: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_bytes: MAX_FRAME_BYTES,
            max_concurrent_calls: 16,
            executor: None,
            store: None,
        }
    }

    /// Controller endpoint. Overrides any persisted URL; when unset the
    /// persisted URL (or the default) is used.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The executor that handles inbound `call` requests. Required.
    pub fn executor<E: CallExecutor>(mut self, executor: E) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Status persistence backend (default: in-memory).
    pub fn status_store<S: StatusStore>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Pre-wrapped status store, for hosts that keep their own handle
    /// to it.
    pub fn shared_status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the heartbeat period (default 10s).
    pub fn heartbeat_interval(mut self, period: Duration) -> Self {
        self.heartbeat_interval = period;
        self
    }

    /// Override the reconnect back-off policy.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Outbound queue capacity (default 100).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Maximum inbound frame size in bytes (default 1 MiB).
    pub fn max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// Maximum concurrent executor calls (default 16).
    pub fn max_concurrent_calls(mut self, calls: usize) -> Self {
        self.max_concurrent_calls = calls;
        self
    }

    /// Build the [`SessionManager`].
    pub fn build(self) -> Result<SessionManager, SessionError> {
        let executor = self
            .executor
            .ok_or_else(|| SessionError::Config("an executor is required".into()))?;
        if let Some(url) = &self.url {
            if url.is_empty() {
                return Err(SessionError::Config("url must not be empty".into()));
            }
        }
        if self.queue_capacity == 0 {
            return Err(SessionError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(SessionError::Config(
                "max_frame_bytes must be at least 1".into(),
            ));
        }
        if self.max_concurrent_calls == 0 {
            return Err(SessionError::Config(
                "max_concurrent_calls must be at least 1".into(),
            ));
        }

        Ok(SessionManager {
            url: self.url,
            heartbeat_interval: self.heartbeat_interval,
            reconnect: self.reconnect,
            queue_capacity: self.queue_capacity,
            max_frame_bytes: self.max_frame_bytes,
            max_concurrent_calls: self.max_concurrent_calls,
            executor,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStatusStore::new())),
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
