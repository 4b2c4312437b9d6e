//! `tether-session` — persistent controller-connection management.
//!
//! Maintains a long-lived WebSocket session to a remote controller,
//! routes inbound `call` frames to a [`CallExecutor`], and answers with
//! correlated responses. The crate owns the unglamorous parts: capped
//! exponential-backoff reconnection, a bounded outbound queue that
//! survives outages, heartbeat pings, and inbound frame validation.
//!
//! # Session flow
//!
//! 1. [`SessionManager::start`] loads the persisted [`ConnectionStatus`]
//!    (connecting immediately when `should_connect` was stored) and
//!    returns a cloneable [`SessionHandle`].
//! 2. Main loop:
//!    - On `call`: dispatch to the executor, always answer with a
//!      correlated `call_response` — success-tagged or error-tagged.
//!    - On `ping`: reply `pong`, echoing the request id.
//!    - Emit a periodic `ping` (10s) to keep the link warm.
//! 3. On disconnect: reconnect with exponential back-off
//!    (1s doubling to 30s, 10 attempts, then wait for an explicit
//!    [`connect`](SessionHandle::connect)).
//! 4. Frames sent while offline are queued (capacity 100, drop-oldest)
//!    and flushed in order on the next successful connect.
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_session::{CallExecutor, CallResult, SessionBuilder};
//!
//! struct DomExecutor;
//!
//! #[async_trait::async_trait]
//! impl CallExecutor for DomExecutor {
//!     async fn execute(&self, payload: serde_json::Value) -> CallResult {
//!         Ok(serde_json::json!({ "handled": payload }))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), tether_session::SessionError> {
//! let handle = SessionBuilder::new()
//!     .url("ws://localhost:18765")
//!     .executor(DomExecutor)
//!     .build()?
//!     .start()
//!     .await;
//!
//! handle.connect(None)?;
//! // ... the manager keeps the session alive from here on ...
//! handle.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod error;
pub mod executor;
pub mod manager;
pub mod queue;
pub mod reconnect;
mod router;
pub mod store;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::SessionBuilder;
pub use error::SessionError;
pub use executor::{CallError, CallExecutor, CallResult};
pub use manager::{SessionHandle, SessionManager};
pub use queue::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use reconnect::ReconnectPolicy;
pub use store::{ConnectionStatus, MemoryStatusStore, StatusStore, StoreError, DEFAULT_URL};

// Re-export the wire types so hosts never need to import
// tether-protocol directly.
pub use tether_protocol::{CallOutcome, Frame, MAX_FRAME_BYTES};
