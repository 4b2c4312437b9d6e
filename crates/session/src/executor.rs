//! The call executor seam — the collaborator that performs the action a
//! `call` frame asks for.

use async_trait::async_trait;

/// Result type for executor invocations.
pub type CallResult = Result<serde_json::Value, CallError>;

/// Implement this to handle `call` requests from the controller.
///
/// Invocations are dispatched off the manager's event loop, so a slow
/// executor delays only its own response — heartbeats, reconnects, and
/// other inbound frames keep flowing. Concurrency is bounded by the
/// manager's `max_concurrent_calls` setting.
#[async_trait]
pub trait CallExecutor: Send + Sync + 'static {
    /// Execute the request. `payload` is the opaque body of the inbound
    /// `call` frame (JSON `null` when the frame carried none).
    async fn execute(&self, payload: serde_json::Value) -> CallResult;
}

/// Errors an executor can return.
///
/// The manager renders these into the error-tagged `call_response`
/// payload as the display string; they never close the connection.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CallError {
    #[error("invalid_payload: {0}")]
    InvalidPayload(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("failed: {0}")]
    Failed(String),
}
