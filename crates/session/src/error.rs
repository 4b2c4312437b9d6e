//! Top-level session error type.

/// Errors surfaced by the public [`SessionHandle`](crate::SessionHandle) API.
///
/// Transport failures never appear here: a frame that cannot be
/// transmitted is absorbed into the outbound queue, and connection
/// drops are handled by the reconnect policy.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// The builder rejected the configuration.
    #[error("config: {0}")]
    Config(String),

    /// The manager task has stopped; no further commands are accepted.
    #[error("session manager is shut down")]
    Shutdown,
}
