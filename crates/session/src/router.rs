//! Inbound frame validation and classification.
//!
//! Every inbound text frame is classified into a [`Routed`] disposition
//! for the manager to act on. Rejection answers the peer with an `error`
//! frame where a correlation id is recoverable; it never closes the
//! connection.

use tether_protocol::Frame;

pub(crate) const INVALID_FRAME: &str = "invalid message format received";
pub(crate) const FRAME_TOO_LARGE: &str = "message exceeds maximum frame size";

/// What to do with one inbound frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Routed {
    /// Send this reply (a `pong` or an `error` frame).
    Reply(Frame),
    /// Dispatch the payload to the call executor.
    Call {
        request_id: Option<String>,
        payload: serde_json::Value,
    },
    /// Accepted with no reply required.
    Acknowledged,
    /// Dropped: no correlation id recoverable, failure only logged.
    Rejected,
}

/// Build an outbound `error` frame, correlated when an id is known.
pub(crate) fn error_frame(
    response_to_request_id: Option<String>,
    error: impl Into<String>,
) -> Frame {
    Frame::Error {
        response_to_request_id,
        error: error.into(),
    }
}

/// Classify one inbound text frame.
pub(crate) fn route(text: &str, max_frame_bytes: usize) -> Routed {
    if text.len() > max_frame_bytes {
        tracing::warn!(
            bytes = text.len(),
            max = max_frame_bytes,
            "inbound frame exceeds size limit"
        );
        // Still try to recover a request id so the peer learns why its
        // request went unanswered.
        return match serde_json::from_str::<serde_json::Value>(text) {
            Ok(raw) => Routed::Reply(error_frame(request_id_of(&raw), FRAME_TOO_LARGE)),
            Err(err) => {
                tracing::debug!(error = %err, "oversized frame not parseable, dropping");
                Routed::Rejected
            }
        };
    }

    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::debug!(error = %err, "failed to parse inbound frame");
            return Routed::Rejected;
        }
    };
    let request_id = request_id_of(&raw);

    let kind = match raw.get("type").and_then(serde_json::Value::as_str) {
        Some(kind) => kind.to_string(),
        None => {
            tracing::warn!("inbound frame missing type field");
            return Routed::Reply(error_frame(request_id, INVALID_FRAME));
        }
    };

    match kind.as_str() {
        "ping" | "pong" | "call" => match serde_json::from_value::<Frame>(raw) {
            Ok(Frame::Ping { request_id }) => Routed::Reply(Frame::Pong {
                response_to_request_id: request_id,
            }),
            Ok(Frame::Pong {
                response_to_request_id,
            }) => {
                tracing::debug!(
                    response_to = response_to_request_id.as_deref().unwrap_or(""),
                    "pong received"
                );
                Routed::Acknowledged
            }
            Ok(Frame::Call {
                request_id,
                payload,
            }) => Routed::Call {
                request_id,
                payload,
            },
            Ok(_) | Err(_) => {
                tracing::warn!(kind = %kind, "inbound frame failed envelope validation");
                Routed::Reply(error_frame(request_id, INVALID_FRAME))
            }
        },
        other => {
            tracing::warn!(kind = other, "unsupported inbound frame type");
            Routed::Reply(error_frame(
                request_id,
                format!("unsupported message type: {other}"),
            ))
        }
    }
}

fn request_id_of(raw: &serde_json::Value) -> Option<String> {
    raw.get("requestId")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
}
