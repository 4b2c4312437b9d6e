//! Wire protocol: the frame envelope exchanged with the controller.
//!
//! Every frame is one JSON text message. Requests that expect a reply
//! carry a `requestId`; the reply echoes it as `responseToRequestId`.
//! A frame with neither field is a fire-and-forget notification.

use serde::{Deserialize, Serialize};

/// Maximum size of a single text frame, in bytes (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Frame envelope, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Bidirectional liveness probe. Carries no payload.
    #[serde(rename_all = "camelCase")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Liveness reply, correlated when the probe carried a request id.
    #[serde(rename_all = "camelCase")]
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_to_request_id: Option<String>,
    },

    /// Controller → client: execute an action. The payload shape is
    /// owned by the executor, not the protocol.
    #[serde(rename_all = "camelCase")]
    Call {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        payload: serde_json::Value,
    },

    /// Client → controller: correlated result of a `call`.
    #[serde(rename_all = "camelCase")]
    CallResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_to_request_id: Option<String>,
        payload: CallOutcome,
    },

    /// Failure signal, correlated when a request id was recoverable.
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_to_request_id: Option<String>,
        error: String,
    },
}

impl Frame {
    /// Wire name of this frame's `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
            Frame::Call { .. } => "call",
            Frame::CallResponse { .. } => "call_response",
            Frame::Error { .. } => "error",
        }
    }
}

/// Result payload carried by a `call_response`, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CallOutcome {
    /// The executor completed; `data` is its raw result.
    Success { data: serde_json::Value },
    /// The executor failed; `error` describes why.
    Error { error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_without_request_id_is_bare() {
        let json = serde_json::to_value(Frame::Ping { request_id: None }).unwrap();
        assert_eq!(json, json!({ "type": "ping" }));
    }

    #[test]
    fn correlation_fields_use_camel_case() {
        let pong = Frame::Pong {
            response_to_request_id: Some("abc".into()),
        };
        assert_eq!(
            serde_json::to_value(pong).unwrap(),
            json!({ "type": "pong", "responseToRequestId": "abc" })
        );

        let call: Frame = serde_json::from_value(json!({
            "type": "call",
            "requestId": "r1",
            "payload": { "op": "fetch" }
        }))
        .unwrap();
        assert_eq!(
            call,
            Frame::Call {
                request_id: Some("r1".into()),
                payload: json!({ "op": "fetch" }),
            }
        );
    }

    #[test]
    fn call_response_tags_status() {
        let ok = Frame::CallResponse {
            response_to_request_id: Some("r1".into()),
            payload: CallOutcome::Success { data: json!([1, 2]) },
        };
        assert_eq!(
            serde_json::to_value(ok).unwrap(),
            json!({
                "type": "call_response",
                "responseToRequestId": "r1",
                "payload": { "status": "success", "data": [1, 2] }
            })
        );

        let failed = Frame::CallResponse {
            response_to_request_id: Some("r2".into()),
            payload: CallOutcome::Error {
                error: "no such operation".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(failed).unwrap(),
            json!({
                "type": "call_response",
                "responseToRequestId": "r2",
                "payload": { "status": "error", "error": "no such operation" }
            })
        );
    }

    #[test]
    fn call_payload_defaults_to_null() {
        let call: Frame = serde_json::from_value(json!({ "type": "call", "requestId": "r9" })).unwrap();
        assert_eq!(
            call,
            Frame::Call {
                request_id: Some("r9".into()),
                payload: serde_json::Value::Null,
            }
        );
    }

    #[test]
    fn kind_matches_wire_tag() {
        let frames = [
            Frame::Ping { request_id: None },
            Frame::Pong { response_to_request_id: None },
            Frame::Call { request_id: None, payload: serde_json::Value::Null },
            Frame::CallResponse {
                response_to_request_id: None,
                payload: CallOutcome::Success { data: serde_json::Value::Null },
            },
            Frame::Error { response_to_request_id: None, error: "x".into() },
        ];
        for frame in frames {
            let wire = serde_json::to_value(&frame).unwrap();
            assert_eq!(wire["type"], frame.kind());
        }
    }
}
