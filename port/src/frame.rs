//! Wire frames for the port protocol.
//!
//! Requests and responses are correlated by per-channel sequence
//! numbers: ids are assigned in increasing order by the caller and
//! never reused while a response is outstanding. A channel normally
//! carries structured frames; transports that cannot are fed the
//! string-serialized fallback, and both sides detect and decode either
//! form transparently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PortError;

/// Sequence number correlating a request with its response.
pub type CallId = u64;

/// A remote invocation: command name first, then its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: CallId,
    pub args: Vec<Value>,
}

/// Error shape that survives the context boundary: only serializable
/// fields, nothing transport- or event-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl WireError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind.into()),
        }
    }
}

/// The answer to one request, matched by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: CallId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(id: CallId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: CallId, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Everything that travels over an established channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request(Request),
    Response(Response),
}

/// Transport envelope: structured, or the string-serialized fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Frame(Frame),
    Text(String),
}

impl Envelope {
    /// Decode either envelope form into a frame.
    pub fn decode(self) -> Result<Frame, PortError> {
        match self {
            Envelope::Frame(frame) => Ok(frame),
            Envelope::Text(text) => {
                serde_json::from_str(&text).map_err(|e| PortError::Codec(e.to_string()))
            }
        }
    }

    /// Encode a frame into the string fallback form.
    pub fn text(frame: &Frame) -> Result<Self, PortError> {
        let text = serde_json::to_string(frame).map_err(|e| PortError::Codec(e.to_string()))?;
        Ok(Envelope::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_format() {
        let frame = Frame::Request(Request {
            id: 3,
            args: vec![json!("getStyles"), json!({"enabled": true})],
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"request""#));
        assert!(json.contains(r#""id":3"#));
    }

    #[test]
    fn response_skips_absent_fields() {
        let ok = serde_json::to_string(&Frame::Response(Response::ok(1, json!(42)))).unwrap();
        assert!(!ok.contains("error"));

        let err =
            serde_json::to_string(&Frame::Response(Response::err(2, WireError::new("boom"))))
                .unwrap();
        assert!(!err.contains("result"));
        assert!(err.contains(r#""message":"boom""#));
    }

    #[test]
    fn text_fallback_roundtrip() {
        let frame = Frame::Response(Response::ok(7, json!({"ok": true})));
        let envelope = Envelope::text(&frame).unwrap();
        assert!(matches!(envelope, Envelope::Text(_)));
        assert_eq!(envelope.decode().unwrap(), frame);
    }

    #[test]
    fn structured_envelope_decodes_directly() {
        let frame = Frame::Request(Request {
            id: 1,
            args: vec![],
        });
        assert_eq!(Envelope::Frame(frame.clone()).decode().unwrap(), frame);
    }

    #[test]
    fn malformed_text_is_a_codec_error() {
        let result = Envelope::Text("not json".into()).decode();
        assert!(matches!(result, Err(PortError::Codec(_))));
    }
}
