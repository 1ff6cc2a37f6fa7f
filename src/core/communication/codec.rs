//! JSON-RPC 2.0 frame codec.
//!
//! Requests carry a console-generated integer id. Inbound text is classified
//! into responses (matched by id), notifications (no id) or malformed frames.
//! Malformed frames never tear down the transport; the reader logs and skips
//! them.

use crate::domain::error::RpcError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request id allocated by a session
pub type RequestId = u64;

/// Outbound request frame
#[derive(Debug, Clone, Serialize)]
pub struct RequestFrame<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
    pub id: RequestId,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Response {
        id: RequestId,
        outcome: Result<Value, RpcError>,
    },
    Notification {
        method: String,
        params: Value,
    },
    Malformed {
        reason: String,
        raw: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Debug, Deserialize)]
struct RawError {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Distinguishes `"result": null` from a missing result
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Encode a request frame as JSON text.
///
/// `params` that are `null` are sent as an empty object so controllers that
/// insist on an object are satisfied.
pub fn encode(method: &str, params: &Value, id: RequestId) -> String {
    let empty = Value::Object(Map::new());
    let params = if params.is_null() { &empty } else { params };
    let frame = RequestFrame {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id,
    };
    // Serializing a struct of str/Value/u64 cannot fail
    serde_json::to_string(&frame).unwrap_or_default()
}

/// Classify inbound text
pub fn decode(text: &str) -> Frame {
    let raw: RawFrame = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => return malformed(format!("invalid JSON: {}", e), text),
    };

    if let Some(version) = raw.jsonrpc.as_deref() {
        if version != JSONRPC_VERSION {
            return malformed(format!("unsupported jsonrpc version '{}'", version), text);
        }
    }

    match (raw.id, raw.method) {
        (Some(id), _) => {
            let Some(id) = id.as_u64() else {
                return malformed(format!("non-integer id {}", id), text);
            };
            match (raw.result, raw.error) {
                (_, Some(error)) => Frame::Response {
                    id,
                    outcome: Err(RpcError::ControllerError {
                        code: error.code,
                        message: error.message,
                    }),
                },
                (Some(result), None) => Frame::Response {
                    id,
                    outcome: Ok(result),
                },
                (None, None) => malformed("response without result or error".to_string(), text),
            }
        }
        (None, Some(method)) => Frame::Notification {
            method,
            params: raw.params.unwrap_or(Value::Null),
        },
        (None, None) => malformed("frame has neither id nor method".to_string(), text),
    }
}

fn malformed(reason: String, raw: &str) -> Frame {
    Frame::Malformed {
        reason,
        raw: raw.chars().take(256).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request() {
        let text = encode("printer.gcode.script", &json!({"script": "G28"}), 42);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "printer.gcode.script");
        assert_eq!(value["params"]["script"], "G28");
        assert_eq!(value["id"], 42);
    }

    #[test]
    fn test_encode_null_params_as_object() {
        let text = encode("printer.emergency_stop", &Value::Null, 1);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["params"], json!({}));
    }

    #[test]
    fn test_decode_result() {
        let frame = decode(r#"{"jsonrpc":"2.0","result":"ok","id":7}"#);
        assert_eq!(
            frame,
            Frame::Response {
                id: 7,
                outcome: Ok(json!("ok")),
            }
        );
    }

    #[test]
    fn test_decode_error() {
        let frame = decode(
            r#"{"jsonrpc":"2.0","error":{"code":400,"message":"Unknown command:\"FOO\""},"id":3}"#,
        );
        match frame {
            Frame::Response { id, outcome: Err(RpcError::ControllerError { code, message }) } => {
                assert_eq!(id, 3);
                assert_eq!(code, 400);
                assert!(message.contains("FOO"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification() {
        let frame = decode(
            r#"{"jsonrpc":"2.0","method":"notify_status_update","params":[{"extruder":{"temperature":210.1}},1234.5]}"#,
        );
        match frame {
            Frame::Notification { method, params } => {
                assert_eq!(method, "notify_status_update");
                assert_eq!(params[1], json!(1234.5));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_inputs() {
        for text in [
            "not json",
            r#"{"jsonrpc":"2.0"}"#,
            r#"{"jsonrpc":"2.0","id":"abc","result":1}"#,
            r#"{"jsonrpc":"2.0","id":5}"#,
            r#"{"jsonrpc":"1.0","id":5,"result":1}"#,
            r#"{"jsonrpc":"2.0","result":1"#,
        ] {
            assert!(matches!(decode(text), Frame::Malformed { .. }), "{}", text);
        }
    }

    #[test]
    fn test_decode_null_result_is_response() {
        // Controllers answer some methods with a null result
        let frame = decode(r#"{"jsonrpc":"2.0","result":null,"id":9}"#);
        assert_eq!(
            frame,
            Frame::Response {
                id: 9,
                outcome: Ok(Value::Null),
            }
        );
    }
}
