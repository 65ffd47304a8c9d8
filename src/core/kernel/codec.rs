use crate::core::errors::DeribitError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request envelope, shared by the HTTP and WebSocket transports
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

impl<'a, P: Serialize> JsonRpcRequest<'a, P> {
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    pub fn to_json(&self) -> Result<String, DeribitError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn into_api_error(self, method: &str) -> DeribitError {
        DeribitError::ApiError {
            method: method.to_string(),
            code: self.code,
            message: self.message,
        }
    }
}

/// Outcome of a JSON-RPC call, decoded once at the transport boundary
pub type RpcResult = Result<Value, JsonRpcError>;

/// Inbound JSON-RPC traffic
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to an earlier request
    Response { id: Option<u64>, result: RpcResult },
    /// Server-initiated message without an id (heartbeat, subscription push)
    Notification { method: String, params: Value },
}

/// Wire shape before classification; never leaves this module
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Decode one inbound JSON-RPC text payload
pub fn decode_inbound(text: &str) -> Result<Inbound, DeribitError> {
    let raw: RawEnvelope = serde_json::from_str(text)
        .map_err(|e| DeribitError::DecodeError(format!("Invalid JSON-RPC message: {}", e)))?;

    if let Some(error) = raw.error {
        return Ok(Inbound::Response {
            id: raw.id,
            result: Err(error),
        });
    }

    match (raw.method, raw.result) {
        (Some(method), None) if raw.id.is_none() => Ok(Inbound::Notification {
            method,
            params: raw.params.unwrap_or(Value::Null),
        }),
        (_, Some(result)) => Ok(Inbound::Response {
            id: raw.id,
            result: Ok(result),
        }),
        (_, None) if raw.id.is_some() => Ok(Inbound::Response {
            id: raw.id,
            result: Ok(Value::Null),
        }),
        _ => Err(DeribitError::DecodeError(format!(
            "Message is neither a response nor a notification: {}",
            text
        ))),
    }
}

/// Decode an HTTP response body, which must be a JSON-RPC response
pub fn decode_response(text: &str) -> Result<RpcResult, DeribitError> {
    match decode_inbound(text)? {
        Inbound::Response { result, .. } => Ok(result),
        Inbound::Notification { method, .. } => Err(DeribitError::DecodeError(format!(
            "Expected a response, got notification '{}'",
            method
        ))),
    }
}

/// Codec trait for turning JSON-RPC calls into WebSocket frames and back
///
/// Control frames (ping, pong, close) are handled by the session, not the codec.
pub trait WsCodec: Send + Sync + 'static {
    /// The type representing parsed messages
    type Message: Send + Sync;

    /// Encode a request into a WebSocket text frame
    fn encode_request(&self, id: u64, method: &str, params: &Value)
        -> Result<Message, DeribitError>;

    /// Decode a data frame
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded message
    /// - `Ok(None)` - Frame ignored by the codec
    /// - `Err(error)` - Failed to decode frame
    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, DeribitError>;
}

/// JSON-RPC 2.0 codec
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcCodec;

impl WsCodec for JsonRpcCodec {
    type Message = Inbound;

    fn encode_request(
        &self,
        id: u64,
        method: &str,
        params: &Value,
    ) -> Result<Message, DeribitError> {
        JsonRpcRequest::new(id, method, params)
            .to_json()
            .map(Message::Text)
    }

    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, DeribitError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                DeribitError::DecodeError(format!("Invalid UTF-8 in binary message: {}", e))
            })?,
            _ => return Ok(None),
        };

        decode_inbound(&text).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_request_envelope() {
        let codec = JsonRpcCodec;
        let message = codec
            .encode_request(7, "public/subscribe", &json!({"channels": ["a", "b"]}))
            .unwrap();

        let Message::Text(text) = message else {
            panic!("Expected text message");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "public/subscribe");
        assert_eq!(value["params"]["channels"], json!(["a", "b"]));
    }

    #[test]
    fn test_decode_heartbeat_notification() {
        let inbound =
            decode_inbound(r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"test_request"}}"#)
                .unwrap();
        assert_eq!(
            inbound,
            Inbound::Notification {
                method: "heartbeat".to_string(),
                params: json!({"type": "test_request"}),
            }
        );
    }

    #[test]
    fn test_decode_notification_without_params() {
        let inbound = decode_inbound(r#"{"method":"heartbeat"}"#).unwrap();
        assert!(matches!(
            inbound,
            Inbound::Notification { ref method, params: Value::Null } if method == "heartbeat"
        ));
    }

    #[test]
    fn test_decode_error_response() {
        let inbound = decode_inbound(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":13009,"message":"unauthorized"}}"#,
        )
        .unwrap();

        let Inbound::Response { id, result } = inbound else {
            panic!("Expected response");
        };
        assert_eq!(id, Some(3));
        let error = result.unwrap_err();
        assert_eq!(error.code, 13009);
        assert_eq!(error.message, "unauthorized");
    }

    #[test]
    fn test_decode_success_response() {
        let result = decode_response(r#"{"jsonrpc":"2.0","id":1,"result":{"version":"1.2.26"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(result["version"], "1.2.26");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_inbound("not json"),
            Err(DeribitError::DecodeError(_))
        ));
        assert!(matches!(
            decode_inbound(r#"{"jsonrpc":"2.0"}"#),
            Err(DeribitError::DecodeError(_))
        ));
    }

    #[test]
    fn test_codec_ignores_control_frames() {
        let codec = JsonRpcCodec;
        assert!(codec.decode_message(Message::Ping(vec![1])).unwrap().is_none());
    }
}
