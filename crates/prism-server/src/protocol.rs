use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use prism_core::errors::{ProtocolError, ServiceFault};

/// One decoded inbound frame. A frame without an `id` is a notification in
/// the wire protocol's sense; the controller still routes it by method.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Protocol response, keyed by the original request id.
#[derive(Clone, Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Protocol error object. Codes are stable strings, not numbers.
#[derive(Clone, Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Unsolicited server-to-client message.
#[derive(Clone, Debug, Serialize)]
pub struct Notification {
    pub method: String,
    pub params: serde_json::Value,
}

/// One outbound wire message handed to the transport layer.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Response(RpcResponse),
    Notification(Notification),
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<serde_json::Value>, error: &ProtocolError) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code: error.code().to_string(),
                message: error.to_string(),
                data: None,
            }),
        }
    }

    /// Backend-reported domain error, forwarded verbatim-ish.
    pub fn fault(id: Option<serde_json::Value>, fault: &ServiceFault) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code: fault.code.clone(),
                message: fault.message.clone(),
                data: None,
            }),
        }
    }
}

/// Outbound delivery handle for one client connection.
///
/// Sends never block the controller or its workers: a full or closed
/// transport queue drops the message with a warning. Real delivery is the
/// transport layer's responsibility.
#[derive(Clone, Debug)]
pub struct ClientSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ClientSink {
    /// Create a sink together with the receiving side the transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn respond(&self, response: RpcResponse) -> bool {
        self.push(OutboundMessage::Response(response))
    }

    pub fn notify(&self, notification: Notification) -> bool {
        self.push(OutboundMessage::Notification(notification))
    }

    fn push(&self, message: OutboundMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!(?message, "outbound queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
