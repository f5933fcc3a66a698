use async_trait::async_trait;
use chrono::{DateTime, Utc};

use prism_core::backend::SessionContext;
use prism_core::events::SessionEvent;
use prism_core::ids::{ClientId, ConnectionId};

use crate::protocol::ClientSink;

/// Identity plus outbound binding for one initialised client connection.
/// Created exactly once per controller lifetime; immutable thereafter.
#[derive(Clone, Debug)]
pub struct Session {
    client_id: ClientId,
    connection_id: ConnectionId,
    sink: ClientSink,
    initialised_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(client_id: ClientId, connection_id: ConnectionId, sink: ClientSink) -> Self {
        Self {
            client_id,
            connection_id,
            sink,
            initialised_at: Utc::now(),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn sink(&self) -> &ClientSink {
        &self.sink
    }

    pub fn initialised_at(&self) -> DateTime<Utc> {
        self.initialised_at
    }

    /// The identity slice routes carry so workers can tag backend commands.
    pub fn context(&self) -> SessionContext {
        SessionContext {
            connection_id: self.connection_id.clone(),
            client_id: self.client_id.clone(),
        }
    }

    pub(crate) fn initialized_event(&self) -> SessionEvent {
        SessionEvent::Initialized {
            connection_id: self.connection_id.clone(),
            client_id: self.client_id.clone(),
            at: self.initialised_at,
        }
    }

    pub(crate) fn terminated_event(&self) -> SessionEvent {
        SessionEvent::Terminated {
            connection_id: self.connection_id.clone(),
            client_id: self.client_id.clone(),
            at: Utc::now(),
        }
    }
}

/// Session resource setup invoked when the client sends the initialization
/// request. Asynchronous and fallible; on failure the controller recovers to
/// the connected state and the client may retry.
#[async_trait]
pub trait ResourceInitializer: Send + Sync {
    async fn initialize(&self, client_id: &ClientId) -> Result<(), InitError>;
}

/// Why session resource setup failed.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{0}")]
pub struct InitError(pub String);

impl InitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
