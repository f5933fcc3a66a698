use std::time::Duration;

/// Protocol-level failures surfaced to the client as RPC error objects.
/// Everything here is terminal at the controller/worker boundary: nothing
/// retries, a new request is the client's only recourse.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProtocolError {
    // Sequencing: request arrived in the wrong lifecycle state
    #[error("session not initialised")]
    SessionNotInitialised,
    #[error("session already initialised")]
    SessionAlreadyInitialised,

    // Initialization
    #[error("resources initialization error: {0}")]
    ResourcesInitialization(String),

    // Per-request
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl ProtocolError {
    /// Stable string code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotInitialised => "SESSION_NOT_INITIALISED",
            Self::SessionAlreadyInitialised => "SESSION_ALREADY_INITIALISED",
            Self::ResourcesInitialization(_) => "RESOURCES_INITIALIZATION_ERROR",
            Self::RequestTimeout(_) => "REQUEST_TIMEOUT",
            Self::MethodNotFound(_) => "METHOD_NOT_FOUND",
            Self::InvalidParams(_) => "INVALID_PARAMS",
        }
    }

    /// True for errors caused by a request sent in the wrong lifecycle state.
    pub fn is_sequencing(&self) -> bool {
        matches!(
            self,
            Self::SessionNotInitialised | Self::SessionAlreadyInitialised
        )
    }
}

/// Domain error reported by a backend subsystem. Workers forward these to
/// the client without interpretation beyond wrapping them in the wire error
/// shape.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceFault {
    pub code: String,
    pub message: String,
}

impl ServiceFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Fault used when a backend's mailbox is closed or its reply channel
    /// was dropped without an answer.
    pub fn unavailable(subsystem: &str) -> Self {
        Self::new(
            "SERVICE_UNAVAILABLE",
            format!("{subsystem} subsystem unavailable"),
        )
    }
}
