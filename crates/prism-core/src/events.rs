use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, ConnectionId, ContextId, VisualisationId};

/// Unsolicited events pushed by backend subsystems into a controller.
/// While a session is initialised, each of these is translated into exactly
/// one outbound wire notification; outside that state they are dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    #[serde(rename = "capability_granted")]
    CapabilityGranted { registration: CapabilityRegistration },

    #[serde(rename = "capability_force_released")]
    CapabilityForceReleased { registration: CapabilityRegistration },

    /// Batch of edits applied to one open buffer.
    #[serde(rename = "buffer_changed")]
    BufferChanged {
        path: String,
        edits: serde_json::Value,
    },

    /// File-system watch event under a workspace root.
    #[serde(rename = "file_event")]
    FileEvent { path: String, kind: FileEventKind },

    /// Batch of expression updates from one execution context.
    #[serde(rename = "expression_updates")]
    ExpressionUpdates {
        context_id: ContextId,
        updates: serde_json::Value,
    },

    #[serde(rename = "execution_failed")]
    ExecutionFailed {
        context_id: ContextId,
        message: String,
    },

    /// Non-fatal diagnostics produced while executing a context.
    #[serde(rename = "execution_diagnostics")]
    ExecutionDiagnostics {
        context_id: ContextId,
        diagnostics: serde_json::Value,
    },

    #[serde(rename = "visualisation_failed")]
    VisualisationFailed {
        context_id: ContextId,
        visualisation_id: VisualisationId,
        message: String,
    },

    /// Batch of suggestions-database updates, with the version they produce.
    #[serde(rename = "suggestions_updated")]
    SuggestionsUpdated {
        current_version: u64,
        updates: serde_json::Value,
    },

    #[serde(rename = "stdout_appended")]
    StdoutAppended { output: String },

    #[serde(rename = "stderr_appended")]
    StderrAppended { output: String },

    /// The running program is blocked reading standard input.
    #[serde(rename = "waiting_for_stdin")]
    WaitingForStdin,
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CapabilityGranted { .. } => "capability_granted",
            Self::CapabilityForceReleased { .. } => "capability_force_released",
            Self::BufferChanged { .. } => "buffer_changed",
            Self::FileEvent { .. } => "file_event",
            Self::ExpressionUpdates { .. } => "expression_updates",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::ExecutionDiagnostics { .. } => "execution_diagnostics",
            Self::VisualisationFailed { .. } => "visualisation_failed",
            Self::SuggestionsUpdated { .. } => "suggestions_updated",
            Self::StdoutAppended { .. } => "stdout_appended",
            Self::StderrAppended { .. } => "stderr_appended",
            Self::WaitingForStdin => "waiting_for_stdin",
        }
    }
}

/// A capability held or granted by the capability registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRegistration {
    pub method: String,
    pub register_options: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Added,
    Modified,
    Removed,
}

/// Session lifecycle events published on the process-wide stream.
///
/// These carry the serializable session identity, not the live delivery
/// handle: consumers are observers (metrics, session-list coordination) and
/// must not be able to write to the client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "session_initialized")]
    Initialized {
        connection_id: ConnectionId,
        client_id: ClientId,
        at: DateTime<Utc>,
    },

    #[serde(rename = "session_terminated")]
    Terminated {
        connection_id: ConnectionId,
        client_id: ClientId,
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Initialized { client_id, .. } | Self::Terminated { client_id, .. } => client_id,
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Self::Initialized { connection_id, .. } | Self::Terminated { connection_id, .. } => {
                connection_id
            }
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "session_initialized",
            Self::Terminated { .. } => "session_terminated",
        }
    }
}
