//! Translation of backend domain events into outbound wire notifications.
//!
//! The mapping is fixed per event: field renames and reshaping only, no
//! filtering and no batching beyond what the source event already batched.
//! Forwarding order is the controller's mailbox order.

use prism_core::events::{CapabilityRegistration, DomainEvent};

use crate::protocol::{ClientSink, Notification};

/// Wire notification produced for one domain event.
pub fn notification_for(event: &DomainEvent) -> Notification {
    match event {
        DomainEvent::CapabilityGranted { registration } => Notification {
            method: "capability/granted".into(),
            params: serde_json::json!({ "registration": registration_to_wire(registration) }),
        },
        DomainEvent::CapabilityForceReleased { registration } => Notification {
            method: "capability/forceReleased".into(),
            params: serde_json::json!({ "registration": registration_to_wire(registration) }),
        },
        DomainEvent::BufferChanged { path, edits } => Notification {
            method: "text/didChange".into(),
            params: serde_json::json!({ "path": path, "edits": edits }),
        },
        DomainEvent::FileEvent { path, kind } => Notification {
            method: "file/event".into(),
            params: serde_json::json!({ "path": path, "kind": kind }),
        },
        DomainEvent::ExpressionUpdates { context_id, updates } => Notification {
            method: "executionContext/expressionUpdates".into(),
            params: serde_json::json!({ "contextId": context_id, "updates": updates }),
        },
        DomainEvent::ExecutionFailed { context_id, message } => Notification {
            method: "executionContext/executionFailed".into(),
            params: serde_json::json!({ "contextId": context_id, "message": message }),
        },
        DomainEvent::ExecutionDiagnostics {
            context_id,
            diagnostics,
        } => Notification {
            method: "executionContext/executionStatus".into(),
            params: serde_json::json!({ "contextId": context_id, "diagnostics": diagnostics }),
        },
        DomainEvent::VisualisationFailed {
            context_id,
            visualisation_id,
            message,
        } => Notification {
            method: "visualisation/evaluationFailed".into(),
            params: serde_json::json!({
                "contextId": context_id,
                "visualisationId": visualisation_id,
                "message": message,
            }),
        },
        DomainEvent::SuggestionsUpdated {
            current_version,
            updates,
        } => Notification {
            method: "search/suggestionsDatabaseUpdates".into(),
            params: serde_json::json!({ "currentVersion": current_version, "updates": updates }),
        },
        DomainEvent::StdoutAppended { output } => Notification {
            method: "io/standardOutputAppended".into(),
            params: serde_json::json!({ "output": output }),
        },
        DomainEvent::StderrAppended { output } => Notification {
            method: "io/standardErrorAppended".into(),
            params: serde_json::json!({ "output": output }),
        },
        DomainEvent::WaitingForStdin => Notification {
            method: "io/waitingForStandardInput".into(),
            params: serde_json::json!({}),
        },
    }
}

fn registration_to_wire(registration: &CapabilityRegistration) -> serde_json::Value {
    serde_json::json!({
        "method": registration.method,
        "registerOptions": registration.register_options,
    })
}

/// Forward one event to the client. Best-effort: a gone client only costs a
/// warning here, never a stall.
pub(crate) fn forward(sink: &ClientSink, event: &DomainEvent) {
    let notification = notification_for(event);
    if !sink.notify(notification) {
        tracing::warn!(event = event.event_type(), "client gone, dropping notification");
    }
}
