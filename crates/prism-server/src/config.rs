use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do with a request whose method is not in the routing table while
/// the session is initialised.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownMethodPolicy {
    /// Drop the request silently (logged at debug). Matches the historical
    /// behavior and keeps old servers forward-compatible with newer clients.
    #[default]
    Ignore,
    /// Answer with a METHOD_NOT_FOUND error.
    Reject,
}

/// Per-controller configuration.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Deadline applied to every worker spawned by this controller.
    pub request_timeout: Duration,
    pub unknown_method: UnknownMethodPolicy,
    /// Capacity of the controller's inbound mailbox.
    pub mailbox_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            unknown_method: UnknownMethodPolicy::default(),
            mailbox_capacity: 128,
        }
    }
}

/// Static project metadata, consulted only by the `project/info` handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub root_path: String,
    pub engine_version: String,
}

impl ProjectConfig {
    /// Wire shape served to clients.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "rootPath": self.root_path,
            "engineVersion": self.engine_version,
        })
    }
}
