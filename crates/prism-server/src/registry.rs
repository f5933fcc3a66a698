use dashmap::DashMap;

use prism_core::ids::ConnectionId;

use crate::controller::ControllerHandle;

/// Live controllers by connection, for the embedding server.
///
/// Controllers own their state; the registry only tracks handles so the
/// transport layer can look up a connection's controller and so shutdown
/// can dispose of every live session at once.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: DashMap<ConnectionId, ControllerHandle>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ControllerHandle) {
        self.controllers
            .insert(handle.connection_id().clone(), handle);
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<ControllerHandle> {
        self.controllers
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Remove a controller and tear it down.
    pub fn remove(&self, connection_id: &ConnectionId) {
        if let Some((_, handle)) = self.controllers.remove(connection_id) {
            handle.stop();
            tracing::debug!(connection_id = %connection_id, "controller disposed");
        }
    }

    pub fn count(&self) -> usize {
        self.controllers.len()
    }

    /// Dispose of every live controller. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for entry in self.controllers.iter() {
            entry.value().stop();
            stopped += 1;
        }
        self.controllers.clear();
        stopped
    }
}
