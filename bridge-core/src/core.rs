//! The top-level driver: owns every [`Connection`] built from a config
//! and the endpoint registry they forward through, and runs the mixed
//! push/pull loop a caller drives by repeatedly calling
//! [`BridgeCore::cyclic_trigger`].
//!
//! `start` is idempotent via a single atomic exchange, matching the
//! upstream behaviour: calling it twice is harmless and the second call
//! is a no-op rather than a second `initialize`/`start_all` pass.

use crate::endpoint::EndpointContainer;
use crate::connection::Connection;
use crate::time_source::TimeSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct BridgeCore {
    container: Arc<dyn EndpointContainer>,
    time_source: Arc<TimeSource>,
    connections: Vec<Connection>,
    started: AtomicBool,
}

impl BridgeCore {
    pub fn new(container: Arc<dyn EndpointContainer>, time_source: Arc<TimeSource>) -> Self {
        Self {
            container,
            time_source,
            connections: Vec::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Only called by the builder while assembling a fresh core.
    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn time_source(&self) -> &Arc<TimeSource> {
        &self.time_source
    }

    /// Initialise and start every endpoint. Safe to call more than once:
    /// subsequent calls are a no-op that returns `true`.
    pub fn start(&self) -> bool {
        if self.started.swap(true, Ordering::Relaxed) {
            return true;
        }
        if !self.container.initialize() {
            tracing::error!("endpoint container failed to initialize");
            self.started.store(false, Ordering::Relaxed);
            return false;
        }
        if !self.container.start_all() {
            tracing::error!("endpoint container failed to start");
            self.started.store(false, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Relaxed) && self.container.is_running_all()
    }

    /// One iteration of the driver loop: drain every endpoint's receive
    /// events (the push half, firing event-driven units inline), then
    /// give every connection a chance to fire its cyclic units (the pull
    /// half). Returns `false` once the core has been stopped, so a
    /// caller can drive it as `while core.cyclic_trigger() { sleep() }`.
    pub fn cyclic_trigger(&self) -> bool {
        if !self.started.load(Ordering::Relaxed) {
            return false;
        }

        for endpoint_id in self.container.list_endpoint_ids() {
            if let Some(endpoint) = self.container.endpoint_ref(&endpoint_id) {
                endpoint.process_recv_events();
            }
        }

        for connection in &self.connections {
            connection.cyclic_trigger();
        }

        true
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::Relaxed);
    }

    pub fn set_active(&self, connection_id: &str, active: bool) -> bool {
        match self.connections.iter().find(|c| c.id == connection_id) {
            Some(conn) => {
                conn.set_active(active);
                true
            }
            None => false,
        }
    }

    pub fn increment_epoch(&self, connection_id: &str) -> Option<u8> {
        self.connections
            .iter()
            .find(|c| c.id == connection_id)
            .map(|conn| conn.increment_epoch())
    }

    pub fn get_epoch(&self, connection_id: &str) -> Option<u8> {
        self.connections.iter().find(|c| c.id == connection_id).map(|c| c.epoch())
    }

    pub fn connection_ids(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::in_memory::InMemoryEndpointContainer;

    #[test]
    fn start_is_idempotent() {
        let container = Arc::new(InMemoryEndpointContainer::new());
        let ts = Arc::new(TimeSource::Virtual(crate::time_source::VirtualTimeSource::new(1_000)));
        let core = BridgeCore::new(container, ts);
        assert!(core.start());
        assert!(core.start());
        assert!(core.is_running());
    }

    #[test]
    fn cyclic_trigger_false_before_start_and_after_stop() {
        let container = Arc::new(InMemoryEndpointContainer::new());
        let ts = Arc::new(TimeSource::Virtual(crate::time_source::VirtualTimeSource::new(1_000)));
        let core = BridgeCore::new(container, ts);
        assert!(!core.cyclic_trigger());
        core.start();
        assert!(core.cyclic_trigger());
        core.stop();
        assert!(!core.cyclic_trigger());
    }

    #[test]
    fn admin_ops_on_unknown_connection_fail_gracefully() {
        let container = Arc::new(InMemoryEndpointContainer::new());
        let ts = Arc::new(TimeSource::Virtual(crate::time_source::VirtualTimeSource::new(1_000)));
        let core = BridgeCore::new(container, ts);
        assert!(!core.set_active("ghost", false));
        assert_eq!(core.increment_epoch("ghost"), None);
        assert_eq!(core.get_epoch("ghost"), None);
    }
}
