//! An in-process `Endpoint`/`EndpointContainer` pair backed by `DashMap`
//! and `crossbeam-channel`, the same combination the relay services this
//! design is grounded on use for their in-memory message bus. Useful for
//! tests and for embedding the engine without a real PDU transport.

use super::{Endpoint, EndpointContainer, RecvCallback, RecvStatus};
use crate::pdu::ResolvedPduKey;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// One named endpoint. Payloads are stored as the latest-write-wins byte
/// buffer per key; a side channel of key notifications feeds
/// `process_recv_events` so callbacks fire in the order data arrived.
pub struct InMemoryEndpoint {
    node_id: String,
    channels: DashMap<(String, String), i64>,
    next_channel_id: AtomicI64,
    payloads: DashMap<ResolvedPduKey, Mutex<Vec<u8>>>,
    subscribers: DashMap<ResolvedPduKey, RecvCallback>,
    pending_tx: crossbeam_channel::Sender<ResolvedPduKey>,
    pending_rx: crossbeam_channel::Receiver<ResolvedPduKey>,
    running: AtomicBool,
}

impl InMemoryEndpoint {
    pub fn new(node_id: impl Into<String>) -> Self {
        let (pending_tx, pending_rx) = crossbeam_channel::unbounded();
        Self {
            node_id: node_id.into(),
            channels: DashMap::new(),
            next_channel_id: AtomicI64::new(0),
            payloads: DashMap::new(),
            subscribers: DashMap::new(),
            pending_tx,
            pending_rx,
            running: AtomicBool::new(false),
        }
    }

    /// Pre-register a `(robot, pdu_name)` pair, assigning it a stable
    /// channel id. Tests call this before building a bridge so that
    /// `channel_id_of` resolves during the build step.
    pub fn register_pdu(&self, robot: &str, pdu_name: &str) -> i64 {
        let key = (robot.to_string(), pdu_name.to_string());
        *self
            .channels
            .entry(key)
            .or_insert_with(|| self.next_channel_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Write a payload for `key` and enqueue a recv-event notification,
    /// as if the transport underneath had just received it. Used by
    /// tests driving the `source` side of a connection.
    pub fn push(&self, key: ResolvedPduKey, data: Vec<u8>) {
        self.payloads
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .clone_from(&data);
        let _ = self.pending_tx.send(key);
    }

    /// Read back the last payload written for `key`, for test assertions
    /// on the destination side of a connection.
    pub fn last_payload(&self, key: &ResolvedPduKey) -> Option<Vec<u8>> {
        self.payloads.get(key).map(|cell| cell.lock().clone())
    }
}

impl Endpoint for InMemoryEndpoint {
    fn size_of(&self, key: &ResolvedPduKey) -> usize {
        self.payloads
            .get(key)
            .map(|cell| cell.lock().len())
            .unwrap_or(0)
    }

    fn channel_id_of(&self, robot: &str, pdu_name: &str) -> i64 {
        self.channels
            .get(&(robot.to_string(), pdu_name.to_string()))
            .map(|id| *id)
            .unwrap_or(-1)
    }

    fn pdu_name_of(&self, key: &ResolvedPduKey) -> Option<String> {
        self.channels
            .iter()
            .find(|entry| entry.value() == &key.channel_id && entry.key().0 == key.robot)
            .map(|entry| entry.key().1.clone())
    }

    fn recv(&self, key: &ResolvedPduKey, buf: &mut [u8]) -> RecvStatus {
        match self.payloads.get(key) {
            Some(cell) => {
                let data = cell.lock();
                if data.is_empty() {
                    return RecvStatus::NoEntry;
                }
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                RecvStatus::Ok { len }
            }
            None => RecvStatus::NoEntry,
        }
    }

    fn send(&self, key: &ResolvedPduKey, buf: &[u8]) -> bool {
        self.payloads
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .clone_from(&buf.to_vec());
        true
    }

    fn subscribe(&self, key: ResolvedPduKey, callback: RecvCallback) {
        self.subscribers.insert(key, callback);
    }

    fn process_recv_events(&self) {
        while let Ok(key) = self.pending_rx.try_recv() {
            if let Some(callback) = self.subscribers.get(&key) {
                callback(&key);
            }
        }
    }
}

/// Registry of [`InMemoryEndpoint`]s keyed by node id.
pub struct InMemoryEndpointContainer {
    endpoints: DashMap<String, Arc<InMemoryEndpoint>>,
    running: AtomicBool,
}

impl InMemoryEndpointContainer {
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Create and register a new endpoint under `node_id`, returning a
    /// handle tests can use to `push`/`last_payload` directly.
    pub fn add_node(&self, node_id: impl Into<String>) -> Arc<InMemoryEndpoint> {
        let node_id = node_id.into();
        let endpoint = Arc::new(InMemoryEndpoint::new(node_id.clone()));
        self.endpoints.insert(node_id, endpoint.clone());
        endpoint
    }
}

impl Default for InMemoryEndpointContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointContainer for InMemoryEndpointContainer {
    fn initialize(&self) -> bool {
        true
    }

    fn start_all(&self) -> bool {
        self.running.store(true, Ordering::Relaxed);
        true
    }

    fn is_running_all(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn endpoint_ref(&self, node_id: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoints
            .get(node_id)
            .map(|e| e.clone() as Arc<dyn Endpoint>)
    }

    fn list_endpoint_ids(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| e.key().clone()).collect()
    }

    fn last_error(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(container: &InMemoryEndpointContainer, node: &str, robot: &str, pdu: &str) -> ResolvedPduKey {
        let endpoint = container.endpoint_ref(node).unwrap();
        let channel_id = endpoint.channel_id_of(robot, pdu);
        ResolvedPduKey::new(robot, channel_id)
    }

    #[test]
    fn push_then_recv_round_trips_payload() {
        let container = InMemoryEndpointContainer::new();
        let source = container.add_node("source");
        source.register_pdu("robot1", "pdu1");
        let k = key(&container, "source", "robot1", "pdu1");

        source.push(k.clone(), vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let status = source.recv(&k, &mut buf);
        assert_eq!(status, RecvStatus::Ok { len: 3 });
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn recv_on_unknown_key_is_no_entry() {
        let container = InMemoryEndpointContainer::new();
        let source = container.add_node("source");
        source.register_pdu("robot1", "pdu1");
        let k = key(&container, "source", "robot1", "pdu1");
        let mut buf = [0u8; 8];
        assert_eq!(source.recv(&k, &mut buf), RecvStatus::NoEntry);
    }

    #[test]
    fn subscribe_fires_on_process_recv_events() {
        let container = InMemoryEndpointContainer::new();
        let source = container.add_node("source");
        source.register_pdu("robot1", "pdu1");
        let k = key(&container, "source", "robot1", "pdu1");

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        source.subscribe(
            k.clone(),
            Box::new(move |_| fired_clone.store(true, Ordering::Relaxed)),
        );

        source.push(k, vec![9]);
        assert!(!fired.load(Ordering::Relaxed));
        source.process_recv_events();
        assert!(fired.load(Ordering::Relaxed));
    }

    #[test]
    fn channel_id_of_unregistered_pdu_is_negative() {
        let container = InMemoryEndpointContainer::new();
        let source = container.add_node("source");
        assert_eq!(source.channel_id_of("ghost", "nothing"), -1);
    }
}
