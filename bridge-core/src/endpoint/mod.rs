//! The endpoint capability contract.
//!
//! A `node` in a bridge config is backed by one [`EndpointContainer`],
//! which hands out [`Endpoint`] handles by id. This module only defines
//! the contract; [`in_memory`] provides the one concrete implementation
//! this crate ships (used by the test suite and by anyone embedding the
//! engine without a real PDU transport). Production deployments are
//! expected to supply their own `Endpoint`/`EndpointContainer`, the way
//! `MessageTransport` implementors plugged into the relay services this
//! design is grounded on.

pub mod in_memory;

use crate::pdu::ResolvedPduKey;
use std::sync::Arc;

/// Outcome of a single `recv` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecvStatus {
    /// A payload of `len` bytes was copied into the caller's buffer.
    Ok { len: usize },
    /// No payload was available (not an error: the normal "nothing new"
    /// result of a non-blocking poll).
    NoEntry,
}

/// A callback invoked by an endpoint when it notices new data for a
/// subscribed key, normally from inside `process_recv_events`. Boxed so
/// each endpoint can hold a heterogeneous list of subscribers.
pub type RecvCallback = Box<dyn Fn(&ResolvedPduKey) + Send + Sync>;

/// An opaque endpoint that can size, receive, send, and notify on one or
/// more named PDU channels.
///
/// Implementations are expected to be cheap to clone-share (`Arc`) and
/// safe to call from the single coordinating thread; this crate never
/// calls an `Endpoint` method from more than one thread concurrently.
pub trait Endpoint: Send + Sync {
    /// Byte size of the payload currently addressable at `key`, or `0`
    /// if the key is unknown to this endpoint.
    fn size_of(&self, key: &ResolvedPduKey) -> usize;

    /// Resolve `(robot, pdu_name)` to a transport-level channel id.
    /// Returns a negative id on failure, per the upstream contract this
    /// crate mirrors: callers turn that into
    /// `BuildError::ChannelResolutionFailed`.
    fn channel_id_of(&self, robot: &str, pdu_name: &str) -> i64;

    /// Human readable name for `key`, for logging.
    fn pdu_name_of(&self, key: &ResolvedPduKey) -> Option<String>;

    /// Copy up to `buf.len()` bytes for `key` into `buf`, non-blocking.
    fn recv(&self, key: &ResolvedPduKey, buf: &mut [u8]) -> RecvStatus;

    /// Send `buf` as the payload for `key`. Returns `false` on failure.
    fn send(&self, key: &ResolvedPduKey, buf: &[u8]) -> bool;

    /// Register a callback to be invoked when `key` has new data. A
    /// second `subscribe` on the same key replaces the prior callback.
    fn subscribe(&self, key: ResolvedPduKey, callback: RecvCallback);

    /// Drain whatever receive-side event queue this endpoint maintains,
    /// invoking subscribed callbacks for keys that have new data. Called
    /// once per endpoint, per driver iteration.
    fn process_recv_events(&self);
}

/// Registry of [`Endpoint`]s by node id, with lifecycle control over the
/// whole set. Mirrors the upstream `EndpointContainer` contract.
pub trait EndpointContainer: Send + Sync {
    /// Perform any one-time setup (e.g. opening shared memory segments).
    fn initialize(&self) -> bool;

    /// Start every endpoint this container owns.
    fn start_all(&self) -> bool;

    /// Whether every endpoint this container owns reports itself running.
    fn is_running_all(&self) -> bool;

    /// Look up an endpoint handle by node id.
    fn endpoint_ref(&self, node_id: &str) -> Option<Arc<dyn Endpoint>>;

    /// All node ids known to this container.
    fn list_endpoint_ids(&self) -> Vec<String>;

    /// The last error recorded by this container, if any, for
    /// diagnostics when `start_all`/`initialize` returns `false`.
    fn last_error(&self) -> Option<String>;
}
