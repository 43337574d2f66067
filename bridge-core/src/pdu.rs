//! PDU key types: the configuration-level `PduKey` from `bridge.json`, and
//! the `ResolvedPduKey` obtained once at build time from the source
//! endpoint's `channel_id_of`.

use serde::Deserialize;

/// A configuration-level PDU identifier: `(robot, pdu_name)` is the lookup
/// key at an endpoint, `id` is unique within a config (used only as the map
/// key inside `pduKeyGroups`, never dereferenced at runtime).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct PduKey {
    pub id: String,
    pub robot_name: String,
    pub pdu_name: String,
}

/// A runtime PDU identifier, resolved once at build time. Used as the
/// subscription key and as a stable state-map key inside policies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPduKey {
    pub robot: String,
    pub channel_id: i64,
}

impl ResolvedPduKey {
    pub fn new(robot: impl Into<String>, channel_id: i64) -> Self {
        Self {
            robot: robot.into(),
            channel_id,
        }
    }
}
