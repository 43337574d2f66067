//! Error kinds for the bridge, split along the three propagation paths
//! described in the design: build-time (fatal, surfaced to the caller),
//! hot-path (logged and swallowed), and admin (boolean failure).

use thiserror::Error;

/// Errors that can occur while loading and parsing a bridge configuration
/// file, before any validation against an endpoint registry happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Missing {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced while materialising runtime components from a validated
/// `BridgeConfig`. Every variant here is a build-time `ConfigSemantic` error
/// in the terms of the design: unknown ids, bad policy parameters, missing
/// endpoints.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("endpoint not found: {0}")]
    EndpointUnavailable(String),

    #[error("transfer policy not found: {0}")]
    UnknownPolicy(String),

    #[error("pdu key group not found: {0}")]
    UnknownPduKeyGroup(String),

    #[error("policy {policy_id} has interval_us=0, must be > 0")]
    InvalidInterval { policy_id: String },

    #[error("ticker policy {policy_id} cannot drive an atomic group (cyclic + atomic is rejected at build time)")]
    CyclicAtomicRejected { policy_id: String },

    #[error("channel_id_of({robot}, {pdu_name}) returned a negative channel id")]
    ChannelResolutionFailed { robot: String, pdu_name: String },

    #[error("time source was not supplied")]
    MissingTimeSource,
}

/// Hot-path errors. These are never propagated out of the engine: every
/// call site logs and discards them (see design §7), but they are typed so
/// that unit tests can assert on the discard reason.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("size_of returned 0 for {0:?}")]
    SizeZero(crate::pdu::ResolvedPduKey),

    #[error("recv failed for {0:?}")]
    RecvFailed(crate::pdu::ResolvedPduKey),

    #[error("send failed for {0:?}")]
    SendFailed(crate::pdu::ResolvedPduKey),

    #[error("epoch mismatch: frame captured at epoch {captured}, connection now at {current}")]
    EpochMismatch { captured: u8, current: u8 },
}
