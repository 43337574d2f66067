//! Transfer engine for a PDU bridge: declarative routing between named
//! endpoints, per-route transfer policies, atomic multi-PDU commits, and
//! an epoch barrier that discards in-flight frames across topology
//! changes.
//!
//! This crate never interprets the bytes it forwards; every `recv`/
//! `send` moves an opaque buffer whose shape is defined by whatever
//! [`endpoint::Endpoint`] implementation a caller supplies.
//!
//! Typical use:
//!
//! ```no_run
//! use pdu_bridge_core::builder::Builder;
//! use pdu_bridge_core::config::BridgeConfig;
//! use pdu_bridge_core::endpoint::in_memory::InMemoryEndpointContainer;
//! use std::sync::Arc;
//!
//! let config = BridgeConfig::load("bridge.json")?;
//! let container = Arc::new(InMemoryEndpointContainer::new());
//! let core = Builder::new(config, container, 1_000).build()?;
//! core.start();
//! while core.cyclic_trigger() {
//!     core.time_source().sleep_delta();
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod config;
pub mod connection;
pub mod core;
pub mod endpoint;
pub mod error;
pub mod pdu;
pub mod policy;
pub mod time_source;
pub mod unit;

pub use builder::Builder;
pub use config::BridgeConfig;
pub use core::BridgeCore;
pub use error::{BuildError, ConfigError, TransferError};
pub use pdu::{PduKey, ResolvedPduKey};
