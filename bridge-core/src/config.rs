//! JSON config schema (`bridge.json`) and the loader that turns a path
//! on disk into a [`BridgeConfig`] value, ready for
//! [`crate::builder::Builder::build`].
//!
//! Field names are chosen to match the upstream config format exactly
//! (`robot_name`, `pduKeyGroups`, `transferPdus`, ...) rather than a
//! more idiomatic Rust casing, since this crate has to stay wire
//! compatible with configs written against the original implementation.

use crate::error::ConfigError;
use crate::pdu::PduKey;
use crate::policy::TransferPolicyDef;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub version: String,
    pub time_source_type: TimeSourceType,
    #[serde(rename = "transferPolicies")]
    pub transfer_policies: HashMap<String, TransferPolicyDef>,
    pub nodes: Vec<String>,
    #[serde(default)]
    pub endpoints_config_path: Option<String>,
    #[serde(default, rename = "wireLinks")]
    pub wire_links: Vec<WireLink>,
    #[serde(rename = "pduKeyGroups")]
    pub pdu_key_groups: HashMap<String, Vec<PduKey>>,
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSourceType {
    Real,
    Virtual,
    External,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireLink {
    pub id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub source: EndpointRef,
    pub destinations: Vec<EndpointRef>,
    #[serde(rename = "transferPdus")]
    pub transfer_pdus: Vec<TransferPduConfig>,
    #[serde(default)]
    pub epoch_validation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointRef {
    #[serde(rename = "endpointId")]
    pub endpoint_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferPduConfig {
    #[serde(rename = "pduKeyGroupId")]
    pub pdu_key_group_id: String,
    #[serde(rename = "policyId")]
    pub policy_id: String,
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Missing {
            path: path_ref.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Malformed {
            path: path_ref.display().to_string(),
            source,
        })
    }
}
