//! Turns a validated [`BridgeConfig`] plus a caller-supplied endpoint
//! registry into a runnable [`BridgeCore`].
//!
//! The one invariant this module exists to enforce that the config
//! schema alone can't: **policy instances are scoped per connection**.
//! Two connections referencing the same `policyId` each get their own
//! `TransferPolicy`, built fresh from the shared `TransferPolicyDef`, so
//! a `Throttle`/`Ticker`'s internal clock never gets corrupted by a
//! sibling connection's recv timing. The cache that makes a single
//! `policyId` resolve to one shared instance *within* a connection (so
//! a multi-key non-atomic group ticks in lockstep) is built fresh per
//! connection and dropped once that connection is assembled.

use crate::config::{BridgeConfig, ConnectionConfig, TimeSourceType};
use crate::connection::Connection;
use crate::core::BridgeCore;
use crate::endpoint::{Endpoint, EndpointContainer};
use crate::error::BuildError;
use crate::pdu::ResolvedPduKey;
use crate::policy::{TransferPolicy, TransferPolicyDef};
use crate::time_source::{ExternalTimeSource, RealTimeSource, TimeSource, VirtualTimeSource};
use crate::unit::{AtomicGroup, AtomicMember, SingleTransfer, TransferUnit};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Builder {
    config: BridgeConfig,
    container: Arc<dyn EndpointContainer>,
    delta_us: u64,
    external_time_source: Option<Box<dyn Fn() -> u64 + Send + Sync>>,
    node_filter: Option<String>,
}

impl Builder {
    pub fn new(config: BridgeConfig, container: Arc<dyn EndpointContainer>, delta_us: u64) -> Self {
        Self {
            config,
            container,
            delta_us,
            external_time_source: None,
            node_filter: None,
        }
    }

    /// Supply the callback an `external` time source reads from. Only
    /// consulted when the config's `time_source_type` is `external`.
    pub fn with_external_time_source(mut self, source: Box<dyn Fn() -> u64 + Send + Sync>) -> Self {
        self.external_time_source = Some(source);
        self
    }

    /// Restrict the built core to connections whose `nodeId` matches
    /// `node_name`. A single bridge config can describe every node's
    /// routing; each node's daemon process builds only its own slice of
    /// it by supplying its own name here.
    pub fn with_node_filter(mut self, node_name: impl Into<String>) -> Self {
        self.node_filter = Some(node_name.into());
        self
    }

    pub fn build(mut self) -> Result<BridgeCore, BuildError> {
        let time_source = Arc::new(self.take_time_source()?);
        let mut core = BridgeCore::new(self.container.clone(), time_source.clone());

        for connection_config in &self.config.connections {
            if let Some(node_name) = &self.node_filter {
                if &connection_config.node_id != node_name {
                    continue;
                }
            }
            let connection = self.build_connection(connection_config, &time_source)?;
            core.add_connection(connection);
        }

        Ok(core)
    }

    fn take_time_source(&mut self) -> Result<TimeSource, BuildError> {
        match self.config.time_source_type {
            TimeSourceType::Real => Ok(TimeSource::Real(RealTimeSource::new(self.delta_us))),
            TimeSourceType::Virtual => Ok(TimeSource::Virtual(VirtualTimeSource::new(self.delta_us))),
            TimeSourceType::External => {
                let source = self.external_time_source.take().ok_or(BuildError::MissingTimeSource)?;
                Ok(TimeSource::External(ExternalTimeSource::new(self.delta_us, source)))
            }
        }
    }

    fn build_connection(
        &self,
        connection_config: &ConnectionConfig,
        time_source: &Arc<TimeSource>,
    ) -> Result<Connection, BuildError> {
        let source_endpoint = self
            .container
            .endpoint_ref(&connection_config.source.endpoint_id)
            .ok_or_else(|| BuildError::EndpointUnavailable(connection_config.source.endpoint_id.clone()))?;

        let destination_endpoints: Vec<Arc<dyn Endpoint>> = connection_config
            .destinations
            .iter()
            .map(|d| {
                self.container
                    .endpoint_ref(&d.endpoint_id)
                    .ok_or_else(|| BuildError::EndpointUnavailable(d.endpoint_id.clone()))
            })
            .collect::<Result<_, _>>()?;

        let mut connection = Connection::new(connection_config.id.clone());
        let (epoch, active) = connection.shared_state();

        // Connection-scoped: a given policyId resolves to exactly one
        // TransferPolicy instance across all transferPdus entries in
        // this connection, and is discarded once the connection is
        // built.
        let mut policy_cache: HashMap<String, Arc<TransferPolicy>> = HashMap::new();

        for transfer_pdu in &connection_config.transfer_pdus {
            let policy_def = self
                .config
                .transfer_policies
                .get(&transfer_pdu.policy_id)
                .ok_or_else(|| BuildError::UnknownPolicy(transfer_pdu.policy_id.clone()))?;

            if let Some(interval_us) = policy_def.interval_us() {
                if interval_us == 0 {
                    return Err(BuildError::InvalidInterval {
                        policy_id: transfer_pdu.policy_id.clone(),
                    });
                }
            }

            // `atomic` only exists on `Immediate` and `is_cyclic` only on
            // `Ticker`, so this can never trip today; kept as the
            // explicit build-time rejection the design calls for (rather
            // than silently ignoring the combination) in case a future
            // policy kind reintroduces the overlap.
            if policy_def.is_atomic() && policy_def.is_cyclic() {
                return Err(BuildError::CyclicAtomicRejected {
                    policy_id: transfer_pdu.policy_id.clone(),
                });
            }

            let pdu_keys = self
                .config
                .pdu_key_groups
                .get(&transfer_pdu.pdu_key_group_id)
                .ok_or_else(|| BuildError::UnknownPduKeyGroup(transfer_pdu.pdu_key_group_id.clone()))?;

            if policy_def.is_atomic() {
                // Never cached: an atomic policy's membership map is
                // scoped to exactly the one AtomicGroup it was built for.
                // Sharing it across two transferPdus entries (even with
                // the same policyId) would merge their membership sets,
                // and neither group could ever see all its own keys
                // received.
                let policy = Arc::new(TransferPolicy::from_def(policy_def));
                let mut members = Vec::with_capacity(pdu_keys.len());
                for pdu_key in pdu_keys {
                    let source_key = resolve_key(source_endpoint.as_ref(), &pdu_key.robot_name, &pdu_key.pdu_name)?;
                    let destinations = resolve_destinations(&destination_endpoints, pdu_key)?;
                    members.push(AtomicMember {
                        source: source_endpoint.clone(),
                        source_key,
                        destinations,
                    });
                }
                let label = format!("{}/{}", connection_config.id, transfer_pdu.pdu_key_group_id);
                let unit = AtomicGroup::new(
                    label,
                    members,
                    policy,
                    epoch.clone(),
                    active.clone(),
                    time_source.clone(),
                    connection_config.epoch_validation,
                );
                connection.add_unit(TransferUnit::Group(unit));
            } else {
                let policy = policy_cache
                    .entry(transfer_pdu.policy_id.clone())
                    .or_insert_with(|| Arc::new(TransferPolicy::from_def(policy_def)))
                    .clone();

                for pdu_key in pdu_keys {
                    let source_key = resolve_key(source_endpoint.as_ref(), &pdu_key.robot_name, &pdu_key.pdu_name)?;
                    let destinations = resolve_destinations(&destination_endpoints, pdu_key)?;
                    let label = format!("{}/{}", connection_config.id, pdu_key.id);
                    let unit = SingleTransfer::new(
                        label,
                        source_endpoint.clone(),
                        source_key,
                        destinations,
                        policy.clone(),
                        epoch.clone(),
                        active.clone(),
                        time_source.clone(),
                        connection_config.epoch_validation,
                    );
                    connection.add_unit(TransferUnit::Single(unit));
                }
            }
        }

        Ok(connection)
    }
}

fn resolve_key(endpoint: &dyn Endpoint, robot: &str, pdu_name: &str) -> Result<ResolvedPduKey, BuildError> {
    let channel_id = endpoint.channel_id_of(robot, pdu_name);
    if channel_id < 0 {
        return Err(BuildError::ChannelResolutionFailed {
            robot: robot.to_string(),
            pdu_name: pdu_name.to_string(),
        });
    }
    Ok(ResolvedPduKey::new(robot, channel_id))
}

fn resolve_destinations(
    destination_endpoints: &[Arc<dyn Endpoint>],
    pdu_key: &crate::pdu::PduKey,
) -> Result<Vec<(Arc<dyn Endpoint>, ResolvedPduKey)>, BuildError> {
    destination_endpoints
        .iter()
        .map(|endpoint| {
            let key = resolve_key(endpoint.as_ref(), &pdu_key.robot_name, &pdu_key.pdu_name)?;
            Ok((endpoint.clone(), key))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::endpoint::in_memory::InMemoryEndpointContainer;

    fn container_with(robot: &str, pdu: &str) -> (Arc<InMemoryEndpointContainer>, Arc<crate::endpoint::in_memory::InMemoryEndpoint>, Arc<crate::endpoint::in_memory::InMemoryEndpoint>) {
        let container = Arc::new(InMemoryEndpointContainer::new());
        let src = container.add_node("ep_src");
        let dst = container.add_node("ep_dst");
        src.register_pdu(robot, pdu);
        dst.register_pdu(robot, pdu);
        (container, src, dst)
    }

    fn config_json(policy: &str) -> String {
        format!(
            r#"
            {{
                "version": "1.0",
                "time_source_type": "virtual",
                "transferPolicies": {{ "p1": {policy} }},
                "nodes": ["node1"],
                "pduKeyGroups": {{
                    "g1": [ {{ "id": "k1", "robot_name": "robotA", "pdu_name": "pduA" }} ]
                }},
                "connections": [
                    {{
                        "id": "c1",
                        "nodeId": "node1",
                        "source": {{ "endpointId": "ep_src" }},
                        "destinations": [ {{ "endpointId": "ep_dst" }} ],
                        "transferPdus": [ {{ "pduKeyGroupId": "g1", "policyId": "p1" }} ]
                    }}
                ]
            }}
            "#
        )
    }

    #[test]
    fn immediate_single_forwards_on_recv() {
        let (container, src, dst) = container_with("robotA", "pduA");
        let config: BridgeConfig =
            serde_json::from_str(&config_json(r#"{ "type": "immediate", "atomic": false }"#)).unwrap();
        let core = Builder::new(config, container, 1_000).build().unwrap();
        core.start();

        let key = ResolvedPduKey::new("robotA", src.channel_id_of("robotA", "pduA"));
        src.push(key.clone(), vec![7, 7, 7]);
        core.cyclic_trigger();

        let dest_key = ResolvedPduKey::new("robotA", dst.channel_id_of("robotA", "pduA"));
        assert_eq!(dst.last_payload(&dest_key), Some(vec![7, 7, 7]));
    }

    #[test]
    fn ticker_does_not_forward_on_recv_only_on_cyclic_schedule() {
        let (container, src, dst) = container_with("robotA", "pduA");
        let config: BridgeConfig =
            serde_json::from_str(&config_json(r#"{ "type": "ticker", "intervalMs": 1 }"#)).unwrap();
        let core = Builder::new(config, container, 1_000).build().unwrap();
        core.start();

        let key = ResolvedPduKey::new("robotA", src.channel_id_of("robotA", "pduA"));
        src.push(key, vec![1]);
        core.cyclic_trigger(); // primes the ticker, no transfer yet

        let dest_key = ResolvedPduKey::new("robotA", dst.channel_id_of("robotA", "pduA"));
        assert_eq!(dst.last_payload(&dest_key), None);
    }

    #[test]
    fn unknown_policy_id_fails_build() {
        let (container, _src, _dst) = container_with("robotA", "pduA");
        let json = r#"
        {
            "version": "1.0",
            "time_source_type": "virtual",
            "transferPolicies": {},
            "nodes": ["node1"],
            "pduKeyGroups": { "g1": [ { "id": "k1", "robot_name": "robotA", "pdu_name": "pduA" } ] },
            "connections": [
                {
                    "id": "c1",
                    "nodeId": "node1",
                    "source": { "endpointId": "ep_src" },
                    "destinations": [ { "endpointId": "ep_dst" } ],
                    "transferPdus": [ { "pduKeyGroupId": "g1", "policyId": "missing" } ]
                }
            ]
        }
        "#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        let result = Builder::new(config, container, 1_000).build();
        assert!(matches!(result, Err(BuildError::UnknownPolicy(_))));
    }

    #[test]
    fn atomic_group_waits_for_all_members_before_forwarding() {
        let container = Arc::new(InMemoryEndpointContainer::new());
        let src = container.add_node("ep_src");
        let dst = container.add_node("ep_dst");
        src.register_pdu("robotA", "pdu1");
        src.register_pdu("robotA", "pdu2");
        dst.register_pdu("robotA", "pdu1");
        dst.register_pdu("robotA", "pdu2");

        let json = r#"
        {
            "version": "1.0",
            "time_source_type": "virtual",
            "transferPolicies": { "p1": { "type": "immediate", "atomic": true } },
            "nodes": ["node1"],
            "pduKeyGroups": {
                "g1": [
                    { "id": "k1", "robot_name": "robotA", "pdu_name": "pdu1" },
                    { "id": "k2", "robot_name": "robotA", "pdu_name": "pdu2" }
                ]
            },
            "connections": [
                {
                    "id": "c1",
                    "nodeId": "node1",
                    "source": { "endpointId": "ep_src" },
                    "destinations": [ { "endpointId": "ep_dst" } ],
                    "transferPdus": [ { "pduKeyGroupId": "g1", "policyId": "p1" } ]
                }
            ]
        }
        "#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        let core = Builder::new(config, container, 1_000).build().unwrap();
        core.start();

        let k1 = ResolvedPduKey::new("robotA", src.channel_id_of("robotA", "pdu1"));
        let k2 = ResolvedPduKey::new("robotA", src.channel_id_of("robotA", "pdu2"));
        let d1 = ResolvedPduKey::new("robotA", dst.channel_id_of("robotA", "pdu1"));
        let d2 = ResolvedPduKey::new("robotA", dst.channel_id_of("robotA", "pdu2"));

        src.push(k1, vec![1]);
        core.cyclic_trigger();
        assert_eq!(dst.last_payload(&d1), None, "must not forward until both members received");

        src.push(k2, vec![2]);
        core.cyclic_trigger();
        assert_eq!(dst.last_payload(&d1), Some(vec![1]));
        assert_eq!(dst.last_payload(&d2), Some(vec![2]));
    }
}
