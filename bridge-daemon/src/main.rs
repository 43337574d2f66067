//! CLI entry point: load a bridge config, build the transfer engine, and
//! run its cyclic loop until interrupted.
//!
//! Argument shape and the `ERROR: <message>` / exit(1) failure path
//! mirror the original daemon this design is grounded on. The one
//! deliberate departure: cancellation is a plain `Arc<AtomicBool>`
//! captured by the `ctrl_c` task instead of a global pointer to the
//! core, so nothing here reaches for unsafe global state to stop.

use anyhow::{Context, Result};
use clap::Parser;
use pdu_bridge_core::builder::Builder;
use pdu_bridge_core::config::BridgeConfig;
use pdu_bridge_core::endpoint::in_memory::InMemoryEndpointContainer;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "bridge", about = "Runs a PDU bridge from a JSON config until interrupted")]
struct Args {
    /// Path to the bridge.json config file.
    config_path: String,

    /// Driver loop period, in microseconds.
    delta_us: u64,

    /// Path to the endpoint transport's own config file. Accepted for
    /// CLI compatibility with deployments that wire a real transport;
    /// the in-memory container this daemon builds ignores it.
    endpoints_config: String,

    /// Node id to run. Defaults to "node1" when the config describes
    /// more than one node's routing in a single file.
    #[arg(default_value = "node1")]
    node_name: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = BridgeConfig::load(&args.config_path)
        .with_context(|| format!("loading config from {}", args.config_path))?;

    tracing::debug!(
        path = %args.endpoints_config,
        "endpoints config path supplied, ignored by the in-memory transport"
    );

    let container = Arc::new(InMemoryEndpointContainer::new());
    seed_in_memory_endpoints(&config, &container);

    let core = Builder::new(config, container, args.delta_us)
        .with_node_filter(args.node_name.clone())
        .build()
        .context("building bridge core from config")?;

    if !core.start() {
        anyhow::bail!("endpoint container failed to start");
    }
    tracing::info!(node = %args.node_name, delta_us = args.delta_us, "bridge started");

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(shutdown.clone());

    while !shutdown.load(Ordering::Relaxed) && core.cyclic_trigger() {
        core.time_source().sleep_delta();
    }

    core.stop();
    tracing::info!("bridge stopped");
    Ok(())
}

/// Registers an in-memory endpoint per node referenced by the config's
/// connections, and pre-registers every `(robot_name, pdu_name)` pair so
/// `channel_id_of` resolves during the build step. This is the wiring a
/// real deployment replaces with its own `EndpointContainer` backed by
/// an actual PDU transport.
fn seed_in_memory_endpoints(config: &BridgeConfig, container: &Arc<InMemoryEndpointContainer>) {
    let mut endpoint_ids = HashSet::new();
    for connection in &config.connections {
        endpoint_ids.insert(connection.source.endpoint_id.clone());
        for dest in &connection.destinations {
            endpoint_ids.insert(dest.endpoint_id.clone());
        }
    }

    let endpoints: Vec<_> = endpoint_ids
        .into_iter()
        .map(|id| container.add_node(id))
        .collect();

    for group in config.pdu_key_groups.values() {
        for pdu_key in group {
            for endpoint in &endpoints {
                endpoint.register_pdu(&pdu_key.robot_name, &pdu_key.pdu_name);
            }
        }
    }
}

fn spawn_signal_handler(shutdown: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build signal-handling runtime");
        runtime.block_on(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received SIGINT, shutting down");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    });
}
