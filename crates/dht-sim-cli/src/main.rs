//! `dht-sim`: CLI entry point for the deterministic Kademlia DHT
//! discrete-event simulator. A thin, synchronous shell around
//! `dht-sim-core` — config loading, scenario parsing, logging setup, and
//! writing the final network-state report. Never runs the simulator
//! itself; that's `dht_sim_core::Simulator::run`.

mod report;

use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dht_sim_core::{
    into_events, load_scenario, Address, DhtNode, Event, EventParams, NodeId, SimConfig, Simulator,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "dht-sim", version, about = "Deterministic Kademlia DHT discrete-event simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one simulation from a scenario file and write a network-state report.
    Run {
        #[arg(long)]
        scenario: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        max_time: Option<u64>,
        #[arg(long, default_value = "./out")]
        out: PathBuf,
    },
    /// Validate a config file and print the effective (defaulted) configuration.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { scenario, config, max_time, out } => run(scenario, config, max_time, out),
        Command::CheckConfig { config } => check_config(config),
    }
}

fn init_logging(cfg: &SimConfig) {
    let level: tracing::Level = cfg.logging.level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

fn run(
    scenario_path: PathBuf,
    config_path: Option<PathBuf>,
    max_time: Option<u64>,
    out: PathBuf,
) -> anyhow::Result<()> {
    let mut config = SimConfig::load(config_path.as_deref())?;
    if let Some(mt) = max_time {
        config.simulation.max_time = Some(mt);
    }
    init_logging(&config);

    let scenario = load_scenario(&scenario_path)?;
    let events = into_events(scenario)?;

    let mut sim = Simulator::new(config.clone());
    sim.subscribe(Box::new(report::LineReporter));

    for id in node_ids_in(&events) {
        if sim.node(&id).is_none() {
            let address = derive_address(&id);
            sim.register_node(DhtNode::new(id, address, config.dht.k_value, config.dht.id_bits));
        }
    }

    for event in events {
        sim.schedule_event_at(event);
    }

    sim.run();

    let state = sim.network_state();
    report::write_network_state(&state, &out)?;
    info!(out = %out.display(), "wrote network state report");
    Ok(())
}

fn check_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = SimConfig::load(config_path.as_deref())?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Every node id mentioned anywhere in the scenario, in first-appearance
/// order, including bootstrap seeds.
fn node_ids_in(events: &[Event]) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for event in events {
        let mut push = |id: &NodeId| {
            if seen.insert(id.clone()) {
                ids.push(id.clone());
            }
        };
        match &event.params {
            EventParams::NodeJoin { node_id, seed_node_id } => {
                push(node_id);
                if let Some(seed) = seed_node_id {
                    push(seed);
                }
            }
            EventParams::NodeLeave { node_id } => push(node_id),
            EventParams::FilePublish { node_id, .. } => push(node_id),
            EventParams::FileRetrieve { node_id, .. } => push(node_id),
            _ => {}
        }
    }
    ids
}

/// Synthesize a network address from a node id's low 4 bytes. The scenario
/// schema carries no dedicated address field for node registration (only
/// for the `NODE_JOIN` seed slot), so addresses are derived rather than
/// read from input.
fn derive_address(id: &NodeId) -> Address {
    let bytes = id.as_bytes();
    let tail = if bytes.len() >= 4 {
        bytes[bytes.len() - 4..].to_vec()
    } else {
        bytes.to_vec()
    };
    Address(tail)
}
