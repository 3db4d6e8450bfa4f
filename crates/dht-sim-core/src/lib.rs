//! # dht-sim-core
//!
//! Deterministic discrete-event simulator for a Kademlia-style distributed
//! hash table. A single-threaded event loop drives a virtual clock; nodes
//! exchange messages over a simulated network with configurable delay and
//! XOR-distance-weighted packet loss.
//!
//! ## Key parameters (defaults, all overridable via [`config::SimConfig`])
//!
//! | Parameter | Value |
//! |---|---|
//! | K (bucket size) | 8 |
//! | alpha (lookup concurrency, documented only) | 3 |
//! | id_bits | 160 |
//! | PING timeout | 20 ticks |
//! | PING max retries | 2 |
//! | republish interval | 3600 ticks |
//!
//! Same `(seed, scenario)` always produces a bit-identical event trace: the
//! event queue, clock, and RNG all live on [`simulator::Simulator`] alone,
//! and nodes never observe wall-clock time or hold a reference back to it.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod kbucket;
pub mod message;
pub mod node;
pub mod observer;
pub mod routing_table;
pub mod scenario;
pub mod simulator;

pub use clock::SimulationClock;
pub use config::{ConfigError, SimConfig};
pub use error::{Result, SimError};
pub use event::{Event, EventParams, EventQueue};
pub use ids::{distance, Address, FileId, NodeId};
pub use kbucket::{Contact, KBucket, TouchOutcome};
pub use message::{Content, Message, MessageType, NodeRef, ProviderRef};
pub use node::{DhtNode, PendingKind, SimHandle};
pub use observer::Observer;
pub use routing_table::RoutingTable;
pub use scenario::{into_events, load_scenario, Scenario, ScenarioEntry, ScenarioError};
pub use simulator::{NetworkState, NodeState, Simulator};

/// Default Kademlia bucket size.
pub const K: usize = 8;
/// Documented lookup-concurrency width; not used to throttle parallelism (see §9).
pub const ALPHA: usize = 3;
/// Default key-space width in bits.
pub const ID_BITS: usize = 160;
