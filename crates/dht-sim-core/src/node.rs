//! Per-node Kademlia state machine: joins, publishes, retrieves, message
//! dispatch, and the PING timeout/retry sweep.
//!
//! Nodes never hold a back-reference to the simulator. They act through a
//! narrow capability handle (`SimHandle`) — `send_message`, `schedule_event`,
//! `get_current_time` — which keeps node ↔ simulator one-way, per the
//! cyclic-reference redesign note.

use std::collections::HashMap;

use tracing::warn;

use crate::event::{Event, EventParams};
use crate::ids::{Address, FileId, NodeId};
use crate::message::{Content, Message, MessageType, NodeRef, ProviderRef};
use crate::routing_table::RoutingTable;

/// Default PING timeout: 2000 virtual-ms at the default 100ms tick.
pub const PING_TIMEOUT_TICKS: u64 = 20;
/// Default maximum retry count before a stale contact is evicted.
pub const MAX_RETRIES: u32 = 2;

/// The capability set a node needs from the simulator. Implemented by
/// `Simulator` itself; kept as a trait so node logic can be exercised
/// without a full simulator in tests.
pub trait SimHandle {
    fn send_message(&mut self, msg: Message);
    fn schedule_event(&mut self, event: Event);
    fn get_current_time(&self) -> u64;
    /// Fresh, globally-unique transaction id.
    fn next_transaction_id(&mut self) -> u64;
}

/// What a pending request is waiting for, and what to do when it resolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingKind {
    Ping,
    JoinBootstrap,
    StoreFile { file_id: FileId },
    FindValue { file_id: FileId },
    Store { file_id: FileId },
}

#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub kind: PendingKind,
    pub target_id: NodeId,
    pub sent_at: u64,
    pub retry_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRecord {
    pub address: Address,
    pub last_seen: u64,
}

/// One peer's complete Kademlia-protocol state.
pub struct DhtNode {
    pub node_id: NodeId,
    pub address: Address,
    pub routing_table: RoutingTable,
    pub file_providers: HashMap<FileId, Vec<ProviderRecord>>,
    pub owned_files: std::collections::HashSet<FileId>,
    pub is_online: bool,
    pending: HashMap<u64, PendingRequest>,
    k: usize,
}

impl DhtNode {
    pub fn new(node_id: NodeId, address: Address, k_value: usize, id_bits: usize) -> Self {
        DhtNode {
            routing_table: RoutingTable::new(node_id.clone(), k_value, id_bits),
            node_id,
            address,
            file_providers: HashMap::new(),
            owned_files: std::collections::HashSet::new(),
            is_online: false,
            pending: HashMap::new(),
            k: k_value,
        }
    }

    /// Mark online; if `seed_id` is given and isn't self, bootstrap via a
    /// `FIND_NODE(self_id)` request to it. Idempotent.
    pub fn join(&mut self, seed_id: Option<NodeId>, sim: &mut impl SimHandle) {
        if self.is_online {
            return;
        }
        self.is_online = true;

        if let Some(seed) = seed_id {
            if seed != self.node_id {
                self.send_find_node(seed, self.node_id.clone(), PendingKind::JoinBootstrap, sim);
            }
        }
    }

    /// Mark offline. No further messages are sent; incoming messages are
    /// dropped silently by the simulator's delivery step.
    pub fn leave(&mut self) {
        self.is_online = false;
    }

    /// Add to `owned_files`; ask the K closest known contacts for the file
    /// id's neighborhood, then STORE to whoever they return.
    pub fn publish(&mut self, file_id: FileId, sim: &mut impl SimHandle) {
        if !self.is_online {
            return;
        }
        self.owned_files.insert(file_id.clone());

        let closest = self.routing_table.find_closest(&file_id, self.k);
        for contact in closest {
            self.send_find_node(
                contact.node_id,
                file_id.clone(),
                PendingKind::StoreFile {
                    file_id: file_id.clone(),
                },
                sim,
            );
        }
    }

    /// Return locally if owned; else kick off an iterative `FIND_VALUE`
    /// against the K closest known contacts.
    pub fn retrieve(&mut self, file_id: FileId, sim: &mut impl SimHandle) {
        if !self.is_online {
            return;
        }
        if self.owned_files.contains(&file_id) {
            return;
        }

        let closest = self.routing_table.find_closest(&file_id, self.k);
        for contact in closest {
            self.send_find_value(contact.node_id, file_id.clone(), sim);
        }
    }

    /// Handle a scenario/simulator-originated event. Only `NODE_LEAVE` (for
    /// a peer other than self) and `SIMULATION_TICK` are meaningful here;
    /// everything else is the scenario driver's concern.
    pub fn handle_event(&mut self, event: &Event, sim: &mut impl SimHandle) {
        match &event.params {
            EventParams::SimulationTick { .. } => self.sweep_pending_pings(sim),
            EventParams::NodeLeave { node_id } => {
                if node_id != &self.node_id {
                    self.routing_table.remove(node_id);
                }
            }
            _ => {}
        }
    }

    /// Dispatch a received message. Returns an optional response for the
    /// simulator to send back. Offline nodes drop everything silently.
    pub fn handle_message(&mut self, message: Message, sim: &mut impl SimHandle) -> Option<Message> {
        if !self.is_online {
            return None;
        }

        // Known quirk (documented, preserved intentionally): the source id
        // is passed as both the node id and the address parameter here,
        // rather than the sender's real address.
        let now = sim.get_current_time();
        self.routing_table.update(
            message.source_id.clone(),
            Address(message.source_id.as_bytes().to_vec()),
            now,
        );

        match message.kind {
            MessageType::Ping => self.handle_ping(&message),
            MessageType::Pong => {
                self.handle_pong(&message);
                None
            }
            MessageType::FindNode => self.handle_find_node(&message),
            MessageType::FindNodeResponse => {
                self.handle_find_node_response(&message, sim);
                None
            }
            MessageType::FindValue => self.handle_find_value(&message),
            MessageType::FindValueResponse => {
                self.handle_find_value_response(&message, sim);
                None
            }
            MessageType::Store => self.handle_store(&message, now),
            MessageType::StoreResponse => {
                self.pending.remove(&message.transaction_id);
                None
            }
            MessageType::Bootstrap | MessageType::Announce => None,
        }
    }

    fn handle_ping(&mut self, message: &Message) -> Option<Message> {
        let retry_count = match &message.content {
            Content::Ping { retry_count, .. } => *retry_count,
            _ => return None,
        };
        message.create_response(Content::pong(retry_count), Some(MessageType::Pong)).ok()
    }

    fn handle_pong(&mut self, message: &Message) {
        // The generic per-message routing-table update above already
        // refreshed `last_seen` for the source; a matching pending PING
        // just needs to be retired.
        self.pending.remove(&message.transaction_id);
    }

    fn handle_find_node(&mut self, message: &Message) -> Option<Message> {
        let target = match &message.content {
            Content::FindNodeRequest { target } => target.clone(),
            _ => return None,
        };
        let nodes = self
            .routing_table
            .find_closest(&target, self.k)
            .into_iter()
            .filter(|c| c.node_id != message.source_id)
            .map(|c| NodeRef {
                id: c.node_id,
                address: c.address,
            })
            .collect();

        message
            .create_response(
                Content::FindNodeResponse { nodes },
                Some(MessageType::FindNodeResponse),
            )
            .ok()
    }

    fn handle_find_node_response(&mut self, message: &Message, sim: &mut impl SimHandle) {
        let Some(pending) = self.pending.remove(&message.transaction_id) else {
            return;
        };
        let nodes = match &message.content {
            Content::FindNodeResponse { nodes } => nodes.clone(),
            _ => return,
        };
        let now = sim.get_current_time();
        for n in &nodes {
            self.routing_table.update(n.id.clone(), n.address.clone(), now);
        }

        match pending.kind {
            PendingKind::JoinBootstrap => {
                for n in nodes {
                    if n.id != self.node_id {
                        self.send_ping(n.id, sim);
                    }
                }
            }
            PendingKind::StoreFile { file_id } => {
                for n in nodes {
                    if n.id != self.node_id {
                        self.send_store(n.id, file_id.clone(), sim);
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_find_value(&mut self, message: &Message) -> Option<Message> {
        let key = match &message.content {
            Content::FindValueRequest { key } => key.clone(),
            _ => return None,
        };

        if let Some(providers) = self.file_providers.get(&key) {
            let providers = providers
                .iter()
                .map(|p| ProviderRef {
                    address: p.address.clone(),
                    last_seen: p.last_seen,
                })
                .collect();
            return message
                .create_response(
                    Content::FindValueFound {
                        key,
                        found: true,
                        providers,
                    },
                    Some(MessageType::FindValueResponse),
                )
                .ok();
        }

        let nodes = self
            .routing_table
            .find_closest(&key, self.k)
            .into_iter()
            .map(|c| NodeRef {
                id: c.node_id,
                address: c.address,
            })
            .collect();
        message
            .create_response(
                Content::FindValueNotFound {
                    key,
                    found: false,
                    nodes,
                },
                Some(MessageType::FindValueResponse),
            )
            .ok()
    }

    fn handle_find_value_response(&mut self, message: &Message, sim: &mut impl SimHandle) {
        let Some(pending) = self.pending.remove(&message.transaction_id) else {
            return;
        };
        let PendingKind::FindValue { file_id } = pending.kind else {
            return;
        };

        match &message.content {
            Content::FindValueFound { providers, .. } => {
                let entry = self.file_providers.entry(file_id).or_default();
                for p in providers {
                    if let Some(existing) = entry.iter_mut().find(|e| e.address == p.address) {
                        existing.last_seen = p.last_seen;
                    } else {
                        entry.push(ProviderRecord {
                            address: p.address.clone(),
                            last_seen: p.last_seen,
                        });
                    }
                }
            }
            Content::FindValueNotFound { nodes, .. } => {
                let now = sim.get_current_time();
                for n in nodes {
                    self.routing_table.update(n.id.clone(), n.address.clone(), now);
                    self.send_find_value(n.id.clone(), file_id.clone(), sim);
                }
            }
            _ => {}
        }
    }

    fn handle_store(&mut self, message: &Message, now: u64) -> Option<Message> {
        let (key, provider) = match &message.content {
            Content::StoreRequest { key, provider } => (key.clone(), provider.clone()),
            _ => return None,
        };

        let entry = self.file_providers.entry(key).or_default();
        if let Some(existing) = entry.iter_mut().find(|e| e.address == provider) {
            existing.last_seen = now;
        } else {
            entry.push(ProviderRecord {
                address: provider,
                last_seen: now,
            });
        }

        message
            .create_response(
                Content::StoreResponse {
                    status: "success".to_string(),
                },
                Some(MessageType::StoreResponse),
            )
            .ok()
    }

    /// Scan pending PINGs, retrying or evicting those past `PING_TIMEOUT_TICKS`.
    /// Run once per `SIMULATION_TICK`.
    fn sweep_pending_pings(&mut self, sim: &mut impl SimHandle) {
        let now = sim.get_current_time();
        let mut expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.kind == PendingKind::Ping && now.saturating_sub(p.sent_at) >= PING_TIMEOUT_TICKS)
            .map(|(txn, _)| *txn)
            .collect();
        // `pending` is a `HashMap`; sort by transaction id (assigned in
        // strictly increasing order) so a tick that expires several PINGs
        // at once resends/evicts them in a fixed order instead of whatever
        // order the hash table happens to iterate in — each resend draws
        // from the shared RNG, so this order is part of the deterministic
        // replay contract.
        expired.sort_unstable();

        for txn in expired {
            let Some(mut pending) = self.pending.remove(&txn) else {
                continue;
            };
            if pending.retry_count < MAX_RETRIES {
                pending.retry_count += 1;
                pending.sent_at = now;
                let target = pending.target_id.clone();
                self.pending.insert(txn, pending.clone());
                self.resend_ping(txn, target, pending.retry_count, sim);
            } else {
                self.routing_table.remove(&pending.target_id);
            }
        }
    }

    fn resend_ping(&mut self, transaction_id: u64, target: NodeId, retry_count: u32, sim: &mut impl SimHandle) {
        let msg = Message::new(
            MessageType::Ping,
            self.node_id.clone(),
            target,
            Content::ping(retry_count),
            transaction_id,
        );
        sim.send_message(msg);
    }

    fn send_ping(&mut self, target_id: NodeId, sim: &mut impl SimHandle) {
        let txn = sim.next_transaction_id();
        let msg = Message::new(
            MessageType::Ping,
            self.node_id.clone(),
            target_id.clone(),
            Content::ping(0),
            txn,
        );
        self.pending.insert(
            txn,
            PendingRequest {
                kind: PendingKind::Ping,
                target_id,
                sent_at: sim.get_current_time(),
                retry_count: 0,
            },
        );
        sim.send_message(msg);
    }

    fn send_find_node(
        &mut self,
        target_id: NodeId,
        node_id_to_find: NodeId,
        kind: PendingKind,
        sim: &mut impl SimHandle,
    ) {
        let txn = sim.next_transaction_id();
        let msg = Message::new(
            MessageType::FindNode,
            self.node_id.clone(),
            target_id.clone(),
            Content::FindNodeRequest {
                target: node_id_to_find,
            },
            txn,
        );
        self.pending.insert(
            txn,
            PendingRequest {
                kind,
                target_id,
                sent_at: sim.get_current_time(),
                retry_count: 0,
            },
        );
        sim.send_message(msg);
    }

    fn send_find_value(&mut self, target_id: NodeId, file_id: FileId, sim: &mut impl SimHandle) {
        let txn = sim.next_transaction_id();
        let msg = Message::new(
            MessageType::FindValue,
            self.node_id.clone(),
            target_id.clone(),
            Content::FindValueRequest { key: file_id.clone() },
            txn,
        );
        self.pending.insert(
            txn,
            PendingRequest {
                kind: PendingKind::FindValue { file_id },
                target_id,
                sent_at: sim.get_current_time(),
                retry_count: 0,
            },
        );
        sim.send_message(msg);
    }

    fn send_store(&mut self, target_id: NodeId, file_id: FileId, sim: &mut impl SimHandle) {
        let txn = sim.next_transaction_id();
        let msg = Message::new(
            MessageType::Store,
            self.node_id.clone(),
            target_id.clone(),
            Content::StoreRequest {
                key: file_id.clone(),
                provider: self.address.clone(),
            },
            txn,
        );
        self.pending.insert(
            txn,
            PendingRequest {
                kind: PendingKind::Store { file_id },
                target_id,
                sent_at: sim.get_current_time(),
                retry_count: 0,
            },
        );
        sim.send_message(msg);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Log an unrecognized source/target at warning level, per the protocol
/// anomaly error category (never fatal).
pub fn warn_unknown_node(context: &str, node_id: &NodeId) {
    warn!(node = %node_id, "{context}: unknown node id");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSim {
        time: u64,
        next_txn: u64,
        sent: Vec<Message>,
        scheduled: Vec<Event>,
    }

    impl FakeSim {
        fn new() -> Self {
            FakeSim {
                time: 0,
                next_txn: 0,
                sent: Vec::new(),
                scheduled: Vec::new(),
            }
        }
    }

    impl SimHandle for FakeSim {
        fn send_message(&mut self, msg: Message) {
            self.sent.push(msg);
        }
        fn schedule_event(&mut self, event: Event) {
            self.scheduled.push(event);
        }
        fn get_current_time(&self) -> u64 {
            self.time
        }
        fn next_transaction_id(&mut self) -> u64 {
            let t = self.next_txn;
            self.next_txn += 1;
            t
        }
    }

    fn id(b: u8) -> NodeId {
        NodeId(vec![b; 20])
    }
    fn addr(b: u8) -> Address {
        Address(vec![b; 4])
    }

    #[test]
    fn join_is_idempotent() {
        let mut sim = FakeSim::new();
        let mut node = DhtNode::new(id(1), addr(1), 8, 160);
        node.join(None, &mut sim);
        node.join(None, &mut sim);
        assert!(node.is_online);
    }

    #[test]
    fn join_with_seed_sends_find_node() {
        let mut sim = FakeSim::new();
        let mut node = DhtNode::new(id(1), addr(1), 8, 160);
        node.join(Some(id(2)), &mut sim);
        assert_eq!(sim.sent.len(), 1);
        assert_eq!(sim.sent[0].kind, MessageType::FindNode);
        assert_eq!(sim.sent[0].target_id, id(2));
    }

    #[test]
    fn ping_is_answered_with_pong_echoing_retry_count() {
        let mut sim = FakeSim::new();
        let mut node = DhtNode::new(id(1), addr(1), 8, 160);
        node.is_online = true;
        let req = Message::new(MessageType::Ping, id(2), id(1), Content::ping(1), 5);
        let resp = node.handle_message(req, &mut sim).expect("ping gets a pong");
        assert_eq!(resp.kind, MessageType::Pong);
        match resp.content {
            Content::Pong { retry_count, .. } => assert_eq!(retry_count, 1),
            _ => unreachable!("a pong response always carries Pong content"),
        }
    }

    #[test]
    fn offline_node_drops_all_messages() {
        let mut sim = FakeSim::new();
        let mut node = DhtNode::new(id(1), addr(1), 8, 160);
        let req = Message::new(MessageType::Ping, id(2), id(1), Content::ping(0), 1);
        assert!(node.handle_message(req, &mut sim).is_none());
    }

    #[test]
    fn retrieve_of_owned_file_produces_no_messages() {
        let mut sim = FakeSim::new();
        let mut node = DhtNode::new(id(1), addr(1), 8, 160);
        node.is_online = true;
        node.owned_files.insert(id(9));
        node.retrieve(id(9), &mut sim);
        assert!(sim.sent.is_empty());
    }

    #[test]
    fn store_request_creates_provider_record_and_acks() {
        let mut sim = FakeSim::new();
        let mut node = DhtNode::new(id(1), addr(1), 8, 160);
        node.is_online = true;
        let req = Message::new(
            MessageType::Store,
            id(2),
            id(1),
            Content::StoreRequest {
                key: id(9),
                provider: addr(2),
            },
            3,
        );
        let resp = node.handle_message(req, &mut sim).expect("store gets an ack");
        assert_eq!(resp.kind, MessageType::StoreResponse);
        assert!(node.file_providers.get(&id(9)).is_some());
    }

    #[test]
    fn ping_timeout_with_no_reply_evicts_after_max_retries() {
        let mut sim = FakeSim::new();
        let mut node = DhtNode::new(id(1), addr(1), 8, 160);
        node.is_online = true;
        node.routing_table.update(id(2), addr(2), 0);
        node.send_ping(id(2), &mut sim);

        for step in 0..=(MAX_RETRIES as u64 + 1) {
            sim.time = PING_TIMEOUT_TICKS * (step + 1);
            node.sweep_pending_pings(&mut sim);
        }

        assert!(!node.routing_table.contains(&id(2)));
    }
}
