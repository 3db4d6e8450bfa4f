//! Tagged simulation events and the min-heap event queue that orders them.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::ids::{FileId, NodeId};
use crate::message::Message;

/// Event-type-specific parameters. Kept as a tagged variant per the design
/// notes rather than an untyped mapping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EventParams {
    SimulationStart,
    SimulationTick { time: u64 },
    SimulationEnd,
    NodeJoin { node_id: NodeId, seed_node_id: Option<NodeId> },
    NodeLeave { node_id: NodeId },
    FilePublish { node_id: NodeId, file_id: FileId },
    FileRetrieve { node_id: NodeId, file_id: FileId },
    MessageSent { message: Message },
    MessageReceived { message: Message },
    MessageDropped { message: Message },
}

/// A single scheduled occurrence. Immutable after enqueue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub time: u64,
    pub params: EventParams,
}

impl Event {
    pub fn new(time: u64, params: EventParams) -> Self {
        Event { time, params }
    }
}

/// Heap entry ordering key: `(time, insertion_seq)`. The insertion sequence
/// breaks ties so events scheduled for the same virtual time drain in the
/// order they were scheduled — required for deterministic replay.
#[derive(PartialEq, Eq)]
struct HeapKey(u64, u64);

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.0, self.1).cmp(&(other.0, other.1))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A queued event paired with its ordering key. `Ord` delegates entirely to
/// `key` so `Event` itself never needs to implement ordering.
struct Entry {
    key: HeapKey,
    event: Event,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// Min-heap over `(time, insertion_seq)`, backed by `BinaryHeap<Reverse<_>>`
/// since `BinaryHeap` is a max-heap by default.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Enqueue `event`, O(log n).
    pub fn schedule(&mut self, event: Event) {
        let key = HeapKey(event.time, self.next_seq);
        self.next_seq += 1;
        self.heap.push(Reverse(Entry { key, event }));
    }

    /// Time of the next event to pop, if any.
    pub fn peek_time(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(entry)| entry.key.0)
    }

    /// Pop the earliest-time, earliest-inserted event, O(log n).
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|Reverse(entry)| entry.event)
    }

    pub fn has_events(&self) -> bool {
        !self.heap.is_empty()
    }

    pub fn count(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_ascending_time_order() {
        let mut q = EventQueue::new();
        q.schedule(Event::new(5, EventParams::SimulationTick { time: 5 }));
        q.schedule(Event::new(1, EventParams::SimulationTick { time: 1 }));
        q.schedule(Event::new(3, EventParams::SimulationTick { time: 3 }));

        let times: Vec<u64> = std::iter::from_fn(|| q.pop()).map(|e| e.time).collect();
        assert_eq!(times, vec![1, 3, 5]);
    }

    #[test]
    fn ties_are_broken_fifo() {
        let mut q = EventQueue::new();
        for i in 0..5u64 {
            q.schedule(Event::new(10, EventParams::SimulationTick { time: i }));
        }
        let order: Vec<u64> = std::iter::from_fn(|| q.pop())
            .map(|e| match e.params {
                EventParams::SimulationTick { time } => time,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn count_and_clear() {
        let mut q = EventQueue::new();
        q.schedule(Event::new(1, EventParams::SimulationStart));
        q.schedule(Event::new(2, EventParams::SimulationEnd));
        assert_eq!(q.count(), 2);
        q.clear();
        assert!(!q.has_events());
    }
}
