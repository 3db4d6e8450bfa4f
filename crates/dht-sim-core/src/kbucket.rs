//! A single K-bucket: an LRU-ordered, bounded list of contacts.

use std::collections::VecDeque;

use crate::ids::{Address, NodeId};

/// `(node_id, address, last_seen_time)`, stored in K-buckets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub node_id: NodeId,
    pub address: Address,
    pub last_seen: u64,
}

/// Result of `KBucket::touch`.
#[derive(Debug, PartialEq, Eq)]
pub enum TouchOutcome {
    /// Contact was already present; moved to the tail and refreshed.
    Updated,
    /// Contact was absent and there was room; appended at the tail.
    Inserted,
    /// Contact was absent and the bucket is at capacity. No eviction is
    /// performed here — tail-drop of the new contact is this spec's policy;
    /// the caller may later PING the head to revalidate it.
    Full,
}

/// Ordered least-recently-seen (head) to most-recently-seen (tail).
/// Invariants: no duplicate `node_id`; length never exceeds `k`.
#[derive(Clone, Debug)]
pub struct KBucket {
    k: usize,
    contacts: VecDeque<Contact>,
}

impl KBucket {
    pub fn new(k: usize) -> Self {
        KBucket {
            k,
            contacts: VecDeque::with_capacity(k),
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.contacts.iter().any(|c| &c.node_id == id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Contact> {
        self.contacts.iter().find(|c| &c.node_id == id)
    }

    /// Touch a contact: refresh if present, insert if there's room, else
    /// report `Full` without mutating the bucket.
    pub fn touch(&mut self, node_id: NodeId, address: Address, last_seen: u64) -> TouchOutcome {
        if let Some(pos) = self.contacts.iter().position(|c| c.node_id == node_id) {
            self.contacts.remove(pos);
            self.contacts.push_back(Contact {
                node_id,
                address,
                last_seen,
            });
            return TouchOutcome::Updated;
        }

        if self.contacts.len() < self.k {
            self.contacts.push_back(Contact {
                node_id,
                address,
                last_seen,
            });
            return TouchOutcome::Inserted;
        }

        TouchOutcome::Full
    }

    pub fn remove(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.contacts.iter().position(|c| &c.node_id == id) {
            self.contacts.remove(pos);
            true
        } else {
            false
        }
    }

    /// The least-recently-seen (head) contact, if any.
    pub fn oldest(&self) -> Option<&Contact> {
        self.contacts.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        NodeId(vec![b; 20])
    }
    fn addr(b: u8) -> Address {
        Address(vec![b; 4])
    }

    #[test]
    fn touch_inserts_then_updates_moves_to_tail() {
        let mut b = KBucket::new(2);
        assert_eq!(b.touch(id(1), addr(1), 0), TouchOutcome::Inserted);
        assert_eq!(b.touch(id(2), addr(2), 1), TouchOutcome::Inserted);
        assert_eq!(b.touch(id(1), addr(9), 5), TouchOutcome::Updated);
        assert_eq!(b.oldest().expect("bucket has an oldest contact").node_id, id(2));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn touch_idempotent_membership() {
        let mut b = KBucket::new(4);
        b.touch(id(1), addr(1), 0);
        b.touch(id(1), addr(1), 0);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn touch_on_full_bucket_reports_full_without_evicting() {
        let mut b = KBucket::new(1);
        b.touch(id(1), addr(1), 0);
        assert_eq!(b.touch(id(2), addr(2), 1), TouchOutcome::Full);
        assert_eq!(b.len(), 1);
        assert!(b.contains(&id(1)));
        assert!(!b.contains(&id(2)));
    }

    #[test]
    fn k_equal_one_retains_only_most_recent_on_touch_of_existing() {
        let mut b = KBucket::new(1);
        b.touch(id(1), addr(1), 0);
        assert_eq!(b.touch(id(1), addr(2), 3), TouchOutcome::Updated);
        assert_eq!(b.get(&id(1)).expect("contact is present").last_seen, 3);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut b: KBucket = KBucket::new(4);
        assert!(!b.remove(&id(9)));
    }
}
