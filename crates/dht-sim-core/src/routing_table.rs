//! `id_bits` K-buckets indexed by common-prefix length, queried by XOR
//! distance. A deliberately naive full-scan `find_closest` — fine at the
//! scales this simulator targets, and simpler to keep deterministic than a
//! prefix-tree structure would be.

use crate::ids::{self, Address, NodeId};
use crate::kbucket::{Contact, KBucket, TouchOutcome};

pub struct RoutingTable {
    self_id: NodeId,
    k: usize,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId, k: usize, id_bits: usize) -> Self {
        RoutingTable {
            self_id,
            k,
            buckets: (0..id_bits).map(|_| KBucket::new(k)).collect(),
        }
    }

    /// Never inserts `self_id`. Computes the bucket index and delegates to
    /// `KBucket::touch`. Returns whether the contact is present afterward.
    pub fn update(&mut self, node_id: NodeId, address: Address, last_seen: u64) -> bool {
        if node_id == self.self_id {
            return false;
        }
        let idx = match ids::bucket_index(&self.self_id, &node_id) {
            Ok(Some(idx)) => idx,
            _ => return false,
        };
        match self.buckets[idx].touch(node_id, address, last_seen) {
            TouchOutcome::Updated | TouchOutcome::Inserted => true,
            TouchOutcome::Full => false,
        }
    }

    pub fn remove(&mut self, node_id: &NodeId) -> bool {
        match ids::bucket_index(&self.self_id, node_id) {
            Ok(Some(idx)) => self.buckets[idx].remove(node_id),
            _ => false,
        }
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        match ids::bucket_index(&self.self_id, node_id) {
            Ok(Some(idx)) => self.buckets[idx].contains(node_id),
            _ => false,
        }
    }

    pub fn bucket(&self, node_id: &NodeId) -> Option<&KBucket> {
        match ids::bucket_index(&self.self_id, node_id) {
            Ok(Some(idx)) => Some(&self.buckets[idx]),
            _ => None,
        }
    }

    /// Scan every bucket, rank by XOR distance to `target`, and return the
    /// `n` closest contacts in ascending-distance order, tie-broken
    /// lexicographically by node id for determinism.
    pub fn find_closest(&self, target: &NodeId, n: usize) -> Vec<Contact> {
        let mut all: Vec<(Vec<u8>, Contact)> = self
            .buckets
            .iter()
            .flat_map(|b| b.iter())
            .filter_map(|c| {
                ids::distance(&c.node_id, target)
                    .ok()
                    .map(|d| (d, c.clone()))
            })
            .collect();

        all.sort_by(|(d1, c1), (d2, c2)| d1.cmp(d2).then_with(|| c1.node_id.cmp(&c2.node_id)));
        all.into_iter().take(n).map(|(_, c)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
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
    fn update_rejects_self() {
        let mut rt = RoutingTable::new(id(0), 8, 160);
        assert!(!rt.update(id(0), addr(0), 0));
        assert!(rt.is_empty());
    }

    #[test]
    fn update_places_contact_in_the_expected_bucket() {
        let mut rt = RoutingTable::new(id(0), 8, 160);
        rt.update(id(1), addr(1), 0);
        assert!(rt.contains(&id(1)));
        let idx = ids::bucket_index(&id(0), &id(1))
            .expect("equal lengths")
            .expect("distinct ids");
        assert!(rt.buckets[idx].contains(&id(1)));
    }

    #[test]
    fn find_closest_is_bounded_sorted_and_deduped() {
        let mut rt = RoutingTable::new(id(0), 8, 160);
        for i in 1..=10u8 {
            rt.update(id(i), addr(i), i as u64);
        }
        let closest = rt.find_closest(&id(5), 3);
        assert_eq!(closest.len(), 3);
        let mut seen = std::collections::HashSet::new();
        for c in &closest {
            assert!(seen.insert(c.node_id.clone()));
        }
    }

    #[test]
    fn find_closest_on_empty_table_returns_empty() {
        let rt = RoutingTable::new(id(0), 8, 160);
        assert!(rt.find_closest(&id(1), 5).is_empty());
    }

    #[test]
    fn id_bits_eight_boundary_still_operates() {
        let mut rt = RoutingTable::new(NodeId(vec![0x00]), 8, 8);
        assert!(rt.update(NodeId(vec![0x01]), Address(vec![0]), 0));
        assert_eq!(rt.len(), 1);
    }
}
