// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Distance-vector routing table: known peers, their candidate hop-chains,
//! and the one-shot "peer first appeared" signal used by `wait_for_connect`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Everything this node knows about a remote device.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Name of the transport whose wire currently carries the shortest chain.
    pub iface: String,
    /// Candidate hop-chains, sorted shortest-first. Never empty once the
    /// peer is known.
    pub chains: Vec<Vec<u8>>,
}

impl PeerRecord {
    pub fn distance(&self) -> usize {
        self.chains.first().map(|c| c.len()).unwrap_or(0)
    }
}

/// Table of known peers plus the signals used to wake `wait_for_connect`.
#[derive(Default)]
pub struct RoutingTable {
    peers: HashMap<u8, PeerRecord>,
    notifiers: HashMap<u8, Arc<Notify>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` was reached via `chain` over `iface`. Returns `true`
    /// if this is the first time `id` has been observed.
    ///
    /// If `id` is new, it is inserted with the single chain given. If it is
    /// already known, `chain` is inserted into the candidate list at the
    /// position that keeps the list sorted shortest-first; if the new chain
    /// is strictly shorter than the previous best, `iface` also becomes the
    /// new best interface.
    pub fn observe(&mut self, id: u8, chain: Vec<u8>, iface: &str) -> bool {
        match self.peers.get_mut(&id) {
            None => {
                self.peers.insert(
                    id,
                    PeerRecord {
                        iface: iface.to_string(),
                        chains: vec![chain],
                    },
                );
                self.signal_connected(id);
                true
            }
            Some(record) => {
                let was_shortest = record.chains.first().map(|c| c.len());
                let pos = record
                    .chains
                    .iter()
                    .position(|existing| existing.len() >= chain.len())
                    .unwrap_or(record.chains.len());
                // Duplicate chain for the same peer: idempotent, no insert.
                // Scan the whole equal-length run starting at `pos`, not just
                // the first entry there, since several distinct chains can
                // share a length.
                let is_duplicate = record.chains[pos..]
                    .iter()
                    .take_while(|existing| existing.len() == chain.len())
                    .any(|existing| *existing == chain);
                if !is_duplicate {
                    record.chains.insert(pos, chain);
                }
                if let Some(prev_len) = was_shortest {
                    if record.chains[0].len() < prev_len {
                        record.iface = iface.to_string();
                    }
                }
                false
            }
        }
    }

    /// Remove a peer entirely and reset its `awaiting_connection` signal so
    /// a later `wait_for_connect` call for the same id waits again.
    pub fn forget(&mut self, id: u8) -> Option<PeerRecord> {
        self.notifiers.remove(&id);
        self.peers.remove(&id)
    }

    pub fn best_iface(&self, id: u8) -> Option<&str> {
        self.peers.get(&id).map(|r| r.iface.as_str())
    }

    pub fn distance(&self, id: u8) -> Option<usize> {
        self.peers.get(&id).map(|r| r.distance())
    }

    pub fn chains(&self, id: u8) -> Option<&[Vec<u8>]> {
        self.peers.get(&id).map(|r| r.chains.as_slice())
    }

    pub fn contains(&self, id: u8) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.peers.keys().copied()
    }

    /// The notifier for `id`, creating one if this is the first caller to
    /// ask for it.
    pub fn notifier(&mut self, id: u8) -> Arc<Notify> {
        self.notifiers
            .entry(id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn signal_connected(&mut self, id: u8) {
        self.notifier(id).notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_new_peer_inserts_single_chain() {
        let mut table = RoutingTable::new();
        assert!(table.observe(12, vec![11], "uart0"));
        assert_eq!(table.best_iface(12), Some("uart0"));
        assert_eq!(table.distance(12), Some(1));
    }

    #[test]
    fn distance_vector_scenario_s3() {
        // A=10 receives add(12, []) from neighbour B=11 on iface "uart0".
        let mut table = RoutingTable::new();
        assert!(table.observe(12, vec![11], "uart0"));
        assert_eq!(table.best_iface(12), Some("uart0"));

        // Later, on a different iface, add(12, [13,14]) arrives.
        assert!(!table.observe(12, vec![13, 14], "uart1"));

        // iface unchanged (new chain longer); both chains retained, sorted.
        assert_eq!(table.best_iface(12), Some("uart0"));
        assert_eq!(
            table.chains(12).unwrap(),
            &[vec![11], vec![13, 14]][..]
        );
    }

    #[test]
    fn shorter_chain_promotes_iface() {
        let mut table = RoutingTable::new();
        table.observe(12, vec![13, 14], "uart1");
        table.observe(12, vec![11], "uart0");
        assert_eq!(table.best_iface(12), Some("uart0"));
        assert_eq!(table.distance(12), Some(1));
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let mut table = RoutingTable::new();
        table.observe(12, vec![11], "uart0");
        table.observe(12, vec![11], "uart0");
        assert_eq!(table.chains(12).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_add_is_idempotent_among_several_equal_length_chains() {
        let mut table = RoutingTable::new();
        table.observe(12, vec![13, 14], "uart0");
        table.observe(12, vec![15, 16], "uart1");
        assert_eq!(table.chains(12).unwrap().len(), 2);

        // re-observing the second (non-first) equal-length chain must not
        // insert a duplicate.
        table.observe(12, vec![15, 16], "uart1");
        assert_eq!(table.chains(12).unwrap().len(), 2);
    }

    #[test]
    fn forget_removes_peer() {
        let mut table = RoutingTable::new();
        table.observe(12, vec![11], "uart0");
        assert!(table.forget(12).is_some());
        assert!(!table.contains(12));
        assert!(table.forget(12).is_none());
    }

    #[tokio::test]
    async fn wait_for_connect_wakes_on_first_observation() {
        let table = Arc::new(tokio::sync::Mutex::new(RoutingTable::new()));
        let notify = table.lock().await.notifier(99);

        let waiter = tokio::spawn(async move {
            notify.notified().await;
        });

        tokio::task::yield_now().await;
        table.lock().await.observe(99, vec![], "uart0");

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("wait_for_connect should wake promptly")
            .unwrap();
    }
}
