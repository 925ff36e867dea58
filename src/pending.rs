// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client-side request futures and sender-side ack tracking.

use crate::codec::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

/// Outcome delivered to a caller's `get`/`put` future when the matching ack
/// arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Status 255. Carries a decoded value for `get` responses.
    Success(Option<Value>),
    /// Status 127: the remote node rejected the request.
    Failure,
}

/// Client-side table: sequence -> the future a caller is awaiting.
///
/// Per sequence at most one future exists; resolving it removes the entry,
/// so consumption is single-consumer.
#[derive(Default)]
pub struct PendingRequests {
    futures: Mutex<HashMap<u16, oneshot::Sender<AckOutcome>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request, returning the receiver half the caller awaits.
    pub async fn register(&self, sequence: u16) -> oneshot::Receiver<AckOutcome> {
        let (tx, rx) = oneshot::channel();
        self.futures.lock().await.insert(sequence, tx);
        rx
    }

    /// Resolve the future registered for `sequence`, if any. Returns `true`
    /// if a waiting future was found (and thus removed).
    pub async fn resolve(&self, sequence: u16, outcome: AckOutcome) -> bool {
        if let Some(tx) = self.futures.lock().await.remove(&sequence) {
            let _ = tx.send(outcome);
            true
        } else {
            false
        }
    }

    /// Drop (without resolving) the entry for `sequence`, e.g. because the
    /// caller's own deadline already elapsed.
    pub async fn cancel(&self, sequence: u16) {
        self.futures.lock().await.remove(&sequence);
    }
}

/// A sender-side ack still awaiting confirmation on one transport.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub deadline: Instant,
    pub frame: Vec<u8>,
    pub retries: u8,
}

/// Result of one ack-reaper sweep.
pub struct ReapResult {
    /// Frames to retransmit unchanged (their entries were given one more
    /// `retry_timeout` window).
    pub to_retransmit: Vec<(u16, Vec<u8>)>,
    /// Sequences whose second timeout declares the neighbour disconnected.
    pub disconnected: Vec<u16>,
}

/// Per-transport table of frames awaiting an ack, guarded by a single short
/// lock (`ack_lock` in the design notes) so no suspension ever happens while
/// it is held.
#[derive(Default)]
pub struct PendingAcks {
    entries: Mutex<HashMap<u16, PendingAck>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `frame` was just sent requesting an ack, due by
    /// `now + retry_timeout`.
    pub async fn insert(&self, sequence: u16, frame: Vec<u8>, retry_timeout: Duration) {
        self.entries.lock().await.insert(
            sequence,
            PendingAck {
                deadline: Instant::now() + retry_timeout,
                frame,
                retries: 0,
            },
        );
    }

    /// Remove the entry for `sequence` because its ack arrived.
    pub async fn remove(&self, sequence: u16) -> Option<PendingAck> {
        self.entries.lock().await.remove(&sequence)
    }

    /// Walk every entry past its deadline: a first timeout retransmits once,
    /// a second declares the neighbour on this transport disconnected.
    pub async fn reap_due(&self, retry_timeout: Duration) -> ReapResult {
        let now = Instant::now();
        let mut map = self.entries.lock().await;
        let mut to_retransmit = Vec::new();
        let mut disconnected = Vec::new();

        for (sequence, entry) in map.iter_mut() {
            if now < entry.deadline {
                continue;
            }
            if entry.retries == 0 {
                entry.retries = 1;
                entry.deadline = now + retry_timeout;
                to_retransmit.push((*sequence, entry.frame.clone()));
            } else {
                disconnected.push(*sequence);
            }
        }
        for sequence in &disconnected {
            map.remove(sequence);
        }
        ReapResult {
            to_retransmit,
            disconnected,
        }
    }

    /// Drop every outstanding entry, e.g. once a neighbour is declared gone.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_outcome_to_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.register(7).await;
        assert!(pending.resolve(7, AckOutcome::Success(None)).await);
        assert_eq!(rx.await.unwrap(), AckOutcome::Success(None));
    }

    #[tokio::test]
    async fn resolve_unknown_sequence_is_noop() {
        let pending = PendingRequests::new();
        assert!(!pending.resolve(7, AckOutcome::Failure).await);
    }

    #[tokio::test]
    async fn ack_reaper_retransmits_once_then_disconnects() {
        let acks = PendingAcks::new();
        let retry_timeout = Duration::from_millis(1);
        acks.insert(1, vec![0xAB], retry_timeout).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        let first = acks.reap_due(retry_timeout).await;
        assert_eq!(first.to_retransmit, vec![(1, vec![0xAB])]);
        assert!(first.disconnected.is_empty());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = acks.reap_due(retry_timeout).await;
        assert!(second.to_retransmit.is_empty());
        assert_eq!(second.disconnected, vec![1]);
        assert!(acks.is_empty().await);
    }

    #[tokio::test]
    async fn remove_clears_entry_before_reaper_runs() {
        let acks = PendingAcks::new();
        acks.insert(2, vec![1, 2, 3], Duration::from_secs(15)).await;
        assert!(acks.remove(2).await.is_some());
        assert!(acks.is_empty().await);
    }
}
