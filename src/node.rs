// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node API: `start_network`, `stop_network`, store registration, and the
//! `get`/`put` request/response calls.

use crate::codec::{self, Datatype, Value};
use crate::config::NodeConfig;
use crate::dispatch;
use crate::error::NodeError;
use crate::pending::{AckOutcome, PendingAcks, PendingRequests};
use crate::routing::RoutingTable;
use crate::store::{Producer, StoreRegistry};
use crate::transport::ByteStream;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

/// A single transport's outgoing queue plus the ack bookkeeping owned by its
/// handler task.
pub struct TransportHandle {
    pub name: String,
    pub outgoing: mpsc::Sender<Vec<u8>>,
    pub pending_acks: PendingAcks,
    /// The id of the direct neighbour bound to this link, if any
    /// (`device_found` in the design notes).
    pub device_found: Mutex<Option<u8>>,
}

/// All mutable state shared by every task on the node's executor. Reached
/// only through `Arc`, never copied; this is the "node context" the
/// original singleton `State` object was re-architected into.
pub struct NodeState {
    pub local_id: u8,
    pub config: NodeConfig,
    pub routing: Mutex<RoutingTable>,
    pub stores: RwLock<StoreRegistry>,
    pub pending_requests: PendingRequests,
    sequence: Mutex<u16>,
    pub transports: RwLock<HashMap<String, Arc<TransportHandle>>>,
    pub shutdown: Notify,
    running: AtomicBool,
}

impl NodeState {
    /// Next sequence value: monotone, wraps from 65535 back to 1, 0 reserved.
    pub async fn next_sequence(&self) -> u16 {
        let mut seq = self.sequence.lock().await;
        *seq = if *seq >= 65535 { 1 } else { *seq + 1 };
        *seq
    }

    pub async fn enqueue(&self, iface: &str, frame: Vec<u8>) -> Result<(), NodeError> {
        let transports = self.transports.read().await;
        let handle = transports
            .get(iface)
            .ok_or_else(|| NodeError::Io(format!("unknown transport '{iface}'")))?;
        handle
            .outgoing
            .send(frame)
            .await
            .map_err(|_| NodeError::Io(format!("transport '{iface}' closed")))
    }

    /// Enqueue `frame` on every transport other than `except`.
    pub async fn broadcast_except(&self, except: &str, frame: &[u8]) {
        let transports = self.transports.read().await;
        for (name, handle) in transports.iter() {
            if name == except {
                continue;
            }
            if handle.outgoing.send(frame.to_vec()).await.is_err() {
                warn!("transport '{name}' closed while broadcasting");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A cheap, cloneable handle into a running node. Store producers,
/// scheduled coroutines, and test harnesses can each hold their own.
#[derive(Clone)]
pub struct NodeHandle {
    state: Arc<NodeState>,
}

impl NodeHandle {
    fn new(state: Arc<NodeState>) -> Self {
        Self { state }
    }

    pub fn local_id(&self) -> u8 {
        self.state.local_id
    }

    /// Register a writable store; future `put`s and `get`s address it by name.
    pub async fn define_store(
        &self,
        name: &str,
        dtype: Datatype,
        default: Value,
    ) -> Result<(), NodeError> {
        self.state
            .stores
            .write()
            .await
            .register_writable(name, dtype, default)
            .map_err(NodeError::from)
    }

    /// Register a read-only store whose value a producer computes on demand.
    pub async fn available_as(
        &self,
        name: &str,
        dtype: Datatype,
        producer: Producer,
    ) -> Result<(), NodeError> {
        self.state
            .stores
            .write()
            .await
            .register_callable(name, dtype, producer)
            .map_err(NodeError::from)
    }

    /// Suspend until `id` is first observed in the routing table.
    pub async fn wait_for_connect(&self, id: u8) {
        loop {
            let notify = {
                let mut routing = self.state.routing.lock().await;
                if routing.contains(id) {
                    return;
                }
                routing.notifier(id)
            };
            notify.notified().await;
            if self.state.routing.lock().await.contains(id) {
                return;
            }
        }
    }

    /// Remotely read `name` on `id`, waiting up to `timeout` for the reply.
    pub async fn get(
        &self,
        id: u8,
        name: &str,
        timeout: Duration,
    ) -> Result<Value, NodeError> {
        let sequence = self.state.next_sequence().await;
        let mut payload = vec![codec::CMD_GET, name.len() as u8];
        payload.extend_from_slice(name.as_bytes());

        let frame = codec::encode(self.state.local_id, id, &payload, true, Some(sequence), true)?;
        let rx = self.state.pending_requests.register(sequence).await;

        let iface = {
            let routing = self.state.routing.lock().await;
            routing
                .best_iface(id)
                .map(|s| s.to_string())
                .ok_or(NodeError::PeerDisconnected(id))?
        };
        self.state.enqueue(&iface, frame).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(AckOutcome::Success(Some(value)))) => Ok(value),
            Ok(Ok(AckOutcome::Success(None))) => Err(NodeError::RemoteRejected),
            Ok(Ok(AckOutcome::Failure)) => Err(NodeError::RemoteRejected),
            Ok(Err(_)) => Err(NodeError::PeerDisconnected(id)),
            Err(_) => {
                self.state.pending_requests.cancel(sequence).await;
                Err(NodeError::Timeout)
            }
        }
    }

    /// Remotely write `name` on `id`, waiting up to `timeout` for the ack.
    pub async fn put(
        &self,
        id: u8,
        name: &str,
        value: Value,
        timeout: Duration,
    ) -> Result<(), NodeError> {
        let sequence = self.state.next_sequence().await;
        let mut payload = vec![codec::CMD_PUT, name.len() as u8];
        payload.extend_from_slice(name.as_bytes());
        payload.push(value.dtype().wire_code());
        payload.extend_from_slice(&codec::to_bytes(&value)?);

        let frame = codec::encode(self.state.local_id, id, &payload, true, Some(sequence), true)?;
        let rx = self.state.pending_requests.register(sequence).await;

        let iface = {
            let routing = self.state.routing.lock().await;
            routing
                .best_iface(id)
                .map(|s| s.to_string())
                .ok_or(NodeError::PeerDisconnected(id))?
        };
        self.state.enqueue(&iface, frame).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(AckOutcome::Success(_))) => Ok(()),
            Ok(Ok(AckOutcome::Failure)) => Err(NodeError::RemoteRejected),
            Ok(Err(_)) => Err(NodeError::PeerDisconnected(id)),
            Err(_) => {
                self.state.pending_requests.cancel(sequence).await;
                Err(NodeError::Timeout)
            }
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.state.config.request_timeout()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.state.config
    }
}

/// Owns the running network: transport tasks plus the shared node state.
/// Dropping it does not stop the network; call `stop_network` first.
pub struct Node {
    state: Arc<NodeState>,
    scheduled: Vec<Box<dyn FnOnce(NodeHandle) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> + Send>>,
    join_set: tokio::task::JoinSet<()>,
}

impl Node {
    /// Validate `device_id` (or pick a random one in \[8,119\]) and construct
    /// an idle node. Transports are attached with `with_transport` before
    /// `start_network`.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let local_id = match config.device_id {
            Some(id) if (8..=119).contains(&id) => id,
            Some(id) => return Err(NodeError::ReservedId(id)),
            None => {
                use rand::Rng;
                rand::thread_rng().gen_range(8..=119)
            }
        };

        let state = Arc::new(NodeState {
            local_id,
            config,
            routing: Mutex::new(RoutingTable::new()),
            stores: RwLock::new(StoreRegistry::new()),
            pending_requests: PendingRequests::new(),
            sequence: Mutex::new(0),
            transports: RwLock::new(HashMap::new()),
            shutdown: Notify::new(),
            running: AtomicBool::new(false),
        });

        Ok(Self {
            state,
            scheduled: Vec::new(),
            join_set: tokio::task::JoinSet::new(),
        })
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.state.clone())
    }

    #[cfg(test)]
    pub(crate) fn state_for_test(&self) -> &Arc<NodeState> {
        &self.state
    }

    /// Enqueue a coroutine to be started once `start_network` brings the
    /// transports up.
    pub fn schedule<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(NodeHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.scheduled.push(Box::new(move |handle| Box::pin(task(handle))));
    }

    /// Attach a transport under `name`. Must be called before `start_network`.
    pub async fn with_transport(&mut self, name: &str, transport: Box<dyn ByteStream>) {
        let (tx, rx) = mpsc::channel(self.state.config.send_queue_depth);
        let handle = Arc::new(TransportHandle {
            name: name.to_string(),
            outgoing: tx,
            pending_acks: PendingAcks::new(),
            device_found: Mutex::new(None),
        });
        self.state
            .transports
            .write()
            .await
            .insert(name.to_string(), handle.clone());

        let state = self.state.clone();
        self.join_set.spawn(async move {
            crate::transport::run(state, handle, transport, rx).await;
        });
    }

    /// Bring the network up: runs scheduled coroutines and blocks until
    /// `stop_network` is called from another handle/task.
    pub async fn start_network(mut self) -> Result<(), NodeError> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }
        info!(local_id = self.state.local_id, "network starting");

        let scheduled = self.scheduled.drain(..).collect::<Vec<_>>();
        for task in scheduled {
            let handle = self.handle();
            tokio::spawn(task(handle));
        }

        self.state.shutdown.notified().await;
        debug!("network shutdown observed, draining handler tasks");
        while self.join_set.join_next().await.is_some() {}
        self.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Signal every background task to exit. Call from a separate task or
    /// handle than the one blocked in `start_network`.
    pub fn stop_network(&self) {
        self.state.shutdown.notify_waiters();
    }
}

pub(crate) async fn dispatch_frame(
    state: &Arc<NodeState>,
    handle: &Arc<TransportHandle>,
    frame: codec::Frame,
    raw: &[u8],
) {
    dispatch::dispatch(state, handle, frame, raw).await;
}
