// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded-frame dispatch: forward, locally terminate, and the five command
//! handlers (add, remove, put, get, ack).

use crate::codec::{self, Datatype, Frame, CMD_ACK, CMD_ADD, CMD_GET, CMD_PUT, CMD_REMOVE};
use crate::error::DispatchError;
use crate::node::{NodeState, TransportHandle};
use crate::pending::AckOutcome;
use crate::store::StoreSnapshot;
use std::sync::Arc;
use tracing::{debug, warn};

const STATUS_SUCCESS: u8 = 255;
const STATUS_FAILURE: u8 = 127;

/// Entry point invoked by a transport's incoming-parser once it has
/// assembled and validated one frame.
pub async fn dispatch(state: &Arc<NodeState>, handle: &Arc<TransportHandle>, frame: Frame, raw: &[u8]) {
    if !frame.is_broadcast() && frame.recipient_id != state.local_id {
        forward(state, frame.recipient_id, raw).await;
        return;
    }

    let Some(command) = frame.command() else {
        warn!("empty payload on '{}', dropping", handle.name);
        return;
    };

    let result = match command {
        CMD_ADD => handle_add(state, handle, &frame).await,
        CMD_REMOVE => handle_remove(state, handle, &frame).await,
        CMD_PUT => handle_put(state, &frame).await.map_err(DispatchError::from),
        CMD_GET => {
            handle_get(state, handle, &frame).await;
            return; // get never emits the generic ack below; it already replied.
        }
        CMD_ACK => {
            handle_ack(state, &frame).await;
            return;
        }
        other => Err(DispatchError::UnknownCommand(other)),
    };

    if frame.ack_requested {
        let status = if result.is_ok() { STATUS_SUCCESS } else { STATUS_FAILURE };
        if let Err(e) = &result {
            debug!("command {command} from {} failed: {e}", frame.sender_id);
        }
        reply_ack(state, frame.sender_id, frame.sequence, status, None).await;
    }
}

/// Forward a non-terminating frame byte-for-byte onto the best-iface queue
/// for its recipient. Never touches the pending tables.
async fn forward(state: &Arc<NodeState>, recipient_id: u8, raw: &[u8]) {
    let iface = {
        let routing = state.routing.lock().await;
        routing.best_iface(recipient_id).map(|s| s.to_string())
    };
    match iface {
        Some(iface) => {
            if let Err(e) = state.enqueue(&iface, raw.to_vec()).await {
                warn!("failed to forward frame to {recipient_id}: {e}");
            }
        }
        None => debug!("no route to {recipient_id}, dropping frame"),
    }
}

/// `[1, new_id, hop_id...]`
async fn handle_add(
    state: &Arc<NodeState>,
    handle: &Arc<TransportHandle>,
    frame: &Frame,
) -> Result<(), DispatchError> {
    let payload = &frame.payload;
    if payload.len() < 2 {
        return Err(DispatchError::MalformedPayload("add: missing new_id"));
    }
    let new_id = payload[1];
    let incoming_chain = payload[2..].to_vec();

    if new_id == state.local_id {
        return Ok(());
    }

    let mut full_chain = incoming_chain.clone();
    full_chain.push(frame.sender_id);

    let is_new = {
        let mut routing = state.routing.lock().await;
        routing.observe(new_id, full_chain.clone(), &handle.name)
    };

    if is_new {
        let mut outgoing_chain = full_chain;
        outgoing_chain.push(state.local_id);
        let mut out_payload = vec![CMD_ADD, new_id];
        out_payload.extend_from_slice(&outgoing_chain);
        if let Ok(out_frame) = codec::encode(frame.sender_id, 0, &out_payload, false, None, true) {
            state.broadcast_except(&handle.name, &out_frame).await;
        }
    }

    if incoming_chain.is_empty() {
        greet_new_neighbour(state, handle, new_id).await;
    }

    Ok(())
}

/// Adjacency binding: the direct neighbour on `handle` just introduced
/// itself. Bind it, announce ourselves back, and pass along everything we
/// already know.
async fn greet_new_neighbour(state: &Arc<NodeState>, handle: &Arc<TransportHandle>, neighbour_id: u8) {
    *handle.device_found.lock().await = Some(neighbour_id);

    let self_announce = vec![CMD_ADD, state.local_id];
    if let Ok(frame) = codec::encode(state.local_id, 0, &self_announce, false, None, true) {
        if let Err(e) = state.enqueue(&handle.name, frame).await {
            warn!("failed to greet new neighbour {neighbour_id}: {e}");
        }
    }

    let known: Vec<(u8, Vec<u8>)> = {
        let routing = state.routing.lock().await;
        routing
            .ids()
            .filter(|id| *id != neighbour_id)
            .filter_map(|id| {
                routing
                    .chains(id)
                    .and_then(|c| c.first())
                    .map(|chain| (id, chain.clone()))
            })
            .collect()
    };

    for (peer_id, mut chain) in known {
        chain.push(state.local_id);
        let mut payload = vec![CMD_ADD, peer_id];
        payload.extend_from_slice(&chain);
        if let Ok(frame) = codec::encode(state.local_id, 0, &payload, false, None, true) {
            if let Err(e) = state.enqueue(&handle.name, frame).await {
                warn!("failed to relay peer {peer_id} to new neighbour {neighbour_id}: {e}");
            }
        }
    }
}

/// `[2, id]`
async fn handle_remove(
    state: &Arc<NodeState>,
    handle: &Arc<TransportHandle>,
    frame: &Frame,
) -> Result<(), DispatchError> {
    let payload = &frame.payload;
    if payload.len() < 2 {
        return Err(DispatchError::MalformedPayload("remove: missing id"));
    }
    let id = payload[1];

    state.routing.lock().await.forget(id);
    state.broadcast_except(&handle.name, &codec::encode(frame.sender_id, 0, payload, false, None, true).unwrap_or_default()).await;

    let was_adjacent = *handle.device_found.lock().await == Some(id);
    if was_adjacent {
        handle.pending_acks.clear().await;
        *handle.device_found.lock().await = None;
    }

    Ok(())
}

/// `[6, name_len, name_bytes..., dtype_code, value_bytes...]`
async fn handle_put(state: &Arc<NodeState>, frame: &Frame) -> Result<(), DispatchError> {
    let payload = &frame.payload;
    if payload.len() < 2 {
        return Err(DispatchError::MalformedPayload("put: missing name_len"));
    }
    let name_len = payload[1] as usize;
    if payload.len() < 2 + name_len + 1 {
        return Err(DispatchError::MalformedPayload("put: truncated name/dtype"));
    }
    let name = std::str::from_utf8(&payload[2..2 + name_len])
        .map_err(|_| DispatchError::MalformedPayload("put: name is not utf-8"))?;
    let dtype_code = payload[2 + name_len];
    let dtype = Datatype::from_wire_code(dtype_code)
        .ok_or(DispatchError::MalformedPayload("put: unknown dtype code"))?;
    let value_bytes = &payload[3 + name_len..];
    let value = codec::from_bytes(value_bytes, dtype)
        .map_err(|_| DispatchError::MalformedPayload("put: value does not decode"))?;

    let mut stores = state.stores.write().await;
    stores.write(name, value).map_err(DispatchError::from)
}

/// `[7, name_len, name_bytes...]`. Always replies with the value-carrying
/// ack frame; never sends a plain ack, and always replies regardless of
/// `ack_requested`.
async fn handle_get(state: &Arc<NodeState>, handle: &Arc<TransportHandle>, frame: &Frame) {
    let payload = &frame.payload;
    if payload.len() < 2 {
        reply_ack(state, frame.sender_id, frame.sequence, STATUS_FAILURE, None).await;
        return;
    }
    let name_len = payload[1] as usize;
    if payload.len() < 2 + name_len {
        reply_ack(state, frame.sender_id, frame.sequence, STATUS_FAILURE, None).await;
        return;
    }
    let Ok(name) = std::str::from_utf8(&payload[2..2 + name_len]) else {
        reply_ack(state, frame.sender_id, frame.sequence, STATUS_FAILURE, None).await;
        return;
    };

    // Take the snapshot and drop the guard before awaiting a callable's
    // producer: the registry's RwLock is not reentrant, and a producer that
    // calls back into the node (e.g. `put`) would otherwise deadlock on it.
    let snapshot = state.stores.read().await.snapshot(name);
    let result = match snapshot {
        Ok(StoreSnapshot::Value(dtype, value)) => Ok((dtype, value)),
        Ok(StoreSnapshot::Producer(dtype, producer)) => Ok((dtype, producer().await)),
        Err(e) => Err(e),
    };

    match result {
        Ok((dtype, value)) => {
            let mut extra = vec![dtype.wire_code()];
            match codec::to_bytes(&value) {
                Ok(bytes) => {
                    extra.extend_from_slice(&bytes);
                    reply_ack(state, frame.sender_id, frame.sequence, STATUS_SUCCESS, Some(extra)).await;
                }
                Err(_) => {
                    reply_ack(state, frame.sender_id, frame.sequence, STATUS_FAILURE, None).await;
                }
            }
        }
        Err(e) => {
            debug!("get '{name}' from {} on '{}' failed: {e}", frame.sender_id, handle.name);
            reply_ack(state, frame.sender_id, frame.sequence, STATUS_FAILURE, None).await;
        }
    }
}

/// `[0, status, seq_lo, seq_hi, (dtype, value_bytes...)?]`
async fn handle_ack(state: &Arc<NodeState>, frame: &Frame) {
    let payload = &frame.payload;
    if payload.len() < 4 {
        warn!("malformed ack from {}, dropping", frame.sender_id);
        return;
    }
    let status = payload[1];
    let sequence = u16::from_le_bytes([payload[2], payload[3]]);

    {
        let transports = state.transports.read().await;
        for handle in transports.values() {
            handle.pending_acks.remove(sequence).await;
        }
    }

    let outcome = if payload.len() > 4 {
        let dtype_code = payload[4];
        match Datatype::from_wire_code(dtype_code)
            .and_then(|dtype| codec::from_bytes(&payload[5..], dtype).ok())
        {
            Some(value) => AckOutcome::Success(Some(value)),
            None => AckOutcome::Failure,
        }
    } else if status == STATUS_SUCCESS {
        AckOutcome::Success(None)
    } else {
        AckOutcome::Failure
    };

    state.pending_requests.resolve(sequence, outcome).await;
}

async fn reply_ack(state: &Arc<NodeState>, to: u8, sequence: u16, status: u8, extra: Option<Vec<u8>>) {
    let mut payload = vec![CMD_ACK, status];
    payload.extend_from_slice(&sequence.to_le_bytes());
    if let Some(extra) = extra {
        payload.extend_from_slice(&extra);
    }

    let frame = match codec::encode(state.local_id, to, &payload, false, None, true) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("failed to encode ack to {to}: {e}");
            return;
        }
    };

    let iface = {
        let routing = state.routing.lock().await;
        routing.best_iface(to).map(|s| s.to_string())
    };
    match iface {
        Some(iface) => {
            if let Err(e) = state.enqueue(&iface, frame).await {
                warn!("failed to send ack to {to}: {e}");
            }
        }
        None => debug!("no route to {to}, dropping ack"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::config::NodeConfig;
    use crate::node::Node;
    use std::time::Duration;

    async fn fresh_node(local_id: u8) -> (Node, Arc<TransportHandle>) {
        let mut node = Node::new(NodeConfig {
            device_id: Some(local_id),
            ..Default::default()
        })
        .unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let handle = Arc::new(TransportHandle {
            name: "test0".into(),
            outgoing: tx,
            pending_acks: crate::pending::PendingAcks::new(),
            device_found: tokio::sync::Mutex::new(None),
        });
        node.state_for_test().transports.write().await.insert("test0".into(), handle.clone());
        (node, handle)
    }

    #[tokio::test]
    async fn add_inserts_peer_with_sender_appended_scenario_s3() {
        let (node, handle) = fresh_node(10).await;
        let state = node.state_for_test();

        let frame = Frame {
            sender_id: 11,
            recipient_id: 0,
            sequence: 0,
            ack_requested: false,
            payload: vec![CMD_ADD, 12],
        };
        dispatch(state, &handle, frame, &[]).await;

        let routing = state.routing.lock().await;
        assert_eq!(routing.best_iface(12), Some("test0"));
        assert_eq!(routing.chains(12).unwrap(), &[vec![11]][..]);
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_dispatch() {
        let (node, handle) = fresh_node(8).await;
        let state = node.state_for_test();
        node.handle()
            .define_store("switch", Datatype::Bool, Value::Bool(false))
            .await
            .unwrap();

        let put_frame = Frame {
            sender_id: 9,
            recipient_id: 8,
            sequence: 5,
            ack_requested: false,
            payload: vec![CMD_PUT, 6, b's', b'w', b'i', b't', b'c', b'h', 31, 1],
        };
        dispatch(state, &handle, put_frame, &[]).await;

        let (dtype, value) = state.stores.read().await.read("switch").await.unwrap();
        assert_eq!(dtype, Datatype::Bool);
        assert_eq!(value, Value::Bool(true));
    }

    #[tokio::test]
    async fn get_replies_with_value_carrying_ack_scenario_s5() {
        let (node, handle) = fresh_node(20).await;
        let state = node.state_for_test();
        node.handle()
            .define_store("temperature", Datatype::Float64, Value::Float64(21.5))
            .await
            .unwrap();
        state.routing.lock().await.observe(9, vec![], "test0");

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        // swap outgoing sender so we can observe the reply frame
        let observed = Arc::new(TransportHandle {
            name: "test0".into(),
            outgoing: tx,
            pending_acks: crate::pending::PendingAcks::new(),
            device_found: tokio::sync::Mutex::new(None),
        });
        state.transports.write().await.insert("test0".into(), observed);

        let get_frame = Frame {
            sender_id: 9,
            recipient_id: 20,
            sequence: 77,
            ack_requested: true,
            payload: vec![CMD_GET, 1, b'T'],
        };
        // "T" isn't registered; register under that short name too for the
        // scenario's exact framing.
        node.handle()
            .define_store("T", Datatype::Float64, Value::Float64(21.5))
            .await
            .unwrap();
        dispatch(state, &handle, get_frame, &[]).await;

        let reply = rx.recv().await.expect("reply frame");
        let (decoded, _) = codec::decode(&reply).unwrap();
        assert_eq!(decoded.payload[0], CMD_ACK);
        assert_eq!(decoded.payload[1], STATUS_SUCCESS);
        let seq = u16::from_le_bytes([decoded.payload[2], decoded.payload[3]]);
        assert_eq!(seq, 77);
        assert_eq!(decoded.payload[4], Datatype::Float64.wire_code());
        let value = codec::from_bytes(&decoded.payload[5..], Datatype::Float64).unwrap();
        assert_eq!(value, Value::Float64(21.5));
    }

    #[tokio::test]
    async fn get_does_not_hold_the_stores_lock_across_a_reentrant_producer() {
        let (node, handle) = fresh_node(21).await;
        let state = node.state_for_test();
        node.handle()
            .define_store("counter", Datatype::Int32, Value::Int32(0))
            .await
            .unwrap();

        let reentrant_state = state.clone();
        node.handle()
            .available_as(
                "bump",
                Datatype::Int32,
                Arc::new(move || {
                    let state = reentrant_state.clone();
                    Box::pin(async move {
                        // A callable producer calling back into the store
                        // registry's write lock while `get` still held its
                        // own read lock would deadlock here.
                        let mut stores = state.stores.write().await;
                        let (_, current) = stores.read("counter").await.unwrap();
                        let next = match current {
                            Value::Int32(n) => n + 1,
                            _ => unreachable!(),
                        };
                        stores.write("counter", Value::Int32(next)).unwrap();
                        Value::Int32(next)
                    })
                }),
            )
            .await
            .unwrap();

        let get_frame = Frame {
            sender_id: 9,
            recipient_id: 21,
            sequence: 1,
            ack_requested: true,
            payload: vec![CMD_GET, 4, b'b', b'u', b'm', b'p'],
        };
        let result = tokio::time::timeout(Duration::from_secs(1), dispatch(state, &handle, get_frame, &[]));
        assert!(result.await.is_ok(), "get deadlocked on a reentrant producer");

        let (_, counter) = state.stores.read().await.read("counter").await.unwrap();
        assert_eq!(counter, Value::Int32(1));
    }

    #[tokio::test]
    async fn forward_does_not_touch_pending_tables_scenario_s6() {
        let (node, handle) = fresh_node(4).await; // D
        let state = node.state_for_test();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let far_handle = Arc::new(TransportHandle {
            name: "toE".into(),
            outgoing: tx,
            pending_acks: crate::pending::PendingAcks::new(),
            device_found: tokio::sync::Mutex::new(None),
        });
        state.transports.write().await.insert("toE".into(), far_handle);
        state.routing.lock().await.observe(5, vec![], "toE"); // E is direct on toE

        let raw = codec::encode(3, 5, &[CMD_PUT, 1, b'x', Datatype::Bool.wire_code(), 1], true, Some(9), true).unwrap();
        let (frame, _) = codec::decode(&raw).unwrap();
        dispatch(state, &handle, frame, &raw).await;

        let forwarded = rx.recv().await.expect("forwarded frame");
        assert_eq!(forwarded, raw);
        // D never registered a future for this sequence; forwarding must
        // not have created one.
        assert!(!state.pending_requests.resolve(9, AckOutcome::Failure).await);
    }

    #[tokio::test]
    async fn ack_resolves_waiting_future() {
        let (node, _handle) = fresh_node(8).await;
        let state = node.state_for_test();
        let rx = state.pending_requests.register(3).await;

        let ack_frame = Frame {
            sender_id: 9,
            recipient_id: 8,
            sequence: 0,
            ack_requested: false,
            payload: vec![CMD_ACK, STATUS_SUCCESS, 3, 0],
        };
        handle_ack(state, &ack_frame).await;

        assert_eq!(rx.await.unwrap(), AckOutcome::Success(None));
    }

    #[tokio::test]
    async fn remove_forgets_peer_and_clears_adjacent_pending_acks() {
        let (node, handle) = fresh_node(10).await;
        let state = node.state_for_test();
        state.routing.lock().await.observe(11, vec![], "test0");
        *handle.device_found.lock().await = Some(11);
        handle.pending_acks.insert(1, vec![0xAA], Duration::from_secs(15)).await;

        let remove_frame = Frame {
            sender_id: 11,
            recipient_id: 0,
            sequence: 0,
            ack_requested: false,
            payload: vec![CMD_REMOVE, 11],
        };
        dispatch(state, &handle, remove_frame, &[]).await;

        assert!(!state.routing.lock().await.contains(11));
        assert!(handle.pending_acks.is_empty().await);
        assert_eq!(*handle.device_found.lock().await, None);
    }
}
