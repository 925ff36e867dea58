// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-wide error types, one enum per layer.

use std::fmt;

/// Errors raised while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Fewer bytes are available than the minimum header requires.
    BufferTooShort,
    /// The declared payload length does not fit within the supplied buffer.
    IncompletePayload,
    /// `ack_requested` was neither 0 nor 255.
    InvalidAckByte(u8),
    /// The start marker byte was not 255.
    InvalidStartMarker,
    /// The stop marker byte was not 255.
    InvalidStopMarker,
    /// The trailing checksum did not match the computed sum.
    ChecksumMismatch { expected: u16, actual: u16 },
    /// A caller supplied a payload longer than 255 bytes.
    PayloadTooLarge(usize),
    /// A value did not decode cleanly for its declared datatype.
    InvalidValueEncoding,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "buffer shorter than minimum frame header"),
            Self::IncompletePayload => write!(f, "buffer does not hold the declared payload"),
            Self::InvalidAckByte(b) => write!(f, "invalid ack_requested byte: {b}"),
            Self::InvalidStartMarker => write!(f, "start marker byte is not 255"),
            Self::InvalidStopMarker => write!(f, "stop marker byte is not 255"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, computed {actual}")
            }
            Self::PayloadTooLarge(len) => {
                write!(f, "payload of {len} bytes exceeds the 255-byte maximum")
            }
            Self::InvalidValueEncoding => write!(f, "value does not decode for its datatype"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors raised by the store registry.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No store is registered under this name.
    NotFound(String),
    /// A store with this name already exists.
    AlreadyRegistered(String),
    /// The name is empty or exceeds 255 bytes.
    InvalidName(String),
    /// `write` was called on a callable (read-only) store.
    ReadOnly(String),
    /// The dtype supplied by a caller does not match the store's declared type.
    TypeMismatch { name: String, expected: u8, actual: u8 },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "no store named '{name}'"),
            Self::AlreadyRegistered(name) => write!(f, "store '{name}' already registered"),
            Self::InvalidName(name) => write!(f, "invalid store name '{name}'"),
            Self::ReadOnly(name) => write!(f, "store '{name}' is read-only"),
            Self::TypeMismatch { name, expected, actual } => write!(
                f,
                "store '{name}' expects dtype {expected}, got {actual}"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors raised while dispatching a decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The first payload byte did not match any known command.
    UnknownCommand(u8),
    /// A frame must be forwarded but no route to the recipient exists.
    UnknownPeer(u8),
    /// The payload was too short for the command it claims to carry.
    MalformedPayload(&'static str),
    /// The store layer rejected a put/get.
    Store(StoreError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(b) => write!(f, "unknown command byte {b}"),
            Self::UnknownPeer(id) => write!(f, "no route to device {id}"),
            Self::MalformedPayload(what) => write!(f, "malformed payload: {what}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors surfaced to callers of the node API.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeError {
    /// `start_network` was called while a network was already running.
    AlreadyRunning,
    /// The requested or generated local id falls in a reserved range.
    ReservedId(u8),
    /// A `get`/`put` request's deadline elapsed with no ack.
    Timeout,
    /// The peer this request targeted was removed from the routing table
    /// before the request completed.
    PeerDisconnected(u8),
    /// The remote node nacked the request (status byte 127).
    RemoteRejected,
    /// Underlying transport I/O failed.
    Io(String),
    /// The frame layer rejected a request before it was sent.
    Codec(CodecError),
    /// The store layer rejected a local-only operation.
    Store(StoreError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "network already running"),
            Self::ReservedId(id) => write!(f, "device id {id} is reserved"),
            Self::Timeout => write!(f, "request timed out"),
            Self::PeerDisconnected(id) => write!(f, "peer {id} disconnected"),
            Self::RemoteRejected => write!(f, "remote node rejected the request"),
            Self::Io(s) => write!(f, "I/O error: {s}"),
            Self::Codec(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<CodecError> for NodeError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
