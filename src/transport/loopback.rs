// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory duplex transport.
//!
//! Used directly by tests, and stands in for I²C/SPI peer framing: both
//! reuse the identical frame layout over a byte-duplex abstraction rather
//! than a dedicated hardware bus driver, since the raw bus library is
//! explicitly out of scope for the core.

use super::ByteStream;
use tokio::io::duplex;

/// A connected pair of in-memory byte streams: bytes written to one side
/// appear on the other.
pub fn pair(buffer_size: usize) -> (Box<dyn ByteStream>, Box<dyn ByteStream>) {
    let (a, b) = duplex(buffer_size);
    (Box::new(a), Box::new(b))
}
