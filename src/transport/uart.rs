// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UART transport backed by `tokio-serial`.

use super::ByteStream;
use std::time::Duration;
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

/// Open a UART device at `path`, 9600 8-E-2 by default, falling back to
/// 8-N-2 when the platform driver does not support parity (mirroring the
/// original implementation's commented-out parity configuration).
pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> std::io::Result<Box<dyn ByteStream>> {
    let builder = tokio_serial::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::Two)
        .timeout(read_timeout);

    let with_parity = builder.clone().parity(Parity::Even).open_native_async();
    let port = match with_parity {
        Ok(port) => port,
        Err(_) => builder.parity(Parity::None).open_native_async()?,
    };

    Ok(Box::new(port))
}

/// Default UART device path for the platform's primary serial port.
#[cfg(target_os = "linux")]
pub const DEFAULT_DEVICE: &str = "/dev/serial0";

#[cfg(not(target_os = "linux"))]
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";
