// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! meshwire: a peer-to-peer variable-sharing network for small compute nodes
//! connected by byte-oriented links (UART primary; I²C/SPI peer transports).
//!
//! Every node exposes named, typed variables — *stores* — that neighbours can
//! read (`get`) or write (`put`) across the mesh. Routes are discovered and
//! maintained automatically: each node periodically broadcasts its presence,
//! neighbours forward that announcement inward, and a distance-vector table
//! on every node tracks the shortest known hop-chain to every other device it
//! has heard of.
//!
//! ```no_run
//! use meshwire::codec::{Datatype, Value};
//! use meshwire::config::NodeConfig;
//! use meshwire::node::Node;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut node = Node::new(NodeConfig { device_id: Some(10), ..Default::default() })?;
//! let handle = node.handle();
//! handle.define_store("temperature_c", Datatype::Float32, Value::Float32(21.5)).await?;
//!
//! let (a, b) = meshwire::transport::loopback::pair(256);
//! node.with_transport("link0", a).await;
//! drop(b); // a real deployment attaches a UART or a peer's loopback end here
//!
//! tokio::spawn(node.start_network());
//! handle.wait_for_connect(11).await;
//! let reading = handle.get(11, "temperature_c", Duration::from_secs(2)).await?;
//! # let _ = reading;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod pending;
pub mod routing;
pub mod store;
pub mod transport;

pub use codec::{Datatype, Value};
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{Node, NodeHandle};
