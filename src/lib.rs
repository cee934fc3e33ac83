// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Runs a local test network: one OS process per node, launched from
//! generated config files, polled until every node reports bootstrapped and
//! torn down as whole process trees.
//!
//! ```no_run
//! # async fn run(config: local_network::NetworkConfig, binaries: local_network::BinaryMap) -> local_network::Result<()> {
//! use local_network::Network;
//!
//! let mut network = Network::new(config, binaries)?;
//! network.ready()?.wait().await?.into_result()?;
//! network.stop()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod files;
pub mod logging;
pub mod network;
pub mod node;
pub mod process;
pub mod readiness;
pub mod status;
pub mod teardown;

pub use config::{BinaryMap, NetworkConfig, NetworkManifest, NodeConfig, ReadinessConfig};
pub use error::{Error, Result};
pub use network::{Network, NetworkBuilder};
pub use node::{NetworkId, Node};
pub use readiness::{Readiness, ReadinessError, ReadinessReport};
pub use status::{InfoClient, InfoClientFactory, StatusClient, StatusClientFactory};
