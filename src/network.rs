// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::{BinaryMap, ConfigFlags, NetworkConfig, ReadinessConfig, HTTP_PORT_KEY, PUBLIC_IP_KEY},
    error::{Error, Result},
    files,
    node::{NetworkId, Node},
    process::Process,
    readiness::Readiness,
    status::{InfoClientFactory, StatusClientFactory},
    teardown::{self, ProcessTable},
};
use log::{debug, info, warn};
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;

pub struct NetworkBuilder {
    config: NetworkConfig,
    binaries: BinaryMap,
    status_clients: Arc<dyn StatusClientFactory>,
    readiness: ReadinessConfig,
    cancel: CancellationToken,
}

impl NetworkBuilder {
    pub fn new(config: NetworkConfig, binaries: BinaryMap) -> Self {
        Self {
            config,
            binaries,
            status_clients: Arc::new(InfoClientFactory::default()),
            readiness: ReadinessConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn status_clients(mut self, factory: Arc<dyn StatusClientFactory>) -> Self {
        self.status_clients = factory;
        self
    }

    pub fn readiness(mut self, readiness: ReadinessConfig) -> Self {
        self.readiness = readiness;
        self
    }

    /// Token checked before each node is launched and watched while polling
    /// for readiness.
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Writes each node's artifacts and launches it, in config order.
    ///
    /// On failure nothing is returned. Process trees already started by this
    /// call are torn down as the partial network is dropped; files written
    /// are left in place.
    pub fn build(self) -> Result<Network> {
        let core_flags = ConfigFlags::parse(&self.config.core_config_flags)?;
        let mut network = Network {
            processes: BTreeMap::new(),
            nodes: BTreeMap::new(),
            names: BTreeMap::new(),
            readiness: self.readiness,
            cancel: self.cancel,
        };

        for (index, node_config) in self.config.node_configs.iter().enumerate() {
            if network.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let id = NetworkId::from_index(index)?;

            let overrides = ConfigFlags::parse(&node_config.config_flags)?;
            let flags = core_flags.merge(&overrides);
            let ip = flags.str(PUBLIC_IP_KEY)?.to_string();
            let http_port = flags.port(HTTP_PORT_KEY)?;
            let binary = self
                .binaries
                .get(&node_config.bin_kind)
                .ok_or_else(|| Error::UnknownBinary {
                    node: node_config.name.clone(),
                    kind: node_config.bin_kind.clone(),
                })?;

            let client = self
                .status_clients
                .connect(&ip, http_port)
                .map_err(|e| Error::StatusClient {
                    node: node_config.name.clone(),
                    message: format!("{:#}", e),
                })?;

            let paths = files::materialize(&self.config, node_config, &flags)?;
            let process = Process::launch(&node_config.name, binary, &paths.config_file)?;

            info!(
                "launched node {} ({}) as process {} on {}:{}",
                id,
                node_config.name,
                process.id(),
                ip,
                http_port
            );
            network.register(
                id,
                process,
                Node::new(node_config.name.clone(), ip, http_port, client),
            );
        }
        Ok(network)
    }
}

/// A set of node processes launched together, keyed by [`NetworkId`].
///
/// Membership is fixed once built. The network is the only owner of its
/// processes: dropping it terminates the trees of any that are still running.
pub struct Network {
    processes: BTreeMap<NetworkId, Process>,
    nodes: BTreeMap<NetworkId, Arc<Node>>,
    names: BTreeMap<NetworkId, String>,
    readiness: ReadinessConfig,
    cancel: CancellationToken,
}

impl Network {
    pub fn builder(config: NetworkConfig, binaries: BinaryMap) -> NetworkBuilder {
        NetworkBuilder::new(config, binaries)
    }

    /// Launches a network that polls nodes over their HTTP info API.
    pub fn new(config: NetworkConfig, binaries: BinaryMap) -> Result<Self> {
        Self::builder(config, binaries).build()
    }

    fn register(&mut self, id: NetworkId, process: Process, node: Node) {
        self.names.insert(id, process.name().to_string());
        self.processes.insert(id, process);
        self.nodes.insert(id, Arc::new(node));
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Identities in registration order.
    pub fn ids(&self) -> impl Iterator<Item = NetworkId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node(&self, id: NetworkId) -> Result<Arc<Node>> {
        self.nodes.get(&id).cloned().ok_or(Error::NotFound(id))
    }

    /// The name the node was configured with.
    pub fn name(&self, id: NetworkId) -> Result<&str> {
        self.names
            .get(&id)
            .map(String::as_str)
            .ok_or(Error::NotFound(id))
    }

    pub fn pid(&self, id: NetworkId) -> Result<u32> {
        self.processes
            .get(&id)
            .map(Process::id)
            .ok_or(Error::NotFound(id))
    }

    /// Nodes whose process has not exited. Exited processes are reaped.
    pub fn running(&mut self) -> Result<Vec<NetworkId>> {
        let mut running = Vec::new();
        for (id, process) in self.processes.iter_mut() {
            let status = process
                .try_wait()
                .map_err(|e| Error::Process(process.name().to_string(), e))?;
            if status.is_none() {
                running.push(*id);
            }
        }
        Ok(running)
    }

    /// Starts polling every node for readiness with the configured timing.
    /// Fails outside of a tokio runtime.
    pub fn ready(&self) -> Result<Readiness> {
        self.ready_with(self.readiness, self.cancel.child_token())
    }

    pub fn ready_with(
        &self,
        config: ReadinessConfig,
        cancel: CancellationToken,
    ) -> Result<Readiness> {
        let nodes = self
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.clone()))
            .collect();
        Readiness::spawn(nodes, config, cancel)
    }

    /// Pids of launched processes that have not exited. Exited ones are
    /// reaped and left out: their pids may already belong to someone else.
    fn live_roots(&mut self) -> Vec<u32> {
        let mut roots = Vec::new();
        for process in self.processes.values_mut() {
            match process.try_wait() {
                Ok(None) => roots.push(process.id()),
                Ok(Some(status)) => debug!("[{}] process exited: {}", process.name(), status),
                Err(e) => warn!("[{}] unable to query process: {}", process.name(), e),
            }
        }
        roots
    }

    /// Sends SIGTERM to every running launched process and all of its
    /// descendants, descendants first. Keeps going past individual failures
    /// and reports all of them.
    pub fn stop(&mut self) -> Result<()> {
        let roots = self.live_roots();
        if roots.is_empty() {
            return Ok(());
        }
        info!("stopping {} node process(es)", roots.len());
        let table = ProcessTable::snapshot()?;
        teardown::terminate_trees(&table, roots, teardown::sigterm)
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        // Each process handle then kills its own root if SIGTERM was not enough.
        if let Err(e) = self.stop() {
            warn!("network teardown on drop incomplete: {}", e);
        }
    }
}
