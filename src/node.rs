// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::{Error, Result},
    status::StatusClient,
};
use log::debug;
use serde::Serialize;
use std::{convert::TryFrom, fmt, sync::Arc};

/// Subsystems that must all report bootstrapped before a node counts as ready.
pub const BOOTSTRAP_CHAINS: [&str; 3] = ["P", "C", "X"];

/// Network-local identity of a node, assigned in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NetworkId(u32);

impl NetworkId {
    pub fn new(index: u32) -> Self {
        NetworkId(index)
    }

    pub(crate) fn from_index(index: usize) -> Result<Self> {
        u32::try_from(index)
            .map(NetworkId)
            .map_err(|_| Error::TooManyNodes(index))
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressable handle used to query a running node. It does not own the process.
pub struct Node {
    name: String,
    ip: String,
    http_port: u16,
    client: Arc<dyn StatusClient>,
}

impl Node {
    pub fn new(name: String, ip: String, http_port: u16, client: Arc<dyn StatusClient>) -> Self {
        Self {
            name,
            ip,
            http_port,
            client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn client(&self) -> &Arc<dyn StatusClient> {
        &self.client
    }

    /// Runs one poll round: true only if every chain in [`BOOTSTRAP_CHAINS`]
    /// reports bootstrapped. Stops at the first chain that is not.
    pub async fn is_bootstrapped(&self) -> bool {
        for chain in BOOTSTRAP_CHAINS.iter() {
            match self.client.is_bootstrapped(chain).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("[{}] chain {} not bootstrapped yet", self.name, chain);
                    return false;
                }
                Err(e) => {
                    debug!("[{}] bootstrap query for chain {} failed: {}", self.name, chain, e);
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("ip", &self.ip)
            .field("http_port", &self.http_port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        answers: Vec<(&'static str, anyhow::Result<bool>)>,
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatusClient for Scripted {
        async fn is_bootstrapped(&self, chain: &str) -> anyhow::Result<bool> {
            self.asked.lock().unwrap().push(chain.to_string());
            match self.answers.iter().find(|(c, _)| *c == chain) {
                Some((_, Ok(b))) => Ok(*b),
                Some((_, Err(e))) => Err(anyhow!("{}", e)),
                None => Ok(true),
            }
        }
    }

    fn node(answers: Vec<(&'static str, anyhow::Result<bool>)>) -> (Node, Arc<Scripted>) {
        let client = Arc::new(Scripted {
            answers,
            asked: Mutex::new(Vec::new()),
        });
        let node = Node::new("n0".into(), "127.0.0.1".into(), 9650, client.clone());
        (node, client)
    }

    #[test]
    fn network_id_is_checked() {
        assert_eq!(NetworkId::from_index(3).unwrap().index(), 3);
        assert_eq!(NetworkId::from_index(0).unwrap().to_string(), "0");
        assert!(NetworkId::from_index(u32::MAX as usize).is_ok());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn network_id_does_not_wrap() {
        let too_big = u32::MAX as usize + 1;
        assert!(matches!(
            NetworkId::from_index(too_big),
            Err(Error::TooManyNodes(n)) if n == too_big
        ));
    }

    #[tokio::test]
    async fn all_chains_bootstrapped() {
        let (node, client) = node(vec![]);
        assert!(node.is_bootstrapped().await);
        assert_eq!(*client.asked.lock().unwrap(), vec!["P", "C", "X"]);
    }

    #[tokio::test]
    async fn stops_at_first_unready_chain() {
        let (node, client) = node(vec![("C", Ok(false))]);
        assert!(!node.is_bootstrapped().await);
        assert_eq!(*client.asked.lock().unwrap(), vec!["P", "C"]);

        let (node, client) = self::node(vec![("P", Err(anyhow!("connection refused")))]);
        assert!(!node.is_bootstrapped().await);
        assert_eq!(*client.asked.lock().unwrap(), vec!["P"]);
    }
}
