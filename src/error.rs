// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::node::NetworkId;
use nix::errno::Errno;
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed config flags: {0}")]
    Config(#[source] serde_json::Error),
    #[error("Config is missing expected value: {0}")]
    MissingKey(String),
    #[error("Config value for {key} is not {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("Error accessing {0}: {1}")]
    IO(PathBuf, #[source] io::Error),
    #[error("Error (de)serializing {0}: {1}")]
    Manifest(PathBuf, #[source] serde_yaml::Error),
    #[error("No binary configured for kind '{kind}' of node '{node}'")]
    UnknownBinary { node: String, kind: String },
    #[error("Error launching node '{node}' with binary {binary:?}: {source}")]
    Launch {
        node: String,
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Unable to create status client for node '{node}': {message}")]
    StatusClient { node: String, message: String },
    #[error("Unable to query process of node '{0}': {1}")]
    Process(String, #[source] io::Error),
    #[error("Too many nodes for one network: {0}")]
    TooManyNodes(usize),
    #[error("Node {0} not found in network")]
    NotFound(NetworkId),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("No tokio runtime to poll nodes on: {0}")]
    Runtime(#[source] tokio::runtime::TryCurrentError),
    #[error("Unable to list processes: {0}")]
    ProcessTable(#[source] io::Error),
    #[error("Unable to terminate {} process(es): {}", .0.len(), SignalFailures(.0))]
    Teardown(Vec<SignalFailure>),
    #[error("Timeout waiting for nodes {}", NodeList(.0))]
    NotReady(Vec<NetworkId>),
}

/// A process that could not be signalled during teardown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalFailure {
    pub pid: u32,
    pub errno: Errno,
}

impl fmt::Display for SignalFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pid {} ({})", self.pid, self.errno)
    }
}

struct SignalFailures<'a>(&'a [SignalFailure]);

impl fmt::Display for SignalFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

struct NodeList<'a>(&'a [NetworkId]);

impl fmt::Display for NodeList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}

impl Error {
    pub(crate) fn io<P: Into<PathBuf>>(path: P) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |err| Error::IO(path, err)
    }
}
