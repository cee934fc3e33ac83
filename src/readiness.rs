// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::ReadinessConfig,
    error::{Error, Result},
    node::{NetworkId, Node},
};
use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    time::{sleep_until, timeout_at, Instant},
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Timeout waiting for node {id} ({name})")]
pub struct ReadinessError {
    pub id: NetworkId,
    pub name: String,
}

/// Outcome of one readiness run, sent once every node has been evaluated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    pub ready: Vec<NetworkId>,
    pub timed_out: Vec<NetworkId>,
    /// Nodes whose evaluation was cut short or never started because the run was cancelled.
    pub cancelled: Vec<NetworkId>,
}

impl ReadinessReport {
    pub fn all_ready(&self) -> bool {
        self.timed_out.is_empty() && self.cancelled.is_empty()
    }

    pub fn into_result(self) -> Result<Self> {
        if !self.timed_out.is_empty() {
            Err(Error::NotReady(self.timed_out))
        } else if !self.cancelled.is_empty() {
            Err(Error::Cancelled)
        } else {
            Ok(self)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeReadiness {
    Ready,
    TimedOut,
    Cancelled,
}

/// Handle to a running readiness check.
///
/// Per-node timeouts arrive on [`Readiness::next_error`] as they happen; the
/// final [`ReadinessReport`] is delivered through [`Readiness::wait`]. The
/// error channel holds one slot per node, so the check never stalls on a
/// caller that reads no errors, or only some of them.
#[derive(Debug)]
pub struct Readiness {
    errors: mpsc::Receiver<ReadinessError>,
    done: oneshot::Receiver<ReadinessReport>,
    cancel: CancellationToken,
}

impl Readiness {
    /// Starts checking `nodes` on the current tokio runtime, one node at a time.
    /// Fails with [`Error::Runtime`] outside of a runtime.
    pub fn spawn(
        nodes: Vec<(NetworkId, Arc<Node>)>,
        config: ReadinessConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(Error::Runtime)?;
        let (error_tx, errors) = mpsc::channel(nodes.len().max(1));
        let (done_tx, done) = oneshot::channel();
        let task_cancel = cancel.clone();
        runtime.spawn(async move {
            let report = check_nodes(nodes, config, &task_cancel, &error_tx).await;
            // The caller may have stopped listening.
            let _ = done_tx.send(report);
        });
        Ok(Self {
            errors,
            done,
            cancel,
        })
    }

    /// Next per-node timeout, or `None` once the check has finished and every
    /// reported error has been received.
    pub async fn next_error(&mut self) -> Option<ReadinessError> {
        self.errors.recv().await
    }

    /// Timeouts reported so far, without waiting.
    pub fn drain_errors(&mut self) -> Vec<ReadinessError> {
        let mut errors = Vec::new();
        while let Ok(error) = self.errors.try_recv() {
            errors.push(error);
        }
        errors
    }

    /// Stops polling. Nodes not yet found ready are reported as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits until every node has been evaluated.
    pub async fn wait(self) -> Result<ReadinessReport> {
        self.done.await.map_err(|_| Error::Cancelled)
    }
}

async fn check_nodes(
    nodes: Vec<(NetworkId, Arc<Node>)>,
    config: ReadinessConfig,
    cancel: &CancellationToken,
    errors: &mpsc::Sender<ReadinessError>,
) -> ReadinessReport {
    let mut report = ReadinessReport::default();
    for (id, node) in nodes {
        if cancel.is_cancelled() {
            report.cancelled.push(id);
            continue;
        }
        match wait_for_node(&node, &config, cancel).await {
            NodeReadiness::Ready => {
                info!("node {} ({}) is up", id, node.name());
                report.ready.push(id);
            }
            NodeReadiness::TimedOut => {
                warn!("timeout waiting for node {} ({})", id, node.name());
                report.timed_out.push(id);
                // Capacity matches the node count, so this cannot be full.
                let _ = errors.try_send(ReadinessError {
                    id,
                    name: node.name().to_string(),
                });
            }
            NodeReadiness::Cancelled => report.cancelled.push(id),
        }
    }
    report
}

/// Polls `node` immediately and then every poll interval, until one round
/// finds every chain bootstrapped or the deadline passes.
async fn wait_for_node(
    node: &Node,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> NodeReadiness {
    let start = Instant::now();
    let deadline = start + config.timeout();
    let mut next_poll = start;
    loop {
        let round = tokio::select! {
            _ = cancel.cancelled() => return NodeReadiness::Cancelled,
            round = timeout_at(deadline, node.is_bootstrapped()) => round,
        };
        match round {
            Ok(true) => return NodeReadiness::Ready,
            Ok(false) => {}
            Err(_) => return NodeReadiness::TimedOut,
        }

        next_poll += config.poll_interval();
        let (wake, outcome) = if next_poll >= deadline {
            (deadline, Some(NodeReadiness::TimedOut))
        } else {
            (next_poll, None)
        };
        tokio::select! {
            _ = cancel.cancelled() => return NodeReadiness::Cancelled,
            _ = sleep_until(wake) => {}
        }
        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}
