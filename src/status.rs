// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client side of the per-node status API.
//!
//! Nodes expose an `info` JSON-RPC endpoint; the only call needed here is
//! `info.isBootstrapped`, which reports whether a given chain has finished
//! bootstrapping. The [`StatusClient`] trait is the seam used by the
//! readiness coordinator so that tests can substitute scripted clients.

use anyhow::{format_err, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const INFO_ENDPOINT: &str = "ext/info";
const IS_BOOTSTRAPPED_METHOD: &str = "info.isBootstrapped";

#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn is_bootstrapped(&self, chain: &str) -> Result<bool>;
}

/// Creates a [`StatusClient`] bound to one node's HTTP address.
pub trait StatusClientFactory: Send + Sync {
    fn connect(&self, ip: &str, port: u16) -> Result<Arc<dyn StatusClient>>;
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Serialize)]
struct ChainParams<'a> {
    chain: &'a str,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<R> {
    result: Option<R>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct IsBootstrappedResult {
    #[serde(rename = "isBootstrapped")]
    is_bootstrapped: bool,
}

/// HTTP client for a node's `info` API.
#[derive(Clone, Debug)]
pub struct InfoClient {
    http: reqwest::Client,
    url: String,
}

impl InfoClient {
    pub fn new<A: AsRef<str>>(address: A, port: u16, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Unable to build HTTP client")?;
        Ok(Self {
            http,
            url: format!("http://{}:{}/{}", address.as_ref(), port, INFO_ENDPOINT),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatusClient for InfoClient {
    async fn is_bootstrapped(&self, chain: &str) -> Result<bool> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: IS_BOOTSTRAPPED_METHOD,
            params: ChainParams { chain },
        };
        let response: JsonRpcResponse<IsBootstrappedResult> = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Unable to reach {}", self.url))?
            .error_for_status()?
            .json()
            .await
            .context("Unable to decode info.isBootstrapped response")?;
        parse_is_bootstrapped(response)
    }
}

fn parse_is_bootstrapped(response: JsonRpcResponse<IsBootstrappedResult>) -> Result<bool> {
    if let Some(error) = response.error {
        return Err(format_err!(
            "{} failed with code {}: {}",
            IS_BOOTSTRAPPED_METHOD,
            error.code,
            error.message
        ));
    }
    response
        .result
        .map(|r| r.is_bootstrapped)
        .ok_or_else(|| format_err!("{} returned no result", IS_BOOTSTRAPPED_METHOD))
}

#[derive(Clone, Debug)]
pub struct InfoClientFactory {
    request_timeout: Duration,
}

impl InfoClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for InfoClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl StatusClientFactory for InfoClientFactory {
    fn connect(&self, ip: &str, port: u16) -> Result<Arc<dyn StatusClient>> {
        Ok(Arc::new(InfoClient::new(ip, port, self.request_timeout)?))
    }
}
