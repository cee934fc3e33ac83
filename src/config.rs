// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    convert::TryFrom,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const CONFIG_FILE_KEY: &str = "config-file";
pub const GENESIS_KEY: &str = "genesis";
pub const CHAIN_CONFIG_DIR_KEY: &str = "chain-config-dir";
pub const TLS_CERT_FILE_KEY: &str = "staking-tls-cert-file";
pub const TLS_KEY_FILE_KEY: &str = "staking-tls-key-file";
pub const PUBLIC_IP_KEY: &str = "public-ip";
pub const HTTP_PORT_KEY: &str = "http-port";

const NODE_CONFIG_FILE: &str = "config.json";
const C_CHAIN_DIR: &str = "C";

/// Maps a binary kind to the executable launched for nodes of that kind.
pub type BinaryMap = HashMap<String, PathBuf>;

/// Everything needed to bring up one network. Flag blobs are JSON objects.
#[derive(Clone, Debug, Default)]
pub struct NetworkConfig {
    pub core_config_flags: Vec<u8>,
    pub genesis: Vec<u8>,
    pub c_chain_config: Vec<u8>,
    pub node_configs: Vec<NodeConfig>,
}

#[derive(Clone, Debug, Default)]
pub struct NodeConfig {
    /// Label used to tag this node's log output.
    pub name: String,
    /// Overrides applied on top of the network's core flags.
    pub config_flags: Vec<u8>,
    pub cert: Vec<u8>,
    pub private_key: Vec<u8>,
    pub bin_kind: String,
}

/// A node's command line flags, as written to its config file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigFlags(Map<String, Value>);

impl ConfigFlags {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice(bytes).map_err(Error::Config)? {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(Error::WrongType {
                key: "<root>".into(),
                expected: "an object",
            }),
        }
    }

    /// Base flags with every key of `overrides` replacing the base value.
    pub fn merge(&self, overrides: &ConfigFlags) -> ConfigFlags {
        let mut merged = self.0.clone();
        for (key, value) in &overrides.0 {
            merged.insert(key.clone(), value.clone());
        }
        ConfigFlags(merged)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn str(&self, key: &str) -> Result<&str> {
        self.value(key)?.as_str().ok_or_else(|| Error::WrongType {
            key: key.into(),
            expected: "a string",
        })
    }

    pub fn path(&self, key: &str) -> Result<PathBuf> {
        self.str(key).map(PathBuf::from)
    }

    pub fn port(&self, key: &str) -> Result<u16> {
        let wrong_type = || Error::WrongType {
            key: key.into(),
            expected: "a port number",
        };
        let value = self.value(key)?;
        // Float-encoded integers such as 9650.0 are accepted.
        let port = match value.as_u64() {
            Some(port) => port,
            None => match value.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= 0.0 => f as u64,
                _ => return Err(wrong_type()),
            },
        };
        u16::try_from(port).map_err(|_| wrong_type())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(Error::Config)
    }

    /// Where each artifact of a node lives, as configured by these flags.
    pub fn artifact_paths(&self) -> Result<ArtifactPaths> {
        let config_dir = self.path(CHAIN_CONFIG_DIR_KEY)?;
        Ok(ArtifactPaths {
            genesis: self.path(GENESIS_KEY)?,
            c_chain_config: config_dir.join(C_CHAIN_DIR).join(NODE_CONFIG_FILE),
            tls_cert: self.path(TLS_CERT_FILE_KEY)?,
            tls_key: self.path(TLS_KEY_FILE_KEY)?,
            config_file: config_dir.join(NODE_CONFIG_FILE),
        })
    }

    fn value(&self, key: &str) -> Result<&Value> {
        self.0
            .get(key)
            .ok_or_else(|| Error::MissingKey(key.into()))
    }
}

impl From<Map<String, Value>> for ConfigFlags {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub genesis: PathBuf,
    pub c_chain_config: PathBuf,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    pub config_file: PathBuf,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessConfig {
    /// Per-node deadline, measured from that node's first poll.
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Never zero, so polling always pauses between rounds.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::WrongType {
                key: "poll_interval_ms".into(),
                expected: "a positive number of milliseconds",
            });
        }
        Ok(())
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            poll_interval_ms: 10_000,
        }
    }
}

/// On-disk description of a network, used by the `local-network` binary.
/// Paths are either absolute or relative to the manifest location.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NetworkManifest {
    #[serde(default)]
    pub core_config_flags: Map<String, Value>,
    pub genesis_file: PathBuf,
    pub c_chain_config_file: PathBuf,
    pub nodes: Vec<NodeManifest>,
    #[serde(default)]
    pub binaries: BinaryMap,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeManifest {
    pub name: String,
    #[serde(default)]
    pub config_flags: Map<String, Value>,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub bin_kind: String,
}

impl NetworkManifest {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(Error::io(path))?;
        let mut manifest = Self::parse(&contents, path)?;
        manifest.readiness.validate()?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    fn parse(serialized: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(serialized).map_err(|e| Error::Manifest(path.into(), e))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.base_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = self.resolve(path);
        fs::read(&path).map_err(Error::io(path))
    }

    /// Binary kinds mapped to resolved executable paths.
    pub fn binaries(&self) -> BinaryMap {
        self.binaries
            .iter()
            .map(|(kind, path)| (kind.clone(), self.resolve(path)))
            .collect()
    }

    /// Reads every referenced file into a [`NetworkConfig`].
    pub fn network_config(&self) -> Result<NetworkConfig> {
        let node_configs = self
            .nodes
            .iter()
            .map(|node| {
                Ok(NodeConfig {
                    name: node.name.clone(),
                    config_flags: serde_json::to_vec(&node.config_flags).map_err(Error::Config)?,
                    cert: self.read(&node.cert_file)?,
                    private_key: self.read(&node.key_file)?,
                    bin_kind: node.bin_kind.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(NetworkConfig {
            core_config_flags: serde_json::to_vec(&self.core_config_flags)
                .map_err(Error::Config)?,
            genesis: self.read(&self.genesis_file)?,
            c_chain_config: self.read(&self.c_chain_config_file)?,
            node_configs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{collection::btree_map, prelude::*};
    use serde_json::json;

    fn flags(value: Value) -> ConfigFlags {
        ConfigFlags::parse(&serde_json::to_vec(&value).unwrap()).unwrap()
    }

    #[test]
    fn parse_rejects_non_objects() {
        assert!(matches!(ConfigFlags::parse(b"{not json"), Err(Error::Config(_))));
        assert!(matches!(
            ConfigFlags::parse(b"[1, 2]"),
            Err(Error::WrongType { .. })
        ));
        assert!(ConfigFlags::parse(b"{}").unwrap().is_empty());
    }

    #[test]
    fn merge_override_wins() {
        let base = flags(json!({"http-port": 9650, "log-level": "info"}));
        let overrides = flags(json!({"http-port": 9652, "bootstrap-ips": ""}));
        let merged = base.merge(&overrides);
        assert_eq!(merged.port(HTTP_PORT_KEY).unwrap(), 9652);
        assert_eq!(merged.str("log-level").unwrap(), "info");
        assert_eq!(merged.str("bootstrap-ips").unwrap(), "");
        assert_eq!(merged.len(), 3);
        // Merging never mutates the base.
        assert_eq!(base.port(HTTP_PORT_KEY).unwrap(), 9650);
        assert!(!base.contains_key("bootstrap-ips"));
    }

    #[test]
    fn typed_lookups() {
        let f = flags(json!({
            "public-ip": "127.0.0.1",
            "http-port": 9650.0,
            "bad-port": 70000,
            "neg-port": -1,
            "str-port": "9650",
        }));
        assert_eq!(f.str(PUBLIC_IP_KEY).unwrap(), "127.0.0.1");
        assert_eq!(f.port(HTTP_PORT_KEY).unwrap(), 9650);
        assert!(matches!(f.port("bad-port"), Err(Error::WrongType { .. })));
        assert!(matches!(f.port("neg-port"), Err(Error::WrongType { .. })));
        assert!(matches!(f.port("str-port"), Err(Error::WrongType { .. })));
        assert!(matches!(f.str(HTTP_PORT_KEY), Err(Error::WrongType { .. })));
        assert!(matches!(f.str(GENESIS_KEY), Err(Error::MissingKey(k)) if k == GENESIS_KEY));
    }

    #[test]
    fn artifact_layout() {
        let f = flags(json!({
            "genesis": "/net/genesis.json",
            "chain-config-dir": "/net/node0/configs",
            "staking-tls-cert-file": "/net/node0/staker.crt",
            "staking-tls-key-file": "/net/node0/staker.key",
        }));
        assert_eq!(
            f.artifact_paths().unwrap(),
            ArtifactPaths {
                genesis: "/net/genesis.json".into(),
                c_chain_config: "/net/node0/configs/C/config.json".into(),
                tls_cert: "/net/node0/staker.crt".into(),
                tls_key: "/net/node0/staker.key".into(),
                config_file: "/net/node0/configs/config.json".into(),
            }
        );
    }

    #[test]
    fn readiness_defaults() {
        let config = ReadinessConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        let parsed: ReadinessConfig = serde_yaml::from_str("timeout_ms: 5000").unwrap();
        assert_eq!(parsed.timeout(), Duration::from_secs(5));
        assert_eq!(parsed.poll_interval(), Duration::from_secs(10));
    }

    #[test]
    fn zero_poll_interval() {
        let config = ReadinessConfig {
            timeout_ms: 1_000,
            poll_interval_ms: 0,
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert!(matches!(
            config.validate(),
            Err(Error::WrongType { ref key, .. }) if key == "poll_interval_ms"
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.yaml");
        fs::write(
            &path,
            "genesis_file: g.json\nc_chain_config_file: c.json\nnodes: []\nreadiness:\n  poll_interval_ms: 0\n",
        )
        .unwrap();
        assert!(matches!(NetworkManifest::load(&path), Err(Error::WrongType { .. })));
    }

    #[test]
    fn manifest_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("genesis.json"), b"{\"g\":1}").unwrap();
        fs::write(dir.path().join("c.json"), b"{}").unwrap();
        fs::write(dir.path().join("n0.crt"), b"cert").unwrap();
        fs::write(dir.path().join("n0.key"), b"key").unwrap();
        let manifest_path = dir.path().join("network.yaml");
        fs::write(
            &manifest_path,
            r#"
core_config_flags:
  log-level: info
  http-port: 9650
genesis_file: genesis.json
c_chain_config_file: c.json
nodes:
  - name: node0
    config_flags:
      http-port: 9652
    cert_file: n0.crt
    key_file: n0.key
    bin_kind: avalanchego
binaries:
  avalanchego: bin/avalanchego
readiness:
  poll_interval_ms: 500
"#,
        )
        .unwrap();

        let manifest = NetworkManifest::load(&manifest_path).unwrap();
        assert_eq!(manifest.readiness.poll_interval_ms, 500);
        assert_eq!(manifest.readiness.timeout_ms, 60_000);
        assert_eq!(
            manifest.binaries()["avalanchego"],
            dir.path().join("bin/avalanchego")
        );

        let config = manifest.network_config().unwrap();
        assert_eq!(config.genesis, b"{\"g\":1}");
        assert_eq!(config.c_chain_config, b"{}");
        assert_eq!(config.node_configs.len(), 1);
        let node = &config.node_configs[0];
        assert_eq!(node.name, "node0");
        assert_eq!(node.cert, b"cert");
        assert_eq!(node.private_key, b"key");
        assert_eq!(node.bin_kind, "avalanchego");
        let merged = ConfigFlags::parse(&config.core_config_flags)
            .unwrap()
            .merge(&ConfigFlags::parse(&node.config_flags).unwrap());
        assert_eq!(merged.port(HTTP_PORT_KEY).unwrap(), 9652);
    }

    #[test]
    fn manifest_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.yaml");
        fs::write(&path, "nodes: 3").unwrap();
        assert!(matches!(NetworkManifest::load(&path), Err(Error::Manifest(p, _)) if p == path));
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(NetworkManifest::load(&missing), Err(Error::IO(p, _)) if p == missing));
    }

    fn arb_flags() -> impl Strategy<Value = ConfigFlags> {
        btree_map("[a-z-]{1,8}", any::<i64>(), 0..8).prop_map(|entries| {
            ConfigFlags(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn merged_flags_keep_base_and_prefer_overrides(base in arb_flags(), overrides in arb_flags()) {
            let merged = base.merge(&overrides);
            for (key, value) in &base.0 {
                prop_assert!(merged.contains_key(key));
                if !overrides.contains_key(key) {
                    prop_assert_eq!(merged.get(key), Some(value));
                }
            }
            for (key, value) in &overrides.0 {
                prop_assert_eq!(merged.get(key), Some(value));
            }
        }
    }
}
