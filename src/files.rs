// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::{ArtifactPaths, ConfigFlags, NetworkConfig, NodeConfig},
    error::{Error, Result},
};
use log::debug;
use std::{
    fs::{DirBuilder, File},
    io::Write,
    path::Path,
};

/// Parent directories are created readable by owner and group only.
const DIR_MODE: u32 = 0o750;

/// Creates any missing parent directories, then creates or truncates `path`
/// and writes `contents` in full. A failed write may leave a truncated file.
pub fn write_file<P: AsRef<Path>>(path: P, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        dir_builder()
            .create(parent)
            .map_err(Error::io(parent))?;
    }
    let mut file = File::create(path).map_err(Error::io(path))?;
    file.write_all(contents).map_err(Error::io(path))?;
    file.sync_all().map_err(Error::io(path))
}

#[cfg(unix)]
fn dir_builder() -> DirBuilder {
    use std::os::unix::fs::DirBuilderExt;
    let mut builder = DirBuilder::new();
    builder.recursive(true).mode(DIR_MODE);
    builder
}

#[cfg(not(unix))]
fn dir_builder() -> DirBuilder {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    builder
}

/// Writes every artifact a node needs before it can be launched and returns
/// their locations. The merged flags are written last, as the node's config file.
pub fn materialize(
    network: &NetworkConfig,
    node: &NodeConfig,
    flags: &ConfigFlags,
) -> Result<ArtifactPaths> {
    let paths = flags.artifact_paths()?;
    let config_bytes = flags.to_bytes()?;

    write_file(&paths.genesis, &network.genesis)?;
    write_file(&paths.c_chain_config, &network.c_chain_config)?;
    write_file(&paths.tls_cert, &node.cert)?;
    write_file(&paths.tls_key, &node.private_key)?;
    write_file(&paths.config_file, &config_bytes)?;

    debug!(
        "[{}] wrote node config to {:?}",
        node.name, paths.config_file
    );
    Ok(paths)
}
