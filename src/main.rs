// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result};
use local_network::{logging, Network, NetworkManifest};
use std::path::PathBuf;
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "local-network",
    author = "Diem",
    about = "Launches a local test network and keeps it running until CTRL-C"
)]
struct Args {
    /// Network manifest (YAML) describing nodes, artifacts and binaries
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    pub config: PathBuf,
    /// Do not wait for the nodes to report bootstrapped
    #[structopt(long = "skip-readiness")]
    pub skip_readiness: bool,
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::from_args();

    let manifest = NetworkManifest::load(&args.config)
        .with_context(|| format!("Unable to load manifest {:?}", args.config))?;
    let network_config = manifest
        .network_config()
        .context("Unable to read network artifacts")?;

    // CTRL-C aborts a launch or readiness wait in progress, then tears down.
    let cancel = CancellationToken::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let handler_cancel = cancel.clone();
    ctrlc::set_handler(move || {
        handler_cancel.cancel();
        let _ = tx.send(());
    })
    .context("Unable to set CTRL-C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Unable to start tokio runtime")?;

    let mut network = Network::builder(network_config, manifest.binaries())
        .readiness(manifest.readiness)
        .cancel(cancel.clone())
        .build()
        .context("Unable to launch network")?;

    for id in network.ids() {
        println!(
            "node {} ({}) running as process {}",
            id,
            network.name(id)?,
            network.pid(id)?
        );
    }

    if !args.skip_readiness {
        let mut readiness = {
            let _runtime = runtime.enter();
            network.ready().context("Unable to poll nodes")?
        };
        let ready = runtime.block_on(async {
            while let Some(error) = readiness.next_error().await {
                eprintln!("{}", error);
            }
            readiness.wait().await
        });
        match ready.and_then(|report| report.into_result()) {
            Ok(_) => println!("All {} node(s) are bootstrapped", network.len()),
            Err(e) => {
                network.stop().context("Unable to stop network")?;
                return Err(e).context("Network did not become ready");
            }
        }
    }

    if !cancel.is_cancelled() {
        println!("CTRL-C to exit.");
        rx.recv().context("CTRL-C handler went away")?;
    }

    network.stop().context("Unable to stop network")?;
    println!("Exit local-network.");
    Ok(())
}
