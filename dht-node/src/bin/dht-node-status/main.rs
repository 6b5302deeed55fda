// Copyright 2026 Distributed Systems Team.
//
// This software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, this software is distributed
// under the GPL Licence on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
// either express or implied. Please review the Licence for the specific language governing
// permissions and limitations relating to use of this software.

//! Minimal smoke-testing surface for [`dht_node::Supervisor`]: start one node, optionally
//! bootstrap it into a mesh, and print its status once. This is not an admin CLI or a
//! long-running daemon — just enough to exercise a `Supervisor` by hand during
//! development, the same role the teacher's `ant-node-manager` status binaries play
//! relative to a running `antnode` process.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;
use dht_node::{NodeConfig, Supervisor};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Start a single dht-mesh node and print its status")]
struct Args {
    /// Path to a TOML config file. Defaults are used for any field it omits, and for
    /// everything if the path is not given at all.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Attempt to join a mesh via the configured bootstrap endpoints before printing
    /// status. Without this flag the node starts isolated: identity and routing table
    /// only, no bootstrap round-trip.
    #[clap(long)]
    bootstrap: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let config = NodeConfig::load(args.config.as_deref())?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter.clone()))
        .init();

    let supervisor = Supervisor::new(config).await?;
    supervisor.spawn().await;

    if args.bootstrap {
        match supervisor.bootstrap_into_mesh().await {
            Ok(is_genesis) => tracing::info!(is_genesis, "bootstrap round-trip complete"),
            Err(err) => tracing::warn!(%err, "bootstrap round-trip failed, continuing isolated"),
        }
    }

    println!("{}", supervisor.status().await);

    supervisor.shutdown().await;
    Ok(())
}
