// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Docker remote network and IPAM plugin daemon.

use anyhow::Context;
use clap::Parser;
use libnetwork_observability::setup_tracing;
use libnetwork_plugin::{
    cli::{Commands, Opts},
    config::PluginConfig,
    runtime::PluginRuntimeBuilder,
    task::CancelTaskSet,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _guards = setup_tracing(
        opts.logging.log_dir.as_ref(),
        opts.logging.stderr,
        opts.logging.log_format,
    )
    .context("failed to set up logging")?;

    tracing::info!("libnetwork-plugin v{} starting", env!("CARGO_PKG_VERSION"));

    match opts.command {
        Commands::Run(args) => {
            let config = PluginConfig::try_from(args)?;
            tracing::info!(
                listen=%config.listen,
                hostname=%config.hostname,
                pools=?config.pools,
                "Loaded configuration"
            );

            let mut runtime = PluginRuntimeBuilder::new(config)
                .start_with_task_set(CancelTaskSet::new_with_signal_handler())
                .await
                .context("failed to start the plugin")?;

            runtime.join().await.context("plugin stopped with an error")?;
            tracing::info!("Plugin stopped");
        }
    }
    Ok(())
}
