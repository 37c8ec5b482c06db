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
//! Plugin CLI options.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use ipnet::IpNet;
use libnetwork_observability::LogFormat;

use crate::host::DEFAULT_INTERFACE_PREFIX;

/// Docker remote network and IPAM plugin
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// Top-level subcommand
    #[command(subcommand)]
    pub command: Commands,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Log to stderr.
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    pub stderr: bool,

    /// Directory for the plugin log file.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Format of the log records.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Serve the plugin API.
    Run(RunArgs),
}

/// Arguments of the `run` subcommand.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Listen address, `HOST:PORT`, `tcp://HOST:PORT` or `unix:///PATH`.
    #[arg(long, env = "PLUGIN_LISTEN", default_value = "0.0.0.0:9000")]
    pub listen: String,

    /// Name of this host. Defaults to the system hostname.
    #[arg(long, env = "HOSTNAME")]
    pub hostname: Option<String>,

    /// IP pools addresses are assigned from.
    #[arg(
        long = "pool",
        env = "CALICO_IP_POOLS",
        value_delimiter = ',',
        default_values = ["192.168.0.0/16", "fd80:24e2:f998:72d6::/64"]
    )]
    pub pools: Vec<IpNet>,

    /// File to load the datastore from and to write it to on shutdown.
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Seed for the address allocator. Random if unset.
    #[arg(long)]
    pub rng_seed: Option<u64>,

    /// Prefix of host side interface names, at most four characters.
    #[arg(long, default_value = DEFAULT_INTERFACE_PREFIX)]
    pub interface_prefix: String,
}
