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
//! Validated plugin configuration.

use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, ToSocketAddrs},
    path::PathBuf,
    str::FromStr,
};

use anyhow::Context;
use ipnet::IpNet;
use thiserror::Error;

use crate::{cli::RunArgs, host::DEFAULT_INTERFACE_PREFIX};

/// Default TCP port of the plugin API.
pub const DEFAULT_PORT: u16 = 9000;

/// Where the plugin API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// TCP socket.
    Tcp(SocketAddr),
    /// Unix domain socket at the given path.
    Unix(PathBuf),
}

impl Default for ListenAddr {
    fn default() -> Self {
        ListenAddr::Tcp(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)))
    }
}

/// Error parsing a [ListenAddr].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenAddrParseError {
    /// The unix socket path is empty.
    #[error("empty unix socket path")]
    EmptyPath,
    /// The TCP address could not be resolved.
    #[error("invalid tcp address {0:?}")]
    InvalidTcp(String),
}

impl FromStr for ListenAddr {
    type Err = ListenAddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(ListenAddrParseError::EmptyPath);
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        if let Ok(addr) = addr.parse::<SocketAddr>() {
            return Ok(ListenAddr::Tcp(addr));
        }
        // Host names such as `localhost:9000`.
        addr.to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .map(ListenAddr::Tcp)
            .ok_or_else(|| ListenAddrParseError::InvalidTcp(s.to_string()))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            ListenAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Configuration of a plugin instance.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Listen address of the plugin API.
    pub listen: ListenAddr,
    /// Name of the host owning the addresses and endpoints created by this instance.
    pub hostname: String,
    /// Configured IP pools.
    pub pools: Vec<IpNet>,
    /// File the datastore is loaded from at startup and written to at shutdown.
    pub state_file: Option<PathBuf>,
    /// Seed for the address allocator.
    pub rng_seed: Option<u64>,
    /// Prefix of host side interface names.
    pub interface_prefix: String,
}

impl PluginConfig {
    /// Creates a configuration with the default listen address and no state file.
    pub fn new(hostname: impl Into<String>, pools: Vec<IpNet>) -> Self {
        Self {
            listen: ListenAddr::default(),
            hostname: hostname.into(),
            pools,
            state_file: None,
            rng_seed: None,
            interface_prefix: DEFAULT_INTERFACE_PREFIX.to_string(),
        }
    }

    /// Listen on `listen`.
    pub fn with_listen(mut self, listen: ListenAddr) -> Self {
        self.listen = listen;
        self
    }

    /// Load and store the datastore at `path`.
    pub fn with_state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = Some(path.into());
        self
    }

    /// Seed the address allocator.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Use `prefix` for host side interface names.
    pub fn with_interface_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.interface_prefix = prefix.into();
        self
    }
}

impl TryFrom<RunArgs> for PluginConfig {
    type Error = anyhow::Error;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        let listen = args
            .listen
            .parse::<ListenAddr>()
            .with_context(|| format!("invalid listen address {:?}", args.listen))?;

        let hostname = match args.hostname.filter(|h| !h.is_empty()) {
            Some(hostname) => hostname,
            None => hostname::get()
                .context("failed to read the hostname")?
                .into_string()
                .map_err(|h| anyhow::anyhow!("hostname {h:?} is not valid UTF-8"))?,
        };

        if args.pools.is_empty() {
            anyhow::bail!("at least one IP pool must be configured");
        }

        Ok(PluginConfig {
            listen,
            hostname,
            pools: args.pools,
            state_file: args.state_file,
            rng_seed: args.rng_seed,
            interface_prefix: args.interface_prefix,
        })
    }
}
