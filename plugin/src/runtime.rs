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
//! Plugin runtime.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio::{
    net::{TcpListener, UnixListener},
    time::sleep,
};
use tokio_util::sync::CancellationToken;

use crate::{
    addr_to_http_url,
    api::{PluginState, build_plugin_api},
    client::{PluginClient, PluginClientError},
    config::{ListenAddr, PluginConfig},
    datastore::{SharedDatastore, dto::DatastoreDto},
    host::{HostNetwork, InterfaceNames, NoopHostNetwork},
    io::{read_json_if_exists, write_json},
    ipam::IpamHandler,
    network::NetworkDriver,
    task::{CancelTaskSet, InProcess},
};

/// Builder for a plugin runtime.
pub struct PluginRuntimeBuilder {
    config: PluginConfig,
    datastore: Option<SharedDatastore>,
    host_network: Arc<dyn HostNetwork>,
}

impl PluginRuntimeBuilder {
    /// Create a new plugin runtime builder.
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            datastore: None,
            host_network: Arc::new(NoopHostNetwork),
        }
    }

    /// Use `datastore` instead of loading or creating one. Runtimes of several hosts can
    /// share a datastore this way.
    pub fn with_datastore(mut self, datastore: SharedDatastore) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Apply host side effects through `host_network`.
    pub fn with_host_network(mut self, host_network: Arc<dyn HostNetwork>) -> Self {
        self.host_network = host_network;
        self
    }

    /// Start the plugin runtime.
    pub async fn start(self) -> Result<PluginRuntime, PluginRuntimeError> {
        self.start_with_task_set(CancelTaskSet::new()).await
    }

    /// Start the plugin runtime, serving until the token of `task_set` is cancelled.
    pub async fn start_with_task_set(
        self,
        mut task_set: CancelTaskSet,
    ) -> Result<PluginRuntime, PluginRuntimeError> {
        let config = self.config;
        let datastore = match self.datastore {
            Some(datastore) => datastore,
            None => load_datastore(&config).await?,
        };

        let names = InterfaceNames::new(config.interface_prefix.clone())
            .map_err(|e| PluginRuntimeError::StartupError(e.to_string()))?;
        let ipam = IpamHandler::new(Arc::new(datastore.clone()), config.hostname.clone());
        let network = NetworkDriver::new(
            config.hostname.clone(),
            datastore.clone(),
            self.host_network,
            names,
        );
        let router = build_plugin_api(PluginState::new(Arc::new(ipam), Arc::new(network)));

        let token = task_set.cancellation_token();
        let snapshot = config
            .state_file
            .clone()
            .map(|path| (path, datastore.clone()));

        let local_addr = match &config.listen {
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(|e| {
                    std::io::Error::new(e.kind(), format!("Failed to bind to {addr}: {e}"))
                })?;
                let local_addr = listener.local_addr()?;
                tracing::info!(addr=%local_addr, hostname=%config.hostname, "Starting plugin API");

                task_set.spawn_task(async move {
                    let result = axum::serve(listener, router.into_make_service())
                        .with_graceful_shutdown(token.cancelled_owned())
                        .await;
                    finish(result, snapshot).await
                });
                Some(local_addr)
            }
            ListenAddr::Unix(path) => {
                remove_stale_socket(path).await?;
                let listener = UnixListener::bind(path).map_err(|e| {
                    std::io::Error::new(
                        e.kind(),
                        format!("Failed to bind to {}: {e}", path.display()),
                    )
                })?;
                tracing::info!(path=%path.display(), hostname=%config.hostname, "Starting plugin API");

                task_set.spawn_task(async move {
                    let result = axum::serve(listener, router.into_make_service())
                        .with_graceful_shutdown(token.cancelled_owned())
                        .await;
                    finish(result, snapshot).await
                });
                None
            }
        };

        let client = local_addr
            .map(|addr| {
                let url = addr_to_http_url(addr).map_err(PluginClientError::from)?;
                PluginClient::new(&url)
            })
            .transpose()?;

        Ok(PluginRuntime {
            handle: InProcess::new(task_set),
            local_addr,
            client,
            datastore,
        })
    }
}

async fn load_datastore(config: &PluginConfig) -> Result<SharedDatastore, PluginRuntimeError> {
    let seed = config.rng_seed.unwrap_or_else(|| rand::rng().next_u64());
    let rng = ChaCha8Rng::seed_from_u64(seed);

    if let Some(path) = &config.state_file {
        if let Some(dto) = read_json_if_exists::<_, DatastoreDto>(path).await? {
            tracing::info!(path=%path.display(), "Loaded datastore from state file");
            return SharedDatastore::from_dto(dto, rng)
                .map_err(|e| PluginRuntimeError::StartupError(format!("{e:#}")));
        }
    }

    SharedDatastore::new(config.pools.clone(), rng)
        .map_err(|e| PluginRuntimeError::StartupError(e.to_string()))
}

async fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!(path=%path.display(), "Removed stale socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Writes the datastore snapshot once the server has stopped.
async fn finish(
    result: std::io::Result<()>,
    snapshot: Option<(PathBuf, SharedDatastore)>,
) -> std::io::Result<()> {
    if let Some((path, datastore)) = snapshot {
        match datastore.to_dto() {
            Ok(dto) => {
                if let Err(e) = write_json(&path, &dto).await {
                    tracing::error!(path=%path.display(), error=%e, "Failed to write state file");
                } else {
                    tracing::info!(path=%path.display(), "Wrote datastore to state file");
                }
            }
            Err(e) => tracing::error!(error=%e, "Failed to snapshot datastore"),
        }
    }
    tracing::info!("Plugin API stopped");
    result
}

/// In-memory plugin runtime.
pub struct PluginRuntime {
    handle: InProcess,
    local_addr: Option<SocketAddr>,
    client: Option<PluginClient>,
    datastore: SharedDatastore,
}

const MAX_ATTEMPTS: i32 = 5;
const ATTEMPT_WAIT: Duration = Duration::from_millis(200);

/// Plugin runtime error.
#[derive(Error, Debug)]
pub enum PluginRuntimeError {
    /// Plugin API client error.
    #[error("client error: {0:?}")]
    ClientError(#[from] PluginClientError),
    /// Plugin not ready.
    #[error("plugin not ready: {0}")]
    NotReady(String),
    /// I/O error.
    #[error("i/o error {0}")]
    IoError(#[from] std::io::Error),
    /// Startup error.
    #[error("startup error: {0}")]
    StartupError(String),
}

impl PluginRuntime {
    /// TCP address the plugin API listens on, `None` for a unix socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Client of the plugin API, `None` for a unix socket.
    pub fn client(&self) -> Option<&PluginClient> {
        self.client.as_ref()
    }

    /// Datastore the plugin acts on.
    pub fn datastore(&self) -> &SharedDatastore {
        &self.datastore
    }

    /// Token that stops the runtime when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.handle.task_set.cancellation_token()
    }

    /// Stop and join all the tasks. This is primarily intended to be used in tests.
    pub async fn stop_and_join(&mut self) -> Result<(), PluginRuntimeError> {
        self.handle.task_set.cancellation_token().cancel();
        self.join().await
    }

    /// Join all tasks.
    pub async fn join(&mut self) -> Result<(), PluginRuntimeError> {
        Ok(self.handle.task_set.join_all().await?)
    }

    /// Wait until the plugin answers `Plugin.Activate`.
    pub async fn wait_for_ready(&self) -> Result<(), PluginRuntimeError> {
        let Some(client) = &self.client else {
            // A bound unix socket queues connections until the server accepts them.
            return Ok(());
        };

        let mut err = PluginRuntimeError::NotReady("Unknown state".to_string());
        for _ in 1..=MAX_ATTEMPTS {
            err = match client.activate().await {
                Ok(_) => return Ok(()),
                Err(e) => PluginRuntimeError::ClientError(e),
            };
            sleep(ATTEMPT_WAIT).await;
        }
        Err(err)
    }
}
