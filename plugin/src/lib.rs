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
//! # Docker remote network and IPAM driver.
//!
//! The container engine drives the plugin over HTTP: every lifecycle call is a `POST` to
//! `/<Interface>.<Method>` with a JSON body. [api] dispatches these calls to the
//! [ipam::IpamHandler] and the [network::NetworkDriver], which act on a shared
//! [datastore] and delegate host side effects to a [host::HostNetwork].
//!
//! [runtime::PluginRuntimeBuilder] wires everything up and serves the API.

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod datastore;
pub mod host;
pub mod io;
pub mod ipam;
pub mod locks;
pub mod network;
pub mod runtime;
pub mod task;

/// Transform a [`std::net::SocketAddr`] into a [`url::Url`].
pub fn addr_to_http_url(addr: std::net::SocketAddr) -> Result<url::Url, url::ParseError> {
    match addr {
        std::net::SocketAddr::V4(addr) => url::Url::parse(&format!("http://{addr}")),
        std::net::SocketAddr::V6(addr) => {
            url::Url::parse(&format!("http://[{}]:{}", addr.ip(), addr.port()))
        }
    }
}
