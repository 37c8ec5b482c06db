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
//! Host network side effects of the network driver.

use std::net::Ipv6Addr;

/// Prefix of host side interface names.
pub const DEFAULT_INTERFACE_PREFIX: &str = "cali";
/// Prefix of the container side interface before the engine renames it.
pub const TEMPORARY_INTERFACE_PREFIX: &str = "tmp";
/// Number of endpoint id bytes used in interface names.
const ENDPOINT_ID_BYTES: usize = 11;
/// Interface names are limited to 15 bytes.
const MAX_PREFIX_LEN: usize = 4;

/// Host network errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostNetworkError {
    /// Interface prefix does not fit the interface name length.
    #[error("interface prefix {0:?} is longer than {MAX_PREFIX_LEN} bytes")]
    PrefixTooLong(String),
    /// Interface could not be configured.
    #[error("failed to configure interface {interface}: {reason}")]
    Interface {
        /// The interface.
        interface: String,
        /// What failed.
        reason: String,
    },
}

/// Configures the host side of endpoints.
///
/// Routing and route distribution are handled outside of the plugin.
pub trait HostNetwork: Send + Sync {
    /// Creates a veth pair. `container_if` is moved into the sandbox by the engine.
    fn create_veth(&self, host_if: &str, container_if: &str, mac: &str)
    -> Result<(), HostNetworkError>;

    /// Removes the veth pair of `host_if`. Removing a missing pair succeeds.
    fn remove_veth(&self, host_if: &str) -> Result<(), HostNetworkError>;

    /// IPv6 link local address of `host_if`, if it has one.
    fn ipv6_link_local(&self, host_if: &str) -> Result<Option<Ipv6Addr>, HostNetworkError>;
}

/// Host network that only logs.
#[derive(Debug, Default, Clone)]
pub struct NoopHostNetwork;

impl HostNetwork for NoopHostNetwork {
    fn create_veth(
        &self,
        host_if: &str,
        container_if: &str,
        mac: &str,
    ) -> Result<(), HostNetworkError> {
        tracing::debug!(host_if, container_if, mac, "Skipping veth creation");
        Ok(())
    }

    fn remove_veth(&self, host_if: &str) -> Result<(), HostNetworkError> {
        tracing::debug!(host_if, "Skipping veth removal");
        Ok(())
    }

    fn ipv6_link_local(&self, _host_if: &str) -> Result<Option<Ipv6Addr>, HostNetworkError> {
        Ok(None)
    }
}

/// Derives interface names from endpoint ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceNames {
    prefix: String,
}

impl InterfaceNames {
    /// Creates interface names with a host side prefix of at most four characters.
    pub fn new(prefix: impl Into<String>) -> Result<Self, HostNetworkError> {
        let prefix = prefix.into();
        if prefix.len() > MAX_PREFIX_LEN {
            return Err(HostNetworkError::PrefixTooLong(prefix));
        }
        Ok(Self { prefix })
    }

    /// Host side prefix, also used by the engine to name the interface in the sandbox.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Host side interface name.
    pub fn host_side(&self, endpoint_id: &str) -> String {
        format!("{}{}", self.prefix, short_id(endpoint_id))
    }

    /// Temporary container side interface name.
    pub fn container_side(&self, endpoint_id: &str) -> String {
        format!("{TEMPORARY_INTERFACE_PREFIX}{}", short_id(endpoint_id))
    }
}

impl Default for InterfaceNames {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_INTERFACE_PREFIX.to_string(),
        }
    }
}

/// Leading bytes of the endpoint id, cut at a char boundary.
fn short_id(endpoint_id: &str) -> &str {
    if endpoint_id.len() <= ENDPOINT_ID_BYTES {
        return endpoint_id;
    }
    let mut end = ENDPOINT_ID_BYTES;
    while !endpoint_id.is_char_boundary(end) {
        end -= 1;
    }
    &endpoint_id[..end]
}
