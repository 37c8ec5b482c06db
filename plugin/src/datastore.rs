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
//! Datastore capabilities the handlers depend on.
//!
//! Each trait is a narrow view on shared state. Every call is atomic with respect to all
//! other calls, the handlers never cache results across requests.
//! [SharedDatastore] implements all of them in memory.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use libnetwork_address_manager::{
    IpVersion,
    manager::{AddressManagerError, IpPool, PoolSelector},
};
use serde::{Deserialize, Serialize};

use crate::api::model::{IpamData, Options};

pub mod dto;
mod memory;

pub use memory::SharedDatastore;

/// Datastore errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DatastoreError {
    /// Address assignment failed.
    #[error(transparent)]
    Address(#[from] AddressManagerError),
    /// An endpoint with this id exists on the host.
    #[error("endpoint {0} already exists")]
    EndpointExists(String),
    /// No endpoint with this id exists on the host.
    #[error("endpoint {0} not found")]
    EndpointNotFound(String),
    /// A network with this id and different settings exists.
    #[error("network {0} already exists")]
    NetworkConflict(String),
    /// No network with this id exists.
    #[error("network {0} not found")]
    NetworkNotFound(String),
    /// Endpoints still reference the network.
    #[error("network {network_id} still has {endpoints} endpoints")]
    NetworkInUse {
        /// The network id.
        network_id: String,
        /// Number of endpoints referencing the network.
        endpoints: usize,
    },
    /// A live endpoint already holds the address.
    #[error("address {address} is held by endpoint {endpoint_id} on {host}")]
    AddressInUse {
        /// The contested address.
        address: IpAddr,
        /// Endpoint holding the address.
        endpoint_id: String,
        /// Host of that endpoint.
        host: String,
    },
    /// The store cannot be accessed.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

/// Address assignment capability.
///
/// Guarantees at most one owner per address. Owners are host names.
pub trait IpamStore: Send + Sync {
    /// Assigns an address from the selected pools to `handle`.
    fn assign(
        &self,
        handle: &str,
        selector: PoolSelector,
        requested: Option<IpAddr>,
    ) -> Result<IpAddr, DatastoreError>;

    /// Releases an assigned address, returning its former owner.
    fn release(&self, address: IpAddr) -> Result<String, DatastoreError>;

    /// Releases the address only if `handle` owns it. Returns whether it was released.
    fn release_owned(&self, handle: &str, address: IpAddr) -> Result<bool, DatastoreError>;

    /// Configured pools of one version.
    fn pools_for(&self, version: IpVersion) -> Result<Vec<IpPool>, DatastoreError>;

    /// The configured pool with exactly this prefix.
    fn pool(&self, cidr: &IpNet) -> Result<Option<IpPool>, DatastoreError>;
}

/// Endpoint record capability. Records are keyed by host and endpoint id.
pub trait EndpointStore: Send + Sync {
    /// Stores a new endpoint.
    ///
    /// Fails if the host already has an endpoint with this id, if the endpoint network
    /// does not exist or if another endpoint holds one of its addresses. The checks and
    /// the insert are one atomic step.
    fn create_endpoint(&self, endpoint: Endpoint) -> Result<(), DatastoreError>;

    /// Looks up an endpoint of a host.
    fn lookup_endpoint(
        &self,
        host: &str,
        endpoint_id: &str,
    ) -> Result<Option<Endpoint>, DatastoreError>;

    /// Replaces an existing endpoint.
    fn update_endpoint(&self, endpoint: Endpoint) -> Result<(), DatastoreError>;

    /// Removes an endpoint, returning the removed record.
    fn delete_endpoint(&self, host: &str, endpoint_id: &str) -> Result<Endpoint, DatastoreError>;

    /// Number of endpoints of a host.
    fn count_endpoints(&self, host: &str) -> Result<usize, DatastoreError>;

    /// Number of endpoints, of all hosts, attached to a network.
    fn count_in_network(&self, network_id: &str) -> Result<usize, DatastoreError>;
}

/// Result of [NetworkStore::write_network].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkWrite {
    /// The network was stored.
    Created,
    /// An identical network was already stored.
    Unchanged,
}

/// Network record capability.
pub trait NetworkStore: Send + Sync {
    /// Looks up a network.
    fn get_network(&self, network_id: &str) -> Result<Option<Network>, DatastoreError>;

    /// Stores a network unless one with the same id exists. Storing an identical network
    /// again is [NetworkWrite::Unchanged], a different one is a conflict.
    fn write_network(&self, network: Network) -> Result<NetworkWrite, DatastoreError>;

    /// Removes a network no endpoint references, returning it if it existed.
    ///
    /// Fails with [DatastoreError::NetworkInUse] otherwise. The check and the removal are
    /// one atomic step.
    fn remove_unused_network(&self, network_id: &str) -> Result<Option<Network>, DatastoreError>;
}

/// One workload attachment on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host the endpoint lives on.
    pub host: String,
    /// Engine endpoint id.
    pub endpoint_id: String,
    /// Engine network id.
    pub network_id: String,
    /// Host side interface name.
    pub interface_name: String,
    /// MAC address of the container side interface.
    pub mac: String,
    /// Assigned IPv4 address.
    pub ipv4: Option<Ipv4Addr>,
    /// Assigned IPv6 address.
    pub ipv6: Option<Ipv6Addr>,
    /// Attachment state.
    pub state: EndpointState,
}

impl Endpoint {
    /// All assigned addresses.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .into_iter()
            .chain(self.ipv6.map(IpAddr::V6))
            .collect()
    }
}

/// Attachment state of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EndpointState {
    /// Created, not attached to a sandbox.
    Created,
    /// Attached to a sandbox.
    Joined {
        /// Sandbox the endpoint is attached to.
        sandbox_key: String,
        /// IPv6 gateway handed out on join.
        gateway_ipv6: Option<Ipv6Addr>,
    },
}

impl EndpointState {
    /// Name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            EndpointState::Created => "created",
            EndpointState::Joined { .. } => "joined",
        }
    }
}

/// A network managed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    /// Engine network id.
    pub network_id: String,
    /// Driver options.
    pub options: Options,
    /// IPv4 IPAM data.
    pub ipv4_data: Vec<IpamData>,
    /// IPv6 IPAM data.
    pub ipv6_data: Vec<IpamData>,
}
