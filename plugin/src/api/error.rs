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
//! Plugin error type and its wire representation.

use std::net::IpAddr;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use libnetwork_address_manager::manager::AddressManagerError;
use libnetwork_observability::{MessageDirection, log_json_message};

use crate::{
    api::model::{ErrorResponse, PLUGIN_MEDIA_TYPE},
    datastore::DatastoreError,
    host::HostNetworkError,
};

/// Message returned when every pool of the requested family is exhausted.
pub const ADDRESS_EXHAUSTED_MESSAGE: &str =
    "There are no available IP addresses in the configured pools";

/// Message returned for `RequestPool` with a sub pool.
pub const SUB_POOL_MESSAGE: &str = "Calico IPAM does not support sub pool configuration on \
     'docker create network'. Calico IP Pools should be configured first and IP assignment \
     is from those pre-configured pools.";

/// Errors returned by plugin methods.
///
/// Every variant is rendered as HTTP 200 with an `{"Err": "<message>"}` body. The engine
/// checks the `Err` field, not the status code.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PluginError {
    /// The request asks for something the plugin does not do.
    #[error("{0}")]
    UnsupportedRequest(String),
    /// No configured pool matches the requested pool or address.
    #[error("no configured IP pool matches {0}")]
    PoolNotFound(String),
    /// The requested address is owned by someone else.
    #[error("the address {address} is already in use by {owner}")]
    AddressAlreadyAssigned {
        /// The requested address.
        address: IpAddr,
        /// Host owning the address.
        owner: String,
    },
    /// All pools of the requested family are exhausted.
    #[error("{}", ADDRESS_EXHAUSTED_MESSAGE)]
    AddressExhausted,
    /// The released address is not assigned.
    #[error("the address {0} is not assigned")]
    AddressNotAssigned(IpAddr),
    /// No endpoint with this id exists on this host.
    #[error("endpoint {0} not found")]
    EndpointNotFound(String),
    /// An endpoint with this id but different settings exists.
    #[error("endpoint {0} already exists")]
    EndpointExists(String),
    /// The endpoint is joined to another sandbox.
    #[error("endpoint {endpoint_id} is already joined to {sandbox_key}")]
    EndpointAlreadyJoined {
        /// The endpoint id.
        endpoint_id: String,
        /// Sandbox the endpoint is joined to.
        sandbox_key: String,
    },
    /// No network with this id exists.
    #[error("network {0} not found")]
    NetworkNotFound(String),
    /// A network with this id but different settings exists.
    #[error("network {0} already exists with different options")]
    NetworkConflict(String),
    /// The network still has endpoints.
    #[error("network {network_id} still has {endpoints} endpoints")]
    NetworkInUse {
        /// The network id.
        network_id: String,
        /// Number of endpoints still referencing the network.
        endpoints: usize,
    },
    /// The request body could not be decoded or carries invalid values.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    /// A collaborator of the plugin failed.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl From<AddressManagerError> for PluginError {
    fn from(err: AddressManagerError) -> Self {
        match err {
            AddressManagerError::PoolNotFound(pool) => PluginError::PoolNotFound(pool.to_string()),
            AddressManagerError::AddressNotInPool(address) => {
                PluginError::PoolNotFound(address.to_string())
            }
            AddressManagerError::AddressAlreadyAssigned { address, owner } => {
                PluginError::AddressAlreadyAssigned { address, owner }
            }
            AddressManagerError::AddressNotAssigned(address) => {
                PluginError::AddressNotAssigned(address)
            }
            AddressManagerError::NoAddressesAvailable(_) => PluginError::AddressExhausted,
            e @ AddressManagerError::WrongIpVersion { .. } => {
                PluginError::MalformedRequest(e.to_string())
            }
            e @ AddressManagerError::Inconsistent(_) => {
                PluginError::BackendUnavailable(e.to_string())
            }
        }
    }
}

impl From<DatastoreError> for PluginError {
    fn from(err: DatastoreError) -> Self {
        match err {
            DatastoreError::Address(e) => e.into(),
            DatastoreError::EndpointExists(id) => PluginError::EndpointExists(id),
            DatastoreError::EndpointNotFound(id) => PluginError::EndpointNotFound(id),
            DatastoreError::NetworkConflict(id) => PluginError::NetworkConflict(id),
            DatastoreError::NetworkNotFound(id) => PluginError::NetworkNotFound(id),
            DatastoreError::NetworkInUse {
                network_id,
                endpoints,
            } => PluginError::NetworkInUse {
                network_id,
                endpoints,
            },
            DatastoreError::AddressInUse {
                address,
                endpoint_id,
                host,
            } => PluginError::AddressAlreadyAssigned {
                address,
                owner: format!("endpoint {endpoint_id} on {host}"),
            },
            e @ DatastoreError::Unavailable(_) => PluginError::BackendUnavailable(e.to_string()),
        }
    }
}

impl From<HostNetworkError> for PluginError {
    fn from(err: HostNetworkError) -> Self {
        PluginError::BackendUnavailable(err.to_string())
    }
}

impl IntoResponse for PluginError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "Plugin request failed");

        let body = ErrorResponse {
            err: self.to_string(),
        };
        log_json_message(MessageDirection::Response, &body);

        let body = serde_json::to_vec(&body)
            .unwrap_or_else(|_| br#"{"Err":"failed to serialize error"}"#.to_vec());
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PLUGIN_MEDIA_TYPE)],
            body,
        )
            .into_response()
    }
}
