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
//! IPAM driver.
//!
//! The engine sees one pool per IP version that spans all configured pools, unless the
//! network was created with a subnet matching a configured pool. Addresses are owned by
//! the host the plugin runs on.

use std::{collections::BTreeMap, net::IpAddr, sync::Arc};

use ipnet::IpNet;
use libnetwork_address_manager::{IpVersion, manager::PoolSelector};

use crate::{
    api::{
        error::{PluginError, SUB_POOL_MESSAGE},
        model::{
            AddressSpacesResponse, EmptyResponse, GATEWAY_DATA_KEY, IpamCapabilitiesResponse,
            POOL_CIDR_V4, POOL_CIDR_V6, POOL_ID_V4, POOL_ID_V6, ReleaseAddressRequest,
            ReleasePoolRequest, RequestAddressRequest, RequestAddressResponse,
            RequestPoolRequest, RequestPoolResponse,
        },
    },
    datastore::IpamStore,
};

/// Handles the `IpamDriver` methods.
pub struct IpamHandler {
    store: Arc<dyn IpamStore>,
    hostname: String,
}

impl IpamHandler {
    /// Creates a handler assigning addresses to `hostname`.
    pub fn new(store: Arc<dyn IpamStore>, hostname: impl Into<String>) -> Self {
        Self {
            store,
            hostname: hostname.into(),
        }
    }

    /// Host owning the addresses assigned by this handler.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// `IpamDriver.GetCapabilities`
    pub fn capabilities(&self) -> IpamCapabilitiesResponse {
        IpamCapabilitiesResponse::default()
    }

    /// `IpamDriver.GetDefaultAddressSpaces`
    pub fn default_address_spaces(&self) -> AddressSpacesResponse {
        AddressSpacesResponse::default()
    }

    /// `IpamDriver.RequestPool`
    ///
    /// Does not touch the allocator.
    pub fn request_pool(
        &self,
        request: RequestPoolRequest,
    ) -> Result<RequestPoolResponse, PluginError> {
        if !request.sub_pool.is_empty() {
            return Err(PluginError::UnsupportedRequest(SUB_POOL_MESSAGE.to_string()));
        }

        let version = if request.v6 {
            IpVersion::V6
        } else {
            IpVersion::V4
        };
        let (default_id, all_addresses) = fixed_pool(version);

        let pool_id = if request.pool.is_empty() {
            default_id.to_string()
        } else {
            let cidr: IpNet = request.pool.parse().map_err(|_| {
                PluginError::MalformedRequest(format!("invalid pool CIDR {:?}", request.pool))
            })?;
            if IpVersion::of_net(&cidr) != version {
                return Err(PluginError::MalformedRequest(format!(
                    "pool {cidr} is not an {version} pool"
                )));
            }
            let pool = self
                .store
                .pool(&cidr)?
                .ok_or_else(|| PluginError::PoolNotFound(cidr.to_string()))?;
            pool.cidr.to_string()
        };

        let pool = if pool_id == default_id {
            all_addresses.to_string()
        } else {
            pool_id.clone()
        };

        Ok(RequestPoolResponse {
            pool_id,
            pool,
            // Dummy gateway, keeps the engine from taking a gateway address from the pool.
            data: BTreeMap::from([(GATEWAY_DATA_KEY.to_string(), all_addresses.to_string())]),
        })
    }

    /// `IpamDriver.ReleasePool`
    ///
    /// Pools are configuration, there is nothing to release.
    pub fn release_pool(&self, request: ReleasePoolRequest) -> EmptyResponse {
        tracing::debug!(pool_id = %request.pool_id, "Releasing pool");
        EmptyResponse {}
    }

    /// `IpamDriver.RequestAddress`
    ///
    /// Assigns the requested address, or a random free one if none is requested.
    pub fn request_address(
        &self,
        request: RequestAddressRequest,
    ) -> Result<RequestAddressResponse, PluginError> {
        let selector = self.selector(&request.pool_id)?;
        let requested = if request.address.is_empty() {
            None
        } else {
            Some(parse_address(&request.address)?)
        };

        let address = self.store.assign(&self.hostname, selector, requested)?;
        tracing::info!(%address, pool_id = %request.pool_id, host = %self.hostname, "Assigned address");

        Ok(RequestAddressResponse {
            address: host_cidr(address),
            data: BTreeMap::new(),
        })
    }

    /// `IpamDriver.ReleaseAddress`
    ///
    /// Releasing an address that is not assigned is an error.
    pub fn release_address(
        &self,
        request: ReleaseAddressRequest,
    ) -> Result<EmptyResponse, PluginError> {
        let address = parse_address(&request.address)?;
        let owner = self.store.release(address)?;
        tracing::info!(%address, %owner, "Released address");
        Ok(EmptyResponse {})
    }

    fn selector(&self, pool_id: &str) -> Result<PoolSelector, PluginError> {
        match pool_id {
            POOL_ID_V4 => Ok(PoolSelector::AnyPool(IpVersion::V4)),
            POOL_ID_V6 => Ok(PoolSelector::AnyPool(IpVersion::V6)),
            _ => {
                let cidr: IpNet = pool_id
                    .parse()
                    .map_err(|_| PluginError::PoolNotFound(pool_id.to_string()))?;
                let pool = self
                    .store
                    .pool(&cidr)?
                    .ok_or_else(|| PluginError::PoolNotFound(pool_id.to_string()))?;
                Ok(PoolSelector::Pool(pool.cidr))
            }
        }
    }
}

fn fixed_pool(version: IpVersion) -> (&'static str, &'static str) {
    match version {
        IpVersion::V4 => (POOL_ID_V4, POOL_CIDR_V4),
        IpVersion::V6 => (POOL_ID_V6, POOL_CIDR_V6),
    }
}

/// Parses an address with or without prefix length.
pub(crate) fn parse_address(address: &str) -> Result<IpAddr, PluginError> {
    address
        .parse::<IpAddr>()
        .or_else(|_| address.parse::<IpNet>().map(|net| net.addr()))
        .map_err(|_| PluginError::MalformedRequest(format!("invalid IP address {address:?}")))
}

/// Address with host prefix length, e.g. `10.0.0.1/32`.
pub(crate) fn host_cidr(address: IpAddr) -> String {
    IpNet::from(address).to_string()
}
