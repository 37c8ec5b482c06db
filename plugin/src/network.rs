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
//! Network driver.
//!
//! Endpoints move through `Created -> Joined -> Created` and are removed by
//! `DeleteEndpoint`. All operations on one endpoint are serialized by [EndpointLocks].

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    sync::Arc,
};

use serde_json::Value;

use crate::{
    api::{
        error::PluginError,
        model::{
            CreateEndpointRequest, CreateEndpointResponse, CreateNetworkRequest,
            CreatedInterface, DeleteNetworkRequest, DiscoveryNotification, EmptyResponse,
            EndpointOperInfoResponse, EndpointRequest, ExternalConnectivityRequest, InterfaceName,
            JoinRequest, JoinResponse, NetworkCapabilitiesResponse, ROUTE_TYPE_CONNECTED,
            StaticRoute,
        },
    },
    datastore::{
        Endpoint, EndpointState, EndpointStore, IpamStore, Network, NetworkStore, NetworkWrite,
    },
    host::{HostNetwork, InterfaceNames},
    ipam::parse_address,
    locks::EndpointLocks,
};

/// MAC address of every container side interface.
pub const FIXED_MAC: &str = "EE:EE:EE:EE:EE:EE";
/// IPv4 next hop of every container. Answered by proxy ARP on the host side.
pub const IPV4_GATEWAY: Ipv4Addr = Ipv4Addr::new(169, 254, 1, 1);

/// Handles the `NetworkDriver` methods.
pub struct NetworkDriver {
    hostname: String,
    ipam: Arc<dyn IpamStore>,
    endpoints: Arc<dyn EndpointStore>,
    networks: Arc<dyn NetworkStore>,
    host_network: Arc<dyn HostNetwork>,
    locks: EndpointLocks,
    names: InterfaceNames,
}

impl NetworkDriver {
    /// Creates a driver for endpoints of `hostname`.
    pub fn new<S>(
        hostname: impl Into<String>,
        store: S,
        host_network: Arc<dyn HostNetwork>,
        names: InterfaceNames,
    ) -> Self
    where
        S: IpamStore + EndpointStore + NetworkStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            hostname: hostname.into(),
            ipam: store.clone(),
            endpoints: store.clone(),
            networks: store,
            host_network,
            locks: EndpointLocks::default(),
            names,
        }
    }

    /// `NetworkDriver.GetCapabilities`
    pub fn capabilities(&self) -> NetworkCapabilitiesResponse {
        NetworkCapabilitiesResponse::default()
    }

    /// `NetworkDriver.CreateNetwork`
    pub fn create_network(
        &self,
        request: CreateNetworkRequest,
    ) -> Result<EmptyResponse, PluginError> {
        let network = Network {
            network_id: request.network_id,
            options: request.options.unwrap_or_default(),
            ipv4_data: request.ipv4_data.unwrap_or_default(),
            ipv6_data: request.ipv6_data.unwrap_or_default(),
        };
        let network_id = network.network_id.clone();

        match self.networks.write_network(network)? {
            NetworkWrite::Created => tracing::info!(%network_id, "Created network"),
            NetworkWrite::Unchanged => tracing::debug!(%network_id, "Network already exists"),
        }
        Ok(EmptyResponse {})
    }

    /// `NetworkDriver.DeleteNetwork`
    ///
    /// Deleting an unknown network succeeds, deleting one with endpoints fails.
    pub fn delete_network(
        &self,
        request: DeleteNetworkRequest,
    ) -> Result<EmptyResponse, PluginError> {
        let network_id = request.network_id;

        match self.networks.remove_unused_network(&network_id)? {
            Some(_) => tracing::info!(%network_id, "Deleted network"),
            None => tracing::warn!(%network_id, "Deleting unknown network"),
        }
        Ok(EmptyResponse {})
    }

    /// `NetworkDriver.CreateEndpoint`
    ///
    /// Creating the same endpoint again succeeds, creating it with other settings fails.
    /// The network must exist and no other endpoint may hold the addresses.
    pub async fn create_endpoint(
        &self,
        request: CreateEndpointRequest,
    ) -> Result<CreateEndpointResponse, PluginError> {
        let _guard = self.locks.lock(&self.hostname, &request.endpoint_id).await;

        let interface = request.interface.unwrap_or_default();
        if interface.address.is_empty() && interface.address_ipv6.is_empty() {
            return Err(PluginError::MalformedRequest(
                "No address assigned for endpoint".to_string(),
            ));
        }
        let ipv4 = optional_address(&interface.address)?
            .map(|address| {
                match address {
                    IpAddr::V4(address) => Ok(address),
                    IpAddr::V6(_) => Err(not_family(&interface.address, "IPv4")),
                }
            })
            .transpose()?;
        let ipv6 = optional_address(&interface.address_ipv6)?
            .map(|address| {
                match address {
                    IpAddr::V6(address) => Ok(address),
                    IpAddr::V4(_) => Err(not_family(&interface.address_ipv6, "IPv6")),
                }
            })
            .transpose()?;

        // The engine rejects a MAC from the driver if it already picked one.
        let (mac, response) = if interface.mac_address.is_empty() {
            let response = CreateEndpointResponse {
                interface: Some(CreatedInterface {
                    mac_address: FIXED_MAC.to_string(),
                }),
            };
            (FIXED_MAC.to_string(), response)
        } else {
            (interface.mac_address, CreateEndpointResponse::default())
        };

        let endpoint = Endpoint {
            host: self.hostname.clone(),
            interface_name: self.names.host_side(&request.endpoint_id),
            endpoint_id: request.endpoint_id,
            network_id: request.network_id,
            mac,
            ipv4,
            ipv6,
            state: EndpointState::Created,
        };

        if let Some(existing) = self
            .endpoints
            .lookup_endpoint(&self.hostname, &endpoint.endpoint_id)?
        {
            if same_identity(&existing, &endpoint) {
                tracing::debug!(endpoint_id = %endpoint.endpoint_id, "Endpoint already exists");
                return Ok(response);
            }
            return Err(PluginError::EndpointExists(endpoint.endpoint_id));
        }

        tracing::info!(
            endpoint_id = %endpoint.endpoint_id,
            network_id = %endpoint.network_id,
            interface = %endpoint.interface_name,
            ipv4 = ?endpoint.ipv4,
            ipv6 = ?endpoint.ipv6,
            "Creating endpoint"
        );
        self.endpoints.create_endpoint(endpoint)?;
        Ok(response)
    }

    /// `NetworkDriver.Join`
    ///
    /// Joining the same sandbox again returns the same response without touching the host.
    pub async fn join(&self, request: JoinRequest) -> Result<JoinResponse, PluginError> {
        let _guard = self.locks.lock(&self.hostname, &request.endpoint_id).await;
        let mut endpoint = self.endpoint(&request.network_id, &request.endpoint_id)?;

        match &endpoint.state {
            EndpointState::Joined {
                sandbox_key,
                gateway_ipv6,
            } if *sandbox_key == request.sandbox_key => {
                tracing::debug!(endpoint_id = %endpoint.endpoint_id, "Endpoint already joined");
                return Ok(self.join_response(&endpoint, *gateway_ipv6));
            }
            EndpointState::Joined { sandbox_key, .. } => {
                return Err(PluginError::EndpointAlreadyJoined {
                    endpoint_id: endpoint.endpoint_id,
                    sandbox_key: sandbox_key.clone(),
                });
            }
            EndpointState::Created => {}
        }

        let container_if = self.names.container_side(&endpoint.endpoint_id);
        self.host_network
            .create_veth(&endpoint.interface_name, &container_if, &endpoint.mac)?;

        let gateway_ipv6 = match self.attach(&mut endpoint, request.sandbox_key) {
            Ok(gateway_ipv6) => gateway_ipv6,
            Err(e) => {
                if let Err(remove_err) = self.host_network.remove_veth(&endpoint.interface_name) {
                    tracing::error!(
                        interface = %endpoint.interface_name,
                        "Failed to remove veth after failed join: {remove_err}"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            endpoint_id = %endpoint.endpoint_id,
            interface = %endpoint.interface_name,
            "Joined endpoint"
        );
        Ok(self.join_response(&endpoint, gateway_ipv6))
    }

    /// Looks up the IPv6 gateway and records the endpoint as joined.
    fn attach(
        &self,
        endpoint: &mut Endpoint,
        sandbox_key: String,
    ) -> Result<Option<Ipv6Addr>, PluginError> {
        let gateway_ipv6 = match endpoint.ipv6 {
            Some(_) => self.host_network.ipv6_link_local(&endpoint.interface_name)?,
            None => None,
        };
        endpoint.state = EndpointState::Joined {
            sandbox_key,
            gateway_ipv6,
        };
        self.endpoints.update_endpoint(endpoint.clone())?;
        Ok(gateway_ipv6)
    }

    fn join_response(&self, endpoint: &Endpoint, gateway_ipv6: Option<Ipv6Addr>) -> JoinResponse {
        let mut static_routes = Vec::new();

        let gateway = endpoint.ipv4.map(|_| {
            static_routes.push(StaticRoute {
                destination: format!("{IPV4_GATEWAY}/32"),
                route_type: ROUTE_TYPE_CONNECTED,
                next_hop: None,
            });
            IPV4_GATEWAY.to_string()
        });
        let gateway_ipv6 = gateway_ipv6.map(|gateway| {
            static_routes.push(StaticRoute {
                destination: format!("{gateway}/128"),
                route_type: ROUTE_TYPE_CONNECTED,
                next_hop: None,
            });
            gateway.to_string()
        });

        JoinResponse {
            interface_name: InterfaceName {
                src_name: self.names.container_side(&endpoint.endpoint_id),
                dst_prefix: self.names.prefix().to_string(),
            },
            gateway,
            gateway_ipv6,
            static_routes,
            disable_gateway_service: false,
        }
    }

    /// `NetworkDriver.Leave`
    ///
    /// Leaving an endpoint that is not joined succeeds.
    pub async fn leave(&self, request: EndpointRequest) -> Result<EmptyResponse, PluginError> {
        let _guard = self.locks.lock(&self.hostname, &request.endpoint_id).await;
        let mut endpoint = self.endpoint(&request.network_id, &request.endpoint_id)?;

        if endpoint.state == EndpointState::Created {
            tracing::debug!(endpoint_id = %endpoint.endpoint_id, "Endpoint is not joined");
            return Ok(EmptyResponse {});
        }

        self.host_network.remove_veth(&endpoint.interface_name)?;
        endpoint.state = EndpointState::Created;
        self.endpoints.update_endpoint(endpoint.clone())?;

        tracing::info!(endpoint_id = %endpoint.endpoint_id, "Left endpoint");
        Ok(EmptyResponse {})
    }

    /// `NetworkDriver.DeleteEndpoint`
    ///
    /// Releases the endpoint addresses that are still owned by this host.
    pub async fn delete_endpoint(
        &self,
        request: EndpointRequest,
    ) -> Result<EmptyResponse, PluginError> {
        let _guard = self.locks.lock(&self.hostname, &request.endpoint_id).await;
        let endpoint = self.endpoint(&request.network_id, &request.endpoint_id)?;

        if matches!(endpoint.state, EndpointState::Joined { .. }) {
            self.host_network.remove_veth(&endpoint.interface_name)?;
        }

        for address in endpoint.addresses() {
            if self.ipam.release_owned(&self.hostname, address)? {
                tracing::info!(%address, "Released endpoint address");
            } else {
                tracing::debug!(%address, "Endpoint address is not owned by this host");
            }
        }

        self.endpoints
            .delete_endpoint(&self.hostname, &endpoint.endpoint_id)?;
        tracing::info!(endpoint_id = %endpoint.endpoint_id, "Deleted endpoint");
        Ok(EmptyResponse {})
    }

    /// `NetworkDriver.EndpointOperInfo`
    pub fn endpoint_oper_info(
        &self,
        request: EndpointRequest,
    ) -> Result<EndpointOperInfoResponse, PluginError> {
        let endpoint = self.endpoint(&request.network_id, &request.endpoint_id)?;

        let mut value = BTreeMap::from([
            (
                "InterfaceName".to_string(),
                Value::from(endpoint.interface_name.as_str()),
            ),
            ("MacAddress".to_string(), Value::from(endpoint.mac.as_str())),
            ("State".to_string(), Value::from(endpoint.state.name())),
        ]);
        if let Some(ipv4) = endpoint.ipv4 {
            value.insert("Address".to_string(), Value::from(ipv4.to_string()));
        }
        if let Some(ipv6) = endpoint.ipv6 {
            value.insert("AddressIPv6".to_string(), Value::from(ipv6.to_string()));
        }
        if let EndpointState::Joined { sandbox_key, .. } = &endpoint.state {
            value.insert("SandboxKey".to_string(), Value::from(sandbox_key.as_str()));
        }

        Ok(EndpointOperInfoResponse { value })
    }

    /// `NetworkDriver.DiscoverNew`
    pub fn discover_new(&self, notification: DiscoveryNotification) -> EmptyResponse {
        tracing::debug!(discovery_type = notification.discovery_type, "Ignoring discovery");
        EmptyResponse {}
    }

    /// `NetworkDriver.DiscoverDelete`
    pub fn discover_delete(&self, notification: DiscoveryNotification) -> EmptyResponse {
        tracing::debug!(discovery_type = notification.discovery_type, "Ignoring discovery removal");
        EmptyResponse {}
    }

    /// `NetworkDriver.ProgramExternalConnectivity`
    pub fn program_external_connectivity(
        &self,
        request: ExternalConnectivityRequest,
    ) -> EmptyResponse {
        tracing::debug!(endpoint_id = %request.endpoint_id, "Nothing to program");
        EmptyResponse {}
    }

    /// `NetworkDriver.RevokeExternalConnectivity`
    pub fn revoke_external_connectivity(
        &self,
        request: ExternalConnectivityRequest,
    ) -> EmptyResponse {
        tracing::debug!(endpoint_id = %request.endpoint_id, "Nothing to revoke");
        EmptyResponse {}
    }

    /// Number of endpoints currently locked by in-flight requests.
    pub fn locked_endpoints(&self) -> usize {
        self.locks.len()
    }

    fn endpoint(&self, network_id: &str, endpoint_id: &str) -> Result<Endpoint, PluginError> {
        match self.endpoints.lookup_endpoint(&self.hostname, endpoint_id)? {
            Some(endpoint) if endpoint.network_id == network_id => Ok(endpoint),
            Some(endpoint) => {
                tracing::warn!(
                    endpoint_id,
                    network_id,
                    actual_network_id = %endpoint.network_id,
                    "Endpoint belongs to another network"
                );
                Err(PluginError::EndpointNotFound(endpoint_id.to_string()))
            }
            None => Err(PluginError::EndpointNotFound(endpoint_id.to_string())),
        }
    }
}

fn optional_address(address: &str) -> Result<Option<IpAddr>, PluginError> {
    if address.is_empty() {
        return Ok(None);
    }
    parse_address(address).map(Some)
}

fn not_family(address: &str, family: &str) -> PluginError {
    PluginError::MalformedRequest(format!("{address:?} is not an {family} address"))
}

/// Endpoints match if everything but the attachment state matches.
fn same_identity(a: &Endpoint, b: &Endpoint) -> bool {
    a.network_id == b.network_id && a.mac == b.mac && a.ipv4 == b.ipv4 && a.ipv6 == b.ipv6
}
