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
//! Request and response bodies of the plugin protocol.
//!
//! Field names are fixed by the container engine. Fields the engine may leave out are
//! defaulted, all others are required and a request without them is rejected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Media type of all plugin responses.
pub const PLUGIN_MEDIA_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Local default address space.
pub const LOCAL_ADDRESS_SPACE: &str = "CalicoLocalAddressSpace";
/// Global default address space.
pub const GLOBAL_ADDRESS_SPACE: &str = "CalicoGlobalAddressSpace";

/// Pool id covering all IPv4 pools.
pub const POOL_ID_V4: &str = "CalicoPoolIPv4";
/// Pool id covering all IPv6 pools.
pub const POOL_ID_V6: &str = "CalicoPoolIPv6";
/// CIDR advertised for [POOL_ID_V4].
pub const POOL_CIDR_V4: &str = "0.0.0.0/0";
/// CIDR advertised for [POOL_ID_V6].
pub const POOL_CIDR_V6: &str = "::/0";

/// Pool data key of the gateway.
pub const GATEWAY_DATA_KEY: &str = "com.docker.network.gateway";

/// Driver-specific options, passed through untouched.
pub type Options = BTreeMap<String, Value>;

/// Error body, returned with status 200.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable error message.
    #[serde(rename = "Err")]
    pub err: String,
}

/// Body of methods that return nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResponse {}

// Plugin

/// `Plugin.Activate` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Implemented plugin interfaces.
    pub implements: Vec<String>,
}

impl Default for ActivateResponse {
    fn default() -> Self {
        Self {
            implements: vec!["NetworkDriver".to_string(), "IpamDriver".to_string()],
        }
    }
}

// IPAM driver

/// `IpamDriver.GetCapabilities` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpamCapabilitiesResponse {
    /// Whether the engine has to pass the MAC address with address requests.
    #[serde(rename = "RequiresMACAddress")]
    pub requires_mac_address: bool,
}

/// `IpamDriver.GetDefaultAddressSpaces` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddressSpacesResponse {
    /// Local address space name.
    pub local_default_address_space: String,
    /// Global address space name.
    pub global_default_address_space: String,
}

impl Default for AddressSpacesResponse {
    fn default() -> Self {
        Self {
            local_default_address_space: LOCAL_ADDRESS_SPACE.to_string(),
            global_default_address_space: GLOBAL_ADDRESS_SPACE.to_string(),
        }
    }
}

/// `IpamDriver.RequestPool` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPoolRequest {
    /// Address space the pool is requested in.
    #[serde(default)]
    pub address_space: String,
    /// Requested pool CIDR, empty for any.
    #[serde(default)]
    pub pool: String,
    /// Requested sub pool CIDR, empty for none.
    #[serde(default)]
    pub sub_pool: String,
    /// Driver options.
    #[serde(default)]
    pub options: Option<BTreeMap<String, String>>,
    /// Whether an IPv6 pool is requested.
    #[serde(rename = "V6", default)]
    pub v6: bool,
}

/// `IpamDriver.RequestPool` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestPoolResponse {
    /// Id to reference the pool in later requests.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
    /// Pool CIDR.
    pub pool: String,
    /// Pool data, holds the gateway.
    pub data: BTreeMap<String, String>,
}

/// `IpamDriver.ReleasePool` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePoolRequest {
    /// Pool id returned by `RequestPool`.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
}

/// `IpamDriver.RequestAddress` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestAddressRequest {
    /// Pool id returned by `RequestPool`.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
    /// Requested address, empty for any.
    #[serde(default)]
    pub address: String,
    /// Driver options.
    #[serde(default)]
    pub options: Option<BTreeMap<String, String>>,
}

/// `IpamDriver.RequestAddress` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestAddressResponse {
    /// Assigned address with host prefix length, e.g. `10.0.0.1/32`.
    pub address: String,
    /// Address data.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// `IpamDriver.ReleaseAddress` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReleaseAddressRequest {
    /// Pool id the address was requested from.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
    /// Released address, optionally with prefix length.
    pub address: String,
}

// Network driver

/// `NetworkDriver.GetCapabilities` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkCapabilitiesResponse {
    /// Network scope, `local` or `global`.
    pub scope: String,
}

impl Default for NetworkCapabilitiesResponse {
    fn default() -> Self {
        Self {
            scope: "global".to_string(),
        }
    }
}

/// IPAM data of one address family of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamData {
    /// Address space of the pool.
    #[serde(default)]
    pub address_space: String,
    /// Pool CIDR.
    #[serde(default)]
    pub pool: String,
    /// Gateway CIDR.
    #[serde(default)]
    pub gateway: String,
    /// Auxiliary addresses.
    #[serde(default)]
    pub aux_addresses: Option<BTreeMap<String, String>>,
}

/// `NetworkDriver.CreateNetwork` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateNetworkRequest {
    /// Engine network id.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Driver options.
    #[serde(default)]
    pub options: Option<Options>,
    /// IPv4 IPAM data.
    #[serde(rename = "IPv4Data", default)]
    pub ipv4_data: Option<Vec<IpamData>>,
    /// IPv6 IPAM data.
    #[serde(rename = "IPv6Data", default)]
    pub ipv6_data: Option<Vec<IpamData>>,
}

/// `NetworkDriver.DeleteNetwork` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteNetworkRequest {
    /// Engine network id.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

/// Interface of an endpoint as passed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointInterface {
    /// IPv4 address with prefix length, empty for none.
    #[serde(default)]
    pub address: String,
    /// IPv6 address with prefix length, empty for none.
    #[serde(rename = "AddressIPv6", default)]
    pub address_ipv6: String,
    /// MAC address, empty if the driver should pick one.
    #[serde(default)]
    pub mac_address: String,
}

/// `NetworkDriver.CreateEndpoint` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointRequest {
    /// Engine network id.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Engine endpoint id.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Interface addresses.
    #[serde(default)]
    pub interface: Option<EndpointInterface>,
    /// Driver options.
    #[serde(default)]
    pub options: Option<Options>,
}

/// Interface fields the driver fills in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreatedInterface {
    /// MAC address chosen by the driver.
    pub mac_address: String,
}

/// `NetworkDriver.CreateEndpoint` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateEndpointResponse {
    /// Present only if the driver picked the MAC address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<CreatedInterface>,
}

/// `NetworkDriver.Join` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest {
    /// Engine network id.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Engine endpoint id.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Path of the network namespace the endpoint is joined to.
    pub sandbox_key: String,
    /// Driver options.
    #[serde(default)]
    pub options: Option<Options>,
}

/// Names of the interface moved into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InterfaceName {
    /// Name of the interface on the host, moved into the sandbox by the engine.
    pub src_name: String,
    /// Prefix the engine uses to rename the interface inside the sandbox.
    pub dst_prefix: String,
}

/// Route installed in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StaticRoute {
    /// Route destination CIDR.
    pub destination: String,
    /// 0 for a next hop route, 1 for a directly connected route.
    pub route_type: u8,
    /// Next hop, unset for connected routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_hop: Option<String>,
}

/// Route type of a directly connected route.
pub const ROUTE_TYPE_CONNECTED: u8 = 1;

/// `NetworkDriver.Join` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    /// Interface handed over to the sandbox.
    pub interface_name: InterfaceName,
    /// IPv4 gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// IPv6 gateway.
    #[serde(rename = "GatewayIPv6", default, skip_serializing_if = "Option::is_none")]
    pub gateway_ipv6: Option<String>,
    /// Routes to install in the sandbox.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_routes: Vec<StaticRoute>,
    /// Whether the engine should skip its own gateway service.
    pub disable_gateway_service: bool,
}

/// Request naming one endpoint: `Leave`, `DeleteEndpoint` and `EndpointOperInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRequest {
    /// Engine network id.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Engine endpoint id.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

/// `NetworkDriver.EndpointOperInfo` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndpointOperInfoResponse {
    /// Operational data of the endpoint.
    pub value: BTreeMap<String, Value>,
}

/// `NetworkDriver.DiscoverNew` and `NetworkDriver.DiscoverDelete` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryNotification {
    /// Kind of discovered object.
    #[serde(default)]
    pub discovery_type: i64,
    /// Discovered object.
    #[serde(default)]
    pub discovery_data: Value,
}

/// `NetworkDriver.ProgramExternalConnectivity` and `RevokeExternalConnectivity` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExternalConnectivityRequest {
    /// Engine network id.
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    /// Engine endpoint id.
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    /// Driver options.
    #[serde(default)]
    pub options: Option<Options>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fixed_responses_match_wire_format() {
        assert_eq!(
            serde_json::to_value(ActivateResponse::default()).unwrap(),
            json!({"Implements": ["NetworkDriver", "IpamDriver"]})
        );
        assert_eq!(
            serde_json::to_value(AddressSpacesResponse::default()).unwrap(),
            json!({
                "LocalDefaultAddressSpace": "CalicoLocalAddressSpace",
                "GlobalDefaultAddressSpace": "CalicoGlobalAddressSpace"
            })
        );
        assert_eq!(
            serde_json::to_value(IpamCapabilitiesResponse::default()).unwrap(),
            json!({"RequiresMACAddress": false})
        );
        assert_eq!(
            serde_json::to_value(NetworkCapabilitiesResponse::default()).unwrap(),
            json!({"Scope": "global"})
        );
        assert_eq!(serde_json::to_string(&EmptyResponse {}).unwrap(), "{}");
    }

    #[test]
    fn request_pool_fields_are_optional() {
        let request: RequestPoolRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, RequestPoolRequest::default());

        let request: RequestPoolRequest = serde_json::from_value(json!({
            "AddressSpace": "CalicoGlobalAddressSpace",
            "Pool": "",
            "SubPool": "",
            "Options": null,
            "V6": true
        }))
        .unwrap();
        assert!(request.v6);
    }

    #[test]
    fn required_fields_are_enforced() {
        let err = serde_json::from_value::<RequestAddressRequest>(json!({"Address": ""}))
            .unwrap_err();
        assert!(err.to_string().contains("PoolID"), "got {err}");

        let err = serde_json::from_value::<JoinRequest>(json!({
            "NetworkID": "n",
            "EndpointID": "e"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("SandboxKey"), "got {err}");
    }

    #[test]
    fn create_endpoint_request_uses_engine_field_names() {
        let request: CreateEndpointRequest = serde_json::from_value(json!({
            "NetworkID": "net",
            "EndpointID": "ep",
            "Interface": {
                "Address": "192.168.1.101/16",
                "AddressIPv6": "",
                "MacAddress": ""
            },
            "Options": {"com.docker.network.endpoint.exposedports": []}
        }))
        .unwrap();

        let interface = request.interface.unwrap();
        assert_eq!(interface.address, "192.168.1.101/16");
        assert!(interface.address_ipv6.is_empty());
    }

    #[test]
    fn join_response_omits_unset_fields() {
        let response = JoinResponse {
            interface_name: InterfaceName {
                src_name: "tmp1234567890a".to_string(),
                dst_prefix: "cali".to_string(),
            },
            gateway: None,
            gateway_ipv6: None,
            static_routes: vec![],
            disable_gateway_service: false,
        };
        assert_eq!(
            serde_json::to_value(response).unwrap(),
            json!({
                "InterfaceName": {"SrcName": "tmp1234567890a", "DstPrefix": "cali"},
                "DisableGatewayService": false
            })
        );
    }
}
