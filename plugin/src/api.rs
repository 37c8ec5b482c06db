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
//! Plugin protocol dispatcher.
//!
//! Every [PluginMethod] is routed to its handler. Handler failures are answered with
//! status 200 and an `Err` body, only unknown paths get a 404.

use std::sync::Arc;

use axum::{
    Router,
    extract::{FromRef, State},
    http::{StatusCode, Uri},
    routing::{MethodRouter, post},
};
use libnetwork_observability::info_trace_layer;
use tower::ServiceBuilder;

use crate::{
    api::{
        error::PluginError,
        extractor::PluginJson,
        method::PluginMethod,
        model::{
            ActivateResponse, AddressSpacesResponse, CreateEndpointRequest,
            CreateEndpointResponse, CreateNetworkRequest, DeleteNetworkRequest,
            DiscoveryNotification, EmptyResponse, EndpointOperInfoResponse, EndpointRequest,
            ExternalConnectivityRequest, IpamCapabilitiesResponse, JoinRequest, JoinResponse,
            NetworkCapabilitiesResponse, ReleaseAddressRequest, ReleasePoolRequest,
            RequestAddressRequest, RequestAddressResponse, RequestPoolRequest,
            RequestPoolResponse,
        },
    },
    ipam::IpamHandler,
    network::NetworkDriver,
};

pub mod error;
pub mod extractor;
pub mod method;
pub mod model;

type PluginResult<T> = Result<PluginJson<T>, PluginError>;

/// Handlers shared by all requests.
#[derive(Clone)]
pub struct PluginState {
    ipam: Arc<IpamHandler>,
    network: Arc<NetworkDriver>,
}

impl PluginState {
    /// Creates the state from both handlers.
    pub fn new(ipam: Arc<IpamHandler>, network: Arc<NetworkDriver>) -> Self {
        Self { ipam, network }
    }
}

impl FromRef<PluginState> for Arc<IpamHandler> {
    fn from_ref(state: &PluginState) -> Self {
        state.ipam.clone()
    }
}

impl FromRef<PluginState> for Arc<NetworkDriver> {
    fn from_ref(state: &PluginState) -> Self {
        state.network.clone()
    }
}

/// Builds the plugin API router.
pub fn build_plugin_api(state: PluginState) -> Router {
    let logging_layer = ServiceBuilder::new().layer(info_trace_layer());

    PluginMethod::ALL
        .into_iter()
        .fold(Router::new(), |router, method| {
            router.route(method.path(), method_router(method))
        })
        .fallback(unknown_method)
        .with_state(state)
        .layer(logging_layer)
}

fn method_router(method: PluginMethod) -> MethodRouter<PluginState> {
    match method {
        PluginMethod::Activate => post(activate),
        PluginMethod::IpamGetCapabilities => post(ipam_capabilities),
        PluginMethod::GetDefaultAddressSpaces => post(default_address_spaces),
        PluginMethod::RequestPool => post(request_pool),
        PluginMethod::ReleasePool => post(release_pool),
        PluginMethod::RequestAddress => post(request_address),
        PluginMethod::ReleaseAddress => post(release_address),
        PluginMethod::NetworkGetCapabilities => post(network_capabilities),
        PluginMethod::CreateNetwork => post(create_network),
        PluginMethod::DeleteNetwork => post(delete_network),
        PluginMethod::CreateEndpoint => post(create_endpoint),
        PluginMethod::EndpointOperInfo => post(endpoint_oper_info),
        PluginMethod::DeleteEndpoint => post(delete_endpoint),
        PluginMethod::Join => post(join),
        PluginMethod::Leave => post(leave),
        PluginMethod::DiscoverNew => post(discover_new),
        PluginMethod::DiscoverDelete => post(discover_delete),
        PluginMethod::ProgramExternalConnectivity => post(program_external_connectivity),
        PluginMethod::RevokeExternalConnectivity => post(revoke_external_connectivity),
    }
}

async fn unknown_method(uri: Uri) -> StatusCode {
    tracing::warn!(%uri, "Request for unknown plugin method");
    StatusCode::NOT_FOUND
}

async fn activate() -> PluginJson<ActivateResponse> {
    PluginJson(ActivateResponse::default())
}

// IPAM driver

async fn ipam_capabilities(
    State(ipam): State<Arc<IpamHandler>>,
) -> PluginJson<IpamCapabilitiesResponse> {
    PluginJson(ipam.capabilities())
}

async fn default_address_spaces(
    State(ipam): State<Arc<IpamHandler>>,
) -> PluginJson<AddressSpacesResponse> {
    PluginJson(ipam.default_address_spaces())
}

async fn request_pool(
    State(ipam): State<Arc<IpamHandler>>,
    PluginJson(request): PluginJson<RequestPoolRequest>,
) -> PluginResult<RequestPoolResponse> {
    ipam.request_pool(request).map(PluginJson)
}

async fn release_pool(
    State(ipam): State<Arc<IpamHandler>>,
    PluginJson(request): PluginJson<ReleasePoolRequest>,
) -> PluginJson<EmptyResponse> {
    PluginJson(ipam.release_pool(request))
}

async fn request_address(
    State(ipam): State<Arc<IpamHandler>>,
    PluginJson(request): PluginJson<RequestAddressRequest>,
) -> PluginResult<RequestAddressResponse> {
    ipam.request_address(request).map(PluginJson)
}

async fn release_address(
    State(ipam): State<Arc<IpamHandler>>,
    PluginJson(request): PluginJson<ReleaseAddressRequest>,
) -> PluginResult<EmptyResponse> {
    ipam.release_address(request).map(PluginJson)
}

// Network driver

async fn network_capabilities(
    State(network): State<Arc<NetworkDriver>>,
) -> PluginJson<NetworkCapabilitiesResponse> {
    PluginJson(network.capabilities())
}

async fn create_network(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<CreateNetworkRequest>,
) -> PluginResult<EmptyResponse> {
    network.create_network(request).map(PluginJson)
}

async fn delete_network(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<DeleteNetworkRequest>,
) -> PluginResult<EmptyResponse> {
    network.delete_network(request).map(PluginJson)
}

async fn create_endpoint(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<CreateEndpointRequest>,
) -> PluginResult<CreateEndpointResponse> {
    network.create_endpoint(request).await.map(PluginJson)
}

async fn endpoint_oper_info(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<EndpointRequest>,
) -> PluginResult<EndpointOperInfoResponse> {
    network.endpoint_oper_info(request).map(PluginJson)
}

async fn delete_endpoint(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<EndpointRequest>,
) -> PluginResult<EmptyResponse> {
    network.delete_endpoint(request).await.map(PluginJson)
}

async fn join(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<JoinRequest>,
) -> PluginResult<JoinResponse> {
    network.join(request).await.map(PluginJson)
}

async fn leave(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<EndpointRequest>,
) -> PluginResult<EmptyResponse> {
    network.leave(request).await.map(PluginJson)
}

async fn discover_new(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(notification): PluginJson<DiscoveryNotification>,
) -> PluginJson<EmptyResponse> {
    PluginJson(network.discover_new(notification))
}

async fn discover_delete(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(notification): PluginJson<DiscoveryNotification>,
) -> PluginJson<EmptyResponse> {
    PluginJson(network.discover_delete(notification))
}

async fn program_external_connectivity(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<ExternalConnectivityRequest>,
) -> PluginJson<EmptyResponse> {
    PluginJson(network.program_external_connectivity(request))
}

async fn revoke_external_connectivity(
    State(network): State<Arc<NetworkDriver>>,
    PluginJson(request): PluginJson<ExternalConnectivityRequest>,
) -> PluginJson<EmptyResponse> {
    PluginJson(network.revoke_external_connectivity(request))
}
