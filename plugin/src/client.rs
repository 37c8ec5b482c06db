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
//! Client of the plugin API, speaking the protocol the container engine speaks.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{ClientBuilder, StatusCode, header::CONTENT_TYPE};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::api::{
    method::PluginMethod,
    model::{
        ActivateResponse, AddressSpacesResponse, CreateEndpointRequest, CreateEndpointResponse,
        CreateNetworkRequest, DeleteNetworkRequest, EmptyResponse, EndpointOperInfoResponse,
        EndpointRequest, JoinRequest, JoinResponse, PLUGIN_MEDIA_TYPE, ReleaseAddressRequest,
        ReleasePoolRequest, RequestAddressRequest, RequestAddressResponse, RequestPoolRequest,
        RequestPoolResponse,
    },
};

/// Client for a plugin listening on a TCP address.
#[derive(Debug, Clone)]
pub struct PluginClient {
    client: reqwest::Client,
    api: Url,
}

impl PluginClient {
    /// Creates a new [`PluginClient`] with the given base URL of the plugin.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use libnetwork_plugin::client::PluginClient;
    /// let url: url::Url = "http://localhost:9000".parse().unwrap();
    /// let client = PluginClient::new(&url).expect("Failed to create PluginClient");
    /// ```
    pub fn new(url: &Url) -> Result<Self, PluginClientError> {
        let api = url.join("/")?;

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(PluginClient { client, api })
    }

    /// Calls `method` with `request` and decodes the successful response.
    ///
    /// An `Err` body is returned as [PluginClientError::Plugin].
    pub async fn call<Req, Res>(
        &self,
        method: PluginMethod,
        request: &Req,
    ) -> Result<Res, PluginClientError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)?;
        let (status, body) = self.call_raw(method.name(), body).await?;
        if status != StatusCode::OK {
            return Err(PluginClientError::InvalidResponseStatus(status, body));
        }

        let value: Value = serde_json::from_slice(&body)?;
        if let Some(err) = value.get("Err") {
            let message = match err {
                Value::String(message) => message.clone(),
                other => other.to_string(),
            };
            return Err(PluginClientError::Plugin(message));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Posts `body` to `/<path>` and returns status and body as received.
    pub async fn call_raw(
        &self,
        path: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<(StatusCode, Bytes), PluginClientError> {
        let url = self.api.join(path.trim_start_matches('/'))?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, PLUGIN_MEDIA_TYPE)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.bytes().await?))
    }

    /// `Plugin.Activate`
    pub async fn activate(&self) -> Result<ActivateResponse, PluginClientError> {
        self.call(PluginMethod::Activate, &EmptyResponse {}).await
    }

    /// `IpamDriver.GetDefaultAddressSpaces`
    pub async fn default_address_spaces(
        &self,
    ) -> Result<AddressSpacesResponse, PluginClientError> {
        self.call(PluginMethod::GetDefaultAddressSpaces, &EmptyResponse {})
            .await
    }

    /// `IpamDriver.RequestPool`
    pub async fn request_pool(
        &self,
        request: &RequestPoolRequest,
    ) -> Result<RequestPoolResponse, PluginClientError> {
        self.call(PluginMethod::RequestPool, request).await
    }

    /// `IpamDriver.ReleasePool`
    pub async fn release_pool(&self, pool_id: &str) -> Result<EmptyResponse, PluginClientError> {
        let request = ReleasePoolRequest {
            pool_id: pool_id.to_string(),
        };
        self.call(PluginMethod::ReleasePool, &request).await
    }

    /// `IpamDriver.RequestAddress`. An empty `address` requests any address of the pool.
    pub async fn request_address(
        &self,
        pool_id: &str,
        address: &str,
    ) -> Result<RequestAddressResponse, PluginClientError> {
        let request = RequestAddressRequest {
            pool_id: pool_id.to_string(),
            address: address.to_string(),
            options: None,
        };
        self.call(PluginMethod::RequestAddress, &request).await
    }

    /// `IpamDriver.ReleaseAddress`
    pub async fn release_address(
        &self,
        pool_id: &str,
        address: &str,
    ) -> Result<EmptyResponse, PluginClientError> {
        let request = ReleaseAddressRequest {
            pool_id: pool_id.to_string(),
            address: address.to_string(),
        };
        self.call(PluginMethod::ReleaseAddress, &request).await
    }

    /// `NetworkDriver.CreateNetwork`
    pub async fn create_network(
        &self,
        request: &CreateNetworkRequest,
    ) -> Result<EmptyResponse, PluginClientError> {
        self.call(PluginMethod::CreateNetwork, request).await
    }

    /// `NetworkDriver.DeleteNetwork`
    pub async fn delete_network(
        &self,
        network_id: &str,
    ) -> Result<EmptyResponse, PluginClientError> {
        let request = DeleteNetworkRequest {
            network_id: network_id.to_string(),
        };
        self.call(PluginMethod::DeleteNetwork, &request).await
    }

    /// `NetworkDriver.CreateEndpoint`
    pub async fn create_endpoint(
        &self,
        request: &CreateEndpointRequest,
    ) -> Result<CreateEndpointResponse, PluginClientError> {
        self.call(PluginMethod::CreateEndpoint, request).await
    }

    /// `NetworkDriver.Join`
    pub async fn join(&self, request: &JoinRequest) -> Result<JoinResponse, PluginClientError> {
        self.call(PluginMethod::Join, request).await
    }

    /// `NetworkDriver.Leave`
    pub async fn leave(
        &self,
        network_id: &str,
        endpoint_id: &str,
    ) -> Result<EmptyResponse, PluginClientError> {
        self.call(PluginMethod::Leave, &endpoint_request(network_id, endpoint_id))
            .await
    }

    /// `NetworkDriver.DeleteEndpoint`
    pub async fn delete_endpoint(
        &self,
        network_id: &str,
        endpoint_id: &str,
    ) -> Result<EmptyResponse, PluginClientError> {
        self.call(
            PluginMethod::DeleteEndpoint,
            &endpoint_request(network_id, endpoint_id),
        )
        .await
    }

    /// `NetworkDriver.EndpointOperInfo`
    pub async fn endpoint_oper_info(
        &self,
        network_id: &str,
        endpoint_id: &str,
    ) -> Result<EndpointOperInfoResponse, PluginClientError> {
        self.call(
            PluginMethod::EndpointOperInfo,
            &endpoint_request(network_id, endpoint_id),
        )
        .await
    }
}

fn endpoint_request(network_id: &str, endpoint_id: &str) -> EndpointRequest {
    EndpointRequest {
        network_id: network_id.to_string(),
        endpoint_id: endpoint_id.to_string(),
    }
}

/// Errors that can occur when using the [PluginClient].
#[derive(Error, Debug)]
pub enum PluginClientError {
    /// An error occurred while parsing the URL.
    #[error("invalid URL: {0:?}")]
    InvalidURL(#[from] url::ParseError),
    /// An error occurred while making a request with `reqwest`.
    #[error("reqwest error: {0:?}")]
    ReqwestError(#[from] reqwest::Error),
    /// Invalid response status.
    #[error("invalid response status ({0}): {1:?}")]
    InvalidResponseStatus(StatusCode, Bytes),
    /// The plugin answered with an `Err` body.
    #[error("plugin error: {0}")]
    Plugin(String),
    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PluginClientError {
    /// Returns the plugin's error message if the plugin answered with an `Err` body.
    pub fn plugin_message(&self) -> Option<&str> {
        match self {
            PluginClientError::Plugin(message) => Some(message),
            _ => None,
        }
    }
}
