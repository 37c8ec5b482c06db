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
//! Endpoint state machine driven over HTTP.

use std::{
    collections::BTreeSet,
    net::Ipv6Addr,
    sync::{Arc, Mutex},
};

use libnetwork_plugin::{
    api::model::{
        CreateEndpointRequest, CreateNetworkRequest, EndpointInterface, JoinRequest, POOL_ID_V4,
        POOL_ID_V6,
    },
    client::PluginClient,
    config::{ListenAddr, PluginConfig},
    host::{HostNetwork, HostNetworkError},
    network::FIXED_MAC,
    runtime::{PluginRuntime, PluginRuntimeBuilder},
};
use test_log::test;

const NETWORK_ID: &str = "b7e4a1f0c2d3e4f5a6b7c8d9e0f1a2b3";
const ENDPOINT_ID: &str = "9c8b7a6f5e4d3c2b1a0f9e8d7c6b5a4f3e2d1c0b";
const HOST_IF: &str = "cali9c8b7a6f5e4";
const LINK_LOCAL: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0xecee, 0xeeff, 0xfeee, 0xeeee);

/// Host network keeping the set of existing host side interfaces.
#[derive(Default)]
struct FakeHostNetwork {
    interfaces: Mutex<BTreeSet<String>>,
}

impl FakeHostNetwork {
    fn interfaces(&self) -> Vec<String> {
        self.interfaces.lock().unwrap().iter().cloned().collect()
    }
}

impl HostNetwork for FakeHostNetwork {
    fn create_veth(
        &self,
        host_if: &str,
        _container_if: &str,
        _mac: &str,
    ) -> Result<(), HostNetworkError> {
        if !self.interfaces.lock().unwrap().insert(host_if.to_string()) {
            return Err(HostNetworkError::Interface {
                interface: host_if.to_string(),
                reason: "exists".to_string(),
            });
        }
        Ok(())
    }

    fn remove_veth(&self, host_if: &str) -> Result<(), HostNetworkError> {
        self.interfaces.lock().unwrap().remove(host_if);
        Ok(())
    }

    fn ipv6_link_local(&self, host_if: &str) -> Result<Option<Ipv6Addr>, HostNetworkError> {
        Ok(self
            .interfaces
            .lock()
            .unwrap()
            .contains(host_if)
            .then_some(LINK_LOCAL))
    }
}

async fn start_plugin(host_network: Arc<FakeHostNetwork>) -> PluginRuntime {
    let config = PluginConfig::new(
        "host1",
        vec![
            "10.65.0.0/24".parse().unwrap(),
            "fd80:24e2:f998:72d6::/120".parse().unwrap(),
        ],
    )
    .with_listen(ListenAddr::Tcp("127.0.0.1:0".parse().unwrap()))
    .with_rng_seed(11);
    let runtime = PluginRuntimeBuilder::new(config)
        .with_host_network(host_network)
        .start()
        .await
        .expect("starting plugin");
    runtime.wait_for_ready().await.expect("plugin ready");
    runtime
}

fn create_network_request() -> CreateNetworkRequest {
    CreateNetworkRequest {
        network_id: NETWORK_ID.to_string(),
        options: None,
        ipv4_data: None,
        ipv6_data: None,
    }
}

fn create_endpoint_request(ipv4: &str, ipv6: &str) -> CreateEndpointRequest {
    CreateEndpointRequest {
        network_id: NETWORK_ID.to_string(),
        endpoint_id: ENDPOINT_ID.to_string(),
        interface: Some(EndpointInterface {
            address: ipv4.to_string(),
            address_ipv6: ipv6.to_string(),
            mac_address: String::new(),
        }),
        options: None,
    }
}

fn join_request(sandbox_key: &str) -> JoinRequest {
    JoinRequest {
        network_id: NETWORK_ID.to_string(),
        endpoint_id: ENDPOINT_ID.to_string(),
        sandbox_key: sandbox_key.to_string(),
        options: None,
    }
}

async fn state(client: &PluginClient) -> String {
    let info = client
        .endpoint_oper_info(NETWORK_ID, ENDPOINT_ID)
        .await
        .unwrap();
    info.value["State"].as_str().unwrap().to_string()
}

#[test(tokio::test)]
#[ntest::timeout(10_000)]
async fn endpoint_walks_through_its_states() {
    let host_network = Arc::new(FakeHostNetwork::default());
    let mut plugin = start_plugin(host_network.clone()).await;
    let client = plugin.client().unwrap();

    let ipv4 = client.request_address(POOL_ID_V4, "").await.unwrap().address;
    let ipv6 = client.request_address(POOL_ID_V6, "").await.unwrap().address;

    // Endpoints need a network.
    let err = client
        .create_endpoint(&create_endpoint_request(&ipv4, &ipv6))
        .await
        .unwrap_err();
    assert_eq!(
        err.plugin_message(),
        Some(format!("network {NETWORK_ID} not found").as_str())
    );

    client
        .create_network(&create_network_request())
        .await
        .unwrap();
    let created = client
        .create_endpoint(&create_endpoint_request(&ipv4, &ipv6))
        .await
        .unwrap();
    assert_eq!(created.interface.unwrap().mac_address, FIXED_MAC);
    client
        .create_endpoint(&create_endpoint_request(&ipv4, &ipv6))
        .await
        .unwrap();
    assert_eq!(state(client).await, "created");
    assert!(host_network.interfaces().is_empty());

    // Join creates the veth, joining the same sandbox again is a no-op.
    let joined = client.join(&join_request("/var/run/netns/a")).await.unwrap();
    assert_eq!(host_network.interfaces(), [HOST_IF]);
    assert_eq!(joined.interface_name.dst_prefix, "cali");
    assert_eq!(joined.gateway.as_deref(), Some("169.254.1.1"));
    assert_eq!(joined.gateway_ipv6, Some(LINK_LOCAL.to_string()));
    assert_eq!(joined.static_routes.len(), 2);
    let rejoined = client.join(&join_request("/var/run/netns/a")).await.unwrap();
    assert_eq!(rejoined, joined);
    assert_eq!(state(client).await, "joined");

    let err = client
        .join(&join_request("/var/run/netns/b"))
        .await
        .unwrap_err();
    assert!(err.plugin_message().unwrap().contains("already joined"), "{err}");

    // The network cannot go away while the endpoint exists.
    let err = client.delete_network(NETWORK_ID).await.unwrap_err();
    assert!(err.plugin_message().is_some());

    client.leave(NETWORK_ID, ENDPOINT_ID).await.unwrap();
    client.leave(NETWORK_ID, ENDPOINT_ID).await.unwrap();
    assert!(host_network.interfaces().is_empty());
    assert_eq!(state(client).await, "created");

    client.delete_endpoint(NETWORK_ID, ENDPOINT_ID).await.unwrap();
    let err = client
        .delete_endpoint(NETWORK_ID, ENDPOINT_ID)
        .await
        .unwrap_err();
    assert_eq!(
        err.plugin_message(),
        Some(format!("endpoint {ENDPOINT_ID} not found").as_str())
    );

    client.delete_network(NETWORK_ID).await.unwrap();
    client.delete_network(NETWORK_ID).await.unwrap();

    plugin.stop_and_join().await.unwrap();
}

#[test(tokio::test)]
#[ntest::timeout(10_000)]
async fn deleting_a_joined_endpoint_cleans_up() {
    let host_network = Arc::new(FakeHostNetwork::default());
    let mut plugin = start_plugin(host_network.clone()).await;
    let client = plugin.client().unwrap();

    let ipv4 = client
        .request_address(POOL_ID_V4, "10.65.0.20")
        .await
        .unwrap()
        .address;
    client
        .create_network(&create_network_request())
        .await
        .unwrap();
    client
        .create_endpoint(&create_endpoint_request(&ipv4, ""))
        .await
        .unwrap();
    let joined = client.join(&join_request("/var/run/netns/c")).await.unwrap();
    assert!(joined.gateway_ipv6.is_none());

    client.delete_endpoint(NETWORK_ID, ENDPOINT_ID).await.unwrap();
    assert!(host_network.interfaces().is_empty());
    assert_eq!(
        plugin
            .datastore()
            .address_owner(&"10.65.0.20".parse().unwrap())
            .unwrap(),
        None
    );

    plugin.stop_and_join().await.unwrap();
}

#[test(tokio::test)]
#[ntest::timeout(10_000)]
async fn endpoints_without_addresses_are_rejected() {
    let host_network = Arc::new(FakeHostNetwork::default());
    let mut plugin = start_plugin(host_network).await;
    let client = plugin.client().unwrap();

    client
        .create_network(&create_network_request())
        .await
        .unwrap();
    let err = client
        .create_endpoint(&create_endpoint_request("", ""))
        .await
        .unwrap_err();
    assert_eq!(
        err.plugin_message(),
        Some("malformed request: No address assigned for endpoint")
    );

    plugin.stop_and_join().await.unwrap();
}
