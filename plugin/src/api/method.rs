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
//! Plugin methods served by the API.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// A method of the plugin protocol, addressed as `POST /<Interface>.<Method>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginMethod {
    /// `Plugin.Activate`
    Activate,
    /// `IpamDriver.GetCapabilities`
    IpamGetCapabilities,
    /// `IpamDriver.GetDefaultAddressSpaces`
    GetDefaultAddressSpaces,
    /// `IpamDriver.RequestPool`
    RequestPool,
    /// `IpamDriver.ReleasePool`
    ReleasePool,
    /// `IpamDriver.RequestAddress`
    RequestAddress,
    /// `IpamDriver.ReleaseAddress`
    ReleaseAddress,
    /// `NetworkDriver.GetCapabilities`
    NetworkGetCapabilities,
    /// `NetworkDriver.CreateNetwork`
    CreateNetwork,
    /// `NetworkDriver.DeleteNetwork`
    DeleteNetwork,
    /// `NetworkDriver.CreateEndpoint`
    CreateEndpoint,
    /// `NetworkDriver.EndpointOperInfo`
    EndpointOperInfo,
    /// `NetworkDriver.DeleteEndpoint`
    DeleteEndpoint,
    /// `NetworkDriver.Join`
    Join,
    /// `NetworkDriver.Leave`
    Leave,
    /// `NetworkDriver.DiscoverNew`
    DiscoverNew,
    /// `NetworkDriver.DiscoverDelete`
    DiscoverDelete,
    /// `NetworkDriver.ProgramExternalConnectivity`
    ProgramExternalConnectivity,
    /// `NetworkDriver.RevokeExternalConnectivity`
    RevokeExternalConnectivity,
}

impl PluginMethod {
    /// All served methods.
    pub const ALL: [PluginMethod; 19] = [
        PluginMethod::Activate,
        PluginMethod::IpamGetCapabilities,
        PluginMethod::GetDefaultAddressSpaces,
        PluginMethod::RequestPool,
        PluginMethod::ReleasePool,
        PluginMethod::RequestAddress,
        PluginMethod::ReleaseAddress,
        PluginMethod::NetworkGetCapabilities,
        PluginMethod::CreateNetwork,
        PluginMethod::DeleteNetwork,
        PluginMethod::CreateEndpoint,
        PluginMethod::EndpointOperInfo,
        PluginMethod::DeleteEndpoint,
        PluginMethod::Join,
        PluginMethod::Leave,
        PluginMethod::DiscoverNew,
        PluginMethod::DiscoverDelete,
        PluginMethod::ProgramExternalConnectivity,
        PluginMethod::RevokeExternalConnectivity,
    ];

    /// Request path of the method.
    pub fn path(&self) -> &'static str {
        match self {
            PluginMethod::Activate => "/Plugin.Activate",
            PluginMethod::IpamGetCapabilities => "/IpamDriver.GetCapabilities",
            PluginMethod::GetDefaultAddressSpaces => "/IpamDriver.GetDefaultAddressSpaces",
            PluginMethod::RequestPool => "/IpamDriver.RequestPool",
            PluginMethod::ReleasePool => "/IpamDriver.ReleasePool",
            PluginMethod::RequestAddress => "/IpamDriver.RequestAddress",
            PluginMethod::ReleaseAddress => "/IpamDriver.ReleaseAddress",
            PluginMethod::NetworkGetCapabilities => "/NetworkDriver.GetCapabilities",
            PluginMethod::CreateNetwork => "/NetworkDriver.CreateNetwork",
            PluginMethod::DeleteNetwork => "/NetworkDriver.DeleteNetwork",
            PluginMethod::CreateEndpoint => "/NetworkDriver.CreateEndpoint",
            PluginMethod::EndpointOperInfo => "/NetworkDriver.EndpointOperInfo",
            PluginMethod::DeleteEndpoint => "/NetworkDriver.DeleteEndpoint",
            PluginMethod::Join => "/NetworkDriver.Join",
            PluginMethod::Leave => "/NetworkDriver.Leave",
            PluginMethod::DiscoverNew => "/NetworkDriver.DiscoverNew",
            PluginMethod::DiscoverDelete => "/NetworkDriver.DiscoverDelete",
            PluginMethod::ProgramExternalConnectivity => {
                "/NetworkDriver.ProgramExternalConnectivity"
            }
            PluginMethod::RevokeExternalConnectivity => "/NetworkDriver.RevokeExternalConnectivity",
        }
    }

    /// Method name as used on the wire, e.g. `IpamDriver.RequestPool`.
    pub fn name(&self) -> &'static str {
        // Paths are static and always start with a slash.
        &self.path()[1..]
    }
}

impl fmt::Display for PluginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The method name is not part of the plugin protocol.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown plugin method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for PluginMethod {
    type Err = UnknownMethod;

    /// Parses a method name, with or without the leading slash of the path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix('/').unwrap_or(s);
        PluginMethod::ALL
            .into_iter()
            .find(|method| method.name() == name)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}
