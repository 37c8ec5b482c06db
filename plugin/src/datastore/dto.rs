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
//! Data transfer objects (DTOs) for the datastore.

use libnetwork_address_manager::manager::dto::AddressManagerDto;
use serde::{Deserialize, Serialize};

use crate::datastore::{Endpoint, Network};

/// Snapshot of the datastore, as written to the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreDto {
    /// Pools and assigned addresses.
    pub addresses: AddressManagerDto,
    /// Endpoint records of all hosts.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Network records.
    #[serde(default)]
    pub networks: Vec<Network>,
}
