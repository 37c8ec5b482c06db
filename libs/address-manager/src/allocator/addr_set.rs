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

use core::fmt;
use std::{
    fmt::Display,
    net::{IpAddr, Ipv6Addr},
};

use ipnet::IpNet;
use thiserror::Error;

use crate::{IpVersion, allocator::free_ranges::FreeRanges};

/// The free addresses of one pool.
#[derive(Debug, Eq, PartialEq, Clone)]
pub(crate) struct AddrSet {
    pub(crate) prefix: IpNet,
    /// Free addresses as values in the IPv6 space, IPv4 addresses are IPv4-mapped.
    pub(crate) free: FreeRanges,
}

impl Display for AddrSet {
    // Format the set as [first-last, first-last, ...]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.prefix)?;
        for (i, span) in self.free.spans().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(
                f,
                "{}-{}",
                self.from_bits(span.start),
                self.from_bits(span.end - 1)
            )?;
        }
        write!(f, "]")
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum AddrSetError {
    #[error("address {0} not in prefix")]
    AddressNotInPrefix(IpAddr),
    #[error("address {0} is already free")]
    AddressAlreadyFree(IpAddr),
    #[error("address {0} is not free")]
    AddressNotFree(IpAddr),
    #[error("prefix {0} reaches past the end of the address space")]
    PrefixTooLarge(IpNet),
}

impl AddrSet {
    pub(crate) fn new(prefix: IpNet) -> Result<Self, AddrSetError> {
        let prefix = prefix.trunc();
        let host_bits = u32::from(prefix.max_prefix_len() - prefix.prefix_len());
        let count = 2u128
            .checked_pow(host_bits)
            .ok_or(AddrSetError::PrefixTooLarge(prefix))?;
        let start = to_bits(prefix.network());
        start
            .checked_add(count)
            .ok_or(AddrSetError::PrefixTooLarge(prefix))?;

        Ok(Self {
            prefix,
            free: FreeRanges::full(start, count),
        })
    }

    /// Number of free addresses.
    pub(crate) fn len(&self) -> u128 {
        self.free.len()
    }

    /// Returns true if allocations of `version`, optionally restricted to one pool, may use
    /// this set.
    pub(crate) fn serves(&self, version: IpVersion, within: Option<&IpNet>) -> bool {
        IpVersion::of_net(&self.prefix) == version && within.is_none_or(|p| p.trunc() == self.prefix)
    }

    /// Returns true if `address` belongs to this set's prefix and is free.
    pub(crate) fn contains(&self, address: IpAddr) -> bool {
        self.prefix.contains(&address) && self.free.contains(to_bits(address))
    }

    pub(crate) fn insert(&mut self, address: IpAddr) -> Result<(), AddrSetError> {
        if !self.prefix.contains(&address) {
            return Err(AddrSetError::AddressNotInPrefix(address));
        }
        self.free
            .put(to_bits(address))
            .map_err(|_| AddrSetError::AddressAlreadyFree(address))
    }

    pub(crate) fn remove(&mut self, address: IpAddr) -> Result<(), AddrSetError> {
        if !self.prefix.contains(&address) {
            return Err(AddrSetError::AddressNotInPrefix(address));
        }
        self.free
            .take(to_bits(address))
            .map_err(|_| AddrSetError::AddressNotFree(address))
    }

    /// Returns the nth free address in the set.
    pub(crate) fn nth_free(&self, n: u128) -> Option<IpAddr> {
        self.free.nth(n).map(|bits| self.from_bits(bits))
    }

    fn from_bits(&self, bits: u128) -> IpAddr {
        let addr = Ipv6Addr::from_bits(bits);
        match self.prefix {
            IpNet::V4(_) => addr.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr.into()),
            IpNet::V6(_) => IpAddr::V6(addr),
        }
    }
}

fn to_bits(address: IpAddr) -> u128 {
    match address {
        IpAddr::V4(addr) => addr.to_ipv6_mapped().to_bits(),
        IpAddr::V6(addr) => addr.to_bits(),
    }
}
