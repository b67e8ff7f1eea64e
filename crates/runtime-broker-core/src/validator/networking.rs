// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node, pod and service network checks.

use std::fmt;
use std::net::Ipv4Addr;

use crate::model::ProvisioningParametersDto;

use super::ValidationErrors;

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

const fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

impl Ipv4Cidr {
    /// Build a network, clearing host bits. `prefix` is clamped to 32.
    pub const fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        let prefix = if prefix > 32 { 32 } else { prefix };
        Self {
            network: Ipv4Addr::from_bits(addr.to_bits() & mask(prefix)),
            prefix,
        }
    }

    fn split(s: &str) -> Option<(Ipv4Addr, u8)> {
        let (addr, prefix) = s.split_once('/')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let prefix: u8 = prefix.parse().ok()?;
        (prefix <= 32).then_some((addr, prefix))
    }

    /// Parse a CIDR, rejecting addresses with host bits set (`10.250.0.1/19`).
    pub fn parse_canonical(s: &str) -> Result<Self, String> {
        let (addr, prefix) =
            Self::split(s).ok_or_else(|| format!("invalid CIDR address: {}", s))?;
        let cidr = Self::new(addr, prefix);
        if cidr.network != addr {
            return Err(format!("{} must be valid canonical CIDR", addr));
        }
        Ok(cidr)
    }

    /// Prefix length of a syntactically valid CIDR, canonical or not.
    pub fn prefix_len_of(s: &str) -> Option<u8> {
        Self::split(s).map(|(_, prefix)| prefix)
    }

    /// Network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    /// Whether `ip` lies inside the network.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        ip.to_bits() & mask(self.prefix) == self.network.to_bits()
    }

    /// Whether one network contains the other's base address.
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Default node network.
pub const DEFAULT_NODES_CIDR: Ipv4Cidr = Ipv4Cidr::new(Ipv4Addr::new(10, 250, 0, 0), 16);
/// Default pod network.
pub const DEFAULT_PODS_CIDR: Ipv4Cidr = Ipv4Cidr::new(Ipv4Addr::new(10, 96, 0, 0), 13);
/// Default service network.
pub const DEFAULT_SERVICES_CIDR: Ipv4Cidr = Ipv4Cidr::new(Ipv4Addr::new(100, 104, 0, 0), 13);

/// Networks used by the seed clusters hosting runtime control planes.
pub const SEED_CIDRS: [Ipv4Cidr; 6] = [
    Ipv4Cidr::new(Ipv4Addr::new(10, 243, 128, 0), 17),
    Ipv4Cidr::new(Ipv4Addr::new(10, 242, 0, 0), 16),
    Ipv4Cidr::new(Ipv4Addr::new(10, 243, 0, 0), 17),
    Ipv4Cidr::new(Ipv4Addr::new(10, 64, 0, 0), 11),
    Ipv4Cidr::new(Ipv4Addr::new(10, 254, 0, 0), 16),
    Ipv4Cidr::new(Ipv4Addr::new(10, 243, 0, 0), 16),
];

/// Limits and reserved ranges for networking checks.
#[derive(Debug, Clone)]
pub struct NetworkingRules {
    /// Ranges no runtime network may overlap.
    pub seed_cidrs: Vec<Ipv4Cidr>,
    /// Pod network assumed when the caller gives none.
    pub default_pods_cidr: Ipv4Cidr,
    /// Service network assumed when the caller gives none.
    pub default_services_cidr: Ipv4Cidr,
    /// Largest node prefix length (smallest node network).
    pub max_nodes_prefix: u8,
    /// Largest number of zones the zone CIDR split supports.
    pub max_zones: usize,
}

impl Default for NetworkingRules {
    fn default() -> Self {
        Self {
            seed_cidrs: SEED_CIDRS.to_vec(),
            default_pods_cidr: DEFAULT_PODS_CIDR,
            default_services_cidr: DEFAULT_SERVICES_CIDR,
            max_nodes_prefix: 23,
            max_zones: 4,
        }
    }
}

impl NetworkingRules {
    /// Validate zones and custom networks.
    ///
    /// Parse failures are reported together and stop the check. Seed overlaps
    /// are reported together before the networks are compared with each other.
    pub fn validate(&self, parameters: &ProvisioningParametersDto) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if parameters.zones.len() > self.max_zones {
            errors.push(format!(
                "number of zones must not be greater than {}",
                self.max_zones
            ));
        }

        let Some(networking) = &parameters.networking else {
            return errors.into_result();
        };

        let nodes = Ipv4Cidr::parse_canonical(&networking.nodes_cidr)
            .map_err(|e| errors.push(format!("while parsing nodes CIDR: {}", e)))
            .ok();
        if let Some(prefix) = Ipv4Cidr::prefix_len_of(&networking.nodes_cidr)
            && prefix > self.max_nodes_prefix
        {
            errors.push(format!(
                "the suffix of the node CIDR must not be greater than {}",
                self.max_nodes_prefix
            ));
        }

        let pods = match &networking.pods_cidr {
            Some(cidr) => Ipv4Cidr::parse_canonical(cidr)
                .map_err(|e| errors.push(format!("while parsing pods CIDR: {}", e)))
                .ok(),
            None => Some(self.default_pods_cidr),
        };
        let services = match &networking.services_cidr {
            Some(cidr) => Ipv4Cidr::parse_canonical(cidr)
                .map_err(|e| errors.push(format!("while parsing services CIDR: {}", e)))
                .ok(),
            None => Some(self.default_services_cidr),
        };

        let (Some(nodes), Some(pods), Some(services)) = (nodes, pods, services) else {
            return errors.into_result();
        };
        if !errors.is_empty() {
            return errors.into_result();
        }

        for seed in &self.seed_cidrs {
            if nodes.overlaps(seed) {
                errors.push(format!("nodes CIDR must not overlap {}", seed));
            }
            if services.overlaps(seed) {
                errors.push(format!("services CIDR must not overlap {}", seed));
            }
            if pods.overlaps(seed) {
                errors.push(format!("pods CIDR must not overlap {}", seed));
            }
        }
        if !errors.is_empty() {
            return errors.into_result();
        }

        if nodes.overlaps(&pods) {
            errors.push("nodes CIDR must not overlap pods CIDR");
        }
        if nodes.overlaps(&services) {
            errors.push("nodes CIDR must not overlap serivces CIDR");
        }
        if services.overlaps(&pods) {
            errors.push("services CIDR must not overlap pods CIDR");
        }

        errors.into_result()
    }
}
