// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Machine type availability per region and the GPU restriction.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::model::AdditionalWorkerNodePool;

/// GPU machine families blocked for external customers.
pub const GPU_MACHINE_PREFIXES: [&str; 4] = ["g6", "g4dn", "g2-standard", "Standard_NC"];

/// Machine families restricted to an explicit set of regions.
///
/// Keys are machine type prefixes (`g6`, `Standard_NC`), values map each
/// allowed region to its zones. A machine type matching no prefix is available
/// everywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RegionsSupportingMachine {
    families: BTreeMap<String, BTreeMap<String, Option<Vec<String>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionsSupportingMachineFile {
    regions_supporting_machine: RegionsSupportingMachine,
}

impl RegionsSupportingMachine {
    /// Build a table from `(family, regions)` pairs without zone data.
    pub fn from_families<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a [&'a str])>,
    ) -> Self {
        let families = entries
            .into_iter()
            .map(|(family, regions)| {
                let regions = regions.iter().map(|r| (r.to_string(), None)).collect();
                (family.to_string(), regions)
            })
            .collect();
        Self { families }
    }

    /// Parse a YAML table, either bare or under a `regionsSupportingMachine` key.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        match serde_yaml::from_str::<RegionsSupportingMachineFile>(yaml) {
            Ok(file) => Ok(file.regions_supporting_machine),
            Err(_) => serde_yaml::from_str(yaml),
        }
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    fn family(&self, machine_type: &str) -> Option<&BTreeMap<String, Option<Vec<String>>>> {
        // longest prefix wins so `g6e` can be listed apart from `g6`
        self.families
            .iter()
            .filter(|(prefix, _)| machine_type.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, regions)| regions)
    }

    /// Whether `machine_type` may be used in `region`.
    pub fn is_supported(&self, region: &str, machine_type: &str) -> bool {
        match self.family(machine_type) {
            None => true,
            Some(regions) => regions.contains_key(region),
        }
    }

    /// Sorted regions offering a restricted machine type; empty if unrestricted.
    pub fn supported_regions(&self, machine_type: &str) -> Vec<String> {
        self.family(machine_type)
            .map(|regions| regions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Zones of `region` offering `machine_type`, when the table lists them.
    pub fn available_zones(&self, machine_type: &str, region: &str) -> Vec<String> {
        self.family(machine_type)
            .and_then(|regions| regions.get(region))
            .and_then(|zones| zones.clone())
            .unwrap_or_default()
    }

    /// Whether the table restricts nothing.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Check the main pool's machine type against the instance region.
    pub fn check_machine(&self, region: &str, machine_type: &str) -> Result<(), String> {
        if self.is_supported(region, machine_type) {
            return Ok(());
        }
        Err(format!(
            "In the region {}, the machine type {} is not available, it is supported in the {}",
            region,
            machine_type,
            self.supported_regions(machine_type).join(", ")
        ))
    }

    /// Check every additional pool; one message lists every unavailable type.
    pub fn check_pools(
        &self,
        region: &str,
        pools: &[AdditionalWorkerNodePool],
    ) -> Result<(), String> {
        let unsupported = group_pools_by_machine(
            pools
                .iter()
                .filter(|pool| !self.is_supported(region, &pool.machine_type)),
        );
        if unsupported.is_empty() {
            return Ok(());
        }

        let details: Vec<String> = unsupported
            .iter()
            .map(|(machine_type, names)| {
                format!(
                    "{} (used in: {}), it is supported in the {}",
                    machine_type,
                    names.join(", "),
                    self.supported_regions(machine_type).join(", ")
                )
            })
            .collect();
        Err(format!(
            "In the region {}, the following machine types are not available: {}",
            region,
            details.join("; ")
        ))
    }
}

/// Reject GPU machine types in additional pools.
pub fn check_gpu_machines(pools: &[AdditionalWorkerNodePool]) -> Result<(), String> {
    let gpu = group_pools_by_machine(pools.iter().filter(|pool| {
        GPU_MACHINE_PREFIXES
            .iter()
            .any(|prefix| pool.machine_type.starts_with(prefix))
    }));
    if gpu.is_empty() {
        return Ok(());
    }

    let details: Vec<String> = gpu
        .iter()
        .map(|(machine_type, names)| {
            format!(
                "{} (used in worker node pools: {})",
                machine_type,
                names.join(", ")
            )
        })
        .collect();
    Err(format!(
        "The following GPU machine types: {} are not available for your account. For details, please contact your sales representative.",
        details.join(", ")
    ))
}

/// Machine types in first-seen order with the names of the pools using them.
fn group_pools_by_machine<'a>(
    pools: impl Iterator<Item = &'a AdditionalWorkerNodePool>,
) -> Vec<(String, Vec<String>)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for pool in pools {
        match grouped.iter_mut().find(|(m, _)| *m == pool.machine_type) {
            Some((_, names)) => names.push(pool.name.clone()),
            None => grouped.push((pool.machine_type.clone(), vec![pool.name.clone()])),
        }
    }
    grouped
}
