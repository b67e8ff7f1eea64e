// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Additional worker node pool rules.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::AdditionalWorkerNodePool;

use super::autoscaler::AUTO_SCALER_CEILING;

/// Longest allowed pool name.
pub const MAX_POOL_NAME_LENGTH: usize = 15;
/// Name of the main pool, unavailable for additional pools.
pub const RESERVED_POOL_NAME: &str = "cpu-worker-0";
/// Smallest minimum of a pool spread over several zones.
pub const HA_MIN_NODES: u32 = 3;

static POOL_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$"));

/// Whether every pool name is distinct.
pub fn names_unique(pools: &[AdditionalWorkerNodePool]) -> bool {
    let mut seen = HashSet::new();
    pools.iter().all(|pool| seen.insert(pool.name.as_str()))
}

/// Check one pool's name and autoscaler bounds.
pub fn validate_pool(pool: &AdditionalWorkerNodePool) -> Result<(), String> {
    validate_name(&pool.name)?;

    if pool.auto_scaler_min > pool.auto_scaler_max {
        return Err(format!(
            "AutoScalerMax {} should be larger than AutoScalerMin {} for {} additional worker node pool",
            pool.auto_scaler_max, pool.auto_scaler_min, pool.name
        ));
    }
    if pool.auto_scaler_max > AUTO_SCALER_CEILING {
        return Err(format!(
            "AutoScalerMax {} should not be larger than {} for {} additional worker node pool",
            pool.auto_scaler_max, AUTO_SCALER_CEILING, pool.name
        ));
    }
    if pool.ha_zones && pool.auto_scaler_min < HA_MIN_NODES {
        return Err(format!(
            "AutoScalerMin {} should be at least {} when HA zones are enabled for {} additional worker node pool",
            pool.auto_scaler_min, HA_MIN_NODES, pool.name
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), String> {
    if name == RESERVED_POOL_NAME {
        return Err(format!(
            "additional worker node pool name {} is reserved",
            RESERVED_POOL_NAME
        ));
    }
    if name.len() > MAX_POOL_NAME_LENGTH {
        return Err(format!(
            "additional worker node pool name {} must not be longer than {} characters",
            name, MAX_POOL_NAME_LENGTH
        ));
    }
    let pattern = POOL_NAME
        .as_ref()
        .map_err(|e| format!("while compiling pool name pattern: {}", e))?;
    if !pattern.is_match(name) {
        return Err(format!(
            "additional worker node pool name {} must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character",
            name
        ));
    }
    Ok(())
}

/// Reject pools whose HA setting differs from the existing pool of the same name.
pub fn check_ha_zones_unchanged(
    current: &[AdditionalWorkerNodePool],
    requested: &[AdditionalWorkerNodePool],
) -> Result<(), String> {
    let changed: Vec<&str> = requested
        .iter()
        .filter(|pool| {
            current
                .iter()
                .find(|existing| existing.name == pool.name)
                .is_some_and(|existing| existing.ha_zones != pool.ha_zones)
        })
        .map(|pool| pool.name.as_str())
        .collect();

    if changed.is_empty() {
        return Ok(());
    }
    Err(format!(
        "HA zones setting is permanent and cannot be changed for additional worker node pools: {}.",
        changed.join(", ")
    ))
}
