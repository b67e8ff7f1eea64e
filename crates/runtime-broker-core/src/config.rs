// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::collections::HashSet;
use std::time::Duration;

use crate::archive::ArchiveWorkerConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::plans::{Plan, PlanUpgrades};
use crate::retry::RetryPolicy;
use crate::validator::{QuotaPolicy, RegionsSupportingMachine, ValidatorConfig};

/// Runtime broker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Orchestrator policy switches
    pub orchestrator: OrchestratorConfig,
    /// Validator tables
    pub validator: ValidatorConfig,
    /// Archive sweep settings
    pub archive: ArchiveWorkerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RUNTIME_BROKER_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `RUNTIME_BROKER_ENABLED_PLANS`: comma-separated plan names (default: all plans)
    /// - `RUNTIME_BROKER_SHOOT_DOMAIN`: base DNS domain of shoots (default: empty)
    /// - `RUNTIME_BROKER_LANDSCAPE_URL`: dashboard landscape URL (default: empty)
    /// - `RUNTIME_BROKER_ONLY_SINGLE_TRIAL_PER_GA` (default: true)
    /// - `RUNTIME_BROKER_ONLY_ONE_FREE_PER_GA` (default: true)
    /// - `RUNTIME_BROKER_FREE_WHITELIST`: comma-separated global accounts (default: empty)
    /// - `RUNTIME_BROKER_ALLOW_UPDATE_EXPIRED_INSTANCE_WITH_CONTEXT` (default: false)
    /// - `RUNTIME_BROKER_SUBACCOUNT_MOVEMENT_ENABLED` (default: false)
    /// - `RUNTIME_BROKER_UPDATE_CR_LABELS_ON_ACCOUNT_MOVE` (default: false)
    /// - `RUNTIME_BROKER_UPDATE_PROCESSING_ENABLED` (default: true)
    /// - `RUNTIME_BROKER_SYNC_EMPTY_UPDATE_RESPONSE` (default: false)
    /// - `RUNTIME_BROKER_PLAN_UPGRADES`: `from>to` plan name pairs (default: empty)
    /// - `RUNTIME_BROKER_DISABLE_CONVERGED_CLOUD` (default: false)
    /// - `RUNTIME_BROKER_UPDATE_RETRY_INTERVAL_MS` (default: 500)
    /// - `RUNTIME_BROKER_UPDATE_RETRY_TIMEOUT_MS` (default: 5000)
    /// - `RUNTIME_BROKER_REGIONS_SUPPORTING_MACHINE`: path to a YAML table (default: none)
    /// - `RUNTIME_BROKER_ARCHIVE_POLL_INTERVAL_SECS`, `RUNTIME_BROKER_ARCHIVE_BATCH_SIZE`:
    ///   see [`ArchiveWorkerConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RUNTIME_BROKER_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("RUNTIME_BROKER_DATABASE_URL"))?;

        let enabled_plans = match std::env::var("RUNTIME_BROKER_ENABLED_PLANS") {
            Ok(value) => parse_plans(&value)?,
            Err(_) => Plan::ALL.into_iter().collect(),
        };

        let plan_upgrades = match std::env::var("RUNTIME_BROKER_PLAN_UPGRADES") {
            Ok(value) => PlanUpgrades::parse(&value).map_err(|_| {
                ConfigError::Invalid(
                    "RUNTIME_BROKER_PLAN_UPGRADES",
                    "must be comma-separated from>to pairs of plan names",
                )
            })?,
            Err(_) => PlanUpgrades::default(),
        };

        let quota = QuotaPolicy {
            only_single_trial_per_ga: flag("RUNTIME_BROKER_ONLY_SINGLE_TRIAL_PER_GA", true)?,
            only_one_free_per_ga: flag("RUNTIME_BROKER_ONLY_ONE_FREE_PER_GA", true)?,
            free_whitelist: list("RUNTIME_BROKER_FREE_WHITELIST").into_iter().collect(),
        };

        let update_retry = RetryPolicy::new(
            millis("RUNTIME_BROKER_UPDATE_RETRY_INTERVAL_MS", 500)?,
            millis("RUNTIME_BROKER_UPDATE_RETRY_TIMEOUT_MS", 5000)?,
        );

        let orchestrator = OrchestratorConfig {
            enabled_plans,
            shoot_domain: std::env::var("RUNTIME_BROKER_SHOOT_DOMAIN").unwrap_or_default(),
            landscape_url: std::env::var("RUNTIME_BROKER_LANDSCAPE_URL").unwrap_or_default(),
            allow_update_expired_instance_with_context: flag(
                "RUNTIME_BROKER_ALLOW_UPDATE_EXPIRED_INSTANCE_WITH_CONTEXT",
                false,
            )?,
            subaccount_movement_enabled: flag("RUNTIME_BROKER_SUBACCOUNT_MOVEMENT_ENABLED", false)?,
            update_custom_resources_labels_on_account_move: flag(
                "RUNTIME_BROKER_UPDATE_CR_LABELS_ON_ACCOUNT_MOVE",
                false,
            )?,
            update_processing_enabled: flag("RUNTIME_BROKER_UPDATE_PROCESSING_ENABLED", true)?,
            sync_empty_update_response_enabled: flag(
                "RUNTIME_BROKER_SYNC_EMPTY_UPDATE_RESPONSE",
                false,
            )?,
            disable_sap_converged_cloud: flag("RUNTIME_BROKER_DISABLE_CONVERGED_CLOUD", false)?,
            plan_upgrades,
            quota,
            update_retry,
        };

        let regions_supporting_machine = match std::env::var("RUNTIME_BROKER_REGIONS_SUPPORTING_MACHINE") {
            Ok(path) if !path.is_empty() => RegionsSupportingMachine::from_file(&path).map_err(|_| {
                ConfigError::Invalid(
                    "RUNTIME_BROKER_REGIONS_SUPPORTING_MACHINE",
                    "must point to a readable YAML region table",
                )
            })?,
            _ => RegionsSupportingMachine::default(),
        };

        Ok(Self {
            database_url,
            orchestrator,
            validator: ValidatorConfig {
                regions_supporting_machine,
                ..Default::default()
            },
            archive: ArchiveWorkerConfig::from_env(),
        })
    }
}

fn flag(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid(name, "must be true or false")),
        },
        Err(_) => Ok(default),
    }
}

fn millis(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::Invalid(name, "must be a number of milliseconds"))
}

fn list(name: &'static str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_plans(value: &str) -> Result<HashSet<Plan>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            Plan::from_name(name).ok_or(ConfigError::Invalid(
                "RUNTIME_BROKER_ENABLED_PLANS",
                "must list known plan names",
            ))
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
