// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parameter validation for provisioning and update requests.
//!
//! The rule modules are pure functions over request parameters. The
//! [`ParameterValidator`] runs them in a fixed order and turns the first
//! failure into a [`BrokerError::Validation`]. Networking failures are reported
//! together as a [`ValidationErrors`] aggregate; every other rule stops at its
//! own precisely worded message.
//!
//! Region tables are injected through [`ValidatorConfig`], so tests can swap
//! them without touching global state.

pub mod autoscaler;
pub mod kubeconfig;
pub mod machines;
pub mod networking;
pub mod oidc;
pub mod quota;
pub mod worker_pools;

use std::fmt;

use tracing::info;

use crate::error::BrokerError;
use crate::model::{
    AdditionalWorkerNodePool, ErsContext, ProvisioningParametersDto, UpdatingParameters,
};
use crate::plans::{AutoScalerDefaults, Plan, TRIAL_REGIONS};

pub use self::machines::RegionsSupportingMachine;
pub use self::networking::NetworkingRules;
pub use self::quota::QuotaPolicy;

/// Ordered list of validation failures.
///
/// Displays in the multi-error layout clients already parse:
/// `"1 error occurred:\n\t* msg\n\n"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    /// Record a failure.
    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    /// Whether no failure was recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Failures in the order they were found.
    pub fn messages(&self) -> &[String] {
        &self.0
    }

    /// `Ok` when empty, the aggregate otherwise.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            writeln!(f, "1 error occurred:")?;
        } else {
            writeln!(f, "{} errors occurred:", self.0.len())?;
        }
        for message in &self.0 {
            writeln!(f, "\t* {}", message)?;
        }
        writeln!(f)
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationErrors> for BrokerError {
    fn from(errors: ValidationErrors) -> Self {
        BrokerError::validation(errors.to_string())
    }
}

fn rejected(message: impl Into<String>) -> BrokerError {
    let message = message.into();
    info!(reason = %message, "Request parameters rejected");
    BrokerError::validation(message)
}

/// Read-only tables the validator consults.
#[derive(Debug, Clone, Default)]
pub struct ValidatorConfig {
    /// Machine families restricted to listed regions.
    pub regions_supporting_machine: RegionsSupportingMachine,
    /// Networking limits and reserved ranges.
    pub networking: NetworkingRules,
}

/// Runs every parameter rule in order.
#[derive(Debug, Clone, Default)]
pub struct ParameterValidator {
    config: ValidatorConfig,
}

impl ParameterValidator {
    /// Create a validator over the given tables.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// The region/machine table in use.
    pub fn regions_supporting_machine(&self) -> &RegionsSupportingMachine {
        &self.config.regions_supporting_machine
    }

    /// Validate provisioning parameters for `plan`.
    ///
    /// Returns the parameters to persist; an own-cluster kubeconfig is stored
    /// decoded.
    pub fn validate_provisioning(
        &self,
        plan: Plan,
        context: &ErsContext,
        parameters: &ProvisioningParametersDto,
    ) -> Result<ProvisioningParametersDto, BrokerError> {
        let mut validated = parameters.clone();

        if plan == Plan::Trial
            && let Some(region) = parameters.region.as_deref()
            && !TRIAL_REGIONS.contains(&region)
        {
            return Err(rejected("invalid region specified in request for trial"));
        }

        self.config
            .networking
            .validate(parameters)
            .map_err(|errors| rejected(errors.to_string()))?;

        autoscaler::validate(&parameters.auto_scaler, plan.auto_scaler_defaults())
            .map_err(rejected)?;

        if let Some(config) = &parameters.oidc {
            oidc::validate(config).map_err(rejected)?;
        }

        if let Some(pools) = &parameters.additional_worker_node_pools {
            self.validate_pools(plan, context, parameters.region.as_deref(), pools)?;
            for pool in pools {
                worker_pools::validate_pool(pool).map_err(rejected)?;
            }
        }

        if let (Some(region), Some(machine_type)) =
            (parameters.region.as_deref(), parameters.machine_type.as_deref())
        {
            self.config
                .regions_supporting_machine
                .check_machine(region, machine_type)
                .map_err(rejected)?;
        }

        if plan == Plan::OwnCluster {
            let (Some(encoded), Some(_), Some(_)) = (
                parameters.kubeconfig.as_deref(),
                parameters.shoot_name.as_deref().filter(|s| !s.is_empty()),
                parameters.shoot_domain.as_deref().filter(|s| !s.is_empty()),
            ) else {
                return Err(rejected(
                    "kubeconfig, shootName and shootDomain are required for the own_cluster plan",
                ));
            };
            validated.kubeconfig =
                Some(kubeconfig::decode_and_validate(encoded).map_err(rejected)?);
        }

        validated.licence_type = plan.licence_type().map(str::to_string);
        Ok(validated)
    }

    /// Validate update parameters against the instance they apply to.
    ///
    /// `current` holds the instance's latest provisioning parameters; its
    /// autoscaler values replace the plan defaults and its pools fix the HA
    /// settings.
    pub fn validate_update(
        &self,
        plan: Plan,
        context: &ErsContext,
        region: &str,
        current: &ProvisioningParametersDto,
        parameters: &UpdatingParameters,
    ) -> Result<(), BrokerError> {
        if let Some(machine_type) = parameters.machine_type.as_deref().filter(|m| !m.is_empty()) {
            self.config
                .regions_supporting_machine
                .check_machine(region, machine_type)
                .map_err(rejected)?;
        }

        if let Some(config) = parameters.oidc.as_ref().filter(|c| !c.is_empty()) {
            oidc::validate(config).map_err(rejected)?;
        }

        let plan_defaults = plan.auto_scaler_defaults();
        let defaults = AutoScalerDefaults {
            min: current.auto_scaler.auto_scaler_min.unwrap_or(plan_defaults.min),
            max: current.auto_scaler.auto_scaler_max.unwrap_or(plan_defaults.max),
            floor: plan_defaults.floor,
        };
        autoscaler::validate(&parameters.auto_scaler, defaults).map_err(rejected)?;

        if let Some(pools) = &parameters.additional_worker_node_pools {
            self.validate_pools(plan, context, Some(region), pools)?;
            for pool in pools {
                worker_pools::validate_pool(pool).map_err(rejected)?;
            }
            let existing = current.additional_worker_node_pools.as_deref().unwrap_or(&[]);
            worker_pools::check_ha_zones_unchanged(existing, pools).map_err(rejected)?;
        }

        Ok(())
    }

    fn validate_pools(
        &self,
        plan: Plan,
        context: &ErsContext,
        region: Option<&str>,
        pools: &[AdditionalWorkerNodePool],
    ) -> Result<(), BrokerError> {
        if !plan.supports_additional_worker_node_pools() {
            return Err(rejected(format!(
                "additional worker node pools are not supported for plan ID: {}",
                plan.id()
            )));
        }
        if !worker_pools::names_unique(pools) {
            return Err(rejected("names of additional worker node pools must be unique"));
        }
        if context.is_external_license_type() {
            machines::check_gpu_machines(pools).map_err(rejected)?;
        }
        if let Some(region) = region {
            self.config
                .regions_supporting_machine
                .check_pools(region, pools)
                .map_err(rejected)?;
        }
        Ok(())
    }
}
