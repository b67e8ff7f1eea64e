// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service plan catalogue.

use std::collections::{HashMap, HashSet};

use crate::model::CloudProvider;

/// ID of the only service offering this broker serves.
pub const KYMA_SERVICE_ID: &str = "47c9dcbf-ff30-448e-ab36-d3bad66ba281";
/// Name of the service offering.
pub const KYMA_SERVICE_NAME: &str = "kymaruntime";

/// Licence type recorded for lite and trial plans.
pub const LICENCE_TYPE_LITE: &str = "TestDevelopmentAndDemo";

/// Autoscaler bounds a plan applies when the caller sets none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoScalerDefaults {
    /// Default minimum.
    pub min: u32,
    /// Default maximum.
    pub max: u32,
    /// Smallest minimum a caller may request.
    pub floor: u32,
}

/// A service plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plan {
    /// Dedicated runtime on AWS.
    Aws,
    /// Dedicated runtime on Azure.
    Azure,
    /// Small runtime on Azure.
    AzureLite,
    /// Dedicated runtime on GCP.
    Gcp,
    /// Time-limited shared trial.
    Trial,
    /// Free tier.
    Free,
    /// Dedicated runtime on SAP Converged Cloud.
    SapConvergedCloud,
    /// Caller brings an existing cluster.
    OwnCluster,
    /// Preview features on AWS.
    Preview,
}

impl Plan {
    /// Every plan, in catalogue order.
    pub const ALL: [Plan; 9] = [
        Plan::Aws,
        Plan::Azure,
        Plan::AzureLite,
        Plan::Gcp,
        Plan::Trial,
        Plan::Free,
        Plan::SapConvergedCloud,
        Plan::OwnCluster,
        Plan::Preview,
    ];

    /// Plan ID as sent by the platform.
    pub fn id(&self) -> &'static str {
        match self {
            Plan::Aws => "361c511f-f939-4621-b228-d0fb79a1fe15",
            Plan::Azure => "4deee563-e5ec-4731-b9b1-53b42d855f0c",
            Plan::AzureLite => "8cb22518-aa26-44c5-91a0-e669ec9bf443",
            Plan::Gcp => "ca6e5357-707f-4565-bbbd-b3ab732597c6",
            Plan::Trial => "7d55d31d-35ae-4438-bf13-6ffdfa107d9f",
            Plan::Free => "b1a5764e-2ea1-4f95-94c0-2b4538b37b55",
            Plan::SapConvergedCloud => "03b812ac-c991-4528-b5bd-08b303523a63",
            Plan::OwnCluster => "03e3cb66-a4c6-4c6a-b4b0-5d42224debea",
            Plan::Preview => "5cb3d976-b85c-42ea-a636-79cadda109a9",
        }
    }

    /// Plan name as used in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Plan::Aws => "aws",
            Plan::Azure => "azure",
            Plan::AzureLite => "azure_lite",
            Plan::Gcp => "gcp",
            Plan::Trial => "trial",
            Plan::Free => "free",
            Plan::SapConvergedCloud => "sap-converged-cloud",
            Plan::OwnCluster => "own_cluster",
            Plan::Preview => "preview",
        }
    }

    /// Look a plan up by ID.
    pub fn from_id(id: &str) -> Option<Plan> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    /// Look a plan up by name.
    pub fn from_name(name: &str) -> Option<Plan> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Hyperscaler the plan runs on; shared plans follow the marketplace provider.
    pub fn provider(&self, platform_provider: CloudProvider) -> CloudProvider {
        match self {
            Plan::Aws | Plan::Preview => CloudProvider::Aws,
            Plan::Azure | Plan::AzureLite => CloudProvider::Azure,
            Plan::Gcp => CloudProvider::Gcp,
            Plan::SapConvergedCloud => CloudProvider::SapConvergedCloud,
            Plan::Trial | Plan::Free => platform_provider,
            Plan::OwnCluster => CloudProvider::Unknown,
        }
    }

    /// Autoscaler defaults of the main pool.
    pub fn auto_scaler_defaults(&self) -> AutoScalerDefaults {
        match self {
            Plan::AzureLite => AutoScalerDefaults {
                min: 2,
                max: 10,
                floor: 2,
            },
            Plan::Trial | Plan::Free => AutoScalerDefaults {
                min: 1,
                max: 1,
                floor: 1,
            },
            Plan::OwnCluster => AutoScalerDefaults {
                min: 0,
                max: 0,
                floor: 0,
            },
            _ => AutoScalerDefaults {
                min: 3,
                max: 20,
                floor: 3,
            },
        }
    }

    /// Whether callers may define additional worker node pools.
    pub fn supports_additional_worker_node_pools(&self) -> bool {
        matches!(
            self,
            Plan::Aws | Plan::Azure | Plan::Gcp | Plan::SapConvergedCloud | Plan::Preview
        )
    }

    /// Licence type recorded in the parameters at provisioning time.
    pub fn licence_type(&self) -> Option<&'static str> {
        match self {
            Plan::AzureLite | Plan::Trial => Some(LICENCE_TYPE_LITE),
            _ => None,
        }
    }
}

/// Name of a plan ID, or an empty string when unknown.
pub fn plan_name_or_empty(plan_id: &str) -> &'static str {
    Plan::from_id(plan_id).map(|p| p.name()).unwrap_or("")
}

/// Whether the plan ID is the trial plan.
pub fn is_trial_plan(plan_id: &str) -> bool {
    plan_id == Plan::Trial.id()
}

/// Whether the plan ID is the free plan.
pub fn is_freemium_plan(plan_id: &str) -> bool {
    plan_id == Plan::Free.id()
}

/// Whether the plan ID is the own-cluster plan.
pub fn is_own_cluster_plan(plan_id: &str) -> bool {
    plan_id == Plan::OwnCluster.id()
}

/// Region hints the trial plan accepts.
pub const TRIAL_REGIONS: [&str; 3] = ["europe", "us", "asia"];

/// Plan changes an update may perform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanUpgrades {
    allowed: HashMap<Plan, HashSet<Plan>>,
}

impl PlanUpgrades {
    /// Allow a change from `from` to `to`.
    pub fn allow(mut self, from: Plan, to: Plan) -> Self {
        self.allowed.entry(from).or_default().insert(to);
        self
    }

    /// Whether an instance on `from` may move to `to`.
    pub fn allows(&self, from: Plan, to: Plan) -> bool {
        self.allowed.get(&from).is_some_and(|targets| targets.contains(&to))
    }

    /// Parse `from>to` pairs of plan names separated by commas.
    pub fn parse(value: &str) -> Result<Self, String> {
        let mut upgrades = Self::default();
        for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (from, to) = pair
                .split_once('>')
                .ok_or_else(|| format!("plan upgrade {pair:?} is not in the from>to form"))?;
            let lookup = |name: &str| {
                Plan::from_name(name.trim()).ok_or_else(|| format!("unknown plan name {:?}", name.trim()))
            };
            upgrades = upgrades.allow(lookup(from)?, lookup(to)?);
        }
        Ok(upgrades)
    }
}
