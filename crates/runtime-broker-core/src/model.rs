// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain records shared by the orchestrator, the store and the archiver.
//!
//! [`Instance`] and [`Operation`] are separate records linked by instance ID and
//! by the instance's `last_operation_id`. Both carry a [`ProvisioningParameters`]
//! bundle: the operation keeps the copy it was created with, the instance keeps
//! the latest one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plans::Plan;

/// Hyperscaler hosting a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CloudProvider {
    /// Amazon Web Services.
    #[serde(rename = "AWS")]
    Aws,
    /// Microsoft Azure.
    Azure,
    /// Google Cloud Platform.
    #[serde(rename = "GCP")]
    Gcp,
    /// SAP Converged Cloud (OpenStack).
    #[serde(rename = "SapConvergedCloud")]
    SapConvergedCloud,
    /// Provider not known (own clusters, legacy rows).
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl CloudProvider {
    /// Stable string form used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::Azure => "Azure",
            Self::Gcp => "GCP",
            Self::SapConvergedCloud => "SapConvergedCloud",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "aws" => Self::Aws,
            "azure" => Self::Azure,
            "gcp" => Self::Gcp,
            "sapconvergedcloud" | "openstack" => Self::SapConvergedCloud,
            _ => Self::Unknown,
        })
    }
}

/// Kind of lifecycle transition an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Create (or resume) the runtime.
    Provision,
    /// Remove the runtime; temporary when suspending.
    Deprovision,
    /// Apply changed parameters to the runtime.
    Update,
}

impl OperationType {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Deprovision => "deprovision",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provision" => Ok(Self::Provision),
            "deprovision" => Ok(Self::Deprovision),
            "update" => Ok(Self::Update),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

/// State of an operation as recorded by the orchestrator and the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Stored, not yet picked up.
    #[serde(rename = "pending")]
    Pending,
    /// Being executed.
    #[serde(rename = "in progress")]
    InProgress,
    /// Executor is retrying a failed step.
    #[serde(rename = "retrying")]
    Retrying,
    /// Finished successfully.
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Finished with an error.
    #[serde(rename = "failed")]
    Failed,
    /// Cancellation requested.
    #[serde(rename = "canceling")]
    Canceling,
    /// Cancelled.
    #[serde(rename = "canceled")]
    Canceled,
}

impl OperationState {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
        }
    }

    /// Whether the executor is (or will be) working on the operation.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Retrying)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in progress" => Ok(Self::InProgress),
            "retrying" => Ok(Self::Retrying),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceling" => Ok(Self::Canceling),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown operation state: {}", other)),
        }
    }
}

/// Credentials the platform hands over for the in-cluster service manager operator.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceManagerOperatorCredentials {
    /// OAuth client ID.
    #[serde(rename = "clientid")]
    pub client_id: String,
    /// OAuth client secret.
    #[serde(rename = "clientsecret")]
    pub client_secret: String,
    /// Service manager URL.
    #[serde(rename = "sm_url")]
    pub service_manager_url: String,
    /// Token URL.
    pub url: String,
    /// XSUAA application name.
    #[serde(rename = "xsappname")]
    pub xs_app_name: String,
}

impl fmt::Debug for ServiceManagerOperatorCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceManagerOperatorCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"*****")
            .field("service_manager_url", &self.service_manager_url)
            .field("url", &self.url)
            .field("xs_app_name", &self.xs_app_name)
            .finish()
    }
}

/// Mutable caller context sent with every provision and update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErsContext {
    /// Platform tenant.
    #[serde(rename = "tenant_id", default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    /// Owning sub-account.
    #[serde(rename = "subaccount_id", default, skip_serializing_if = "String::is_empty")]
    pub sub_account_id: String,
    /// Owning global account.
    #[serde(rename = "globalaccount_id", default, skip_serializing_if = "String::is_empty")]
    pub global_account_id: String,
    /// Requesting user.
    #[serde(rename = "user_id", default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    /// Tri-state activity flag driving suspension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Licence type of the account (CUSTOMER, PARTNER, TRIAL, ...).
    #[serde(rename = "license_type", default, skip_serializing_if = "Option::is_none")]
    pub license_type: Option<String>,
    /// Commercial model of the account.
    #[serde(rename = "commercial_model", default, skip_serializing_if = "Option::is_none")]
    pub commercial_model: Option<String>,
    /// Platform marketplace region.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// Service manager operator credentials.
    #[serde(
        rename = "sm_operator_credentials",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sm_operator_credentials: Option<ServiceManagerOperatorCredentials>,
}

const EXTERNAL_LICENSE_TYPES: [&str; 3] = ["CUSTOMER", "PARTNER", "TRIAL"];

impl ErsContext {
    /// Whether the account belongs to an external customer.
    pub fn is_external_license_type(&self) -> bool {
        self.license_type
            .as_deref()
            .is_some_and(|t| EXTERNAL_LICENSE_TYPES.contains(&t))
    }

    /// Whether the context alone requires an update operation.
    pub fn requires_update_operation(&self) -> bool {
        self.sm_operator_credentials.is_some()
    }

    /// Fill every empty field of `self` from `previous`.
    pub fn inherit_missing(mut self, previous: &ErsContext) -> Self {
        fn fill(target: &mut String, source: &str) {
            if target.is_empty() {
                *target = source.to_string();
            }
        }
        fill(&mut self.tenant_id, &previous.tenant_id);
        fill(&mut self.sub_account_id, &previous.sub_account_id);
        fill(&mut self.global_account_id, &previous.global_account_id);
        fill(&mut self.user_id, &previous.user_id);
        fill(&mut self.platform, &previous.platform);
        if self.active.is_none() {
            self.active = previous.active;
        }
        if self.license_type.is_none() {
            self.license_type = previous.license_type.clone();
        }
        if self.commercial_model.is_none() {
            self.commercial_model = previous.commercial_model.clone();
        }
        if self.sm_operator_credentials.is_none() {
            self.sm_operator_credentials = previous.sm_operator_credentials.clone();
        }
        self
    }

    /// Overwrite fields of `self` with every field set in `incoming`.
    ///
    /// The activity flag is left alone; the orchestrator copies it only after
    /// the suspension handler has looked at the transition.
    pub fn merge_update(mut self, incoming: &ErsContext) -> Self {
        fn take(target: &mut String, source: &str) {
            if !source.is_empty() {
                *target = source.to_string();
            }
        }
        take(&mut self.tenant_id, &incoming.tenant_id);
        take(&mut self.sub_account_id, &incoming.sub_account_id);
        take(&mut self.global_account_id, &incoming.global_account_id);
        take(&mut self.user_id, &incoming.user_id);
        take(&mut self.platform, &incoming.platform);
        if incoming.license_type.is_some() {
            self.license_type = incoming.license_type.clone();
        }
        if incoming.commercial_model.is_some() {
            self.commercial_model = incoming.commercial_model.clone();
        }
        if incoming.sm_operator_credentials.is_some() {
            self.sm_operator_credentials = incoming.sm_operator_credentials.clone();
        }
        self
    }
}

/// Custom CIDRs for the runtime network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkingParameters {
    /// Node network, required when networking is given.
    #[serde(rename = "nodes")]
    pub nodes_cidr: String,
    /// Pod network; defaults apply when absent.
    #[serde(rename = "pods", default, skip_serializing_if = "Option::is_none")]
    pub pods_cidr: Option<String>,
    /// Service network; defaults apply when absent.
    #[serde(rename = "services", default, skip_serializing_if = "Option::is_none")]
    pub services_cidr: Option<String>,
}

/// Autoscaler knobs of the main worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScalerParameters {
    /// Minimum node count.
    #[serde(rename = "autoScalerMin", default, skip_serializing_if = "Option::is_none")]
    pub auto_scaler_min: Option<u32>,
    /// Maximum node count.
    #[serde(rename = "autoScalerMax", default, skip_serializing_if = "Option::is_none")]
    pub auto_scaler_max: Option<u32>,
    /// Nodes that may be added during a rolling update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<u32>,
    /// Nodes that may be unavailable during a rolling update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<u32>,
}

impl AutoScalerParameters {
    /// Whether any knob is set.
    pub fn is_set(&self) -> bool {
        self.auto_scaler_min.is_some()
            || self.auto_scaler_max.is_some()
            || self.max_surge.is_some()
            || self.max_unavailable.is_some()
    }

    /// Copy every set knob into `target`; returns whether anything was copied.
    pub fn apply_to(&self, target: &mut AutoScalerParameters) -> bool {
        let mut changed = false;
        if let Some(v) = self.auto_scaler_min {
            target.auto_scaler_min = Some(v);
            changed = true;
        }
        if let Some(v) = self.auto_scaler_max {
            target.auto_scaler_max = Some(v);
            changed = true;
        }
        if let Some(v) = self.max_surge {
            target.max_surge = Some(v);
            changed = true;
        }
        if let Some(v) = self.max_unavailable {
            target.max_unavailable = Some(v);
            changed = true;
        }
        changed
    }
}

/// A named worker pool next to the main one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalWorkerNodePool {
    /// Pool name.
    pub name: String,
    /// Machine type of the pool's nodes.
    pub machine_type: String,
    /// Spread nodes over several zones; permanent once set.
    #[serde(default)]
    pub ha_zones: bool,
    /// Minimum node count.
    pub auto_scaler_min: u32,
    /// Maximum node count.
    pub auto_scaler_max: u32,
}

/// OIDC issuer configuration for the runtime API server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OidcConfig {
    /// Client ID.
    #[serde(rename = "clientID", default)]
    pub client_id: String,
    /// Groups claim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub groups_claim: String,
    /// Issuer URL.
    #[serde(rename = "issuerURL", default)]
    pub issuer_url: String,
    /// Allowed signing algorithms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signing_algs: Vec<String>,
    /// Username claim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username_claim: String,
    /// Username prefix.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username_prefix: String,
    /// Required `key=value` claims.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_claims: Vec<String>,
}

impl OidcConfig {
    /// Whether nothing is configured.
    pub fn is_empty(&self) -> bool {
        self == &OidcConfig::default()
    }
}

/// Cloud and runtime parameters supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningParametersDto {
    /// Cluster display name.
    #[serde(default)]
    pub name: String,
    /// Hyperscaler region (or trial region hint).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Machine type of the main pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    /// Autoscaler settings of the main pool.
    #[serde(flatten)]
    pub auto_scaler: AutoScalerParameters,
    /// Availability zones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    /// Custom networking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<NetworkingParameters>,
    /// OIDC configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcConfig>,
    /// Cluster administrators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub administrators: Vec<String>,
    /// Extra worker pools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_worker_node_pools: Option<Vec<AdditionalWorkerNodePool>>,
    /// Own-cluster plan: caller-chosen shoot name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot_name: Option<String>,
    /// Own-cluster plan: caller-chosen shoot domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoot_domain: Option<String>,
    /// Own-cluster plan: kubeconfig; base64 on input, decoded once validated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    /// Licence type derived from the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licence_type: Option<String>,
}

/// The frozen input of a provisioning request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningParameters {
    /// Service plan.
    #[serde(rename = "plan_id")]
    pub plan_id: String,
    /// Service offering.
    #[serde(rename = "service_id")]
    pub service_id: String,
    /// Caller context.
    #[serde(rename = "ers_context")]
    pub ers_context: ErsContext,
    /// Cloud parameters.
    pub parameters: ProvisioningParametersDto,
    /// Marketplace region the request came through.
    #[serde(rename = "platform_region")]
    pub platform_region: String,
    /// Marketplace provider the request came through.
    #[serde(rename = "platform_provider")]
    pub platform_provider: CloudProvider,
}

impl ProvisioningParameters {
    /// Idempotency comparison for repeated provisioning requests.
    ///
    /// The activity flag, operator credentials and the derived licence type
    /// do not take part.
    pub fn is_equal(&self, other: &ProvisioningParameters) -> bool {
        if self.plan_id != other.plan_id
            || self.service_id != other.service_id
            || self.platform_region != other.platform_region
            || self.platform_provider != other.platform_provider
        {
            return false;
        }

        let (a, b) = (&self.ers_context, &other.ers_context);
        if a.tenant_id != b.tenant_id
            || a.sub_account_id != b.sub_account_id
            || a.global_account_id != b.global_account_id
            || a.user_id != b.user_id
        {
            return false;
        }

        let mut left = self.parameters.clone();
        let mut right = other.parameters.clone();
        left.licence_type = None;
        right.licence_type = None;
        left == right
    }
}

/// Parameters accepted by an update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatingParameters {
    /// New cluster display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New machine type of the main pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    /// New autoscaler settings of the main pool.
    #[serde(flatten)]
    pub auto_scaler: AutoScalerParameters,
    /// New OIDC configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcConfig>,
    /// New administrator list; empty keeps the current one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub administrators: Vec<String>,
    /// New set of extra worker pools; replaces the current set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_worker_node_pools: Option<Vec<AdditionalWorkerNodePool>>,
}

/// Runtime coordinates known for an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetails {
    /// Gardener shoot name.
    #[serde(default)]
    pub shoot_name: String,
    /// Fully qualified shoot domain.
    #[serde(default)]
    pub shoot_domain: String,
    /// Runtime ID assigned by the executor.
    #[serde(rename = "runtime_id", default)]
    pub runtime_id: String,
    /// Owning sub-account.
    #[serde(default)]
    pub sub_account_id: String,
}

/// One provisioned (or pending) runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Immutable identifier chosen by the platform.
    pub instance_id: String,
    /// Runtime ID, empty until provisioning assigns it.
    pub runtime_id: String,
    /// Current owning global account.
    pub global_account_id: String,
    /// Global account before the first account move; empty if never moved.
    pub subscription_global_account_id: String,
    /// Owning sub-account.
    pub sub_account_id: String,
    /// Service offering.
    pub service_id: String,
    /// Service offering name.
    pub service_name: String,
    /// Current plan.
    pub service_plan_id: String,
    /// Current plan name.
    pub service_plan_name: String,
    /// Dashboard URL handed to the platform.
    pub dashboard_url: String,
    /// Latest provisioning parameters.
    pub parameters: ProvisioningParameters,
    /// Hyperscaler region.
    pub provider_region: String,
    /// Hyperscaler.
    pub provider: CloudProvider,
    /// Runtime coordinates.
    pub instance_details: InstanceDetails,
    /// Most recent operation created for the instance.
    pub last_operation_id: Option<String>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance was last written.
    pub updated_at: DateTime<Utc>,
    /// When the instance expired (trial/free), if it did.
    pub expired_at: Option<DateTime<Utc>>,
    /// Soft-deletion timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version.
    pub version: i64,
}

impl Instance {
    /// Whether the instance expired.
    pub fn is_expired(&self) -> bool {
        self.expired_at.is_some()
    }

    /// Global account the instance was subscribed under.
    pub fn subscription_global_account_id(&self) -> &str {
        if self.subscription_global_account_id.is_empty() {
            &self.global_account_id
        } else {
            &self.subscription_global_account_id
        }
    }
}

/// One attempt of a lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operation identifier (the broker-protocol async token).
    pub id: String,
    /// Instance the operation belongs to.
    pub instance_id: String,
    /// Transition kind.
    pub operation_type: OperationType,
    /// Current state.
    pub state: OperationState,
    /// Human-readable state description.
    pub description: String,
    /// Suspension (temporary) versus real deprovisioning.
    pub temporary: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version.
    pub version: i64,
    /// Frozen parameters.
    pub provisioning_parameters: ProvisioningParameters,
    /// Runtime coordinates at creation time.
    pub instance_details: InstanceDetails,
    /// Owning global account at creation time.
    pub global_account_id: String,
    /// Hyperscaler region at creation time.
    pub region: String,
    /// Dashboard URL (provisioning only).
    pub dashboard_url: String,
    /// Requested changes (update only).
    pub updating_parameters: Option<UpdatingParameters>,
    /// Target plan when the update changes the plan.
    pub updated_plan_id: Option<String>,
}

/// Description given to freshly created operations.
pub const OPERATION_CREATED: &str = "Operation created";

impl Operation {
    fn base(
        id: impl Into<String>,
        instance_id: impl Into<String>,
        operation_type: OperationType,
        state: OperationState,
        parameters: ProvisioningParameters,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            instance_id: instance_id.into(),
            operation_type,
            state,
            description: OPERATION_CREATED.to_string(),
            temporary: false,
            created_at: now,
            updated_at: now,
            version: 0,
            global_account_id: parameters.ers_context.global_account_id.clone(),
            provisioning_parameters: parameters,
            instance_details: InstanceDetails::default(),
            region: String::new(),
            dashboard_url: String::new(),
            updating_parameters: None,
            updated_plan_id: None,
        }
    }

    /// A first provisioning; starts in progress.
    pub fn provisioning(
        id: impl Into<String>,
        instance_id: impl Into<String>,
        parameters: ProvisioningParameters,
    ) -> Self {
        let mut op = Self::base(
            id,
            instance_id,
            OperationType::Provision,
            OperationState::InProgress,
            parameters,
        );
        op.instance_details.sub_account_id = op.provisioning_parameters.ers_context.sub_account_id.clone();
        op
    }

    /// A pending re-provisioning that resumes a suspended instance.
    pub fn unsuspension(id: impl Into<String>, instance: &Instance) -> Self {
        let mut op = Self::base(
            id,
            instance.instance_id.clone(),
            OperationType::Provision,
            OperationState::Pending,
            instance.parameters.clone(),
        );
        op.instance_details = instance.instance_details.clone();
        op.instance_details.runtime_id = instance.runtime_id.clone();
        op.global_account_id = instance.global_account_id.clone();
        op.region = instance.provider_region.clone();
        op.dashboard_url = instance.dashboard_url.clone();
        op
    }

    /// A pending temporary deprovisioning (suspension).
    pub fn suspension(id: impl Into<String>, instance: &Instance) -> Self {
        let mut op = Self::deprovisioning(id, instance);
        op.temporary = true;
        op
    }

    /// A pending real deprovisioning.
    pub fn deprovisioning(id: impl Into<String>, instance: &Instance) -> Self {
        let mut op = Self::base(
            id,
            instance.instance_id.clone(),
            OperationType::Deprovision,
            OperationState::Pending,
            instance.parameters.clone(),
        );
        op.instance_details = instance.instance_details.clone();
        op.instance_details.runtime_id = instance.runtime_id.clone();
        op.global_account_id = instance.global_account_id.clone();
        op.region = instance.provider_region.clone();
        op
    }

    /// A pending update carrying the requested changes.
    ///
    /// The frozen parameters already reflect the changes so the executor
    /// works from the target state.
    pub fn update(id: impl Into<String>, instance: &Instance, params: UpdatingParameters) -> Self {
        let mut op = Self::base(
            id,
            instance.instance_id.clone(),
            OperationType::Update,
            OperationState::Pending,
            instance.parameters.clone(),
        );
        op.instance_details = instance.instance_details.clone();
        op.instance_details.runtime_id = instance.runtime_id.clone();
        op.global_account_id = instance.global_account_id.clone();
        op.region = instance.provider_region.clone();

        let target = &mut op.provisioning_parameters.parameters;
        if let Some(oidc) = params.oidc.as_ref().filter(|o| !o.is_empty()) {
            target.oidc = Some(oidc.clone());
        }
        if !params.administrators.is_empty() {
            target.administrators = params.administrators.clone();
        }
        params.auto_scaler.apply_to(&mut target.auto_scaler);
        if let Some(machine_type) = params.machine_type.as_ref().filter(|m| !m.is_empty()) {
            target.machine_type = Some(machine_type.clone());
        }
        if let Some(pools) = &params.additional_worker_node_pools {
            let plan = Plan::from_id(&instance.service_plan_id);
            if plan.is_some_and(|p| p.supports_additional_worker_node_pools()) {
                target.additional_worker_node_pools = Some(pools.clone());
            }
        }
        op.updating_parameters = Some(params);
        op
    }
}

/// Write-once summary of a fully decommissioned instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceArchived {
    /// Instance identifier.
    pub instance_id: String,
    /// Final global account.
    pub global_account_id: String,
    /// Final sub-account.
    pub subaccount_id: String,
    /// Global account before the first account move.
    pub subscription_global_account_id: String,
    /// Plan at provisioning time.
    pub plan_id: String,
    /// Plan name at provisioning time.
    pub plan_name: String,
    /// Marketplace region the instance was created through.
    pub subaccount_region: String,
    /// Final hyperscaler region.
    pub region: String,
    /// Hyperscaler.
    pub provider: String,
    /// Final runtime ID.
    pub last_runtime_id: String,
    /// Whether the creating user was internal.
    pub internal_user: bool,
    /// Final shoot name.
    pub shoot_name: String,
    /// Creation of the first provisioning.
    pub provisioning_started_at: DateTime<Utc>,
    /// Last change of the first provisioning.
    pub provisioning_finished_at: DateTime<Utc>,
    /// State the first provisioning ended in.
    pub provisioning_state: OperationState,
    /// Creation of the first deprovisioning of any kind (suspension included).
    pub first_deprovisioning_started_at: Option<DateTime<Utc>>,
    /// Last change of the first deprovisioning of any kind.
    pub first_deprovisioning_finished_at: Option<DateTime<Utc>>,
    /// Creation of the first real (non-temporary) deprovisioning.
    pub real_deprovisioning_started_at: Option<DateTime<Utc>>,
    /// Last change of the first real deprovisioning.
    pub real_deprovisioning_finished_at: Option<DateTime<Utc>>,
    /// Last change of the chronologically last operation.
    pub last_deprovisioning_finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_parameters() -> ProvisioningParameters {
        ProvisioningParameters {
            plan_id: "plan".into(),
            service_id: "service".into(),
            ers_context: ErsContext {
                global_account_id: "ga".into(),
                sub_account_id: "sa".into(),
                user_id: "john.smith@example.com".into(),
                ..Default::default()
            },
            parameters: ProvisioningParametersDto {
                name: "cluster".into(),
                region: Some("eu-central-1".into()),
                ..Default::default()
            },
            platform_region: "cf-eu10".into(),
            platform_provider: CloudProvider::Aws,
        }
    }

    #[test]
    fn test_operation_state_round_trips_through_storage_form() {
        for state in [
            OperationState::Pending,
            OperationState::InProgress,
            OperationState::Retrying,
            OperationState::Succeeded,
            OperationState::Failed,
            OperationState::Canceling,
            OperationState::Canceled,
        ] {
            assert_eq!(state.as_str().parse::<OperationState>().unwrap(), state);
        }
        assert!("done".parse::<OperationState>().is_err());
    }

    #[test]
    fn test_is_equal_ignores_active_flag_and_licence_type() {
        let stored = sample_parameters();
        let mut incoming = stored.clone();
        incoming.ers_context.active = Some(true);
        incoming.parameters.licence_type = Some("TestDevelopmentAndDemo".into());
        assert!(stored.is_equal(&incoming));
    }

    #[test]
    fn test_is_equal_detects_cloud_parameter_change() {
        let stored = sample_parameters();
        let mut incoming = stored.clone();
        incoming.parameters.machine_type = Some("m6i.xlarge".into());
        assert!(!stored.is_equal(&incoming));

        let mut incoming = stored.clone();
        incoming.plan_id = "other".into();
        assert!(!stored.is_equal(&incoming));
    }

    #[test]
    fn test_inherit_then_merge_context() {
        let previous = ErsContext {
            tenant_id: "tenant".into(),
            global_account_id: "ga-1".into(),
            sub_account_id: "sa-1".into(),
            user_id: "user".into(),
            license_type: Some("CUSTOMER".into()),
            ..Default::default()
        };
        let incoming = ErsContext {
            global_account_id: "ga-2".into(),
            active: Some(false),
            ..Default::default()
        };

        let merged = ErsContext::default()
            .inherit_missing(&previous)
            .merge_update(&incoming);

        assert_eq!(merged.tenant_id, "tenant");
        assert_eq!(merged.global_account_id, "ga-2");
        assert_eq!(merged.sub_account_id, "sa-1");
        assert_eq!(merged.license_type.as_deref(), Some("CUSTOMER"));
        assert_eq!(merged.active, None);
    }

    #[test]
    fn test_context_decodes_platform_field_names() {
        let ctx: ErsContext = serde_json::from_str(
            r#"{"globalaccount_id":"ga","subaccount_id":"sa","user_id":"u","active":false,"license_type":"PARTNER"}"#,
        )
        .unwrap();
        assert_eq!(ctx.global_account_id, "ga");
        assert_eq!(ctx.active, Some(false));
        assert!(ctx.is_external_license_type());
    }

    fn sample_instance(plan: Plan) -> Instance {
        Instance {
            instance_id: "inst".into(),
            runtime_id: "rt".into(),
            global_account_id: "ga".into(),
            subscription_global_account_id: String::new(),
            sub_account_id: "sa".into(),
            service_id: "service".into(),
            service_name: "kymaruntime".into(),
            service_plan_id: plan.id().into(),
            service_plan_name: plan.name().into(),
            dashboard_url: String::new(),
            parameters: sample_parameters(),
            provider_region: "eu-central-1".into(),
            provider: CloudProvider::Aws,
            instance_details: InstanceDetails::default(),
            last_operation_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expired_at: None,
            deleted_at: None,
            version: 0,
        }
    }

    #[test]
    fn test_update_operation_freezes_target_parameters() {
        let instance = sample_instance(Plan::Aws);
        let op = Operation::update(
            "op",
            &instance,
            UpdatingParameters {
                machine_type: Some("m6i.2xlarge".into()),
                administrators: vec!["admin@example.com".into()],
                ..Default::default()
            },
        );

        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.instance_details.runtime_id, "rt");
        assert_eq!(
            op.provisioning_parameters.parameters.machine_type.as_deref(),
            Some("m6i.2xlarge")
        );
        assert_eq!(
            op.provisioning_parameters.parameters.administrators,
            vec!["admin@example.com".to_string()]
        );
    }

    #[test]
    fn test_update_operation_skips_empty_oidc_and_unsupported_pools() {
        let mut instance = sample_instance(Plan::Trial);
        instance.parameters.parameters.oidc = Some(OidcConfig {
            client_id: "c".into(),
            issuer_url: "https://issuer.example.com".into(),
            ..Default::default()
        });
        let op = Operation::update(
            "op",
            &instance,
            UpdatingParameters {
                oidc: Some(OidcConfig::default()),
                additional_worker_node_pools: Some(vec![AdditionalWorkerNodePool {
                    name: "worker-1".into(),
                    machine_type: "m6i.large".into(),
                    ha_zones: false,
                    auto_scaler_min: 0,
                    auto_scaler_max: 3,
                }]),
                ..Default::default()
            },
        );

        let frozen = &op.provisioning_parameters.parameters;
        assert_eq!(frozen.oidc, instance.parameters.parameters.oidc);
        assert_eq!(frozen.additional_worker_node_pools, None);
    }
}
