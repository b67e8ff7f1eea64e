// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Global account label on the custom resources of a runtime.
//!
//! After an account move, the Kyma, GardenerCluster and Runtime resources in
//! the control plane namespace carry a stale
//! `kyma-project.io/global-account-id` label. [`LabelPropagator`] rewrites it
//! on each of them. A kind whose CRD is not installed is skipped. A failure
//! on one kind does not stop the others; every failure is collected into one
//! [`LabelPropagationError`].

#[cfg(feature = "kube")]
pub mod kube;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument};

/// Namespace holding the runtime resources.
pub const KCP_NAMESPACE: &str = "kcp-system";
/// Label carrying the owning global account.
pub const GLOBAL_ACCOUNT_ID_LABEL: &str = "kyma-project.io/global-account-id";

/// Group, version and kind of a custom resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// API group.
    pub group: &'static str,
    /// API version within the group.
    pub version: &'static str,
    /// Kind.
    pub kind: &'static str,
}

impl ResourceKind {
    /// `group/version`.
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    /// Name of the CRD defining this kind.
    pub fn crd_name(&self) -> String {
        format!("{}s.{}", self.kind.to_lowercase(), self.group)
    }
}

/// Kyma resource.
pub const KYMA: ResourceKind = ResourceKind {
    group: "operator.kyma-project.io",
    version: "v1beta2",
    kind: "Kyma",
};
/// GardenerCluster resource.
pub const GARDENER_CLUSTER: ResourceKind = ResourceKind {
    group: "infrastructuremanager.kyma-project.io",
    version: "v1",
    kind: "GardenerCluster",
};
/// Runtime resource.
pub const RUNTIME: ResourceKind = ResourceKind {
    group: "infrastructuremanager.kyma-project.io",
    version: "v1",
    kind: "Runtime",
};

/// Resources labelled on an account move, in processing order.
pub const DEPENDENT_RESOURCES: [ResourceKind; 3] = [KYMA, GARDENER_CLUSTER, RUNTIME];

/// A fetched custom resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceObject {
    /// Object name.
    pub name: String,
    /// Object namespace.
    pub namespace: String,
    /// Object labels.
    pub labels: BTreeMap<String, String>,
    /// Remaining metadata as fetched (annotations, finalizers, owner
    /// references, resource version); written back unchanged.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Everything outside the metadata.
    pub data: serde_json::Value,
}

/// Failure reported by a [`CustomResourceClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ClientError {
    /// Description from the cluster client.
    pub message: String,
}

impl ClientError {
    /// Wrap a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Minimal access to custom resources in the control plane cluster.
#[async_trait]
pub trait CustomResourceClient: Send + Sync {
    /// Whether the CRD of `kind` is installed.
    async fn crd_installed(&self, kind: &ResourceKind) -> Result<bool, ClientError>;

    /// Fetch one object.
    async fn fetch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceObject, ClientError>;

    /// Replace one object.
    async fn write(&self, kind: &ResourceKind, object: &ResourceObject) -> Result<(), ClientError>;
}

/// Failure to label one resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceLabelError {
    /// CRD lookup failed.
    #[error("while checking existence of CRD for {kind}: {source}")]
    CrdLookup {
        /// Resource kind.
        kind: &'static str,
        /// Client failure.
        source: ClientError,
    },

    /// Object could not be read.
    #[error(
        "while getting k8s object of type {kind} from kcp cluster for instance {name}, due to: {source}"
    )]
    Fetch {
        /// Resource kind.
        kind: &'static str,
        /// Object name.
        name: String,
        /// Client failure.
        source: ClientError,
    },

    /// Object could not be written back.
    #[error("while updating k8s object {name} {kind}, because: {source}")]
    Write {
        /// Resource kind.
        kind: &'static str,
        /// Object name.
        name: String,
        /// Client failure.
        source: ClientError,
    },
}

/// Every per-resource failure of one propagation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPropagationError(Vec<ResourceLabelError>);

impl LabelPropagationError {
    /// Failures in processing order.
    pub fn errors(&self) -> &[ResourceLabelError] {
        &self.0
    }
}

impl fmt::Display for LabelPropagationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for LabelPropagationError {}

/// Rewrites the global account label of a runtime's resources.
#[async_trait]
pub trait LabelUpdater: Send + Sync {
    /// Set the label on every dependent resource of `runtime_id`.
    async fn update_labels(
        &self,
        runtime_id: &str,
        global_account_id: &str,
    ) -> Result<(), LabelPropagationError>;
}

/// [`LabelUpdater`] over a [`CustomResourceClient`].
#[derive(Clone)]
pub struct LabelPropagator {
    client: Arc<dyn CustomResourceClient>,
    namespace: String,
}

impl LabelPropagator {
    /// Propagate through `client` in the default namespace.
    pub fn new(client: Arc<dyn CustomResourceClient>) -> Self {
        Self {
            client,
            namespace: KCP_NAMESPACE.to_string(),
        }
    }

    /// Use another namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    async fn update_one(
        &self,
        kind: &ResourceKind,
        runtime_id: &str,
        global_account_id: &str,
    ) -> Result<(), ResourceLabelError> {
        let installed = self
            .client
            .crd_installed(kind)
            .await
            .map_err(|source| ResourceLabelError::CrdLookup {
                kind: kind.kind,
                source,
            })?;
        if !installed {
            info!(kind = kind.kind, "CRD not installed, skipping");
            return Ok(());
        }

        let mut object = self
            .client
            .fetch(kind, &self.namespace, runtime_id)
            .await
            .map_err(|source| ResourceLabelError::Fetch {
                kind: kind.kind,
                name: runtime_id.to_string(),
                source,
            })?;
        object.labels.insert(
            GLOBAL_ACCOUNT_ID_LABEL.to_string(),
            global_account_id.to_string(),
        );
        self.client
            .write(kind, &object)
            .await
            .map_err(|source| ResourceLabelError::Write {
                kind: kind.kind,
                name: runtime_id.to_string(),
                source,
            })
    }
}

#[async_trait]
impl LabelUpdater for LabelPropagator {
    #[instrument(skip(self))]
    async fn update_labels(
        &self,
        runtime_id: &str,
        global_account_id: &str,
    ) -> Result<(), LabelPropagationError> {
        let mut errors = Vec::new();
        for kind in &DEPENDENT_RESOURCES {
            match self.update_one(kind, runtime_id, global_account_id).await {
                Ok(()) => info!(kind = kind.kind, "Global account label updated"),
                Err(err) => {
                    error!(kind = kind.kind, error = %err, "Failed to update global account label");
                    errors.push(err);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LabelPropagationError(errors))
        }
    }
}

impl fmt::Debug for LabelPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelPropagator")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
