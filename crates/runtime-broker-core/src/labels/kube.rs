// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! [`CustomResourceClient`] over the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use ::kube::api::{Api, DynamicObject, GroupVersionKind, PostParams};
use ::kube::discovery::ApiResource;
use ::kube::Client;

use super::{ClientError, CustomResourceClient, ResourceKind, ResourceObject};

fn api_resource(kind: &ResourceKind) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(kind.group, kind.version, kind.kind))
}

fn client_error(err: ::kube::Error) -> ClientError {
    ClientError::new(err.to_string())
}

fn metadata_error(err: serde_json::Error) -> ClientError {
    ClientError::new(format!("invalid object metadata: {}", err))
}

/// Split a fetched object into labels and the metadata kept verbatim.
fn from_dynamic(
    name: &str,
    namespace: &str,
    mut object: DynamicObject,
) -> Result<ResourceObject, ClientError> {
    let labels = object.metadata.labels.take().unwrap_or_default();
    let metadata = match serde_json::to_value(&object.metadata).map_err(metadata_error)? {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    Ok(ResourceObject {
        name: name.to_string(),
        namespace: namespace.to_string(),
        labels,
        metadata,
        data: object.data,
    })
}

/// Rebuild the full object; only the labels differ from what was fetched.
fn into_dynamic(resource: &ApiResource, object: &ResourceObject) -> Result<DynamicObject, ClientError> {
    let mut metadata: ObjectMeta =
        serde_json::from_value(serde_json::Value::Object(object.metadata.clone()))
            .map_err(metadata_error)?;
    metadata.name = Some(object.name.clone());
    metadata.namespace = Some(object.namespace.clone());
    metadata.labels = Some(object.labels.clone());

    let mut dynamic = DynamicObject::new(&object.name, resource);
    dynamic.metadata = metadata;
    dynamic.data = object.data.clone();
    Ok(dynamic)
}

/// Dynamic-object client for the control plane cluster.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with the ambient kubeconfig or in-cluster configuration.
    pub async fn try_default() -> Result<Self, ClientError> {
        Ok(Self::new(Client::try_default().await.map_err(client_error)?))
    }
}

#[async_trait]
impl CustomResourceClient for KubeResourceClient {
    async fn crd_installed(&self, kind: &ResourceKind) -> Result<bool, ClientError> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd = crds.get_opt(&kind.crd_name()).await.map_err(client_error)?;
        Ok(crd.is_some())
    }

    async fn fetch(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ResourceObject, ClientError> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &api_resource(kind));
        let object = api.get(name).await.map_err(client_error)?;
        from_dynamic(name, namespace, object)
    }

    async fn write(&self, kind: &ResourceKind, object: &ResourceObject) -> Result<(), ClientError> {
        let resource = api_resource(kind);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &object.namespace, &resource);
        let dynamic = into_dynamic(&resource, object)?;

        api.replace(&object.name, &PostParams::default(), &dynamic)
            .await
            .map_err(client_error)?;
        Ok(())
    }
}
