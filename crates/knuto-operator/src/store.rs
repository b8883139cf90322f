//! Object store access
//!
//! The mirroring logic talks to the cluster through [`ObjectStore`], a small
//! CRUD surface over named, namespaced [`DynamicObject`]s. [`KubeStore`] is
//! the production implementation; unit tests use an in-memory store.

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::debug;

/// CRUD access to namespaced objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` if it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Create an object; fails with [`OperatorError::AlreadyExists`] if the name is taken
    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; `obj` must carry the resource version it was read at
    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object; fails with [`OperatorError::NotFound`] if it is gone
    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    /// Merge `patch` into the status subresource of an object
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()>;

    /// Whether an object exists
    async fn exists(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.get(resource, namespace, name).await?.is_some())
    }
}

/// Namespace and name of an object, which must both be set
pub fn coordinates(obj: &DynamicObject) -> Result<(String, String)> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| OperatorError::Internal(format!("{} has no namespace", obj.name_any())))?;
    let name = obj
        .metadata
        .name
        .clone()
        .ok_or_else(|| OperatorError::Internal("object has no name".to_string()))?;
    Ok((namespace, name))
}

/// [`ObjectStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

/// Translate API errors into the operator taxonomy
fn classify(err: kube::Error, resource: &ApiResource, namespace: &str, name: &str) -> OperatorError {
    match err {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            OperatorError::AlreadyExists {
                kind: resource.kind.clone(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => OperatorError::Conflict {
            kind: resource.kind.clone(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound {
            kind: resource.kind.clone(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        },
        other => OperatorError::KubeError(other),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(e, resource, namespace, name))
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let (namespace, name) = coordinates(obj)?;
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "Creating object");
        self.api(resource, &namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, resource, &namespace, &name))
    }

    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let (namespace, name) = coordinates(obj)?;
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "Replacing object");
        self.api(resource, &namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, resource, &namespace, &name))
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "Deleting object");
        self.api(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, resource, namespace, name))
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.api(resource, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map(|_| ())
            .map_err(|e| classify(e, resource, namespace, name))
    }
}
