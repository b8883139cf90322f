//! Provenance annotations
//!
//! Every object written by the operator records where it came from:
//!
//! - `knuto.niradynamics.se/source`: `{source-namespace}/{source-name}`
//! - `knuto.niradynamics.se/created`: `"true"`
//!
//! The `source` annotation on a mirrored `KafkaUser` is the only reliable
//! way back to the tenant namespace, because mirrored names are
//! `{namespace}-{name}` and namespaces may contain `-` themselves.

use crate::error::Result;
use crate::naming;
use crate::store::ObjectStore;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use std::fmt;
use tracing::{debug, info, warn};

/// Annotation recording the source object of a mirror
pub const SOURCE_ANNOTATION: &str = "knuto.niradynamics.se/source";

/// Annotation marking objects created by the operator
pub const CREATED_ANNOTATION: &str = "knuto.niradynamics.se/created";

/// Namespace and name of the object a mirror was derived from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub namespace: String,
    pub name: String,
}

impl SourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Source reference of an existing object
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        Some(Self::new(obj.meta().namespace.clone()?, obj.meta().name.clone()?))
    }

    /// Parse a `{namespace}/{name}` annotation value.
    ///
    /// Namespaces and names cannot contain `/`, so anything but exactly one
    /// separator between two non-empty parts is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let (namespace, name) = value.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Stamp both provenance annotations onto `obj`
pub fn stamp<K: Resource>(obj: &mut K, source: &SourceRef) {
    let annotations = obj.annotations_mut();
    annotations.insert(SOURCE_ANNOTATION.to_string(), source.to_string());
    annotations.insert(CREATED_ANNOTATION.to_string(), "true".to_string());
}

/// Source recorded on `obj`, `None` if absent or malformed
pub fn source_of<K: Resource>(obj: &K) -> Option<SourceRef> {
    let value = obj.annotations().get(SOURCE_ANNOTATION)?;
    let source = SourceRef::parse(value);
    if source.is_none() {
        warn!(
            name = %obj.meta().name.as_deref().unwrap_or_default(),
            value = %value,
            "Ignoring malformed provenance annotation"
        );
    }
    source
}

/// Whether `obj` was written by the operator
pub fn is_system_created<K: Resource>(obj: &K) -> bool {
    obj.annotations()
        .get(CREATED_ANNOTATION)
        .is_some_and(|v| v == "true")
}

/// Resolve the tenant source of the mirrored `KafkaUser` named `mirrored_user`.
///
/// Loads the user from `destination_namespace` and reads its `source`
/// annotation. Returns `None` when the user does not exist, was not created
/// by the operator, or its annotation does not match its name.
pub async fn resolve_source(
    store: &dyn ObjectStore,
    kafka_user: &ApiResource,
    destination_namespace: &str,
    mirrored_user: &str,
) -> Result<Option<SourceRef>> {
    let Some(user) = store
        .get(kafka_user, destination_namespace, mirrored_user)
        .await?
    else {
        info!(
            namespace = %destination_namespace,
            name = %mirrored_user,
            "No KafkaUser found for secret, skipping"
        );
        return Ok(None);
    };

    let Some(source) = source_of(&user) else {
        info!(
            namespace = %destination_namespace,
            name = %mirrored_user,
            "Skipping secret, KafkaUser has no {} annotation",
            SOURCE_ANNOTATION
        );
        return Ok(None);
    };

    if naming::recover_tenant(mirrored_user, &source).is_none() {
        warn!(
            namespace = %destination_namespace,
            name = %mirrored_user,
            source = %source,
            "Provenance annotation does not match the mirrored name, skipping"
        );
        return Ok(None);
    }

    debug!(name = %mirrored_user, source = %source, "Resolved KafkaUser provenance");
    Ok(Some(source))
}

/// Tenant namespace of the mirrored `KafkaUser` named `mirrored_user`
pub async fn resolve_source_namespace(
    store: &dyn ObjectStore,
    kafka_user: &ApiResource,
    destination_namespace: &str,
    mirrored_user: &str,
) -> Result<Option<String>> {
    Ok(
        resolve_source(store, kafka_user, destination_namespace, mirrored_user)
            .await?
            .map(|source| source.namespace),
    )
}
