//! Mirroring of objects between namespaces
//!
//! A mirror is a deep copy of the source object with every server-assigned
//! metadata field removed, relocated to its destination coordinates and
//! stamped with provenance. [`ReplicationEngine::upsert`] then writes it
//! with a read-then-write sequence that tolerates losing a create race.

use crate::crd::KafkaTopicSpec;
use crate::error::{OperatorError, Result};
use crate::naming;
use crate::provenance::{self, SourceRef};
use crate::store::{coordinates, ObjectStore};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::Resource;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Where a mirror is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    pub namespace: String,
    pub name: String,
}

impl MirrorTarget {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MirrorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kinds mirrored into the Strimzi namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorKind {
    /// Renamed `{namespace}-{name}`
    User,
    /// Keeps its name, which already carries the tenant prefix
    Topic,
}

impl MirrorKind {
    /// Destination of the mirror of `source`
    pub fn target(&self, source: &SourceRef, destination_namespace: &str) -> MirrorTarget {
        let name = match self {
            MirrorKind::User => naming::mirrored_name(&source.namespace, &source.name),
            MirrorKind::Topic => source.name.clone(),
        };
        MirrorTarget::new(destination_namespace, name)
    }
}

impl fmt::Display for MirrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorKind::User => f.write_str("KafkaUser"),
            MirrorKind::Topic => f.write_str("KafkaTopic"),
        }
    }
}

/// A `KafkaTopic` whose effective topic name lacks the tenant prefix
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Topic name should be prefixed with {namespace}-")]
pub struct NamingPolicyViolation {
    pub namespace: String,
    pub topic_name: String,
}

/// Check that the effective topic name (`spec.topicName`, else the object
/// name) is prefixed with `{namespace}-`
pub fn check_topic_name(
    namespace: &str,
    name: &str,
    spec: &KafkaTopicSpec,
) -> std::result::Result<(), NamingPolicyViolation> {
    let topic_name = spec.topic_name.as_deref().unwrap_or(name);
    if naming::is_tenant_scoped(topic_name, namespace) {
        Ok(())
    } else {
        Err(NamingPolicyViolation {
            namespace: namespace.to_string(),
            topic_name: topic_name.to_string(),
        })
    }
}

/// Remove every metadata field the API server assigns
pub fn strip_server_metadata(meta: &mut ObjectMeta) {
    meta.resource_version = None;
    meta.self_link = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.finalizers = None;
    meta.owner_references = None;
    meta.managed_fields = None;
}

/// Copy `object` to `target`, recording `source` as its provenance
pub fn mirror<K>(object: &K, source: &SourceRef, target: &MirrorTarget) -> K
where
    K: Resource + Clone,
{
    let mut copy = object.clone();
    let meta = copy.meta_mut();
    strip_server_metadata(meta);
    meta.namespace = Some(target.namespace.clone());
    meta.name = Some(target.name.clone());
    meta.generate_name = None;
    provenance::stamp(&mut copy, source);
    copy
}

/// Mirror a dynamic object, dropping its status
pub fn mirror_dynamic(object: &DynamicObject, source: &SourceRef, target: &MirrorTarget) -> DynamicObject {
    let mut copy = mirror(object, source, target);
    if let Some(data) = copy.data.as_object_mut() {
        data.remove("status");
    }
    copy
}

/// Convert a typed object into the dynamic form the store works with
pub fn to_dynamic<K: serde::Serialize>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Writes mirrors through an [`ObjectStore`]
#[derive(Clone)]
pub struct ReplicationEngine {
    store: Arc<dyn ObjectStore>,
}

impl ReplicationEngine {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Create `draft`, or update it in place if it already exists.
    ///
    /// An existing object is only replaced when it was mirrored from the
    /// same source as `draft`; anything else fails with
    /// [`OperatorError::ForeignObject`]. The existence check and the create
    /// are not atomic. When the create loses against a concurrent writer it
    /// is retried once as an update.
    pub async fn upsert(&self, resource: &ApiResource, draft: &DynamicObject) -> Result<UpsertOutcome> {
        let (namespace, name) = coordinates(draft)?;
        let source = provenance::source_of(draft).ok_or_else(|| {
            OperatorError::Internal(format!(
                "{} {}/{} carries no provenance",
                resource.kind, namespace, name
            ))
        })?;

        if let Some(existing) = self.store.get(resource, &namespace, &name).await? {
            ensure_owned(resource, &existing, &source)?;
            info!(kind = %resource.kind, namespace = %namespace, name = %name, "Updating object");
            self.update_from(resource, draft, &existing).await?;
            return Ok(UpsertOutcome::Updated);
        }

        info!(kind = %resource.kind, namespace = %namespace, name = %name, "Creating object");
        match self.store.create(resource, draft).await {
            Ok(_) => Ok(UpsertOutcome::Created),
            Err(OperatorError::AlreadyExists { .. }) => {
                warn!(
                    kind = %resource.kind,
                    namespace = %namespace,
                    name = %name,
                    "Object appeared concurrently, retrying as update"
                );
                let existing = self
                    .store
                    .get(resource, &namespace, &name)
                    .await?
                    .ok_or_else(|| OperatorError::Conflict {
                        kind: resource.kind.clone(),
                        name: name.clone(),
                        namespace: namespace.clone(),
                    })?;
                ensure_owned(resource, &existing, &source)?;
                self.update_from(resource, draft, &existing).await?;
                Ok(UpsertOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace `existing` with `draft`, keeping what other controllers own
    async fn update_from(
        &self,
        resource: &ApiResource,
        draft: &DynamicObject,
        existing: &DynamicObject,
    ) -> Result<()> {
        let mut update = draft.clone();
        update.metadata.resource_version = existing.metadata.resource_version.clone();
        if update.metadata.finalizers.is_none() {
            update.metadata.finalizers = existing.metadata.finalizers.clone();
        }
        if update.metadata.owner_references.is_none() {
            update.metadata.owner_references = existing.metadata.owner_references.clone();
        }
        self.store.replace(resource, &update).await?;
        Ok(())
    }

    /// Delete the mirror of `source` at `namespace/name`.
    ///
    /// Returns whether something was deleted. Objects that do not exist or
    /// were mirrored from a different source are left alone.
    pub async fn delete_if_exists(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        source: &SourceRef,
    ) -> Result<bool> {
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "Checking if object exists");
        let Some(existing) = self.store.get(resource, namespace, name).await? else {
            return Ok(false);
        };
        if !is_mirror_of(&existing, source) {
            warn!(
                kind = %resource.kind,
                namespace = %namespace,
                name = %name,
                source = %source,
                "Not deleting object mirrored from another source"
            );
            return Ok(false);
        }

        info!(kind = %resource.kind, namespace = %namespace, name = %name, "Deleting object");
        match self.store.delete(resource, namespace, name).await {
            Ok(()) => Ok(true),
            Err(OperatorError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Whether `obj` was written by the operator as the mirror of `source`
pub fn is_mirror_of(obj: &DynamicObject, source: &SourceRef) -> bool {
    provenance::is_system_created(obj) && provenance::source_of(obj).as_ref() == Some(source)
}

fn ensure_owned(resource: &ApiResource, existing: &DynamicObject, source: &SourceRef) -> Result<()> {
    if is_mirror_of(existing, source) {
        return Ok(());
    }
    let (namespace, name) = coordinates(existing)?;
    warn!(
        kind = %resource.kind,
        namespace = %namespace,
        name = %name,
        requested_by = %source,
        "Refusing to overwrite object not mirrored from this source"
    );
    Err(OperatorError::ForeignObject {
        kind: resource.kind.clone(),
        name,
        namespace,
        requested_by: source.to_string(),
    })
}
