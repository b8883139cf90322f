//! Strimzi resource descriptors
//!
//! The operator does not own the `KafkaUser`/`KafkaTopic` CRDs; Strimzi
//! does. Mirrored objects are therefore handled as [`DynamicObject`]s so that
//! every spec field is forwarded verbatim, and only the handful of fields the
//! operator reads are modelled here as typed views.

use crate::error::Result;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// API group of the Strimzi resources
pub const STRIMZI_GROUP: &str = "kafka.strimzi.io";

/// Default API version of the Strimzi resources
pub const DEFAULT_STRIMZI_API_VERSION: &str = "v1beta2";

/// Label Strimzi puts on the secret generated for a `KafkaUser`
pub const STRIMZI_KIND_LABEL: &str = "strimzi.io/kind";

/// Value of [`STRIMZI_KIND_LABEL`] on generated user secrets
pub const STRIMZI_KIND_KAFKA_USER: &str = "KafkaUser";

/// Key under which handler outcomes are merged into `.status`
pub const STATUS_KEY: &str = "knuto";

/// API resources the operator reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrimziResources {
    /// `kafka.strimzi.io/*` KafkaUser
    pub kafka_user: ApiResource,
    /// `kafka.strimzi.io/*` KafkaTopic
    pub kafka_topic: ApiResource,
    /// core/v1 Secret
    pub secret: ApiResource,
}

impl StrimziResources {
    /// Build the descriptors for a Strimzi API version (e.g. `v1beta2`)
    pub fn new(version: &str) -> Self {
        Self {
            kafka_user: strimzi_resource(version, "KafkaUser", "kafkausers"),
            kafka_topic: strimzi_resource(version, "KafkaTopic", "kafkatopics"),
            secret: ApiResource::erase::<Secret>(&()),
        }
    }
}

impl Default for StrimziResources {
    fn default() -> Self {
        Self::new(DEFAULT_STRIMZI_API_VERSION)
    }
}

fn strimzi_resource(version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: STRIMZI_GROUP.to_string(),
        version: version.to_string(),
        api_version: format!("{}/{}", STRIMZI_GROUP, version),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// Typed view of a `KafkaUser` spec
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaUserSpec {
    /// Authorization settings, absent when the user has no ACLs
    #[serde(default)]
    pub authorization: Option<KafkaUserAuthorization>,
}

impl KafkaUserSpec {
    /// ACL rules declared by the user, in declaration order
    pub fn acls(&self) -> &[AclRule] {
        self.authorization
            .as_ref()
            .map(|a| a.acls.as_slice())
            .unwrap_or_default()
    }
}

/// `spec.authorization` of a `KafkaUser`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaUserAuthorization {
    /// Authorization type, `simple` for ACL based authorization
    #[serde(default, rename = "type")]
    pub authorization_type: Option<String>,

    /// ACL rules
    #[serde(default)]
    pub acls: Vec<AclRule>,
}

/// One ACL rule as declared on a `KafkaUser`.
///
/// Discriminators are kept as plain strings; unsupported values are
/// rejected by the policy engine, not by deserialization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRule {
    /// Resource the rule applies to
    pub resource: AclRuleResource,

    /// Requested operation
    #[serde(default)]
    pub operation: String,
}

/// `resource` of an ACL rule
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRuleResource {
    /// `topic`, `group`, `cluster` or `transactionalId`
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Resource name or name prefix
    #[serde(default)]
    pub name: String,

    /// `literal` or `prefix`
    #[serde(default = "default_pattern_type")]
    pub pattern_type: String,
}

fn default_pattern_type() -> String {
    "literal".to_string()
}

/// Typed view of a `KafkaTopic` spec
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicSpec {
    /// Kafka topic name when it differs from the object name
    #[serde(default)]
    pub topic_name: Option<String>,
}

/// Handler outcome merged into `.status.knuto` of the tenant object.
///
/// Every field is serialized, including `null`s, so that a merge patch
/// clears outcomes left over from earlier reconciliations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MirrorStatus {
    /// Location of a newly created mirror
    pub copied_to: Option<String>,
    /// Location of an updated mirror
    pub updated: Option<String>,
    /// ACL policy violation preventing the mirror
    pub acl_not_allowed: Option<String>,
    /// Naming policy violation preventing the mirror
    pub policy_violation: Option<String>,
    /// Deletion was not propagated
    pub not_deleting: Option<String>,
}

impl MirrorStatus {
    /// Whether the status carries no outcome at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Outcome last reported on `obj`, `None` if absent or unreadable
    pub fn of(obj: &DynamicObject) -> Option<Self> {
        let status = obj.data.get("status")?.get(STATUS_KEY)?;
        serde_json::from_value(status.clone()).ok()
    }

    /// The `.status` merge patch for this outcome
    pub fn to_patch(&self) -> Result<serde_json::Value> {
        let mut status = serde_json::Map::new();
        status.insert(STATUS_KEY.to_string(), serde_json::to_value(self)?);
        Ok(serde_json::json!({ "status": status }))
    }
}

/// Deserialize `.spec` of a dynamic object into a typed view.
///
/// A missing spec yields the view's default.
pub fn spec_of<T: DeserializeOwned + Default>(obj: &DynamicObject) -> Result<T> {
    match obj.data.get("spec") {
        Some(spec) if !spec.is_null() => Ok(serde_json::from_value(spec.clone())?),
        _ => Ok(T::default()),
    }
}
