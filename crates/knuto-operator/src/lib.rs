//! # Knuto Kubernetes Operator
//!
//! Multi-tenant front end for a shared Strimzi Kafka cluster.
//!
//! Tenants declare Strimzi `KafkaUser` and `KafkaTopic` objects in their own
//! namespaces. The operator validates them against a namespace isolation
//! policy and mirrors the accepted ones into the single namespace watched by
//! Strimzi. The credentials Strimzi generates for a mirrored user are copied
//! back to the tenant as a ready-to-use client configuration secret.
//!
//! ## Architecture
//!
//! - **Mirror controllers**: one kube-runtime controller per tenant kind
//!   (`KafkaUser`, `KafkaTopic`). Tenant objects carry a finalizer so
//!   deletions can be propagated; handler outcomes are merged into
//!   `.status.knuto` of the tenant object.
//! - **Secret controller**: watches secrets labelled
//!   `strimzi.io/kind=KafkaUser` in the Strimzi namespace and writes
//!   `{user}-kafka-config` secrets owned by the tenant `KafkaUser`.
//! - **Provenance**: every written object is annotated with
//!   `knuto.niradynamics.se/source` and `knuto.niradynamics.se/created`.
//!   Mirrored names are `{namespace}-{name}`; since namespaces may contain
//!   `-`, the way back to a tenant is always the `source` annotation.
//!
//! ## Naming
//!
//! | Tenant object             | Mirror                              |
//! |---------------------------|-------------------------------------|
//! | `KafkaUser` `ns/svc`      | `KafkaUser` `{strimzi}/ns-svc`      |
//! | `KafkaTopic` `ns/ns-t`    | `KafkaTopic` `{strimzi}/ns-t`       |
//! | Secret `{strimzi}/ns-svc` | Secret `ns/svc-kafka-config`        |
//!
//! ## ACL policy
//!
//! Only `topic` and `group` resources, `Read` and `Write` operations and
//! `literal`/`prefix` patterns are accepted. A resource name outside the
//! tenant's `{namespace}-` prefix needs either the cross-namespace flag of
//! the operation or an entry in its allowlist.
//!
//! ## Metrics
//!
//! - `knuto_{user,topic,secret}_reconciliations_total`
//! - `knuto_{user,topic,secret}_errors_total`
//! - `knuto_{user,topic,secret}_duration_seconds`
//! - `knuto_policy_violations_total`

pub mod config;
pub mod context;
pub mod controller;
pub mod crd;
pub mod error;
pub mod naming;
pub mod policy;
pub mod provenance;
pub mod replication;
pub mod secret_controller;
pub mod secrets;
pub mod store;
pub mod topic_controller;
pub mod user_controller;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::config::{NamespacePolicy, OperatorConfig};
    pub use crate::context::OperatorContext;
    pub use crate::controller::{run_mirror_controller, MirrorHandler};
    pub use crate::crd::{MirrorStatus, StrimziResources};
    pub use crate::error::{OperatorError, Result};
    pub use crate::policy::{AclEntry, PolicyEngine, PolicyViolation};
    pub use crate::provenance::SourceRef;
    pub use crate::replication::{ReplicationEngine, UpsertOutcome};
    pub use crate::secret_controller::run_secret_controller;
    pub use crate::secrets::{CredentialType, SecretTransformer};
    pub use crate::store::{KubeStore, ObjectStore};
    pub use crate::topic_controller::TopicMirror;
    pub use crate::user_controller::UserMirror;
}
