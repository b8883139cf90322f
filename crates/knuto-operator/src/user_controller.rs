//! KafkaUser mirroring
//!
//! A tenant `KafkaUser` is checked against the namespace ACL policy and, if
//! allowed, copied into the destination namespace as `{namespace}-{name}`
//! where the Strimzi user operator picks it up.

use crate::context::OperatorContext;
use crate::controller::{mirror_status, MirrorHandler};
use crate::crd::{spec_of, KafkaUserSpec, MirrorStatus};
use crate::error::Result;
use crate::policy::AclEntry;
use crate::provenance::SourceRef;
use crate::replication::{mirror_dynamic, MirrorKind};
use crate::store::coordinates;
use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{info, instrument, warn};

/// [`MirrorHandler`] for `KafkaUser`
#[derive(Debug, Clone, Copy, Default)]
pub struct UserMirror;

#[async_trait]
impl MirrorHandler for UserMirror {
    fn kind(&self) -> MirrorKind {
        MirrorKind::User
    }

    #[instrument(skip_all, fields(name = ?user.metadata.name, namespace = ?user.metadata.namespace))]
    async fn apply(&self, ctx: &OperatorContext, user: &DynamicObject) -> Result<MirrorStatus> {
        let (namespace, name) = coordinates(user)?;
        let spec: KafkaUserSpec = spec_of(user)?;
        let entries: Vec<AclEntry> = spec.acls().iter().map(AclEntry::from).collect();

        if let Err(violation) = ctx.policy().validate(&namespace, &entries) {
            warn!(namespace = %namespace, name = %name, %violation, "KafkaUser not mirrored");
            metrics::counter!("knuto_policy_violations_total", "kind" => "acl").increment(1);
            return Ok(MirrorStatus {
                acl_not_allowed: Some(violation.to_string()),
                ..Default::default()
            });
        }

        let source = SourceRef::new(namespace, name);
        let target = self.kind().target(&source, ctx.destination_namespace());
        let draft = mirror_dynamic(user, &source, &target);

        let result = ctx
            .replication()
            .upsert(&ctx.resources.kafka_user, &draft)
            .await;
        if let Ok(outcome) = &result {
            info!(source = %source, target = %target, ?outcome, "KafkaUser mirrored");
        }

        mirror_status(user, &target, result)
    }

    #[instrument(skip_all, fields(name = ?user.metadata.name, namespace = ?user.metadata.namespace))]
    async fn cleanup(&self, ctx: &OperatorContext, user: &DynamicObject) -> Result<MirrorStatus> {
        let (namespace, name) = coordinates(user)?;
        let source = SourceRef::new(namespace, name);
        let target = self.kind().target(&source, ctx.destination_namespace());

        let deleted = ctx
            .replication()
            .delete_if_exists(&ctx.resources.kafka_user, &target.namespace, &target.name, &source)
            .await?;
        if deleted {
            info!(target = %target, "Deleted mirrored KafkaUser");
        } else {
            info!(target = %target, "No mirrored KafkaUser of ours to delete");
        }

        Ok(MirrorStatus::default())
    }
}
