//! KafkaTopic mirroring
//!
//! Tenant topics keep their name when mirrored; the name must already carry
//! the `{namespace}-` prefix. Deletions are only propagated when topic
//! deletion is enabled, otherwise the Kafka topic outlives its declaration.

use crate::context::OperatorContext;
use crate::controller::{mirror_status, MirrorHandler};
use crate::crd::{spec_of, KafkaTopicSpec, MirrorStatus};
use crate::error::Result;
use crate::provenance::SourceRef;
use crate::replication::{check_topic_name, mirror_dynamic, MirrorKind};
use crate::store::coordinates;
use async_trait::async_trait;
use kube::api::DynamicObject;
use tracing::{info, instrument, warn};

/// [`MirrorHandler`] for `KafkaTopic`
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicMirror;

#[async_trait]
impl MirrorHandler for TopicMirror {
    fn kind(&self) -> MirrorKind {
        MirrorKind::Topic
    }

    #[instrument(skip_all, fields(name = ?topic.metadata.name, namespace = ?topic.metadata.namespace))]
    async fn apply(&self, ctx: &OperatorContext, topic: &DynamicObject) -> Result<MirrorStatus> {
        let (namespace, name) = coordinates(topic)?;
        let spec: KafkaTopicSpec = spec_of(topic)?;

        if let Err(violation) = check_topic_name(&namespace, &name, &spec) {
            warn!(
                namespace = %namespace,
                name = %name,
                topic_name = %violation.topic_name,
                "KafkaTopic not mirrored: {}",
                violation
            );
            metrics::counter!("knuto_policy_violations_total", "kind" => "naming").increment(1);
            return Ok(MirrorStatus {
                policy_violation: Some(violation.to_string()),
                ..Default::default()
            });
        }

        let source = SourceRef::new(namespace, name);
        let target = self.kind().target(&source, ctx.destination_namespace());
        let draft = mirror_dynamic(topic, &source, &target);

        let result = ctx
            .replication()
            .upsert(&ctx.resources.kafka_topic, &draft)
            .await;
        if let Ok(outcome) = &result {
            info!(source = %source, target = %target, ?outcome, "KafkaTopic mirrored");
        }

        mirror_status(topic, &target, result)
    }

    #[instrument(skip_all, fields(name = ?topic.metadata.name, namespace = ?topic.metadata.namespace))]
    async fn cleanup(&self, ctx: &OperatorContext, topic: &DynamicObject) -> Result<MirrorStatus> {
        let (namespace, name) = coordinates(topic)?;

        if !ctx.config.policy.topic_deletion_enabled {
            info!(namespace = %namespace, name = %name, "Topic deletion disabled, keeping mirror");
            return Ok(MirrorStatus {
                not_deleting: Some(format!(
                    "Deletion of KafkaTopic not enabled for namespace {}",
                    namespace
                )),
                ..Default::default()
            });
        }

        let source = SourceRef::new(namespace, name);
        let target = self.kind().target(&source, ctx.destination_namespace());
        if ctx
            .replication()
            .delete_if_exists(&ctx.resources.kafka_topic, &target.namespace, &target.name, &source)
            .await?
        {
            info!(target = %target, "Deleted mirrored KafkaTopic");
        }

        Ok(MirrorStatus::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NamespacePolicy, OperatorConfig};
    use crate::provenance::source_of;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn context(topic_deletion_enabled: bool) -> (Arc<MemoryStore>, OperatorContext) {
        let store = Arc::new(MemoryStore::new());
        let config = OperatorConfig {
            policy: NamespacePolicy {
                destination_namespace: "kafka".to_string(),
                topic_deletion_enabled,
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = OperatorContext::new(store.clone(), Arc::new(config));
        (store, ctx)
    }

    fn topic(namespace: &str, name: &str, spec: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "KafkaTopic",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": { "strimzi.io/cluster": "my-cluster" }
            },
            "spec": spec,
            "status": { "topicName": name }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_apply_mirrors_prefixed_topic() {
        let (store, ctx) = context(false);
        let tenant = topic("ns", "ns-t", json!({ "partitions": 3, "replicas": 1 }));

        let status = TopicMirror.apply(&ctx, &tenant).await.unwrap();
        assert_eq!(status.copied_to.as_deref(), Some("kafka/ns-t"));

        let mirrored = store
            .object(&ctx.resources.kafka_topic, "kafka", "ns-t")
            .unwrap();
        assert_eq!(source_of(&mirrored), Some(SourceRef::new("ns", "ns-t")));
        assert_eq!(mirrored.data["spec"]["partitions"], 3);
        assert!(mirrored.data.get("status").is_none());
        assert_eq!(
            mirrored
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("strimzi.io/cluster"))
                .map(String::as_str),
            Some("my-cluster")
        );

        let status = TopicMirror.apply(&ctx, &tenant).await.unwrap();
        assert_eq!(status.updated.as_deref(), Some("kafka/ns-t"));
    }

    #[tokio::test]
    async fn test_apply_rejects_unprefixed_topic() {
        let (store, ctx) = context(false);
        let tenant = topic("ns", "t", json!({ "partitions": 1 }));

        let status = TopicMirror.apply(&ctx, &tenant).await.unwrap();
        assert_eq!(
            status.policy_violation.as_deref(),
            Some("Topic name should be prefixed with ns-")
        );
        assert_eq!(store.count(&ctx.resources.kafka_topic, "kafka"), 0);
    }

    #[tokio::test]
    async fn test_apply_checks_explicit_topic_name() {
        let (store, ctx) = context(false);
        let tenant = topic("ns", "ns-t", json!({ "topicName": "orders" }));

        let status = TopicMirror.apply(&ctx, &tenant).await.unwrap();
        assert!(status.policy_violation.is_some());
        assert_eq!(store.count(&ctx.resources.kafka_topic, "kafka"), 0);
    }

    #[tokio::test]
    async fn test_cleanup_when_deletion_disabled() {
        let (store, ctx) = context(false);
        let tenant = topic("ns", "ns-t", json!({}));
        TopicMirror.apply(&ctx, &tenant).await.unwrap();

        let status = TopicMirror.cleanup(&ctx, &tenant).await.unwrap();
        assert_eq!(
            status.not_deleting.as_deref(),
            Some("Deletion of KafkaTopic not enabled for namespace ns")
        );
        assert!(store
            .object(&ctx.resources.kafka_topic, "kafka", "ns-t")
            .is_some());
    }

    #[tokio::test]
    async fn test_cleanup_when_deletion_enabled() {
        let (store, ctx) = context(true);
        let tenant = topic("ns", "ns-t", json!({}));
        TopicMirror.apply(&ctx, &tenant).await.unwrap();

        let status = TopicMirror.cleanup(&ctx, &tenant).await.unwrap();
        assert!(status.is_empty());
        assert_eq!(store.count(&ctx.resources.kafka_topic, "kafka"), 0);
    }

    #[tokio::test]
    async fn test_unmanaged_topic_is_left_alone() {
        let (store, ctx) = context(true);
        store.seed(
            &ctx.resources.kafka_topic,
            serde_json::from_value(json!({
                "apiVersion": "kafka.strimzi.io/v1beta2",
                "kind": "KafkaTopic",
                "metadata": { "name": "ns-t", "namespace": "kafka" },
                "spec": { "partitions": 12 }
            }))
            .unwrap(),
        );
        let tenant = topic("ns", "ns-t", json!({ "partitions": 1 }));

        let status = TopicMirror.apply(&ctx, &tenant).await.unwrap();
        assert!(status.policy_violation.is_some());
        assert!(status.updated.is_none());

        TopicMirror.cleanup(&ctx, &tenant).await.unwrap();
        let existing = store
            .object(&ctx.resources.kafka_topic, "kafka", "ns-t")
            .unwrap();
        assert_eq!(existing.data["spec"]["partitions"], 12);
    }
}
