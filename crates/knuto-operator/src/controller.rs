//! Mirror Controller
//!
//! Runs a kube-runtime controller for one mirrored Strimzi kind. Tenant
//! objects get a finalizer so that deletions can be propagated; the kind
//! specific work is delegated to a [`MirrorHandler`] whose outcome is merged
//! into `.status.knuto` of the tenant object.

use crate::context::OperatorContext;
use crate::crd::{MirrorStatus, StrimziResources, STATUS_KEY};
use crate::error::{OperatorError, Result};
use crate::replication::{MirrorKind, MirrorTarget, UpsertOutcome};
use crate::store::coordinates;
use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{self, finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config;
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Finalizer put on tenant objects
pub const FINALIZER_NAME: &str = "knuto.niradynamics.se/mirror-finalizer";

/// Resync interval for mirrored objects
pub(crate) const DEFAULT_REQUEUE_SECONDS: u64 = 300; // 5 minutes

/// Requeue interval for error cases (base for exponential backoff)
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Kind specific mirroring logic
#[async_trait]
pub trait MirrorHandler: Send + Sync + 'static {
    /// Kind of object handled
    fn kind(&self) -> MirrorKind;

    /// Mirror a created or updated tenant object
    async fn apply(&self, ctx: &OperatorContext, obj: &DynamicObject) -> Result<MirrorStatus>;

    /// Propagate the deletion of a tenant object
    async fn cleanup(&self, ctx: &OperatorContext, obj: &DynamicObject) -> Result<MirrorStatus>;
}

/// API resource of a mirrored kind
pub fn api_resource(kind: MirrorKind, resources: &StrimziResources) -> &ApiResource {
    match kind {
        MirrorKind::User => &resources.kafka_user,
        MirrorKind::Topic => &resources.kafka_topic,
    }
}

/// Metrics for one controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Metrics named `knuto_{controller}_*`
    pub fn new(controller: &str) -> Self {
        Self {
            reconciliations: metrics::counter!(format!(
                "knuto_{}_reconciliations_total",
                controller
            )),
            errors: metrics::counter!(format!("knuto_{}_errors_total", controller)),
            duration: metrics::histogram!(format!("knuto_{}_duration_seconds", controller)),
        }
    }
}

/// Context passed to a mirror controller
pub struct ControllerContext<H> {
    /// Kubernetes client, used for finalizer bookkeeping
    pub client: Client,
    /// Store, configuration and resource descriptors
    pub operator: OperatorContext,
    /// Kind specific logic
    pub handler: H,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-object error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

/// Start a mirror controller for the kind of `handler`
pub async fn run_mirror_controller<H: MirrorHandler>(
    client: Client,
    operator: OperatorContext,
    handler: H,
    namespace: Option<String>,
) -> Result<()> {
    let kind = handler.kind();
    let resource = api_resource(kind, &operator.resources).clone();

    let objects: Api<DynamicObject> = match &namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
        None => Api::all_with(client.clone(), &resource),
    };

    let metrics_name = kind.to_string().trim_start_matches("Kafka").to_lowercase();
    let ctx = Arc::new(ControllerContext {
        client,
        operator,
        handler,
        metrics: Some(ControllerMetrics::new(&metrics_name)),
        error_counts: dashmap::DashMap::new(),
    });

    info!(
        kind = %kind,
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting mirror controller"
    );

    Controller::new_with(objects, Config::default(), resource)
        .run(reconcile::<H>, error_policy::<H>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(kind = %ctx.handler.kind(), name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile<H: MirrorHandler>(
    obj: Arc<DynamicObject>,
    ctx: Arc<ControllerContext<H>>,
) -> Result<Action> {
    if !needs_reconcile(&ctx.operator, &obj) {
        debug!("Not a tenant object, ignoring");
        return Ok(Action::await_change());
    }

    let start = Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let (namespace, name) = coordinates(&obj)?;
    let key = format!("{}/{}", namespace, name);
    let resource = api_resource(ctx.handler.kind(), &ctx.operator.resources);
    let objects: Api<DynamicObject> = Api::namespaced_with(ctx.client.clone(), &namespace, resource);

    let result = finalizer(&objects, FINALIZER_NAME, obj, |event| async {
        match event {
            FinalizerEvent::Apply(obj) => apply_object(&obj, &ctx).await,
            FinalizerEvent::Cleanup(obj) => cleanup_object(&obj, &ctx).await,
        }
    })
    .await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    // Reset error backoff counter on success
    if result.is_ok() {
        ctx.error_counts.remove(&key);
    }

    result.map_err(|e| {
        if let Some(ref metrics) = ctx.metrics {
            metrics.errors.increment(1);
        }
        match e {
            finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
            other => OperatorError::ReconcileFailed(other.to_string()),
        }
    })
}

/// Whether `obj` is handed to the finalizer.
///
/// Tenant objects always are. Any other object still carrying our finalizer
/// is handled once it is being deleted, so that the finalizer is released
/// instead of blocking the deletion.
pub(crate) fn needs_reconcile(ctx: &OperatorContext, obj: &DynamicObject) -> bool {
    if ctx.is_tenant_object(obj) {
        return true;
    }
    obj.meta().deletion_timestamp.is_some() && obj.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

async fn apply_object<H: MirrorHandler>(obj: &DynamicObject, ctx: &ControllerContext<H>) -> Result<Action> {
    let status = ctx.handler.apply(&ctx.operator, obj).await?;
    report_status(&ctx.operator, ctx.handler.kind(), obj, &status).await?;
    Ok(Action::requeue(Duration::from_secs(DEFAULT_REQUEUE_SECONDS)))
}

async fn cleanup_object<H: MirrorHandler>(obj: &DynamicObject, ctx: &ControllerContext<H>) -> Result<Action> {
    let status = ctx.handler.cleanup(&ctx.operator, obj).await?;
    report_status(&ctx.operator, ctx.handler.kind(), obj, &status).await?;
    Ok(Action::await_change())
}

/// Status for the result of writing the mirror of `obj` to `target`.
///
/// A mirror once reported as `copied_to` keeps that outcome on later
/// passes over the same target. A target owned by another source is
/// reported as `policy_violation`.
pub(crate) fn mirror_status(
    obj: &DynamicObject,
    target: &MirrorTarget,
    result: Result<UpsertOutcome>,
) -> Result<MirrorStatus> {
    let location = Some(target.to_string());
    match result {
        Ok(UpsertOutcome::Created) => Ok(MirrorStatus {
            copied_to: location,
            ..Default::default()
        }),
        Ok(UpsertOutcome::Updated) => {
            let reported = MirrorStatus::of(obj).and_then(|s| s.copied_to);
            if reported == location {
                Ok(MirrorStatus {
                    copied_to: location,
                    ..Default::default()
                })
            } else {
                Ok(MirrorStatus {
                    updated: location,
                    ..Default::default()
                })
            }
        }
        Err(e @ OperatorError::ForeignObject { .. }) => {
            metrics::counter!("knuto_policy_violations_total", "kind" => "ownership").increment(1);
            Ok(MirrorStatus {
                policy_violation: Some(e.to_string()),
                ..Default::default()
            })
        }
        Err(e) => Err(e),
    }
}

/// Merge a handler outcome into `.status.knuto` of `obj`.
///
/// Skipped when the object already reports the same outcome, and tolerant
/// of the object having disappeared in the meantime.
pub(crate) async fn report_status(
    ctx: &OperatorContext,
    kind: MirrorKind,
    obj: &DynamicObject,
    status: &MirrorStatus,
) -> Result<()> {
    if status.is_empty() {
        return Ok(());
    }

    let current = obj.data.get("status").and_then(|s| s.get(STATUS_KEY));
    if current == Some(&serde_json::to_value(status)?) {
        debug!("Status unchanged");
        return Ok(());
    }

    let (namespace, name) = coordinates(obj)?;
    let resource = api_resource(kind, &ctx.resources);
    match ctx
        .store
        .patch_status(resource, &namespace, &name, &status.to_patch()?)
        .await
    {
        Ok(()) | Err(OperatorError::NotFound { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Requeue delay after the `retries`-th consecutive failure
pub(crate) fn backoff_delay(error: &OperatorError, retries: u32) -> Duration {
    // Use the error's suggested delay OR exponential backoff:
    // 30s → 60s → 120s → 240s → 480s → 600s (capped)
    error.requeue_delay().unwrap_or_else(|| {
        let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
        let backoff = base * 2u32.saturating_pow(retries.saturating_sub(1).min(5));
        backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS))
    })
}

/// Error policy for the controller
fn error_policy<H: MirrorHandler>(
    obj: Arc<DynamicObject>,
    error: &OperatorError,
    ctx: Arc<ControllerContext<H>>,
) -> Action {
    let key = format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    );
    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    let delay = backoff_delay(error, retries);

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::store::memory::MemoryStore;
    use crate::store::ObjectStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use serde_json::json;

    fn context() -> (Arc<MemoryStore>, OperatorContext) {
        let store = Arc::new(MemoryStore::new());
        let ctx = OperatorContext::new(store.clone(), Arc::new(OperatorConfig::default()));
        (store, ctx)
    }

    fn tenant_user() -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "KafkaUser",
            "metadata": { "name": "svc", "namespace": "team-a" },
            "spec": {}
        }))
        .unwrap()
    }

    #[test]
    fn test_api_resource() {
        let resources = StrimziResources::default();
        assert_eq!(api_resource(MirrorKind::User, &resources).kind, "KafkaUser");
        assert_eq!(api_resource(MirrorKind::Topic, &resources).kind, "KafkaTopic");
    }

    #[test]
    fn test_needs_reconcile() {
        let (_store, ctx) = context();
        assert!(needs_reconcile(&ctx, &tenant_user()));

        // Left behind in a namespace that is no longer served
        let mut stale: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "kafka.strimzi.io/v1beta2",
            "kind": "KafkaUser",
            "metadata": {
                "name": "svc",
                "namespace": "team-a",
                "annotations": { "knuto.niradynamics.se/created": "true" },
                "finalizers": [FINALIZER_NAME]
            },
            "spec": {}
        }))
        .unwrap();
        assert!(!needs_reconcile(&ctx, &stale));

        stale.metadata.deletion_timestamp = Some(Time(
            "2024-01-01T00:00:00Z".parse().unwrap(),
        ));
        assert!(needs_reconcile(&ctx, &stale));

        stale.metadata.finalizers = Some(vec!["strimzi.io/user-operator".to_string()]);
        assert!(!needs_reconcile(&ctx, &stale));
    }

    #[test]
    fn test_mirror_status_keeps_reported_creation() {
        let target = MirrorTarget::new("kafka", "team-a-svc");
        let mut user = tenant_user();

        let created = mirror_status(&user, &target, Ok(UpsertOutcome::Created)).unwrap();
        assert_eq!(created.copied_to.as_deref(), Some("kafka/team-a-svc"));

        // Without a reported creation a rewrite is an update
        let updated = mirror_status(&user, &target, Ok(UpsertOutcome::Updated)).unwrap();
        assert_eq!(updated.updated.as_deref(), Some("kafka/team-a-svc"));

        user.data["status"] = created.to_patch().unwrap()["status"].clone();
        let again = mirror_status(&user, &target, Ok(UpsertOutcome::Updated)).unwrap();
        assert_eq!(again, created);

        // A different target is a fresh outcome
        let moved = MirrorTarget::new("kafka-2", "team-a-svc");
        let elsewhere = mirror_status(&user, &moved, Ok(UpsertOutcome::Updated)).unwrap();
        assert_eq!(elsewhere.updated.as_deref(), Some("kafka-2/team-a-svc"));
    }

    #[test]
    fn test_mirror_status_reports_foreign_target() {
        let target = MirrorTarget::new("kafka", "team-a-svc");
        let foreign = OperatorError::ForeignObject {
            kind: "KafkaUser".to_string(),
            name: "team-a-svc".to_string(),
            namespace: "kafka".to_string(),
            requested_by: "team/a-svc".to_string(),
        };
        let status = mirror_status(&tenant_user(), &target, Err(foreign)).unwrap();
        assert!(status.policy_violation.unwrap().contains("team/a-svc"));

        let transient = OperatorError::ReconcileFailed("boom".to_string());
        assert!(mirror_status(&tenant_user(), &target, Err(transient)).is_err());
    }

    #[test]
    fn test_backoff_delay() {
        let invalid = OperatorError::InvalidConfig("bad".to_string());
        assert_eq!(backoff_delay(&invalid, 1), Duration::from_secs(30));
        assert_eq!(backoff_delay(&invalid, 2), Duration::from_secs(60));
        assert_eq!(backoff_delay(&invalid, 5), Duration::from_secs(480));
        assert_eq!(backoff_delay(&invalid, 50), Duration::from_secs(600));

        let conflict = OperatorError::Conflict {
            kind: "KafkaUser".to_string(),
            name: "team-a-svc".to_string(),
            namespace: "kafka".to_string(),
        };
        assert_eq!(backoff_delay(&conflict, 3), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_report_status() {
        let (store, ctx) = context();
        let user = store.seed(&ctx.resources.kafka_user, tenant_user());

        let status = MirrorStatus {
            copied_to: Some("kafka/team-a-svc".to_string()),
            ..Default::default()
        };
        report_status(&ctx, MirrorKind::User, &user, &status)
            .await
            .unwrap();

        let stored = store
            .get(&ctx.resources.kafka_user, "team-a", "svc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.data["status"]["knuto"]["copied_to"], "kafka/team-a-svc");
        assert!(stored.data["status"]["knuto"]["updated"].is_null());
    }

    #[tokio::test]
    async fn test_report_status_tolerates_missing_object() {
        let (_store, ctx) = context();
        let status = MirrorStatus {
            not_deleting: Some("Deletion of KafkaTopic not enabled for namespace team-a".to_string()),
            ..Default::default()
        };
        report_status(&ctx, MirrorKind::User, &tenant_user(), &status)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_status_is_not_reported() {
        let (store, ctx) = context();
        let user = store.seed(&ctx.resources.kafka_user, tenant_user());

        report_status(&ctx, MirrorKind::User, &user, &MirrorStatus::default())
            .await
            .unwrap();

        let stored = store
            .object(&ctx.resources.kafka_user, "team-a", "svc")
            .unwrap();
        assert!(stored.data.get("status").is_none());
    }
}
