//! Credential Secret Controller
//!
//! Watches the secrets the Strimzi user operator generates in the
//! destination namespace and writes a `{user}-kafka-config` copy, including
//! the rendered client properties, into the tenant namespace the mirrored
//! `KafkaUser` came from. The copy is owned by the tenant `KafkaUser`, so
//! Kubernetes garbage collection removes it together with the user.

use crate::context::OperatorContext;
use crate::controller::{backoff_delay, ControllerMetrics, DEFAULT_REQUEUE_SECONDS};
use crate::crd::{STRIMZI_KIND_KAFKA_USER, STRIMZI_KIND_LABEL};
use crate::error::{OperatorError, Result};
use crate::provenance::{self, SourceRef};
use crate::replication::{to_dynamic, MirrorTarget};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Context passed to the secret controller
pub struct SecretControllerContext {
    /// Store, configuration and resource descriptors
    pub operator: OperatorContext,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-secret error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

/// Start the credential secret controller
pub async fn run_secret_controller(client: Client, operator: OperatorContext) -> Result<()> {
    let namespace = operator.destination_namespace().to_string();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let users: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), &namespace, &operator.resources.kafka_user);
    let user_resource = operator.resources.kafka_user.clone();

    let ctx = Arc::new(SecretControllerContext {
        operator,
        metrics: Some(ControllerMetrics::new("secret")),
        error_counts: dashmap::DashMap::new(),
    });

    info!(namespace = %namespace, "Starting credential secret controller");

    let selector = format!("{}={}", STRIMZI_KIND_LABEL, STRIMZI_KIND_KAFKA_USER);
    Controller::new(secrets, Config::default().labels(&selector))
        // A mirrored user and its generated secret share a name
        .watches_with(users, user_resource, Config::default(), |user| {
            user.namespace()
                .map(|ns| ObjectRef::<Secret>::new(&user.name_any()).within(&ns))
        })
        .run(reconcile, error_policy, ctx)
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

#[instrument(skip(secret, ctx), fields(name = %secret.name_any(), namespace = secret.namespace()))]
async fn reconcile(secret: Arc<Secret>, ctx: Arc<SecretControllerContext>) -> Result<Action> {
    let start = Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let key = format!(
        "{}/{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any()
    );
    let result = mirror_credential_secret(&ctx.operator, &secret).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    match result {
        Ok(_) => {
            ctx.error_counts.remove(&key);
            Ok(Action::requeue(Duration::from_secs(DEFAULT_REQUEUE_SECONDS)))
        }
        Err(e) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.errors.increment(1);
            }
            Err(e)
        }
    }
}

/// Mirror a generated credential secret back to its tenant.
///
/// Returns where the copy was written, or `None` when the secret is
/// skipped: it was written by the operator, its user has no resolvable
/// provenance, its tenant is not a source namespace, its credential type is
/// unknown, or the tenant `KafkaUser` is gone.
pub async fn mirror_credential_secret(
    ctx: &OperatorContext,
    secret: &Secret,
) -> Result<Option<MirrorTarget>> {
    let origin = SourceRef::of(secret)
        .ok_or_else(|| OperatorError::Internal("secret has no name or namespace".to_string()))?;

    if provenance::is_system_created(secret) {
        debug!(secret = %origin, "Ignoring secret written by the operator");
        return Ok(None);
    }

    let source = provenance::resolve_source(
        ctx.store.as_ref(),
        &ctx.resources.kafka_user,
        ctx.destination_namespace(),
        &origin.name,
    )
    .await?;

    let transformer = ctx.secrets();
    if !transformer.should_mirror(
        &origin.name,
        &origin.namespace,
        source.as_ref().map(|s| s.namespace.as_str()),
        secret.data.as_ref(),
    ) {
        return Ok(None);
    }
    let Some(source) = source else {
        return Ok(None);
    };

    let Some(owner) = ctx
        .store
        .get(&ctx.resources.kafka_user, &source.namespace, &source.name)
        .await?
    else {
        warn!(
            secret = %origin,
            source = %source,
            "Tenant KafkaUser not found, not mirroring secret"
        );
        return Ok(None);
    };

    let mirrored = transformer.build_mirrored_secret(secret, &source, &owner)?;
    let target = MirrorTarget::new(source.namespace.clone(), mirrored.name_any());

    match ctx
        .replication()
        .upsert(&ctx.resources.secret, &to_dynamic(&mirrored)?)
        .await
    {
        Ok(outcome) => {
            info!(secret = %origin, target = %target, ?outcome, "Mirrored credential secret");
            Ok(Some(target))
        }
        Err(OperatorError::ForeignObject { .. }) => {
            metrics::counter!("knuto_policy_violations_total", "kind" => "ownership").increment(1);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Error policy for the controller
fn error_policy(secret: Arc<Secret>, error: &OperatorError, ctx: Arc<SecretControllerContext>) -> Action {
    let key = format!(
        "{}/{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any()
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
        "Reconciliation error for secret '{}', will retry",
        key
    );

    Action::requeue(delay)
}
