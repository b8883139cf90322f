//! Shared state handed to every handler

use crate::config::OperatorConfig;
use crate::crd::StrimziResources;
use crate::policy::PolicyEngine;
use crate::provenance;
use crate::replication::ReplicationEngine;
use crate::secrets::SecretTransformer;
use crate::store::ObjectStore;
use kube::Resource;
use std::sync::Arc;

/// Immutable configuration plus store access
#[derive(Clone)]
pub struct OperatorContext {
    pub store: Arc<dyn ObjectStore>,
    pub config: Arc<OperatorConfig>,
    pub resources: StrimziResources,
}

impl OperatorContext {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<OperatorConfig>) -> Self {
        let resources = StrimziResources::new(&config.strimzi_api_version);
        Self {
            store,
            config,
            resources,
        }
    }

    /// Namespace Strimzi watches and mirrors are written to
    pub fn destination_namespace(&self) -> &str {
        &self.config.policy.destination_namespace
    }

    pub fn replication(&self) -> ReplicationEngine {
        ReplicationEngine::new(self.store.clone())
    }

    pub fn policy(&self) -> PolicyEngine<'_> {
        PolicyEngine::new(&self.config.policy)
    }

    pub fn secrets(&self) -> SecretTransformer<'_> {
        SecretTransformer::new(&self.config, &self.resources)
    }

    /// Whether a tenant object should be mirrored by the user and topic
    /// controllers.
    ///
    /// Objects in the destination namespace and objects the operator wrote
    /// itself are never mirrored again. When source namespaces are
    /// configured, only those are served.
    pub fn is_tenant_object<K: Resource>(&self, obj: &K) -> bool {
        let Some(namespace) = obj.meta().namespace.as_deref() else {
            return false;
        };
        if namespace == self.destination_namespace() || provenance::is_system_created(obj) {
            return false;
        }
        self.config.source_namespaces.is_empty() || self.config.is_source_namespace(namespace)
    }
}
