//! Client configuration derived from Strimzi credential secrets
//!
//! Strimzi's user operator writes a secret named after the mirrored
//! `KafkaUser` into its own namespace. The operator copies it back into the
//! tenant namespace as `{user}-kafka-config`, adding a ready-to-use
//! `kafka-client.properties` entry.

use crate::config::OperatorConfig;
use crate::crd::{StrimziResources, STRIMZI_KIND_LABEL};
use crate::error::{OperatorError, Result};
use crate::naming;
use crate::provenance::SourceRef;
use crate::replication::{self, MirrorTarget};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Data key of the rendered client configuration
pub const CLIENT_PROPERTIES_KEY: &str = "kafka-client.properties";

/// Data key Strimzi stores SCRAM passwords under
pub const PASSWORD_KEY: &str = "password";

/// Authentication mechanism of a generated credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum CredentialType {
    #[serde(rename = "scram-sha-512")]
    ScramSha512,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::ScramSha512 => "scram-sha-512",
        }
    }

    /// Identify the credential carried by secret data
    pub fn detect(data: &BTreeMap<String, ByteString>) -> Option<Self> {
        if data.contains_key(PASSWORD_KEY) {
            return Some(CredentialType::ScramSha512);
        }
        None
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scram-sha-512" => Ok(CredentialType::ScramSha512),
            other => Err(format!(
                "unsupported secret type '{}', expected one of: scram-sha-512",
                other
            )),
        }
    }
}

/// Render the client properties for a credential
pub fn render_client_properties(
    credential: CredentialType,
    principal: &str,
    password: &str,
    bootstrap_servers: &str,
) -> String {
    match credential {
        CredentialType::ScramSha512 => format!(
            "sasl.mechanism=SCRAM-SHA-512\n\
             security.protocol=SASL_PLAINTEXT\n\
             sasl.jaas.config=org.apache.kafka.common.security.scram.ScramLoginModule required \
             username=\"{principal}\" password=\"{password}\";\n\
             bootstrap.servers={bootstrap_servers}\n"
        ),
    }
}

/// Derives tenant client configuration secrets from generated credentials
#[derive(Debug, Clone, Copy)]
pub struct SecretTransformer<'a> {
    config: &'a OperatorConfig,
    resources: &'a StrimziResources,
}

impl<'a> SecretTransformer<'a> {
    pub fn new(config: &'a OperatorConfig, resources: &'a StrimziResources) -> Self {
        Self { config, resources }
    }

    /// Whether the generated secret `name` in `strimzi_namespace` should be
    /// mirrored back to `source_namespace`
    pub fn should_mirror(
        &self,
        name: &str,
        strimzi_namespace: &str,
        source_namespace: Option<&str>,
        data: Option<&BTreeMap<String, ByteString>>,
    ) -> bool {
        let Some(source_namespace) = source_namespace else {
            return false;
        };

        if !self.config.is_source_namespace(source_namespace) {
            info!(
                namespace = %strimzi_namespace,
                name = %name,
                source_namespace = %source_namespace,
                "Skipping as secret's source namespace is not a recognized source namespace"
            );
            return false;
        }

        if data.and_then(CredentialType::detect).is_none() {
            warn!(
                namespace = %strimzi_namespace,
                name = %name,
                "Unable to work on secret, unrecognized secret type"
            );
            return false;
        }

        true
    }

    /// Render the client configuration for the credential in `data`
    pub fn transform(
        &self,
        data: &BTreeMap<String, ByteString>,
        credential: CredentialType,
        principal: &str,
    ) -> Result<ByteString> {
        let bootstrap = self.config.bootstrap_server(credential).ok_or_else(|| {
            OperatorError::InvalidConfig(format!(
                "no bootstrap server configured for secret type {}",
                credential
            ))
        })?;

        let properties = match credential {
            CredentialType::ScramSha512 => {
                let password = data.get(PASSWORD_KEY).ok_or_else(|| {
                    OperatorError::Internal(format!("secret of {} has no password", principal))
                })?;
                let password = std::str::from_utf8(&password.0).map_err(|e| {
                    OperatorError::Internal(format!("password of {} is not UTF-8: {}", principal, e))
                })?;
                render_client_properties(credential, principal, password, bootstrap)
            }
        };

        Ok(ByteString(properties.into_bytes()))
    }

    /// Build the tenant copy of `generated`.
    ///
    /// `source` is the tenant `KafkaUser` the credential was issued for and
    /// `owner` its live object; the copy is adopted by it so that deleting
    /// the user garbage-collects the secret.
    pub fn build_mirrored_secret(
        &self,
        generated: &Secret,
        source: &SourceRef,
        owner: &DynamicObject,
    ) -> Result<Secret> {
        let origin = SourceRef::of(generated).ok_or_else(|| {
            OperatorError::Internal("generated secret has no name or namespace".to_string())
        })?;
        let data = generated.data.clone().unwrap_or_default();
        let credential = CredentialType::detect(&data).ok_or_else(|| {
            OperatorError::Internal(format!("secret {} carries no recognized credential", origin))
        })?;

        let target = MirrorTarget::new(
            source.namespace.clone(),
            naming::client_config_secret_name(&source.name),
        );
        let mut secret = replication::mirror(generated, &origin, &target);

        // Our own output must not match the watch that triggered us
        secret.labels_mut().remove(STRIMZI_KIND_LABEL);

        let properties = self.transform(&data, credential, &origin.name)?;
        secret
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(CLIENT_PROPERTIES_KEY.to_string(), properties);

        let owner_ref = owner
            .controller_owner_ref(&self.resources.kafka_user)
            .ok_or_else(|| {
                OperatorError::Internal(format!(
                    "KafkaUser {} has no uid, cannot adopt secret",
                    source
                ))
            })?;
        secret.meta_mut().owner_references = Some(vec![owner_ref]);

        Ok(secret)
    }
}
