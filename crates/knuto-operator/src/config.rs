//! Operator configuration
//!
//! The configuration is assembled once at startup (YAML file and/or command
//! line), validated, and then shared read-only through an `Arc` by every
//! controller. Nothing mutates it after [`OperatorConfig::validated`].

use crate::crd::DEFAULT_STRIMZI_API_VERSION;
use crate::error::{OperatorError, Result};
use crate::secrets::CredentialType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Regex for validating Kubernetes namespace names (RFC 1123 label)
static NAMESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Regex for validating a `host:port` bootstrap address
static BOOTSTRAP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.\-]+:[0-9]{1,5}(,[A-Za-z0-9.\-]+:[0-9]{1,5})*$").unwrap());

fn validate_namespace(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("missing_namespace")
            .with_message("destination namespace must be set".into()));
    }
    if value.len() > 63 || !NAMESPACE_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_namespace").with_message(
            format!("'{}' is not a valid Kubernetes namespace", value).into(),
        ));
    }
    Ok(())
}

fn validate_namespaces(values: &BTreeSet<String>) -> std::result::Result<(), ValidationError> {
    values.iter().try_for_each(|ns| validate_namespace(ns))
}

fn validate_bootstrap_servers(
    servers: &BTreeMap<CredentialType, String>,
) -> std::result::Result<(), ValidationError> {
    for (credential, address) in servers {
        if !BOOTSTRAP_REGEX.is_match(address) {
            return Err(ValidationError::new("invalid_bootstrap_server").with_message(
                format!(
                    "bootstrap server '{}' for {} must be host:port",
                    address, credential
                )
                .into(),
            ));
        }
    }
    Ok(())
}

/// Namespace isolation policy applied to tenant declarations.
///
/// Read and Write are configured independently: enabling one direction
/// never widens the other.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct NamespacePolicy {
    /// Allow Read ACLs on resources of any namespace
    pub cross_namespace_read_enabled: bool,

    /// Allow Write ACLs on resources of any namespace
    pub cross_namespace_write_enabled: bool,

    /// Non-namespaced resource names tenants may request Read on
    pub read_allowlist: BTreeSet<String>,

    /// Non-namespaced resource names tenants may request Write on
    pub write_allowlist: BTreeSet<String>,

    /// Namespace watched by Strimzi, where mirrored objects are written
    #[validate(custom(function = "validate_namespace"))]
    pub destination_namespace: String,

    /// Propagate KafkaTopic deletion to the mirrored topic
    pub topic_deletion_enabled: bool,
}

/// Complete, immutable operator configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Namespace isolation policy
    #[validate(nested)]
    pub policy: NamespacePolicy,

    /// Bootstrap address per credential type, rendered into client configs
    #[validate(custom(function = "validate_bootstrap_servers"))]
    pub bootstrap_servers: BTreeMap<CredentialType, String>,

    /// Tenant namespaces recognized as owners of generated credentials
    #[validate(custom(function = "validate_namespaces"))]
    pub source_namespaces: BTreeSet<String>,

    /// API version of the Strimzi `kafka.strimzi.io` resources
    #[validate(length(min = 1, message = "Strimzi API version must be set"))]
    pub strimzi_api_version: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            policy: NamespacePolicy::default(),
            bootstrap_servers: BTreeMap::new(),
            source_namespaces: BTreeSet::new(),
            strimzi_api_version: DEFAULT_STRIMZI_API_VERSION.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate the configuration, consuming it
    pub fn validated(self) -> Result<Self> {
        if let Err(errors) = self.validate() {
            return Err(OperatorError::InvalidConfig(errors.to_string()));
        }
        if self
            .source_namespaces
            .contains(&self.policy.destination_namespace)
        {
            return Err(OperatorError::InvalidConfig(format!(
                "destination namespace '{}' cannot also be a source namespace",
                self.policy.destination_namespace
            )));
        }
        Ok(self)
    }

    /// Bootstrap address configured for a credential type
    pub fn bootstrap_server(&self, credential: CredentialType) -> Option<&str> {
        self.bootstrap_servers.get(&credential).map(String::as_str)
    }

    /// Whether generated credentials may be mirrored back into `namespace`
    pub fn is_source_namespace(&self, namespace: &str) -> bool {
        self.source_namespaces.contains(namespace)
    }
}

/// Parse a `credential-type=host:port` command line mapping
pub fn parse_bootstrap_mapping(
    value: &str,
) -> std::result::Result<(CredentialType, String), String> {
    let (credential, address) = value.split_once('=').ok_or_else(|| {
        "Invalid value, should be on the form secret-type=bootstrapserver-dns-name:port"
            .to_string()
    })?;
    let credential = credential.parse::<CredentialType>()?;
    if address.is_empty() {
        return Err(format!("missing bootstrap server for {}", credential));
    }
    Ok((credential, address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> OperatorConfig {
        OperatorConfig {
            policy: NamespacePolicy {
                destination_namespace: "kafka".to_string(),
                ..Default::default()
            },
            bootstrap_servers: BTreeMap::from([(
                CredentialType::ScramSha512,
                "kafka-bootstrap.kafka:9092".to_string(),
            )]),
            source_namespaces: BTreeSet::from(["team-a".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert!(!config.policy.cross_namespace_read_enabled);
        assert!(!config.policy.cross_namespace_write_enabled);
        assert!(!config.policy.topic_deletion_enabled);
        assert_eq!(config.strimzi_api_version, DEFAULT_STRIMZI_API_VERSION);
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validated().is_ok());
    }

    #[test]
    fn test_missing_destination_namespace() {
        let mut config = valid_config();
        config.policy.destination_namespace.clear();
        let err = config.validated().unwrap_err();
        assert!(matches!(err, OperatorError::InvalidConfig(_)));
    }

    #[test]
    fn test_invalid_source_namespace() {
        let mut config = valid_config();
        config.source_namespaces.insert("Not_Valid".to_string());
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_destination_cannot_be_source() {
        let mut config = valid_config();
        config.source_namespaces.insert("kafka".to_string());
        let err = config.validated().unwrap_err();
        assert!(err.to_string().contains("cannot also be a source namespace"));
    }

    #[test]
    fn test_invalid_bootstrap_server() {
        let mut config = valid_config();
        config
            .bootstrap_servers
            .insert(CredentialType::ScramSha512, "no-port".to_string());
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_parse_bootstrap_mapping() {
        let (credential, address) =
            parse_bootstrap_mapping("scram-sha-512=kafka-bootstrap.kafka:9092").unwrap();
        assert_eq!(credential, CredentialType::ScramSha512);
        assert_eq!(address, "kafka-bootstrap.kafka:9092");

        assert!(parse_bootstrap_mapping("scram-sha-512").is_err());
        assert!(parse_bootstrap_mapping("scram-sha-512=").is_err());
        assert!(parse_bootstrap_mapping("tls=broker:9093").is_err());
    }

    #[test]
    fn test_from_yaml() {
        let config = OperatorConfig::from_yaml(
            r#"
policy:
  destinationNamespace: kafka
  crossNamespaceReadEnabled: true
  writeAllowlist: [shared-events]
  topicDeletionEnabled: true
bootstrapServers:
  scram-sha-512: kafka-bootstrap.kafka:9092
sourceNamespaces: [team-a, team-b]
"#,
        )
        .unwrap()
        .validated()
        .unwrap();

        assert_eq!(config.policy.destination_namespace, "kafka");
        assert!(config.policy.cross_namespace_read_enabled);
        assert!(!config.policy.cross_namespace_write_enabled);
        assert!(config.policy.write_allowlist.contains("shared-events"));
        assert!(config.policy.read_allowlist.is_empty());
        assert!(config.policy.topic_deletion_enabled);
        assert_eq!(
            config.bootstrap_server(CredentialType::ScramSha512),
            Some("kafka-bootstrap.kafka:9092")
        );
        assert!(config.is_source_namespace("team-b"));
        assert_eq!(config.strimzi_api_version, DEFAULT_STRIMZI_API_VERSION);
    }
}
