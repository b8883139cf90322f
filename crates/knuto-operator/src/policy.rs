//! ACL namespace-isolation policy
//!
//! A tenant may only request Read/Write ACLs on `group` and `topic`
//! resources whose name carries its own namespace prefix, unless the
//! direction is opened cluster-wide or the name is explicitly allowlisted.
//! Validation is all-or-nothing: the first offending entry rejects the whole
//! list and nothing gets mirrored.

use crate::config::NamespacePolicy;
use crate::crd::AclRule;
use crate::naming::is_tenant_scoped;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

/// ACL resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceType {
    Group,
    Topic,
    Other(String),
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        match value {
            "group" => Self::Group,
            "topic" => Self::Topic,
            other => Self::Other(other.to_string()),
        }
    }
}

/// ACL operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclOperation {
    Read,
    Write,
    Other(String),
}

impl From<&str> for AclOperation {
    fn from(value: &str) -> Self {
        match value {
            "Read" => Self::Read,
            "Write" => Self::Write,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for AclOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("Read"),
            Self::Write => f.write_str("Write"),
            Self::Other(op) => f.write_str(op),
        }
    }
}

/// ACL resource pattern type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternType {
    Literal,
    Prefix,
    Other(String),
}

impl From<&str> for PatternType {
    fn from(value: &str) -> Self {
        match value {
            "literal" => Self::Literal,
            "prefix" => Self::Prefix,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A single access-control entry requested by a tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub resource_type: ResourceType,
    pub operation: AclOperation,
    pub pattern_type: PatternType,
    pub resource_name: String,
}

impl AclEntry {
    /// Build an entry from its string discriminators
    pub fn new(resource_type: &str, operation: &str, pattern_type: &str, name: &str) -> Self {
        Self {
            resource_type: resource_type.into(),
            operation: operation.into(),
            pattern_type: pattern_type.into(),
            resource_name: name.to_string(),
        }
    }
}

impl From<&AclRule> for AclEntry {
    fn from(rule: &AclRule) -> Self {
        Self::new(
            &rule.resource.resource_type,
            &rule.operation,
            &rule.resource.pattern_type,
            &rule.resource.name,
        )
    }
}

/// Why an entry was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationKind {
    #[error("Only group and topic resources allowed, not {0}")]
    UnsupportedResourceType(String),

    #[error("Only Read and Write operations allowed, not {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported patternType {0}, operator needs upgrade?")]
    UnsupportedPatternType(String),

    #[error(
        "resource name {name} does neither begin with {namespace}- nor is it included in \
         allowed non namespaced topics, operation {operation} not allowed."
    )]
    NamespaceBoundaryViolation {
        name: String,
        namespace: String,
        operation: AclOperation,
    },
}

/// First rejected entry of an ACL list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ACL {index}: {kind}")]
pub struct PolicyViolation {
    /// Position of the entry in declaration order
    pub index: usize,
    pub kind: ViolationKind,
}

/// Validates tenant ACL lists against a [`NamespacePolicy`]
#[derive(Debug, Clone, Copy)]
pub struct PolicyEngine<'a> {
    policy: &'a NamespacePolicy,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(policy: &'a NamespacePolicy) -> Self {
        Self { policy }
    }

    /// Validate `entries` requested from `namespace`.
    ///
    /// Entries are checked in order and the first violation is returned.
    pub fn validate(
        &self,
        namespace: &str,
        entries: &[AclEntry],
    ) -> std::result::Result<(), PolicyViolation> {
        debug!(namespace = %namespace, entries = entries.len(), "Checking requested ACLs");

        for (index, entry) in entries.iter().enumerate() {
            if let Err(kind) = self.check_entry(namespace, entry) {
                let violation = PolicyViolation { index, kind };
                warn!(namespace = %namespace, %violation, "ACL rejected");
                return Err(violation);
            }
        }

        Ok(())
    }

    fn check_entry(&self, namespace: &str, entry: &AclEntry) -> std::result::Result<(), ViolationKind> {
        if let ResourceType::Other(other) = &entry.resource_type {
            return Err(ViolationKind::UnsupportedResourceType(other.clone()));
        }

        let (cross_namespace_enabled, allowlist) = match &entry.operation {
            AclOperation::Read => (
                self.policy.cross_namespace_read_enabled,
                &self.policy.read_allowlist,
            ),
            AclOperation::Write => (
                self.policy.cross_namespace_write_enabled,
                &self.policy.write_allowlist,
            ),
            AclOperation::Other(other) => {
                return Err(ViolationKind::UnsupportedOperation(other.clone()))
            }
        };

        if let PatternType::Other(other) = &entry.pattern_type {
            return Err(ViolationKind::UnsupportedPatternType(other.clone()));
        }

        if cross_namespace_enabled
            || is_tenant_scoped(&entry.resource_name, namespace)
            || allowlist.contains(&entry.resource_name)
        {
            return Ok(());
        }

        Err(ViolationKind::NamespaceBoundaryViolation {
            name: entry.resource_name.clone(),
            namespace: namespace.to_string(),
            operation: entry.operation.clone(),
        })
    }
}
