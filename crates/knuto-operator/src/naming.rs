//! Naming rules for mirrored objects
//!
//! Every object mirrored into the shared Strimzi namespace is named
//! `{tenant-namespace}-{name}`. Namespace names may themselves contain `-`,
//! so a mirrored name alone never identifies its tenant. The inverse mapping
//! therefore always goes through the provenance record stored on the object
//! (see [`crate::provenance`]); this module only checks that a name and a
//! provenance record agree.

use crate::provenance::SourceRef;

/// Separator between the tenant namespace and the local name
pub const SEPARATOR: char = '-';

/// Suffix of the client configuration secret written back to the tenant
pub const CLIENT_CONFIG_SUFFIX: &str = "-kafka-config";

/// Name of the mirrored object for `name` declared in `namespace`
pub fn mirrored_name(namespace: &str, name: &str) -> String {
    format!("{namespace}{SEPARATOR}{name}")
}

/// Whether `name` starts with `{namespace}-`
pub fn is_tenant_scoped(name: &str, namespace: &str) -> bool {
    name.strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with(SEPARATOR))
}

/// Name of the client configuration secret derived for a tenant user
pub fn client_config_secret_name(local_name: &str) -> String {
    format!("{local_name}{CLIENT_CONFIG_SUFFIX}")
}

/// Recover the tenant namespace of `mirrored` from its provenance record.
///
/// Returns `None` when the record does not describe an object that would be
/// mirrored under that name.
pub fn recover_tenant<'a>(mirrored: &str, provenance: &'a SourceRef) -> Option<&'a str> {
    (mirrored_name(&provenance.namespace, &provenance.name) == mirrored)
        .then_some(provenance.namespace.as_str())
}
