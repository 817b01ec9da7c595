//! Canonical `app.kubernetes.io/*` labels applied to every child resource.

pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const NAME_VALUE: &str = "dbhub";
pub const MANAGED_BY_VALUE: &str = "dbhub-operator";

pub const CONFIG_HASH_LABEL: &str = "config-hash";

/// Build the canonical label set for a child of `instance_name`, scoped to `component`
/// (e.g. `"database-mcp"` for the gateway's children).
pub fn canonical_labels(
    instance_name: &str,
    component: &str,
) -> std::collections::BTreeMap<String, String> {
    std::collections::BTreeMap::from([
        (NAME_LABEL.to_string(), NAME_VALUE.to_string()),
        (INSTANCE_LABEL.to_string(), instance_name.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}
