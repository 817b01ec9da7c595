//! Mutating-admission defaulting (spec §4.1 "Defaulter"). Every function here is
//! idempotent: applying it twice to the same spec produces the same spec.

use dbhub_database::crd::{CredentialsRef, DatabaseSpec, DatabaseType};
use dbhub_gateway::crd::{DBHubInstanceSpec, DefaultPolicy};

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

pub const DEFAULT_GATEWAY_IMAGE: &str = dbhub_gateway::resources::deployment::DEFAULT_IMAGE;

/// `0` is the zero value `spec.port` decodes to when the field is entirely absent from
/// the submitted manifest, so it's treated the same as "unset" here.
fn port_is_unset(port: Option<u16>) -> bool {
    matches!(port, None | Some(0))
}

/// Fill in a `Database`'s unset optional fields (spec §4.1).
pub fn default_database(spec: &mut DatabaseSpec) {
    if port_is_unset(spec.port) {
        spec.port = spec.type_.default_port();
    }
    if spec.connection_timeout.is_none() {
        spec.connection_timeout = Some(30);
    }
    if spec.query_timeout.is_none() {
        spec.query_timeout = Some(60);
    }
    if spec.max_rows.is_none() {
        spec.max_rows = Some(1000);
    }
    if spec.type_.requires_host() {
        if let Some(credentials_ref) = spec.credentials_ref.as_mut() {
            default_credentials_ref(credentials_ref);
        }
    }
}

fn default_credentials_ref(credentials_ref: &mut CredentialsRef) {
    if credentials_ref.user_key.is_none() {
        credentials_ref.user_key = Some("username".to_string());
    }
    if credentials_ref.password_key.is_none() {
        credentials_ref.password_key = Some("password".to_string());
    }
}

/// Fill in a `DBHubInstance`'s unset optional fields (spec §4.1).
pub fn default_instance(spec: &mut DBHubInstanceSpec) {
    if spec.replicas.is_none() {
        spec.replicas = Some(1);
    }
    if spec.image.is_none() {
        spec.image = Some(DEFAULT_GATEWAY_IMAGE.to_string());
    }
    if spec.image_pull_policy.is_none() {
        spec.image_pull_policy = Some("IfNotPresent".to_string());
    }
    if spec.port.is_none() || spec.port == Some(0) {
        spec.port = Some(8080);
    }
    if spec.resources.is_none() {
        spec.resources = Some(baseline_resources());
    }
    if spec.default_policy.is_none() {
        spec.default_policy = Some(DefaultPolicy {
            read_only: Some(true),
            max_rows: Some(1000),
            allowed_operations: Some(vec!["execute_sql".to_string(), "search_objects".to_string()]),
        });
    }
}

fn baseline_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(
            [
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("128Mi".to_string())),
            ]
            .into_iter()
            .collect(),
        ),
        limits: Some(
            [
                ("cpu".to_string(), Quantity("500m".to_string())),
                ("memory".to_string(), Quantity("512Mi".to_string())),
            ]
            .into_iter()
            .collect(),
        ),
        ..ResourceRequirements::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbhub_database::crd::SslMode;

    fn postgres_spec() -> DatabaseSpec {
        DatabaseSpec {
            type_: DatabaseType::Postgres,
            host: Some("db.example.com".to_string()),
            port: None,
            database: "appdb".to_string(),
            credentials_ref: Some(CredentialsRef {
                name: "creds".to_string(),
                namespace: None,
                user_key: None,
                password_key: None,
            }),
            ssl_mode: SslMode::Disable,
            connection_timeout: None,
            query_timeout: None,
            max_rows: None,
            read_only: false,
            description: None,
        }
    }

    #[test]
    fn default_port_follows_type() {
        let mut spec = postgres_spec();
        default_database(&mut spec);
        assert_eq!(spec.port, Some(5432));

        let mut mysql = postgres_spec();
        mysql.type_ = DatabaseType::Mysql;
        default_database(&mut mysql);
        assert_eq!(mysql.port, Some(3306));

        let mut sqlserver = postgres_spec();
        sqlserver.type_ = DatabaseType::Sqlserver;
        default_database(&mut sqlserver);
        assert_eq!(sqlserver.port, Some(1433));
    }

    #[test]
    fn explicit_zero_port_is_treated_as_unset() {
        let mut spec = postgres_spec();
        spec.port = Some(0);
        default_database(&mut spec);
        assert_eq!(spec.port, Some(5432));
    }

    #[test]
    fn sqlite_gets_no_port_default() {
        let mut spec = postgres_spec();
        spec.type_ = DatabaseType::Sqlite;
        spec.host = None;
        spec.credentials_ref = None;
        default_database(&mut spec);
        assert_eq!(spec.port, None);
    }

    #[test]
    fn database_defaulting_is_idempotent() {
        let mut spec = postgres_spec();
        default_database(&mut spec);
        let once = spec.clone();
        default_database(&mut spec);
        assert_eq!(spec, once);
    }

    #[test]
    fn instance_defaulting_is_idempotent() {
        let mut spec = DBHubInstanceSpec::default();
        default_instance(&mut spec);
        let once = spec.clone();
        default_instance(&mut spec);
        assert_eq!(spec, once);
    }

    #[test]
    fn instance_gets_baseline_resources_and_policy() {
        let mut spec = DBHubInstanceSpec::default();
        default_instance(&mut spec);
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.port, Some(8080));
        let policy = spec.default_policy.unwrap();
        assert_eq!(policy.read_only, Some(true));
        assert_eq!(policy.allowed_operations, Some(vec!["execute_sql".to_string(), "search_objects".to_string()]));
    }
}
