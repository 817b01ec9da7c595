//! Reads the secret referenced by a `Database`'s `credentialsRef` (spec §4.2 step 3).

use crate::crd::{CredentialsRef, Database};
use crate::dsn::Credentials;
use crate::error::{Error, Result};

use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::{Client, ResourceExt};

/// Fetch and decode the username/password referenced by `database.spec.credentials_ref`.
/// `sqlite` databases have no `credentialsRef` and this is never called for them.
pub async fn resolve(client: &Client, database: &Database) -> Result<Credentials> {
    // safe unwrap: callers only invoke this for non-sqlite types, which require credentialsRef
    let database_namespace = database.namespace().unwrap();
    let credentials_ref = database
        .spec
        .credentials_ref
        .as_ref()
        .expect("caller must only resolve credentials for types that require credentialsRef");

    fetch(client, &database_namespace, credentials_ref).await
}

async fn fetch(
    client: &Client,
    database_namespace: &str,
    credentials_ref: &CredentialsRef,
) -> Result<Credentials> {
    let namespace = credentials_ref.resolved_namespace(database_namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets
        .get(&credentials_ref.name)
        .await
        .map_err(|e| match &e {
            kube::Error::Api(ae) if ae.code == 404 => Error::SecretNotFound {
                namespace: namespace.to_string(),
                name: credentials_ref.name.clone(),
            },
            _ => Error::KubeError(
                format!(
                    "failed to read secret {namespace}/{name}",
                    name = credentials_ref.name
                ),
                Box::new(e),
            ),
        })?;

    let user_key = credentials_ref.resolved_user_key();
    let password_key = credentials_ref.resolved_password_key();
    let username = decode_key(&secret, namespace, &credentials_ref.name, user_key)?;
    let password = decode_key(&secret, namespace, &credentials_ref.name, password_key)?;

    Ok(Credentials { username, password })
}

fn decode_key(secret: &Secret, namespace: &str, name: &str, key: &str) -> Result<String> {
    let missing = || Error::SecretKeyMissing {
        namespace: namespace.to_string(),
        name: name.to_string(),
        key: key.to_string(),
    };

    if let Some(string_data) = secret.string_data.as_ref() {
        if let Some(value) = string_data.get(key) {
            return Ok(value.clone());
        }
    }
    let data = secret.data.as_ref().ok_or_else(missing)?;
    let bytes = data.get(key).ok_or_else(missing)?;
    String::from_utf8(bytes.0.clone())
        .map_err(|_| Error::SecretKeyMissing {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: format!("{key} (not valid UTF-8)"),
        })
}
