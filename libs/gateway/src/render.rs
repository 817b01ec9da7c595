//! TOML + credential rendering (spec §4.3 steps 4-5, §6.4-6.6).
//!
//! For every selected, connected `Database` this resolves its credentials, derives the
//! full DSN, and emits a `[[sources]]` entry whose `dsn` is an `${ENV}_DSN` placeholder.
//! The real DSN goes only into the in-memory credential map destined for the derived
//! Secret; the ConfigMap only ever sees the placeholder.

use crate::crd::{DBHubInstance, DefaultPolicy};
use crate::error::{Error, Result};

use std::collections::BTreeMap;

use dbhub_database::crd::{Database, DatabaseType};
use dbhub_database::{credentials, dsn};

use kube::Client;
use kube::ResourceExt;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Serialize, Default)]
struct RenderedConfig {
    sources: Vec<SourceEntry>,
    tools: Vec<ToolEntry>,
}

#[derive(Serialize)]
struct SourceEntry {
    id: String,
    dsn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_timeout: Option<u32>,
}

#[derive(Serialize)]
struct ToolEntry {
    name: String,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    readonly: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_rows: Option<u32>,
}

/// Output of rendering a gateway's config: the ConfigMap body, the credentials bound
/// for the derived Secret, and the content hash to publish in `status.configHash`.
pub struct Rendered {
    pub toml: String,
    pub credentials: BTreeMap<String, String>,
    pub hash: String,
}

/// Uppercase `name`, mapping `-` and `.` to `_` (spec §6.5).
pub fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Render the gateway's config + credentials for `databases` (already selector- and
/// phase-filtered by [`crate::selector::resolve`]).
pub async fn render(client: &Client, instance: &DBHubInstance, databases: &[Database]) -> Result<Rendered> {
    let default_policy = instance.spec.default_policy.clone().unwrap_or_default();

    let mut sources = Vec::with_capacity(databases.len());
    let mut tools = Vec::new();
    let mut creds_map = BTreeMap::new();

    for database in databases {
        let name = database.name_any();
        let env = env_name(&name);
        let dsn_key = format!("{env}_DSN");

        let full_dsn = full_dsn_for(client, database).await?;
        creds_map.insert(dsn_key.clone(), full_dsn);

        sources.push(SourceEntry {
            id: name.clone(),
            dsn: format!("${{{dsn_key}}}"),
            connection_timeout: database.spec.connection_timeout,
            query_timeout: database.spec.query_timeout,
        });

        tools.extend(tools_for(&name, &default_policy));
    }

    let config = RenderedConfig { sources, tools };
    let toml = toml::to_string(&config).map_err(|e| Error::RenderError(e.to_string()))?;
    let hash = fingerprint(&toml);

    Ok(Rendered {
        toml,
        credentials: creds_map,
        hash,
    })
}

async fn full_dsn_for(client: &Client, database: &Database) -> Result<String> {
    let built = if database.spec.type_ == DatabaseType::Sqlite {
        dsn::build(&database.spec, None).map_err(|e| Error::RenderError(e.to_string()))?
    } else {
        let creds = credentials::resolve(client, database)
            .await
            .map_err(Error::SecretReadError)?;
        dsn::build(&database.spec, Some(&creds)).map_err(|e| Error::RenderError(e.to_string()))?
    };
    Ok(built.full)
}

/// Tool entries for one selected source. Per spec §4.3 step 4, `readonly` and `max_rows`
/// come from the instance's `defaultPolicy`, not from the individual `Database`.
fn tools_for(source_name: &str, default_policy: &DefaultPolicy) -> Vec<ToolEntry> {
    let read_only = default_policy.read_only.unwrap_or(true);
    let max_rows = default_policy.max_rows;
    let operations = default_policy.allowed_operations.clone().unwrap_or_default();

    operations
        .into_iter()
        .map(|name| ToolEntry {
            name,
            source: source_name.to_string(),
            readonly: Some(read_only),
            max_rows,
        })
        .collect()
}

/// First 8 bytes of the SHA-256 of `toml`, hex-encoded (spec §4.3 step 5).
pub fn fingerprint(toml: &str) -> String {
    let digest = Sha256::digest(toml.as_bytes());
    hex_encode(&digest[..8])
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_name_maps_hyphen_and_dot_to_underscore() {
        assert_eq!(env_name("prod-eu.west"), "PROD_EU_WEST");
    }

    #[test]
    fn fingerprint_is_stable_and_16_hex_chars() {
        let a = fingerprint("[[sources]]\nid = \"x\"\n");
        let b = fingerprint("[[sources]]\nid = \"x\"\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = fingerprint("a");
        let b = fingerprint("b");
        assert_ne!(a, b);
    }
}
