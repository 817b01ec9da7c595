//! Selector resolution (spec §4.3 step 2): list every `Database` in the gateway's
//! namespace, filter by `matchNames`/`matchLabels`, retain only the `Connected` ones,
//! and return a stable, name-sorted slice. Every later reconcile step (credential
//! rendering, `status.connectedDatabases`) operates on exactly this list.

use crate::crd::{DBHubInstance, DatabaseSelector};
use crate::error::{Error, Result};

use dbhub_database::crd::{Database, DatabasePhase};

use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};

/// List every `Database` in `instance`'s namespace, keep those matching its selector and
/// currently `Connected`, and return them sorted by name.
pub async fn resolve(client: &Client, instance: &DBHubInstance) -> Result<Vec<Database>> {
    // safe unwrap: DBHubInstance is namespace scoped
    let namespace = instance.namespace().unwrap();
    let api: Api<Database> = Api::namespaced(client.clone(), &namespace);
    let all = api
        .list(&ListParams::default())
        .await
        .map_err(|e| Error::KubeError(format!("failed to list Database in {namespace}"), Box::new(e)))?;

    let mut matched: Vec<Database> = all
        .items
        .into_iter()
        .filter(|db| matches(instance.spec.database_selector.as_ref(), db) && is_connected(db))
        .collect();
    matched.sort_by(|a, b| a.name_any().cmp(&b.name_any()));
    Ok(matched)
}

fn is_connected(database: &Database) -> bool {
    matches!(
        database.status.as_ref().and_then(|s| s.phase),
        Some(DatabasePhase::Connected)
    )
}

/// Whether `database` satisfies `selector`, independent of its connection phase. An
/// absent selector, or one whose `matchNames`/`matchLabels` are both unset, matches
/// every `Database` in the namespace.
pub fn matches(selector: Option<&DatabaseSelector>, database: &Database) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    let names_ok = match &selector.match_names {
        Some(names) => names.iter().any(|n| n == &database.name_any()),
        None => true,
    };
    let labels_ok = match &selector.match_labels {
        Some(labels) => {
            let object_labels = database.labels();
            labels.iter().all(|(k, v)| object_labels.get(k) == Some(v))
        }
        None => true,
    };

    names_ok && labels_ok
}

/// Sorted, distinct names of `databases`. Used once `resolve` has already filtered to
/// the matching, `Connected` set.
pub fn names(databases: &[Database]) -> Vec<String> {
    databases.iter().map(|db| db.name_any()).collect()
}
