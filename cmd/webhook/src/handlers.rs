use crate::admission::{AdmissionResponse, AdmissionReview};
use crate::{defaulter, validator};

use axum::response::Json;
use dbhub_database::crd::{Database, DatabaseSpec};
use dbhub_gateway::crd::{DBHubInstance, DBHubInstanceSpec};
use tracing::{debug, error};

trait HasSpec {
    type Spec;
    fn spec_mut(&mut self) -> &mut Self::Spec;
}

impl HasSpec for Database {
    type Spec = DatabaseSpec;
    fn spec_mut(&mut self) -> &mut DatabaseSpec {
        &mut self.spec
    }
}

impl HasSpec for DBHubInstance {
    type Spec = DBHubInstanceSpec;
    fn spec_mut(&mut self) -> &mut DBHubInstanceSpec {
        &mut self.spec
    }
}

/// Shared mutating-admission flow: diff the object before and after defaulting and
/// return the difference as a JSON Patch (spec §4.1).
fn mutate<T, F>(review: AdmissionReview<T>, default_spec: F) -> Json<AdmissionReview<()>>
where
    T: Clone + serde::Serialize + HasSpec,
    F: FnOnce(&mut T::Spec),
{
    let request = match review.request.as_ref() {
        Some(req) => req,
        None => {
            error!("missing request in admission review");
            return Json(review.response(AdmissionResponse::deny(
                "unknown".to_string(),
                "invalid admission review: missing request",
            )));
        }
    };
    let uid = request.uid.clone();
    let Some(object) = request.object.as_ref() else {
        error!("missing object in admission request");
        return Json(review.response(AdmissionResponse::deny(uid, "invalid admission review: missing object")));
    };

    let original = serde_json::to_value(object).unwrap_or(serde_json::Value::Null);
    let mut defaulted = object.clone();
    default_spec(defaulted.spec_mut());
    let updated = serde_json::to_value(&defaulted).unwrap_or(serde_json::Value::Null);

    let patch = json_patch::diff(&original, &updated);
    debug!(operations = patch.0.len(), "computed defaulting patch");
    Json(review.response(AdmissionResponse::patched(uid, patch, Vec::new())))
}

/// Mutating handler for `Database`.
pub async fn mutate_database(Json(review): Json<AdmissionReview<Database>>) -> Json<AdmissionReview<()>> {
    mutate(review, defaulter::default_database)
}

/// Mutating handler for `DBHubInstance`.
pub async fn mutate_dbhub_instance(Json(review): Json<AdmissionReview<DBHubInstance>>) -> Json<AdmissionReview<()>> {
    mutate(review, defaulter::default_instance)
}

fn respond(uid: String, outcome: validator::Validation, kind: &str, name: &str) -> Json<AdmissionReview<()>> {
    if outcome.is_valid() {
        debug!(kind, name, warnings = outcome.warnings.len(), "validation passed");
        Json(AdmissionReview {
            api_version: "admission.k8s.io/v1".to_string(),
            kind: "AdmissionReview".to_string(),
            request: None,
            response: Some(AdmissionResponse::allow_with_warnings(uid, outcome.warnings)),
        })
    } else {
        let message = outcome.error_message();
        debug!(kind, name, message = %message, "validation failed");
        Json(AdmissionReview {
            api_version: "admission.k8s.io/v1".to_string(),
            kind: "AdmissionReview".to_string(),
            request: None,
            response: Some(AdmissionResponse::deny(uid, message)),
        })
    }
}

/// Validating handler for `Database`.
pub async fn validate_database(Json(review): Json<AdmissionReview<Database>>) -> Json<AdmissionReview<()>> {
    let request = match review.request.as_ref() {
        Some(req) => req,
        None => {
            error!("missing request in admission review");
            return Json(review.response(AdmissionResponse::deny(
                "unknown".to_string(),
                "invalid admission review: missing request",
            )));
        }
    };
    let uid = request.uid.clone();
    let Some(object) = request.object.as_ref() else {
        error!("missing object in admission request");
        return Json(review.response(AdmissionResponse::deny(uid, "invalid admission review: missing object")));
    };
    let old = request.old_object.as_ref().map(|o| &o.spec);
    let name = object.metadata.name.as_deref().unwrap_or("<unknown>");

    let outcome = validator::validate_database(&object.spec, old);
    respond(uid, outcome, "Database", name)
}

/// Validating handler for `DBHubInstance`.
pub async fn validate_dbhub_instance(Json(review): Json<AdmissionReview<DBHubInstance>>) -> Json<AdmissionReview<()>> {
    let request = match review.request.as_ref() {
        Some(req) => req,
        None => {
            error!("missing request in admission review");
            return Json(review.response(AdmissionResponse::deny(
                "unknown".to_string(),
                "invalid admission review: missing request",
            )));
        }
    };
    let uid = request.uid.clone();
    let Some(object) = request.object.as_ref() else {
        error!("missing object in admission request");
        return Json(review.response(AdmissionResponse::deny(uid, "invalid admission review: missing object")));
    };
    let old = request.old_object.as_ref().map(|o| &o.spec);
    let name = object.metadata.name.as_deref().unwrap_or("<unknown>");

    let outcome = validator::validate_instance(&object.spec, old);
    respond(uid, outcome, "DBHubInstance", name)
}
