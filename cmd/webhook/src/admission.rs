//! `admission.k8s.io/v1` `AdmissionReview` request/response envelope, shared by the
//! defaulting (`mutate`) and validating (`validate`) routes.

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize)]
pub struct AdmissionReview<T> {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub request: Option<AdmissionRequest<T>>,
    pub response: Option<AdmissionResponse>,
}

#[derive(Deserialize, Serialize)]
pub struct AdmissionRequest<T> {
    pub uid: String,
    pub operation: String,
    pub object: Option<T>,
    #[serde(rename = "oldObject", default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<T>,
}

#[derive(Deserialize, Serialize)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(rename = "patchType", skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Deserialize, Serialize)]
pub struct Status {
    pub message: String,
}

impl AdmissionResponse {
    pub fn allow(uid: String) -> Self {
        Self {
            uid,
            allowed: true,
            status: None,
            warnings: None,
            patch_type: None,
            patch: None,
        }
    }

    /// Allow, surfacing non-blocking field warnings (spec §4.1: "warnings are
    /// surfaced but do not block").
    pub fn allow_with_warnings(uid: String, warnings: Vec<String>) -> Self {
        let warnings = (!warnings.is_empty()).then_some(warnings);
        Self {
            uid,
            allowed: true,
            status: None,
            warnings,
            patch_type: None,
            patch: None,
        }
    }

    pub fn deny(uid: String, message: impl Into<String>) -> Self {
        Self {
            uid,
            allowed: false,
            status: Some(Status {
                message: message.into(),
            }),
            warnings: None,
            patch_type: None,
            patch: None,
        }
    }

    /// Allow with a base64-encoded JSON Patch applying the defaulter's changes, plus
    /// any warnings accumulated while defaulting (e.g. a `maxRows` above the soft cap).
    pub fn patched(uid: String, patch: json_patch::Patch, warnings: Vec<String>) -> Self {
        if patch.0.is_empty() {
            return Self::allow_with_warnings(uid, warnings);
        }
        // safe unwrap: `Patch` serializes infallibly
        let encoded = serde_json::to_vec(&patch).unwrap();
        let warnings = (!warnings.is_empty()).then_some(warnings);
        Self {
            uid,
            allowed: true,
            status: None,
            warnings,
            patch_type: Some("JSONPatch".to_string()),
            patch: Some(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, encoded)),
        }
    }
}

impl<T> AdmissionReview<T> {
    pub fn response(self, response: AdmissionResponse) -> AdmissionReview<()> {
        AdmissionReview {
            api_version: "admission.k8s.io/v1".to_string(),
            kind: "AdmissionReview".to_string(),
            request: None,
            response: Some(response),
        }
    }
}
