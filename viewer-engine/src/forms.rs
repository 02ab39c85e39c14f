// viewer-engine/src/forms.rs
use common::{parse_manifest, CSRF_FIELD, FILES_FIELD, PURPOSE_FIELD};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::challenge::PurposeBook;
use crate::uploads::{UploadHandle, UploadTable};

/// A submission that passed its challenge.
///
/// `PURPOSE` holds the real purpose name; declared files are available as
/// upload handles instead of raw manifest entries.
#[derive(Debug, Clone)]
pub struct CleanedForm {
    fields: Map<String, Value>,
    uploads: HashMap<String, Vec<UploadHandle>>,
}

impl CleanedForm {
    pub fn purpose(&self) -> &str {
        self.get_str(PURPOSE_FIELD).unwrap_or_default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Files declared under a form field
    pub fn uploads(&self, field: &str) -> &[UploadHandle] {
        self.uploads.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn all_uploads(&self) -> impl Iterator<Item = &UploadHandle> {
        self.uploads.values().flatten()
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

/// Validate and remove the challenge fields of a raw submission.
///
/// The challenge is consumed under the purpose lock, so concurrent
/// submissions of the same `PURPOSE` value cannot both pass.
pub(crate) fn strip_challenge(
    purposes: &Mutex<PurposeBook>,
    uploads: &UploadTable,
    upload_stall: Duration,
    mut form: Map<String, Value>,
) -> Option<CleanedForm> {
    if !form.contains_key(PURPOSE_FIELD) || !form.contains_key(CSRF_FIELD) {
        tracing::debug!("Dropping form without challenge fields");
        return None;
    }

    let purpose_value = form.remove(PURPOSE_FIELD)?;
    let secret = form.remove(CSRF_FIELD)?;
    let (Value::String(purpose_value), Value::String(secret)) = (purpose_value, secret) else {
        tracing::debug!("Dropping form with non-string challenge fields");
        return None;
    };

    let purpose = {
        let mut book = purposes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        book.redeem(&purpose_value, &secret)
    };
    let Some(purpose) = purpose else {
        tracing::debug!("Dropping form that failed its challenge");
        return None;
    };

    let mut declared_uploads = HashMap::new();
    if let Some(manifest) = form.remove(FILES_FIELD) {
        let manifest = match parse_manifest(manifest) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("Dropping form with malformed upload manifest: {}", e);
                return None;
            }
        };
        for (field, files) in manifest {
            let handles: Vec<UploadHandle> = files
                .into_iter()
                .map(|declared| uploads.declare(declared, upload_stall))
                .collect();
            declared_uploads.insert(field, handles);
        }
    }

    form.insert(PURPOSE_FIELD.to_string(), Value::String(purpose));
    Some(CleanedForm {
        fields: form,
        uploads: declared_uploads,
    })
}
