//! Resource requests and their submission
//!
//! A [`RequestBatch`] groups resource bodies by the [`Identity`] that owns
//! them. The [`ResourceSubmitter`] walks a batch in order, skips resources
//! whose name is already owned by another identity, writes each remaining
//! resource to an artifact on disk and applies it. Failures are collected per
//! identity into an [`ErrorStateMap`] instead of aborting the batch.

mod artifact;
mod submitter;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Identity;
use crate::{ANNOTATION_MODEL_UUID, ANNOTATION_UNIQUE_ID, ANNOTATION_UNIT};

pub use artifact::{ArtifactWriter, NAMESPACES_DIR, RESOURCES_DIR};
pub use submitter::ResourceSubmitter;

/// Resources requested by one identity
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AppRequests {
    /// Model the requesting unit belongs to
    pub model_uuid: String,
    /// Requesting unit
    pub unit: String,
    /// Resource bodies, submitted in order
    pub requests: Vec<Value>,
}

/// Resources to submit, keyed by owning identity
pub type RequestBatch = BTreeMap<Identity, AppRequests>;

/// Last submission failure per identity
pub type ErrorStateMap = BTreeMap<Identity, SubmissionError>;

/// Why a resource was not submitted
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SubmissionError {
    /// The resource name is already owned by another identity
    #[error("Duplicate name for resource: {resource}")]
    DuplicateName {
        /// Conflicting resource name
        resource: String,
    },

    /// The cluster rejected the resource
    #[error("Could not create requested resources: {resource}")]
    SubmissionFailed {
        /// Resource that failed to apply
        resource: String,
    },
}

/// One resource body with the metadata needed to submit it
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRequest {
    /// Owning identity
    pub uuid: Identity,
    /// Declarative resource body
    pub resource: Value,
    /// Target namespace
    pub namespace: String,
    /// Sequence number within the identity's batch
    pub unique_id: u32,
    /// Model of the requesting unit
    pub model_uuid: String,
    /// Requesting unit
    pub unit: String,
}

impl ResourceRequest {
    /// `metadata.name` of the resource body
    pub fn name(&self) -> Option<&str> {
        resource_name(&self.resource)
    }

    /// Resource body as it will be applied
    ///
    /// Sets the target namespace (except for cluster-scoped namespaces
    /// themselves), labels the resource with its owner under `selector` and
    /// records the requesting unit in annotations.
    pub fn render(&self, selector: &str) -> Value {
        let mut body = self.resource.clone();
        let is_namespace = body.get("kind").and_then(Value::as_str) == Some("Namespace");

        if let Some(obj) = body.as_object_mut() {
            update_object(obj, "metadata", |metadata| {
                if !is_namespace {
                    metadata.insert(
                        "namespace".to_string(),
                        Value::String(self.namespace.clone()),
                    );
                }

                update_object(metadata, "labels", |labels| {
                    labels.insert(selector.to_string(), Value::String(self.uuid.to_string()));
                });

                update_object(metadata, "annotations", |annotations| {
                    annotations.insert(
                        ANNOTATION_MODEL_UUID.to_string(),
                        Value::String(self.model_uuid.clone()),
                    );
                    annotations.insert(
                        ANNOTATION_UNIT.to_string(),
                        Value::String(self.unit.clone()),
                    );
                    annotations.insert(
                        ANNOTATION_UNIQUE_ID.to_string(),
                        Value::String(self.unique_id.to_string()),
                    );
                });
            });
        }

        body
    }
}

/// `metadata.name` of a resource body
pub fn resource_name(resource: &Value) -> Option<&str> {
    resource.get("metadata")?.get("name")?.as_str()
}

/// Update a nested JSON object in place, replacing a missing or non-object
/// value with an empty object first
fn update_object(
    parent: &mut Map<String, Value>,
    key: &str,
    update: impl FnOnce(&mut Map<String, Value>),
) {
    let mut map = match parent.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    update(&mut map);
    parent.insert(key.to_string(), Value::Object(map));
}
