//! Idempotent submission of resource batches

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument, warn};

use super::{
    resource_name, ArtifactWriter, ErrorStateMap, RequestBatch, ResourceRequest, SubmissionError,
};
use crate::cluster::ClusterClient;
use crate::identity::Identity;
use crate::store::IdentityStore;
use crate::{Error, Result, DEFAULT_OWNER_SELECTOR};

/// Submits resource batches to the cluster
///
/// Ownership checks run against `owner_namespace` (the configured namespace),
/// while resources are submitted into the namespace resolved during
/// installation and read from the store. The two are deliberately separate
/// inputs.
pub struct ResourceSubmitter {
    cluster: Arc<dyn ClusterClient>,
    store: IdentityStore,
    owner_namespace: String,
}

impl ResourceSubmitter {
    /// Create a submitter
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: IdentityStore,
        owner_namespace: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            store,
            owner_namespace: owner_namespace.into(),
        }
    }

    /// Label key recording resource ownership
    fn selector(&self) -> Result<String> {
        Ok(self
            .store
            .selector()?
            .unwrap_or_else(|| DEFAULT_OWNER_SELECTOR.to_string()))
    }

    /// Artifact writer rooted at the persisted deployer path
    pub fn artifacts(&self) -> Result<ArtifactWriter> {
        self.store
            .deployer_path()?
            .map(ArtifactWriter::new)
            .ok_or_else(|| Error::store("deployer_path is not set"))
    }

    /// Whether `name` is already owned by an identity other than `uuid`
    pub fn is_duplicate_name(&self, name: &str, uuid: &Identity) -> Result<bool> {
        let selector = self.selector()?;
        let owner = self
            .cluster
            .resource_owner(&self.owner_namespace, name, &selector)?;
        Ok(matches!(owner, Some(ref existing) if existing != uuid))
    }

    /// Submit a batch and persist the resulting error map
    ///
    /// Resources whose name is owned by another identity are skipped with a
    /// [`SubmissionError::DuplicateName`]; rejected applies are recorded as
    /// [`SubmissionError::SubmissionFailed`]. Neither stops the batch.
    /// Anything already applied stays applied. The persisted error map is
    /// replaced, never merged, so only this batch's failures remain visible.
    #[instrument(skip_all, fields(identities = batch.len()))]
    pub fn submit(&self, batch: &RequestBatch) -> Result<ErrorStateMap> {
        let namespace = self
            .store
            .namespace()?
            .ok_or_else(|| Error::store("ingress namespace has not been resolved"))?;
        let selector = self.selector()?;
        let artifacts = self.artifacts()?;
        let mut errors = ErrorStateMap::new();

        for (uuid, app) in batch {
            let mut unique_id = 0u32;
            for resource in &app.requests {
                let Some(name) = resource_name(resource) else {
                    warn!(identity = %uuid, "resource has no metadata.name, skipping");
                    errors.insert(
                        uuid.clone(),
                        SubmissionError::SubmissionFailed {
                            resource: "<unnamed>".to_string(),
                        },
                    );
                    continue;
                };

                if self.is_duplicate_name(name, uuid)? {
                    warn!(identity = %uuid, resource = %name, "duplicate name for resource");
                    errors.insert(
                        uuid.clone(),
                        SubmissionError::DuplicateName {
                            resource: name.to_string(),
                        },
                    );
                    continue;
                }

                let request = ResourceRequest {
                    uuid: uuid.clone(),
                    resource: resource.clone(),
                    namespace: namespace.clone(),
                    unique_id,
                    model_uuid: app.model_uuid.clone(),
                    unit: app.unit.clone(),
                };
                unique_id += 1;

                let path = artifacts.write_request(&request, &selector)?;
                if self.cluster.apply_resource(&path)? {
                    info!(
                        identity = %uuid,
                        resource = %name,
                        unique_id = request.unique_id,
                        "resource applied"
                    );
                } else {
                    errors.insert(
                        uuid.clone(),
                        SubmissionError::SubmissionFailed {
                            resource: name.to_string(),
                        },
                    );
                }
            }
        }

        self.store.set_error_states(&errors)?;
        Ok(errors)
    }

    /// Write and apply a namespace manifest owned by `uuid`
    ///
    /// A rejected apply is logged and otherwise ignored: the namespace usually
    /// exists already because it was discovered in the cluster.
    pub fn ensure_namespace(&self, manifest: &Value, uuid: &Identity) -> Result<()> {
        let name = resource_name(manifest)
            .ok_or_else(|| Error::template("namespace manifest has no metadata.name"))?;
        let request = ResourceRequest {
            uuid: uuid.clone(),
            resource: manifest.clone(),
            namespace: name.to_string(),
            unique_id: 0,
            model_uuid: String::new(),
            unit: String::new(),
        };
        let body = request.render(&self.selector()?);
        let path = self.artifacts()?.write_namespace(name, &body)?;

        if self.cluster.apply_resource(&path)? {
            info!(namespace = %name, "namespace configured");
        } else {
            warn!(namespace = %name, "namespace apply rejected");
        }
        Ok(())
    }
}
