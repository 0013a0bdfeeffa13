//! Rendered resource artifacts on disk

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use super::ResourceRequest;
use crate::{Error, Result};

/// Directory (under the deployer root) holding submitted resources
pub const RESOURCES_DIR: &str = "resources";
/// Directory (under the deployer root) holding namespace manifests
pub const NAMESPACES_DIR: &str = "namespaces";

/// Writes rendered manifests below a deployer root directory
///
/// Artifacts are the durable record of what was applied: one YAML file per
/// resource, grouped by owning identity.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    /// Create a writer rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Deployer root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a prepared request, returning the artifact path
    pub fn write_request(&self, request: &ResourceRequest, selector: &str) -> Result<PathBuf> {
        let body = request.render(selector);
        let kind = body
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("resource")
            .to_lowercase();
        let name = request.name().unwrap_or("unnamed");

        let dir = self.root.join(RESOURCES_DIR).join(request.uuid.as_str());
        let file = format!("{:03}-{}-{}.yaml", request.unique_id, kind, name);
        self.write(&dir, &file, &body)
    }

    /// Write a namespace manifest, returning the artifact path
    pub fn write_namespace(&self, name: &str, body: &Value) -> Result<PathBuf> {
        let dir = self.root.join(NAMESPACES_DIR);
        self.write(&dir, &format!("{name}.yaml"), body)
    }

    fn write(&self, dir: &Path, file: &str, body: &Value) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file);
        let yaml = serde_yaml::to_string(body)
            .map_err(|e| Error::serialization(format!("{file}: {e}")))?;
        std::fs::write(&path, yaml)?;
        debug!(path = %path.display(), "wrote resource artifact");
        Ok(path)
    }

    /// Remove and recreate artifact subdirectories for a clean slate
    pub fn clean(&self, subdirs: &[&str]) -> Result<()> {
        for subdir in subdirs {
            let path = self.root.join(subdir);
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            std::fs::create_dir_all(&path)?;
            info!(path = %path.display(), "cleaned artifact directory");
        }
        Ok(())
    }
}
