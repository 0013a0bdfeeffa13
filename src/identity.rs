//! Stable deployment identity
//!
//! Every resource this deployment submits is labelled with its identity so
//! that ownership can be checked before a name is reused. The identity is the
//! hex MD5 digest of `model_uuid + application_name`, which keeps it stable
//! across unit restarts and identical to the value older deployments wrote.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::IdentityStore;
use crate::Result;

/// Stable per-deployment identifier used to scope owned resources
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an existing identity value (e.g. one read back from the cluster)
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive the identity for an application in a model
    pub fn derive(model_uuid: &str, application: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(model_uuid.as_bytes());
        hasher.update(application.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Return the cached identity, deriving and caching it on first use
    ///
    /// A cached value always wins, even if the model or application would
    /// now hash differently.
    pub fn get_or_create(
        store: &IdentityStore,
        model_uuid: &str,
        application: &str,
    ) -> Result<Self> {
        if let Some(existing) = store.identity()? {
            debug!(identity = %existing, "using cached identity");
            return Ok(existing);
        }

        let identity = Self::derive(model_uuid, application);
        store.set_identity(&identity)?;
        info!(identity = %identity, application = %application, "derived deployment identity");
        Ok(identity)
    }

    /// Borrow the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
