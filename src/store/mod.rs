//! Persistent key-value state
//!
//! All state that must survive between handler invocations lives behind the
//! [`KeyValueStore`] trait. [`IdentityStore`] layers typed accessors for the
//! well-known keys on top of it; components never keep their own copy of a
//! value across invocations.
//!
//! Writes are last-write-wins per key. There are no transactions: handlers
//! run one at a time, so a handler owns the store for its whole run.

mod file;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use crate::config::ConfigSnapshot;
use crate::identity::Identity;
use crate::machine::Markers;
use crate::resource::ErrorStateMap;
use crate::status::WorkloadStatus;
use crate::{Error, Result};

pub use file::FileStore;

/// Cached deployment identity
pub const KEY_IDENTITY: &str = "k8s_uuid";
/// Resolved ingress namespace
pub const KEY_NAMESPACE: &str = "namespace";
/// Resolved ingress node port
pub const KEY_NODEPORT: &str = "nodeport";
/// Identities submitted by the last installation batch
pub const KEY_USED_APPS: &str = "used_apps";
/// Per-identity errors from the last submission batch
pub const KEY_ERROR_STATES: &str = "error-states";
/// Root directory for rendered resource artifacts
pub const KEY_DEPLOYER_PATH: &str = "deployer_path";
/// Label key that records resource ownership
pub const KEY_SELECTOR: &str = "juju_app_selector";
/// Certificate request markers
pub const KEY_FLAGS: &str = "flags";
/// Configuration seen by the previous dispatch
pub const KEY_LAST_CONFIG: &str = "last-config";
/// Operator-facing status
pub const KEY_WORKLOAD_STATUS: &str = "workload-status";
/// Digest of the relation status the previous dispatch acted on
pub const KEY_RELATION_STATUS: &str = "relation-status";

/// Untyped key-value storage
#[cfg_attr(test, automock)]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if the key was never set
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// In-memory store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`, ready for [`IdentityStore::new`]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::store("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::store("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Typed view over the connector's persisted keys
#[derive(Clone)]
pub struct IdentityStore {
    kv: Arc<dyn KeyValueStore>,
}

impl IdentityStore {
    /// Wrap a key-value backend
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Read and deserialize a key
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::store(format!("key '{key}' holds unexpected data: {e}"))),
        }
    }

    /// Serialize and write a key
    pub fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.set(key, serde_json::to_value(value)?)
    }

    /// Cached deployment identity
    pub fn identity(&self) -> Result<Option<Identity>> {
        self.get_as(KEY_IDENTITY)
    }

    /// Cache the deployment identity
    pub fn set_identity(&self, identity: &Identity) -> Result<()> {
        self.set_as(KEY_IDENTITY, identity)
    }

    /// Resolved ingress namespace, with trailing whitespace removed
    pub fn namespace(&self) -> Result<Option<String>> {
        Ok(self
            .get_as::<String>(KEY_NAMESPACE)?
            .map(|ns| ns.trim_end().to_string()))
    }

    /// Persist the resolved ingress namespace
    pub fn set_namespace(&self, namespace: &str) -> Result<()> {
        self.set_as(KEY_NAMESPACE, namespace)
    }

    /// Resolved ingress node port
    pub fn nodeport(&self) -> Result<Option<i32>> {
        self.get_as(KEY_NODEPORT)
    }

    /// Persist the resolved ingress node port
    pub fn set_nodeport(&self, port: i32) -> Result<()> {
        self.set_as(KEY_NODEPORT, &port)
    }

    /// Identities used by the last installation batch
    pub fn used_apps(&self) -> Result<Vec<Identity>> {
        Ok(self.get_as(KEY_USED_APPS)?.unwrap_or_default())
    }

    /// Record the identities used by an installation batch
    pub fn set_used_apps(&self, apps: &[Identity]) -> Result<()> {
        self.set_as(KEY_USED_APPS, apps)
    }

    /// Errors from the last submission batch
    pub fn error_states(&self) -> Result<ErrorStateMap> {
        Ok(self.get_as(KEY_ERROR_STATES)?.unwrap_or_default())
    }

    /// Replace the stored error map
    pub fn set_error_states(&self, errors: &ErrorStateMap) -> Result<()> {
        self.set_as(KEY_ERROR_STATES, errors)
    }

    /// Root directory for rendered artifacts
    pub fn deployer_path(&self) -> Result<Option<PathBuf>> {
        self.get_as(KEY_DEPLOYER_PATH)
    }

    /// Set the root directory for rendered artifacts
    pub fn set_deployer_path(&self, path: &std::path::Path) -> Result<()> {
        self.set_as(KEY_DEPLOYER_PATH, path)
    }

    /// Label key that records resource ownership
    pub fn selector(&self) -> Result<Option<String>> {
        self.get_as(KEY_SELECTOR)
    }

    /// Set the label key that records resource ownership
    pub fn set_selector(&self, selector: &str) -> Result<()> {
        self.set_as(KEY_SELECTOR, selector)
    }

    /// Certificate request markers, defaulting to a fresh deployment
    pub fn markers(&self) -> Result<Markers> {
        Ok(self.get_as(KEY_FLAGS)?.unwrap_or_default())
    }

    /// Persist certificate request markers
    pub fn set_markers(&self, markers: &Markers) -> Result<()> {
        self.set_as(KEY_FLAGS, markers)
    }

    /// Configuration seen by the previous dispatch
    pub fn last_config(&self) -> Result<Option<ConfigSnapshot>> {
        self.get_as(KEY_LAST_CONFIG)
    }

    /// Remember the configuration for the next dispatch
    pub fn set_last_config(&self, snapshot: &ConfigSnapshot) -> Result<()> {
        self.set_as(KEY_LAST_CONFIG, snapshot)
    }

    /// Operator-facing status
    pub fn workload_status(&self) -> Result<Option<WorkloadStatus>> {
        self.get_as(KEY_WORKLOAD_STATUS)
    }

    /// Publish an operator-facing status
    pub fn set_workload_status(&self, status: &WorkloadStatus) -> Result<()> {
        self.set_as(KEY_WORKLOAD_STATUS, status)
    }

    /// Digest of the relation status already acted on
    pub fn relation_status(&self) -> Result<Option<String>> {
        self.get_as(KEY_RELATION_STATUS)
    }

    /// Remember the relation status digest for the next dispatch
    pub fn set_relation_status(&self, digest: &str) -> Result<()> {
        self.set_as(KEY_RELATION_STATUS, digest)
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}
