//! Error types for the SSL ingress connector

use thiserror::Error;

/// Main error type for connector operations
///
/// Every variant aborts the running handler. Per-resource submission failures
/// are not errors at this level; they are collected into the error map as
/// [`SubmissionError`](crate::resource::SubmissionError) values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No namespace containing the ingress marker exists yet
    #[error("no namespace containing '{marker}' found")]
    NamespaceNotFound {
        /// Substring searched for in namespace names
        marker: String,
    },

    /// The ingress service does not expose a node port for the requested port
    #[error("service {namespace}/{service} has no node port for port {port}")]
    NodePortNotFound {
        /// Name of the ingress service
        service: String,
        /// Namespace the service was looked up in
        namespace: String,
        /// Service port that was resolved
        port: i32,
    },

    /// An external command could not run or exited unsuccessfully
    #[error("{command} failed: {message}")]
    ProcessExit {
        /// Command line that was executed
        command: String,
        /// Stderr or spawn error
        message: String,
    },

    /// Configuration rejected at startup
    #[error("invalid configuration for '{field}': {message}")]
    ConfigInvalid {
        /// Offending configuration key
        field: String,
        /// Why the value was rejected
        message: String,
    },

    /// Persisted state could not be read or written
    #[error("store error: {0}")]
    Store(String),

    /// Manifest rendering failed
    #[error("template error: {0}")]
    Template(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Relation data could not be exchanged
    #[error("relation error: {0}")]
    Relation(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a namespace-not-found error for the given marker
    pub fn namespace_not_found(marker: impl Into<String>) -> Self {
        Self::NamespaceNotFound {
            marker: marker.into(),
        }
    }

    /// Create a process failure error
    pub fn process_exit(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessExit {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error for the given field
    pub fn config_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a store error with the given message
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a template error with the given message
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a relation error with the given message
    pub fn relation(msg: impl Into<String>) -> Self {
        Self::Relation(msg.into())
    }

    /// Whether the cluster is simply not in the expected state yet
    ///
    /// These errors clear up on their own once the ingress controller is
    /// deployed, so the scheduler re-invokes the handler on the next trigger.
    pub fn is_cluster_not_ready(&self) -> bool {
        matches!(
            self,
            Self::NamespaceNotFound { .. } | Self::NodePortNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
