//! ssl-ingress - ingress endpoint and TLS certificate connector
//!
//! The connector exposes cluster workloads through an ingress node port and
//! asks an external ssl-termination proxy to issue a certificate for them.
//!
//! # Architecture
//!
//! Every invocation is a single, synchronous pass:
//! - The [`scheduler`] derives triggers from persisted markers, the relation
//!   and configuration changes
//! - The [`machine`] runs the matching certificate-request transitions
//! - Resources are submitted idempotently through [`resource`], which checks
//!   cluster ownership before applying anything
//! - All state lives in the [`store`] and is re-read on every invocation
//!
//! # Modules
//!
//! - [`cluster`] - Cluster queries and `kubectl` adapter
//! - [`config`] - Operator configuration and change tracking
//! - [`error`] - Error types for the connector
//! - [`identity`] - Stable per-deployment identity
//! - [`machine`] - Certificate-request state machine
//! - [`manifest`] - Built-in manifest templates
//! - [`relation`] - ssl-termination relation messages
//! - [`resource`] - Resource requests, artifacts and submission
//! - [`scheduler`] - Trigger evaluation and handler dispatch
//! - [`status`] - Operator-facing workload status
//! - [`store`] - Persistent key-value state

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod identity;
pub mod machine;
pub mod manifest;
pub mod relation;
pub mod resource;
pub mod scheduler;
pub mod status;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace used for ownership checks when none is configured
pub const DEFAULT_CONFIG_NAMESPACE: &str = "default";

/// Label key recording which identity owns a submitted resource
pub const DEFAULT_OWNER_SELECTOR: &str = "ssl-ingress.dev/owner";

/// Annotation carrying the requesting model
pub const ANNOTATION_MODEL_UUID: &str = "ssl-ingress.dev/model-uuid";

/// Annotation carrying the requesting unit
pub const ANNOTATION_UNIT: &str = "ssl-ingress.dev/unit";

/// Annotation carrying the per-batch sequence number
pub const ANNOTATION_UNIQUE_ID: &str = "ssl-ingress.dev/unique-id";

/// Substring identifying the ingress controller namespace
pub const INGRESS_NAMESPACE_MARKER: &str = "ingress";

/// Service exposing the ingress controller on a node port
pub const INGRESS_SERVICE_NAME: &str = "ingress-nginx-kubernetes-worker";

/// Ingress port the proxy forwards plain HTTP to
pub const INGRESS_HTTP_PORT: i32 = 80;
