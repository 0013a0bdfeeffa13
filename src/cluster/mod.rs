//! Cluster queries and resource application
//!
//! The connector talks to the cluster through [`ClusterClient`], a small,
//! synchronous surface that the production [`KubectlClient`] implements by
//! shelling out to `kubectl`. Calls block until the command exits and carry
//! no retry logic of their own; a failing command aborts the running handler.
//!
//! The functions in this module interpret what the client returns (which
//! namespace hosts the ingress controller, which node port serves HTTP,
//! which nodes are workers) and are kept free of I/O so they can be tested
//! against plain Kubernetes objects.

mod kubectl;

use std::path::Path;

use k8s_openapi::api::core::v1::{Namespace, Node, Service};
use kube::ResourceExt;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::identity::Identity;
use crate::{Error, Result};

pub use kubectl::{CommandOutput, CommandRunner, KubectlClient, RealCommandRunner};

/// Label carried by control plane nodes
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Synchronous view of the cluster API
#[cfg_attr(test, automock)]
pub trait ClusterClient: Send + Sync {
    /// List all namespaces
    fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    /// Fetch a service, `None` if it does not exist
    fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>>;

    /// Addresses of ready worker nodes
    fn worker_node_addresses(&self) -> Result<Vec<String>>;

    /// Identity owning the named resource, read from its `selector` label
    ///
    /// `None` if no labelled resource with that name exists in the namespace.
    fn resource_owner(
        &self,
        namespace: &str,
        name: &str,
        selector: &str,
    ) -> Result<Option<Identity>>;

    /// Apply a rendered manifest
    ///
    /// Returns `Ok(false)` when the cluster rejected the manifest and an error
    /// only when the client itself could not run.
    fn apply_resource(&self, manifest: &Path) -> Result<bool>;
}

/// Find the first namespace whose name contains `marker`
pub fn find_ingress_namespace(client: &dyn ClusterClient, marker: &str) -> Result<String> {
    let namespaces = client.list_namespaces()?;
    let found = namespaces
        .iter()
        .map(|ns| ns.name_any())
        .find(|name| name.contains(marker));

    match found {
        Some(name) => {
            info!(namespace = %name, "found ingress namespace");
            Ok(name)
        }
        None => {
            debug!(count = namespaces.len(), marker = %marker, "no ingress namespace yet");
            Err(Error::namespace_not_found(marker))
        }
    }
}

/// Node port mapped to `port` on the service, if any
pub fn node_port_for(service: &Service, port: i32) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.port == port)
        .and_then(|p| p.node_port)
}

/// Look up the node port serving `port` on the named service
pub fn resolve_node_port(
    client: &dyn ClusterClient,
    service: &str,
    namespace: &str,
    port: i32,
) -> Result<i32> {
    let not_found = || Error::NodePortNotFound {
        service: service.to_string(),
        namespace: namespace.to_string(),
        port,
    };

    let svc = client.get_service(service, namespace)?.ok_or_else(not_found)?;
    let node_port = node_port_for(&svc, port).ok_or_else(not_found)?;
    debug!(service = %service, port, node_port, "resolved ingress node port");
    Ok(node_port)
}

/// Internal addresses of ready nodes without the control plane role
pub fn worker_addresses(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| !node.labels().contains_key(CONTROL_PLANE_LABEL))
        .filter_map(|node| {
            let status = node.status.as_ref()?;
            let ready = status
                .conditions
                .as_ref()
                .map(|conds| {
                    conds
                        .iter()
                        .any(|c| c.type_ == "Ready" && c.status == "True")
                })
                .unwrap_or(false);
            if !ready {
                return None;
            }
            status
                .addresses
                .as_ref()?
                .iter()
                .find(|a| a.type_ == "InternalIP")
                .map(|a| a.address.clone())
        })
        .collect()
}
