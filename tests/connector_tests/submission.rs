//! Integration tests for resource submission
//!
//! These tests tell the story of several deployments sharing one cluster.
//! Ownership lives in the cluster itself (the owner label on each applied
//! resource), so a second deployment discovers the first one's resources
//! only through the cluster.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use ssl_ingress::cluster::{resolve_node_port, ClusterClient};
use ssl_ingress::identity::Identity;
use ssl_ingress::resource::{AppRequests, RequestBatch, ResourceSubmitter, SubmissionError};
use ssl_ingress::store::IdentityStore;
use ssl_ingress::INGRESS_HTTP_PORT;

use super::helpers::{open_store, FakeCluster};

const NAMESPACE: &str = "ingress-nginx";

// =============================================================================
// Test Fixtures
// =============================================================================

fn service(name: &str, ports: &[i32]) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name},
        "spec": {
            "type": "NodePort",
            "ports": ports.iter().map(|p| json!({"port": p})).collect::<Vec<_>>()
        }
    })
}

fn batch(identity: &str, requests: Vec<Value>) -> RequestBatch {
    RequestBatch::from([(
        Identity::new(identity),
        AppRequests {
            model_uuid: "model-1".to_string(),
            unit: identity.to_string(),
            requests,
        },
    )])
}

/// A deployment's submitter with its own state file
fn submitter(
    dir: &TempDir,
    name: &str,
    cluster: &Arc<FakeCluster>,
) -> (ResourceSubmitter, IdentityStore) {
    let store = open_store(&dir.path().join(format!("{name}.json")));
    store.set_namespace(NAMESPACE).unwrap();
    store.set_deployer_path(&dir.path().join(name)).unwrap();
    let cluster: Arc<dyn ClusterClient> = cluster.clone();
    (ResourceSubmitter::new(cluster, store.clone(), NAMESPACE), store)
}

// =============================================================================
// Story: Two Deployments, One Name
// =============================================================================

/// The first deployment to claim `svc-x` keeps it; the second is told about
/// the clash and its other resources still go through.
#[test]
fn story_second_owner_of_a_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let cluster = FakeCluster::with_namespaces(&[NAMESPACE]);
    let (first, first_store) = submitter(&dir, "first", &cluster);
    let (second, second_store) = submitter(&dir, "second", &cluster);

    let errors = first
        .submit(&batch("id1", vec![service("svc-x", &[80])]))
        .unwrap();
    assert!(errors.is_empty());
    assert!(first_store.error_states().unwrap().is_empty());

    let errors = second
        .submit(&batch(
            "id2",
            vec![service("svc-x", &[80]), service("svc-y", &[80])],
        ))
        .unwrap();
    assert_eq!(
        errors.get(&Identity::new("id2")),
        Some(&SubmissionError::DuplicateName {
            resource: "svc-x".to_string()
        })
    );
    assert_eq!(second_store.error_states().unwrap(), errors);

    // svc-x still belongs to id1, svc-y went through as id2's first resource
    let owner = cluster
        .resource_owner(NAMESPACE, "svc-x", ssl_ingress::DEFAULT_OWNER_SELECTOR)
        .unwrap();
    assert_eq!(owner, Some(Identity::new("id1")));
    let svc_y = cluster.object(NAMESPACE, "svc-y").unwrap();
    assert_eq!(
        svc_y["metadata"]["annotations"][ssl_ingress::ANNOTATION_UNIQUE_ID],
        "0"
    );
}

/// Resubmitting your own resource is not a clash.
#[test]
fn story_resubmission_by_owner_is_accepted() {
    let dir = TempDir::new().unwrap();
    let cluster = FakeCluster::with_namespaces(&[NAMESPACE]);
    let (sub, _) = submitter(&dir, "first", &cluster);

    for _ in 0..2 {
        let errors = sub.submit(&batch("id1", vec![service("svc-x", &[80])])).unwrap();
        assert!(errors.is_empty());
    }
    assert_eq!(cluster.applied().len(), 2);
}

// =============================================================================
// Story: Error Map Reflects Only The Latest Batch
// =============================================================================

#[test]
fn story_error_map_is_replaced_not_merged() {
    let dir = TempDir::new().unwrap();
    let cluster = FakeCluster::with_namespaces(&[NAMESPACE]);
    let (first, _) = submitter(&dir, "first", &cluster);
    let (second, store) = submitter(&dir, "second", &cluster);

    first.submit(&batch("id0", vec![service("svc-x", &[80])])).unwrap();

    // B1: clash
    second.submit(&batch("id1", vec![service("svc-x", &[80])])).unwrap();
    assert_eq!(store.error_states().unwrap().len(), 1);

    // B2: clean
    second.submit(&batch("id1", vec![service("svc-z", &[80])])).unwrap();
    assert!(store.error_states().unwrap().is_empty());

    // The empty map survives reopening the state file
    let reopened = open_store(&dir.path().join("second.json"));
    assert!(reopened.error_states().unwrap().is_empty());
}

/// A rejected apply is recorded and the batch carries on.
#[test]
fn story_rejected_apply_is_recorded() {
    let dir = TempDir::new().unwrap();
    let cluster = FakeCluster::with_namespaces(&[NAMESPACE]);
    cluster.reject("svc-bad");
    let (sub, store) = submitter(&dir, "first", &cluster);

    sub.submit(&batch(
        "id1",
        vec![service("svc-bad", &[80]), service("svc-good", &[80])],
    ))
    .unwrap();

    assert_eq!(
        store.error_states().unwrap().get(&Identity::new("id1")),
        Some(&SubmissionError::SubmissionFailed {
            resource: "svc-bad".to_string()
        })
    );
    assert!(cluster.object(NAMESPACE, "svc-good").is_some());
}

// =============================================================================
// Story: Node Port Resolution
// =============================================================================

/// The HTTP node port is picked out of a multi-port service.
#[test]
fn story_node_port_for_http() {
    let dir = TempDir::new().unwrap();
    let cluster = FakeCluster::with_namespaces(&[NAMESPACE]);
    let (sub, _) = submitter(&dir, "first", &cluster);
    sub.submit(&batch("id1", vec![service("web", &[443, 80])]))
        .unwrap();

    let port = resolve_node_port(cluster.as_ref(), "web", NAMESPACE, INGRESS_HTTP_PORT).unwrap();
    assert_eq!(port, 31080);

    let missing = resolve_node_port(cluster.as_ref(), "absent", NAMESPACE, INGRESS_HTTP_PORT);
    assert!(matches!(
        missing,
        Err(ssl_ingress::Error::NodePortNotFound { .. })
    ));
}
