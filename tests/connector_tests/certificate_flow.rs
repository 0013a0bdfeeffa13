//! Integration tests for the certificate flow
//!
//! These tests tell the story of one deployment across many invocations.
//! Every invocation reopens the state file, so nothing survives between them
//! except what was persisted.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use ssl_ingress::config::ConnectorConfig;
use ssl_ingress::identity::Identity;
use ssl_ingress::machine::{
    CertificateRequestStateMachine, CertificateState, NotReady, Outcome, MSG_AWAITING_CERTIFICATE,
    MSG_FQDNS_MISSING, MSG_READY, MSG_RELATION_MISSING,
};
use ssl_ingress::relation::{CertInfo, FileRelation, SslTerminationRelation, Upstream};
use ssl_ingress::scheduler::{DispatchReport, EventScheduler, Handler, Triggers};
use ssl_ingress::status::{StatusState, WorkloadStatus};
use ssl_ingress::{Error, INGRESS_SERVICE_NAME};

use super::helpers::{config, open_store, FakeCluster, FakeRelation};

// =============================================================================
// Test Fixtures
// =============================================================================

struct Deployment {
    dir: TempDir,
    state: PathBuf,
    cluster: Arc<FakeCluster>,
}

impl Deployment {
    fn new(namespaces: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state.json");
        let store = open_store(&state);
        store.set_deployer_path(&dir.path().join("deployer")).unwrap();
        Self {
            state,
            cluster: FakeCluster::with_namespaces(namespaces),
            dir,
        }
    }

    fn deployer_path(&self) -> PathBuf {
        open_store(&self.state).deployer_path().unwrap().unwrap()
    }

    /// One invocation, deriving triggers the way the binary does
    fn invoke(
        &self,
        config: ConnectorConfig,
        relation: Option<&FakeRelation>,
        relation_updated: bool,
    ) -> ssl_ingress::Result<DispatchReport> {
        let scheduler = self.scheduler(config)?;
        let triggers = Triggers {
            relation_updated,
            ..scheduler.triggers(None)?
        };
        scheduler.dispatch(&triggers, relation.map(|r| r as &dyn SslTerminationRelation))
    }

    /// One invocation against a file-backed relation, as the binary runs it
    fn invoke_with_files(
        &self,
        config: ConnectorConfig,
        relation: &FileRelation,
    ) -> ssl_ingress::Result<DispatchReport> {
        let scheduler = self.scheduler(config)?;
        let triggers = scheduler.triggers(relation.status_digest()?)?;
        scheduler.dispatch(&triggers, Some(relation))
    }

    fn scheduler(&self, config: ConnectorConfig) -> ssl_ingress::Result<EventScheduler> {
        let store = open_store(&self.state);
        let cluster = self.cluster.clone();
        let machine = CertificateRequestStateMachine::new(config, store.clone(), cluster)?;
        Ok(EventScheduler::new(machine, store))
    }

    fn status(&self) -> Option<WorkloadStatus> {
        open_store(&self.state).workload_status().unwrap()
    }

    fn state(&self) -> CertificateState {
        open_store(&self.state).markers().unwrap().state
    }
}

fn handlers(report: &DispatchReport) -> Vec<Handler> {
    report.iter().map(|(handler, _)| *handler).collect()
}

// =============================================================================
// Story: From Installation To A Confirmed Certificate
// =============================================================================

/// The operator deploys the connector before relating it to a proxy, then
/// adds the relation, and the proxy eventually confirms the certificate.
#[test]
fn story_certificate_is_requested_and_confirmed() {
    let deployment = Deployment::new(&["kube-system", "ingress-nginx-kubernetes-worker"]);
    deployment.cluster.add_worker("10.0.0.10");
    deployment.cluster.add_worker("10.0.0.11");
    let relation = FakeRelation::default();

    // Chapter 1: installed, but no proxy yet
    let report = deployment.invoke(config("a.example b.example"), None, false).unwrap();
    assert_eq!(
        report,
        vec![
            (Handler::Install, Outcome::Done),
            // first sight of the configuration, nothing requested to invalidate
            (Handler::ConfigChanged, Outcome::Skipped),
            (Handler::RelationMissing, Outcome::Done),
        ]
    );
    assert_eq!(
        deployment.status(),
        Some(WorkloadStatus::blocked(MSG_RELATION_MISSING))
    );
    assert!(deployment
        .cluster
        .object("ingress-nginx-kubernetes-worker", INGRESS_SERVICE_NAME)
        .is_some());

    // Chapter 2: the relation appears and the request goes out
    let report = deployment
        .invoke(config("a.example b.example"), Some(&relation), false)
        .unwrap();
    assert_eq!(report, vec![(Handler::RelationAvailable, Outcome::Done)]);
    let sent = relation.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].fqdn, vec!["a.example", "b.example"]);
    assert_eq!(sent[0].contact_email, "ops@example.com");
    assert_eq!(
        sent[0].upstreams,
        vec![
            Upstream::for_worker("10.0.0.10", 31080),
            Upstream::for_worker("10.0.0.11", 31080),
        ]
    );
    assert_eq!(
        deployment.status(),
        Some(WorkloadStatus::waiting(MSG_AWAITING_CERTIFICATE))
    );
    assert_eq!(open_store(&deployment.state).nodeport().unwrap(), Some(31080));

    // Chapter 3: the proxy reports a certificate for someone else
    relation.report(&["c.example"]);
    let report = deployment
        .invoke(config("a.example b.example"), Some(&relation), true)
        .unwrap();
    assert_eq!(
        report,
        vec![(
            Handler::RelationUpdate,
            Outcome::NotReady(NotReady::Unconfirmed)
        )]
    );
    assert_eq!(deployment.state(), CertificateState::RequestSent);

    // Chapter 4: a shared certificate reports one of our names
    relation.report(&["b.example"]);
    let report = deployment
        .invoke(config("a.example b.example"), Some(&relation), false)
        .unwrap();
    assert_eq!(report, vec![(Handler::RelationUpdate, Outcome::Done)]);
    assert_eq!(deployment.state(), CertificateState::Confirmed);
    assert_eq!(deployment.status(), Some(WorkloadStatus::active(MSG_READY)));

    // Chapter 5: nothing left to do
    let report = deployment
        .invoke(config("a.example b.example"), Some(&relation), true)
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(relation.sent().len(), 1);
}

// =============================================================================
// Story: Reconfiguration
// =============================================================================

/// Changing the fqdns re-sends the request; changing only the contact email
/// does not.
#[test]
fn story_fqdn_change_reissues_certificate() {
    let deployment = Deployment::new(&["ingress-nginx"]);
    deployment.cluster.add_worker("10.0.0.10");
    let relation = FakeRelation::default();

    deployment
        .invoke(config("a.example"), Some(&relation), false)
        .unwrap();
    assert_eq!(relation.sent().len(), 1);

    // Same configuration: never re-sent
    deployment
        .invoke(config("a.example"), Some(&relation), false)
        .unwrap();
    assert_eq!(relation.sent().len(), 1);

    // Contact email alone does not invalidate the certificate
    let mut new_email = config("a.example");
    new_email.contact_email = "security@example.com".to_string();
    let report = deployment.invoke(new_email, Some(&relation), false).unwrap();
    assert!(report.is_empty());
    assert_eq!(relation.sent().len(), 1);

    // New fqdns: invalidated and re-requested in the same invocation
    let report = deployment
        .invoke(config("a.example c.example"), Some(&relation), false)
        .unwrap();
    assert_eq!(
        handlers(&report),
        vec![Handler::ConfigChanged, Handler::RelationAvailable]
    );
    let sent = relation.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].fqdn, vec!["a.example", "c.example"]);
}

/// Status the proxy published for an earlier request never confirms a
/// request sent after the fqdns changed.
#[test]
fn story_stale_status_does_not_confirm_new_request() {
    let deployment = Deployment::new(&["ingress-nginx"]);
    deployment.cluster.add_worker("10.0.0.10");
    let relation = FileRelation::new(deployment.dir.path().join("relation"));
    let status_file = relation.dir().join(FileRelation::STATUS_FILE);
    let sent = || -> CertInfo {
        let body = std::fs::read_to_string(relation.dir().join(FileRelation::CERT_INFO_FILE));
        serde_json::from_str(&body.unwrap()).unwrap()
    };

    deployment
        .invoke_with_files(config("a.example"), &relation)
        .unwrap();
    assert_eq!(deployment.state(), CertificateState::RequestSent);

    std::fs::write(&status_file, r#"[{"status": ["a.example"]}]"#).unwrap();
    let report = deployment
        .invoke_with_files(config("a.example"), &relation)
        .unwrap();
    assert_eq!(report, vec![(Handler::RelationUpdate, Outcome::Done)]);
    assert_eq!(deployment.state(), CertificateState::Confirmed);

    // New fqdns, status file untouched: request re-sent, not yet confirmed
    let report = deployment
        .invoke_with_files(config("a.example c.example"), &relation)
        .unwrap();
    assert_eq!(
        handlers(&report),
        vec![Handler::ConfigChanged, Handler::RelationAvailable]
    );
    assert_eq!(sent().fqdn, vec!["a.example", "c.example"]);
    assert_eq!(deployment.state(), CertificateState::RequestSent);
    assert_eq!(
        deployment.status(),
        Some(WorkloadStatus::waiting(MSG_AWAITING_CERTIFICATE))
    );

    // Still nothing new from the proxy
    let report = deployment
        .invoke_with_files(config("a.example c.example"), &relation)
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(deployment.state(), CertificateState::RequestSent);

    // The proxy answers the new request
    std::fs::write(&status_file, r#"[{"status": ["c.example"]}]"#).unwrap();
    let report = deployment
        .invoke_with_files(config("a.example c.example"), &relation)
        .unwrap();
    assert_eq!(report, vec![(Handler::RelationUpdate, Outcome::Done)]);
    assert_eq!(deployment.state(), CertificateState::Confirmed);
    assert_eq!(deployment.status(), Some(WorkloadStatus::active(MSG_READY)));
}

// =============================================================================
// Story: Cluster Not Ready Yet
// =============================================================================

/// Without an ingress namespace the install aborts, and succeeds on a later
/// invocation once the namespace exists.
#[test]
fn story_install_retries_until_ingress_namespace_exists() {
    let deployment = Deployment::new(&["kube-system"]);

    let err = deployment.invoke(config("a.example"), None, false).unwrap_err();
    assert!(matches!(err, Error::NamespaceNotFound { .. }));
    assert_eq!(deployment.state(), CertificateState::Uninstalled);

    let ingress = FakeCluster::with_namespaces(&["ingress"]);
    let deployment = Deployment {
        cluster: ingress,
        ..deployment
    };
    let report = deployment.invoke(config("a.example"), None, false).unwrap();
    assert_eq!(report[0], (Handler::Install, Outcome::Done));
    assert_eq!(deployment.state(), CertificateState::AwaitingRelation);
}

/// Missing fqdns and missing workers hold the request back without sending.
#[test]
fn story_request_waits_for_fqdns_and_workers() {
    let deployment = Deployment::new(&["ingress-nginx"]);
    let relation = FakeRelation::default();

    let report = deployment.invoke(config(""), Some(&relation), false).unwrap();
    assert_eq!(
        report.last(),
        Some(&(
            Handler::RelationAvailable,
            Outcome::NotReady(NotReady::FqdnsMissing)
        ))
    );
    assert_eq!(
        deployment.status().map(|s| (s.state, s.message)),
        Some((StatusState::Blocked, MSG_FQDNS_MISSING.to_string()))
    );

    let report = deployment
        .invoke(config("a.example"), Some(&relation), false)
        .unwrap();
    assert_eq!(
        report.last(),
        Some(&(
            Handler::RelationAvailable,
            Outcome::NotReady(NotReady::NoWorkers)
        ))
    );
    assert!(relation.sent().is_empty());

    deployment.cluster.add_worker("10.0.0.10");
    deployment
        .invoke(config("a.example"), Some(&relation), false)
        .unwrap();
    assert_eq!(relation.sent().len(), 1);
}

// =============================================================================
// Story: Repeated Installation
// =============================================================================

/// Running the install handler again applies nothing new and keeps the
/// identity stable.
#[test]
fn story_install_is_idempotent() {
    let deployment = Deployment::new(&["ingress-nginx"]);
    let store = open_store(&deployment.state);
    let machine = CertificateRequestStateMachine::new(
        config("a.example"),
        store.clone(),
        deployment.cluster.clone(),
    )
    .unwrap();

    assert_eq!(machine.on_installed().unwrap(), Outcome::Done);
    let applied = deployment.cluster.applied();
    assert_eq!(applied.len(), 2);

    assert_eq!(machine.on_installed().unwrap(), Outcome::Skipped);
    assert_eq!(deployment.cluster.applied(), applied);

    let identity = store.identity().unwrap().unwrap();
    assert_eq!(identity, Identity::derive("f3a1c2d4-model", "ssl-ingress"));
    assert_eq!(store.used_apps().unwrap(), vec![identity.clone()]);
    assert!(deployment
        .deployer_path()
        .join("resources")
        .join(identity.as_str())
        .is_dir());
}

/// A cached identity is never recomputed, even if the inputs change.
#[test]
fn story_cached_identity_wins() {
    let deployment = Deployment::new(&["ingress-nginx"]);
    open_store(&deployment.state)
        .set_identity(&Identity::new("pinned"))
        .unwrap();

    deployment.invoke(config("a.example"), None, false).unwrap();

    let service = deployment
        .cluster
        .object("ingress-nginx", INGRESS_SERVICE_NAME)
        .unwrap();
    assert_eq!(
        service["metadata"]["labels"][ssl_ingress::DEFAULT_OWNER_SELECTOR],
        "pinned"
    );
}
