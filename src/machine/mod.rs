//! Certificate-request state machine
//!
//! The connector progresses through [`CertificateState`]:
//!
//! ```text
//! Uninstalled -> AwaitingRelation -> RequestSent -> Confirmed
//!                      ^                  |             |
//!                      +---- fqdns or credentials changed
//! ```
//!
//! State is never cached between invocations. Every transition reads the
//! persisted [`Markers`], acts, and writes them back, so re-running a
//! handler whose guard no longer holds is a no-op.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cluster::{find_ingress_namespace, resolve_node_port, ClusterClient};
use crate::config::{ConfigField, ConnectorConfig};
use crate::identity::Identity;
use crate::manifest::ManifestRenderer;
use crate::relation::{confirmed_fqdn, CertInfo, SslTerminationRelation, Upstream};
use crate::resource::{AppRequests, RequestBatch, ResourceSubmitter, RESOURCES_DIR};
use crate::status::WorkloadStatus;
use crate::store::IdentityStore;
use crate::{
    Error, Result, INGRESS_HTTP_PORT, INGRESS_NAMESPACE_MARKER, INGRESS_SERVICE_NAME,
};

/// Status shown while the ssl-termination relation is absent
pub const MSG_RELATION_MISSING: &str = "Waiting for ssl-termination-proxy relation";
/// Status shown while no fqdns are configured
pub const MSG_FQDNS_MISSING: &str = "Waiting for fqdns config";
/// Status shown after the certificate request was sent
pub const MSG_AWAITING_CERTIFICATE: &str = "Waiting for proxy to register certificate";
/// Status shown once the certificate is confirmed
pub const MSG_READY: &str = "Ready";

/// Progress of the certificate request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateState {
    /// Ingress service not yet submitted
    #[default]
    Uninstalled,
    /// Installed, no certificate requested for the current fqdns
    AwaitingRelation,
    /// Certificate requested, not yet confirmed by the proxy
    RequestSent,
    /// Proxy reported a certificate covering a configured fqdn
    Confirmed,
}

impl fmt::Display for CertificateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninstalled => write!(f, "uninstalled"),
            Self::AwaitingRelation => write!(f, "awaiting-relation"),
            Self::RequestSent => write!(f, "request-sent"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Persisted scheduler markers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Markers {
    /// Current certificate state
    #[serde(default)]
    pub state: CertificateState,
    /// The relation reported new status that has not been matched yet
    #[serde(default)]
    pub update_pending: bool,
}

impl Markers {
    /// `installed` flag
    pub fn installed(&self) -> bool {
        self.state != CertificateState::Uninstalled
    }

    /// `cert-requested` flag
    pub fn cert_requested(&self) -> bool {
        matches!(
            self.state,
            CertificateState::RequestSent | CertificateState::Confirmed
        )
    }

    /// `cert-created` flag
    pub fn cert_created(&self) -> bool {
        self.state == CertificateState::Confirmed
    }
}

/// Why a handler returned without completing its transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotReady {
    /// No fqdns are configured
    FqdnsMissing,
    /// No worker node is ready to receive traffic
    NoWorkers,
    /// The relation has not reported a configured fqdn
    Unconfirmed,
    /// The relation reported status before a request was sent
    NoRequest,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FqdnsMissing => write!(f, "no fqdns configured"),
            Self::NoWorkers => write!(f, "no ready worker nodes"),
            Self::Unconfirmed => write!(f, "certificate not confirmed"),
            Self::NoRequest => write!(f, "no certificate request sent"),
        }
    }
}

/// Result of running a handler
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The transition ran
    Done,
    /// The guard did not hold; nothing happened
    Skipped,
    /// Preconditions are not met yet; retry on a later trigger
    NotReady(NotReady),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::Skipped => write!(f, "skipped"),
            Self::NotReady(reason) => write!(f, "not ready: {reason}"),
        }
    }
}

/// Drives installation, certificate request and confirmation
pub struct CertificateRequestStateMachine {
    config: ConnectorConfig,
    store: IdentityStore,
    cluster: Arc<dyn ClusterClient>,
    submitter: ResourceSubmitter,
    manifests: ManifestRenderer,
}

impl CertificateRequestStateMachine {
    /// Create a state machine, validating the configuration up front
    pub fn new(
        config: ConnectorConfig,
        store: IdentityStore,
        cluster: Arc<dyn ClusterClient>,
    ) -> Result<Self> {
        config.validate()?;
        let submitter = ResourceSubmitter::new(cluster.clone(), store.clone(), &config.namespace);
        Ok(Self {
            config,
            store,
            cluster,
            submitter,
            manifests: ManifestRenderer::new()?,
        })
    }

    /// Validated configuration
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Persisted markers
    pub fn markers(&self) -> Result<Markers> {
        self.store.markers()
    }

    /// Current certificate state
    pub fn state(&self) -> Result<CertificateState> {
        Ok(self.markers()?.state)
    }

    fn set_state(&self, state: CertificateState) -> Result<()> {
        let mut markers = self.markers()?;
        if markers.state != state {
            debug!(from = %markers.state, to = %state, "certificate state transition");
            markers.state = state;
            self.store.set_markers(&markers)?;
        }
        Ok(())
    }

    fn set_status(&self, status: WorkloadStatus) -> Result<()> {
        info!(state = %status.state, message = %status.message, "workload status");
        self.store.set_workload_status(&status)
    }

    /// Install the ingress service
    ///
    /// Resolves the identity and the ingress namespace, submits the ingress
    /// service and marks the connector installed. Fails with
    /// [`Error::NamespaceNotFound`] while no ingress namespace exists.
    #[instrument(skip(self))]
    pub fn on_installed(&self) -> Result<Outcome> {
        if self.markers()?.installed() {
            debug!("ingress already installed");
            return Ok(Outcome::Skipped);
        }

        let identity = Identity::get_or_create(
            &self.store,
            &self.config.model_uuid,
            self.config.application(),
        )?;
        let namespace = find_ingress_namespace(self.cluster.as_ref(), INGRESS_NAMESPACE_MARKER)?;
        self.store.set_namespace(&namespace)?;

        let mut batch = RequestBatch::new();
        batch.insert(
            identity.clone(),
            AppRequests {
                model_uuid: self.config.model_uuid.clone(),
                unit: self.config.application().to_string(),
                requests: vec![self.manifests.ingress_service()?],
            },
        );

        self.submitter
            .ensure_namespace(&self.manifests.namespace(&namespace)?, &identity)?;
        let used: Vec<Identity> = batch.keys().cloned().collect();
        self.store.set_used_apps(&used)?;
        self.submitter.artifacts()?.clean(&[RESOURCES_DIR])?;

        let errors = self.submitter.submit(&batch)?;
        if !errors.is_empty() {
            warn!(failed = errors.len(), "ingress service submission recorded errors");
        }

        self.set_state(CertificateState::AwaitingRelation)?;
        info!(identity = %identity, namespace = %namespace, "ingress installed");
        Ok(Outcome::Done)
    }

    /// Report the missing ssl-termination relation
    pub fn on_relation_missing(&self) -> Result<Outcome> {
        self.set_status(WorkloadStatus::blocked(MSG_RELATION_MISSING))?;
        Ok(Outcome::Done)
    }

    /// Invalidate the certificate when fqdns or credentials changed
    #[instrument(skip(self))]
    pub fn on_config_changed(&self, fields: &[ConfigField]) -> Result<Outcome> {
        if !fields.iter().any(|f| f.invalidates_certificate()) {
            return Ok(Outcome::Skipped);
        }
        let markers = self.markers()?;
        if !markers.cert_requested() {
            return Ok(Outcome::Skipped);
        }
        info!(previous = %markers.state, "configuration changed, certificate will be re-requested");
        // Pending status answers the previous request, not the next one
        self.store.set_markers(&Markers {
            state: CertificateState::AwaitingRelation,
            update_pending: false,
        })?;
        Ok(Outcome::Done)
    }

    /// Request a certificate covering the configured fqdns
    ///
    /// Sends one upstream per ready worker node, all pointing at the ingress
    /// node port. Fails with [`Error::NodePortNotFound`] when the ingress
    /// service has no node port for HTTP.
    #[instrument(skip(self, relation))]
    pub fn on_relation_available(&self, relation: &dyn SslTerminationRelation) -> Result<Outcome> {
        let markers = self.markers()?;
        if !markers.installed() || markers.cert_requested() {
            return Ok(Outcome::Skipped);
        }

        let fqdns = self.config.fqdn_list();
        if fqdns.is_empty() {
            self.set_status(WorkloadStatus::blocked(MSG_FQDNS_MISSING))?;
            return Ok(Outcome::NotReady(NotReady::FqdnsMissing));
        }

        let workers = self.cluster.worker_node_addresses()?;
        if workers.is_empty() {
            debug!("no worker nodes ready yet");
            return Ok(Outcome::NotReady(NotReady::NoWorkers));
        }

        let namespace = self
            .store
            .namespace()?
            .ok_or_else(|| Error::namespace_not_found(INGRESS_NAMESPACE_MARKER))?;
        let node_port = resolve_node_port(
            self.cluster.as_ref(),
            INGRESS_SERVICE_NAME,
            &namespace,
            INGRESS_HTTP_PORT,
        )?;
        self.store.set_nodeport(node_port)?;

        let info = CertInfo {
            fqdn: fqdns,
            contact_email: self.config.contact_email.clone(),
            credentials: self.config.credentials.clone(),
            upstreams: workers
                .iter()
                .map(|addr| Upstream::for_worker(addr, node_port))
                .collect(),
        };
        relation.send_cert_info(&info)?;

        self.set_status(WorkloadStatus::waiting(MSG_AWAITING_CERTIFICATE))?;
        self.set_state(CertificateState::RequestSent)?;
        info!(fqdns = ?info.fqdn, workers = workers.len(), node_port, "certificate requested");
        Ok(Outcome::Done)
    }

    /// Accept a confirmation from the proxy
    ///
    /// Any configured fqdn in any unit's status confirms the certificate.
    #[instrument(skip(self, relation))]
    pub fn on_relation_update(&self, relation: &dyn SslTerminationRelation) -> Result<Outcome> {
        let markers = self.markers()?;
        if markers.cert_created() {
            return Ok(Outcome::Skipped);
        }
        if markers.state != CertificateState::RequestSent {
            debug!(state = %markers.state, "relation update before certificate request");
            return Ok(Outcome::NotReady(NotReady::NoRequest));
        }

        let statuses = relation.status()?;
        let configured = self.config.fqdn_list();
        let Some(fqdn) = confirmed_fqdn(&configured, &statuses) else {
            debug!(units = statuses.len(), "no configured fqdn reported yet");
            return Ok(Outcome::NotReady(NotReady::Unconfirmed));
        };
        info!(fqdn = %fqdn, "certificate confirmed");

        self.set_status(WorkloadStatus::active(MSG_READY))?;
        self.store.set_markers(&Markers {
            state: CertificateState::Confirmed,
            update_pending: false,
        })?;
        Ok(Outcome::Done)
    }
}
