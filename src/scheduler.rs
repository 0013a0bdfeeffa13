//! Trigger evaluation and handler dispatch
//!
//! One dispatch is one pass over the handlers in a fixed order. Each guard is
//! evaluated against markers re-read from the store right before the handler
//! would run, so a handler sees the effects of the ones before it.

use std::fmt;

use tracing::{debug, info, instrument};

use crate::config::ConfigField;
use crate::machine::{CertificateRequestStateMachine, Outcome};
use crate::relation::SslTerminationRelation;
use crate::store::IdentityStore;
use crate::Result;

/// External conditions observed for one dispatch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Triggers {
    /// The deployer finished installing (`deployer.installed`)
    pub deployer_installed: bool,
    /// The relation published new status (`relation-update`)
    pub relation_updated: bool,
    /// Configuration fields changed since the last successful dispatch
    pub changed: Vec<ConfigField>,
    /// Digest of the relation status observed for this dispatch
    pub relation_status: Option<String>,
}

/// Handlers the scheduler can run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    /// [`CertificateRequestStateMachine::on_installed`]
    Install,
    /// [`CertificateRequestStateMachine::on_config_changed`]
    ConfigChanged,
    /// [`CertificateRequestStateMachine::on_relation_missing`]
    RelationMissing,
    /// [`CertificateRequestStateMachine::on_relation_available`]
    RelationAvailable,
    /// [`CertificateRequestStateMachine::on_relation_update`]
    RelationUpdate,
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::ConfigChanged => write!(f, "config-changed"),
            Self::RelationMissing => write!(f, "relation-missing"),
            Self::RelationAvailable => write!(f, "relation-available"),
            Self::RelationUpdate => write!(f, "relation-update"),
        }
    }
}

/// Handlers run by one dispatch, in order
pub type DispatchReport = Vec<(Handler, Outcome)>;

/// Runs state machine handlers whose guards hold
pub struct EventScheduler {
    machine: CertificateRequestStateMachine,
    store: IdentityStore,
}

impl EventScheduler {
    /// Create a scheduler over `machine`, sharing its store
    pub fn new(machine: CertificateRequestStateMachine, store: IdentityStore) -> Self {
        Self { machine, store }
    }

    /// State machine driven by this scheduler
    pub fn machine(&self) -> &CertificateRequestStateMachine {
        &self.machine
    }

    /// Fields changed since the configuration last dispatched successfully
    pub fn changed_fields(&self) -> Result<Vec<ConfigField>> {
        let previous = self.store.last_config()?;
        Ok(self
            .machine
            .config()
            .snapshot()
            .changed_fields(previous.as_ref()))
    }

    /// Observe the current conditions for a dispatch
    ///
    /// `relation_status` is the digest of the status the relation currently
    /// publishes. The relation counts as updated only when that digest
    /// differs from the one the last successful dispatch acted on.
    pub fn triggers(&self, relation_status: Option<String>) -> Result<Triggers> {
        let relation_updated = match &relation_status {
            Some(digest) => self.store.relation_status()?.as_ref() != Some(digest),
            None => false,
        };
        Ok(Triggers {
            deployer_installed: self.store.deployer_path()?.is_some(),
            relation_updated,
            changed: self.changed_fields()?,
            relation_status,
        })
    }

    /// Run one dispatch pass
    ///
    /// Structural errors abort the pass and leave the configuration snapshot
    /// and relation status digest untouched, so the same changes are seen
    /// again on the next dispatch.
    #[instrument(skip(self, relation), fields(relation = relation.is_some()))]
    pub fn dispatch(
        &self,
        triggers: &Triggers,
        relation: Option<&dyn SslTerminationRelation>,
    ) -> Result<DispatchReport> {
        let mut report = DispatchReport::new();

        if triggers.relation_updated {
            let mut markers = self.store.markers()?;
            if !markers.update_pending {
                markers.update_pending = true;
                self.store.set_markers(&markers)?;
            }
        }

        if triggers.deployer_installed && !self.store.markers()?.installed() {
            run(&mut report, Handler::Install, || self.machine.on_installed())?;
        }

        let installed = self.store.markers()?.installed();

        if installed && triggers.changed.iter().any(|f| f.invalidates_certificate()) {
            run(&mut report, Handler::ConfigChanged, || {
                self.machine.on_config_changed(&triggers.changed)
            })?;
        }

        match relation {
            None if installed => {
                run(&mut report, Handler::RelationMissing, || {
                    self.machine.on_relation_missing()
                })?;
            }
            Some(relation) => {
                if installed && !self.store.markers()?.cert_requested() {
                    run(&mut report, Handler::RelationAvailable, || {
                        self.machine.on_relation_available(relation)
                    })?;
                }

                let markers = self.store.markers()?;
                if markers.update_pending && !markers.cert_created() {
                    run(&mut report, Handler::RelationUpdate, || {
                        self.machine.on_relation_update(relation)
                    })?;
                }
            }
            None => {}
        }

        self.store
            .set_last_config(&self.machine.config().snapshot())?;
        if let Some(digest) = &triggers.relation_status {
            self.store.set_relation_status(digest)?;
        }
        Ok(report)
    }
}

fn run(
    report: &mut DispatchReport,
    handler: Handler,
    f: impl FnOnce() -> Result<Outcome>,
) -> Result<()> {
    debug!(handler = %handler, "running handler");
    let outcome = f()?;
    info!(handler = %handler, outcome = %outcome, "handler finished");
    report.push((handler, outcome));
    Ok(())
}
