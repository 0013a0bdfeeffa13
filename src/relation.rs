//! ssl-termination relation messages
//!
//! The connector asks the ssl-termination proxy for a certificate by sending
//! a [`CertInfo`] message, and learns about issued certificates from the
//! per-unit [`UnitStatus`] records the proxy publishes back.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

/// One backend the proxy forwards traffic to
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Upstream {
    /// Hostname of the backend
    pub hostname: String,
    /// Address the proxy connects to
    #[serde(rename = "private-address")]
    pub private_address: String,
    /// Port the proxy connects to
    pub port: i32,
}

impl Upstream {
    /// Upstream for a worker node reachable on its ingress node port
    pub fn for_worker(address: &str, node_port: i32) -> Self {
        Self {
            hostname: address.to_string(),
            private_address: address.to_string(),
            port: node_port,
        }
    }
}

/// Certificate request sent to the proxy
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CertInfo {
    /// Names the certificate must cover
    pub fqdn: Vec<String>,
    /// Contact email for the certificate authority
    #[serde(rename = "contact-email")]
    pub contact_email: String,
    /// Basic auth credentials enforced by the proxy
    pub credentials: String,
    /// Backends serving the fqdns
    pub upstreams: Vec<Upstream>,
}

/// Certificates a proxy unit has provisioned
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct UnitStatus {
    /// Provisioned fqdns; shared certificates report one representative name
    #[serde(default)]
    pub status: Vec<String>,
}

/// First configured fqdn reported by any proxy unit
///
/// A single overlap is enough: shared certificates only report one of the
/// names they cover, so the match is existential rather than positional.
pub fn confirmed_fqdn<'a>(configured: &'a [String], statuses: &[UnitStatus]) -> Option<&'a str> {
    statuses
        .iter()
        .flat_map(|unit| unit.status.iter())
        .find_map(|reported| {
            configured
                .iter()
                .find(|fqdn| *fqdn == reported)
                .map(String::as_str)
        })
}

/// The ssl-termination relation endpoint
#[cfg_attr(test, automock)]
pub trait SslTerminationRelation: Send + Sync {
    /// Publish a certificate request
    fn send_cert_info(&self, info: &CertInfo) -> Result<()>;

    /// Status records published by the remote units
    fn status(&self) -> Result<Vec<UnitStatus>>;
}

/// Relation data exchanged through files in a directory
///
/// Outbound requests are written to `cert-info.json`; inbound status is read
/// from `status.json`, a JSON array of [`UnitStatus`] records.
#[derive(Debug, Clone)]
pub struct FileRelation {
    dir: PathBuf,
}

impl FileRelation {
    /// File holding the last certificate request
    pub const CERT_INFO_FILE: &'static str = "cert-info.json";
    /// File holding the remote units' status
    pub const STATUS_FILE: &'static str = "status.json";

    /// Exchange relation data in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Relation directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Digest of the published status file, `None` until the remote side
    /// publishes anything
    ///
    /// Comparing digests across invocations tells new status apart from
    /// status that was already acted on.
    pub fn status_digest(&self) -> Result<Option<String>> {
        let path = self.dir.join(Self::STATUS_FILE);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(hex::encode(Md5::digest(&content))))
    }
}

impl SslTerminationRelation for FileRelation {
    fn send_cert_info(&self, info: &CertInfo) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::CERT_INFO_FILE);
        std::fs::write(&path, serde_json::to_vec_pretty(info)?)
            .map_err(|e| Error::relation(format!("cannot write {}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            fqdns = info.fqdn.len(),
            upstreams = info.upstreams.len(),
            "sent cert info"
        );
        Ok(())
    }

    fn status(&self) -> Result<Vec<UnitStatus>> {
        let path = self.dir.join(Self::STATUS_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let statuses: Vec<UnitStatus> = serde_json::from_str(&content)
            .map_err(|e| Error::relation(format!("malformed {}: {e}", path.display())))?;
        debug!(units = statuses.len(), "read relation status");
        Ok(statuses)
    }
}
