//! Connector configuration
//!
//! Configuration is loaded once at startup from a YAML file and validated
//! before any handler runs, so a bad value fails fast with
//! [`Error::ConfigInvalid`] instead of deep inside a handler.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, DEFAULT_CONFIG_NAMESPACE};

/// Operator-supplied configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectorConfig {
    /// Whitespace separated list of fqdns to request a certificate for
    #[serde(default)]
    pub fqdns: String,

    /// Contact email passed to the certificate authority
    #[serde(default)]
    pub contact_email: String,

    /// Basic auth credentials enforced by the proxy (`user:password`)
    #[serde(default)]
    pub credentials: String,

    /// Namespace used for resource ownership checks
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// UUID of the model this deployment belongs to
    #[serde(default)]
    pub model_uuid: String,

    /// Name of the unit running the connector (`application/N`)
    #[serde(default)]
    pub unit_name: String,
}

fn default_namespace() -> String {
    DEFAULT_CONFIG_NAMESPACE.to_string()
}

impl ConnectorConfig {
    /// Parse configuration from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self {
                namespace: default_namespace(),
                ..Default::default()
            });
        }
        serde_yaml::from_str(content).map_err(|e| Error::config_invalid("<file>", e.to_string()))
    }

    /// Read and parse configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config_invalid("<file>", format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Validate required fields
    pub fn validate(&self) -> Result<()> {
        if self.model_uuid.trim().is_empty() {
            return Err(Error::config_invalid("model-uuid", "must not be empty"));
        }
        if self.application().is_empty() {
            return Err(Error::config_invalid(
                "unit-name",
                format!("'{}' has no application name", self.unit_name),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::config_invalid("namespace", "must not be empty"));
        }
        for fqdn in self.fqdn_list() {
            validate_fqdn(&fqdn)?;
        }
        Ok(())
    }

    /// Configured fqdns, in order, without surrounding whitespace
    pub fn fqdn_list(&self) -> Vec<String> {
        self.fqdns.split_whitespace().map(str::to_string).collect()
    }

    /// Application name, the unit name up to the first `/`
    pub fn application(&self) -> &str {
        self.unit_name.split('/').next().unwrap_or_default().trim()
    }

    /// Snapshot of the change-tracked fields
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            fqdns: self.fqdn_list(),
            contact_email: self.contact_email.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

/// Absolute names may end in a single `.`; `*` is only valid as the whole
/// leftmost label
fn validate_fqdn(fqdn: &str) -> Result<()> {
    let name = fqdn.strip_suffix('.').unwrap_or(fqdn);
    let valid = name.len() <= 253
        && name.split('.').enumerate().all(|(i, label)| {
            (i == 0 && label == "*")
                || (!label.is_empty()
                    && label.len() <= 63
                    && !label.starts_with('-')
                    && !label.ends_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
        });
    if valid {
        Ok(())
    } else {
        Err(Error::config_invalid(
            "fqdns",
            format!("'{fqdn}' is not a valid domain name"),
        ))
    }
}

/// Configuration fields whose changes the scheduler tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigField {
    /// `fqdns`
    Fqdns,
    /// `contact-email`
    ContactEmail,
    /// `credentials`
    Credentials,
}

impl ConfigField {
    /// Whether a change to this field invalidates the issued certificate
    pub fn invalidates_certificate(self) -> bool {
        matches!(self, Self::Fqdns | Self::Credentials)
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fqdns => write!(f, "fqdns"),
            Self::ContactEmail => write!(f, "contact-email"),
            Self::Credentials => write!(f, "credentials"),
        }
    }
}

/// The change-tracked part of the configuration, persisted between dispatches
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigSnapshot {
    /// Configured fqdns
    pub fqdns: Vec<String>,
    /// Contact email
    pub contact_email: String,
    /// Proxy credentials
    pub credentials: String,
}

impl ConfigSnapshot {
    /// Fields that differ from the previous snapshot
    ///
    /// With no previous snapshot every field counts as changed, mirroring a
    /// first configuration event.
    pub fn changed_fields(&self, previous: Option<&ConfigSnapshot>) -> Vec<ConfigField> {
        let Some(prev) = previous else {
            return vec![
                ConfigField::Fqdns,
                ConfigField::ContactEmail,
                ConfigField::Credentials,
            ];
        };

        let mut changed = Vec::new();
        if prev.fqdns != self.fqdns {
            changed.push(ConfigField::Fqdns);
        }
        if prev.contact_email != self.contact_email {
            changed.push(ConfigField::ContactEmail);
        }
        if prev.credentials != self.credentials {
            changed.push(ConfigField::Credentials);
        }
        changed
    }
}
