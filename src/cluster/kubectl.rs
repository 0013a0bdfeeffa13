//! `kubectl` backed cluster client

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use k8s_openapi::api::core::v1::{Namespace, Node, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{worker_addresses, ClusterClient};
use crate::identity::Identity;
use crate::{Error, Result};

/// Command output for testability
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether command succeeded
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Trait for executing external commands (allows mocking in tests)
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and wait for it to exit
    ///
    /// Returns an error only if the process could not be started.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Real command runner that executes actual system commands
#[derive(Default, Clone, Debug)]
pub struct RealCommandRunner;

impl CommandRunner for RealCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!(program = %program, ?args, "executing command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::process_exit(program, format!("failed to execute: {e}")))?;
        Ok(CommandOutput::from(output))
    }
}

/// Items of a `kubectl get -o json` list
#[derive(Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Any listed object; only metadata is inspected
#[derive(Deserialize)]
struct ListedObject {
    #[serde(default)]
    metadata: ObjectMeta,
}

/// Cluster client that drives `kubectl`
#[derive(Debug, Clone)]
pub struct KubectlClient<R: CommandRunner = RealCommandRunner> {
    runner: R,
    kubeconfig: Option<PathBuf>,
}

impl KubectlClient<RealCommandRunner> {
    /// Create a client using the ambient kubeconfig
    pub fn new() -> Self {
        Self::with_runner(RealCommandRunner)
    }
}

impl Default for KubectlClient<RealCommandRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> KubectlClient<R> {
    /// Create a client with a custom command runner
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            kubeconfig: None,
        }
    }

    /// Use an explicit kubeconfig file
    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    fn args(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        if let Some(kubeconfig) = &self.kubeconfig {
            full.push("--kubeconfig".to_string());
            full.push(kubeconfig.display().to_string());
        }
        full
    }

    /// Run kubectl, treating a non-zero exit as a process failure
    fn query(&self, args: &[&str]) -> Result<String> {
        let args = self.args(args);
        let output = self.runner.run("kubectl", &args)?;
        if !output.success {
            return Err(Error::process_exit(
                format!("kubectl {}", args.join(" ")),
                output.stderr.trim(),
            ));
        }
        Ok(output.stdout)
    }

    fn query_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T> {
        let stdout = self.query(args)?;
        serde_json::from_str(&stdout).map_err(|e| {
            Error::serialization(format!("kubectl {}: {e}", args.join(" ")))
        })
    }
}

impl<R: CommandRunner> ClusterClient for KubectlClient<R> {
    fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let list: ItemList<Namespace> = self.query_json(&["get", "namespaces", "-o", "json"])?;
        Ok(list.items)
    }

    fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>> {
        let stdout = self.query(&[
            "get",
            "service",
            name,
            "-n",
            namespace,
            "-o",
            "json",
            "--ignore-not-found",
        ])?;
        if stdout.trim().is_empty() {
            return Ok(None);
        }
        let service = serde_json::from_str(&stdout)
            .map_err(|e| Error::serialization(format!("service {namespace}/{name}: {e}")))?;
        Ok(Some(service))
    }

    fn worker_node_addresses(&self) -> Result<Vec<String>> {
        let list: ItemList<Node> = self.query_json(&["get", "nodes", "-o", "json"])?;
        Ok(worker_addresses(&list.items))
    }

    fn resource_owner(
        &self,
        namespace: &str,
        name: &str,
        selector: &str,
    ) -> Result<Option<Identity>> {
        let list: ItemList<ListedObject> =
            self.query_json(&["get", "all", "-n", namespace, "-l", selector, "-o", "json"])?;

        let owner = list
            .items
            .into_iter()
            .filter(|obj| obj.metadata.name.as_deref() == Some(name))
            .find_map(|obj| obj.metadata.labels.and_then(|mut l| l.remove(selector)))
            .map(Identity::new);

        debug!(namespace = %namespace, name = %name, owner = ?owner, "checked resource owner");
        Ok(owner)
    }

    fn apply_resource(&self, manifest: &Path) -> Result<bool> {
        let path = manifest.display().to_string();
        let args = self.args(&["apply", "-f", &path]);
        let output = self.runner.run("kubectl", &args)?;
        if !output.success {
            warn!(
                manifest = %path,
                stderr = %output.stderr.trim(),
                "kubectl apply rejected manifest"
            );
        }
        Ok(output.success)
    }
}
