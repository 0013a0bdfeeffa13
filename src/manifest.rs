//! Built-in manifest templates
//!
//! Manifests are minijinja templates rendered to YAML and parsed into JSON
//! values, which is the form the resource submitter works with.

use minijinja::{context, Environment};
use serde_json::Value;

use crate::{Error, Result, INGRESS_HTTP_PORT, INGRESS_SERVICE_NAME};

const INGRESS_SERVICE_TEMPLATE: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: {{ name }}
  labels:
    app.kubernetes.io/name: {{ name }}
    app.kubernetes.io/managed-by: ssl-ingress
spec:
  type: NodePort
  selector:
    app.kubernetes.io/name: ingress-nginx
  ports:
    - name: http
      protocol: TCP
      port: {{ port }}
      targetPort: {{ port }}
"#;

const NAMESPACE_TEMPLATE: &str = r#"apiVersion: v1
kind: Namespace
metadata:
  name: {{ name }}
  labels:
    app.kubernetes.io/managed-by: ssl-ingress
"#;

/// Renders the connector's manifests
pub struct ManifestRenderer {
    env: Environment<'static>,
}

impl ManifestRenderer {
    /// Renderer with the built-in templates registered
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("ingress-service", INGRESS_SERVICE_TEMPLATE)
            .map_err(|e| Error::template(e.to_string()))?;
        env.add_template("namespace", NAMESPACE_TEMPLATE)
            .map_err(|e| Error::template(e.to_string()))?;
        Ok(Self { env })
    }

    /// NodePort service exposing the ingress controller
    pub fn ingress_service(&self) -> Result<Value> {
        self.render(
            "ingress-service",
            context! { name => INGRESS_SERVICE_NAME, port => INGRESS_HTTP_PORT },
        )
    }

    /// Namespace resource
    pub fn namespace(&self, name: &str) -> Result<Value> {
        self.render("namespace", context! { name => name })
    }

    fn render(&self, template: &str, ctx: minijinja::Value) -> Result<Value> {
        let rendered = self
            .env
            .get_template(template)
            .and_then(|t| t.render(ctx))
            .map_err(|e| Error::template(format!("{template}: {e}")))?;
        serde_yaml::from_str(&rendered).map_err(|e| Error::template(format!("{template}: {e}")))
    }
}
