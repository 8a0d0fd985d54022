use anyhow::{bail, Context, Result};

use crate::retry::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_NAMESPACE: &str = "kube-system";
pub const DEFAULT_CONFIGMAP: &str = "aws-auth";

/// Where the mappings live and how hard to retry, sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  pub namespace: String,
  pub configmap: String,
  pub max_attempts: usize,
  /// kubeconfig context, the same variable Terraform uses
  pub kube_context: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      namespace: DEFAULT_NAMESPACE.to_string(),
      configmap: DEFAULT_CONFIGMAP.to_string(),
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      kube_context: None,
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let mut config = Config::default();
    if let Some(namespace) = lookup("AWS_AUTH_NAMESPACE") {
      config.namespace = namespace;
    }
    if let Some(configmap) = lookup("AWS_AUTH_CONFIGMAP") {
      config.configmap = configmap;
    }
    if let Some(attempts) = lookup("AWS_AUTH_MAX_ATTEMPTS") {
      config.max_attempts = attempts
        .parse()
        .with_context(|| format!("parse AWS_AUTH_MAX_ATTEMPTS: {attempts}"))?;
    }
    config.kube_context = lookup("KUBE_CTX").filter(|ctx| !ctx.is_empty());
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.namespace.is_empty() {
      bail!("namespace must not be empty");
    }
    if self.configmap.is_empty() {
      bail!("configmap name must not be empty");
    }
    if self.max_attempts == 0 {
      bail!("max attempts must be at least 1");
    }
    Ok(())
  }
}
