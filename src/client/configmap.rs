use std::collections::BTreeMap;

use anyhow::Context as _;
use async_trait::async_trait;
use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
  api::{Api, Patch, PatchParams, PostParams},
  config::KubeConfigOptions,
  Client,
};
use log::debug;
use serde_json::json;

use super::{ResourceClient, Snapshot};
use crate::error::{Error, Result};

/// Builds a kube client from the in-cluster / default config, falling back to
/// the named kubeconfig context when that fails.
pub async fn connect(context: Option<&str>) -> anyhow::Result<Client> {
  let err = match Client::try_default().await {
    Ok(client) => return Ok(client),
    Err(err) => err,
  };
  let ctx = match context {
    Some(ctx) => ctx,
    None => return Err(err).context("Failed to create client"),
  };
  debug!("Default kube config unavailable ({}), using context {}", err, ctx);

  let config = kube::Config::from_kubeconfig(&KubeConfigOptions {
    context: Some(ctx.to_string()),
    ..KubeConfigOptions::default()
  })
  .await
  .with_context(|| format!("Failed to load KUBE_CTX context {ctx}"))?;
  Client::try_from(config).with_context(|| format!("Failed to create client for context {ctx}"))
}

/// The aws-auth ConfigMap, versioned by `metadata.resourceVersion`.
#[derive(Clone)]
pub struct ConfigMapClient {
  api: Api<ConfigMap>,
  namespace: String,
  name: String,
}

impl ConfigMapClient {
  pub fn new(client: Client, namespace: &str, name: &str) -> Self {
    ConfigMapClient {
      api: Api::namespaced(client, namespace),
      namespace: namespace.to_string(),
      name: name.to_string(),
    }
  }

  fn transport(&self, op: &'static str, source: kube::Error) -> Error {
    Error::Transport {
      op,
      resource: self.resource(),
      source,
    }
  }
}

#[async_trait]
impl ResourceClient for ConfigMapClient {
  fn resource(&self) -> String {
    format!("{}/{}", self.namespace, self.name)
  }

  async fn get(&self) -> Result<Option<Snapshot>> {
    let cm = self
      .api
      .get_opt(&self.name)
      .await
      .map_err(|source| self.transport("get", source))?;

    Ok(cm.map(|cm| Snapshot {
      version: cm.metadata.resource_version.unwrap_or_default(),
      data: cm.data.unwrap_or_default(),
    }))
  }

  async fn update(&self, data: BTreeMap<String, String>, expected: Option<&str>) -> Result<String> {
    let result = match expected {
      None => {
        debug!("Creating {}", self.resource());
        let cm = ConfigMap {
          metadata: ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            ..ObjectMeta::default()
          },
          data: Some(data),
          ..ConfigMap::default()
        };
        self.api.create(&PostParams::default(), &cm).await
      }
      Some(version) => {
        debug!("Patching {} at resourceVersion {}", self.resource(), version);
        // the apiserver rejects the patch with 409 when resourceVersion is stale
        let patch = json!({
          "metadata": { "resourceVersion": version },
          "data": data,
        });
        self
          .api
          .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
          .await
      }
    };

    match result {
      Ok(cm) => Ok(cm.metadata.resource_version.unwrap_or_default()),
      Err(source) => Err(update_error(self.resource(), source)),
    }
  }
}

fn update_error(resource: String, source: kube::Error) -> Error {
  match source {
    // 409: stale version or created by someone else; 404: deleted under us
    kube::Error::Api(resp) if resp.code == 409 || resp.code == 404 => Error::Conflict { resource },
    source => Error::Transport {
      op: "update",
      resource,
      source,
    },
  }
}
