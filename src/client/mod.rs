use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

mod configmap;
mod memory;

pub use configmap::{connect, ConfigMapClient};
pub use memory::MemoryClient;

/// Contents of the persisted resource plus its version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  pub data: BTreeMap<String, String>,
  pub version: String,
}

/// Get/update access to the single resource holding the mappings.
#[async_trait]
pub trait ResourceClient: Send + Sync {
  /// Identity used in logs and error messages, e.g. `kube-system/aws-auth`.
  fn resource(&self) -> String;

  /// `Ok(None)` when the resource does not exist yet.
  async fn get(&self) -> Result<Option<Snapshot>>;

  /// Writes `data` if the resource is still at `expected`, creating it when
  /// `expected` is `None`. Fails with `Error::Conflict` otherwise and returns
  /// the new version token on success.
  async fn update(&self, data: BTreeMap<String, String>, expected: Option<&str>) -> Result<String>;
}
