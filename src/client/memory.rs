use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{ResourceClient, Snapshot};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Stored {
  data: BTreeMap<String, String>,
  version: u64,
}

/// In-process resource with a counter as version token.
///
/// Clones share the same resource, so independent sessions built from
/// clones race exactly like separate processes on one ConfigMap.
#[derive(Debug, Clone)]
pub struct MemoryClient {
  name: String,
  inner: Arc<Mutex<Option<Stored>>>,
}

impl MemoryClient {
  /// A client whose resource does not exist yet.
  pub fn new(name: &str) -> Self {
    MemoryClient {
      name: name.to_string(),
      inner: Arc::new(Mutex::new(None)),
    }
  }

  pub fn with_data(name: &str, data: BTreeMap<String, String>) -> Self {
    let client = MemoryClient::new(name);
    *client.lock() = Some(Stored { data, version: 1 });
    client
  }

  /// Current contents, `None` while the resource does not exist.
  pub fn data(&self) -> Option<BTreeMap<String, String>> {
    self.lock().as_ref().map(|s| s.data.clone())
  }

  pub fn version(&self) -> Option<String> {
    self.lock().as_ref().map(|s| s.version.to_string())
  }

  fn lock(&self) -> MutexGuard<'_, Option<Stored>> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl ResourceClient for MemoryClient {
  fn resource(&self) -> String {
    format!("memory/{}", self.name)
  }

  async fn get(&self) -> Result<Option<Snapshot>> {
    Ok(self.lock().as_ref().map(|s| Snapshot {
      data: s.data.clone(),
      version: s.version.to_string(),
    }))
  }

  async fn update(&self, data: BTreeMap<String, String>, expected: Option<&str>) -> Result<String> {
    let mut stored = self.lock();
    let next = match (stored.as_ref().map(|s| s.version), expected) {
      (None, None) => 1,
      (Some(current), Some(version)) if current.to_string() == version => current + 1,
      _ => {
        return Err(Error::Conflict {
          resource: self.resource(),
        })
      }
    };
    *stored = Some(Stored { data, version: next });
    Ok(next.to_string())
  }
}
