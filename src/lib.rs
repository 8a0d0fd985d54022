use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod arn;
pub mod client;
pub mod config;
pub mod error;
pub mod mapping;
pub mod retry;
pub mod set;
pub mod store;

pub use arn::{Arn, PrincipalKind};
pub use error::{Error, Result};
pub use mapping::IdentityMapping;
pub use set::MappingSet;
pub use store::{Removal, Store};

/// Map a role in AWS IAM to Kubernetes groups
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(group = "aws-auth.controlant.com", version = "v1", kind = "MapRole", namespaced)]
pub struct MapRoleSpec {
  /// ARN of the AWS Role
  pub rolearn: String,
  /// Username inside kube
  #[serde(default)]
  pub username: Option<String>,
  /// Groups in kube
  #[serde(default)]
  pub groups: Vec<String>,
}

impl MapRoleSpec {
  pub fn to_mapping(&self) -> Result<IdentityMapping> {
    let arn = Arn::parse(&self.rolearn)?;
    if arn.principal_kind() != Some(PrincipalKind::Role) {
      return Err(Error::InvalidMapping {
        arn: self.rolearn.clone(),
        reason: "MapRole needs an IAM role ARN",
      });
    }
    IdentityMapping::new(arn, self.username.clone(), self.groups.iter().cloned())
  }

  /// What to undo when the MapRole goes away: the grant it created, keeping
  /// grants made for the same role by other means. `None` when the spec never
  /// produced a mapping, so there is nothing to remove.
  pub fn cleanup_intent(&self) -> Option<retry::Intent> {
    self.to_mapping().ok().map(retry::Intent::RemoveGrant)
  }
}
