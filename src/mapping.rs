use serde::{Deserialize, Serialize};

use crate::{
  arn::{Arn, PrincipalKind},
  error::{Error, Result},
};

/// One IAM principal mapped to a Kubernetes username and groups.
///
/// `username` may carry authenticator placeholders such as
/// `{{AccountID}}` or `{{SessionName}}`; they are stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMapping {
  arn: Arn,
  kind: PrincipalKind,
  username: Option<String>,
  groups: Vec<String>,
}

impl IdentityMapping {
  /// Groups are deduplicated keeping the first occurrence. An empty username
  /// counts as unset, and a mapping needs a username or at least one group.
  pub fn new<I, S>(arn: Arn, username: Option<String>, groups: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let kind = arn.principal_kind().ok_or_else(|| Error::UnsupportedPrincipal {
      arn: arn.to_string(),
    })?;
    let username = username.filter(|u| !u.is_empty());

    let mut deduped: Vec<String> = Vec::new();
    for group in groups.into_iter().map(Into::<String>::into) {
      if !deduped.contains(&group) {
        deduped.push(group);
      }
    }

    if username.is_none() && deduped.is_empty() {
      return Err(Error::InvalidMapping {
        arn: arn.to_string(),
        reason: "needs a username or at least one group",
      });
    }

    Ok(IdentityMapping {
      arn,
      kind,
      username,
      groups: deduped,
    })
  }

  pub fn arn(&self) -> &Arn {
    &self.arn
  }

  pub fn kind(&self) -> PrincipalKind {
    self.kind
  }

  pub fn username(&self) -> Option<&str> {
    self.username.as_deref()
  }

  pub fn groups(&self) -> &[String] {
    &self.groups
  }

  /// Same principal, same identity.
  pub fn same_identity(&self, other: &IdentityMapping) -> bool {
    self.username == other.username && self.groups == other.groups
  }

  pub(crate) fn to_role_entry(&self) -> RoleEntry {
    RoleEntry {
      rolearn: self.arn.to_string(),
      username: self.username.clone(),
      groups: self.groups.clone(),
    }
  }

  pub(crate) fn to_user_entry(&self) -> UserEntry {
    UserEntry {
      userarn: self.arn.to_string(),
      username: self.username.clone(),
      groups: self.groups.clone(),
    }
  }
}

/// An element of the `mapRoles` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RoleEntry {
  pub rolearn: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub groups: Vec<String>,
}

/// An element of the `mapUsers` list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserEntry {
  pub userarn: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub groups: Vec<String>,
}

impl RoleEntry {
  pub(crate) fn into_mapping(self) -> Result<IdentityMapping> {
    entry_to_mapping(&self.rolearn, self.username, self.groups, PrincipalKind::Role)
  }
}

impl UserEntry {
  pub(crate) fn into_mapping(self) -> Result<IdentityMapping> {
    entry_to_mapping(&self.userarn, self.username, self.groups, PrincipalKind::User)
  }
}

fn entry_to_mapping(
  arn: &str,
  username: Option<String>,
  groups: Vec<String>,
  expected: PrincipalKind,
) -> Result<IdentityMapping> {
  let mapping = IdentityMapping::new(Arn::parse(arn)?, username, groups)?;
  if mapping.kind() != expected {
    return Err(Error::InvalidMapping {
      arn: arn.to_string(),
      reason: match expected {
        PrincipalKind::Role => "listed under mapRoles but is not a role",
        PrincipalKind::User => "listed under mapUsers but is not a user",
      },
    });
  }
  Ok(mapping)
}
