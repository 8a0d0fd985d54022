//! Amazon Resource Names for the IAM principals that can be mapped.
//!
//! Matching is exact on the canonical text: IAM ARNs are case sensitive, so
//! `role/Admin` and `role/admin` are different principals.

use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Which aws-auth list a principal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
  Role,
  User,
}

/// `arn:partition:service:region:account:resource`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
  partition: String,
  service: String,
  region: String,
  account_id: String,
  resource: String,
}

impl Arn {
  pub fn parse(text: &str) -> Result<Self> {
    let trimmed = text.trim();
    let malformed = |reason| Error::MalformedArn {
      text: text.to_string(),
      reason,
    };

    let mut parts = trimmed.splitn(6, ':');
    if parts.next() != Some("arn") {
      return Err(malformed("missing \"arn:\" prefix"));
    }
    let partition = parts
      .next()
      .filter(|p| !p.is_empty())
      .ok_or_else(|| malformed("missing partition"))?;
    let service = parts
      .next()
      .filter(|s| !s.is_empty())
      .ok_or_else(|| malformed("missing service"))?;
    let region = parts.next().ok_or_else(|| malformed("missing region"))?;
    let account_id = parts.next().ok_or_else(|| malformed("missing account ID"))?;
    let resource = parts.next().ok_or_else(|| malformed("missing resource"))?;

    let arn = Arn {
      partition: partition.to_string(),
      service: service.to_string(),
      region: region.to_string(),
      account_id: account_id.to_string(),
      resource: resource.to_string(),
    };
    if arn.resource_id().is_empty() {
      return Err(malformed("empty resource identifier"));
    }
    Ok(arn)
  }

  pub fn partition(&self) -> &str {
    &self.partition
  }

  pub fn service(&self) -> &str {
    &self.service
  }

  /// Empty for global services such as IAM.
  pub fn region(&self) -> &str {
    &self.region
  }

  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  /// The whole resource portion, e.g. `role/path/Admin`.
  pub fn resource(&self) -> &str {
    &self.resource
  }

  /// `role` in `role/Admin`, `None` when the resource has no type prefix.
  pub fn resource_type(&self) -> Option<&str> {
    self.split_resource().map(|(kind, _)| kind)
  }

  /// `Admin` in `role/Admin`, `path/Admin` in `role/path/Admin`.
  pub fn resource_id(&self) -> &str {
    self
      .split_resource()
      .map(|(_, id)| id)
      .unwrap_or(&self.resource)
  }

  pub fn principal_kind(&self) -> Option<PrincipalKind> {
    if self.service != "iam" {
      return None;
    }
    match self.resource_type() {
      Some("role") => Some(PrincipalKind::Role),
      Some("user") => Some(PrincipalKind::User),
      _ => None,
    }
  }

  pub fn matches(&self, other: &Arn) -> bool {
    self == other
  }

  fn split_resource(&self) -> Option<(&str, &str)> {
    let idx = self.resource.find(|c: char| c == '/' || c == ':')?;
    Some((&self.resource[..idx], &self.resource[idx + 1..]))
  }
}

impl fmt::Display for Arn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "arn:{}:{}:{}:{}:{}",
      self.partition, self.service, self.region, self.account_id, self.resource
    )
  }
}

impl FromStr for Arn {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Arn::parse(s)
  }
}
