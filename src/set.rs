use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::{
  arn::{Arn, PrincipalKind},
  error::{Error, Result},
  mapping::{IdentityMapping, RoleEntry, UserEntry},
};

pub const ROLES_KEY: &str = "mapRoles";
pub const USERS_KEY: &str = "mapUsers";

/// Ordered identity mappings, kept per aws-auth list.
///
/// Duplicate ARNs are allowed: each entry is an independent grant. Roles
/// always iterate before users, matching the serialized layout, so a set
/// survives a Serialize/Deserialize cycle unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingSet {
  roles: Vec<IdentityMapping>,
  users: Vec<IdentityMapping>,
}

impl MappingSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, mapping: IdentityMapping) {
    self.list_mut(mapping.kind()).push(mapping);
  }

  /// Every mapping for `arn`, in insertion order.
  pub fn get(&self, arn: &Arn) -> Vec<&IdentityMapping> {
    self.iter().filter(|m| m.arn().matches(arn)).collect()
  }

  /// Removes the earliest mapping for `arn`, or all of them when `all` is set.
  pub fn remove(&mut self, arn: &Arn, all: bool) -> Result<usize> {
    let not_found = || Error::NotFound {
      arn: arn.to_string(),
    };
    let list = match arn.principal_kind() {
      Some(kind) => self.list_mut(kind),
      None => return Err(not_found()),
    };

    let removed = if all {
      let before = list.len();
      list.retain(|m| !m.arn().matches(arn));
      before - list.len()
    } else {
      match list.iter().position(|m| m.arn().matches(arn)) {
        Some(idx) => {
          list.remove(idx);
          1
        }
        None => 0,
      }
    };

    if removed == 0 {
      return Err(not_found());
    }
    Ok(removed)
  }

  /// Removes the earliest entry equal to `grant`, leaving other grants for the
  /// same ARN alone.
  pub fn remove_grant(&mut self, grant: &IdentityMapping) -> Result<()> {
    let list = self.list_mut(grant.kind());
    match list.iter().position(|m| m == grant) {
      Some(idx) => {
        list.remove(idx);
        Ok(())
      }
      None => Err(Error::NotFound {
        arn: grant.arn().to_string(),
      }),
    }
  }

  /// Replaces the first mapping for the same ARN, or appends when there is
  /// none. Returns `false` when the existing mapping already matched.
  pub fn upsert(&mut self, mapping: IdentityMapping) -> bool {
    let list = self.list_mut(mapping.kind());
    match list.iter_mut().find(|m| m.arn().matches(mapping.arn())) {
      Some(existing) if existing.same_identity(&mapping) => false,
      Some(existing) => {
        *existing = mapping;
        true
      }
      None => {
        list.push(mapping);
        true
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &IdentityMapping> {
    self.roles.iter().chain(self.users.iter())
  }

  pub fn roles(&self) -> &[IdentityMapping] {
    &self.roles
  }

  pub fn users(&self) -> &[IdentityMapping] {
    &self.users
  }

  pub fn len(&self) -> usize {
    self.roles.len() + self.users.len()
  }

  pub fn is_empty(&self) -> bool {
    self.roles.is_empty() && self.users.is_empty()
  }

  /// Renders both lists as YAML documents keyed like the aws-auth ConfigMap.
  pub fn to_data(&self) -> Result<BTreeMap<String, String>> {
    let roles: Vec<RoleEntry> = self.roles.iter().map(IdentityMapping::to_role_entry).collect();
    let users: Vec<UserEntry> = self.users.iter().map(IdentityMapping::to_user_entry).collect();

    let mut data = BTreeMap::new();
    data.insert(ROLES_KEY.to_string(), encode(ROLES_KEY, &roles)?);
    data.insert(USERS_KEY.to_string(), encode(USERS_KEY, &users)?);
    Ok(data)
  }

  /// Parses `mapRoles` and `mapUsers`; other keys are ignored. One bad entry
  /// fails the whole set.
  pub fn from_data(data: &BTreeMap<String, String>) -> Result<Self> {
    let roles = decode::<RoleEntry>(data, ROLES_KEY)?
      .into_iter()
      .enumerate()
      .map(|(idx, entry)| entry.into_mapping().map_err(|e| malformed_entry(ROLES_KEY, idx, e)))
      .collect::<Result<Vec<_>>>()?;
    let users = decode::<UserEntry>(data, USERS_KEY)?
      .into_iter()
      .enumerate()
      .map(|(idx, entry)| entry.into_mapping().map_err(|e| malformed_entry(USERS_KEY, idx, e)))
      .collect::<Result<Vec<_>>>()?;
    Ok(MappingSet { roles, users })
  }

  fn list_mut(&mut self, kind: PrincipalKind) -> &mut Vec<IdentityMapping> {
    match kind {
      PrincipalKind::Role => &mut self.roles,
      PrincipalKind::User => &mut self.users,
    }
  }
}

fn encode<T: serde::Serialize>(key: &'static str, entries: &[T]) -> Result<String> {
  serde_yaml::to_string(entries).map_err(|source| Error::Encode { key, source })
}

fn decode<T: DeserializeOwned>(data: &BTreeMap<String, String>, key: &'static str) -> Result<Vec<T>> {
  match data.get(key) {
    Some(raw) if !raw.trim().is_empty() => {
      let entries: Option<Vec<T>> = serde_yaml::from_str(raw).map_err(|e| Error::MalformedEntry {
        key,
        reason: e.to_string(),
      })?;
      Ok(entries.unwrap_or_default())
    }
    _ => Ok(Vec::new()),
  }
}

fn malformed_entry(key: &'static str, idx: usize, err: Error) -> Error {
  Error::MalformedEntry {
    key,
    reason: format!("entry {idx}: {err}"),
  }
}
