//! One edit session against the persisted mappings.
//!
//! A session starts unloaded. `load` fetches the resource and remembers its
//! version token, mutations only touch the private in-memory copy, and `save`
//! writes it back with a compare-and-swap on that token. A lost race leaves
//! the session unloaded again: the caller reloads and replays its change
//! (see [`crate::retry`]).

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::{
  arn::Arn,
  client::ResourceClient,
  error::{Error, Result},
  mapping::IdentityMapping,
  set::MappingSet,
};

/// Result of a removal. `remaining` counts mappings still held by the same
/// ARN, non-zero only after a first-match removal among duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
  pub removed: usize,
  pub remaining: usize,
}

#[derive(Debug)]
struct Session {
  mappings: MappingSet,
  // full resource data, so keys we do not manage survive a save
  data: BTreeMap<String, String>,
  version: Option<String>,
}

pub struct Store<C> {
  client: C,
  session: Option<Session>,
}

impl<C: ResourceClient> Store<C> {
  pub fn new(client: C) -> Self {
    Store { client, session: None }
  }

  pub fn client(&self) -> &C {
    &self.client
  }

  pub fn is_loaded(&self) -> bool {
    self.session.is_some()
  }

  /// Version token from the last load or save, `None` before the resource exists.
  pub fn version(&self) -> Option<&str> {
    self.session.as_ref().and_then(|s| s.version.as_deref())
  }

  /// Fetches the resource. A missing resource loads as an empty set; corrupt
  /// data fails without touching the current session.
  pub async fn load(&mut self) -> Result<()> {
    let resource = self.client.resource();
    let session = match self.client.get().await? {
      None => {
        info!("{} does not exist yet, starting with no mappings", resource);
        Session {
          mappings: MappingSet::new(),
          data: BTreeMap::new(),
          version: None,
        }
      }
      Some(snapshot) => {
        let mappings = MappingSet::from_data(&snapshot.data)?;
        debug!(
          "Loaded {} mappings from {} at version {}",
          mappings.len(),
          resource,
          snapshot.version
        );
        Session {
          mappings,
          data: snapshot.data,
          version: Some(snapshot.version),
        }
      }
    };
    self.session = Some(session);
    Ok(())
  }

  pub fn mappings(&self) -> Result<&MappingSet> {
    match &self.session {
      Some(session) => Ok(&session.mappings),
      None => Err(self.not_loaded()),
    }
  }

  pub fn mappings_mut(&mut self) -> Result<&mut MappingSet> {
    let not_loaded = self.not_loaded();
    self.session.as_mut().map(|s| &mut s.mappings).ok_or(not_loaded)
  }

  pub fn add_mapping(&mut self, mapping: IdentityMapping) -> Result<()> {
    debug!("Adding mapping for {}", mapping.arn());
    self.mappings_mut()?.add(mapping);
    Ok(())
  }

  pub fn remove_mapping(&mut self, arn: &Arn, all: bool) -> Result<Removal> {
    let mappings = self.mappings_mut()?;
    let removed = mappings.remove(arn, all)?;
    let remaining = mappings.get(arn).len();
    debug!("Removed {} mappings for {}, {} left", removed, arn, remaining);
    Ok(Removal { removed, remaining })
  }

  /// All mappings, or only those for `arn`.
  pub fn list_mappings(&self, arn: Option<&Arn>) -> Result<Vec<&IdentityMapping>> {
    let mappings = self.mappings()?;
    Ok(match arn {
      Some(arn) => mappings.get(arn),
      None => mappings.iter().collect(),
    })
  }

  /// Writes the session back if nobody else wrote since it was loaded.
  pub async fn save(&mut self) -> Result<()> {
    let resource = self.client.resource();
    let session = match self.session.as_mut() {
      Some(session) => session,
      None => return Err(Error::NotLoaded { resource }),
    };

    let mut data = session.data.clone();
    data.extend(session.mappings.to_data()?);

    match self.client.update(data.clone(), session.version.as_deref()).await {
      Ok(version) => {
        info!("Saved {} mappings to {} at version {}", session.mappings.len(), resource, version);
        session.version = Some(version);
        session.data = data;
        Ok(())
      }
      Err(err) if err.is_conflict() => {
        warn!("{} changed since it was loaded, dropping local changes", resource);
        self.session = None;
        Err(err)
      }
      Err(err) => Err(err),
    }
  }

  /// Saves and ends the session.
  pub async fn commit(mut self) -> Result<()> {
    self.save().await
  }

  fn not_loaded(&self) -> Error {
    Error::NotLoaded {
      resource: self.client.resource(),
    }
  }
}
