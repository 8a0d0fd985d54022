//! Replayable changes for optimistic concurrency.
//!
//! An [`Intent`] describes what to do ("remove ARN X") instead of the
//! resulting data, so after a lost race it can be applied again on top of
//! whatever the other writer saved.

use std::fmt;

use log::{debug, warn};

use crate::{
  arn::Arn,
  client::ResourceClient,
  error::Result,
  mapping::IdentityMapping,
  store::{Removal, Store},
};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub enum Intent {
  /// Append a mapping, duplicates included.
  Add(IdentityMapping),
  /// Replace the first mapping for the ARN, or append.
  Upsert(IdentityMapping),
  Remove { arn: Arn, all: bool },
  /// Remove the first entry equal to this mapping, other grants untouched.
  RemoveGrant(IdentityMapping),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Added,
  Updated,
  Unchanged,
  Removed(Removal),
}

impl Intent {
  pub fn arn(&self) -> &Arn {
    match self {
      Intent::Add(mapping) | Intent::Upsert(mapping) | Intent::RemoveGrant(mapping) => mapping.arn(),
      Intent::Remove { arn, .. } => arn,
    }
  }

  /// Applies the change to a loaded session without saving it.
  pub fn apply_to<C: ResourceClient>(&self, store: &mut Store<C>) -> Result<Outcome> {
    match self {
      Intent::Add(mapping) => {
        store.add_mapping(mapping.clone())?;
        Ok(Outcome::Added)
      }
      Intent::Upsert(mapping) => {
        if store.mappings_mut()?.upsert(mapping.clone()) {
          Ok(Outcome::Updated)
        } else {
          Ok(Outcome::Unchanged)
        }
      }
      Intent::Remove { arn, all } => store.remove_mapping(arn, *all).map(Outcome::Removed),
      Intent::RemoveGrant(mapping) => {
        let mappings = store.mappings_mut()?;
        mappings.remove_grant(mapping)?;
        let remaining = mappings.get(mapping.arn()).len();
        Ok(Outcome::Removed(Removal { removed: 1, remaining }))
      }
    }
  }
}

impl fmt::Display for Intent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Intent::Add(mapping) => write!(f, "add {}", mapping.arn()),
      Intent::Upsert(mapping) => write!(f, "upsert {}", mapping.arn()),
      Intent::Remove { arn, all: true } => write!(f, "remove all {}", arn),
      Intent::Remove { arn, all: false } => write!(f, "remove {}", arn),
      Intent::RemoveGrant(mapping) => write!(f, "remove grant {}", mapping.arn()),
    }
  }
}

/// Load, apply `intent` and save, starting over from a fresh load each time
/// the save loses a race. Gives up with the last `Conflict` after
/// `max_attempts` tries; any other error is returned right away.
pub async fn apply<C: ResourceClient>(
  store: &mut Store<C>,
  intent: &Intent,
  max_attempts: usize,
) -> Result<Outcome> {
  let max_attempts = max_attempts.max(1);
  let mut attempt = 1;
  loop {
    store.load().await?;
    let outcome = intent.apply_to(store)?;
    if outcome == Outcome::Unchanged {
      debug!("Nothing to save for {}", intent);
      return Ok(outcome);
    }

    match store.save().await {
      Ok(()) => return Ok(outcome),
      Err(err) if err.is_conflict() && attempt < max_attempts => {
        warn!("{} (attempt {}/{}), retrying {}", err, attempt, max_attempts, intent);
        attempt += 1;
      }
      Err(err) => return Err(err),
    }
  }
}
