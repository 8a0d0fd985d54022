use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("malformed ARN {text:?}: {reason}")]
  MalformedArn { text: String, reason: &'static str },

  #[error("malformed {key} data: {reason}")]
  MalformedEntry { key: &'static str, reason: String },

  #[error("invalid mapping for {arn}: {reason}")]
  InvalidMapping { arn: String, reason: &'static str },

  #[error("ARN {arn} is neither an IAM role nor an IAM user")]
  UnsupportedPrincipal { arn: String },

  #[error("no mapping found for ARN {arn}")]
  NotFound { arn: String },

  #[error("{resource} was modified concurrently, reload and reapply the change")]
  Conflict { resource: String },

  #[error("mappings from {resource} are not loaded")]
  NotLoaded { resource: String },

  #[error("failed to encode {key}: {source}")]
  Encode {
    key: &'static str,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("failed to {op} {resource}: {source}")]
  Transport {
    op: &'static str,
    resource: String,
    #[source]
    source: kube::Error,
  },
}

impl Error {
  /// Lost a compare-and-swap race; safe to retry after a fresh load.
  pub fn is_conflict(&self) -> bool {
    matches!(self, Error::Conflict { .. })
  }
}
