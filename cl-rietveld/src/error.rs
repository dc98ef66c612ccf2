//! Errors returned by the review server client.

use cl_core::ClError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RietveldError {
  #[error("Login required for {host} (HTTP {status})")]
  Unauthorized { host: String, status: u16 },

  #[error("Access denied to {url}")]
  Forbidden { url: String },

  #[error("Not found: {url}")]
  NotFound { url: String },

  #[error("HTTP {status} from {url}: {body}")]
  Http { status: u16, url: String, body: String },

  #[error("Invalid JSON from {url}: {source}")]
  Decode {
    url: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("Unexpected upload response: {0}")]
  UploadResponse(String),

  #[error("Request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

impl RietveldError {
  pub(crate) fn from_status(status: StatusCode, host: &str, url: &str, body: String) -> Self {
    match status {
      StatusCode::UNAUTHORIZED => Self::Unauthorized {
        host: host.to_string(),
        status: status.as_u16(),
      },
      StatusCode::FORBIDDEN => Self::Forbidden { url: url.to_string() },
      StatusCode::NOT_FOUND => Self::NotFound { url: url.to_string() },
      _ => Self::Http {
        status: status.as_u16(),
        url: url.to_string(),
        body,
      },
    }
  }

  /// 5xx, network failures and undecodable bodies are worth another try.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Http { status, .. } => *status >= 500,
      Self::Decode { .. } | Self::Transport { .. } => true,
      Self::Unauthorized { .. } | Self::Forbidden { .. } | Self::NotFound { .. } | Self::UploadResponse(_) => false,
    }
  }

  pub const fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }

  pub const fn is_forbidden(&self) -> bool {
    matches!(self, Self::Forbidden { .. })
  }
}

/// Whether `err` wraps a transient [`RietveldError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
  err.downcast_ref::<RietveldError>().is_some_and(RietveldError::is_transient)
}

/// Whether `err` wraps a 404 from the server.
pub fn is_not_found(err: &anyhow::Error) -> bool {
  err.downcast_ref::<RietveldError>().is_some_and(RietveldError::is_not_found)
}

impl From<RietveldError> for ClError {
  fn from(err: RietveldError) -> Self {
    match err {
      RietveldError::Unauthorized { host, .. } => ClError::AuthRequired {
        hint: format!("Add an entry for machine {host} with an access token to your ~/.netrc"),
        host,
      },
      err if err.is_transient() => ClError::TransientFailure(err.to_string()),
      err => ClError::FatalRemoteError(err.to_string()),
    }
  }
}
