//! Errors returned by the Gerrit client.

use cl_core::ClError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GerritError {
  #[error("Authentication required for {host} (HTTP {status})")]
  Unauthorized { host: String, status: u16 },

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

  #[error("Request to {url} failed: {source}")]
  Transport {
    url: String,
    #[source]
    source: reqwest::Error,
  },
}

impl GerritError {
  pub(crate) fn from_status(status: StatusCode, host: &str, url: &str, body: String) -> Self {
    match status {
      StatusCode::UNAUTHORIZED => Self::Unauthorized {
        host: host.to_string(),
        status: status.as_u16(),
      },
      StatusCode::NOT_FOUND => Self::NotFound { url: url.to_string() },
      _ => Self::Http {
        status: status.as_u16(),
        url: url.to_string(),
        body,
      },
    }
  }

  /// 5xx, network failures and undecodable bodies are worth another try.
  /// 403 and every other 4xx are final.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Http { status, .. } => *status >= 500,
      Self::Decode { .. } | Self::Transport { .. } => true,
      Self::Unauthorized { .. } | Self::NotFound { .. } => false,
    }
  }

  pub const fn status(&self) -> Option<u16> {
    match self {
      Self::Unauthorized { status, .. } | Self::Http { status, .. } => Some(*status),
      Self::NotFound { .. } => Some(404),
      Self::Decode { .. } | Self::Transport { .. } => None,
    }
  }

  pub const fn is_not_found(&self) -> bool {
    matches!(self, Self::NotFound { .. })
  }
}

/// Whether `err` wraps a transient [`GerritError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
  err.downcast_ref::<GerritError>().is_some_and(GerritError::is_transient)
}

impl From<GerritError> for ClError {
  fn from(err: GerritError) -> Self {
    match err {
      GerritError::Unauthorized { host, .. } => ClError::AuthRequired {
        hint: format!("Add an entry for machine {host} to your ~/.netrc"),
        host,
      },
      err if err.is_transient() => ClError::TransientFailure(err.to_string()),
      err => ClError::FatalRemoteError(err.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classification() {
    let server_error = GerritError::from_status(StatusCode::BAD_GATEWAY, "h", "u", "oops".into());
    assert!(server_error.is_transient());
    let forbidden = GerritError::from_status(StatusCode::FORBIDDEN, "h", "u", "no".into());
    assert!(!forbidden.is_transient());
    assert_eq!(forbidden.status(), Some(403));
    assert!(GerritError::from_status(StatusCode::NOT_FOUND, "h", "u", String::new()).is_not_found());
  }

  #[test]
  fn test_into_cl_error() {
    let err: ClError = GerritError::from_status(StatusCode::UNAUTHORIZED, "review.example.com", "u", String::new()).into();
    assert!(matches!(err, ClError::AuthRequired { ref host, .. } if host == "review.example.com"));
    let err: ClError = GerritError::from_status(StatusCode::SERVICE_UNAVAILABLE, "h", "u", String::new()).into();
    assert!(err.is_transient());
    let err: ClError = GerritError::from_status(StatusCode::CONFLICT, "h", "u", "merge conflict".into()).into();
    assert!(matches!(err, ClError::FatalRemoteError(ref msg) if msg.contains("merge conflict")));
  }
}
