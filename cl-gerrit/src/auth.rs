//! Authentication helpers for the Gerrit client.
//!
//! Credentials come from the user's `.netrc`, keyed by the review host.

use std::path::Path;

use anyhow::{Context, Result};
use cl_core::creds::netrc;
use tracing::debug;

use crate::client::GerritClient;
use crate::models::GerritAuth;

/// Credentials for `host` from `<home>/.netrc`, if any.
pub fn get_gerrit_credentials(home: &Path, host: &str) -> Result<Option<GerritAuth>> {
  let path = netrc::get_netrc_path(home);
  if !path.exists() {
    return Ok(None);
  }
  Ok(netrc::lookup(&path, host)?.map(|creds| GerritAuth {
    username: creds.username,
    password: creds.password,
  }))
}

/// A client for `host`, authenticated when `.netrc` has credentials for it.
pub fn create_gerrit_client_from_netrc(home: &Path, host: &str) -> Result<GerritClient> {
  let auth = get_gerrit_credentials(home, host).context("Failed to read Gerrit credentials")?;
  if auth.is_none() {
    debug!("No .netrc credentials for {host}, using anonymous access");
  }
  Ok(GerritClient::new(host, auth))
}

#[cfg(test)]
mod tests {
  use cl_test_utils::NetrcGuard;

  use super::*;

  #[test]
  fn test_credentials_by_host() {
    let guard = NetrcGuard::new("machine chromium-review.example.com\n  login dev\n  password git-token\n");
    let auth = get_gerrit_credentials(guard.home_dir(), "https://chromium-review.example.com")
      .unwrap()
      .unwrap();
    assert_eq!(auth.username, "dev");
    assert_eq!(auth.password, "git-token");
    assert!(
      get_gerrit_credentials(guard.home_dir(), "other.example.com")
        .unwrap()
        .is_none()
    );
  }

  #[test]
  fn test_client_without_credentials_is_anonymous() {
    let guard = NetrcGuard::new("");
    let client = create_gerrit_client_from_netrc(guard.home_dir(), "x-review.example.com").unwrap();
    assert!(!client.is_authenticated());
    assert_eq!(client.server_url(), "https://x-review.example.com");
  }
}
