//! Authentication helpers for the review server client.
//!
//! Access tokens come from the user's `.netrc`, keyed by the server host.

use std::path::Path;

use anyhow::{Context, Result};
use cl_core::creds::netrc;
use tracing::debug;

use crate::client::RietveldClient;
use crate::models::RietveldAuth;

/// Token for `server` from `<home>/.netrc`, if any.
pub fn get_rietveld_credentials(home: &Path, server: &str) -> Result<Option<RietveldAuth>> {
  let path = netrc::get_netrc_path(home);
  if !path.exists() {
    return Ok(None);
  }
  Ok(netrc::lookup(&path, server)?.map(|creds| RietveldAuth {
    username: creds.username,
    password: creds.password,
  }))
}

pub fn create_rietveld_client_from_netrc(home: &Path, server: &str) -> Result<RietveldClient> {
  let auth = get_rietveld_credentials(home, server).context("Failed to read review server credentials")?;
  if auth.is_none() {
    debug!("No .netrc credentials for {server}, requests will be anonymous");
  }
  Ok(RietveldClient::new(server, auth))
}
