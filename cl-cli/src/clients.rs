//! # Client Creation
//!
//! Review server clients built from `.netrc` credentials and the retry
//! policy of the current invocation.

use anyhow::{Context, Result};
use cl_gerrit::GerritClient;
use cl_gerrit::auth::create_gerrit_client_from_netrc;
use cl_rietveld::RietveldClient;
use cl_rietveld::auth::create_rietveld_client_from_netrc;

use crate::context::ClContext;

/// Client for the legacy review server at `server`.
pub fn create_rietveld_client(ctx: &ClContext, server: &str) -> Result<RietveldClient> {
  let client = create_rietveld_client_from_netrc(ctx.home(), server)
    .with_context(|| format!("Failed to create review server client for {server}"))?;
  Ok(client.with_retry(ctx.review_retry()))
}

/// Client for the Gerrit host (or server URL) `host`.
pub fn create_gerrit_client(ctx: &ClContext, host: &str) -> Result<GerritClient> {
  let client =
    create_gerrit_client_from_netrc(ctx.home(), host).with_context(|| format!("Failed to create Gerrit client for {host}"))?;
  Ok(client.with_retry(ctx.review_retry()))
}

#[cfg(test)]
mod tests {
  use cl_test_utils::{GitRepoTestGuard, NetrcGuard};

  use super::*;

  #[test]
  fn test_clients_pick_up_netrc_credentials() -> Result<()> {
    let netrc = NetrcGuard::new("machine chromium-review.googlesource.com login me password secret\n");
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = ClContext::for_repo(guard.path(), netrc.home_dir())?;

    let gerrit = create_gerrit_client(&ctx, "chromium-review.googlesource.com")?;
    assert!(gerrit.is_authenticated());
    let rietveld = create_rietveld_client(&ctx, "https://codereview.example.com")?;
    assert!(!rietveld.is_authenticated());
    assert_eq!(rietveld.server_url(), "https://codereview.example.com");
    Ok(())
  }
}
