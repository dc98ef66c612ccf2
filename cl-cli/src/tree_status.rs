//! # Tree Status
//!
//! Whether the repository's tree is open for landing, as reported by the
//! status page configured in `rietveld.tree-status-url`.

use std::fmt;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::context::ClContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeStatus {
  Open,
  Closed,
  Unknown,
  /// No status URL configured.
  Unset,
}

impl TreeStatus {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Open => "open",
      Self::Closed => "closed",
      Self::Unknown => "unknown",
      Self::Unset => "unset",
    }
  }

  /// Interpret a status page body.
  pub fn from_body(body: &str) -> Self {
    let body = body.trim().to_lowercase();
    if body.contains("closed") || body == "0" {
      Self::Closed
    } else if body.contains("open") || body == "1" {
      Self::Open
    } else {
      Self::Unknown
    }
  }
}

impl fmt::Display for TreeStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Deserialize)]
struct CurrentStatus {
  message: String,
}

/// Status served at `url`. Unreachable pages count as unknown.
pub async fn fetch_tree_status(client: &Client, url: &str) -> TreeStatus {
  debug!("Fetching tree status from {url}");
  let body = match client.get(url).send().await.and_then(reqwest::Response::error_for_status) {
    Ok(response) => response.text().await,
    Err(err) => Err(err),
  };
  match body {
    Ok(body) => TreeStatus::from_body(&body),
    Err(err) => {
      warn!("Failed to fetch tree status from {url}: {err}");
      TreeStatus::Unknown
    }
  }
}

/// Free-text reason from `<host>/current?format=json`.
pub async fn fetch_tree_status_reason(client: &Client, url: &str) -> Result<String> {
  let json_url = Url::parse(url)
    .and_then(|base| base.join("/current?format=json"))
    .with_context(|| format!("Invalid tree status URL {url}"))?;
  let status: CurrentStatus = client
    .get(json_url.as_str())
    .send()
    .await
    .and_then(reqwest::Response::error_for_status)
    .with_context(|| format!("Failed to fetch {json_url}"))?
    .json()
    .await
    .with_context(|| format!("Failed to decode {json_url}"))?;
  Ok(status.message)
}

/// Tree status for the repository.
pub fn get_tree_status(ctx: &ClContext) -> Result<TreeStatus> {
  let Some(url) = ctx.settings().tree_status_url() else {
    return Ok(TreeStatus::Unset);
  };
  let client = Client::new();
  ctx.block_on(fetch_tree_status(&client, url))
}

pub fn get_tree_status_reason(ctx: &ClContext) -> Result<Option<String>> {
  let Some(url) = ctx.settings().tree_status_url() else {
    return Ok(None);
  };
  let client = Client::new();
  ctx.block_on(fetch_tree_status_reason(&client, url))?.map(Some)
}

#[cfg(test)]
mod tests {
  use wiremock::matchers::{method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  use super::*;

  #[test]
  fn test_from_body() {
    assert_eq!(TreeStatus::from_body("Tree is CLOSED for maintenance"), TreeStatus::Closed);
    assert_eq!(TreeStatus::from_body("0"), TreeStatus::Closed);
    assert_eq!(TreeStatus::from_body("open"), TreeStatus::Open);
    assert_eq!(TreeStatus::from_body("1\n"), TreeStatus::Open);
    assert_eq!(TreeStatus::from_body("throttled"), TreeStatus::Unknown);
  }

  #[tokio::test]
  async fn test_fetch_status_and_reason() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/allstatus"))
      .respond_with(ResponseTemplate::new(200).set_body_string("0"))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/current"))
      .and(query_param("format", "json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "message": "Tree is closed (compile failure)",
        "can_commit_freely": false
      })))
      .mount(&server)
      .await;

    let client = Client::new();
    let url = format!("{}/allstatus", server.uri());
    assert_eq!(fetch_tree_status(&client, &url).await, TreeStatus::Closed);
    assert_eq!(
      fetch_tree_status_reason(&client, &url).await?,
      "Tree is closed (compile failure)"
    );
    Ok(())
  }

  #[tokio::test]
  async fn test_server_error_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;
    let client = Client::new();
    assert_eq!(fetch_tree_status(&client, &server.uri()).await, TreeStatus::Unknown);
  }
}
