//! # Gerrit HTTP Client
//!
//! Request plumbing shared by the endpoint modules: URL building under the
//! authenticated `/a/` prefix, basic auth, stripping of the XSSI prefix from
//! JSON bodies, and retries of transient failures.

use anyhow::Result;
use cl_core::RetryPolicy;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::consts::{AUTHENTICATED_PREFIX, USER_AGENT, XSSI_PREFIX};
use crate::error::{self, GerritError};
use crate::models::GerritAuth;

/// Client for one Gerrit host.
pub struct GerritClient {
  pub(crate) client: Client,
  pub(crate) base_url: String,
  pub(crate) host: String,
  pub(crate) auth: Option<GerritAuth>,
  pub(crate) retry: RetryPolicy,
}

impl GerritClient {
  /// `host` is a bare host (`x-review.example.com`) or a server URL. Bare
  /// hosts are reached over https. Without `auth` requests go to the
  /// anonymous REST endpoints.
  pub fn new(host: &str, auth: Option<GerritAuth>) -> Self {
    let base_url = if host.starts_with("http://") || host.starts_with("https://") {
      host.trim_end_matches('/').to_string()
    } else {
      format!("https://{}", cl_core::creds::netrc::normalize_host(host))
    };
    let host = cl_core::creds::netrc::normalize_host(host);
    Self {
      client: Client::new(),
      base_url,
      host,
      auth,
      retry: RetryPolicy::review_server(),
    }
  }

  pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  /// `https://host`, without a trailing slash.
  pub fn server_url(&self) -> &str {
    &self.base_url
  }

  pub const fn is_authenticated(&self) -> bool {
    self.auth.is_some()
  }

  pub(crate) fn url(&self, path: &str) -> String {
    let prefix = if self.auth.is_some() { AUTHENTICATED_PREFIX } else { "" };
    format!("{}/{prefix}{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
  }

  async fn send_once(&self, method: Method, url: &str, body: Option<&Value>) -> Result<String, GerritError> {
    debug!("Gerrit {method} {url}");
    let mut request = self
      .client
      .request(method, url)
      .header("User-Agent", USER_AGENT)
      .header("Accept", "application/json");
    if let Some(auth) = &self.auth {
      request = request.basic_auth(&auth.username, Some(&auth.password));
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let transport = |source| GerritError::Transport {
      url: url.to_string(),
      source,
    };
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    let text = response.text().await.map_err(transport)?;
    if status.is_success() {
      Ok(text)
    } else {
      Err(GerritError::from_status(status, &self.host, url, text))
    }
  }

  /// Send a request and return the raw body, retrying transient failures.
  pub(crate) async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String> {
    let url = self.url(path);
    let operation = format!("calling {method} {url}");
    self
      .retry
      .run_async(
        &operation,
        |_| {
          let method = method.clone();
          let url = url.as_str();
          async move { Ok(self.send_once(method, url, body).await?) }
        },
        error::is_transient,
      )
      .await
  }

  /// Send a request and decode its JSON body. Undecodable bodies count as
  /// transient and are retried like 5xx responses.
  pub(crate) async fn call_json<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<&Value>) -> Result<T> {
    let url = self.url(path);
    let operation = format!("calling {method} {url}");
    self
      .retry
      .run_async(
        &operation,
        |_| {
          let method = method.clone();
          let url = url.as_str();
          async move {
            let text = self.send_once(method, url, body).await?;
            Ok(parse_json(url, &text)?)
          }
        },
        error::is_transient,
      )
      .await
  }

  /// The commit-msg hook script the server publishes at
  /// `/tools/hooks/commit-msg`, outside the REST API.
  pub async fn download_commit_msg_hook(&self) -> Result<String> {
    let url = format!("{}/tools/hooks/commit-msg", self.base_url.trim_end_matches('/'));
    let operation = format!("downloading {url}");
    self
      .retry
      .run_async(
        &operation,
        |_| {
          let url = url.as_str();
          async move { Ok(self.send_once(Method::GET, url, None).await?) }
        },
        error::is_transient,
      )
      .await
  }
}

/// Decode a Gerrit JSON body, dropping the `)]}'` line in front of it.
pub(crate) fn parse_json<T: DeserializeOwned>(url: &str, text: &str) -> Result<T, GerritError> {
  let trimmed = text.trim_start();
  let json = trimmed.strip_prefix(XSSI_PREFIX).unwrap_or(trimmed);
  serde_json::from_str(json).map_err(|source| GerritError::Decode {
    url: url.to_string(),
    source,
  })
}
