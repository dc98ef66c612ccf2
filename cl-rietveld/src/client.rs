//! # Review Server HTTP Client
//!
//! Request plumbing shared by the endpoint modules: bearer authentication,
//! form posts carrying the server's XSRF token, and retries of transient
//! failures.

use std::sync::Mutex;

use anyhow::Result;
use cl_core::RetryPolicy;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::consts::{USER_AGENT, XSRF_FIELD, XSRF_REQUEST_HEADER};
use crate::error::{self, RietveldError};
use crate::models::RietveldAuth;

/// Client for one review server.
pub struct RietveldClient {
  pub(crate) client: Client,
  pub(crate) base_url: String,
  pub(crate) host: String,
  pub(crate) auth: Option<RietveldAuth>,
  pub(crate) retry: RetryPolicy,
  xsrf_token: Mutex<Option<String>>,
}

impl RietveldClient {
  /// `server` is a bare host or a URL; plain hosts are reached over https.
  pub fn new(server: &str, auth: Option<RietveldAuth>) -> Self {
    let host = cl_core::creds::netrc::normalize_host(server);
    let base_url = if server.starts_with("http://") || server.starts_with("https://") {
      server.trim_end_matches('/').to_string()
    } else {
      format!("https://{host}")
    };
    Self {
      client: Client::new(),
      base_url,
      host,
      auth,
      retry: RetryPolicy::review_server(),
      xsrf_token: Mutex::new(None),
    }
  }

  pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn host(&self) -> &str {
    &self.host
  }

  /// Server URL without a trailing slash.
  pub fn server_url(&self) -> &str {
    &self.base_url
  }

  pub const fn is_authenticated(&self) -> bool {
    self.auth.is_some()
  }

  /// Absolute URLs pass through untouched.
  pub(crate) fn url(&self, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
      return path.to_string();
    }
    format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
  }

  async fn send_once(
    &self,
    method: Method,
    url: &str,
    form: Option<&[(String, String)]>,
    xsrf_request: bool,
  ) -> Result<String, RietveldError> {
    debug!("Review server {method} {url}");
    let mut request = self.client.request(method, url).header("User-Agent", USER_AGENT);
    if let Some(auth) = &self.auth {
      request = request.bearer_auth(&auth.password);
    }
    if xsrf_request {
      request = request.header(XSRF_REQUEST_HEADER, "1");
    }
    if let Some(form) = form {
      request = request.form(form);
    }

    let transport = |source| RietveldError::Transport {
      url: url.to_string(),
      source,
    };
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    let text = response.text().await.map_err(transport)?;
    if status.is_success() {
      Ok(text)
    } else {
      Err(RietveldError::from_status(status, &self.host, url, text))
    }
  }

  async fn request(&self, method: Method, path: &str, form: Option<&[(String, String)]>, xsrf_request: bool) -> Result<String> {
    let url = self.url(path);
    let operation = format!("calling {method} {url}");
    self
      .retry
      .run_async(
        &operation,
        |_| {
          let method = method.clone();
          let url = url.as_str();
          async move { Ok(self.send_once(method, url, form, xsrf_request).await?) }
        },
        error::is_transient,
      )
      .await
  }

  /// GET `path` and return the raw body.
  pub(crate) async fn get(&self, path: &str) -> Result<String> {
    self.request(Method::GET, path, None, false).await
  }

  /// GET `path` and decode its JSON body.
  pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let text = self.get(path).await?;
    serde_json::from_str(&text).map_err(|source| {
      RietveldError::Decode {
        url: self.url(path),
        source,
      }
      .into()
    })
  }

  /// POST a form to `path`. The XSRF token is fetched once and added to
  /// every form.
  pub(crate) async fn post_form(&self, path: &str, fields: &[(&str, String)]) -> Result<String> {
    let token = self.xsrf_token().await?;
    let mut form: Vec<(String, String)> = fields.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
    form.push((XSRF_FIELD.to_string(), token));
    self.request(Method::POST, path, Some(&form), false).await
  }

  async fn xsrf_token(&self) -> Result<String> {
    if let Some(token) = self.cached_xsrf_token() {
      return Ok(token);
    }
    let token = self.request(Method::GET, "xsrf_token", None, true).await?.trim().to_string();
    if let Ok(mut cached) = self.xsrf_token.lock() {
      *cached = Some(token.clone());
    }
    Ok(token)
  }

  fn cached_xsrf_token(&self) -> Option<String> {
    self.xsrf_token.lock().ok().and_then(|cached| cached.clone())
  }
}
