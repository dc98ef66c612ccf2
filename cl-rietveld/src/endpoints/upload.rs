//! # Patchset Upload
//!
//! Creates an issue or adds a patchset to an existing one. The server answers
//! with a plain-text report whose first line names the issue URL and whose
//! second line is the new patchset id.

use anyhow::Result;
use tracing::{debug, info};

use crate::client::RietveldClient;
use crate::error::RietveldError;

/// One upload: the diff plus the issue metadata sent alongside it.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
  /// Existing issue to add a patchset to; `None` creates an issue.
  pub issue: Option<u64>,
  /// Patchset title, or the issue subject for a new issue.
  pub title: String,
  /// Only sent for new issues.
  pub description: Option<String>,
  pub reviewers: Vec<String>,
  pub cc: Vec<String>,
  pub private: bool,
  pub send_mail: bool,
  /// Remote URL and branch the diff applies to, as `url@branch`.
  pub base_url: Option<String>,
  pub target_ref: Option<String>,
  pub project: Option<String>,
  /// `issue:patchset` of the CL this one is stacked on.
  pub depends_on_patchset: Option<String>,
  pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
  pub issue: u64,
  pub patchset: u64,
  pub url: String,
}

impl UploadRequest {
  fn form_fields(&self) -> Vec<(&'static str, String)> {
    let mut fields = vec![("subject", self.title.clone()), ("data", self.diff.clone())];
    if let Some(issue) = self.issue {
      fields.push(("issue", issue.to_string()));
    }
    if let Some(description) = &self.description {
      fields.push(("description", description.clone()));
    }
    if !self.reviewers.is_empty() {
      fields.push(("reviewers", self.reviewers.join(",")));
    }
    if !self.cc.is_empty() {
      fields.push(("cc", self.cc.join(",")));
    }
    if self.private {
      fields.push(("private", "1".to_string()));
    }
    if self.send_mail {
      fields.push(("send_mail", "1".to_string()));
    }
    let optional = [
      ("base", &self.base_url),
      ("target_ref", &self.target_ref),
      ("project", &self.project),
      ("depends_on_patchset", &self.depends_on_patchset),
    ];
    for (key, value) in optional {
      if let Some(value) = value {
        fields.push((key, value.clone()));
      }
    }
    fields
  }
}

impl RietveldClient {
  pub async fn upload(&self, request: &UploadRequest) -> Result<UploadResult> {
    debug!(
      "Uploading {} bytes of diff to {}",
      request.diff.len(),
      request.issue.map_or_else(|| "a new issue".to_string(), |i| format!("issue {i}"))
    );
    let response = self.post_form("upload", &request.form_fields()).await?;
    let result = parse_upload_response(&response)?;
    info!("Uploaded patchset {} of issue {}", result.patchset, result.issue);
    Ok(result)
  }
}

/// Parse `Issue created. URL: https://host/123` followed by the patchset id.
pub fn parse_upload_response(response: &str) -> Result<UploadResult, RietveldError> {
  let bad = || RietveldError::UploadResponse(response.trim().to_string());
  let mut lines = response.lines();
  let first = lines.next().ok_or_else(bad)?;
  if !(first.starts_with("Issue created") || first.starts_with("Issue updated")) {
    return Err(bad());
  }
  let url = first.split_once("URL:").ok_or_else(bad)?.1.trim().to_string();
  let issue = url
    .trim_end_matches('/')
    .rsplit('/')
    .next()
    .and_then(|id| id.parse().ok())
    .ok_or_else(bad)?;
  let patchset = lines.next().and_then(|line| line.trim().parse().ok()).ok_or_else(bad)?;
  Ok(UploadResult { issue, patchset, url })
}
