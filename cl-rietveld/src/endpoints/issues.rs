//! # Issue Endpoints
//!
//! Issue properties, descriptions, comments, closing and flag edits.

use anyhow::Result;
use cl_core::ClError;
use tracing::debug;

use crate::client::RietveldClient;
use crate::models::IssueProperties;

impl RietveldClient {
  /// Issue metadata; `messages` also pulls the message thread.
  pub async fn get_issue_properties(&self, issue: u64, messages: bool) -> Result<IssueProperties> {
    let mut path = format!("api/{issue}");
    if messages {
      path.push_str("?messages=true");
    }
    self.get_json(&path).await
  }

  /// Raw description text with line endings normalized.
  pub async fn get_description(&self, issue: u64) -> Result<String> {
    let text = self.get(&format!("{issue}/description")).await?;
    Ok(text.replace("\r\n", "\n"))
  }

  pub async fn update_description(&self, issue: u64, description: &str) -> Result<()> {
    self
      .post_form(&format!("{issue}/description"), &[("description", description.to_string())])
      .await?;
    debug!("Updated description of issue {issue}");
    Ok(())
  }

  pub async fn close_issue(&self, issue: u64) -> Result<()> {
    self.post_form(&format!("{issue}/close"), &[]).await?;
    Ok(())
  }

  /// Post a message to the issue, emailing reviewers.
  pub async fn add_comment(&self, issue: u64, message: &str) -> Result<()> {
    self
      .post_form(
        &format!("{issue}/publish"),
        &[
          ("message", message.to_string()),
          ("message_only", "True".to_string()),
          ("add_as_reviewer", "False".to_string()),
          ("send_mail", "True".to_string()),
          ("no_redirect", "True".to_string()),
        ],
      )
      .await?;
    Ok(())
  }

  /// Set issue flags such as `commit` and `cq_dry_run` against `patchset`.
  /// The server answers `OK` on success.
  pub async fn set_flags(&self, issue: u64, patchset: u64, flags: &[(&str, &str)]) -> Result<()> {
    let mut fields = vec![("last_patchset", patchset.to_string())];
    fields.extend(flags.iter().map(|(key, value)| (*key, (*value).to_string())));
    let response = self.post_form(&format!("{issue}/edit_flags"), &fields).await?;
    if response.trim() != "OK" {
      return Err(ClError::fatal_remote(format!("Failed to set flags on issue {issue}: {}", response.trim())).into());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use wiremock::matchers::{body_string_contains, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  use super::*;
  use crate::endpoints::test_client;
  use crate::error::RietveldError;

  async fn mount_xsrf(server: &MockServer) {
    Mock::given(method("GET"))
      .and(path("/xsrf_token"))
      .respond_with(ResponseTemplate::new(200).set_body_string("tok"))
      .mount(server)
      .await;
  }

  #[tokio::test]
  async fn test_get_issue_properties_with_messages() -> Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/api/123"))
      .and(query_param("messages", "true"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "issue": 123,
        "owner_email": "owner@example.com",
        "patchsets": [1, 2],
        "messages": [{"sender": "r@example.com", "text": "hi"}]
      })))
      .mount(&server)
      .await;

    let props = client.get_issue_properties(123, true).await?;
    assert_eq!(props.latest_patchset(), Some(2));
    assert_eq!(props.messages.len(), 1);
    Ok(())
  }

  #[tokio::test]
  async fn test_missing_issue_is_not_found() {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/404/description"))
      .respond_with(ResponseTemplate::new(404))
      .expect(1)
      .mount(&server)
      .await;

    let err = client.get_description(404).await.unwrap_err();
    assert!(crate::error::is_not_found(&err));
  }

  #[tokio::test]
  async fn test_get_description_normalizes_newlines() -> Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/7/description"))
      .respond_with(ResponseTemplate::new(200).set_body_string("Title\r\n\r\nBody"))
      .mount(&server)
      .await;

    assert_eq!(client.get_description(7).await?, "Title\n\nBody");
    Ok(())
  }

  #[tokio::test]
  async fn test_set_flags() -> Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    mount_xsrf(&server).await;
    Mock::given(method("POST"))
      .and(path("/7/edit_flags"))
      .and(body_string_contains("last_patchset=3"))
      .and(body_string_contains("commit=1"))
      .and(body_string_contains("cq_dry_run=0"))
      .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
      .expect(1)
      .mount(&server)
      .await;

    client.set_flags(7, 3, &[("commit", "1"), ("cq_dry_run", "0")]).await?;
    Ok(())
  }

  #[tokio::test]
  async fn test_set_flags_forbidden() {
    let server = MockServer::start().await;
    let client = test_client(&server);
    mount_xsrf(&server).await;
    Mock::given(method("POST"))
      .and(path("/7/edit_flags"))
      .respond_with(ResponseTemplate::new(403))
      .expect(1)
      .mount(&server)
      .await;

    let err = client.set_flags(7, 3, &[("commit", "1")]).await.unwrap_err();
    assert!(err.downcast_ref::<RietveldError>().unwrap().is_forbidden());
  }

  #[tokio::test]
  async fn test_add_comment_and_close() -> Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    mount_xsrf(&server).await;
    Mock::given(method("POST"))
      .and(path("/9/publish"))
      .and(body_string_contains("message=Committed"))
      .and(body_string_contains("message_only=True"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/9/close"))
      .respond_with(ResponseTemplate::new(200))
      .expect(1)
      .mount(&server)
      .await;

    client.add_comment(9, "Committed").await?;
    client.close_issue(9).await?;
    Ok(())
  }
}
