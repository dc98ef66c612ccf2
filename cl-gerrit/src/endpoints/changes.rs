//! # Change Endpoints
//!
//! Change details, commit message edits, abandon and submit.

use anyhow::Result;
use reqwest::Method;
use serde_json::json;
use tracing::{debug, warn};

use super::encode_change_id;
use crate::client::GerritClient;
use crate::error::GerritError;
use crate::models::{ChangeInfo, CommitInfo, Notify};

impl GerritClient {
  /// Change details with the given `o=` options (`CURRENT_REVISION`,
  /// `DETAILED_LABELS`, `MESSAGES`, ...).
  pub async fn get_change_detail(&self, change: &str, options: &[&str]) -> Result<ChangeInfo> {
    let mut path = format!("changes/{}/detail", encode_change_id(change));
    append_options(&mut path, options);
    self.call_json(Method::GET, &path, None).await
  }

  /// Commit of the current revision, including web links.
  pub async fn get_change_commit(&self, change: &str) -> Result<CommitInfo> {
    let path = format!("changes/{}/revisions/current/commit?links", encode_change_id(change));
    self.call_json(Method::GET, &path, None).await
  }

  /// Whether the change has an unpublished edit. Gerrit answers 204 with no
  /// body when there is none.
  pub async fn has_pending_change_edit(&self, change: &str) -> Result<bool> {
    let path = format!("changes/{}/edit", encode_change_id(change));
    let body = self.call(Method::GET, &path, None).await?;
    Ok(!body.trim().is_empty())
  }

  /// Discard the change's unpublished edit. A missing edit is fine.
  pub async fn delete_pending_change_edit(&self, change: &str) -> Result<()> {
    let path = format!("changes/{}/edit", encode_change_id(change));
    match self.call(Method::DELETE, &path, None).await {
      Ok(_) => Ok(()),
      Err(err) if err.downcast_ref::<GerritError>().is_some_and(GerritError::is_not_found) => {
        debug!("No pending edit on change {change}");
        Ok(())
      }
      Err(err) => Err(err),
    }
  }

  /// Replace the commit message by creating and publishing a change edit.
  /// The edit is discarded again if publishing fails.
  pub async fn set_commit_message(&self, change: &str, message: &str, notify: Notify) -> Result<()> {
    let id = encode_change_id(change);
    self
      .call(
        Method::PUT,
        &format!("changes/{id}/edit:message"),
        Some(&json!({ "message": message })),
      )
      .await?;

    let published = self
      .call(
        Method::POST,
        &format!("changes/{id}/edit:publish"),
        Some(&json!({ "notify": notify })),
      )
      .await;
    if let Err(err) = published {
      warn!("Publishing the description edit of change {change} failed, discarding the edit");
      self.delete_pending_change_edit(change).await?;
      return Err(err);
    }
    Ok(())
  }

  pub async fn abandon_change(&self, change: &str, message: &str) -> Result<ChangeInfo> {
    let path = format!("changes/{}/abandon", encode_change_id(change));
    let body = if message.is_empty() {
      json!({})
    } else {
      json!({ "message": message })
    };
    self.call_json(Method::POST, &path, Some(&body)).await
  }

  pub async fn submit_change(&self, change: &str, wait_for_merge: bool) -> Result<ChangeInfo> {
    let path = format!("changes/{}/submit", encode_change_id(change));
    self
      .call_json(Method::POST, &path, Some(&json!({ "wait_for_merge": wait_for_merge })))
      .await
  }
}

fn append_options(path: &mut String, options: &[&str]) {
  for (i, option) in options.iter().enumerate() {
    path.push(if i == 0 { '?' } else { '&' });
    path.push_str("o=");
    path.push_str(option);
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use wiremock::matchers::{body_json, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  use super::*;
  use crate::endpoints::test_client;

  #[test]
  fn test_append_options() {
    let mut path = "changes/1/detail".to_string();
    append_options(&mut path, &["LABELS", "MESSAGES"]);
    assert_eq!(path, "changes/1/detail?o=LABELS&o=MESSAGES");
  }

  #[tokio::test]
  async fn test_get_change_detail() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/a/changes/123/detail"))
      .and(query_param("o", "DETAILED_LABELS"))
      .respond_with(ResponseTemplate::new(200).set_body_string(
        ")]}'\n{\"status\": \"NEW\", \"_number\": 123, \"owner\": {\"_account_id\": 1}, \"change_id\": \"Iabc\"}",
      ))
      .mount(&server)
      .await;

    let change = client.get_change_detail("123", &["DETAILED_LABELS", "CURRENT_REVISION"]).await?;
    assert_eq!(change.number, 123);
    assert_eq!(change.change_id, "Iabc");
    assert!(!change.is_closed());
    Ok(())
  }

  #[tokio::test]
  async fn test_get_change_detail_not_found() {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/a/changes/404/detail"))
      .respond_with(ResponseTemplate::new(404).set_body_string("Not found: 404"))
      .expect(1)
      .mount(&server)
      .await;

    let err = client.get_change_detail("404", &[]).await.unwrap_err();
    assert!(err.downcast_ref::<GerritError>().unwrap().is_not_found());
  }

  #[tokio::test]
  async fn test_pending_edit_detection() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/a/changes/5/edit"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/a/changes/6/edit"))
      .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{\"commit\": {}}"))
      .mount(&server)
      .await;

    assert!(!client.has_pending_change_edit("5").await?);
    assert!(client.has_pending_change_edit("6").await?);
    Ok(())
  }

  #[tokio::test]
  async fn test_set_commit_message_publishes_edit() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("PUT"))
      .and(path("/a/changes/7/edit:message"))
      .and(body_json(json!({"message": "New title\n\nChange-Id: I1"})))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/a/changes/7/edit:publish"))
      .and(body_json(json!({"notify": "NONE"})))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;

    client
      .set_commit_message("7", "New title\n\nChange-Id: I1", Notify::None)
      .await?;
    Ok(())
  }

  #[tokio::test]
  async fn test_set_commit_message_discards_edit_on_publish_failure() {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("PUT"))
      .and(path("/a/changes/8/edit:message"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/a/changes/8/edit:publish"))
      .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
      .mount(&server)
      .await;
    Mock::given(method("DELETE"))
      .and(path("/a/changes/8/edit"))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;

    let err = client.set_commit_message("8", "msg", Notify::None).await.unwrap_err();
    assert!(err.to_string().contains("conflict"));
  }

  #[tokio::test]
  async fn test_submit_and_abandon() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("POST"))
      .and(path("/a/changes/9/submit"))
      .and(body_json(json!({"wait_for_merge": true})))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "MERGED", "_number": 9})))
      .mount(&server)
      .await;
    Mock::given(method("POST"))
      .and(path("/a/changes/9/abandon"))
      .and(body_json(json!({})))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ABANDONED", "_number": 9})))
      .mount(&server)
      .await;

    assert!(client.submit_change("9", true).await?.is_closed());
    assert_eq!(client.abandon_change("9", "").await?.status, "ABANDONED");
    Ok(())
  }

  #[tokio::test]
  async fn test_get_change_commit_links() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let client = test_client(&server);
    Mock::given(method("GET"))
      .and(path("/a/changes/9/revisions/current/commit"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "commit": "deadbeef",
        "subject": "Landed",
        "web_links": [{"name": "gitiles", "url": "https://git.example.com/+/deadbeef"}]
      })))
      .mount(&server)
      .await;

    let commit = client.get_change_commit("9").await?;
    assert_eq!(commit.gitiles_url(), Some("https://git.example.com/+/deadbeef"));
    Ok(())
  }
}
