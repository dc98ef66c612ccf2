//! # Review Endpoints
//!
//! Posting review messages and label votes, and adding reviewers or CCs.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::encode_change_id;
use crate::client::GerritClient;
use crate::models::Notify;

#[derive(Debug, Default, Serialize)]
struct ReviewInput<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  message: Option<&'a str>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  labels: BTreeMap<&'a str, i32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  notify: Option<Notify>,
}

#[derive(Debug, Serialize)]
struct ReviewerInput<'a> {
  reviewer: &'a str,
  state: &'a str,
  notify: Notify,
}

impl GerritClient {
  /// Post a review on the current revision: an optional message and label
  /// votes such as `("Commit-Queue", 2)`.
  pub async fn set_review(
    &self,
    change: &str,
    message: Option<&str>,
    labels: &[(&str, i32)],
    notify: Option<Notify>,
  ) -> Result<()> {
    let input = ReviewInput {
      message,
      labels: labels.iter().copied().collect(),
      notify,
    };
    let body = serde_json::to_value(&input).context("Failed to encode review")?;
    let path = format!("changes/{}/revisions/current/review", encode_change_id(change));
    let response: Value = self.call_json(Method::POST, &path, Some(&body)).await?;
    debug!("Review posted on change {change}: {response}");
    Ok(())
  }

  /// Add each account as a reviewer, or as a CC when `as_reviewer` is false.
  pub async fn add_reviewers(&self, change: &str, accounts: &[String], as_reviewer: bool, notify: bool) -> Result<()> {
    let path = format!("changes/{}/reviewers", encode_change_id(change));
    let state = if as_reviewer { "REVIEWER" } else { "CC" };
    let notify = if notify { Notify::All } else { Notify::None };
    for account in accounts {
      let input = ReviewerInput {
        reviewer: account,
        state,
        notify,
      };
      let body = serde_json::to_value(&input).context("Failed to encode reviewer")?;
      self
        .call(Method::POST, &path, Some(&body))
        .await
        .with_context(|| format!("Failed to add {account} to change {change}"))?;
    }
    Ok(())
  }
}
