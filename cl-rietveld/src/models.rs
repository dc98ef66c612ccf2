//! Issue entities as served by `api/<issue>`, limited to the fields git-cl
//! reads.

use serde::Deserialize;

/// Bearer token for the review server.
#[derive(Clone)]
pub struct RietveldAuth {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueMessage {
  #[serde(default)]
  pub sender: String,
  #[serde(default)]
  pub text: String,
  #[serde(default)]
  pub approval: bool,
  #[serde(default)]
  pub disapproval: bool,
  #[serde(default)]
  pub date: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IssueProperties {
  pub issue: u64,
  pub owner_email: String,
  pub closed: bool,
  /// Commit-queue bit.
  pub commit: bool,
  pub cq_dry_run: bool,
  pub private: bool,
  /// Patchset ids, oldest first.
  pub patchsets: Vec<u64>,
  pub project: Option<String>,
  pub reviewers: Vec<String>,
  pub cc: Vec<String>,
  /// Only present when requested with `messages=true`.
  pub messages: Vec<IssueMessage>,
  pub description: String,
  pub subject: String,
}

impl IssueProperties {
  pub fn latest_patchset(&self) -> Option<u64> {
    self.patchsets.last().copied()
  }

  /// Sorted, de-duplicated reviewers who sent an approving message.
  pub fn approving_reviewers(&self) -> Vec<String> {
    let mut approvers: Vec<String> = self
      .messages
      .iter()
      .filter(|m| m.approval && self.reviewers.contains(&m.sender))
      .map(|m| m.sender.clone())
      .collect();
    approvers.sort();
    approvers.dedup();
    approvers
  }
}
