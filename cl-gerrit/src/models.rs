//! Gerrit REST entities, limited to the fields git-cl reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Basic auth credentials for the authenticated REST prefix.
#[derive(Clone)]
pub struct GerritAuth {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountInfo {
  #[serde(rename = "_account_id")]
  pub account_id: Option<u64>,
  pub name: Option<String>,
  pub email: Option<String>,
  pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalInfo {
  #[serde(rename = "_account_id")]
  pub account_id: Option<u64>,
  pub name: Option<String>,
  pub email: Option<String>,
  pub value: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelInfo {
  pub approved: Option<AccountInfo>,
  pub rejected: Option<AccountInfo>,
  pub recommended: Option<AccountInfo>,
  pub disliked: Option<AccountInfo>,
  /// Every vote, with `DETAILED_LABELS`.
  #[serde(default)]
  pub all: Vec<ApprovalInfo>,
  /// Vote value (`"+1"`, `" 0"`, `"-1"`) to its description.
  #[serde(default)]
  pub values: HashMap<String, String>,
}

impl LabelInfo {
  /// Highest vote cast on this label, 0 when nobody voted.
  pub fn highest_vote(&self) -> i32 {
    self.all.iter().filter_map(|a| a.value).max().unwrap_or(0).max(0)
  }

  /// Description of a vote value, keyed the way Gerrit does (`+2`, `0`).
  pub fn value_text(&self, vote: i32) -> Option<&str> {
    let key = if vote > 0 { format!("+{vote}") } else { vote.to_string() };
    self
      .values
      .get(&key)
      .or_else(|| self.values.get(&format!(" {key}")))
      .map(String::as_str)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeMessageInfo {
  #[serde(default)]
  pub id: String,
  pub author: Option<AccountInfo>,
  #[serde(default)]
  pub date: String,
  #[serde(default)]
  pub message: String,
  #[serde(rename = "_revision_number")]
  pub revision_number: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchInfo {
  pub url: String,
  #[serde(rename = "ref")]
  pub git_ref: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebLinkInfo {
  pub name: String,
  pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitInfo {
  pub commit: Option<String>,
  #[serde(default)]
  pub subject: String,
  pub message: Option<String>,
  #[serde(default)]
  pub web_links: Vec<WebLinkInfo>,
}

impl CommitInfo {
  /// URL of the gitiles web link, if the server reports one.
  pub fn gitiles_url(&self) -> Option<&str> {
    self
      .web_links
      .iter()
      .find(|link| link.name == "gitiles")
      .and_then(|link| link.url.as_deref())
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevisionInfo {
  #[serde(rename = "_number")]
  pub number: u64,
  #[serde(rename = "ref")]
  pub git_ref: Option<String>,
  /// Fetch protocol (`http`, `ssh`) to fetch location.
  #[serde(default)]
  pub fetch: HashMap<String, FetchInfo>,
  pub commit: Option<CommitInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeInfo {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub project: String,
  #[serde(default)]
  pub branch: String,
  #[serde(default)]
  pub change_id: String,
  #[serde(default)]
  pub subject: String,
  /// `NEW`, `MERGED` or `ABANDONED`.
  pub status: String,
  #[serde(rename = "_number")]
  pub number: u64,
  #[serde(default)]
  pub owner: AccountInfo,
  #[serde(default)]
  pub labels: HashMap<String, LabelInfo>,
  /// Reviewer state (`REVIEWER`, `CC`) to accounts.
  #[serde(default)]
  pub reviewers: HashMap<String, Vec<AccountInfo>>,
  #[serde(default)]
  pub messages: Vec<ChangeMessageInfo>,
  pub current_revision: Option<String>,
  #[serde(default)]
  pub revisions: HashMap<String, RevisionInfo>,
}

impl ChangeInfo {
  pub fn is_closed(&self) -> bool {
    matches!(self.status.as_str(), "MERGED" | "ABANDONED")
  }

  pub fn current_revision_info(&self) -> Option<(&str, &RevisionInfo)> {
    let sha = self.current_revision.as_deref()?;
    self.revisions.get(sha).map(|rev| (sha, rev))
  }

  /// Revision with patchset number `patchset`; needs `ALL_REVISIONS`.
  pub fn revision_by_number(&self, patchset: u64) -> Option<(&str, &RevisionInfo)> {
    self
      .revisions
      .iter()
      .find(|(_, rev)| rev.number == patchset)
      .map(|(sha, rev)| (sha.as_str(), rev))
  }

  pub fn reviewers_in_state(&self, state: &str) -> &[AccountInfo] {
    self.reviewers.get(state).map(Vec::as_slice).unwrap_or_default()
  }
}

/// Who Gerrit emails about an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notify {
  None,
  Owner,
  OwnerReviewers,
  All,
}

impl Notify {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::None => "NONE",
      Self::Owner => "OWNER",
      Self::OwnerReviewers => "OWNER_REVIEWERS",
      Self::All => "ALL",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_change_info_deserializes_detail() {
    let change: ChangeInfo = serde_json::from_value(serde_json::json!({
      "id": "proj~main~I1",
      "status": "NEW",
      "_number": 123,
      "owner": {"_account_id": 1},
      "labels": {
        "Commit-Queue": {
          "all": [{"_account_id": 2, "value": 1}, {"_account_id": 3}],
          "values": {" 0": "No", "+1": "Dry run", "+2": "Commit"}
        }
      },
      "current_revision": "abc",
      "revisions": {"abc": {"_number": 4, "fetch": {"http": {"url": "https://host/proj", "ref": "refs/changes/23/123/4"}}}}
    }))
    .unwrap();
    assert_eq!(change.number, 123);
    let label = &change.labels["Commit-Queue"];
    assert_eq!(label.highest_vote(), 1);
    assert_eq!(label.value_text(1), Some("Dry run"));
    assert_eq!(label.value_text(0), Some("No"));
    let (sha, rev) = change.current_revision_info().unwrap();
    assert_eq!(sha, "abc");
    assert_eq!(rev.fetch["http"].git_ref, "refs/changes/23/123/4");
    assert_eq!(change.revision_by_number(4).unwrap().0, "abc");
    assert!(change.reviewers_in_state("REVIEWER").is_empty());
  }
}
