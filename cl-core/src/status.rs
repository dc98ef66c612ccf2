//! Changelist status vocabulary.

use std::fmt;
use std::str::FromStr;

use owo_colors::OwoColorize;
use serde::{Serialize, Serializer};

/// Review state of a changelist, as shown by `git cl status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClStatus {
  /// Not yet mailed for review.
  Unsent,
  /// Waiting for reviewers.
  Waiting,
  /// Reviewers replied and the owner should act.
  Reply,
  /// Approved.
  Lgtm,
  /// Rejected by a reviewer. Gerrit only.
  NotLgtm,
  /// In the commit queue.
  Commit,
  /// Closed or merged.
  Closed,
  /// Status could not be determined.
  Error,
}

impl ClStatus {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Unsent => "unsent",
      Self::Waiting => "waiting",
      Self::Reply => "reply",
      Self::Lgtm => "lgtm",
      Self::NotLgtm => "not lgtm",
      Self::Commit => "commit",
      Self::Closed => "closed",
      Self::Error => "error",
    }
  }

  /// The status name in its display color.
  pub fn colored(self) -> String {
    let name = self.as_str();
    match self {
      Self::Unsent => name.red().to_string(),
      Self::Waiting => name.blue().to_string(),
      Self::Reply => name.yellow().to_string(),
      Self::Lgtm => name.green().to_string(),
      Self::Commit => name.magenta().to_string(),
      Self::Closed => name.cyan().to_string(),
      Self::NotLgtm | Self::Error => name.white().to_string(),
    }
  }
}

impl fmt::Display for ClStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ClStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "unsent" => Self::Unsent,
      "waiting" => Self::Waiting,
      "reply" => Self::Reply,
      "lgtm" => Self::Lgtm,
      "not lgtm" => Self::NotLgtm,
      "commit" => Self::Commit,
      "closed" => Self::Closed,
      "error" => Self::Error,
      other => return Err(format!("unknown status {other:?}")),
    })
  }
}

impl Serialize for ClStatus {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}
