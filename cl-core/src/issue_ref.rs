//! # Issue References
//!
//! Parsing of user-supplied issue arguments: a bare issue number or a review
//! URL of either backend, decomposed into issue, patchset and host.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::settings::upgrade_to_https;

static RIETVELD_PATCHSET_PATH: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^/(\d+)/$").expect("Failed to compile Rietveld path regex"));
static RIETVELD_PATCHSET_FRAGMENT: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^ps(\d+)$").expect("Failed to compile Rietveld fragment regex"));
static RIETVELD_ISSUE_PATH: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^/(\d+)(/.*)?$").expect("Failed to compile Rietveld issue regex"));
static RIETVELD_DIFF_PATH: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^/download/issue(\d+)_(\d+)\.diff$").expect("Failed to compile Rietveld diff regex")
});
static GERRIT_CHANGE_PATH: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^/c/(\d+)(/(\d+)?/?)?$").expect("Failed to compile Gerrit change regex"));

/// The review system a changelist lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// Legacy Rietveld-style review server.
  Rietveld,
  /// Gerrit-style review server.
  Gerrit,
}

impl BackendKind {
  /// Resolution priority when a branch is inspected for an existing issue.
  pub const ALL: [Self; 2] = [Self::Rietveld, Self::Gerrit];

  pub const fn name(self) -> &'static str {
    match self {
      Self::Rietveld => "rietveld",
      Self::Gerrit => "gerrit",
    }
  }

  /// Branch config key holding the issue number.
  pub const fn issue_key(self) -> &'static str {
    match self {
      Self::Rietveld => "rietveldissue",
      Self::Gerrit => "gerritissue",
    }
  }

  /// Branch config key holding the patchset number.
  pub const fn patchset_key(self) -> &'static str {
    match self {
      Self::Rietveld => "rietveldpatchset",
      Self::Gerrit => "gerritpatchset",
    }
  }

  /// Branch config key holding the server URL.
  pub const fn server_key(self) -> &'static str {
    match self {
      Self::Rietveld => "rietveldserver",
      Self::Gerrit => "gerritserver",
    }
  }

  /// Backend-specific branch config keys cleared together with the issue.
  pub const fn extra_keys(self) -> &'static [&'static str] {
    match self {
      Self::Rietveld => &[],
      Self::Gerrit => &["gerritsquashhash"],
    }
  }

  /// Parse a review URL in this backend's format.
  pub fn parse_issue_url(self, url: &Url) -> Option<ParsedIssueRef> {
    if !url.scheme().starts_with("http") {
      return None;
    }
    let hostname = netloc(url);
    match self {
      Self::Rietveld => {
        let path = url.path();
        let fragment = url.fragment().unwrap_or_default();
        if let (Some(issue), Some(ps)) = (
          RIETVELD_PATCHSET_PATH.captures(path),
          RIETVELD_PATCHSET_FRAGMENT.captures(fragment),
        ) {
          return Some(ParsedIssueRef {
            issue: issue[1].parse().ok()?,
            patchset: ps[1].parse().ok(),
            hostname,
            backend: Some(self),
            patch_url: None,
          });
        }
        if let Some(caps) = RIETVELD_ISSUE_PATH.captures(path) {
          return Some(ParsedIssueRef {
            issue: caps[1].parse().ok()?,
            patchset: None,
            hostname,
            backend: Some(self),
            patch_url: None,
          });
        }
        let caps = RIETVELD_DIFF_PATH.captures(path)?;
        Some(ParsedIssueRef {
          issue: caps[1].parse().ok()?,
          patchset: caps[2].parse().ok(),
          hostname,
          backend: Some(self),
          patch_url: Some(upgrade_to_https(url.as_str())),
        })
      }
      Self::Gerrit => {
        let component = url.fragment().filter(|f| !f.is_empty()).unwrap_or(url.path());
        let caps = GERRIT_CHANGE_PATH.captures(component)?;
        Some(ParsedIssueRef {
          issue: caps[1].parse().ok()?,
          patchset: caps.get(3).and_then(|m| m.as_str().parse().ok()),
          hostname,
          backend: Some(self),
          patch_url: None,
        })
      }
    }
  }
}

impl fmt::Display for BackendKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A successfully parsed issue argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIssueRef {
  pub issue: u64,
  pub patchset: Option<u64>,
  /// `host[:port]` the URL pointed at.
  pub hostname: Option<String>,
  /// Backend implied by the URL shape, `None` for bare numbers.
  pub backend: Option<BackendKind>,
  /// Direct link to a raw diff, for legacy download URLs.
  pub patch_url: Option<String>,
}

impl ParsedIssueRef {
  pub const fn from_number(issue: u64) -> Self {
    Self {
      issue,
      patchset: None,
      hostname: None,
      backend: None,
      patch_url: None,
    }
  }
}

fn netloc(url: &Url) -> Option<String> {
  let host = url.host_str()?;
  Some(match url.port() {
    Some(port) => format!("{host}:{port}"),
    None => host.to_string(),
  })
}

/// Parse an issue number or review URL.
///
/// `None` means the argument is not a valid issue reference. When `backend`
/// is given only that backend's URL format is accepted. Otherwise a URL both
/// backends understand is taken as Gerrit when the first host label ends in
/// `-review`, and as Rietveld otherwise.
pub fn parse_issue_number_argument(arg: &str, backend: Option<BackendKind>) -> Option<ParsedIssueRef> {
  let arg = arg.trim();
  if !arg.is_empty() && arg.bytes().all(|b| b.is_ascii_digit()) {
    return arg.parse().ok().map(ParsedIssueRef::from_number);
  }
  if !arg.starts_with("http") {
    return None;
  }
  let url = Url::parse(&upgrade_to_https(arg)).ok()?;

  if let Some(kind) = backend {
    return kind.parse_issue_url(&url);
  }

  let rietveld = BackendKind::Rietveld.parse_issue_url(&url);
  let gerrit = BackendKind::Gerrit.parse_issue_url(&url);
  match (rietveld, gerrit) {
    (None, None) => None,
    (Some(r), None) => Some(r),
    (None, Some(g)) => Some(g),
    (Some(r), Some(g)) => {
      let looks_like_gerrit = url
        .host_str()
        .and_then(|h| h.split('.').next())
        .is_some_and(|label| label.ends_with("-review"));
      Some(if looks_like_gerrit { g } else { r })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_bare_number() {
    let parsed = parse_issue_number_argument("123456", None).unwrap();
    assert_eq!(parsed.issue, 123456);
    assert_eq!(parsed.backend, None);
  }

  #[test]
  fn test_invalid_inputs() {
    assert!(parse_issue_number_argument("", None).is_none());
    assert!(parse_issue_number_argument("abc", None).is_none());
    assert!(parse_issue_number_argument("-5", None).is_none());
    assert!(parse_issue_number_argument("https://example.com/not/an/issue", None).is_none());
  }

  #[test]
  fn test_rietveld_urls() {
    let parsed = parse_issue_number_argument("https://codereview.example.com/123/#ps20001", None).unwrap();
    assert_eq!(parsed.issue, 123);
    assert_eq!(parsed.patchset, Some(20001));
    assert_eq!(parsed.hostname.as_deref(), Some("codereview.example.com"));
    assert_eq!(parsed.backend, Some(BackendKind::Rietveld));

    let parsed = parse_issue_number_argument("http://codereview.example.com/123/diff/1", None).unwrap();
    assert_eq!(parsed.issue, 123);
    assert_eq!(parsed.patchset, None);

    let parsed = parse_issue_number_argument("https://cr.example.com/download/issue123_4.diff", None).unwrap();
    assert_eq!(parsed.issue, 123);
    assert_eq!(parsed.patchset, Some(4));
    assert_eq!(
      parsed.patch_url.as_deref(),
      Some("https://cr.example.com/download/issue123_4.diff")
    );
  }

  #[test]
  fn test_gerrit_urls() {
    let parsed = parse_issue_number_argument("https://chromium-review.example.com/c/1234/5", None).unwrap();
    assert_eq!(parsed.issue, 1234);
    assert_eq!(parsed.patchset, Some(5));
    assert_eq!(parsed.backend, Some(BackendKind::Gerrit));

    let parsed = parse_issue_number_argument("https://host.example.com/#/c/99/", None).unwrap();
    assert_eq!(parsed.issue, 99);
    assert_eq!(parsed.patchset, None);
    assert_eq!(parsed.backend, Some(BackendKind::Gerrit));
  }

  #[test]
  fn test_forced_backend() {
    assert!(parse_issue_number_argument("https://cr.example.com/123", Some(BackendKind::Gerrit)).is_none());
    let parsed = parse_issue_number_argument("https://x-review.example.com/c/7", Some(BackendKind::Gerrit)).unwrap();
    assert_eq!(parsed.issue, 7);
  }

  #[test]
  fn test_backend_keys() {
    assert_eq!(BackendKind::Gerrit.issue_key(), "gerritissue");
    assert_eq!(BackendKind::Rietveld.server_key(), "rietveldserver");
    assert_eq!(BackendKind::Gerrit.extra_keys(), &["gerritsquashhash"]);
    assert_eq!(BackendKind::ALL[0], BackendKind::Rietveld);
  }
}
