//! # Commit Message Footers
//!
//! Gerrit-style `Key: value` trailers. Footers are the last paragraph of a
//! message, separated from the body by a blank line, and only count when
//! every line of that paragraph parses as a footer. A message that consists
//! of nothing but footer-looking lines has no footers.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::error::ClError;

static FOOTER_PATTERN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\s*([\w-]+): *(.*)$").expect("Failed to compile footer regex"));

static COMMIT_POSITION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^([\w/\-\.]+)@\{#(\d+)\}$").expect("Failed to compile commit position regex")
});

/// Footer key carrying the Gerrit change identity.
pub const CHANGE_ID: &str = "Change-Id";

/// Footer key carrying the sequential position of a landed commit.
pub const COMMIT_POSITION: &str = "Cr-Commit-Position";

/// Footer key recording where a branch was cut from.
pub const BRANCHED_FROM: &str = "Cr-Branched-From";

/// Footers that a Change-Id is inserted after, when present.
const CHANGE_ID_AFTER_KEYS: &[&str] = &["Bug", "Issue", "Test", "Feature"];

/// Normalized footer key to its values, latest footer first.
pub type FooterMap = BTreeMap<String, Vec<String>>;

/// A message split into body lines and its trailing footer block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitFooters {
  /// Everything above the footers, including the separating blank line.
  pub top_lines: Vec<String>,
  /// The raw footer lines.
  pub footer_lines: Vec<String>,
  /// `footer_lines` parsed into `(key, value)`.
  pub parsed: Vec<(String, String)>,
}

/// Title-case each dash-separated word: `change-id` becomes `Change-Id`.
pub fn normalize_name(key: &str) -> String {
  key
    .trim()
    .split('-')
    .map(|word| {
      let mut chars = word.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
      }
    })
    .collect::<Vec<_>>()
    .join("-")
}

/// Parse one `Key: value` line.
pub fn parse_footer(line: &str) -> Option<(String, String)> {
  FOOTER_PATTERN
    .captures(line)
    .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

/// Split `message` into body and footers.
pub fn split_footers(message: &str) -> SplitFooters {
  let lines: Vec<String> = message.lines().map(str::to_string).collect();

  let mut footer_count = 0;
  let mut hit_blank = false;
  for line in lines.iter().rev() {
    if line.trim().is_empty() {
      hit_blank = true;
      break;
    }
    footer_count += 1;
  }
  if !hit_blank {
    footer_count = 0;
  }

  let split_at = lines.len() - footer_count;
  let footer_lines = &lines[split_at..];
  let parsed: Option<Vec<_>> = footer_lines.iter().map(|l| parse_footer(l)).collect();
  match parsed {
    Some(parsed) if !footer_lines.is_empty() => SplitFooters {
      top_lines: lines[..split_at].to_vec(),
      footer_lines: footer_lines.to_vec(),
      parsed,
    },
    _ => SplitFooters {
      top_lines: lines,
      footer_lines: Vec::new(),
      parsed: Vec::new(),
    },
  }
}

/// All footers of `message` keyed by normalized name. Later footers come
/// first in each value list.
pub fn parse_footers(message: &str) -> FooterMap {
  let mut map = FooterMap::new();
  for (key, value) in split_footers(message).parsed.into_iter().rev() {
    map
      .entry(normalize_name(&key))
      .or_default()
      .push(value.trim().to_string());
  }
  map
}

/// Every Change-Id footer value in `message`.
pub fn get_footer_change_id(message: &str) -> Vec<String> {
  parse_footers(message).remove(CHANGE_ID).unwrap_or_default()
}

/// Append `key: value` to the footer block, creating one when needed.
///
/// With `after_keys`, the footer goes right after the last existing footer
/// whose key is one of them, or first in the block when none match.
pub fn add_footer(message: &str, key: &str, value: &str, after_keys: &[&str]) -> String {
  let new_footer = format!("{key}: {value}");
  let SplitFooters {
    mut top_lines,
    mut footer_lines,
    parsed,
  } = split_footers(message);

  if footer_lines.is_empty() {
    if top_lines.last().is_none_or(|l| !l.is_empty()) {
      top_lines.push(String::new());
    }
    footer_lines = vec![new_footer];
  } else if after_keys.is_empty() {
    footer_lines.push(new_footer);
  } else {
    let after: Vec<String> = after_keys.iter().map(|k| normalize_name(k)).collect();
    let position = parsed
      .iter()
      .rposition(|(k, _)| after.contains(&normalize_name(k)))
      .map_or(0, |i| i + 1);
    footer_lines.insert(position, new_footer);
  }

  top_lines.extend(footer_lines);
  top_lines.join("\n")
}

/// Insert a Change-Id footer after any Bug/Issue/Test/Feature footers.
pub fn add_footer_change_id(message: &str, change_id: &str) -> String {
  add_footer(message, CHANGE_ID, change_id, CHANGE_ID_AFTER_KEYS)
}

/// The single value of `key`, or an invariant error when there are several.
pub fn get_unique<'a>(footers: &'a FooterMap, key: &str) -> Result<Option<&'a str>> {
  let key = normalize_name(key);
  match footers.get(&key).map(Vec::as_slice) {
    None | Some([]) => Ok(None),
    Some([value]) => Ok(Some(value.as_str())),
    Some(_) => Err(ClError::invariant(format!("Multiple {key} footers")).into()),
  }
}

/// Ref and sequence number recorded in a `Cr-Commit-Position` footer.
pub fn get_position(footers: &FooterMap) -> Result<(String, u64)> {
  let Some(position) = get_unique(footers, COMMIT_POSITION)? else {
    return Err(ClError::invariant("Unable to infer commit position from footers").into());
  };
  let caps = COMMIT_POSITION_PATTERN
    .captures(position)
    .ok_or_else(|| ClError::invariant(format!("Invalid {COMMIT_POSITION} value: {position}")))?;
  let number = caps[2]
    .parse()
    .map_err(|_| ClError::invariant(format!("Invalid {COMMIT_POSITION} value: {position}")))?;
  Ok((caps[1].to_string(), number))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalize_name() {
    assert_eq!(normalize_name("change-id"), "Change-Id");
    assert_eq!(normalize_name("CR-COMMIT-POSITION"), "Cr-Commit-Position");
    assert_eq!(normalize_name(" bug "), "Bug");
  }

  #[test]
  fn test_split_footers_requires_blank_separator() {
    let split = split_footers("Title\n\nBody\n\nBug: 1\nChange-Id: I123");
    assert_eq!(split.top_lines, vec!["Title", "", "Body", ""]);
    assert_eq!(split.footer_lines, vec!["Bug: 1", "Change-Id: I123"]);
    assert_eq!(split.parsed[1], ("Change-Id".to_string(), "I123".to_string()));

    // Only footers, no separator: not footers.
    let split = split_footers("Bug: 1\nChange-Id: I123");
    assert!(split.footer_lines.is_empty());
  }

  #[test]
  fn test_split_footers_rejects_mixed_paragraph() {
    let split = split_footers("Title\n\nnot a footer\nChange-Id: I123");
    assert!(split.footer_lines.is_empty());
    assert_eq!(split.top_lines.len(), 4);
  }

  #[test]
  fn test_parse_footers_latest_first() {
    let footers = parse_footers("Title\n\nbug: 1\nBug: 2");
    assert_eq!(footers["Bug"], vec!["2", "1"]);
  }

  #[test]
  fn test_add_footer_creates_block() {
    assert_eq!(add_footer("Title", "Bug", "1", &[]), "Title\n\nBug: 1");
    assert_eq!(add_footer("Title\n", "Bug", "1", &[]), "Title\n\nBug: 1");
  }

  #[test]
  fn test_add_footer_change_id_after_bug() {
    let msg = "Header.\n\nAdded: 2016\nBug: 123\nVerified-By: CQ";
    assert_eq!(
      add_footer_change_id(msg, "Iabc"),
      "Header.\n\nAdded: 2016\nBug: 123\nChange-Id: Iabc\nVerified-By: CQ"
    );

    let msg = "Header.\n\nVerified-By: CQ";
    assert_eq!(add_footer_change_id(msg, "Iabc"), "Header.\n\nChange-Id: Iabc\nVerified-By: CQ");
  }

  #[test]
  fn test_get_footer_change_id() {
    assert_eq!(get_footer_change_id("Title\n\nChange-Id: I1"), vec!["I1"]);
    assert!(get_footer_change_id("Title\n\nBody").is_empty());
    assert_eq!(get_footer_change_id("T\n\nChange-Id: I1\nChange-Id: I2").len(), 2);
  }

  #[test]
  fn test_get_position() {
    let footers = parse_footers("Title\n\nCr-Commit-Position: refs/heads/master@{#41}");
    assert_eq!(get_position(&footers).unwrap(), ("refs/heads/master".to_string(), 41));

    let footers = parse_footers("Title\n\nCr-Commit-Position: garbage");
    assert!(get_position(&footers).is_err());

    assert!(get_position(&FooterMap::new()).is_err());
  }
}
