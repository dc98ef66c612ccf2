//! # Change Description
//!
//! Structured editing of the human-authored change description. Two footer
//! styles coexist: legacy `KEY=value` tag lines (`R=`, `TBR=`, `CC=`, `BUG=`)
//! which live in the body, and Gerrit-style `Key: value` trailers which always
//! form the final paragraph. Appending never places body text after the
//! trailer block.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::editor::DescriptionEditor;
use crate::error::ClError;
use crate::footers::{self, BRANCHED_FROM, COMMIT_POSITION};
use crate::text::cleanup_list;

static R_LINE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[ \t]*(TBR|R)[ \t]*=[ \t]*(.*?)[ \t]*$").expect("Failed to compile reviewer line regex")
});

static CC_LINE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[ \t]*(CC)[ \t]*=[ \t]*(.*?)[ \t]*$").expect("Failed to compile CC line regex"));

static BUG_LINE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[ \t]*(BUG)[ \t]*=[ \t]*(.*?)[ \t]*$").expect("Failed to compile bug line regex"));

static TAG_LINE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[ \t]*(?P<key>[A-Z][A-Z_0-9]*)[ \t]*=[ \t]*(?P<value>.*?)[ \t]*$")
    .expect("Failed to compile tag line regex")
});

static CHERRY_PICK_LINE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^\(cherry picked from commit [a-fA-F0-9]{40}\)$").expect("Failed to compile cherry-pick regex")
});

const EDITOR_HEADER: &[&str] = &[
  "# Enter a description of the change.",
  "# This will be displayed on the codereview site.",
  "# The first line will also be used as the subject of the review.",
  "#--------------------This line is 72 characters long--------------------",
];

/// Parsed, editable change description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDescription {
  lines: Vec<String>,
}

impl ChangeDescription {
  pub fn new(description: &str) -> Self {
    Self {
      lines: description.trim().lines().map(str::to_string).collect(),
    }
  }

  /// The description as a single string.
  pub fn description(&self) -> String {
    self.lines.join("\n")
  }

  pub fn lines(&self) -> &[String] {
    &self.lines
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  /// Replace the text, dropping leading and trailing blank lines.
  pub fn set_description(&mut self, text: &str) {
    self.set_lines(text.lines().map(str::to_string).collect());
  }

  fn set_lines(&mut self, lines: Vec<String>) {
    let mut lines: Vec<String> = lines.into_iter().map(|l| l.trim_end().to_string()).collect();
    while lines.first().is_some_and(String::is_empty) {
      lines.remove(0);
    }
    while lines.last().is_some_and(String::is_empty) {
      lines.pop();
    }
    self.lines = lines;
  }

  /// Rewrite all `R=`/`TBR=` lines into at most one of each.
  ///
  /// Existing `R=` reviewers are merged after `reviewers`; `extra_tbr` is
  /// appended to the `TBR=` list. The new lines replace the first old one,
  /// or become footers when there was none.
  pub fn update_reviewers(&mut self, reviewers: &[String], extra_tbr: &[String]) {
    if reviewers.is_empty() && extra_tbr.is_empty() {
      return;
    }
    let mut reviewers = reviewers.to_vec();

    let first_match = self.lines.iter().position(|l| R_LINE.is_match(l));
    let mut r_names = Vec::new();
    let mut tbr_names = Vec::new();
    let mut kept = Vec::with_capacity(self.lines.len());
    for line in &self.lines {
      match R_LINE.captures(line) {
        Some(caps) => {
          let people = cleanup_list(&[caps[2].trim()]);
          if &caps[1] == "TBR" {
            tbr_names.extend(people);
          } else {
            r_names.extend(people);
          }
        }
        None => kept.push(line.clone()),
      }
    }
    self.set_lines(kept);

    for name in r_names {
      if !reviewers.contains(&name) {
        reviewers.push(name);
      }
    }
    tbr_names.extend(extra_tbr.iter().cloned());

    let new_r_line = (!reviewers.is_empty()).then(|| format!("R={}", reviewers.join(", ")));
    let new_tbr_line = (!tbr_names.is_empty()).then(|| format!("TBR={}", tbr_names.join(", ")));

    match first_match {
      Some(loc) if loc < self.lines.len() => {
        if let Some(tbr) = new_tbr_line {
          self.lines.insert(loc, tbr);
        }
        if let Some(r) = new_r_line {
          self.lines.insert(loc, r);
        }
      }
      _ => {
        if let Some(r) = new_r_line {
          self.append_footer(&r);
        }
        if let Some(tbr) = new_tbr_line {
          self.append_footer(&tbr);
        }
      }
    }
  }

  /// Let the user edit the description. Adds `BUG=` lines first when the
  /// description has none.
  pub fn prompt(&mut self, bug: Option<&str>, bug_prefix: Option<&str>, editor: &dyn DescriptionEditor) -> Result<()> {
    let mut lines: Vec<String> = EDITOR_HEADER.iter().map(|l| (*l).to_string()).collect();
    lines.extend(self.lines.iter().cloned());
    self.set_lines(lines);

    if !self.lines.iter().any(|l| BUG_LINE.is_match(l)) {
      let prefix = bug_prefix.unwrap_or_default();
      let mut values = bug_line_values(prefix, bug.unwrap_or_default());
      if values.is_empty() {
        values.push(prefix.to_string());
      }
      for value in values {
        self.append_footer(&format!("BUG={value}"));
      }
    }

    let Some(content) = editor.edit(&self.description())? else {
      return Err(ClError::precondition("Running editor failed").into());
    };
    let clean: Vec<String> = content
      .lines()
      .filter(|l| !l.starts_with('#'))
      .map(|l| l.trim_end().to_string())
      .collect();
    if clean.iter().all(String::is_empty) {
      return Err(ClError::invalid_input("No CL description, aborting").into());
    }
    self.set_lines(clean);
    Ok(())
  }

  /// Add a footer line.
  ///
  /// `Key: value` lines join the trailer block. `KEY=value` lines go at the
  /// end of the body, directly below a previous tag line or after a blank
  /// line otherwise.
  pub fn append_footer(&mut self, line: &str) {
    if let Some((key, value)) = footers::parse_footer(line) {
      let updated = footers::add_footer(&self.description(), &key, &value, &[]);
      self.set_description(&updated);
      return;
    }

    if self.lines.is_empty() {
      self.lines.push(line.to_string());
      return;
    }

    let split = footers::split_footers(&self.description());
    let mut top_lines = split.top_lines;
    let separator: Vec<String> = if split.footer_lines.is_empty() {
      Vec::new()
    } else {
      top_lines.pop().into_iter().collect()
    };

    let prev_line = top_lines.last().map(String::as_str).unwrap_or_default();
    if !TAG_LINE.is_match(prev_line) || !TAG_LINE.is_match(line) {
      top_lines.push(String::new());
    }
    top_lines.push(line.to_string());
    top_lines.extend(separator);
    top_lines.extend(split.footer_lines);
    self.lines = top_lines;
  }

  /// Reviewers from `R=`/`TBR=` lines, or only `TBR=` ones.
  pub fn get_reviewers(&self, tbr_only: bool) -> Vec<String> {
    let found: Vec<String> = self
      .lines
      .iter()
      .filter_map(|l| R_LINE.captures(l))
      .filter(|caps| !tbr_only || caps[1].eq_ignore_ascii_case("TBR"))
      .map(|caps| caps[2].trim().to_string())
      .collect();
    cleanup_list(&found)
  }

  /// People from `CC=` lines.
  pub fn get_cced(&self) -> Vec<String> {
    let found: Vec<String> = self
      .lines
      .iter()
      .filter_map(|l| CC_LINE.captures(l))
      .map(|caps| caps[2].trim().to_string())
      .collect();
    cleanup_list(&found)
  }

  /// Add position and lineage footers for a commit landing on `dest_ref`
  /// on top of `parent_hash`, whose message is `parent_msg`.
  ///
  /// Same ref as the parent: the position is the parent's plus one. Another
  /// ref: the position restarts at 1 and a `Cr-Branched-From` entry points
  /// back at the parent. Existing `Cr-` footers are renamed to
  /// `Cr-Original-` so they cannot be mistaken for the new ones.
  pub fn update_with_git_number_footers(&mut self, parent_hash: &str, parent_msg: &str, dest_ref: &str) -> Result<()> {
    if parent_msg.is_empty() || parent_hash.is_empty() || dest_ref.is_empty() {
      return Err(ClError::invariant("Numbering footers need a parent commit and a destination ref").into());
    }
    let parent_footers = footers::parse_footers(parent_msg);
    let (parent_ref, parent_number) = footers::get_position(&parent_footers)?;

    let cherry_pick_line = match self.lines.last() {
      Some(last) if CHERRY_PICK_LINE.is_match(last) => self.lines.pop(),
      _ => None,
    };

    let split = footers::split_footers(&self.description());
    let mut parsed: Vec<(String, String)> = split
      .parsed
      .into_iter()
      .map(|(k, v)| match k.strip_prefix("Cr-") {
        Some(rest) => (format!("Cr-Original-{rest}"), v),
        None => (k, v),
      })
      .collect();

    let mut lineage: Vec<String> = parent_footers
      .get(BRANCHED_FROM)
      .map(|v| v.iter().rev().cloned().collect())
      .unwrap_or_default();
    let number = if parent_ref == dest_ref {
      parent_number + 1
    } else {
      lineage.insert(0, format!("{parent_hash}-{parent_ref}@{{#{parent_number}}}"));
      1
    };

    parsed.push((COMMIT_POSITION.to_string(), format!("{dest_ref}@{{#{number}}}")));
    parsed.extend(lineage.into_iter().map(|v| (BRANCHED_FROM.to_string(), v)));

    let mut lines = split.top_lines;
    lines.extend(cherry_pick_line);
    if lines.last().is_none_or(|l| !l.is_empty()) {
      lines.push(String::new());
    }
    lines.extend(parsed.into_iter().map(|(k, v)| format!("{k}: {v}")));
    self.lines = lines;
    Ok(())
  }
}

/// Expand a comma-separated `--bug` value into `BUG=` line values.
///
/// Plain numbers are joined and prefixed with the default project; anything
/// else is kept verbatim, one per line, sorted.
pub fn bug_line_values(default_project: &str, bugs: &str) -> Vec<String> {
  let mut default_bugs = Vec::new();
  let mut others = Vec::new();
  for bug in bugs.split(',').map(str::trim).filter(|b| !b.is_empty()) {
    match bug.parse::<u64>() {
      Ok(n) => default_bugs.push(n.to_string()),
      Err(_) => others.push(bug.to_string()),
    }
  }

  let mut values = Vec::new();
  if !default_bugs.is_empty() {
    let joined = default_bugs.join(",");
    if default_project.is_empty() {
      values.push(joined);
    } else {
      values.push(format!("{default_project}:{joined}"));
    }
  }
  others.sort();
  values.extend(others);
  values
}
