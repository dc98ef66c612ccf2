//! # Comments Command
//!
//! Prints the review thread of a changelist, or adds a message to it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use cl_core::git::current_branch_ref;
use owo_colors::OwoColorize;
use serde_json::{Value, json};

use super::{BackendArgs, write_json};
use crate::backend::ReviewMessage;
use crate::changelist::Changelist;
use crate::context::ClContext;

#[derive(Args)]
pub struct CommentsArgs {
  /// Comment to add to the issue
  #[arg(short, long = "add-comment", value_name = "TEXT")]
  pub add_comment: Option<String>,

  /// Review issue id; defaults to the current branch's issue
  #[arg(short, long, value_name = "ISSUE")]
  pub issue: Option<u64>,

  /// Write a summary of the comments as JSON to this file
  #[arg(short, long = "json-file", value_name = "FILE")]
  pub json_file: Option<PathBuf>,

  #[command(flatten)]
  pub backend: BackendArgs,
}

pub(crate) fn handle_comments_command(args: CommentsArgs) -> Result<i32> {
  let ctx = ClContext::discover(None)?;
  let branchref = current_branch_ref(ctx.vcs())?;
  let cl = Changelist::new(Arc::clone(&ctx), branchref, args.issue, args.backend.kind())?;

  if let Some(comment) = &args.add_comment {
    cl.add_comment(comment)?;
    return Ok(0);
  }

  let messages = cl.messages()?;
  let owner = cl.issue_owner()?;
  for message in &messages {
    println!("{}", format_message(message, owner.as_deref()));
  }
  if let Some(path) = &args.json_file {
    write_json(path, &comments_json(&messages))?;
  }
  Ok(0)
}

/// Header line colored by the sender's vote, followed by the indented text.
fn format_message(message: &ReviewMessage, owner: Option<&str>) -> String {
  let header = format!("{}  {}", short_date(&message.date), message.sender);
  let header = if message.disapproval {
    header.red().to_string()
  } else if message.approval {
    header.green().to_string()
  } else if owner == Some(message.sender.as_str()) {
    header.magenta().to_string()
  } else {
    header.blue().to_string()
  };
  let body: Vec<String> = message.text.trim().lines().map(|line| format!("  {line}")).collect();
  format!("\n{header}\n{}", body.join("\n"))
}

/// Timestamp without fractional seconds.
fn short_date(date: &str) -> &str {
  date.split('.').next().unwrap_or(date)
}

fn comments_json(messages: &[ReviewMessage]) -> Value {
  Value::Array(
    messages
      .iter()
      .map(|message| {
        json!({
          "date": message.date,
          "lgtm": message.approval,
          "message": message.text,
          "not_lgtm": message.disapproval,
          "sender": message.sender,
        })
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn message(sender: &str, text: &str, approval: bool, disapproval: bool) -> ReviewMessage {
    ReviewMessage {
      date: "2017-03-15 20:00:41.000000000".to_string(),
      sender: sender.to_string(),
      text: text.to_string(),
      approval,
      disapproval,
    }
  }

  #[test]
  fn test_format_message_colors_by_vote() {
    let lgtm = format_message(&message("r@example.com", "lgtm", true, false), None);
    assert!(lgtm.contains(&"2017-03-15 20:00:41  r@example.com".green().to_string()));

    let not_lgtm = format_message(&message("r@example.com", "no", false, true), None);
    assert!(not_lgtm.contains(&"2017-03-15 20:00:41  r@example.com".red().to_string()));

    let from_owner = format_message(&message("o@example.com", "ping", false, false), Some("o@example.com"));
    assert!(from_owner.contains(&"2017-03-15 20:00:41  o@example.com".magenta().to_string()));

    let other = format_message(&message("x@example.com", "nit", false, false), Some("o@example.com"));
    assert!(other.contains(&"2017-03-15 20:00:41  x@example.com".blue().to_string()));
  }

  #[test]
  fn test_format_message_indents_text() {
    let formatted = format_message(&message("r@example.com", "first\nsecond\n", false, false), None);
    assert!(formatted.starts_with('\n'));
    assert!(formatted.ends_with("\n  first\n  second"));
  }

  #[test]
  fn test_comments_json() {
    let summary = comments_json(&[message("r@example.com", "lgtm", true, false)]);
    assert_eq!(
      summary,
      json!([{
        "date": "2017-03-15 20:00:41.000000000",
        "lgtm": true,
        "message": "lgtm",
        "not_lgtm": false,
        "sender": "r@example.com",
      }])
    );
  }
}
