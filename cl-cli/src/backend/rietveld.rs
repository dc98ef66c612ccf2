//! # Legacy Review Backend
//!
//! Issues on a Rietveld-style server. Every upload posts a fresh patchset
//! diff; landing happens locally through [`crate::land`].

use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use cl_core::consts::{COMMIT_BOT_EMAIL, DESCRIPTION_BACKUP_FILE};
use cl_core::editor::ExternalEditor;
use cl_core::git::{RunOptions, ensure_clean_tree, short_branch_name};
use cl_core::settings::upgrade_to_https;
use cl_core::text::cleanup_list;
use cl_core::{BackendKind, ChangeDescription, ClError, ClStatus, ParsedIssueRef, Vcs};
use cl_rietveld::{IssueProperties, RietveldClient, RietveldError, UploadRequest};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::backend::{Backend, CqState, LandOptions, PatchOptions, ReviewMessage, UploadOptions};
use crate::changelist::{ChangeSnapshot, Changelist};
use crate::clients::create_rietveld_client;
use crate::consts::DEFAULT_SIMILARITY;
use crate::git;
use crate::land::run_local_land;
use crate::watchlists::{ScriptWatchlists, Watchlists};

#[derive(Default)]
pub struct RietveldBackend {
  server: Mutex<Option<String>>,
  client: Mutex<Option<Arc<RietveldClient>>>,
  props: Mutex<Option<Arc<IssueProperties>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RietveldBackend {
  fn set_server(&self, server: String) {
    *lock(&self.server) = Some(server);
    *lock(&self.client) = None;
    *lock(&self.props) = None;
  }

  fn client(&self, cl: &Changelist) -> Result<Arc<RietveldClient>> {
    if let Some(client) = lock(&self.client).as_ref() {
      return Ok(Arc::clone(client));
    }
    let server = self.get_codereview_server(cl)?;
    let client = Arc::new(create_rietveld_client(cl.context(), &server)?);
    *lock(&self.client) = Some(Arc::clone(&client));
    Ok(client)
  }

  /// Issue properties with messages, fetched once.
  fn properties(&self, cl: &Changelist) -> Result<Option<Arc<IssueProperties>>> {
    let Some(issue) = cl.issue()? else {
      return Ok(None);
    };
    if let Some(props) = lock(&self.props).as_ref() {
      return Ok(Some(Arc::clone(props)));
    }
    let client = self.client(cl)?;
    let props = Arc::new(cl.context().block_on(client.get_issue_properties(issue, true))??);
    *lock(&self.props) = Some(Arc::clone(&props));
    Ok(Some(props))
  }

  fn require_properties(&self, cl: &Changelist) -> Result<Arc<IssueProperties>> {
    let issue = cl.require_issue()?;
    self.properties(cl)?.ok_or_else(|| {
      ClError::RemoteNotFound {
        issue,
        host: self.get_codereview_server(cl).unwrap_or_default(),
      }
      .into()
    })
  }

  fn set_flags(&self, cl: &Changelist, flags: &[(&str, &str)]) -> Result<()> {
    let issue = cl.require_issue()?;
    let patchset = match cl.patchset()? {
      Some(patchset) => patchset,
      None => self
        .get_most_recent_patchset(cl)?
        .ok_or_else(|| ClError::invariant(format!("Issue {issue} has no patchsets")))?,
    };
    let client = self.client(cl)?;
    let result = cl.context().block_on(client.set_flags(issue, patchset, flags))?;
    *lock(&self.props) = None;
    result.map_err(|err| match err.downcast_ref::<RietveldError>() {
      Some(e) if e.is_not_found() => ClError::fatal_remote(format!("The issue {issue} doesn't exist.")).into(),
      Some(e) if e.is_forbidden() => ClError::fatal_remote(format!(
        "Access denied to issue {issue}. Maybe the patchset {patchset} doesn't match?"
      ))
      .into(),
      _ => err,
    })
  }

  /// `url@branch` of the upstream repository, for servers that show where
  /// a diff applies.
  fn base_url(cl: &Changelist) -> Result<Option<String>> {
    if let Some(base) = cl.branch_config("base-url")? {
      return Ok(Some(base));
    }
    let upstream = cl.upstream_branch()?;
    let Some(remote_url) = cl.remote_url()? else {
      return Ok(None);
    };
    Ok(
      upstream
        .rsplit_once('/')
        .map(|(_, branch)| format!("{remote_url}@{branch}")),
    )
  }

  /// `issue:patchset` of the CL on the local branch this one tracks.
  fn dependency_patchset(cl: &Changelist) -> Result<Option<String>> {
    let ctx = cl.context();
    let (remote, upstream) = git::fetch_upstream_tuple(ctx, cl.require_branch()?)?;
    if remote != "." {
      return Ok(None);
    }
    let local_branch = short_branch_name(&upstream);
    if ctx.store().get_bool(local_branch, "skip-deps-uploads")? == Some(true) {
      println!(
        "\nSkipping dependency patchset upload because git config branch.{local_branch}.skip-deps-uploads is set to True.\n"
      );
      return Ok(None);
    }
    let parent = Changelist::new(Arc::clone(ctx), Some(format!("refs/heads/{local_branch}")), None, None)?;
    let (Some(issue), Some(patchset), Some(url)) = (parent.issue()?, parent.patchset()?, parent.issue_url()?) else {
      return Ok(None);
    };
    println!(
      "\nThe current branch ({}) is tracking a local branch ({local_branch}) with an associated CL.\n\
       Adding {url}/#ps{patchset} as a dependency patchset.\n",
      cl.branch().unwrap_or_default()
    );
    Ok(Some(format!("{issue}:{patchset}")))
  }

  /// Description for a new issue, edited by the user unless `--force`.
  /// `None` when the result is empty.
  fn prompt_new_description(cl: &Changelist, opts: &UploadOptions, args: &[String]) -> Result<Option<ChangeDescription>> {
    let settings = cl.context().settings();
    let message = match &opts.message {
      Some(message) => message.clone(),
      None => {
        let log = git::create_description_from_log(cl.context().vcs(), args)?;
        match &opts.title {
          Some(title) => format!("{title}\n\n{log}"),
          None => log,
        }
      }
    };
    let mut change_desc = ChangeDescription::new(&message);
    change_desc.update_reviewers(&opts.reviewers, &opts.extra_tbr);
    if !opts.force {
      let editor = ExternalEditor::resolve(settings.git_editor());
      change_desc.prompt(opts.bug.as_deref(), settings.bug_prefix(), &editor)?;
    }
    Ok((!change_desc.is_empty()).then_some(change_desc))
  }

  /// CCs of a new issue: the repository defaults (only the extra list for
  /// private issues), watchers of the touched files, `--cc` and the
  /// description's `CC=` lines.
  fn cc_list(
    cl: &Changelist,
    opts: &UploadOptions,
    change_desc: &ChangeDescription,
    change: &ChangeSnapshot,
    watchlists: &dyn Watchlists,
  ) -> Result<Vec<String>> {
    let settings = cl.context().settings();
    let cc_base = if opts.private {
      warn!(
        "rietveld.cc is ignored since private flag is specified.  You need to review and add them manually if necessary."
      );
      settings.cc_list_without_default()
    } else {
      settings.cc_list()
    };
    let mut cc: Vec<String> = cc_base.split(',').map(str::to_string).collect();
    if !opts.bypass_watchlists {
      cc.extend(watchlists.watchers_for(change)?);
    }
    cc.extend(opts.cc.iter().cloned());
    cc.extend(change_desc.get_cced());
    let mut cc = cleanup_list(&cc);
    cc.dedup();
    Ok(cc)
  }

  fn upload_patchset(
    &self,
    cl: &Changelist,
    opts: &UploadOptions,
    args: &[String],
    change: &ChangeSnapshot,
    existing: Option<u64>,
    typed: Option<&ChangeDescription>,
  ) -> Result<i32> {
    let ctx = cl.context();
    let settings = ctx.settings();
    let vcs = ctx.vcs();

    let mut request = UploadRequest {
      issue: existing,
      ..UploadRequest::default()
    };
    match typed {
      None => {
        request.title = opts
          .title
          .clone()
          .or_else(|| opts.message.as_deref().and_then(|m| m.lines().next()).map(str::to_string))
          .unwrap_or_default();
      }
      Some(change_desc) => {
        let reviewers = change_desc.get_reviewers(false);
        if opts.send_mail && reviewers.is_empty() {
          return Err(ClError::invalid_input("Must specify reviewers to send email.").into());
        }
        let watchlists = ScriptWatchlists::for_root(vcs.root());
        request.cc = Self::cc_list(cl, opts, change_desc, change, &watchlists)?;
        request.title = opts
          .title
          .clone()
          .or_else(|| change_desc.lines().first().cloned())
          .unwrap_or_default();
        request.reviewers = reviewers;
        request.send_mail = opts.send_mail;
        request.description = Some(change_desc.description());
      }
    }

    request.private = opts.private || settings.default_private_flag();
    if let Some(base_url) = Self::base_url(cl)? {
      let (remote, remote_branch) = cl.remote_branch()?;
      request.target_ref = git::get_target_ref(&remote, &remote_branch, opts.target_branch.as_deref());
      request.base_url = Some(base_url);
      request.depends_on_patchset = Self::dependency_patchset(cl)?;
    }
    request.project = settings.project().map(str::to_string);

    let similarity = opts.similarity.unwrap_or(DEFAULT_SIMILARITY);
    let similarity_arg = if opts.find_copies.unwrap_or(true) {
      format!("-C{similarity}")
    } else {
      format!("-M{similarity}")
    };
    let mut diff_args = vec!["diff", "--no-ext-diff", "--no-color", "--full-index", "--binary", similarity_arg.as_str()];
    diff_args.extend(args.iter().map(String::as_str));
    request.diff = vcs.run(&diff_args)?;
    debug!("Uploading change {} with {} files", change.name, change.files.len());

    let client = self.client(cl)?;
    let uploaded = ctx.block_on(client.upload(&request))??;
    if existing.is_none() {
      cl.set_issue(Some(uploaded.issue))?;
    }
    cl.set_patchset(Some(uploaded.patchset))?;
    *lock(&self.props) = None;
    println!("Issue URL: {}", uploaded.url);
    Ok(0)
  }

  fn backup_description(cl: &Changelist, description: &str) {
    let path = cl.context().home().join(DESCRIPTION_BACKUP_FILE);
    println!(
      "\nGot exception while uploading -- saving description to {}\n",
      path.display()
    );
    if let Err(err) = fs::write(&path, description) {
      warn!("Failed to back up the description to {}: {err}", path.display());
    }
  }
}

/// Review status derived from issue properties.
pub fn status_from_properties(props: &IssueProperties) -> ClStatus {
  if props.closed {
    return ClStatus::Closed;
  }
  if props.commit && !props.cq_dry_run {
    return ClStatus::Commit;
  }
  if !props.approving_reviewers().is_empty() {
    return ClStatus::Lgtm;
  }

  let mut messages = props.messages.as_slice();
  while let Some((last, rest)) = messages.split_last() {
    let skippable = last.sender == COMMIT_BOT_EMAIL
      && (last.text.contains("Dry run:") || last.text.contains("The CQ bit was unchecked"));
    if !skippable {
      break;
    }
    messages = rest;
  }

  match messages.last() {
    None => ClStatus::Unsent,
    Some(last) if last.sender != props.owner_email => ClStatus::Reply,
    Some(_) => ClStatus::Waiting,
  }
}

/// Why try jobs cannot run for `issue`, given its properties.
pub fn cannot_trigger_reason(issue: u64, props: Option<&IssueProperties>) -> Option<String> {
  match props {
    None => Some(format!("Rietveld doesn't know about your issue {issue}")),
    Some(p) if p.closed => Some(format!("CL {issue} is closed")),
    Some(p) if p.private => Some(format!("CL {issue} is private")),
    Some(_) => None,
  }
}

/// Apply a unified diff to the index. Returns git's output on failure.
pub fn apply_patch(vcs: &dyn Vcs, diff: &str, opts: &PatchOptions) -> Result<Result<(), String>> {
  let mut args = vec!["apply", "--index", "-p1"];
  if opts.reject {
    args.push("--reject");
  }
  let directory = opts.directory.as_deref().map(|d| format!("--directory={d}"));
  if let Some(directory) = &directory {
    args.push(directory);
  }
  args.push("-");
  let output = vcs.execute(
    &args,
    RunOptions {
      stdin: Some(diff),
      env: &[],
    },
  )?;
  Ok(if output.success() { Ok(()) } else { Err(output.combined()) })
}

impl Backend for RietveldBackend {
  fn kind(&self) -> BackendKind {
    BackendKind::Rietveld
  }

  fn get_codereview_server(&self, cl: &Changelist) -> Result<String> {
    if let Some(server) = lock(&self.server).clone() {
      return Ok(server);
    }
    let stored = if cl.issue()?.is_some() {
      cl.branch_config(BackendKind::Rietveld.server_key())?
        .map(|s| upgrade_to_https(&s))
    } else {
      None
    };
    let server = stored.unwrap_or_else(|| cl.context().settings().default_server());
    *lock(&self.server) = Some(server.clone());
    Ok(server)
  }

  fn fetch_description(&self, cl: &Changelist, _force: bool) -> Result<String> {
    let issue = cl.require_issue()?;
    let client = self.client(cl)?;
    match cl.context().block_on(client.get_description(issue))? {
      Ok(description) => Ok(description.trim().to_string()),
      Err(err) => match err.downcast_ref::<RietveldError>() {
        Some(e) if e.is_not_found() => Err(
          ClError::precondition(format!(
            "\nWhile fetching the description for issue {issue}, received a 404 (not found)\n\
             error. It is likely that you deleted this issue on the server. If this is the\n\
             case, please run\n\n    git cl issue 0\n\n\
             to clear the association with the deleted issue. Then run this command again."
          ))
          .into(),
        ),
        Some(RietveldError::Http { status, .. }) => Err(
          ClError::fatal_remote(format!("\nFailed to fetch issue description. HTTP error {status}")).into(),
        ),
        Some(RietveldError::Transport { .. }) => {
          print_network_warning(&err);
          Ok(String::new())
        }
        // Transient failures surface here once retries run out.
        _ if matches!(err.downcast_ref::<ClError>(), Some(ClError::FatalRemoteError(_))) => {
          print_network_warning(&err);
          Ok(String::new())
        }
        _ => Err(err),
      },
    }
  }

  fn get_most_recent_patchset(&self, cl: &Changelist) -> Result<Option<u64>> {
    Ok(self.properties(cl)?.and_then(|props| props.latest_patchset()))
  }

  fn ensure_authenticated(&self, cl: &Changelist, _force: bool) -> Result<()> {
    let client = self.client(cl)?;
    if client.is_authenticated() {
      return Ok(());
    }
    Err(
      ClError::AuthRequired {
        host: client.host().to_string(),
        hint: format!(
          "Add an entry for machine {} with an access token to your ~/.netrc",
          client.host()
        ),
      }
      .into(),
    )
  }

  fn upload_change(&self, cl: &Changelist, opts: &UploadOptions, args: &[String], change: &ChangeSnapshot) -> Result<i32> {
    let existing = cl.issue()?;
    let typed = match existing {
      Some(issue) => {
        println!("This branch is associated with issue {issue}. Adding patch to that issue.");
        None
      }
      None => match Self::prompt_new_description(cl, opts, args)? {
        Some(desc) => Some(desc),
        None => {
          println!("Description is empty; aborting.");
          return Ok(1);
        }
      },
    };
    self
      .upload_patchset(cl, opts, args, change, existing, typed.as_ref())
      .inspect_err(|_upload_error| {
        if let Some(desc) = &typed {
          Self::backup_description(cl, &desc.description());
        }
      })
  }

  fn update_description_remote(&self, cl: &Changelist, description: &str, _force: bool) -> Result<()> {
    let issue = cl.require_issue()?;
    let client = self.client(cl)?;
    cl.context().block_on(client.update_description(issue, description))?
  }

  fn set_cq_state(&self, cl: &Changelist, state: CqState) -> Result<()> {
    if self.require_properties(cl)?.private {
      return Err(ClError::precondition("Cannot set-commit on private issue").into());
    }
    let flags: &[(&str, &str)] = match state {
      CqState::Commit => &[("commit", "1"), ("cq_dry_run", "0")],
      CqState::None => &[("commit", "0"), ("cq_dry_run", "0")],
      CqState::DryRun => &[("commit", "1"), ("cq_dry_run", "1")],
    };
    self.set_flags(cl, flags)
  }

  fn close_issue(&self, cl: &Changelist) -> Result<()> {
    let issue = cl.require_issue()?;
    let client = self.client(cl)?;
    cl.context().block_on(client.close_issue(issue))??;
    *lock(&self.props) = None;
    Ok(())
  }

  fn get_status(&self, cl: &Changelist) -> Result<ClStatus> {
    match self.properties(cl) {
      Ok(Some(props)) => Ok(status_from_properties(&props)),
      Ok(None) => Ok(ClStatus::Error),
      Err(err) => {
        debug!("Failed to fetch status of {}: {err:#}", cl.branch().unwrap_or_default());
        Ok(ClStatus::Error)
      }
    }
  }

  fn cannot_trigger_tryjob_reason(&self, cl: &Changelist) -> Result<Option<String>> {
    let issue = cl.require_issue()?;
    let props = match self.properties(cl) {
      Ok(props) => props,
      Err(err) if cl_rietveld::error::is_not_found(&err) => None,
      Err(err) => return Err(err),
    };
    Ok(cannot_trigger_reason(issue, props.as_deref()))
  }

  fn get_tryjob_properties(&self, cl: &Changelist, patchset: Option<u64>) -> Result<Map<String, Value>> {
    let project = self.properties(cl)?.and_then(|props| props.project.clone());
    let patchset = match patchset {
      Some(patchset) => Some(patchset),
      None => cl.patchset()?,
    };
    let mut properties = Map::new();
    properties.insert("issue".into(), json!(cl.issue()?));
    properties.insert("patch_project".into(), json!(project));
    properties.insert("patch_storage".into(), json!("rietveld"));
    properties.insert("patchset".into(), json!(patchset));
    properties.insert("rietveld".into(), json!(self.get_codereview_server(cl)?));
    Ok(properties)
  }

  fn patch_with_parsed_issue(&self, cl: &Changelist, issue: &ParsedIssueRef, opts: &PatchOptions) -> Result<i32> {
    let ctx = cl.context();
    let vcs = ctx.vcs();
    ensure_clean_tree(vcs, "apply")?;
    cl.remember_issue(issue.issue);
    if let Some(host) = &issue.hostname {
      self.set_server(format!("https://{host}"));
    }

    let patchset = match issue.patchset {
      Some(patchset) => patchset,
      None => self
        .get_most_recent_patchset(cl)?
        .ok_or_else(|| ClError::invariant(format!("Issue {} has no patchsets", issue.issue)))?,
    };
    let client = self.client(cl)?;
    let diff = match &issue.patch_url {
      Some(url) => ctx.block_on(client.get_patch_url(url))??,
      None => ctx.block_on(client.get_patch(issue.issue, patchset))??,
    };
    if let Err(output) = apply_patch(vcs, &diff, opts)? {
      println!("{output}");
      return Ok(1);
    }

    if opts.nocommit {
      println!("Patch applied to index.");
      return Ok(0);
    }
    let description = cl.description(false)?;
    let message = format!(
      "{description}\n\npatch from issue {i} at patchset {patchset} (http://crrev.com/{i}#ps{patchset})",
      i = issue.issue
    );
    vcs.run(&["commit", "-m", &message])?;
    cl.set_issue(Some(issue.issue))?;
    cl.set_patchset(Some(patchset))?;
    info!("Applied patchset {patchset} of issue {}", issue.issue);
    println!("Committed patch locally.");
    Ok(0)
  }

  fn add_comment(&self, cl: &Changelist, message: &str) -> Result<()> {
    let issue = cl.require_issue()?;
    let client = self.client(cl)?;
    cl.context().block_on(client.add_comment(issue, message))?
  }

  fn messages(&self, cl: &Changelist) -> Result<Vec<ReviewMessage>> {
    let mut messages: Vec<ReviewMessage> = self
      .require_properties(cl)?
      .messages
      .iter()
      .map(|message| ReviewMessage {
        date: message.date.clone(),
        sender: message.sender.clone(),
        text: message.text.clone(),
        approval: message.approval,
        disapproval: message.disapproval,
      })
      .collect();
    messages.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(messages)
  }

  fn approving_reviewers(&self, cl: &Changelist) -> Result<Vec<String>> {
    Ok(
      self
        .properties(cl)?
        .map(|props| props.approving_reviewers())
        .unwrap_or_default(),
    )
  }

  fn issue_owner(&self, cl: &Changelist) -> Result<Option<String>> {
    Ok(
      self
        .properties(cl)?
        .map(|props| props.owner_email.clone())
        .filter(|owner| !owner.is_empty()),
    )
  }

  fn patchset_numbers(&self, cl: &Changelist) -> Result<Vec<u64>> {
    Ok(self.require_properties(cl)?.patchsets.clone())
  }

  fn land(&self, cl: &Changelist, opts: &LandOptions) -> Result<i32> {
    run_local_land(cl, opts)
  }

  fn warns_on_patchset_mismatch(&self) -> bool {
    true
  }
}

fn print_network_warning(err: &anyhow::Error) {
  debug!("Description fetch failed: {err:#}");
  cl_core::print_warning("Failed to retrieve CL description due to network failure.");
}

#[cfg(test)]
mod tests {
  use cl_rietveld::IssueMessage;
  use cl_test_utils::GitRepoTestGuard;

  use super::*;
  use crate::context::ClContext;

  fn message(sender: &str, text: &str) -> IssueMessage {
    IssueMessage {
      sender: sender.to_string(),
      text: text.to_string(),
      ..IssueMessage::default()
    }
  }

  fn props() -> IssueProperties {
    IssueProperties {
      issue: 1,
      owner_email: "owner@example.com".to_string(),
      reviewers: vec!["r@example.com".to_string()],
      patchsets: vec![1, 20001],
      ..IssueProperties::default()
    }
  }

  #[test]
  fn test_status_heuristic() {
    let mut p = props();
    assert_eq!(status_from_properties(&p), ClStatus::Unsent);

    p.messages.push(message("owner@example.com", "PTAL"));
    assert_eq!(status_from_properties(&p), ClStatus::Waiting);

    p.messages.push(message("r@example.com", "nit"));
    assert_eq!(status_from_properties(&p), ClStatus::Reply);

    p.messages.push(IssueMessage {
      approval: true,
      ..message("r@example.com", "lgtm")
    });
    assert_eq!(status_from_properties(&p), ClStatus::Lgtm);

    p.commit = true;
    assert_eq!(status_from_properties(&p), ClStatus::Commit);
    p.cq_dry_run = true;
    assert_eq!(status_from_properties(&p), ClStatus::Lgtm);

    p.closed = true;
    assert_eq!(status_from_properties(&p), ClStatus::Closed);
  }

  #[test]
  fn test_status_skips_dry_run_bot_messages() {
    let mut p = props();
    p.messages.push(message("owner@example.com", "PTAL"));
    p.messages.push(message(COMMIT_BOT_EMAIL, "Dry run: CQ is trying da patch."));
    p.messages.push(message(COMMIT_BOT_EMAIL, "The CQ bit was unchecked by owner"));
    assert_eq!(status_from_properties(&p), ClStatus::Waiting);

    p.messages.push(message(COMMIT_BOT_EMAIL, "Try jobs failed on following builders"));
    assert_eq!(status_from_properties(&p), ClStatus::Reply);
  }

  #[test]
  fn test_cannot_trigger_reasons() {
    assert_eq!(
      cannot_trigger_reason(5, None).as_deref(),
      Some("Rietveld doesn't know about your issue 5")
    );
    let mut p = props();
    assert_eq!(cannot_trigger_reason(5, Some(&p)), None);
    p.private = true;
    assert_eq!(cannot_trigger_reason(5, Some(&p)).as_deref(), Some("CL 5 is private"));
    p.closed = true;
    assert_eq!(cannot_trigger_reason(5, Some(&p)).as_deref(), Some("CL 5 is closed"));
  }

  #[test]
  fn test_server_prefers_branch_config_when_issue_is_set() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    ctx.vcs().run(&["config", "rietveld.server", "codereview.example.com"])?;
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;

    let cl = Changelist::new(Arc::clone(&ctx), Some("refs/heads/main".into()), None, Some(BackendKind::Rietveld))?;
    assert_eq!(cl.codereview_server()?, "https://codereview.example.com");

    ctx.vcs().run(&["config", "branch.main.rietveldissue", "10"])?;
    ctx.vcs().run(&["config", "branch.main.rietveldserver", "http://other.example.com"])?;
    let cl = Changelist::new(ctx, Some("refs/heads/main".into()), None, None)?;
    assert_eq!(cl.codereview_server()?, "https://other.example.com");
    assert_eq!(cl.issue_url()?.as_deref(), Some("https://other.example.com/10"));
    Ok(())
  }

  struct FixedWatchers(&'static [&'static str]);

  impl Watchlists for FixedWatchers {
    fn watchers_for(&self, _change: &ChangeSnapshot) -> Result<Vec<String>> {
      Ok(self.0.iter().map(|w| (*w).to_string()).collect())
    }
  }

  #[test]
  fn test_new_issue_cc_includes_watchers() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let vcs = cl_core::GitCli::new(guard.path());
    vcs.run(&["config", "rietveld.cc", "team@example.com"])?;
    vcs.run(&["config", "rietveld.extracc", "extra@example.com"])?;
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    let cl = Changelist::new(ctx, Some("refs/heads/main".into()), None, Some(BackendKind::Rietveld))?;
    let desc = ChangeDescription::new("Fix\n\nCC=desc@example.com");
    let change = ChangeSnapshot::default();
    let watchers = FixedWatchers(&["net-dev@example.com", "extra@example.com"]);

    let opts = UploadOptions {
      cc: vec!["flag@example.com".to_string()],
      ..UploadOptions::default()
    };
    assert_eq!(
      RietveldBackend::cc_list(&cl, &opts, &desc, &change, &watchers)?,
      vec![
        "desc@example.com",
        "extra@example.com",
        "flag@example.com",
        "net-dev@example.com",
        "team@example.com"
      ]
    );

    let private = UploadOptions {
      private: true,
      ..opts.clone()
    };
    assert_eq!(
      RietveldBackend::cc_list(&cl, &private, &desc, &change, &watchers)?,
      vec!["desc@example.com", "extra@example.com", "flag@example.com", "net-dev@example.com"]
    );

    let bypass = UploadOptions {
      bypass_watchlists: true,
      ..opts
    };
    assert_eq!(
      RietveldBackend::cc_list(&cl, &bypass, &desc, &change, &watchers)?,
      vec!["desc@example.com", "extra@example.com", "flag@example.com", "team@example.com"]
    );
    Ok(())
  }

  #[test]
  fn test_failed_upload_backs_up_typed_description() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = ClContext::for_repo(guard.path(), guard.path())?;
    let cl = Changelist::new(ctx, Some("refs/heads/main".into()), None, Some(BackendKind::Rietveld))?;
    let opts = UploadOptions {
      force: true,
      message: Some("Fix the frobnicator\n\nBUG=123".to_string()),
      ..UploadOptions::default()
    };

    let result = cl
      .backend()
      .upload_change(&cl, &opts, &["no-such-revision".to_string()], &ChangeSnapshot::default());
    assert!(result.is_err());
    let backup = fs::read_to_string(guard.path().join(DESCRIPTION_BACKUP_FILE))?;
    assert!(backup.contains("Fix the frobnicator"));
    assert_eq!(cl.issue()?, None);
    Ok(())
  }

  #[test]
  fn test_apply_patch_to_index() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let vcs = cl_core::GitCli::new(guard.path());
    fs::write(guard.path().join("README.md"), "initial\npatched\n")?;
    let diff = vcs.run(&["diff", "--full-index"])?;
    vcs.run(&["checkout", "--", "README.md"])?;

    apply_patch(&vcs, &diff, &PatchOptions::default())?.map_err(anyhow::Error::msg)?;
    let staged = vcs.run(&["diff", "--cached", "--name-only"])?;
    assert_eq!(staged.trim(), "README.md");

    let again = apply_patch(&vcs, &diff, &PatchOptions::default())?;
    assert!(again.is_err());
    Ok(())
  }
}
