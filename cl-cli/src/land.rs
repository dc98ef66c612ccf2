//! # Local Land Protocol
//!
//! Squashes a branch into a single commit, rewrites its footers when the
//! target requires sequential numbering, pushes it (directly or through a
//! pending ref) and closes the issue. Used by the legacy backend; Gerrit
//! submits server side.
//!
//! Whatever happens after the temporary merge branch is created, the
//! original branch is checked out again and the merge branch deleted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use cl_core::consts::{CHERRY_PICK_BRANCH, MERGE_BRANCH};
use cl_core::git::{commit_timestamp, ensure_clean_tree, rev_parse};
use cl_core::{ChangeDescription, ClError, RetryPolicy, Vcs, print_warning};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::LandOptions;
use crate::changelist::Changelist;
use crate::consts::{FATAL_PUSH_MARKERS, LOCAL_PENDING_REF_PREFIX};
use crate::context::ClContext;
use crate::git::{self, amend_head, validate_contributor};
use crate::git_numberer::GitNumbererState;
use crate::hooks::{HookKind, run_hook, run_post_land_hook};
use crate::tree_status::{TreeStatus, get_tree_status};

const LAND_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Steps of a local landing. Any step may end in [`LandState::Aborted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandState {
  Start,
  HooksChecked,
  SquashedCommitCreated,
  Pushed,
  PendingWait,
  Landed,
  IssueClosed,
  Done,
  Aborted,
}

#[derive(Debug)]
struct LandProgress {
  state: LandState,
}

impl LandProgress {
  const fn new() -> Self {
    Self { state: LandState::Start }
  }

  fn advance(&mut self, next: LandState) {
    debug!("Land: {:?} -> {next:?}", self.state);
    self.state = next;
  }

  fn abort(&mut self, reason: &str) {
    warn!("Land aborted in state {:?}: {reason}", self.state);
    self.state = LandState::Aborted;
  }
}

/// Failures while getting the squashed commit onto the remote.
#[derive(Debug, Error)]
pub enum PushError {
  #[error("Fetch of {git_ref} failed with exit code {code}:\n{output}")]
  FetchFailed { git_ref: String, code: i32, output: String },

  #[error(
    "Your patch doesn't apply cleanly to ref '{pending_ref}', the following files have merge conflicts:\n{files}\nPlease rebase your patch and try again."
  )]
  MergeConflict { pending_ref: String, files: String },

  #[error("Push to {git_ref} failed with exit code {code}:\n{output}")]
  PushFailed {
    git_ref: String,
    code: i32,
    output: String,
    fatal: bool,
  },
}

impl PushError {
  /// Conflicts and server-side rejections are final.
  pub const fn is_retryable(&self) -> bool {
    match self {
      Self::FetchFailed { .. } => true,
      Self::MergeConflict { .. } => false,
      Self::PushFailed { fatal, .. } => !*fatal,
    }
  }
}

fn retryable_push_error(err: &anyhow::Error) -> bool {
  err.downcast_ref::<PushError>().is_some_and(PushError::is_retryable)
}

/// Whether retrying a push that printed `output` cannot help.
pub fn is_fatal_push_failure(output: &str) -> bool {
  FATAL_PUSH_MARKERS.iter().any(|marker| output.contains(marker))
}

fn push_head(vcs: &dyn Vcs, remote: &str, git_ref: &str) -> Result<String> {
  let (code, output) = vcs.run_with_code(&["push", "--porcelain", remote, &format!("HEAD:{git_ref}")])?;
  if code == 0 {
    return Ok(output);
  }
  let fatal = is_fatal_push_failure(&output);
  if fatal {
    print_warning(
      "Fatal push error. Make sure your .netrc credentials and git user.email are correct and you have push access to the repo.",
    );
  }
  Err(
    PushError::PushFailed {
      git_ref: git_ref.to_string(),
      code,
      output,
      fatal,
    }
    .into(),
  )
}

/// Push HEAD straight to `branch` of `remote`.
pub fn push_direct(vcs: &dyn Vcs, remote: &str, branch: &str, policy: RetryPolicy) -> Result<String> {
  policy.run(
    &format!("pushing to {branch}"),
    |attempt| {
      if attempt > 0 {
        println!("Retrying push to {branch}...");
      }
      push_head(vcs, remote, branch)
    },
    retryable_push_error,
  )
}

/// Cherry-pick HEAD onto a fresh copy of `pending_ref` and push it there.
/// Leaves the working copy detached at the pushed commit.
pub fn push_to_git_pending(vcs: &dyn Vcs, remote: &str, pending_ref: &str, policy: RetryPolicy) -> Result<String> {
  let Some(rest) = pending_ref.strip_prefix("refs/") else {
    return Err(ClError::invariant(format!("Pending ref {pending_ref} must start with refs/")).into());
  };
  let local_pending_ref = format!("{LOCAL_PENDING_REF_PREFIX}{rest}");
  let cherry = rev_parse(vcs, "HEAD")?;

  policy.run(
    &format!("pushing to {pending_ref}"),
    |_attempt| {
      println!("Fetching pending ref {pending_ref}...");
      let (code, output) = vcs.run_with_code(&["fetch", remote, &format!("+{pending_ref}:{local_pending_ref}")])?;
      if code != 0 {
        return Err(
          PushError::FetchFailed {
            git_ref: pending_ref.to_string(),
            code,
            output,
          }
          .into(),
        );
      }

      println!("Cherry-picking commit on top of pending ref...");
      let _ = vcs.run_with_code(&["checkout", &local_pending_ref])?;
      let (code, _) = vcs.run_with_code(&["cherry-pick", &cherry])?;
      if code != 0 {
        let files = vcs.run(&["diff", "--name-status", "--diff-filter=U"])?;
        let _ = vcs.run_with_code(&["cherry-pick", "--abort"])?;
        return Err(
          PushError::MergeConflict {
            pending_ref: pending_ref.to_string(),
            files: files.trim().to_string(),
          }
          .into(),
        );
      }

      println!("Pushing commit to {pending_ref}... It can take a while.");
      let output = push_head(vcs, remote, pending_ref)?;
      println!("Commit pushed to pending ref successfully!");
      Ok(output)
    },
    retryable_push_error,
  )
}

/// Poll `real_ref` of `remote` until a commit with the tree of
/// `pushed_commit` shows up after `local_base_ref`. Returns that commit.
pub fn wait_for_real_commit(
  vcs: &dyn Vcs,
  remote: &str,
  pushed_commit: &str,
  local_base_ref: &str,
  real_ref: &str,
  interrupted: &AtomicBool,
) -> Result<String> {
  println!();
  println!("Waiting for commit to be landed on {real_ref}...");
  println!("(If you are impatient, you may Ctrl-C once without harm)");
  let target_tree = rev_parse(vcs, &format!("{pushed_commit}:"))?;
  let mut current_rev = rev_parse(vcs, local_base_ref)?;

  let spinner = indicatif::ProgressBar::new_spinner();
  spinner.enable_steady_tick(Duration::from_millis(120));
  let mut poll = 0_u64;
  let found = loop {
    if interrupted.load(Ordering::SeqCst) {
      break Err(ClError::UserAbort.into());
    }
    spinner.set_message(format!("fetching ({poll})..."));
    poll += 1;

    let (code, output) = vcs.run_with_code(&["fetch", remote, real_ref])?;
    if code != 0 {
      warn!("Fetch of {real_ref} failed: {}", output.trim());
      std::thread::sleep(LAND_POLL_INTERVAL);
      continue;
    }
    let to_rev = rev_parse(vcs, "FETCH_HEAD")?;
    let commits = vcs.run(&["rev-list", &format!("{current_rev}..{to_rev}")])?;
    let mut matched = None;
    for commit in commits.lines() {
      if rev_parse(vcs, &format!("{commit}:"))? == target_tree {
        matched = Some(commit.to_string());
        break;
      }
    }
    if let Some(commit) = matched {
      break Ok(commit);
    }
    current_rev = to_rev;
    std::thread::sleep(LAND_POLL_INTERVAL);
  };
  spinner.finish_and_clear();
  if found.is_ok() {
    println!("Found commit on {real_ref}");
  }
  found
}

/// Flag raised by Ctrl-C while the context's runtime is alive.
fn interrupt_flag(ctx: &ClContext) -> Result<Arc<AtomicBool>> {
  let flag = Arc::new(AtomicBool::new(false));
  let raised = Arc::clone(&flag);
  ctx.runtime()?.spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      raised.store(true, Ordering::SeqCst);
    }
  });
  Ok(flag)
}

/// Where the squashed commit ended up.
#[derive(Debug)]
struct Pushed {
  revision: String,
  remote: String,
  branch: String,
  pending_ref: Option<String>,
}

fn delete_stale_branches(vcs: &dyn Vcs) -> Result<()> {
  for branch in [MERGE_BRANCH, CHERRY_PICK_BRANCH] {
    let full = format!("refs/heads/{branch}");
    if vcs.run_ok(&["show-ref", "--quiet", "--verify", &full])?.is_some() {
      vcs.run(&["branch", "-D", branch])?;
    }
  }
  Ok(())
}

/// Give the squashed commit at HEAD its position footers. The issue is
/// closed with the numbered description too.
fn add_git_number_footers(
  vcs: &dyn Vcs,
  merge_base: &str,
  branch: &str,
  commit_desc: &mut ChangeDescription,
  change_desc: &mut ChangeDescription,
) -> Result<()> {
  debug!("Adding git number footers");
  let parent_msg = vcs.run(&["show", "-s", "--format=%B", merge_base])?;
  commit_desc.update_with_git_number_footers(merge_base, parent_msg.trim(), branch)?;
  // Positions must follow commit times.
  let timestamp = (commit_timestamp(vcs, merge_base)? + 1).max(commit_timestamp(vcs, "HEAD")?);
  amend_head(vcs, &commit_desc.description(), timestamp)?;
  *change_desc = ChangeDescription::new(&commit_desc.description());
  Ok(())
}

fn squash_and_push(
  cl: &Changelist,
  progress: &mut LandProgress,
  merge_base: &str,
  commit_desc: &mut ChangeDescription,
  change_desc: &mut ChangeDescription,
  contributor: Option<&str>,
) -> Result<Pushed> {
  let ctx = cl.context();
  let vcs = ctx.vcs();
  vcs.run(&["checkout", "-q", "-b", MERGE_BRANCH])?;
  vcs.run(&["reset", "--soft", merge_base])?;
  let description = commit_desc.description();
  match contributor {
    Some(author) => vcs.run(&["commit", "--author", author, "-m", &description])?,
    None => vcs.run(&["commit", "-m", &description])?,
  };
  progress.advance(LandState::SquashedCommitCreated);

  let (remote, branch) = git::fetch_upstream_tuple(ctx, cl.require_branch()?)?;
  let remote_url = git::remote_url(ctx, &remote)?.unwrap_or_else(|| remote.clone());
  let numberer = GitNumbererState::load(vcs, ctx.settings(), &remote_url, &branch)?;

  if numberer.should_add_git_number {
    add_git_number_footers(vcs, merge_base, &branch, commit_desc, change_desc)?;
  }

  let pending_ref = match numberer.pending_prefix.as_deref() {
    Some(prefix) if !branch.starts_with(prefix) => {
      let Some(rest) = branch.strip_prefix("refs/") else {
        return Err(ClError::invariant(format!("Target ref {branch} must start with refs/")).into());
      };
      Some(format!("{}/{rest}", prefix.trim_end_matches('/')))
    }
    _ => None,
  };

  let output = match pending_ref.as_deref() {
    Some(pending) => push_to_git_pending(vcs, &remote, pending, RetryPolicy::git_push())?,
    None => push_direct(vcs, &remote, &branch, RetryPolicy::git_push())?,
  };
  debug!("{output}");
  progress.advance(LandState::Pushed);

  Ok(Pushed {
    revision: rev_parse(vcs, "HEAD")?,
    remote,
    branch,
    pending_ref,
  })
}

fn local_upstream_error(branch: &str, upstream: &str) -> ClError {
  ClError::precondition(format!(
    "Attempting to push branch '{branch}' into another local branch!\n\n\
     Either reparent this branch on top of origin/master:\n  \
     git reparent-branch --root\n\n\
     OR run `git rebase-update` if you think the parent branch is already committed.\n\n  \
     Current parent: '{upstream}'"
  ))
}

/// Land the changelist's branch with the local protocol. Returns the exit
/// code.
pub fn run_local_land(cl: &Changelist, opts: &LandOptions) -> Result<i32> {
  let ctx = cl.context();
  let vcs = ctx.vcs();
  let settings = ctx.settings();
  let branch = cl.require_branch()?.to_string();
  let mut progress = LandProgress::new();

  let (remote, upstream) = git::fetch_upstream_tuple(ctx, &branch)?;
  if remote == "." {
    return Err(local_upstream_error(&branch, &upstream).into());
  }

  let base_branch = match &opts.base_branch {
    Some(base) => base.clone(),
    None => cl.upstream_branch()?,
  };
  let author = opts.contributor.as_deref().map(validate_contributor).transpose()?;
  ensure_clean_tree(vcs, "land")?;

  let branchref = cl
    .branchref()
    .ok_or_else(|| ClError::precondition("ERROR: unable to determine current branch (detached HEAD?)"))?;
  let upstream_commits = vcs.run(&["rev-list", &format!("^{branchref}"), &base_branch])?;
  let missing = upstream_commits.lines().count();
  if missing > 0 {
    return Err(
      ClError::precondition(format!(
        "Base branch \"{base_branch}\" has {missing} commits not in this branch.\nRun \"git merge {base_branch}\" before attempting to land."
      ))
      .into(),
    );
  }

  let merge_base = vcs.run(&["merge-base", &base_branch, "HEAD"])?.trim().to_string();
  if !opts.bypass_hooks {
    run_hook(HookKind::PreLand, &cl.change_snapshot(&merge_base, author.map(str::to_string))?)?;
    match get_tree_status(ctx)? {
      TreeStatus::Closed => {
        return Err(
          ClError::precondition(
            "The tree is closed.  Please wait for it to reopen. Use \"git cl land --bypass-hooks\" to commit on a closed tree.",
          )
          .into(),
        );
      }
      TreeStatus::Unknown => {
        return Err(
          ClError::precondition(
            "Unable to determine tree status.  Please verify manually and use \"git cl land --bypass-hooks\" to commit on a closed tree.",
          )
          .into(),
        );
      }
      TreeStatus::Open | TreeStatus::Unset => {}
    }
  }
  progress.advance(LandState::HooksChecked);

  let issue = cl.issue()?;
  let mut change_desc = ChangeDescription::new(opts.message.as_deref().unwrap_or_default());
  if change_desc.is_empty() && issue.is_some() {
    change_desc = ChangeDescription::new(&cl.description(false)?);
  }
  if change_desc.is_empty() {
    if issue.is_none() && opts.bypass_hooks {
      change_desc = ChangeDescription::new(&git::create_description_from_log(vcs, &[merge_base.clone()])?);
    } else {
      let url = cl.issue_url()?.unwrap_or_default();
      return Err(ClError::precondition(format!("No description set.\nVisit {url}/edit to set it.")).into());
    }
  }

  let issue_url = cl.issue_url()?;
  if issue.is_some() {
    change_desc.update_reviewers(&cl.approving_reviewers()?, &[]);
  }
  let mut commit_desc = change_desc.clone();
  if let Some(url) = &issue_url {
    commit_desc.append_footer(&format!("Review-Url: {url} ."));
  }
  if let Some(contributor) = &opts.contributor {
    commit_desc.append_footer(&format!("Patch from {contributor}."));
  }

  println!("Description:");
  println!("{}", commit_desc.description());
  if !opts.force {
    let (similarity, find_copies) = git::similarity_settings(ctx, Some(&branch), opts.similarity, opts.find_copies)?;
    git::print_stats(vcs, similarity, find_copies, &[merge_base.as_str(), branchref])?;
  }

  delete_stale_branches(vcs)?;

  let pushed = squash_and_push(
    cl,
    &mut progress,
    &merge_base,
    &mut commit_desc,
    &mut change_desc,
    opts.contributor.as_deref(),
  );
  let restored = vcs
    .run(&["checkout", "-q", &branch])
    .and_then(|_| vcs.run(&["branch", "-D", MERGE_BRANCH]));
  let pushed = match (pushed, restored) {
    (Ok(pushed), Ok(_)) => pushed,
    (Ok(_), Err(err)) => return Err(err),
    (Err(err), restored) => {
      if let Err(cleanup) = restored {
        warn!("Failed to clean up after landing: {cleanup:#}");
      }
      progress.abort(&format!("{err:#}"));
      let is_conflict = matches!(err.downcast_ref::<PushError>(), Some(PushError::MergeConflict { .. }));
      let is_push_failure = err.downcast_ref::<PushError>().is_some()
        || matches!(err.downcast_ref::<ClError>(), Some(ClError::FatalRemoteError(_)));
      if is_push_failure && !is_conflict {
        cl_core::print_error(&format!("{err:#}"));
        println!("Failed to push. If this persists, please file a bug.");
        return Ok(1);
      }
      return Err(err);
    }
  };

  let mut revision = pushed.revision.clone();
  let mut still_pending = pushed.pending_ref.is_some();
  let mut killed = false;
  if still_pending {
    progress.advance(LandState::PendingWait);
    let interrupted = interrupt_flag(ctx)?;
    match wait_for_real_commit(vcs, &pushed.remote, &revision, &base_branch, &pushed.branch, &interrupted) {
      Ok(real) => {
        revision = real;
        still_pending = false;
      }
      Err(err) if cl_core::error::is_user_abort(&err) => {
        println!("push succeeded, local wait interrupted");
        killed = true;
      }
      Err(err) => return Err(err),
    }
  }
  if !still_pending {
    progress.advance(LandState::Landed);
  }

  if let Some(issue) = issue {
    let to_pending = if still_pending { " to pending queue" } else { "" };
    if !still_pending {
      match settings.viewvc_url() {
        Some(viewvc) => change_desc.append_footer(&format!("Committed: {viewvc}{revision}")),
        None => change_desc.append_footer(&format!("Committed: {revision}")),
      }
    }
    println!("Closing issue...");
    cl.update_description(&change_desc.description(), opts.force)?;
    cl.close_issue()?;

    let patchsets = cl.backend().patchset_numbers(cl)?;
    let last = patchsets.last().copied().unwrap_or_default();
    let mut comment = format!(
      "Committed patchset #{} (id:{last}){to_pending} manually as {revision}",
      patchsets.len()
    );
    if opts.bypass_hooks {
      let closed = get_tree_status(ctx)? == TreeStatus::Closed;
      comment.push_str(if closed { " (tree was closed)." } else { "." });
    } else {
      comment.push_str(" (presubmit successful).");
    }
    cl.add_comment(&comment)?;
    info!("Closed issue {issue}");
    progress.advance(LandState::IssueClosed);
  }

  if still_pending && let Some(pending_ref) = &pushed.pending_ref {
    println!("The commit is in the pending queue ({pending_ref}).");
    println!(
      "It will show up on {} in ~1 min, once it gets a Cr-Commit-Position footer.",
      pushed.branch
    );
  }

  run_post_land_hook(vcs.root(), &[&merge_base])?;
  progress.advance(LandState::Done);
  Ok(i32::from(killed))
}
