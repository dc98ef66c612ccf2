//! # Gerrit Backend
//!
//! Changes on a Gerrit host. Uploads are `git push` to `refs/for/<branch>`,
//! by default of one synthetic squashed commit identified by its Change-Id
//! footer. Everything else goes through the REST API.

use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use anyhow::Result;
use cl_core::editor::ExternalEditor;
use cl_core::footers::{add_footer_change_id, get_footer_change_id};
use cl_core::git::{RunOptions, ensure_clean_tree, rev_parse, short_branch_name};
use cl_core::prompts::{ask, pause};
use cl_core::text::cleanup_list;
use cl_core::{BackendKind, ChangeDescription, ClError, ClStatus, ParsedIssueRef, Vcs, print_warning};
use cl_gerrit::auth::get_gerrit_credentials;
use cl_gerrit::consts::{CODE_REVIEW_LABEL, COMMIT_QUEUE_LABEL};
use cl_gerrit::{ChangeInfo, ChangeMessageInfo, GerritClient, GerritError, Notify};
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::{Backend, CqState, LandOptions, PatchOptions, ReviewMessage, UploadOptions};
use crate::changelist::{ChangeSnapshot, Changelist};
use crate::clients::create_gerrit_client;
use crate::consts::GERRIT_REMOTE;
use crate::git;
use crate::hooks::{HookKind, gerrit_commit_msg_hook_check, has_commit_msg_hook, install_commit_msg_hook, run_hook};

static PUSHED_CHANGE_URL: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^remote:\s+https?://[\w\-\./]*/(\d+)\s.*").expect("Failed to compile pushed change URL regex")
});

static TITLE_DISALLOWED: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[^\w ]").expect("Failed to compile patchset title regex"));

/// Key of the last squashed commit pushed for a branch.
pub const SQUASH_HASH_KEY: &str = "gerritsquashhash";

#[derive(Default)]
pub struct GerritBackend {
  server: Mutex<Option<String>>,
  client: Mutex<Option<Arc<GerritClient>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Review host for a git host: `-review` appended to the first label.
///
/// ```
/// use cl_cli::backend::gerrit::review_host_for_git_host;
///
/// assert_eq!(
///   review_host_for_git_host("chromium.googlesource.com"),
///   "chromium-review.googlesource.com"
/// );
/// ```
pub fn review_host_for_git_host(git_host: &str) -> String {
  match git_host.split_once('.') {
    Some((first, rest)) => format!("{first}-review.{rest}"),
    None => format!("{git_host}-review"),
  }
}

fn git_host(cl: &Changelist) -> Result<Option<String>> {
  let Some(remote_url) = cl.remote_url()? else {
    return Ok(None);
  };
  Ok(
    Url::parse(&remote_url)
      .ok()
      .and_then(|url| url.host_str().map(str::to_string)),
  )
}

/// Thread message with its vote direction read from the label summary
/// Gerrit writes into the text.
fn review_message(message: &ChangeMessageInfo) -> ReviewMessage {
  let sender = message
    .author
    .as_ref()
    .and_then(|author| author.email.clone().or_else(|| author.name.clone()))
    .unwrap_or_else(|| "Gerrit".to_string());
  ReviewMessage {
    date: message.date.clone(),
    sender,
    text: message.message.clone(),
    approval: message.message.contains(&format!("{CODE_REVIEW_LABEL}+")),
    disapproval: message.message.contains(&format!("{CODE_REVIEW_LABEL}-")),
  }
}

/// Review status derived from change details with labels.
pub fn status_from_change(change: &ChangeInfo) -> ClStatus {
  if change.is_closed() {
    return ClStatus::Closed;
  }

  if let Some(cq) = change.labels.get(COMMIT_QUEUE_LABEL) {
    let vote = cq.highest_vote();
    if cq.value_text(vote).is_some_and(|text| text.eq_ignore_ascii_case("commit")) {
      return ClStatus::Commit;
    }
  }

  if let Some(review) = change.labels.get(CODE_REVIEW_LABEL) {
    if review.rejected.is_some() {
      return ClStatus::NotLgtm;
    }
    if review.approved.is_some() {
      return ClStatus::Lgtm;
    }
  }

  if change.reviewers_in_state("REVIEWER").is_empty() {
    return ClStatus::Unsent;
  }

  if let Some(last) = change.messages.last() {
    let author = last.author.as_ref().and_then(|a| a.account_id);
    if author != change.owner.account_id {
      return ClStatus::Reply;
    }
  }
  ClStatus::Waiting
}

/// Outcome of reconciling a description with the change's Change-Id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeIdFix {
  /// The description carries exactly the expected Change-Id.
  Matches,
  /// The footer was missing and has been appended.
  Appended(String),
  /// Other Change-Ids are present; the corrected text needs user review.
  NeedsReview(String),
}

/// Make `message` carry exactly `change_id` as its Change-Id footer.
pub fn reconcile_change_id(message: &str, change_id: &str) -> ChangeIdFix {
  let found = get_footer_change_id(message);
  if found.len() == 1 && found[0] == change_id {
    ChangeIdFix::Matches
  } else if found.is_empty() {
    ChangeIdFix::Appended(add_footer_change_id(message, change_id))
  } else {
    ChangeIdFix::NeedsReview(format!("{message}\n\nChange-Id: {change_id}"))
  }
}

/// `I` followed by a commit hash of the index tree, HEAD, the current idents
/// and `message`, like Gerrit's commit-msg hook computes it.
pub fn generate_change_id(vcs: &dyn Vcs, message: &str) -> Result<String> {
  let mut lines = vec![format!("tree {}", vcs.run(&["write-tree"])?.trim())];
  if let Some(parent) = vcs.run_ok(&["rev-parse", "HEAD~0"])? {
    lines.push(format!("parent {}", parent.trim()));
  }
  lines.push(format!("author {}", vcs.run(&["var", "GIT_AUTHOR_IDENT"])?.trim()));
  lines.push(format!("committer {}", vcs.run(&["var", "GIT_COMMITTER_IDENT"])?.trim()));
  lines.push(String::new());
  lines.push(message.to_string());
  let hash = vcs.run_with_stdin(&["hash-object", "-t", "commit", "--stdin"], &lines.join("\n"))?;
  Ok(format!("I{}", hash.trim()))
}

/// Patchset title with characters Gerrit rejects removed. `None` when the
/// title is already clean.
pub fn clean_title(title: &str) -> Option<String> {
  TITLE_DISALLOWED
    .is_match(title)
    .then(|| TITLE_DISALLOWED.replace_all(title, "").into_owned())
}

/// Push options appended to `refs/for/<branch>` after `%`.
pub fn refspec_options(change_desc: &ChangeDescription, title: Option<&str>, opts: &UploadOptions) -> Result<Vec<String>> {
  let mut options = Vec::new();
  if !change_desc.get_reviewers(true).is_empty() {
    println!("Adding self-LGTM (Code-Review +1) because of TBRs");
    options.push(format!("l={CODE_REVIEW_LABEL}+1"));
  }
  if let Some(title) = title {
    options.push(format!("m={}", title.replace(' ', "_")));
  }
  let reviewers = change_desc.get_reviewers(false);
  if opts.send_mail {
    if reviewers.is_empty() {
      return Err(ClError::invalid_input("Must specify reviewers to send email.").into());
    }
    options.push("notify=ALL".to_string());
  } else {
    options.push("notify=NONE".to_string());
  }
  options.extend(reviewers.iter().map(|email| format!("r={}", email.trim())));
  if opts.private {
    options.push("draft".to_string());
  }
  if let Some(topic) = &opts.topic {
    options.push(format!("topic={topic}"));
  }
  Ok(options)
}

/// Change numbers announced by the server in `git push` output.
pub fn parse_pushed_change_numbers(output: &str) -> Vec<u64> {
  output
    .lines()
    .filter_map(|line| PUSHED_CHANGE_URL.captures(line.trim_end()))
    .filter_map(|caps| caps[1].parse().ok())
    .collect()
}

impl GerritBackend {
  fn set_server(&self, server: String) {
    *lock(&self.server) = Some(server);
    *lock(&self.client) = None;
  }

  fn client(&self, cl: &Changelist) -> Result<Arc<GerritClient>> {
    if let Some(client) = lock(&self.client).as_ref() {
      return Ok(Arc::clone(client));
    }
    let server = self.get_codereview_server(cl)?;
    let client = Arc::new(create_gerrit_client(cl.context(), &server)?);
    *lock(&self.client) = Some(Arc::clone(&client));
    Ok(client)
  }

  fn not_found(&self, cl: &Changelist, issue: u64, err: anyhow::Error) -> anyhow::Error {
    if err.downcast_ref::<GerritError>().is_some_and(GerritError::is_not_found) {
      return ClError::RemoteNotFound {
        issue,
        host: self.get_codereview_server(cl).unwrap_or_default(),
      }
      .into();
    }
    err
  }

  fn change_detail(&self, cl: &Changelist, options: &[&str]) -> Result<ChangeInfo> {
    let issue = cl.require_issue()?;
    let client = self.client(cl)?;
    cl.context()
      .block_on(client.get_change_detail(&issue.to_string(), options))?
      .map_err(|err| self.not_found(cl, issue, err))
  }

  /// Description for a squashed upload of an existing change, carrying the
  /// change's Change-Id.
  fn existing_change_message(&self, cl: &Changelist, issue: u64, opts: &UploadOptions) -> Result<String> {
    let mut message = cl.description(false)?;
    if message.is_empty() {
      return Err(
        ClError::fatal_remote(format!(
          "failed to fetch description from current Gerrit change {issue}\n{}",
          cl.issue_url()?.unwrap_or_default()
        ))
        .into(),
      );
    }
    let change_id = self.change_detail(cl, &[])?.change_id;
    loop {
      match reconcile_change_id(&message, &change_id) {
        ChangeIdFix::Matches => return Ok(message),
        ChangeIdFix::Appended(fixed) => {
          print_warning("appended missing Change-Id to change description");
          message = fixed;
        }
        ChangeIdFix::NeedsReview(fixed) => {
          print_warning(&format!(
            "change {issue} has Change-Id footer(s):\n  {}\nbut change has Change-Id {change_id}, according to Gerrit.\n\
             Please, check the proposed correction to the description, and edit it if necessary but keep the \
             \"Change-Id: {change_id}\" footer",
            get_footer_change_id(&message).join("\n  ")
          ));
          pause("Press enter to edit now, Ctrl+C to abort")?;
          message = fixed;
          if !opts.force {
            let settings = cl.context().settings();
            let mut change_desc = ChangeDescription::new(&message);
            let editor = ExternalEditor::resolve(settings.git_editor());
            change_desc.prompt(opts.bug.as_deref(), settings.bug_prefix(), &editor)?;
            message = change_desc.description();
            if message.is_empty() {
              return Err(ClError::precondition("Description is empty. Aborting...").into());
            }
          }
        }
      }
    }
  }

  /// Description for the first squashed upload, with a generated Change-Id
  /// unless the user wrote one.
  fn new_change_message(cl: &Changelist, opts: &UploadOptions, args: &[String]) -> Result<ChangeDescription> {
    let ctx = cl.context();
    let message = match &opts.message {
      Some(message) => message.clone(),
      None => {
        let log = git::create_description_from_log(ctx.vcs(), args)?;
        match &opts.title {
          Some(title) => format!("{title}\n\n{log}"),
          None => log,
        }
      }
    };
    let mut change_desc = ChangeDescription::new(&message);
    if !opts.force {
      let settings = ctx.settings();
      let editor = ExternalEditor::resolve(settings.git_editor());
      change_desc.prompt(opts.bug.as_deref(), settings.bug_prefix(), &editor)?;
    }
    if change_desc.is_empty() {
      return Err(ClError::precondition("Description is empty. Aborting...").into());
    }
    let message = change_desc.description();
    match get_footer_change_id(&message).len() {
      0 => {
        let change_id = generate_change_id(ctx.vcs(), &message)?;
        change_desc.set_description(&add_footer_change_id(&message, &change_id));
      }
      1 => {}
      _ => return Err(ClError::invariant("too many Change-Id footers, at most 1 allowed.").into()),
    }
    Ok(change_desc)
  }

  /// Parent of the squashed commit: the squashed upload of a local upstream,
  /// else the merge base with the remote upstream.
  fn squash_parent(cl: &Changelist) -> Result<String> {
    let ctx = cl.context();
    let vcs = ctx.vcs();
    let branch = cl.require_branch()?;
    let (remote, upstream) = git::fetch_upstream_tuple(ctx, branch)?;
    if remote != "." {
      return git::get_or_create_merge_base(ctx, branch, &cl.upstream_branch()?);
    }

    let upstream_name = short_branch_name(&upstream);
    let parent = ctx.store().get_str(upstream_name, SQUASH_HASH_KEY)?;
    let uploaded = match &parent {
      Some(parent) => {
        vcs.run_ok(&["rev-parse", &format!("{upstream}:")])? == vcs.run_ok(&["rev-parse", &format!("{parent}:")])?
      }
      None => false,
    };
    match parent {
      Some(parent) if uploaded => Ok(parent),
      _ => Err(
        ClError::precondition(format!(
          "\nUpload upstream branch {upstream_name} first.\n\
           It is likely that this branch has been rebased since its last upload, so you just need to upload it again.\n\
           (If you uploaded it with --no-squash, then branch dependencies are not supported, and you should reupload with --squash.)"
        ))
        .into(),
      ),
    }
  }

  /// Amend HEAD so an installed commit-msg hook adds a Change-Id.
  /// Download and install the server's commit-msg hook unless one is
  /// already in place, so an amend can add the Change-Id footer.
  fn ensure_commit_msg_hook(&self, cl: &Changelist) -> Result<()> {
    let root = cl.context().vcs().root();
    if has_commit_msg_hook(root) {
      return Ok(());
    }
    info!("No commit-msg hook in {}, downloading it", root.display());
    let client = self.client(cl)?;
    let script = cl
      .context()
      .block_on(client.download_commit_msg_hook())?
      .map_err(|err| {
        ClError::precondition(format!(
          "Failed to download hooks: {err:#}\n\
           You need to download from\n{}/tools/hooks/commit-msg\n\
           into .git/hooks/commit-msg and chmod +x .git/hooks/commit-msg",
          client.server_url()
        ))
      })?;
    install_commit_msg_hook(root, &script)?;
    Ok(())
  }

  fn add_change_id_by_amend(cl: &Changelist, opts: &UploadOptions, args: &[String]) -> Result<String> {
    let vcs = cl.context().vcs();
    let log_desc = match &opts.message {
      Some(message) => message.clone(),
      None => git::create_description_from_log(vcs, args)?,
    };
    vcs.run(&["commit", "--amend", "-m", &log_desc])?;
    let amended = git::create_description_from_log(vcs, args)?;
    if get_footer_change_id(&amended).is_empty() {
      return Err(ClError::precondition("ERROR: Gerrit commit-msg hook not installed.").into());
    }
    println!("git-cl: Added Change-Id to commit message.");
    Ok(amended)
  }
}

impl Backend for GerritBackend {
  fn kind(&self) -> BackendKind {
    BackendKind::Gerrit
  }

  fn get_codereview_server(&self, cl: &Changelist) -> Result<String> {
    if let Some(server) = lock(&self.server).clone() {
      return Ok(server);
    }
    let server = match cl.branch_config(BackendKind::Gerrit.server_key())? {
      Some(stored) => stored,
      None => {
        let host = git_host(cl)?.ok_or_else(|| {
          ClError::precondition("Unable to determine the Gerrit host from the remote URL of this branch.")
        })?;
        format!("https://{}", review_host_for_git_host(&host))
      }
    };
    *lock(&self.server) = Some(server.clone());
    Ok(server)
  }

  fn fetch_description(&self, cl: &Changelist, _force: bool) -> Result<String> {
    let issue = cl.require_issue()?;
    let client = self.client(cl)?;
    let commit = cl
      .context()
      .block_on(client.get_change_commit(&issue.to_string()))?
      .map_err(|err| self.not_found(cl, issue, err))?;
    Ok(commit.message.unwrap_or_default().trim().to_string())
  }

  fn get_most_recent_patchset(&self, cl: &Changelist) -> Result<Option<u64>> {
    let detail = self.change_detail(cl, &["CURRENT_REVISION"])?;
    Ok(detail.current_revision_info().map(|(_, rev)| rev.number))
  }

  fn ensure_authenticated(&self, cl: &Changelist, force: bool) -> Result<()> {
    let ctx = cl.context();
    if ctx.settings().gerrit_skip_ensure_authenticated() {
      return Ok(());
    }
    let client = self.client(cl)?;
    let gerrit_host = client.host().to_string();
    let git_host = git_host(cl).unwrap_or_else(|err| {
      debug!("No git host for the authentication check: {err:#}");
      None
    });

    let gerrit_auth = get_gerrit_credentials(ctx.home(), &gerrit_host)?;
    let git_auth = match &git_host {
      Some(host) => get_gerrit_credentials(ctx.home(), host)?,
      None => gerrit_auth.clone(),
    };
    let mut missing = Vec::new();
    if gerrit_auth.is_none() {
      missing.push(gerrit_host.clone());
    }
    if git_auth.is_none()
      && let Some(host) = &git_host
    {
      missing.push(host.clone());
    }
    if !missing.is_empty() {
      return Err(
        ClError::AuthRequired {
          host: missing.join("\n  "),
          hint: "These are read from ~/.netrc".to_string(),
        }
        .into(),
      );
    }

    if let (Some(gerrit), Some(git), Some(git_host)) = (&gerrit_auth, &git_auth, &git_host)
      && (gerrit.username != git.username || gerrit.password != git.password)
    {
      print_warning(&format!(
        "you have different credentials for Gerrit and git hosts.\n\
         Check your ~/.netrc for credentials of hosts:\n  {git_host}\n  {gerrit_host}"
      ));
      if !force {
        pause("If you know what you are doing, press Enter to continue, Ctrl+C to abort.")?;
      }
    }
    Ok(())
  }

  fn upload_change(&self, cl: &Changelist, opts: &UploadOptions, args: &[String], _change: &ChangeSnapshot) -> Result<i32> {
    if opts.squash && opts.no_squash {
      return Err(ClError::invalid_input("Can only use one of --squash or --no-squash").into());
    }
    let ctx = cl.context();
    let vcs = ctx.vcs();
    let squash = !opts.no_squash && (opts.squash || ctx.settings().squash_gerrit_uploads());

    let (remote, remote_branch) = cl.remote_branch()?;
    let branch = git::get_target_ref(&remote, &remote_branch, opts.target_branch.as_deref())
      .ok_or_else(|| ClError::precondition("Unable to determine the target branch of this change."))?;
    let mut title = opts.title.clone();

    let (mut change_desc, ref_to_push, parent, change_id) = if squash {
      gerrit_commit_msg_hook_check(vcs.root(), !opts.force)?;
      let change_desc = match cl.issue()? {
        Some(issue) => {
          let message = self.existing_change_message(cl, issue, opts)?;
          if title.is_none() {
            let default_title = vcs.run(&["show", "-s", "--format=%s", "HEAD"])?.trim().to_string();
            title = Some(if opts.force {
              default_title
            } else {
              let answer = ask("Title for patchset", Some(default_title.as_str()))?;
              if answer.is_empty() { default_title } else { answer }
            });
          }
          ChangeDescription::new(&message)
        }
        None => {
          title = Some("Initial upload".to_string());
          Self::new_change_message(cl, opts, args)?
        }
      };
      let change_id = get_footer_change_id(&change_desc.description())
        .into_iter()
        .next()
        .ok_or_else(|| ClError::invariant("Description has no Change-Id footer"))?;
      let parent = Self::squash_parent(cl)?;
      let tree = vcs.run(&["rev-parse", "HEAD:"])?.trim().to_string();
      let squashed = vcs
        .run(&["commit-tree", &tree, "-p", &parent, "-m", &change_desc.description()])?
        .trim()
        .to_string();
      (change_desc, squashed, parent, change_id)
    } else {
      let message = match &opts.message {
        Some(message) => message.clone(),
        None => git::create_description_from_log(vcs, args)?,
      };
      let mut change_desc = ChangeDescription::new(&message);
      if change_desc.is_empty() {
        return Err(ClError::precondition("Description is empty. Aborting...").into());
      }
      if get_footer_change_id(&change_desc.description()).is_empty() {
        self.ensure_commit_msg_hook(cl)?;
        change_desc.set_description(&Self::add_change_id_by_amend(cl, opts, args)?);
      }
      let change_id = get_footer_change_id(&change_desc.description())
        .into_iter()
        .next()
        .ok_or_else(|| ClError::invariant("Description has no Change-Id footer"))?;
      (change_desc, "HEAD".to_string(), remote_branch.clone(), change_id)
    };

    let commits = vcs.run(&["rev-list", &format!("{parent}..{ref_to_push}")])?;
    let count = commits.lines().filter(|l| !l.trim().is_empty()).count();
    if count > 1 {
      println!(
        "WARNING: This will upload {count} commits. Run the following command to see which commits will be uploaded: "
      );
      println!("git log {parent}..{ref_to_push}");
      println!("You can also use `git squash-branch` to squash these into a single commit.");
      if !opts.force {
        pause("About to upload; enter to confirm.")?;
      }
    }

    change_desc.update_reviewers(&opts.reviewers, &opts.extra_tbr);

    if let Some(raw) = title.as_deref()
      && let Some(cleaned) = clean_title(raw)
    {
      print_warning(&format!(
        "Patchset title may only contain alphanumeric chars and spaces. Cleaned up title:\n{cleaned}"
      ));
      if !opts.force {
        pause("Press enter to continue, Ctrl+C to abort")?;
      }
      title = Some(cleaned);
    }
    let options = refspec_options(&change_desc, title.as_deref(), opts)?;
    let suffix = if options.is_empty() {
      String::new()
    } else {
      format!("%{}", options.join(","))
    };
    if suffix.contains(' ') {
      return Err(ClError::invariant(format!("spaces not allowed in refspec: \"{suffix}\"")).into());
    }
    let refspec = format!("{ref_to_push}:refs/for/{branch}{suffix}");

    info!("Pushing {refspec} to {GERRIT_REMOTE}");
    let push = vcs.execute(&["push", GERRIT_REMOTE, &refspec], RunOptions::default())?;
    let output = push.combined();
    print!("{output}");
    if !push.success() {
      return Err(
        ClError::fatal_remote("Failed to create a change. Please examine output above for the reason of the failure.")
          .into(),
      );
    }

    let numbers = parse_pushed_change_numbers(&output);
    match numbers.as_slice() {
      [number] => {
        if cl.issue()? != Some(*number) {
          cl.set_issue(Some(*number))?;
        }
      }
      _ => {
        return Err(
          ClError::invariant(format!(
            "Created|Updated {} issues on Gerrit, but only 1 expected.\nChange-Id: {change_id}",
            numbers.len()
          ))
          .into(),
        );
      }
    }
    if squash {
      cl.set_branch_config(SQUASH_HASH_KEY, ref_to_push.as_str())?;
    }

    if let Some(issue) = cl.issue()? {
      match self.get_most_recent_patchset(cl) {
        Ok(patchset) => cl.set_patchset(patchset)?,
        Err(err) => warn!("Failed to look up the uploaded patchset: {err:#}"),
      }

      let default_cc = if opts.private {
        ctx.settings().cc_list_without_default()
      } else {
        ctx.settings().cc_list()
      };
      let mut cc: Vec<String> = default_cc.split(',').map(str::to_string).collect();
      cc.extend(opts.cc.iter().cloned());
      cc.extend(change_desc.get_cced());
      let cc = cleanup_list(&cc);
      if !cc.is_empty() {
        let client = self.client(cl)?;
        ctx.block_on(client.add_reviewers(&issue.to_string(), &cc, false, opts.send_mail))??;
      }
    }
    Ok(0)
  }

  fn update_description_remote(&self, cl: &Changelist, description: &str, force: bool) -> Result<()> {
    let issue = cl.require_issue()?.to_string();
    let ctx = cl.context();
    let client = self.client(cl)?;
    if ctx.block_on(client.has_pending_change_edit(&issue))?? {
      if !force {
        pause(
          "The description cannot be modified while the issue has a pending unpublished edit.  \
           Either publish the edit in the Gerrit web UI or delete it.\n\n\
           Press Enter to delete the unpublished edit, Ctrl+C to abort.",
        )?;
      }
      ctx.block_on(client.delete_pending_change_edit(&issue))??;
    }
    ctx.block_on(client.set_commit_message(&issue, description, Notify::None))?
  }

  fn set_cq_state(&self, cl: &Changelist, state: CqState) -> Result<()> {
    let issue = cl.require_issue()?.to_string();
    let (vote, notify) = match state {
      CqState::None => (0, None),
      CqState::DryRun => (1, Some(Notify::None)),
      CqState::Commit => (2, None),
    };
    let client = self.client(cl)?;
    cl.context()
      .block_on(client.set_review(&issue, None, &[(COMMIT_QUEUE_LABEL, vote)], notify))?
  }

  fn close_issue(&self, cl: &Changelist) -> Result<()> {
    let issue = cl.require_issue()?;
    let client = self.client(cl)?;
    cl.context()
      .block_on(client.abandon_change(&issue.to_string(), ""))?
      .map_err(|err| self.not_found(cl, issue, err))?;
    Ok(())
  }

  fn get_status(&self, cl: &Changelist) -> Result<ClStatus> {
    match self.change_detail(cl, &["DETAILED_LABELS", "CURRENT_REVISION"]) {
      Ok(detail) => Ok(status_from_change(&detail)),
      Err(err) => {
        debug!("Failed to fetch status of {}: {err:#}", cl.branch().unwrap_or_default());
        Ok(ClStatus::Error)
      }
    }
  }

  fn cannot_trigger_tryjob_reason(&self, cl: &Changelist) -> Result<Option<String>> {
    let issue = cl.require_issue()?;
    match self.change_detail(cl, &[]) {
      Ok(detail) if detail.is_closed() => Ok(Some(format!("CL {issue} is closed"))),
      Ok(_) => Ok(None),
      Err(err) if matches!(err.downcast_ref::<ClError>(), Some(ClError::RemoteNotFound { .. })) => {
        Ok(Some(format!("Gerrit doesn't know about your change {issue}")))
      }
      Err(err) => Err(err),
    }
  }

  fn get_tryjob_properties(&self, cl: &Changelist, patchset: Option<u64>) -> Result<Map<String, Value>> {
    let issue = cl.require_issue()?;
    let detail = self.change_detail(cl, &["ALL_REVISIONS"])?;
    let patchset = match patchset {
      Some(patchset) => patchset,
      None => cl
        .patchset()?
        .ok_or_else(|| ClError::invariant(format!("No patchset is known for change {issue}")))?,
    };
    let (_, revision) = detail
      .revision_by_number(patchset)
      .ok_or_else(|| ClError::invariant(format!("Patchset {patchset} is not known in Gerrit change {issue}")))?;
    let fetch = revision
      .fetch
      .get("http")
      .ok_or_else(|| ClError::invariant(format!("Patchset {patchset} of change {issue} has no http fetch info")))?;

    let mut properties = Map::new();
    properties.insert("patch_issue".into(), json!(issue));
    properties.insert("patch_set".into(), json!(patchset));
    properties.insert("patch_project".into(), json!(detail.project));
    properties.insert("patch_storage".into(), json!("gerrit"));
    properties.insert("patch_ref".into(), json!(fetch.git_ref));
    properties.insert("patch_repository_url".into(), json!(fetch.url));
    properties.insert("patch_gerrit_url".into(), json!(self.get_codereview_server(cl)?));
    Ok(properties)
  }

  fn patch_with_parsed_issue(&self, cl: &Changelist, issue: &ParsedIssueRef, opts: &PatchOptions) -> Result<i32> {
    if opts.reject || opts.nocommit || opts.directory.is_some() {
      return Err(ClError::invalid_input("--reject, --nocommit and --directory are not supported with Gerrit").into());
    }
    let ctx = cl.context();
    let vcs = ctx.vcs();
    ensure_clean_tree(vcs, "apply")?;
    cl.remember_issue(issue.issue);
    if let Some(host) = &issue.hostname {
      self.set_server(format!("https://{host}"));
    }

    let detail = self.change_detail(cl, &["ALL_REVISIONS"])?;
    let revision = match issue.patchset {
      Some(patchset) => detail.revision_by_number(patchset).map(|(_, rev)| rev).ok_or_else(|| {
        ClError::precondition(format!("Couldn't find patchset {patchset} in change {}", issue.issue))
      })?,
      None => detail
        .current_revision_info()
        .map(|(_, rev)| rev)
        .ok_or_else(|| ClError::invariant(format!("Change {} has no current revision", issue.issue)))?,
    };
    let fetch = revision
      .fetch
      .get("http")
      .ok_or_else(|| ClError::invariant(format!("Change {} has no http fetch info", issue.issue)))?;

    vcs.run(&["fetch", &fetch.url, &fetch.git_ref])?;
    vcs.run(&["cherry-pick", "FETCH_HEAD"])?;
    cl.set_issue(Some(issue.issue))?;
    cl.set_patchset(Some(revision.number))?;
    println!(
      "Committed patch for change {} patchset {} locally",
      issue.issue, revision.number
    );
    Ok(0)
  }

  fn add_comment(&self, cl: &Changelist, message: &str) -> Result<()> {
    let issue = cl.require_issue()?.to_string();
    let client = self.client(cl)?;
    cl.context().block_on(client.set_review(&issue, Some(message), &[], None))?
  }

  fn messages(&self, cl: &Changelist) -> Result<Vec<ReviewMessage>> {
    let detail = self.change_detail(cl, &["MESSAGES", "DETAILED_ACCOUNTS"])?;
    let mut messages: Vec<ReviewMessage> = detail.messages.iter().map(review_message).collect();
    messages.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(messages)
  }

  fn approving_reviewers(&self, cl: &Changelist) -> Result<Vec<String>> {
    if cl.issue()?.is_none() {
      return Ok(Vec::new());
    }
    let detail = self.change_detail(cl, &["DETAILED_LABELS"])?;
    let Some(label) = detail.labels.get(CODE_REVIEW_LABEL) else {
      return Ok(Vec::new());
    };
    let max = label
      .values
      .keys()
      .filter_map(|k| k.trim().trim_start_matches('+').parse::<i32>().ok())
      .max()
      .unwrap_or(1);
    let approvers: Vec<String> = label
      .all
      .iter()
      .filter(|vote| vote.value.is_some_and(|v| v >= max && v > 0))
      .filter_map(|vote| vote.email.clone())
      .collect();
    Ok(cleanup_list(&approvers))
  }

  fn issue_owner(&self, cl: &Changelist) -> Result<Option<String>> {
    if cl.issue()?.is_none() {
      return Ok(None);
    }
    Ok(self.change_detail(cl, &["DETAILED_ACCOUNTS"])?.owner.email)
  }

  fn patchset_numbers(&self, cl: &Changelist) -> Result<Vec<u64>> {
    let detail = self.change_detail(cl, &["ALL_REVISIONS"])?;
    let mut numbers: Vec<u64> = detail.revisions.values().map(|rev| rev.number).collect();
    numbers.sort_unstable();
    Ok(numbers)
  }

  fn land(&self, cl: &Changelist, opts: &LandOptions) -> Result<i32> {
    let ctx = cl.context();
    let vcs = ctx.vcs();
    ensure_clean_tree(vcs, "land")?;
    let issue = cl.require_issue()?;
    let detail = self.change_detail(cl, &["CURRENT_REVISION", "LABELS"])?;
    if detail.labels.contains_key(COMMIT_QUEUE_LABEL) && !opts.force {
      pause(
        "\nIt seems this repository has a Commit Queue, which can test and land changes for you. \
         Are you sure you wish to bypass it?\nPress Enter to continue, Ctrl+C to abort.",
      )?;
    }

    let last_upload = cl.branch_config(SQUASH_HASH_KEY)?;
    let differs = match &last_upload {
      Some(hash) if vcs.run(&["diff", hash])?.trim().is_empty() => {
        let same = detail.current_revision.as_deref() == Some(hash.as_str());
        if !same {
          print_warning("local branch contents differ from latest uploaded patchset");
        }
        !same
      }
      _ => {
        print_warning("some changes from local branch haven't been uploaded");
        true
      }
    };
    if differs {
      if !opts.force {
        pause("Do you want to submit latest Gerrit patchset and bypass hooks?\nPress Enter to continue, Ctrl+C to abort.")?;
      }
      print_warning("bypassing hooks and submitting latest uploaded patchset");
    } else if !opts.bypass_hooks {
      let branch = cl.require_branch()?;
      let merge_base = git::get_or_create_merge_base(ctx, branch, &cl.upstream_branch()?)?;
      run_hook(HookKind::PreLand, &cl.change_snapshot(&merge_base, None)?)?;
    }

    let client = self.client(cl)?;
    ctx
      .block_on(client.submit_change(&issue.to_string(), true))?
      .map_err(|err| self.not_found(cl, issue, err))?;
    println!("Issue {} has been submitted.", cl.issue_url()?.unwrap_or_default());
    let commit = ctx.block_on(client.get_change_commit(&issue.to_string()))??;
    if let Some(url) = commit.gitiles_url() {
      println!("Landed as {url}");
    }
    info!("Submitted change {issue} at {}", rev_parse(vcs, "HEAD")?);
    Ok(0)
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use cl_test_utils::git::{create_commit, set_upstream};
  use cl_test_utils::{GitRepoTestGuard, NetrcGuard};
  use tokio::runtime::Runtime;
  use wiremock::matchers::{body_partial_json, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  use super::*;
  use crate::context::ClContext;
  use crate::hooks::tests::write_hook;

  fn change(value: Value) -> ChangeInfo {
    serde_json::from_value(value).unwrap()
  }

  /// Mock server started on a throwaway runtime; the server itself runs on
  /// its own thread, so blocking backend calls can reach it.
  fn mock_gerrit(mocks: Vec<Mock>) -> (Runtime, MockServer) {
    let rt = Runtime::new().unwrap();
    let server = rt.block_on(MockServer::start());
    for mock in mocks {
      rt.block_on(mock.mount(&server));
    }
    (rt, server)
  }

  fn gerrit_changelist(guard: &GitRepoTestGuard, server: &MockServer, issue: Option<u64>) -> Changelist {
    let ctx = ClContext::for_repo(guard.path(), guard.path()).unwrap();
    ctx.store().set("main", "gerritserver", server.uri().as_str()).unwrap();
    if let Some(issue) = issue {
      ctx.store().set("main", "gerritissue", issue).unwrap();
    }
    Changelist::new(ctx, Some("refs/heads/main".into()), None, Some(BackendKind::Gerrit)).unwrap()
  }

  /// A repository on `main` tracking a bare `origin` whose pre-receive hook
  /// announces `announced` change numbers, one commit ahead of it.
  fn repo_with_announcing_origin(announced: &[u64], message: &str) -> GitRepoTestGuard {
    let mut guard = GitRepoTestGuard::with_initial_commit();
    let origin = guard.add_origin();
    set_upstream(&guard.repo, "main", "origin/main").unwrap();
    let announcements: String = announced
      .iter()
      .map(|n| format!("echo 'https://review.example.com/{n} Add feature'\n"))
      .collect();
    write_hook(&origin, "hooks/pre-receive", &format!("#!/bin/sh\ncat >/dev/null\n{announcements}"));
    create_commit(&guard.repo, "feature.txt", "feature\n", message).unwrap();
    guard
  }

  fn upload_args() -> Vec<String> {
    vec!["origin/main".to_string(), "HEAD".to_string()]
  }

  #[cfg(unix)]
  #[test]
  fn test_no_squash_push_must_name_one_change() -> Result<()> {
    let guard = repo_with_announcing_origin(&[101, 102], "Add feature");
    let (_rt, server) = mock_gerrit(Vec::new());
    let cl = gerrit_changelist(&guard, &server, None);
    let opts = UploadOptions {
      no_squash: true,
      force: true,
      message: Some("Add feature\n\nChange-Id: I0123456789abcdef0123456789abcdef01234567".to_string()),
      ..UploadOptions::default()
    };

    let err = cl
      .backend()
      .upload_change(&cl, &opts, &upload_args(), &ChangeSnapshot::default())
      .unwrap_err();
    assert!(matches!(err.downcast_ref::<ClError>(), Some(ClError::Invariant(_))));
    assert!(err.to_string().contains("Created|Updated 2 issues"));
    assert_eq!(cl.issue()?, None);
    Ok(())
  }

  #[cfg(unix)]
  #[test]
  fn test_no_squash_downloads_commit_msg_hook() -> Result<()> {
    let guard = repo_with_announcing_origin(&[101], "Add feature");
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/tools/hooks/commit-msg"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
          "#!/bin/sh\nprintf '\\nChange-Id: I0123456789abcdef0123456789abcdef01234567\\n' >> \"$1\"\n",
        ))
        .expect(1),
    ]);
    let cl = gerrit_changelist(&guard, &server, None);
    let opts = UploadOptions {
      no_squash: true,
      force: true,
      ..UploadOptions::default()
    };

    assert_eq!(cl.backend().upload_change(&cl, &opts, &upload_args(), &ChangeSnapshot::default())?, 0);
    assert!(has_commit_msg_hook(guard.path()));
    let message = cl.context().vcs().run(&["log", "-1", "--format=%B"])?;
    assert!(message.contains("Change-Id: I0123456789abcdef0123456789abcdef01234567"));
    assert_eq!(cl.issue()?, Some(101));
    Ok(())
  }

  #[cfg(unix)]
  #[test]
  fn test_no_squash_without_change_id_hook_fails() -> Result<()> {
    let guard = repo_with_announcing_origin(&[101], "Add feature");
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/tools/hooks/commit-msg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#!/bin/sh\nexit 0\n")),
    ]);
    let cl = gerrit_changelist(&guard, &server, None);
    let opts = UploadOptions {
      no_squash: true,
      force: true,
      ..UploadOptions::default()
    };

    let err = cl
      .backend()
      .upload_change(&cl, &opts, &upload_args(), &ChangeSnapshot::default())
      .unwrap_err();
    assert!(matches!(err.downcast_ref::<ClError>(), Some(ClError::Precondition(_))));
    assert!(err.to_string().contains("commit-msg hook not installed"));
    assert_eq!(cl.issue()?, None);
    Ok(())
  }

  #[test]
  fn test_status_heuristic() {
    let mut value = json!({
      "status": "NEW",
      "_number": 1,
      "owner": {"_account_id": 1},
      "labels": {},
      "reviewers": {},
      "messages": []
    });
    assert_eq!(status_from_change(&change(value.clone())), ClStatus::Unsent);

    value["reviewers"] = json!({"REVIEWER": [{"_account_id": 2}]});
    assert_eq!(status_from_change(&change(value.clone())), ClStatus::Waiting);

    value["messages"] = json!([{"author": {"_account_id": 1}}, {"author": {"_account_id": 2}}]);
    assert_eq!(status_from_change(&change(value.clone())), ClStatus::Reply);

    value["labels"] = json!({"Code-Review": {"approved": {"_account_id": 2}}});
    assert_eq!(status_from_change(&change(value.clone())), ClStatus::Lgtm);

    value["labels"] = json!({"Code-Review": {"approved": {"_account_id": 2}, "rejected": {"_account_id": 3}}});
    assert_eq!(status_from_change(&change(value.clone())), ClStatus::NotLgtm);

    value["labels"]["Commit-Queue"] = json!({
      "all": [{"_account_id": 1, "value": 2}],
      "values": {" 0": "No", "+1": "Dry run", "+2": "Commit"}
    });
    assert_eq!(status_from_change(&change(value.clone())), ClStatus::Commit);

    value["status"] = json!("MERGED");
    assert_eq!(status_from_change(&change(value)), ClStatus::Closed);
  }

  #[test]
  fn test_dry_run_vote_is_not_commit() {
    let detail = change(json!({
      "status": "NEW",
      "_number": 1,
      "owner": {"_account_id": 1},
      "labels": {"Commit-Queue": {
        "all": [{"_account_id": 1, "value": 1}],
        "values": {" 0": "No", "+1": "Dry run", "+2": "Commit"}
      }},
      "reviewers": {}
    }));
    assert_eq!(status_from_change(&detail), ClStatus::Unsent);
  }

  #[test]
  fn test_reconcile_change_id() {
    let good = "Fix the thing\n\nBug: 1\nChange-Id: I123";
    assert_eq!(reconcile_change_id(good, "I123"), ChangeIdFix::Matches);

    let ChangeIdFix::Appended(fixed) = reconcile_change_id("Fix the thing", "I123") else {
      panic!("expected the footer to be appended");
    };
    assert_eq!(get_footer_change_id(&fixed), vec!["I123".to_string()]);
    assert_eq!(reconcile_change_id(&fixed, "I123"), ChangeIdFix::Matches);

    let ChangeIdFix::NeedsReview(fixed) = reconcile_change_id("Fix\n\nChange-Id: Iold", "I123") else {
      panic!("expected a review of the corrected description");
    };
    assert_eq!(get_footer_change_id(&fixed), vec!["I123".to_string()]);
  }

  #[test]
  fn test_refspec_options() -> Result<()> {
    let desc = ChangeDescription::new("Fix\n\nR=a@example.com\nTBR=b@example.com");
    let opts = UploadOptions {
      private: true,
      topic: Some("speedup".into()),
      ..UploadOptions::default()
    };
    let options = refspec_options(&desc, Some("Second try"), &opts)?;
    assert_eq!(
      options,
      vec![
        "l=Code-Review+1",
        "m=Second_try",
        "notify=NONE",
        "r=a@example.com",
        "r=b@example.com",
        "draft",
        "topic=speedup",
      ]
    );

    let no_reviewers = ChangeDescription::new("Fix");
    let opts = UploadOptions {
      send_mail: true,
      ..UploadOptions::default()
    };
    assert!(refspec_options(&no_reviewers, None, &opts).is_err());
    Ok(())
  }

  #[test]
  fn test_clean_title() {
    assert_eq!(clean_title("Initial upload"), None);
    assert_eq!(clean_title("Fix: the (bad) thing!").as_deref(), Some("Fix the bad thing"));
  }

  #[test]
  fn test_parse_pushed_change_numbers() {
    let output = "remote: Processing changes: new: 1, done\n\
                  remote:\n\
                  remote: New Changes:\n\
                  remote:   https://chromium-review.googlesource.com/123456 Fix the thing\n\
                  remote:\n\
                  To https://chromium.googlesource.com/chromium/src\n";
    assert_eq!(parse_pushed_change_numbers(output), vec![123_456]);
    assert!(parse_pushed_change_numbers("Everything up-to-date\n").is_empty());
  }

  #[test]
  fn test_generate_change_id() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let vcs = cl_core::GitCli::new(guard.path());
    let id = generate_change_id(&vcs, "Fix the thing")?;
    assert!(id.starts_with('I'));
    assert_eq!(id.len(), 41);
    Ok(())
  }

  #[test]
  fn test_status_and_cq_over_rest() -> Result<()> {
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/changes/123/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
          ")]}'\n{\"status\":\"NEW\",\"_number\":123,\"owner\":{\"_account_id\":1},\
           \"labels\":{\"Code-Review\":{\"approved\":{\"_account_id\":2}}},\
           \"current_revision\":\"abc\",\"revisions\":{\"abc\":{\"_number\":3}}}",
        )),
      Mock::given(method("POST"))
        .and(path("/changes/123/revisions/current/review"))
        .and(body_partial_json(json!({"labels": {"Commit-Queue": 1}, "notify": "NONE"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{}"))
        .expect(1),
    ]);
    let guard = GitRepoTestGuard::with_initial_commit();
    let cl = gerrit_changelist(&guard, &server, Some(123));

    assert_eq!(cl.status()?, Some(ClStatus::Lgtm));
    assert_eq!(cl.most_recent_patchset()?, Some(3));
    cl.set_cq_state(CqState::DryRun)?;
    Ok(())
  }

  #[test]
  fn test_messages_carry_code_review_votes() -> Result<()> {
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/changes/42/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
          "status": "NEW",
          "_number": 42,
          "owner": {"_account_id": 1, "email": "owner@example.com"},
          "messages": [
            {"id": "b", "date": "2017-03-16 20:00:41.000000000", "message": "Patch Set 2: Code-Review+1",
             "author": {"_account_id": 2, "email": "reviewer@example.com"}},
            {"id": "a", "date": "2017-03-15 20:00:41.000000000", "message": "Uploaded patch set 1.",
             "author": {"_account_id": 1, "email": "owner@example.com"}},
            {"id": "c", "date": "2017-03-17 20:00:41.000000000", "message": "Patch Set 2: Code-Review-2"}
          ]
        }))),
    ]);
    let guard = GitRepoTestGuard::with_initial_commit();
    let cl = gerrit_changelist(&guard, &server, Some(42));

    let messages = cl.messages()?;
    let senders: Vec<&str> = messages.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(senders, ["owner@example.com", "reviewer@example.com", "Gerrit"]);
    assert!(!messages[0].approval && !messages[0].disapproval);
    assert!(messages[1].approval);
    assert!(messages[2].disapproval);
    Ok(())
  }

  #[test]
  fn test_update_description_deletes_pending_edit() -> Result<()> {
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/changes/7/edit"))
        .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{\"commit\":{}}")),
      Mock::given(method("DELETE"))
        .and(path("/changes/7/edit"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1),
      Mock::given(method("PUT"))
        .and(path("/changes/7/edit:message"))
        .and(body_partial_json(json!({"message": "New description"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1),
      Mock::given(method("POST"))
        .and(path("/changes/7/edit:publish"))
        .and(body_partial_json(json!({"notify": "NONE"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1),
    ]);
    let guard = GitRepoTestGuard::with_initial_commit();
    let cl = gerrit_changelist(&guard, &server, Some(7));
    cl.update_description("New description", true)?;
    assert_eq!(cl.description(false)?, "New description");
    Ok(())
  }

  #[test]
  fn test_missing_change_cannot_trigger_tryjobs() -> Result<()> {
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/changes/9/detail"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found: 9")),
    ]);
    let guard = GitRepoTestGuard::with_initial_commit();
    let cl = gerrit_changelist(&guard, &server, Some(9));
    assert_eq!(
      cl.cannot_trigger_tryjob_reason()?.as_deref(),
      Some("Gerrit doesn't know about your change 9")
    );
    assert_eq!(cl.status()?, Some(ClStatus::Error));
    Ok(())
  }

  #[test]
  fn test_tryjob_properties() -> Result<()> {
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/changes/5/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
          "status": "NEW",
          "_number": 5,
          "project": "chromium/src",
          "current_revision": "bbb",
          "revisions": {
            "aaa": {"_number": 1, "fetch": {"http": {"url": "https://host/src", "ref": "refs/changes/05/5/1"}}},
            "bbb": {"_number": 2, "fetch": {"http": {"url": "https://host/src", "ref": "refs/changes/05/5/2"}}}
          }
        }))),
    ]);
    let guard = GitRepoTestGuard::with_initial_commit();
    let cl = gerrit_changelist(&guard, &server, Some(5));
    cl.set_patchset(Some(2))?;

    let props = cl.tryjob_properties(None)?;
    assert_eq!(props["patch_issue"], json!(5));
    assert_eq!(props["patch_set"], json!(2));
    assert_eq!(props["patch_project"], json!("chromium/src"));
    assert_eq!(props["patch_storage"], json!("gerrit"));
    assert_eq!(props["patch_ref"], json!("refs/changes/05/5/2"));
    assert_eq!(props["patch_gerrit_url"], json!(server.uri()));
    assert!(cl.tryjob_properties(Some(7)).is_err());
    Ok(())
  }

  #[test]
  fn test_patch_cherry_picks_fetched_revision() -> Result<()> {
    let mut guard = GitRepoTestGuard::with_initial_commit();
    let origin = guard.add_origin();
    let vcs = cl_core::GitCli::new(guard.path());
    vcs.run(&["checkout", "-q", "-b", "change"])?;
    fs::write(guard.path().join("patched.txt"), "from review\n")?;
    vcs.run(&["add", "patched.txt"])?;
    vcs.run(&["commit", "-q", "-m", "Change under review"])?;
    vcs.run(&["push", "-q", "origin", "HEAD:refs/changes/23/123/4"])?;
    vcs.run(&["checkout", "-q", "main"])?;
    vcs.run(&["branch", "-q", "-D", "change"])?;

    let origin_url = origin.to_string_lossy().to_string();
    let (_rt, server) = mock_gerrit(vec![
      Mock::given(method("GET"))
        .and(path("/changes/123/detail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
          "status": "NEW",
          "_number": 123,
          "current_revision": "abc",
          "revisions": {"abc": {"_number": 4, "fetch": {"http": {"url": origin_url, "ref": "refs/changes/23/123/4"}}}}
        }))),
    ]);
    let cl = gerrit_changelist(&guard, &server, None);

    assert_eq!(cl.patch_issue("123", &PatchOptions::default())?, 0);
    assert!(guard.path().join("patched.txt").exists());
    assert_eq!(cl.issue()?, Some(123));
    assert_eq!(cl.patchset()?, Some(4));
    assert_eq!(cl.context().store().get_int("main", "gerritissue")?, Some(123));

    let unsupported = PatchOptions {
      nocommit: true,
      ..PatchOptions::default()
    };
    assert!(cl.patch_issue("123", &unsupported).is_err());
    Ok(())
  }

  #[test]
  fn test_ensure_authenticated_reports_missing_hosts() -> Result<()> {
    let (_rt, server) = mock_gerrit(Vec::new());
    let guard = GitRepoTestGuard::with_initial_commit();
    let netrc = NetrcGuard::new("");
    let ctx = ClContext::for_repo(guard.path(), netrc.home_dir())?;
    ctx.store().set("main", "gerritserver", server.uri().as_str())?;
    let cl = Changelist::new(ctx, Some("refs/heads/main".into()), None, Some(BackendKind::Gerrit))?;

    let err = cl.ensure_authenticated(true).unwrap_err();
    assert!(matches!(
      err.downcast_ref::<ClError>(),
      Some(ClError::AuthRequired { host, .. }) if host.starts_with("127.0.0.1:")
    ));
    Ok(())
  }
}
