//! # Branch and Upstream Helpers
//!
//! Git plumbing the changelist commands share: finding the upstream of a
//! branch, the remote ref a change lands on, cached merge bases, diff
//! statistics and descriptions built from the commit log.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use cl_core::consts::REFS_THAT_ALIAS_TO_OTHER_REFS;
use cl_core::git::short_branch_name;
use cl_core::{ClError, Vcs};
use regex::Regex;
use tracing::{debug, warn};

use crate::context::ClContext;

static BRANCH_HEADS_PREFIX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^((refs/)?remotes/)?branch-heads/").expect("Failed to compile branch-heads regex"));
static HEADS_PREFIX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(refs/)?heads/").expect("Failed to compile heads regex"));

/// Config value `branch.<branch>.<key>`.
pub fn branch_config(ctx: &ClContext, branch: &str, key: &str) -> Result<Option<String>> {
  ctx.store().get_str(branch, key)
}

/// `(remote, upstream ref)` for `branch`, e.g. `("origin", "refs/heads/main")`.
/// A local upstream is reported with remote `"."`.
pub fn fetch_upstream_tuple(ctx: &ClContext, branch: &str) -> Result<(String, String)> {
  if let Some(merge) = branch_config(ctx, branch, "merge")? {
    let remote = branch_config(ctx, branch, "remote")?.unwrap_or_else(|| ".".to_string());
    return Ok((remote, merge));
  }

  let vcs = ctx.vcs();
  if let Some(upstream) = cl_core::git::config_get(vcs, "rietveld.upstream-branch")? {
    let remote = vcs.run(&["config", "rietveld.upstream-remote"])?.trim().to_string();
    return Ok((remote, upstream));
  }

  let remote_branches = vcs.run(&["branch", "-r"])?;
  for default in ["master", "main"] {
    let wanted = format!("origin/{default}");
    if remote_branches.split_whitespace().any(|b| b == wanted) {
      debug!("Falling back to origin/{default} as upstream of {branch}");
      return Ok(("origin".to_string(), format!("refs/heads/{default}")));
    }
  }

  Err(
    ClError::precondition(
      "Unable to determine default branch to diff against.\n\
       Either pass complete \"git diff\"-style arguments, like\n  \
       git cl upload origin/master\n\
       or verify this branch is set up to track another \n\
       (via the --track argument to \"git checkout -b ...\").",
    )
    .into(),
  )
}

/// The upstream of `branch` as a local ref name: remote branches are mapped
/// into `refs/remotes/<remote>/`.
pub fn upstream_branch(ctx: &ClContext, branch: &str) -> Result<String> {
  let (remote, upstream) = fetch_upstream_tuple(ctx, branch)?;
  if remote == "." {
    return Ok(upstream);
  }
  Ok(
    upstream
      .replace("refs/heads/", &format!("refs/remotes/{remote}/"))
      .replace("refs/branch-heads/", "refs/remotes/branch-heads/"),
  )
}

/// `(remote, remote tracking ref)` a branch ultimately tracks, following
/// chains of local upstreams.
pub fn remote_branch(ctx: &ClContext, branch: &str) -> Result<(String, String)> {
  let mut seen = Vec::new();
  let mut current = branch.to_string();
  let mut found = None;
  while !seen.contains(&current) {
    seen.push(current.clone());
    let (remote, upstream) = fetch_upstream_tuple(ctx, &current)?;
    let upstream = short_branch_name(&upstream).to_string();
    if remote != "." || upstream.starts_with("refs/remotes") {
      found = Some((remote, upstream));
      break;
    }
    current = upstream;
  }

  let (remote, upstream) = match found {
    Some(found) => found,
    None => (
      guess_remote(ctx.vcs())?,
      ctx.settings().remote_branch_override().unwrap_or("HEAD").to_string(),
    ),
  };

  Ok(if upstream.starts_with("refs/remotes") {
    (remote, upstream)
  } else if upstream.starts_with("refs/branch-heads/") {
    let mapped = upstream.replacen("refs/", "refs/remotes/", 1);
    (remote, mapped)
  } else {
    let mapped = format!("refs/remotes/{remote}/{upstream}");
    (remote, mapped)
  })
}

fn guess_remote(vcs: &dyn Vcs) -> Result<String> {
  let remotes: Vec<String> = vcs
    .run_ok(&["remote"])?
    .unwrap_or_default()
    .split_whitespace()
    .map(str::to_string)
    .collect();
  if let [only] = remotes.as_slice() {
    return Ok(only.clone());
  }
  if remotes.iter().any(|r| r == "origin") {
    warn!("Could not determine which remote this change is associated with, so defaulting to \"origin\".");
  } else {
    warn!("Could not determine which remote this change is associated with.");
  }
  Ok("origin".to_string())
}

/// `remote.<remote>.url`. A URL naming a local directory is treated as a git
/// cache and resolved to the cache's own remote URL.
pub fn remote_url(ctx: &ClContext, remote: &str) -> Result<Option<String>> {
  let key = format!("remote.{remote}.url");
  let Some(url) = cl_core::git::config_get(ctx.vcs(), &key)? else {
    return Ok(None);
  };
  let path = Path::new(&url);
  if path.join("config").is_file() || path.join(".git").is_dir() {
    let cache = cl_core::GitCli::new(path);
    if let Some(inner) = cl_core::git::config_get(&cache, &key)? {
      debug!("Remote {remote} is a git cache at {url}, using {inner}");
      return Ok(Some(inner));
    }
  }
  Ok(Some(url))
}

/// Whether `rev` names an existing commit or branch.
pub fn branch_exists(vcs: &dyn Vcs, rev: &str) -> Result<bool> {
  Ok(vcs.run_ok(&["rev-parse", "--verify", "--quiet", rev])?.is_some())
}

/// Merge base of `branch` and `upstream`, cached in `branch.<branch>.base`
/// while it stays an ancestor of the branch.
pub fn get_or_create_merge_base(ctx: &ClContext, branch: &str, upstream: &str) -> Result<String> {
  let vcs = ctx.vcs();
  if let Some(base) = branch_config(ctx, branch, "base")? {
    let is_ancestor = vcs.run_ok(&["merge-base", "--is-ancestor", &base, branch])?.is_some();
    if is_ancestor {
      debug!("Using cached merge base {base} for {branch}");
      return Ok(base);
    }
    debug!("Cached merge base {base} of {branch} is stale");
  }
  let base = cl_core::git::merge_base(vcs, branch, upstream)?;
  ctx.store().set(branch, "base", base.as_str())?;
  Ok(base)
}

/// The ref a change uploaded from `remote_branch` lands on, honoring a user
/// supplied `target_branch`.
///
/// ```
/// use cl_cli::git::get_target_ref;
///
/// assert_eq!(
///   get_target_ref("origin", "refs/remotes/origin/main", None).as_deref(),
///   Some("refs/heads/main")
/// );
/// assert_eq!(
///   get_target_ref("origin", "refs/remotes/origin/main", Some("release")).as_deref(),
///   Some("refs/heads/release")
/// );
/// ```
pub fn get_target_ref(remote: &str, remote_branch: &str, target_branch: Option<&str>) -> Option<String> {
  if remote.is_empty() || remote_branch.is_empty() {
    return None;
  }

  let mut target = remote_branch.to_string();
  match target_branch {
    Some(t) if !t.contains('/') => target = format!("refs/remotes/{remote}/{t}"),
    Some(t) => {
      let remote_prefix = Regex::new(&format!(r"^((refs/)?remotes/)?{}/", regex::escape(remote))).ok();
      let remote_replacement = format!("refs/remotes/{remote}/");
      target = if BRANCH_HEADS_PREFIX.is_match(t) {
        BRANCH_HEADS_PREFIX.replacen(t, 1, "refs/remotes/branch-heads/").into_owned()
      } else if let Some(re) = remote_prefix.as_ref().filter(|re| re.is_match(t)) {
        re.replacen(t, 1, remote_replacement.as_str()).into_owned()
      } else if HEADS_PREFIX.is_match(t) {
        HEADS_PREFIX.replacen(t, 1, remote_replacement.as_str()).into_owned()
      } else {
        t.to_string()
      };
    }
    None => {
      if let Some((_, alias)) = REFS_THAT_ALIAS_TO_OTHER_REFS.iter().find(|(from, _)| *from == target) {
        target = (*alias).to_string();
      }
    }
  }

  let remote_prefix = format!("refs/remotes/{remote}/");
  if let Some(rest) = target.strip_prefix(&remote_prefix) {
    if rest.starts_with("refs/") {
      return Some(rest.to_string());
    }
    return Some(format!("refs/heads/{rest}"));
  }
  if target.starts_with("refs/remotes/branch-heads") {
    return Some(target.replacen("refs/remotes/", "refs/", 1));
  }
  Some(target)
}

/// Commit log text used to prefill a description. A single revision `r`
/// means `r..`, `r...` means `r..`, two revisions mean `a..b`.
pub fn create_description_from_log(vcs: &dyn Vcs, args: &[String]) -> Result<String> {
  let log_args: Vec<String> = match args {
    [one] if !one.ends_with('.') => vec![format!("{one}..")],
    [one] if one.ends_with("...") => vec![one[..one.len() - 1].to_string()],
    [from, to] => vec![format!("{from}..{to}")],
    other => other.to_vec(),
  };
  let mut cmd = vec!["log", "--pretty=format:%s\n\n%b"];
  cmd.extend(log_args.iter().map(String::as_str));
  vcs.run(&cmd)
}

/// `git diff --stat` between `args`, with rename or copy detection at
/// `similarity` percent.
pub fn diff_stat(vcs: &dyn Vcs, similarity: u8, find_copies: bool, args: &[&str]) -> Result<String> {
  let similarity_opts = if find_copies {
    vec!["-l100000".to_string(), format!("-C{similarity}")]
  } else {
    vec![format!("-M{similarity}")]
  };
  let mut cmd = vec!["diff", "--no-ext-diff", "--stat"];
  cmd.extend(similarity_opts.iter().map(String::as_str));
  cmd.extend_from_slice(args);
  vcs.run(&cmd)
}

/// Print the diff statistics between `args`.
pub fn print_stats(vcs: &dyn Vcs, similarity: u8, find_copies: bool, args: &[&str]) -> Result<()> {
  let stat = diff_stat(vcs, similarity, find_copies, args)?;
  print!("{stat}");
  Ok(())
}

/// Files changed relative to `upstream`, as `(status, path)` pairs.
pub fn changed_files(vcs: &dyn Vcs, upstream: &str) -> Result<Vec<(String, String)>> {
  let output = vcs.run(&["diff", "--name-status", "--no-renames", "--ignore-submodules=all", upstream])?;
  Ok(
    output
      .lines()
      .filter_map(|line| line.split_once('\t'))
      .map(|(status, path)| (status.trim().to_string(), path.to_string()))
      .collect(),
  )
}

/// Local branch names with the short name of their upstream, for building
/// the tree of dependent branches.
pub fn branches_with_upstreams(vcs: &dyn Vcs) -> Result<Vec<(String, Option<String>)>> {
  let output = vcs.run(&["for-each-ref", "--format=%(refname:short) %(upstream:short)", "refs/heads"])?;
  Ok(
    output
      .lines()
      .filter_map(|line| {
        let mut tokens = line.split_whitespace();
        let branch = tokens.next()?.to_string();
        Some((branch, tokens.next().map(str::to_string)))
      })
      .collect(),
  )
}

/// Full refs of every local branch.
pub fn local_branch_refs(vcs: &dyn Vcs) -> Result<Vec<String>> {
  Ok(
    vcs
      .run(&["for-each-ref", "--format=%(refname)", "refs/heads"])?
      .lines()
      .map(str::to_string)
      .collect(),
  )
}

/// Rename/copy detection settings for `branch`. Explicit values are saved
/// in the branch config; missing ones are read from it.
pub fn similarity_settings(
  ctx: &ClContext,
  branch: Option<&str>,
  similarity: Option<u8>,
  find_copies: Option<bool>,
) -> Result<(u8, bool)> {
  let store = ctx.store();
  let similarity = match (similarity, branch) {
    (Some(value), Some(branch)) => {
      println!("Note: Saving similarity of {value}% in git config.");
      store.set(branch, "git-cl-similarity", i64::from(value))?;
      value
    }
    (Some(value), None) => value,
    (None, Some(branch)) => store
      .get_int(branch, "git-cl-similarity")?
      .and_then(|v| u8::try_from(v.clamp(0, 100)).ok())
      .unwrap_or(crate::consts::DEFAULT_SIMILARITY),
    (None, None) => crate::consts::DEFAULT_SIMILARITY,
  };
  let find_copies = match (find_copies, branch) {
    (Some(value), Some(branch)) => {
      store.set(branch, "git-find-copies", value)?;
      value
    }
    (Some(value), None) => value,
    (None, Some(branch)) => store.get_bool(branch, "git-find-copies")?.unwrap_or(true),
    (None, None) => true,
  };
  let similarity = similarity.min(100);
  println!("Using {similarity}% similarity for rename/copy detection. Override with --similarity.");
  Ok((similarity, find_copies))
}

/// Replace the message of HEAD, forcing the committer date to `timestamp`.
pub fn amend_head(vcs: &dyn Vcs, message: &str, timestamp: i64) -> Result<()> {
  let date = format!("{timestamp} +0000");
  vcs.run_with_env(&["commit", "--amend", "-m", message], &[("GIT_COMMITTER_DATE", &date)])?;
  Ok(())
}

/// Contributor strings must look like `First Last <email@example.com>`.
pub fn validate_contributor(contributor: &str) -> Result<&str> {
  static CONTRIBUTOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*\s<(\S+@\S+)>$").expect("Failed to compile contributor regex"));
  match CONTRIBUTOR.captures(contributor).and_then(|c| c.get(1)) {
    Some(email) => Ok(email.as_str()),
    None => bail!(ClError::invalid_input(
      "Please provide contibutor as 'First Last <email@example.com>'"
    )),
  }
}

#[cfg(test)]
mod tests {
  use cl_test_utils::{GitRepoTestGuard, create_branch, create_commit, set_upstream};

  use super::*;

  fn context(guard: &GitRepoTestGuard) -> std::sync::Arc<ClContext> {
    ClContext::for_repo(guard.path(), guard.path()).unwrap()
  }

  #[test]
  fn test_get_target_ref_canonicalizes_targets() {
    let target = |t| get_target_ref("origin", "refs/remotes/origin/master", t);
    assert_eq!(target(None).as_deref(), Some("refs/heads/master"));
    assert_eq!(target(Some("branch-heads/123")).as_deref(), Some("refs/branch-heads/123"));
    assert_eq!(target(Some("remotes/origin/x")).as_deref(), Some("refs/heads/x"));
    assert_eq!(target(Some("refs/heads/y")).as_deref(), Some("refs/heads/y"));
    assert_eq!(target(Some("origin/refs/diff/test")).as_deref(), Some("refs/diff/test"));
    assert_eq!(target(Some("refs/foo/bar")).as_deref(), Some("refs/foo/bar"));
    assert_eq!(get_target_ref("", "refs/remotes/origin/master", None), None);
  }

  #[test]
  fn test_get_target_ref_follows_aliases() {
    assert_eq!(
      get_target_ref("origin", "refs/remotes/origin/lkgr", None).as_deref(),
      Some("refs/heads/master")
    );
  }

  #[test]
  fn test_fetch_upstream_tuple_from_branch_config() -> Result<()> {
    let mut guard = GitRepoTestGuard::with_initial_commit();
    guard.add_origin();
    create_branch(&guard.repo, "feature", None)?;
    set_upstream(&guard.repo, "feature", "origin/main")?;
    let ctx = context(&guard);

    assert_eq!(
      fetch_upstream_tuple(&ctx, "feature")?,
      ("origin".to_string(), "refs/heads/main".to_string())
    );
    assert_eq!(upstream_branch(&ctx, "feature")?, "refs/remotes/origin/main");
    assert_eq!(
      remote_branch(&ctx, "feature")?,
      ("origin".to_string(), "refs/remotes/origin/main".to_string())
    );
    Ok(())
  }

  #[test]
  fn test_fetch_upstream_tuple_guesses_origin() -> Result<()> {
    let mut guard = GitRepoTestGuard::with_initial_commit();
    guard.add_origin();
    create_branch(&guard.repo, "untracked", None)?;
    let ctx = context(&guard);
    assert_eq!(
      fetch_upstream_tuple(&ctx, "untracked")?,
      ("origin".to_string(), "refs/heads/main".to_string())
    );
    Ok(())
  }

  #[test]
  fn test_fetch_upstream_tuple_without_any_upstream() {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = context(&guard);
    let err = fetch_upstream_tuple(&ctx, "main").unwrap_err();
    assert!(err.to_string().contains("Unable to determine default branch"));
  }

  #[test]
  fn test_remote_branch_follows_local_chain() -> Result<()> {
    let mut guard = GitRepoTestGuard::with_initial_commit();
    guard.add_origin();
    create_branch(&guard.repo, "parent", None)?;
    set_upstream(&guard.repo, "parent", "origin/main")?;
    create_branch(&guard.repo, "child", None)?;
    set_upstream(&guard.repo, "child", "parent")?;
    let ctx = context(&guard);

    assert_eq!(upstream_branch(&ctx, "child")?, "refs/heads/parent");
    assert_eq!(
      remote_branch(&ctx, "child")?,
      ("origin".to_string(), "refs/remotes/origin/main".to_string())
    );
    Ok(())
  }

  #[test]
  fn test_merge_base_is_cached() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let base = guard.repo.head()?.peel_to_commit()?.id().to_string();
    create_branch(&guard.repo, "feature", None)?;
    let ctx = context(&guard);

    assert_eq!(get_or_create_merge_base(&ctx, "feature", "main")?, base);
    assert_eq!(ctx.store().get_str("feature", "base")?.as_deref(), Some(base.as_str()));
    Ok(())
  }

  #[test]
  fn test_description_from_log() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let base = guard.repo.head()?.peel_to_commit()?.id().to_string();
    create_commit(&guard.repo, "a.txt", "a", "Add a\n\nBody of a")?;
    let ctx = context(&guard);

    let log = create_description_from_log(ctx.vcs(), &[base])?;
    assert!(log.starts_with("Add a\n\nBody of a"));
    Ok(())
  }

  #[test]
  fn test_amend_head_sets_committer_date() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = context(&guard);
    amend_head(ctx.vcs(), "Reworded\n\nBody", 1_700_000_000)?;
    assert_eq!(cl_core::git::commit_timestamp(ctx.vcs(), "HEAD")?, 1_700_000_000);
    assert_eq!(ctx.vcs().run(&["log", "-1", "--format=%s"])?.trim(), "Reworded");
    Ok(())
  }

  #[test]
  fn test_similarity_settings_are_saved_per_branch() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    let ctx = context(&guard);
    assert_eq!(similarity_settings(&ctx, Some("feature"), None, None)?, (50, true));
    assert_eq!(similarity_settings(&ctx, Some("feature"), Some(80), Some(false))?, (80, false));
    assert_eq!(similarity_settings(&ctx, Some("feature"), None, None)?, (80, false));
    assert_eq!(similarity_settings(&ctx, Some("other"), None, None)?, (50, true));
    Ok(())
  }

  #[test]
  fn test_validate_contributor() {
    assert_eq!(validate_contributor("Jane Doe <jane@example.com>").unwrap(), "jane@example.com");
    assert!(validate_contributor("jane@example.com").is_err());
  }

  #[test]
  fn test_changed_files_and_branch_listing() -> Result<()> {
    let guard = GitRepoTestGuard::with_initial_commit();
    create_branch(&guard.repo, "feature", None)?;
    set_upstream(&guard.repo, "feature", "main")?;
    create_commit(&guard.repo, "new.txt", "n", "Add new")?;
    let ctx = context(&guard);

    let files = changed_files(ctx.vcs(), "HEAD~1")?;
    assert_eq!(files, vec![("A".to_string(), "new.txt".to_string())]);
    let branches = branches_with_upstreams(ctx.vcs())?;
    assert!(branches.contains(&("feature".to_string(), Some("main".to_string()))));
    assert_eq!(local_branch_refs(ctx.vcs())?, vec!["refs/heads/feature", "refs/heads/main"]);
    Ok(())
  }
}
