//! # Upload Protocol
//!
//! The steps every upload shares regardless of backend: a clean tree, a
//! diff base, authentication, pre-upload hooks and diff statistics before the
//! backend uploads; commit-queue votes, the post-upload hook and
//! `--dependencies` after it.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use cl_core::git::{ensure_clean_tree, rev_parse};
use cl_core::prompts::pause;
use cl_core::{BackendKind, ChangeDescription, ClError, print_success, print_warning};
use tracing::{debug, info};

use crate::backend::{CqState, UploadOptions};
use crate::changelist::Changelist;
use crate::consts::DEPENDENCY_PATCHSET_TITLE;
use crate::git;
use crate::hooks::{HookKind, run_hook, run_post_upload_hook};
use crate::owners::{OwnersService, ScriptOwners};

/// Upload the changelist's branch. `diff_args` are an explicit diff base;
/// without them the merge base with the upstream is used. Returns the exit
/// code.
pub fn upload(cl: &Changelist, opts: &UploadOptions, diff_args: &[String]) -> Result<i32> {
  let ctx = cl.context();
  let vcs = ctx.vcs();
  ensure_clean_tree(vcs, "upload")?;

  let (base, args) = match diff_args.first() {
    Some(base) => (base.clone(), diff_args.to_vec()),
    None => {
      let branch = cl
        .branch()
        .ok_or_else(|| ClError::precondition("Can't upload from detached HEAD state. Get on a branch!"))?;
      let base = git::get_or_create_merge_base(ctx, branch, &cl.upstream_branch()?)?;
      (base.clone(), vec![base, "HEAD".to_string()])
    }
  };
  debug!("Uploading against {base}");

  cl.ensure_authenticated(opts.force)?;

  let mut opts = opts.clone();
  let mut change = cl.change_snapshot(&base, None)?;
  if opts.tbr_owners {
    let owners = ScriptOwners::for_root(vcs.root());
    opts.extra_tbr = owners.reviewers_for_uncovered(&change, &opts.reviewers)?;
    debug!("Owners added as TBR: {:?}", opts.extra_tbr);
  }
  if !opts.bypass_hooks {
    let mut desc = ChangeDescription::new(&change.description);
    desc.update_reviewers(&opts.reviewers, &opts.extra_tbr);
    change.description = desc.description();
    let result = run_hook(HookKind::PreUpload, &change)?;
    if opts.reviewers.is_empty() && !result.reviewers.is_empty() {
      info!("Pre-upload hook suggested reviewers: {}", result.reviewers.join(","));
      opts.reviewers = result.reviewers;
    }
  }

  if cl.backend().warns_on_patchset_mismatch() && cl.issue()?.is_some() {
    warn_on_patchset_mismatch(cl, opts.force)?;
  }

  let (similarity, find_copies) = git::similarity_settings(ctx, cl.branch(), opts.similarity, opts.find_copies)?;
  opts.similarity = Some(similarity);
  opts.find_copies = Some(find_copies);
  let stat_args: Vec<&str> = args.iter().map(String::as_str).collect();
  git::print_stats(vcs, similarity, find_copies, &stat_args)?;

  let ret = cl.backend().upload_change(cl, &opts, &args, &change)?;
  if ret != 0 {
    return Ok(ret);
  }

  if opts.use_commit_queue {
    cl.set_cq_state(CqState::Commit)?;
  } else if opts.cq_dry_run {
    cl.set_cq_state(CqState::DryRun)?;
  }

  cl.set_branch_config("last-upload-hash", rev_parse(vcs, "HEAD")?.as_str())?;
  if let Some(issue) = cl.issue()? {
    run_post_upload_hook(vcs.root(), ctx.settings().run_post_upload_hook(), issue, cl.patchset()?)?;
  }

  if opts.dependencies {
    println!();
    println!("--dependencies has been specified.");
    println!("All dependent local branches will be re-uploaded.");
    println!();
    opts.dependencies = false;
    return upload_branch_deps(cl, &opts);
  }
  Ok(0)
}

/// Ask before uploading when another machine uploaded a newer patchset.
fn warn_on_patchset_mismatch(cl: &Changelist, force: bool) -> Result<()> {
  let latest = cl.most_recent_patchset()?;
  let local = cl.patchset()?;
  if let (Some(latest), Some(local)) = (latest, local)
    && latest != local
  {
    println!(
      "The last upload made from this repository was patchset #{local} but the most recent patchset on the server is #{latest}."
    );
    println!(
      "Uploading will still work, but if you've uploaded to this issue from another machine or branch the patch you're uploading now might not include those changes."
    );
    if !force {
      pause("About to upload; enter to confirm.")?;
    }
  }
  Ok(())
}

/// Local branches tracking `root`, directly or through other local branches,
/// in preorder with their depth below `root`.
pub fn dependents_preorder(root: &str, branches: &[(String, Option<String>)]) -> Vec<(usize, String)> {
  let mut tracked_to_dependents: HashMap<&str, Vec<&str>> = HashMap::new();
  for (branch, upstream) in branches {
    if let Some(upstream) = upstream {
      tracked_to_dependents.entry(upstream.as_str()).or_default().push(branch.as_str());
    }
  }

  fn visit(branch: &str, depth: usize, map: &HashMap<&str, Vec<&str>>, out: &mut Vec<(usize, String)>) {
    for dependent in map.get(branch).into_iter().flatten() {
      if out.iter().any(|(_, seen)| seen == dependent) {
        continue;
      }
      out.push((depth, (*dependent).to_string()));
      visit(dependent, depth + 1, map, out);
    }
  }

  let mut dependents = Vec::new();
  visit(root, 1, &tracked_to_dependents, &mut dependents);
  dependents
}

/// Re-upload every local branch that depends on the changelist's branch,
/// checking the branch out again afterwards.
pub fn upload_branch_deps(cl: &Changelist, opts: &UploadOptions) -> Result<i32> {
  let ctx = cl.context();
  let vcs = ctx.vcs();
  ensure_clean_tree(vcs, "upload-branch-deps")?;

  let root_branch = cl
    .branch()
    .ok_or_else(|| {
      ClError::precondition("Can't find dependent branches from detached HEAD state. Get on a branch!")
    })?
    .to_string();
  if cl.issue()?.is_none() || cl.patchset()?.is_none() {
    return Err(
      ClError::precondition(
        "Current branch does not have an uploaded CL. We cannot set patchset dependencies without an uploaded CL.",
      )
      .into(),
    );
  }

  let branches = git::branches_with_upstreams(vcs)?;
  if branches.is_empty() {
    println!("No local branches found.");
    return Ok(0);
  }

  println!();
  println!("The dependent local branches of {root_branch} are:");
  let dependents = dependents_preorder(&root_branch, &branches);
  for (depth, dependent) in &dependents {
    println!("{}{dependent}", "  ".repeat(*depth));
  }
  println!();
  if dependents.is_empty() {
    println!("There are no dependent local branches for {root_branch}");
    return Ok(0);
  }

  println!("This command will checkout all dependent branches and run \"git cl upload\".");
  if !opts.force {
    pause("[Press enter to continue or ctrl-C to quit]")?;
  }

  let mut dep_opts = opts.clone();
  dep_opts.dependencies = false;
  if cl.backend_kind() == BackendKind::Rietveld {
    dep_opts.title = Some(DEPENDENCY_PATCHSET_TITLE.to_string());
  }

  let mut failures = Vec::new();
  for (_, dependent) in &dependents {
    println!();
    println!("--------------------------------------");
    println!("Running \"git cl upload\" from {dependent}:");
    let uploaded = vcs.run(&["checkout", "-q", dependent]).and_then(|_| {
      let dep_cl = Changelist::for_current_branch(Arc::clone(ctx), None)?;
      upload(&dep_cl, &dep_opts, &[])
    });
    match uploaded {
      Ok(0) => {}
      Ok(code) => {
        println!("Upload failed for {dependent}!");
        debug!("Upload of {dependent} exited with {code}");
        failures.push(dependent.clone());
      }
      Err(err) => {
        print_warning(&format!("Upload failed for {dependent}: {err:#}"));
        failures.push(dependent.clone());
      }
    }
    println!();
  }
  vcs.run(&["checkout", "-q", &root_branch])?;

  println!();
  print_success("Upload complete for dependent branches!");
  for (_, dependent) in &dependents {
    let outcome = if failures.contains(dependent) { "failed" } else { "succeeded" };
    println!("  {dependent} : {outcome}");
  }
  println!();
  Ok(0)
}
