//! # Repository Settings
//!
//! An explicit, read-only snapshot of the repository-wide review settings.
//! It is loaded once per invocation (after an optional refresh from the
//! `codereview.settings` file) and passed to every changelist and backend.
//! Writes never go through this type; they are routed through git config
//! directly and take effect on the next invocation.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::consts;
use crate::error::ClError;
use crate::git::Vcs;

/// Snapshot of `git config --list` plus the repository root.
#[derive(Debug, Clone, Default)]
pub struct Settings {
  root: PathBuf,
  values: HashMap<String, Vec<String>>,
  squash_override: Option<bool>,
}

impl Settings {
  /// Read the whole git config in one call.
  pub fn load(vcs: &dyn Vcs) -> Result<Self> {
    let raw = vcs.run(&["config", "-z", "--list"]).context("Failed to read git config")?;
    Ok(Self::from_config_list(vcs.root(), &raw))
  }

  /// Refresh git config from `codereview.settings` when allowed, then load.
  pub fn load_with_update(vcs: &dyn Vcs, cwd: &Path) -> Result<Self> {
    let autoupdate = vcs
      .run_ok(&["config", "rietveld.autoupdate"])?
      .map(|v| v.trim().to_lowercase())
      .unwrap_or_default();
    if autoupdate != "false"
      && let Some(path) = find_codereview_settings_file(vcs.root(), cwd)
    {
      debug!("Loading review settings from {}", path.display());
      let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
      let keyvals = parse_codereview_settings(&content)?;
      apply_codereview_settings(vcs, &keyvals)?;
    }
    Self::load(vcs)
  }

  /// Build from the NUL-separated output of `git config -z --list`.
  pub fn from_config_list(root: &Path, raw: &str) -> Self {
    let mut values: HashMap<String, Vec<String>> = HashMap::new();
    for entry in raw.split('\0').filter(|e| !e.is_empty()) {
      let (key, value) = entry.split_once('\n').unwrap_or((entry, ""));
      values.entry(key.to_string()).or_default().push(value.to_string());
    }
    Self {
      root: root.to_path_buf(),
      values,
      squash_override: None,
    }
  }

  /// Force squash mode on or off for this invocation.
  pub const fn with_squash_override(mut self, squash: Option<bool>) -> Self {
    self.squash_override = squash;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Last value of a config key.
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .values
      .get(key)
      .and_then(|v| v.last())
      .map(String::as_str)
      .filter(|v| !v.is_empty())
  }

  fn get_bool(&self, key: &str) -> Option<bool> {
    self.get(key).map(parse_git_bool)
  }

  /// Legacy review server, upgraded to https.
  pub fn default_server(&self) -> String {
    upgrade_to_https(self.get("rietveld.server").unwrap_or(consts::DEFAULT_SERVER))
  }

  /// The repository is configured for the Gerrit-style backend.
  pub fn is_gerrit(&self) -> bool {
    self.get("gerrit.host").is_some()
  }

  /// Whether Gerrit uploads squash local commits. Defaults to true.
  pub fn squash_gerrit_uploads(&self) -> bool {
    self
      .squash_override
      .unwrap_or_else(|| self.get_bool("gerrit.squash-uploads") != Some(false))
  }

  pub fn gerrit_skip_ensure_authenticated(&self) -> bool {
    self.get_bool("gerrit.skip-ensure-authenticated") == Some(true)
  }

  /// Default CC list followed by the extra CC list.
  pub fn cc_list(&self) -> String {
    let base = self.get("rietveld.cc").unwrap_or_default();
    match self.get("rietveld.extracc") {
      Some(extra) if !base.is_empty() => format!("{base},{extra}"),
      Some(extra) => extra.to_string(),
      None => base.to_string(),
    }
  }

  /// CC list without the repository default, used for private uploads.
  pub fn cc_list_without_default(&self) -> String {
    self.get("rietveld.extracc").unwrap_or_default().to_string()
  }

  pub fn default_private_flag(&self) -> bool {
    self.get("rietveld.private") == Some("True")
  }

  pub fn tree_status_url(&self) -> Option<&str> {
    self.get("rietveld.tree-status-url")
  }

  pub fn viewvc_url(&self) -> Option<&str> {
    self.get("rietveld.viewvc-url")
  }

  pub fn bug_prefix(&self) -> Option<&str> {
    self.get("rietveld.bug-prefix")
  }

  pub fn project(&self) -> Option<&str> {
    self.get("rietveld.project")
  }

  pub fn pending_ref_prefix(&self) -> Option<&str> {
    self.get("rietveld.pending-ref-prefix")
  }

  pub fn run_post_upload_hook(&self) -> bool {
    self.get("rietveld.run-post-upload-hook") == Some("True")
  }

  pub fn git_editor(&self) -> Option<&str> {
    self.get("core.editor")
  }

  /// Override for the remote branch used in sanity checks.
  pub fn remote_branch_override(&self) -> Option<&str> {
    self.get("gitcl.remotebranch")
  }
}

/// Interpret a git config boolean.
pub fn parse_git_bool(value: &str) -> bool {
  !matches!(value.trim().to_lowercase().as_str(), "false" | "no" | "off" | "0" | "")
}

/// Prefix `https://` when no scheme is present and upgrade plain `http`.
pub fn upgrade_to_https(url: &str) -> String {
  let url = url.trim();
  if url.is_empty() {
    return String::new();
  }
  if let Some(rest) = url.strip_prefix("http://") {
    return format!("https://{rest}");
  }
  if url.contains("://") {
    return url.to_string();
  }
  format!("https://{url}")
}

/// Find `codereview.settings`, searching from `cwd` up to the repository root,
/// or up to the filesystem root when the repository opts in to inheritance.
pub fn find_codereview_settings_file(root: &Path, cwd: &Path) -> Option<PathBuf> {
  let inherit = root.join(consts::INHERIT_SETTINGS_MARKER).is_file();
  let mut dir = Some(cwd);
  while let Some(current) = dir {
    let candidate = current.join(consts::CODEREVIEW_SETTINGS_FILE);
    if candidate.is_file() {
      return Some(candidate);
    }
    if !inherit && current == root {
      break;
    }
    dir = current.parent();
  }
  None
}

/// Parse `KEY: value` lines, ignoring `#` comments and blank lines.
pub fn parse_codereview_settings(content: &str) -> Result<BTreeMap<String, String>> {
  let mut keyvals = BTreeMap::new();
  for line in content.lines() {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }
    let Some((key, value)) = trimmed.split_once(':') else {
      return Err(
        ClError::invalid_input(format!("Failed to process settings, please fix. Content:\n\n{content}")).into(),
      );
    };
    keyvals.insert(key.trim().to_string(), value.trim().to_string());
  }
  for key in ["CODE_REVIEW_SERVER", "VIEW_VC"] {
    if let Some(value) = keyvals.get_mut(key)
      && !value.is_empty()
    {
      *value = upgrade_to_https(value);
    }
  }
  Ok(keyvals)
}

/// `codereview.settings` keys mirrored into `rietveld.*` git config. Keys
/// absent from the file are removed from git config.
const RIETVELD_PROPERTIES: &[(&str, &str)] = &[
  ("cc", "CC_LIST"),
  ("private", "PRIVATE"),
  ("tree-status-url", "STATUS"),
  ("viewvc-url", "VIEW_VC"),
  ("bug-prefix", "BUG_PREFIX"),
  ("cpplint-regex", "LINT_REGEX"),
  ("force-https-commit-url", "FORCE_HTTPS_COMMIT_URL"),
  ("cpplint-ignore-regex", "LINT_IGNORE_REGEX"),
  ("project", "PROJECT"),
  ("pending-ref-prefix", "PENDING_REF_PREFIX"),
  ("run-post-upload-hook", "RUN_POST_UPLOAD_HOOK"),
];

/// Write parsed `codereview.settings` values into the repository config.
pub fn apply_codereview_settings(vcs: &dyn Vcs, keyvals: &BTreeMap<String, String>) -> Result<()> {
  let set_property = |name: &str, setting: &str, required: bool| -> Result<()> {
    let fullname = format!("rietveld.{name}");
    match keyvals.get(setting) {
      Some(value) => {
        vcs.run(&["config", &fullname, value])?;
      }
      None => {
        let (code, output) = vcs.run_with_code(&["config", "--unset-all", &fullname])?;
        if required && code != 0 {
          return Err(ClError::precondition(format!("Failed to unset {fullname}: {}", output.trim())).into());
        }
      }
    }
    Ok(())
  };

  if keyvals.get("GERRIT_HOST").is_none_or(|h| h.is_empty()) {
    // The server entry may legitimately be absent on a fresh clone.
    set_property("server", "CODE_REVIEW_SERVER", false)?;
  }
  for (name, setting) in RIETVELD_PROPERTIES {
    set_property(name, setting, false)?;
  }

  for (setting, key) in [
    ("GERRIT_HOST", "gerrit.host"),
    ("GERRIT_SQUASH_UPLOADS", "gerrit.squash-uploads"),
    ("GERRIT_SKIP_ENSURE_AUTHENTICATED", "gerrit.skip-ensure-authenticated"),
  ] {
    if let Some(value) = keyvals.get(setting) {
      vcs.run(&["config", key, value])?;
    }
  }

  if let (Some(push_key), Some(origin_url)) = (keyvals.get("PUSH_URL_CONFIG"), keyvals.get("ORIGIN_URL_CONFIG")) {
    vcs.run(&["config", push_key, origin_url])?;
  }
  info!("Applied review settings ({} keys)", keyvals.len());
  Ok(())
}

#[cfg(test)]
mod tests {
  use cl_test_utils::GitRepoTestGuard;

  use super::*;
  use crate::git::GitCli;

  #[test]
  fn test_from_config_list_keeps_last_value() {
    let raw = "rietveld.server\ncr.example.com\0rietveld.cc\na@x.com\0rietveld.cc\nb@x.com\0core.bare\nfalse\0";
    let settings = Settings::from_config_list(Path::new("/repo"), raw);

    assert_eq!(settings.default_server(), "https://cr.example.com");
    assert_eq!(settings.get("rietveld.cc"), Some("b@x.com"));
    assert!(!settings.is_gerrit());
  }

  #[test]
  fn test_defaults_when_unset() {
    let settings = Settings::from_config_list(Path::new("/repo"), "");
    assert_eq!(settings.default_server(), consts::DEFAULT_SERVER);
    assert!(settings.squash_gerrit_uploads());
    assert!(!settings.run_post_upload_hook());
    assert!(!settings.default_private_flag());
    assert_eq!(settings.cc_list(), "");
  }

  #[test]
  fn test_squash_override_beats_config() {
    let raw = "gerrit.squash-uploads\nfalse\0";
    let settings = Settings::from_config_list(Path::new("/repo"), raw);
    assert!(!settings.squash_gerrit_uploads());
    assert!(settings.with_squash_override(Some(true)).squash_gerrit_uploads());
  }

  #[test]
  fn test_cc_list_combines_default_and_extra() {
    let raw = "rietveld.cc\nteam@x.com\0rietveld.extracc\nbot@x.com\0";
    let settings = Settings::from_config_list(Path::new("/repo"), raw);
    assert_eq!(settings.cc_list(), "team@x.com,bot@x.com");
    assert_eq!(settings.cc_list_without_default(), "bot@x.com");
  }

  #[test]
  fn test_upgrade_to_https() {
    assert_eq!(upgrade_to_https("codereview.example.com"), "https://codereview.example.com");
    assert_eq!(upgrade_to_https("http://codereview.example.com"), "https://codereview.example.com");
    assert_eq!(upgrade_to_https("https://x.com/"), "https://x.com/");
    assert_eq!(upgrade_to_https("sso://x"), "sso://x");
    assert_eq!(upgrade_to_https(""), "");
  }

  #[test]
  fn test_parse_codereview_settings() {
    let content = "# comment\nCODE_REVIEW_SERVER: codereview.example.com\nCC_LIST: a@x.com\n\nVIEW_VC: http://src.example.com/viewvc?rev=\n";
    let keyvals = parse_codereview_settings(content).unwrap();
    assert_eq!(keyvals["CODE_REVIEW_SERVER"], "https://codereview.example.com");
    assert_eq!(keyvals["CC_LIST"], "a@x.com");
    assert_eq!(keyvals["VIEW_VC"], "https://src.example.com/viewvc?rev=");
  }

  #[test]
  fn test_parse_codereview_settings_rejects_garbage() {
    let err = parse_codereview_settings("NOT A SETTING\n").unwrap_err();
    assert!(err.to_string().contains("Failed to process settings"));
  }

  #[test]
  fn test_load_with_update_applies_file() {
    let guard = GitRepoTestGuard::new();
    fs::write(
      guard.path().join("codereview.settings"),
      "GERRIT_HOST: True\nCC_LIST: dev@example.com\nBUG_PREFIX: proj\n",
    )
    .unwrap();
    let git = GitCli::new(guard.path());
    git.run(&["config", "rietveld.private", "True"]).unwrap();

    let settings = Settings::load_with_update(&git, guard.path()).unwrap();
    assert!(settings.is_gerrit());
    assert_eq!(settings.cc_list(), "dev@example.com");
    assert_eq!(settings.bug_prefix(), Some("proj"));
    // Keys absent from the file are cleared.
    assert!(!settings.default_private_flag());
  }

  #[test]
  fn test_autoupdate_false_skips_file() {
    let guard = GitRepoTestGuard::new();
    fs::write(guard.path().join("codereview.settings"), "BUG_PREFIX: proj\n").unwrap();
    let git = GitCli::new(guard.path());
    git.run(&["config", "rietveld.autoupdate", "false"]).unwrap();

    let settings = Settings::load_with_update(&git, guard.path()).unwrap();
    assert_eq!(settings.bug_prefix(), None);
  }

  #[test]
  fn test_find_settings_file_walks_up_to_root_only() {
    let guard = GitRepoTestGuard::new();
    let nested = guard.path().join("a/b");
    fs::create_dir_all(&nested).unwrap();
    assert_eq!(find_codereview_settings_file(guard.path(), &nested), None);

    fs::write(guard.path().join("codereview.settings"), "CC_LIST: x\n").unwrap();
    assert_eq!(
      find_codereview_settings_file(guard.path(), &nested),
      Some(guard.path().join("codereview.settings"))
    );
  }
}
