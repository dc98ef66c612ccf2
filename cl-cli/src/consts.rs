//! Constants for the git-cl command line tool.

use std::time::Duration;

/// Remote the Gerrit backend pushes to.
pub const GERRIT_REMOTE: &str = "origin";

/// Namespace for local copies of pending refs fetched while landing.
pub const LOCAL_PENDING_REF_PREFIX: &str = "refs/git-cl/";

/// Substrings of push output that make a push failure final.
pub const FATAL_PUSH_MARKERS: &[&str] = &["(prohibited by Gerrit)"];

/// Projects whose landed commits carry sequential position footers.
pub const GIT_NUMBERER_PROJECTS: &[&str] = &["chromium/src", "external/webrtc", "v8/v8"];

/// How long the status aggregator waits for the next result.
pub const STATUS_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of the tags `git cl archive` leaves behind.
pub const ARCHIVE_TAG_PREFIX: &str = "git-cl-archived";

/// Category property attached to every scheduled try job.
pub const TRYJOB_CATEGORY: &str = "git_cl_try";

/// Commit message marker of the commit-msg hook installed by Gerrit.
pub const GERRIT_HOOK_MARKERS: &[&str] = &["From Gerrit Code Review", "add_ChangeId()"];

/// Title given to patchsets re-uploaded by `git cl upload --dependencies` on
/// the legacy backend.
pub const DEPENDENCY_PATCHSET_TITLE: &str = "Updated patchset dependency";

/// Default rename/copy similarity for diffs.
pub const DEFAULT_SIMILARITY: u8 = 50;

/// Version string with the commit the binary was built from.
pub fn version_info() -> String {
  let hash = env!("GIT_HASH");
  if hash.is_empty() {
    env!("CARGO_PKG_VERSION").to_string()
  } else {
    format!("{} ({hash}, {})", env!("CARGO_PKG_VERSION"), env!("TARGET"))
  }
}
