//! Constants shared across git-cl components.

/// Name of the git executable.
#[cfg(windows)]
pub const GIT_EXECUTABLE: &str = "git.exe";

/// Name of the git executable.
#[cfg(not(windows))]
pub const GIT_EXECUTABLE: &str = "git";

/// Review server used by the legacy backend when nothing else is configured.
pub const DEFAULT_SERVER: &str = "https://codereview.chromium.org";

/// Email address used by the commit queue when it posts messages.
pub const COMMIT_BOT_EMAIL: &str = "commit-bot@chromium.org";

/// File in the user's home directory where a typed description is saved
/// when an upload fails.
pub const DESCRIPTION_BACKUP_FILE: &str = ".git_cl_description_backup";

/// Temporary branch used while squashing a change for landing.
pub const MERGE_BRANCH: &str = "git-cl-commit";

/// Temporary branch used while cherry-picking onto a pending ref.
pub const CHERRY_PICK_BRANCH: &str = "git-cl-cherry-pick";

/// Temporary branch holding the last uploaded patchset while diffing.
pub const DIFF_BRANCH: &str = "git-cl-diff";

/// Hook run after a successful local land.
pub const POSTUPSTREAM_HOOK: &str = ".git/hooks/post-cl-land";

/// Hook run before an upload. Non-zero exit aborts the upload.
pub const PRE_UPLOAD_HOOK: &str = ".git/hooks/pre-cl-upload";

/// Hook run before a land. Non-zero exit aborts the land.
pub const PRE_LAND_HOOK: &str = ".git/hooks/pre-cl-land";

/// Hook run after a successful upload when enabled in the repository settings.
pub const POST_UPLOAD_HOOK: &str = ".git/hooks/post-cl-upload";

/// Script that names the owners still needed to cover a set of files.
pub const OWNERS_HOOK: &str = ".git/hooks/cl-owners";

/// Script that names the watchers interested in a set of files.
pub const WATCHLISTS_HOOK: &str = ".git/hooks/cl-watchlists";

/// Name of the repository-level settings file.
pub const CODEREVIEW_SETTINGS_FILE: &str = "codereview.settings";

/// Marker file that allows `codereview.settings` lookup above the repo root.
pub const INHERIT_SETTINGS_MARKER: &str = "inherit-review-settings-ok";

/// Prefix of master names as known to the try-job infrastructure.
pub const MASTER_PREFIX: &str = "master.";

/// Default host for the try-job scheduling service.
pub const DEFAULT_BUILDBUCKET_HOST: &str = "cr-buildbucket.appspot.com";

/// Service mapping builder names to masters.
pub const BUILDERS_MAP_URL: &str = "https://builders-map.appspot.com/";

/// Refs that are shorthand for another remote ref when used as upstream.
pub const REFS_THAT_ALIAS_TO_OTHER_REFS: &[(&str, &str)] = &[
  ("refs/remotes/origin/lkgr", "refs/remotes/origin/master"),
  ("refs/remotes/origin/lkcr", "refs/remotes/origin/master"),
];

/// Default number of workers for the status aggregator.
pub const DEFAULT_STATUS_MAX_JOBS: usize = 50;

/// Width (72 columns plus a two-space indent) for pretty-printed descriptions.
pub const DESCRIPTION_WRAP_WIDTH: usize = 74;

/// Environment variable overriding the user config directory lookup.
pub const ENV_CONFIG_DIR: &str = "GIT_CL_CONFIG_DIR";
