//! # git-cl Core Library
//!
//! Building blocks shared by the `git-cl` binary and the review backend
//! clients: the git executor, the branch-scoped config store, repository
//! settings, the change description model and the error taxonomy used to
//! report remote and local failures.

pub mod branch_config;
pub mod config;
pub mod consts;
pub mod creds;
pub mod description;
pub mod editor;
pub mod error;
pub mod footers;
pub mod git;
pub mod issue_ref;
pub mod output;
pub mod prompts;
pub mod retry;
pub mod settings;
pub mod status;
pub mod text;

pub use branch_config::{BranchConfigStore, ConfigValue};
pub use config::{ConfigDirs, UserConfig, get_config_dirs};
pub use description::ChangeDescription;
pub use error::{ClError, ClResult};
pub use git::{GitCli, Vcs};
pub use issue_ref::{BackendKind, ParsedIssueRef};
pub use output::{ColorMode, print_error, print_info, print_success, print_warning};
pub use retry::RetryPolicy;
pub use settings::Settings;
pub use status::ClStatus;
