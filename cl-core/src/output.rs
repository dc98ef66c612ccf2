//! # Output Formatting
//!
//! User-facing messages with colors and emoji markers. Diagnostics go through
//! `tracing`; these helpers are for results the user asked for.

use owo_colors::OwoColorize;

/// When to color terminal output.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
  /// Enable colored output
  Yes,
  /// Enable colored output (alias for Yes)
  Always,
  /// Detect terminal support
  #[default]
  Auto,
  /// Disable colored output
  No,
  /// Disable colored output (alias for No)
  Never,
}

impl ColorMode {
  /// Apply this mode to every `owo_colors` call in the process.
  pub fn apply(self) {
    match self {
      Self::Yes | Self::Always => owo_colors::set_override(true),
      Self::No | Self::Never => owo_colors::set_override(false),
      Self::Auto => owo_colors::unset_override(),
    }
  }
}

/// Look up an emoji by shortcode, falling back to `default`.
pub fn get_emoji_or_default(name: &str, default: &str) -> String {
  emojis::get_by_shortcode(name).map_or_else(|| default.to_string(), ToString::to_string)
}

pub fn print_success(message: &str) {
  let check = get_emoji_or_default("check_mark", "✓");
  println!("{} {}", check.green().bold(), message);
}

/// Errors go to stderr.
pub fn print_error(message: &str) {
  let cross = get_emoji_or_default("cross_mark", "✗");
  eprintln!("{} {}", cross.red().bold(), message);
}

pub fn print_warning(message: &str) {
  let warning = get_emoji_or_default("warning", "⚠");
  eprintln!("{} {}", warning.yellow().bold(), message);
}

pub fn print_info(message: &str) {
  let info = get_emoji_or_default("information", "ℹ");
  println!("{} {}", info.blue().bold(), message);
}

pub fn format_branch(name: &str) -> String {
  name.green().to_string()
}

pub fn format_url(url: &str) -> String {
  url.blue().underline().to_string()
}

/// Color a try-job result bucket heading.
pub fn format_build_section(title: &str) -> String {
  match title {
    "Successes" => title.green().to_string(),
    "Failures" => title.red().to_string(),
    "Infra Failures" => title.magenta().to_string(),
    "Canceled" => title.bright_black().to_string(),
    "Started" | "Scheduled" => title.yellow().to_string(),
    _ => title.bold().to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_emoji_or_default() {
    assert!(!get_emoji_or_default("check_mark", "✓").is_empty());
    assert_eq!(get_emoji_or_default("no_such_emoji", "fallback"), "fallback");
  }

  #[test]
  fn test_formatters_keep_text() {
    assert!(format_branch("feature").contains("feature"));
    assert!(format_build_section("Failures").contains("Failures"));
    assert!(format_url("https://example.com").contains("https://example.com"));
  }
}
