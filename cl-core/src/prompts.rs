//! # Prompts
//!
//! Interactive confirmations with a shared dialoguer theme. An interrupted or
//! declined prompt surfaces as [`ClError::UserAbort`].

use console::Style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::error::ClError;

/// The dialoguer theme used by every git-cl prompt.
pub fn cl_theme() -> ColorfulTheme {
  ColorfulTheme {
    prompt_style: Style::new().cyan().bold(),
    active_item_prefix: Style::new().green().apply_to("❯ ".to_string()),
    active_item_style: Style::new().green(),
    ..ColorfulTheme::default()
  }
}

/// Ask a yes/no question. `Ok(false)` when the user says no.
pub fn confirm(prompt: &str, default: bool) -> Result<bool, ClError> {
  Confirm::with_theme(&cl_theme())
    .with_prompt(prompt)
    .default(default)
    .interact()
    .map_err(|_interrupted| ClError::UserAbort)
}

/// Wait for the user to press Enter.
pub fn pause(prompt: &str) -> Result<(), ClError> {
  Input::<String>::with_theme(&cl_theme())
    .with_prompt(prompt)
    .allow_empty(true)
    .interact_text()
    .map(|_| ())
    .map_err(|_interrupted| ClError::UserAbort)
}

/// Free-text input with an optional default.
pub fn ask(prompt: &str, default: Option<&str>) -> Result<String, ClError> {
  let theme = cl_theme();
  let mut input = Input::<String>::with_theme(&theme).with_prompt(prompt).allow_empty(true);
  if let Some(default) = default {
    input = input.default(default.to_string());
  }
  input.interact_text().map_err(|_interrupted| ClError::UserAbort)
}
