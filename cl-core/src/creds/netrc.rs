//! Reading credentials from `.netrc` files.
//!
//! Entries are whitespace-separated tokens, so single-line
//! (`machine host login user password pass`) and multi-line layouts parse the
//! same way. A `default` entry matches any machine not listed explicitly.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::creds::Credentials;

/// Returns the path to the `.netrc` file for the provided home directory.
///
/// ```
/// use std::path::Path;
/// use cl_core::creds::netrc::get_netrc_path;
///
/// assert_eq!(get_netrc_path(Path::new("/home/user")), Path::new("/home/user/.netrc"));
/// ```
pub fn get_netrc_path(home: &Path) -> PathBuf {
  home.join(".netrc")
}

#[derive(Default)]
struct Entry {
  machine: Option<String>,
  login: Option<String>,
  password: Option<String>,
}

impl Entry {
  fn into_credentials(self) -> Option<Credentials> {
    match (self.login, self.password) {
      (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
        Some(Credentials { username, password })
      }
      _ => None,
    }
  }
}

fn parse_entries(content: &str) -> Vec<Entry> {
  let mut entries: Vec<Entry> = Vec::new();
  let mut tokens = content.split_whitespace();
  while let Some(token) = tokens.next() {
    match token {
      "machine" => entries.push(Entry {
        machine: tokens.next().map(str::to_string),
        ..Entry::default()
      }),
      "default" => entries.push(Entry::default()),
      "login" | "password" | "account" => {
        let value = tokens.next().map(str::to_string);
        if let Some(entry) = entries.last_mut() {
          match token {
            "login" => entry.login = value,
            "password" => entry.password = value,
            _ => {}
          }
        }
      }
      // Macro definitions run until a blank line, which whitespace splitting
      // cannot see. They are rare in practice and simply skipped.
      _ => {}
    }
  }
  entries
}

/// Parses a `.netrc` file and returns credentials for `target_machine`.
///
/// `Ok(None)` when neither the machine nor a `default` entry has both a login
/// and a password.
pub fn parse_netrc_file(path: &Path, target_machine: &str) -> Result<Option<Credentials>> {
  let content =
    fs::read_to_string(path).with_context(|| format!("Failed to read .netrc file {}", path.display()))?;
  let mut fallback = None;
  for entry in parse_entries(&content) {
    let is_target = entry.machine.as_deref() == Some(target_machine);
    let is_default = entry.machine.is_none();
    if is_target {
      if let Some(creds) = entry.into_credentials() {
        return Ok(Some(creds));
      }
    } else if is_default && fallback.is_none() {
      fallback = entry.into_credentials();
    }
  }
  Ok(fallback)
}

/// Strips the scheme, any path and trailing slashes from a host or URL.
///
/// ```
/// use cl_core::creds::netrc::normalize_host;
///
/// assert_eq!(normalize_host("https://review.example.com/"), "review.example.com");
/// assert_eq!(normalize_host("http://cr.example.com:8080/c/123"), "cr.example.com:8080");
/// assert_eq!(normalize_host("host.example.com"), "host.example.com");
/// ```
pub fn normalize_host(raw_host: &str) -> String {
  let without_scheme = raw_host
    .trim()
    .trim_start_matches("https://")
    .trim_start_matches("http://");
  without_scheme.split('/').next().unwrap_or_default().to_string()
}

/// Credentials for a host or URL, retrying without the port when the
/// `host:port` form has no entry.
pub fn lookup(path: &Path, host: &str) -> Result<Option<Credentials>> {
  let host = normalize_host(host);
  if let Some(creds) = parse_netrc_file(path, &host)? {
    return Ok(Some(creds));
  }
  match host.rsplit_once(':') {
    Some((bare, _port)) => parse_netrc_file(path, bare),
    None => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  fn write_netrc(content: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".netrc");
    fs::write(&path, content).unwrap();
    (dir, path)
  }

  #[test]
  fn test_multi_line_entries() {
    let (_dir, path) = write_netrc(
      "machine codereview.example.com\n  login alice\n  password secret1\n\nmachine gerrit-review.example.com\n  login bob\n  password secret2\n",
    );
    let creds = parse_netrc_file(&path, "gerrit-review.example.com").unwrap().unwrap();
    assert_eq!(creds.username, "bob");
    assert_eq!(creds.password, "secret2");
    let creds = parse_netrc_file(&path, "codereview.example.com").unwrap().unwrap();
    assert_eq!(creds.username, "alice");
  }

  #[test]
  fn test_single_line_and_missing_machine() {
    let (_dir, path) = write_netrc("machine a.example.com login u password p\n");
    assert_eq!(
      parse_netrc_file(&path, "a.example.com").unwrap(),
      Some(Credentials {
        username: "u".into(),
        password: "p".into(),
      })
    );
    assert!(parse_netrc_file(&path, "b.example.com").unwrap().is_none());
  }

  #[test]
  fn test_incomplete_entry_is_skipped() {
    let (_dir, path) = write_netrc("machine a.example.com login u\nmachine b.example.com login v password w\n");
    assert!(parse_netrc_file(&path, "a.example.com").unwrap().is_none());
    assert_eq!(parse_netrc_file(&path, "b.example.com").unwrap().unwrap().username, "v");
  }

  #[test]
  fn test_default_entry() {
    let (_dir, path) = write_netrc("machine a.example.com login u password p\ndefault login anon password token\n");
    assert_eq!(parse_netrc_file(&path, "other.example.com").unwrap().unwrap().username, "anon");
    assert_eq!(parse_netrc_file(&path, "a.example.com").unwrap().unwrap().username, "u");
  }

  #[test]
  fn test_lookup_drops_port() {
    let (_dir, path) = write_netrc("machine cr.example.com login u password p\n");
    let creds = lookup(&path, "https://cr.example.com:8443/123").unwrap();
    assert_eq!(creds.unwrap().username, "u");
  }

  #[test]
  fn test_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    assert!(parse_netrc_file(&dir.path().join(".netrc"), "x").is_err());
  }
}
