//! Small text helpers shared by commands that print or edit descriptions.

/// Split comma-separated entries, trim them, drop empties and sort.
///
/// ```
/// use cl_core::text::cleanup_list;
///
/// let people = cleanup_list(&["b@x.com, a@x.com", ""]);
/// assert_eq!(people, vec!["a@x.com", "b@x.com"]);
/// ```
pub fn cleanup_list<S: AsRef<str>>(items: &[S]) -> Vec<String> {
  let mut out: Vec<String> = items
    .iter()
    .flat_map(|item| item.as_ref().split(','))
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect();
  out.sort();
  out
}

/// Greedy word wrap of a single line to `width` columns, every output line
/// prefixed with `indent`. Whitespace runs collapse to single spaces and
/// words longer than the available width are broken.
pub fn wrap_line(line: &str, width: usize, indent: &str) -> String {
  let avail = width.saturating_sub(indent.chars().count()).max(1);
  let mut lines: Vec<String> = Vec::new();
  let mut current = String::new();

  for word in line.split_whitespace() {
    let mut word: String = word.to_string();
    loop {
      let cur_len = current.chars().count();
      let word_len = word.chars().count();
      let needed = if current.is_empty() { word_len } else { cur_len + 1 + word_len };
      if needed <= avail {
        if !current.is_empty() {
          current.push(' ');
        }
        current.push_str(&word);
        break;
      }
      if !current.is_empty() {
        lines.push(std::mem::take(&mut current));
        continue;
      }
      let head: String = word.chars().take(avail).collect();
      word = word.chars().skip(avail).collect();
      lines.push(head);
      if word.is_empty() {
        break;
      }
    }
  }
  if !current.is_empty() {
    lines.push(current);
  }

  lines
    .iter()
    .map(|l| format!("{indent}{l}"))
    .collect::<Vec<_>>()
    .join("\n")
}

/// Wrap every line of `text`, keeping blank lines blank.
pub fn wrap_text(text: &str, width: usize, indent: &str) -> String {
  text
    .lines()
    .map(|line| wrap_line(line, width, indent))
    .collect::<Vec<_>>()
    .join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cleanup_list_sorts_and_drops_empty() {
    assert_eq!(cleanup_list(&[" c ,a", "b,,"]), vec!["a", "b", "c"]);
    assert!(cleanup_list::<&str>(&[]).is_empty());
  }

  #[test]
  fn test_wrap_line_indents_and_wraps() {
    let wrapped = wrap_line("one two three four", 11, "  ");
    assert_eq!(wrapped, "  one two\n  three\n  four");
  }

  #[test]
  fn test_wrap_line_breaks_long_words() {
    assert_eq!(wrap_line("abcdefgh", 6, "  "), "  abcd\n  efgh");
  }

  #[test]
  fn test_wrap_text_keeps_blank_lines() {
    assert_eq!(wrap_text("title\n\nbody", 74, "  "), "  title\n\n  body");
  }
}
