//! Line-preserving model of a `KEY=VALUE` env file.
//!
//! [`EnvDocument`] keeps every line byte-for-byte, including comments,
//! blank lines, a missing final newline and `\r\n` endings, so a targeted
//! edit changes exactly one line. [`parse_env`] produces the typed cache
//! served by `get`/`getKey`.

use environ_common::{EnvValue, ParsedEnv, is_env_key_char};

/// Where [`EnvDocument::upsert`] put the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// An existing line at this index was rewritten.
    Replaced(usize),
    /// A new final line was added.
    Appended,
}

/// An env file split into lines.
///
/// Lines are stored without their `\n`; in a `\r\n` file each stored line
/// keeps its `\r`, so rendering is a plain `\n` join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvDocument {
    lines: Vec<String>,
    trailing_newline: bool,
    crlf: bool,
}

impl EnvDocument {
    pub fn parse(content: &str) -> Self {
        let crlf = content.contains("\r\n");
        let (body, trailing_newline) = match content.strip_suffix('\n') {
            Some(body) => (body, true),
            None => (content, false),
        };
        let lines = if body.is_empty() && !trailing_newline {
            Vec::new()
        } else {
            body.split('\n').map(str::to_string).collect()
        };
        Self {
            lines,
            trailing_newline,
            crlf,
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }

    /// Index of the line assigning `key`. See [`line_matches_key`].
    ///
    /// With duplicates this is the last assignment, the one [`parse_env`]
    /// and dotenv loaders treat as effective.
    pub fn find(&self, key: &str) -> Option<usize> {
        self.lines.iter().rposition(|line| line_matches_key(line, key))
    }

    /// Rewrite the line assigning `key` in place, or append a new one.
    pub fn upsert(&mut self, key: &str, value: &str) -> Upsert {
        let entry = format!("{key}={value}");
        if let Some(idx) = self.find(key) {
            let line = &mut self.lines[idx];
            *line = if line.ends_with('\r') {
                format!("{entry}\r")
            } else {
                entry
            };
            return Upsert::Replaced(idx);
        }
        self.push_line(entry);
        Upsert::Appended
    }

    /// Remove the line assigning `key`, returning its index.
    pub fn remove(&mut self, key: &str) -> Option<usize> {
        let idx = self.find(key)?;
        self.lines.remove(idx);
        if self.lines.is_empty() {
            self.trailing_newline = false;
        } else if !self.trailing_newline && idx == self.lines.len() {
            // The old second-to-last line is now final and unterminated.
            if let Some(last) = self.lines.last_mut() {
                if last.ends_with('\r') {
                    last.pop();
                }
            }
        }
        Some(idx)
    }

    fn push_line(&mut self, entry: String) {
        if self.lines.is_empty() {
            self.trailing_newline = true;
        } else if self.crlf && !self.trailing_newline {
            if let Some(last) = self.lines.last_mut() {
                if !last.ends_with('\r') {
                    last.push('\r');
                }
            }
        }
        if self.crlf && self.trailing_newline {
            self.lines.push(format!("{entry}\r"));
        } else {
            self.lines.push(entry);
        }
    }
}

/// Line ending to use when appending to `content`.
pub fn line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") { "\r\n" } else { "\n" }
}

fn strip_export(line: &str) -> &str {
    line.strip_prefix("export")
        .filter(|rest| rest.starts_with([' ', '\t']))
        .map_or(line, str::trim_start)
}

/// Whether `line` assigns `key`.
///
/// After leading whitespace and an optional `export `, the line must start
/// with exactly `key`, then optional spaces or tabs, then `=`. `PORT` does
/// not match `PORT_ADMIN=1` or `APP_PORT=1`, and comment lines never match
/// because their first non-blank character is `#`.
pub fn line_matches_key(line: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    let rest = strip_export(line.trim_start());
    rest.strip_prefix(key)
        .is_some_and(|after| after.trim_start_matches([' ', '\t']).starts_with('='))
}

/// Split one line into key and unquoted value, dotenv style.
///
/// Returns `None` for blank lines, comments, and lines without a valid key.
pub fn parse_line(line: &str) -> Option<(&str, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, raw) = strip_export(line).split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(is_env_key_char) {
        return None;
    }
    Some((key, parse_value(raw.trim())))
}

fn closing_quote(raw: &str, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in raw.char_indices().skip(1) {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some(i);
        }
    }
    None
}

fn parse_value(raw: &str) -> String {
    if let Some(quote @ ('"' | '\'' | '`')) = raw.chars().next() {
        if let Some(end) = closing_quote(raw, quote) {
            let inner = &raw[1..end];
            return if quote == '"' {
                inner.replace("\\n", "\n").replace("\\r", "\r")
            } else {
                inner.to_string()
            };
        }
    }
    // Unquoted: everything from the first `#` on is a comment.
    raw.split('#').next().unwrap_or_default().trim().to_string()
}

/// Parse env file content into the typed cache. Later duplicates win.
pub fn parse_env(content: &str) -> ParsedEnv {
    content
        .lines()
        .filter_map(parse_line)
        .map(|(key, value)| (key.to_string(), EnvValue::coerce(&value)))
        .collect()
}
