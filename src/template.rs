//! Thumbnailer command template expansion
//!
//! Templates are split into words with POSIX shell quoting rules, then each
//! word is scanned for placeholders:
//!
//! | code | expands to                         |
//! |------|------------------------------------|
//! | `%u` | `file://` URI of the input path    |
//! | `%i` | input path                         |
//! | `%o` | output path                        |
//! | `%s` | thumbnail size in pixels           |
//! | `%%` | a literal `%`                      |
//!
//! Unknown codes and a trailing `%` are dropped without error. Existing
//! thumbnailer definitions rely on that leniency, so it is kept.

use crate::errors::{Result, ThumbnailError};
use std::ffi::OsString;
use std::path::Path;
use url::Url;

/// Result of expanding a command template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedCommand {
    /// Expanded argument vector, program first. Paths are copied byte for
    /// byte, so arguments need not be UTF-8.
    pub argv: Vec<OsString>,
    /// An input placeholder (`%i` or `%u`) was substituted
    pub saw_input: bool,
    /// An output placeholder (`%o`) was substituted
    pub saw_output: bool,
}

impl ExpandedCommand {
    /// Reject commands that could not receive the file or produce output
    pub fn require_placeholders(self) -> Result<Vec<OsString>> {
        if !self.saw_input {
            return Err(ThumbnailError::MissingInputPlaceholder);
        }
        if !self.saw_output {
            return Err(ThumbnailError::MissingOutputPlaceholder);
        }
        Ok(self.argv)
    }
}

/// Split a template into shell words; at least one word is required
pub fn split(template: &str) -> Result<Vec<String>> {
    let words =
        shell_words::split(template).map_err(|e| ThumbnailError::TemplateSyntax(e.to_string()))?;
    if words.is_empty() {
        return Err(ThumbnailError::TemplateSyntax("empty command".to_string()));
    }
    Ok(words)
}

/// Split a template into words and substitute placeholders
pub fn expand(
    template: &str,
    size: u32,
    input_path: &Path,
    output_path: &Path,
) -> Result<ExpandedCommand> {
    let words = split(template)?;

    // Non-UTF-8 bytes are percent-encoded, so the URI is always a String
    let input_uri = Url::from_file_path(input_path)
        .map(String::from)
        .map_err(|_| {
            ThumbnailError::TemplateSyntax(format!(
                "input path is not absolute: {}",
                input_path.display()
            ))
        })?;
    let size = size.to_string();

    let mut expanded = ExpandedCommand {
        argv: Vec::with_capacity(words.len()),
        saw_input: false,
        saw_output: false,
    };

    for word in &words {
        let mut out = OsString::with_capacity(word.len());
        let mut literal = String::new();
        let mut chars = word.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('u') => {
                    literal.push_str(&input_uri);
                    expanded.saw_input = true;
                }
                Some('i') => {
                    out.push(&literal);
                    literal.clear();
                    out.push(input_path);
                    expanded.saw_input = true;
                }
                Some('o') => {
                    out.push(&literal);
                    literal.clear();
                    out.push(output_path);
                    expanded.saw_output = true;
                }
                Some('s') => literal.push_str(&size),
                Some('%') => literal.push('%'),
                // Unknown code or trailing '%'
                Some(_) | None => {}
            }
        }

        out.push(&literal);
        expanded.argv.push(out);
    }

    Ok(expanded)
}

/// First word of a template, for diagnostics
pub fn program_name(template: &str) -> Option<String> {
    split(template).ok().and_then(|words| words.into_iter().next())
}
