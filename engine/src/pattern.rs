//! Inclusion patterns for source enumeration.
//!
//! Patterns match against the file name (the part after the last `/`), so
//! `*.jpg` or `^.*\.jpg$` select files regardless of the source directory.

use std::borrow::Cow;
use std::path::Path;
use url::Url;

use crate::error::EngineError;
use crate::fs_ops::FILE_SCHEME;
use crate::model::Pattern;

/// A compiled inclusion pattern.
#[derive(Debug, Clone)]
pub enum PatternMatcher {
    Glob(glob::Pattern),
    /// Anchored at the start of the name, not at the end
    Regex(regex::Regex),
}

impl PatternMatcher {
    /// Compile `pattern`. Invalid globs or regexes are validation errors.
    pub fn compile(pattern: &Pattern) -> Result<Self, EngineError> {
        match pattern {
            Pattern::Glob(glob) => glob::Pattern::new(glob)
                .map(PatternMatcher::Glob)
                .map_err(|e| EngineError::Validation(format!("Invalid glob pattern '{glob}': {e}"))),
            Pattern::Regex(expr) => regex::Regex::new(&format!("^(?:{expr})"))
                .map(PatternMatcher::Regex)
                .map_err(|e| EngineError::Validation(format!("Invalid regex '{expr}': {e}"))),
        }
    }

    /// Check whether the name part of `uri` matches.
    pub fn matches(&self, uri: &str) -> bool {
        let name = file_name(uri);
        match self {
            PatternMatcher::Glob(pattern) => pattern.matches(&name),
            PatternMatcher::Regex(regex) => regex.is_match(&name),
        }
    }
}

/// Everything after the last `/`, ignoring one trailing slash.
///
/// Names in `file://` URIs are percent-decoded, so the result is the name
/// on disk.
pub fn file_name(uri: &str) -> Cow<'_, str> {
    if let Ok(url) = Url::parse(uri) {
        if url.scheme() == FILE_SCHEME {
            if let Some(name) = url.to_file_path().ok().as_deref().and_then(Path::file_name) {
                return Cow::Owned(name.to_string_lossy().into_owned());
            }
        }
    }
    let trimmed = uri.strip_suffix('/').unwrap_or(uri);
    Cow::Borrowed(trimmed.rsplit('/').next().unwrap_or(trimmed))
}
