//! Tree paths for jsonwatch.
//!
//! A path is the ordered list of keys leading from the (unnamed) root of a
//! live tree to one node or item. Its textual form joins the keys with `/`:
//!
//! ```
//! use jsonwatch_path::{format_path, parse_path};
//!
//! let path = parse_path("settings/kd");
//! assert_eq!(path, vec!["settings".to_string(), "kd".to_string()]);
//! assert_eq!(format_path(&path), "settings/kd");
//! ```
//!
//! Keys containing `/` or `~` are escaped the same way JSON Pointer escapes
//! them (`~1` and `~0`). A single leading `/` is tolerated so pointer-style
//! strings (`/settings/kd`) resolve to the same path.

use thiserror::Error;

pub mod types;
pub use types::{Path, PathStep, ToPath};

pub mod validate;
pub use validate::{validate_path, MAX_PATH_DEPTH};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path too long")]
    PathTooLong,
    #[error("empty path step at position {0}")]
    EmptyStep(usize),
    #[error("root has no parent")]
    NoParent,
}

/// Unescapes a path step.
///
/// `~1` becomes `/` and `~0` becomes `~`.
///
/// ```
/// use jsonwatch_path::unescape_step;
///
/// assert_eq!(unescape_step("a~0b"), "a~b");
/// assert_eq!(unescape_step("c~1d"), "c/d");
/// assert_eq!(unescape_step("plain"), "plain");
/// ```
pub fn unescape_step(step: &str) -> String {
    if !step.contains('~') {
        return step.to_string();
    }
    // ~1 first, otherwise "~01" would decode to "/"
    step.replace("~1", "/").replace("~0", "~")
}

/// Escapes a path step so it survives a round trip through [`format_path`].
///
/// ```
/// use jsonwatch_path::escape_step;
///
/// assert_eq!(escape_step("a~b"), "a~0b");
/// assert_eq!(escape_step("c/d"), "c~1d");
/// ```
pub fn escape_step(step: &str) -> String {
    if !step.contains('/') && !step.contains('~') {
        return step.to_string();
    }
    step.replace('~', "~0").replace('/', "~1")
}

/// Split a textual path into its steps without validating them.
///
/// The empty string (and a lone `/`) address the root.
///
/// ```
/// use jsonwatch_path::parse_path;
///
/// assert_eq!(parse_path(""), Vec::<String>::new());
/// assert_eq!(parse_path("/"), Vec::<String>::new());
/// assert_eq!(parse_path("temp"), vec!["temp"]);
/// assert_eq!(parse_path("/pid/kp"), vec!["pid", "kp"]);
/// ```
pub fn parse_path(text: &str) -> Path {
    let body = text.strip_prefix('/').unwrap_or(text);
    if body.is_empty() {
        return Vec::new();
    }
    body.split('/').map(unescape_step).collect()
}

/// Parse and validate a textual path.
///
/// # Errors
///
/// Returns [`PathError::EmptyStep`] for doubled or trailing separators and
/// [`PathError::PathTooLong`] for paths deeper than the supported maximum.
pub fn to_path(text: &str) -> Result<Path, PathError> {
    let path = parse_path(text);
    validate_path(&path)?;
    Ok(path)
}

/// Join path steps into their textual form.
///
/// ```
/// use jsonwatch_path::format_path;
///
/// assert_eq!(format_path(&[]), "");
/// assert_eq!(format_path(&["a/b".to_string(), "c".to_string()]), "a~1b/c");
/// ```
pub fn format_path(path: &[String]) -> String {
    let mut out = String::new();
    for (i, step) in path.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(&escape_step(step));
    }
    out
}

/// Join path steps with `.`, the column naming used by recorders.
///
/// No escaping is applied; the result is a display label, not an address.
pub fn dotted(path: &[String]) -> String {
    path.join(".")
}

/// Check if a path addresses the root.
pub fn is_root(path: &[String]) -> bool {
    path.is_empty()
}

/// Check if `child` lies strictly below `parent`.
///
/// ```
/// use jsonwatch_path::is_child;
///
/// let parent = vec!["pid".to_string()];
/// let child = vec!["pid".to_string(), "kp".to_string()];
/// assert!(is_child(&parent, &child));
/// assert!(!is_child(&child, &parent));
/// assert!(!is_child(&parent, &parent));
/// ```
pub fn is_child(parent: &[String], child: &[String]) -> bool {
    parent.len() < child.len() && child[..parent.len()] == *parent
}

/// Get the parent path of a given path.
///
/// # Errors
///
/// Returns [`PathError::NoParent`] for the root path.
pub fn parent(path: &[String]) -> Result<Path, PathError> {
    match path.split_last() {
        Some((_, rest)) => Ok(rest.to_vec()),
        None => Err(PathError::NoParent),
    }
}

/// Return a new path with `step` appended.
pub fn join(path: &[String], step: &str) -> Path {
    let mut out = Vec::with_capacity(path.len() + 1);
    out.extend_from_slice(path);
    out.push(step.to_string());
    out
}
