//! Type definitions for tree paths.

use crate::{to_path, validate_path, PathError};

/// A single key along a path.
pub type PathStep = String;

/// An ordered key sequence from the root, exclusive of the root's own key.
pub type Path = Vec<PathStep>;

/// Anything that can name a tree entry.
///
/// Implemented for textual paths (`"settings/kd"`) and for already split
/// step lists, so lookups accept either form.
pub trait ToPath {
    fn to_path(&self) -> Result<Path, PathError>;
}

impl ToPath for str {
    fn to_path(&self) -> Result<Path, PathError> {
        to_path(self)
    }
}

impl ToPath for String {
    fn to_path(&self) -> Result<Path, PathError> {
        to_path(self)
    }
}

impl ToPath for [String] {
    fn to_path(&self) -> Result<Path, PathError> {
        validate_path(self)?;
        Ok(self.to_vec())
    }
}

impl ToPath for Vec<String> {
    fn to_path(&self) -> Result<Path, PathError> {
        self.as_slice().to_path()
    }
}

impl<const N: usize> ToPath for [&str; N] {
    fn to_path(&self) -> Result<Path, PathError> {
        let path: Path = self.iter().map(|s| s.to_string()).collect();
        validate_path(&path)?;
        Ok(path)
    }
}
