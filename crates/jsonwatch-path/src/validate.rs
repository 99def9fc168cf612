//! Validation of tree paths.

use crate::PathError;

/// Maximum supported nesting depth.
pub const MAX_PATH_DEPTH: usize = 64;

/// Validate a path (list of steps).
///
/// # Errors
///
/// Returns an error if:
/// - the path is deeper than [`MAX_PATH_DEPTH`]
/// - any step is empty (the empty key is reserved for the root)
///
/// ```
/// use jsonwatch_path::validate_path;
///
/// validate_path(&["pid".to_string(), "kp".to_string()]).unwrap();
/// validate_path(&["pid".to_string(), String::new()]).unwrap_err();
/// ```
pub fn validate_path(path: &[String]) -> Result<(), PathError> {
    if path.len() > MAX_PATH_DEPTH {
        return Err(PathError::PathTooLong);
    }
    if let Some(pos) = path.iter().position(|step| step.is_empty()) {
        return Err(PathError::EmptyStep(pos));
    }
    Ok(())
}
