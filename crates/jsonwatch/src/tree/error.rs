use jsonwatch_path::PathError;
use thiserror::Error;

/// Structural errors of the live tree.
///
/// These signal local programming or configuration mistakes and are
/// surfaced to the caller unchanged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    #[error("duplicate key {0:?}")]
    DuplicateKey(String),
    #[error("not found: {0:?}")]
    NotFound(String),
    #[error("not a node: {0:?}")]
    NotANode(String),
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("the root cannot be renamed or removed")]
    RootImmutable,
    #[error(transparent)]
    Path(#[from] PathError),
}
