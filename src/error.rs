//! Typed errors for the build.
//!
//! Configuration errors abort the run before anything is mutated. Clustering
//! input errors are raised before the clustering collaborator is called.
//! Index lookups that miss are not errors at all; they return `Ok(false)`.

use std::path::PathBuf;
use thiserror::Error;

use crate::build::BuildState;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("source root is not configured")]
    MissingSourceRoot,

    #[error("source root {0} does not exist or is not a directory")]
    SourceNotDirectory(PathBuf),

    #[error("malformed exclusion manifest {path} at line {line}")]
    MalformedManifest { path: PathBuf, line: usize },

    #[error("malformed properties file {path} at line {line}")]
    MalformedProperties { path: PathBuf, line: usize },

    #[error("cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: BuildState, to: BuildState },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterInputError {
    #[error("{embeddings} embeddings but {labels} labels")]
    LengthMismatch { embeddings: usize, labels: usize },

    #[error("embedding {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        index: usize,
    },
}
