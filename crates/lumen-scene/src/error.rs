//! Error types for scene management

use thiserror::Error;

/// Scene construction errors
///
/// The registry deliberately performs very little validation; scene-level
/// consistency (dangling material ids, instances referencing meshes that were
/// never populated) is the caller's responsibility. Only violations that
/// would corrupt the registry's own bookkeeping are reported.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Mesh slots must be created in non-decreasing index order
    #[error("mesh index {index} skips ahead of the next free slot {next}")]
    NonSequentialMesh { index: usize, next: usize },

    /// Triangle refers to a vertex outside the supplied vertex array
    #[error("triangle {triangle} references vertex {vertex} but only {count} vertices were supplied")]
    VertexOutOfRange {
        triangle: usize,
        vertex: u32,
        count: usize,
    },

    /// Sky dome pixel data does not match the stated dimensions
    #[error("sky dome data has {got} texels, expected {expected}")]
    SkySizeMismatch { got: usize, expected: usize },
}

/// Result type for scene operations
pub type SceneResult<T> = Result<T, SceneError>;
