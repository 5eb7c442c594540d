//! Error types for the render core

use thiserror::Error;

/// Render-core errors
///
/// Only accelerator/device-level failures surface here: there is no defined
/// partial-frame recovery, so they are fatal to the frame that raised them.
/// Path-level anomalies (invalid sampling pdfs, NaNs from degenerate
/// geometry) are treated as ordinary path termination, not errors, and the
/// shadow-buffer overflow is recovered internally by the proactive flush.
#[derive(Error, Debug)]
pub enum TraceError {
    /// Intersection query failed
    #[error("intersection query failed: {0}")]
    Intersection(String),

    /// Scene registry rejected a setup call
    #[error(transparent)]
    Scene(#[from] lumen_scene::SceneError),

    /// Render was called before the target was sized
    #[error("render target has not been sized; call resize() first")]
    NoTarget,

    /// Results were read while an asynchronous frame was still in flight
    #[error("an asynchronous frame is in flight; call wait_for_render() first")]
    FrameInFlight,

    /// The dedicated render thread is gone
    #[error("render worker thread terminated unexpectedly")]
    WorkerLost,
}

/// Result type for render-core operations
pub type TraceResult<T> = Result<T, TraceError>;
