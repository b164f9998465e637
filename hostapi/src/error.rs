//! Host-side error types for the weft bridge.
//!
//! `HostError` covers every failure a host operation can surface to the
//! guest. At the boundary these are converted into exception handles and
//! delivered through the exception out-parameter, never as a native unwind.

use crate::http::BackendError;

/// Recoverable host operation error.
///
/// The guest observes these as an exception handle written to the
/// caller-supplied out-parameter; the message is what `debug_string`
/// reports for the exception value.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A handle resolved to a value of the wrong type for the operation.
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Request construction rejected the URL or options.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Header name or value failed validation.
    #[error("invalid header: {0}")]
    BadHeader(String),

    /// JSON parse or serialize failure.
    #[error("json error: {0}")]
    Json(String),

    /// Bytes crossing the boundary were not valid UTF-8.
    #[error("invalid utf-8")]
    Utf8,

    /// A closure was invoked after its environment was released.
    #[error("closure invoked after its environment was released")]
    ClosureReleased,

    /// The network backend failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl HostError {
    /// Shorthand for a type mismatch against a live handle's value.
    pub fn mismatch(expected: &'static str, actual: &'static str) -> Self {
        Self::TypeMismatch { expected, actual }
    }
}
