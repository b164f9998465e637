//! Bridge error types.

use weft_hostapi::HostError;

/// Top-level error type for the bridge crate.
///
/// These are embedding-side failures. Host operation errors that the guest
/// can recover from never appear here — they travel through the exception
/// out-parameter as handles (see `linker`).
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Wasmtime engine, compilation, or instantiation error.
    #[error("wasmtime error: {0}")]
    Wasmtime(anyhow::Error),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    Validation(String),

    /// A required guest export is missing or has the wrong shape.
    #[error("missing guest export: {0}")]
    MissingExport(String),

    /// Guest memory access was out of bounds.
    #[error("memory error: {0}")]
    Memory(String),

    /// Bytes read from guest memory were not valid UTF-8.
    #[error("invalid utf-8 in guest string")]
    Utf8,

    /// Host-side operation error escaping through an infallible path.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// The guest raised an exception through the `throw` import.
    #[error("guest exception: {0}")]
    GuestThrow(String),

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        Self::Wasmtime(err)
    }
}
