//! `weft-hostapi` — host object model and bridge state machines.
//!
//! This crate holds everything the weft bridge needs that does not touch
//! the WASM runtime:
//!
//! - `HostValue` — runtime-typed handle payload with a closed capability set
//! - `HandleTable` — arena mapping `u32` handles to host values
//! - `Pending` — deferred results and their ordered continuations
//! - `ClosureRecord` — guest callbacks wrapped with refcounted lifetime
//! - `HttpBackend` trait — the seam to the embedder's network stack
//! - `MockHttp` — in-memory backend for tests
//! - `HostError` — recoverable errors surfaced to guests as exceptions
//!
//! The `weft-bridge` crate wires these into a Wasmtime instance.

pub mod closure;
pub mod error;
pub mod handles;
pub mod http;
pub mod mock;
pub mod pending;
pub mod value;

// Re-export commonly used types at the crate root.
pub use closure::{ClosureRecord, ClosureRef, FireMode, InvokePlan, ReleaseAction};
pub use error::HostError;
pub use handles::{HandleTable, FALSE, FIRST_DYNAMIC, NULL, TRUE, UNDEFINED};
pub use http::{BackendError, Headers, HttpBackend, HttpRequest, RequestData, ResponseData};
pub use mock::MockHttp;
pub use pending::{Outcome, Pending, PendingRef, PendingState, Subscriber};
pub use value::{HostException, HostValue, PropertyMap};
