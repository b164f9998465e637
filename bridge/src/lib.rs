//! `weft-bridge` — Wasmtime embedding of the weft host/guest object bridge.
//!
//! A guest module talks to the host exclusively through `u32` handles and
//! the `weft_host` import module; the host talks back through guest memory,
//! the guest `alloc` export, and trampolines resolved in the guest's
//! exported function table. The pieces:
//!
//! - `memory` — bounds-checked linear memory access and the view cache
//! - `codec` — UTF-8 string transfer with the last-length register
//! - `state` — `BridgeState`, everything stored in the Wasmtime `Store`
//! - `linker` — the `weft_host` import surface
//! - `reactor` — FIFO task queue for pendings and closure fires
//! - `validation` — guest export/import contract checks
//! - `runtime` — `Bridge` (compiled module) and `Session` (live guest)
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft_bridge::{Bridge, BridgeConfig};
//! use weft_hostapi::MockHttp;
//!
//! # fn main() -> Result<(), weft_bridge::BridgeError> {
//! let bridge = Bridge::from_file("guest.wasm", BridgeConfig::default())?;
//! let mut session = bridge.instantiate(Arc::new(MockHttp::new()))?;
//! session.invoke("main", &[])?;
//! session.run_until_idle()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod linker;
pub mod memory;
pub mod reactor;
pub mod runtime;
pub mod state;
pub mod validation;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use reactor::Task;
pub use runtime::{Bridge, Session};
pub use state::{BridgeState, LogLine};
