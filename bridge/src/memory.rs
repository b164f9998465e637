//! Guest linear memory access — bounds-checked helpers and the view cache.
//!
//! All read/write helpers validate pointer and length arguments against the
//! guest's linear memory before touching it. Out-of-bounds access is a
//! marshalling error: it traps the guest rather than producing a
//! recoverable exception.
//!
//! [`ViewCache`] tracks the identity of the backing buffer. Guest memory
//! growth reallocates the buffer, so no caller may hold a data slice across
//! a call that can grow memory (the guest `alloc` export, `memory.grow`);
//! adapter code notes the current identity after any such call and refetches
//! the slice.

use wasmtime::{AsContext, Memory};

use crate::error::BridgeError;

/// Identity of the guest's backing buffer: base address and length.
pub type BufferIdent = (usize, usize);

/// Current identity of a memory's backing buffer.
pub fn buffer_ident(memory: &Memory, ctx: impl AsContext) -> BufferIdent {
    (memory.data_ptr(&ctx) as usize, memory.data_size(&ctx))
}

/// Cached view identity over the guest's linear memory.
///
/// A view built from one buffer identity must not be dereferenced once the
/// identity changes; `note` reports whether a rebuild happened so callers
/// can refetch.
#[derive(Debug, Default)]
pub struct ViewCache {
    ident: Option<BufferIdent>,
    rebuilds: u64,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current buffer identity. Returns true when the identity
    /// changed and cached views had to be rebuilt.
    pub fn note(&mut self, ident: BufferIdent) -> bool {
        if self.ident == Some(ident) {
            return false;
        }
        self.ident = Some(ident);
        self.rebuilds += 1;
        true
    }

    /// Convenience wrapper over [`note`](Self::note) reading the identity
    /// from the memory itself.
    pub fn refresh(&mut self, memory: &Memory, ctx: impl AsContext) -> bool {
        self.note(buffer_ident(memory, ctx))
    }

    /// Number of times the cached identity changed.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

/// Read `len` bytes from guest memory at `ptr`.
pub fn read_bytes(mem: &[u8], ptr: i32, len: i32) -> Result<Vec<u8>, BridgeError> {
    if ptr < 0 || len < 0 {
        return Err(out_of_bounds(ptr, len));
    }
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or_else(|| out_of_bounds(ptr, len))?;
    if end > mem.len() {
        return Err(out_of_bounds(ptr, len));
    }
    Ok(mem[start..end].to_vec())
}

/// Write `data` to guest memory at `ptr`.
pub fn write_bytes(mem: &mut [u8], ptr: i32, data: &[u8]) -> Result<(), BridgeError> {
    if ptr < 0 {
        return Err(out_of_bounds(ptr, data.len() as i32));
    }
    let start = ptr as usize;
    let end = start
        .checked_add(data.len())
        .ok_or_else(|| out_of_bounds(ptr, data.len() as i32))?;
    if end > mem.len() {
        return Err(out_of_bounds(ptr, data.len() as i32));
    }
    mem[start..end].copy_from_slice(data);
    Ok(())
}

/// Read a little-endian u32 word from guest memory at `ptr`.
pub fn read_u32(mem: &[u8], ptr: i32) -> Result<u32, BridgeError> {
    let bytes = read_bytes(mem, ptr, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Write a little-endian u32 word to guest memory at `ptr`.
pub fn write_u32(mem: &mut [u8], ptr: i32, value: u32) -> Result<(), BridgeError> {
    write_bytes(mem, ptr, &value.to_le_bytes())
}

fn out_of_bounds(ptr: i32, len: i32) -> BridgeError {
    BridgeError::Memory(format!("out-of-bounds access at ptr={ptr} len={len}"))
}
