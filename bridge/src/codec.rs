//! String codec — UTF-8 transfer between host strings and guest memory.
//!
//! Host→guest transfer calls back into the guest `alloc` export for a
//! buffer, then copies the bytes in. `alloc` can grow linear memory, so the
//! view cache is re-noted after the call and the data slice is fetched
//! fresh. The byte length of the last transferred string is parked in
//! `CodecState::last_len` for imports whose ABI returns only the pointer.

use wasmtime::{AsContextMut, Memory, TypedFunc};

use crate::error::BridgeError;
use crate::memory;
use crate::state::BridgeState;

/// Copy `text` into guest memory via the guest allocator.
///
/// Returns `(ptr, len)` and records `len` as the last transferred length.
pub fn write_str<C>(
    mut ctx: C,
    mem: &Memory,
    alloc: &TypedFunc<i32, i32>,
    text: &str,
) -> Result<(u32, u32), BridgeError>
where
    C: AsContextMut<Data = BridgeState>,
{
    let bytes = text.as_bytes();
    let len = bytes.len() as u32;
    let ptr = alloc.call(&mut ctx, bytes.len() as i32)?;

    // The allocator may have grown memory; re-note the buffer identity
    // and fetch the slice only afterwards.
    let ident = memory::buffer_ident(mem, &ctx);
    ctx.as_context_mut().data_mut().views.note(ident);

    memory::write_bytes(mem.data_mut(&mut ctx), ptr, bytes)?;
    ctx.as_context_mut().data_mut().codec.last_len = len;
    Ok((ptr as u32, len))
}

/// Decode a guest string at `(ptr, len)`.
///
/// Invalid UTF-8 is a marshalling error and traps the guest.
pub fn read_str(data: &[u8], ptr: i32, len: i32) -> Result<String, BridgeError> {
    let bytes = memory::read_bytes(data, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| BridgeError::Utf8)
}
