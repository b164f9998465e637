//! Call adapter — every host capability registered on the Wasmtime linker.
//!
//! Guest-facing convention: handles and pointers travel as `i32`. Fallible
//! operations take a trailing `exnptr` pointing at two little-endian u32
//! words; on failure the adapter writes `{1, exception_handle}` there and
//! the integer return value is unspecified. The flag word is never written
//! on success — the guest zeroes it before the call. Host operation errors
//! never unwind into the guest; only marshalling errors (bad pointers,
//! invalid UTF-8, broken ABI) trap.

use std::cell::RefCell;
use std::rc::Rc;

use wasmtime::{Caller, Extern, Linker, Memory, TypedFunc};

use weft_hostapi::{
    ClosureRecord, FireMode, HostError, HostValue, Pending, ReleaseAction, RequestData, Subscriber,
};

use crate::codec;
use crate::error::BridgeError;
use crate::memory;
use crate::reactor::{self, Task};
use crate::state::BridgeState;
use crate::validation::{ALLOC_EXPORT, IMPORT_MODULE, MEMORY_EXPORT};

/// Register the full `weft_host` import module.
pub fn register_host_functions(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    register_object_drop(linker)?;
    register_object_clone(linker)?;
    register_string_new(linker)?;
    register_object_new(linker)?;
    register_object_set(linker)?;
    register_request_new(linker)?;
    register_request_headers(linker)?;
    register_headers_set(linker)?;
    register_fetch(linker)?;
    register_is_response(linker)?;
    register_response_json(linker)?;
    register_response_text(linker)?;
    register_promise_resolve(linker)?;
    register_promise_then(linker)?;
    register_promise_then2(linker)?;
    register_closure_new(linker)?;
    register_closure_drop(linker)?;
    register_json_parse(linker)?;
    register_json_serialize(linker)?;
    register_debug_string(linker)?;
    register_throw(linker)?;
    register_log(linker)?;
    Ok(())
}

/// Resolve the guest's exported memory from inside a host call.
fn caller_memory(caller: &mut Caller<'_, BridgeState>) -> Result<Memory, BridgeError> {
    match caller.get_export(MEMORY_EXPORT) {
        Some(Extern::Memory(mem)) => Ok(mem),
        _ => Err(BridgeError::MissingExport(MEMORY_EXPORT.to_string())),
    }
}

/// Resolve the guest allocator from inside a host call.
fn caller_alloc(caller: &mut Caller<'_, BridgeState>) -> Result<TypedFunc<i32, i32>, BridgeError> {
    match caller.get_export(ALLOC_EXPORT) {
        Some(Extern::Func(func)) => Ok(func.typed::<i32, i32>(&*caller)?),
        _ => Err(BridgeError::MissingExport(ALLOC_EXPORT.to_string())),
    }
}

/// Write `{1, exception_handle}` through the exception out-parameter.
fn deliver_exception(
    caller: &mut Caller<'_, BridgeState>,
    exnptr: i32,
    err: HostError,
) -> Result<(), BridgeError> {
    let mem = caller_memory(caller)?;
    let handle = caller
        .data_mut()
        .arena
        .alloc(HostValue::exception(err.to_string()));
    let mut words = [0u8; 8];
    words[..4].copy_from_slice(&1u32.to_le_bytes());
    words[4..].copy_from_slice(&handle.to_le_bytes());
    memory::write_bytes(mem.data_mut(&mut *caller), exnptr, &words)
}

/// Copy a host string into guest memory, returning `(ptr, len)`.
fn pass_string(
    caller: &mut Caller<'_, BridgeState>,
    text: &str,
) -> Result<(u32, u32), BridgeError> {
    let mem = caller_memory(caller)?;
    let alloc = caller_alloc(caller)?;
    codec::write_str(&mut *caller, &mem, &alloc, text)
}

fn register_object_drop(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "object_drop",
        |mut caller: Caller<'_, BridgeState>, handle: i32| {
            caller.data_mut().arena.drop_handle(handle as u32);
        },
    )?;
    Ok(())
}

fn register_object_clone(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "object_clone",
        |mut caller: Caller<'_, BridgeState>, handle: i32| -> i32 {
            let value = caller.data().arena.get(handle as u32).clone();
            caller.data_mut().arena.alloc(value) as i32
        },
    )?;
    Ok(())
}

fn register_string_new(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "string_new",
        |mut caller: Caller<'_, BridgeState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let mem = caller_memory(&mut caller)?;
            let text = codec::read_str(mem.data(&caller), ptr, len)?;
            Ok(caller.data_mut().arena.alloc(HostValue::string(text)) as i32)
        },
    )?;
    Ok(())
}

fn register_object_new(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "object_new",
        |mut caller: Caller<'_, BridgeState>| -> i32 {
            caller.data_mut().arena.alloc(HostValue::empty_object()) as i32
        },
    )?;
    Ok(())
}

fn register_object_set(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "object_set",
        |mut caller: Caller<'_, BridgeState>,
         obj: i32,
         key: i32,
         val: i32,
         exnptr: i32|
         -> anyhow::Result<i32> {
            // Key and value handles are consumed whether or not the set
            // succeeds, mirroring take-before-use on the guest side.
            let key = caller.data_mut().arena.take(key as u32);
            let value = caller.data_mut().arena.take(val as u32);
            let target = caller.data().arena.get(obj as u32).clone();
            let result = match key.expect_string() {
                Ok(name) => target.set_property(name, value),
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => Ok(1),
                Err(err) => {
                    deliver_exception(&mut caller, exnptr, err)?;
                    Ok(0)
                }
            }
        },
    )?;
    Ok(())
}

fn register_request_new(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "request_new",
        |mut caller: Caller<'_, BridgeState>,
         url_ptr: i32,
         url_len: i32,
         init: i32,
         exnptr: i32|
         -> anyhow::Result<i32> {
            let mem = caller_memory(&mut caller)?;
            let url = codec::read_str(mem.data(&caller), url_ptr, url_len)?;
            let init = caller.data_mut().arena.take(init as u32);
            match RequestData::new(&url, &init) {
                Ok(request) => {
                    let value = HostValue::Request(Rc::new(RefCell::new(request)));
                    Ok(caller.data_mut().arena.alloc(value) as i32)
                }
                Err(err) => {
                    deliver_exception(&mut caller, exnptr, err)?;
                    Ok(0)
                }
            }
        },
    )?;
    Ok(())
}

fn register_request_headers(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "request_headers",
        |mut caller: Caller<'_, BridgeState>, req: i32| -> anyhow::Result<i32> {
            let headers = {
                let request = caller
                    .data()
                    .arena
                    .get(req as u32)
                    .expect_request()
                    .map_err(BridgeError::Host)?
                    .clone();
                let headers = request.borrow().headers.clone();
                headers
            };
            // The handle aliases the request's headers; mutation through
            // either is visible through both.
            Ok(caller.data_mut().arena.alloc(HostValue::Headers(headers)) as i32)
        },
    )?;
    Ok(())
}

fn register_headers_set(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "headers_set",
        |mut caller: Caller<'_, BridgeState>,
         hdr: i32,
         key_ptr: i32,
         key_len: i32,
         val_ptr: i32,
         val_len: i32,
         exnptr: i32|
         -> anyhow::Result<()> {
            let mem = caller_memory(&mut caller)?;
            let data = mem.data(&caller);
            let name = codec::read_str(data, key_ptr, key_len)?;
            let value = codec::read_str(data, val_ptr, val_len)?;
            let result = match caller.data().arena.get(hdr as u32).expect_headers() {
                Ok(headers) => headers.borrow_mut().set(&name, &value),
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                deliver_exception(&mut caller, exnptr, err)?;
            }
            Ok(())
        },
    )?;
    Ok(())
}

fn register_fetch(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "fetch",
        |mut caller: Caller<'_, BridgeState>, req: i32| -> anyhow::Result<i32> {
            let request = caller
                .data()
                .arena
                .get(req as u32)
                .expect_request()
                .map_err(BridgeError::Host)?
                .clone();
            let state = caller.data_mut();
            let (pending, handle) = state.new_pending();
            state.schedule(Task::Http { request, pending });
            Ok(handle as i32)
        },
    )?;
    Ok(())
}

fn register_is_response(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "is_response",
        |caller: Caller<'_, BridgeState>, handle: i32| -> i32 {
            matches!(caller.data().arena.get(handle as u32), HostValue::Response(_)) as i32
        },
    )?;
    Ok(())
}

fn register_response_json(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "response_json",
        |mut caller: Caller<'_, BridgeState>, resp: i32, exnptr: i32| -> anyhow::Result<i32> {
            let response = match caller.data().arena.get(resp as u32).expect_response() {
                Ok(response) => response.clone(),
                Err(err) => {
                    deliver_exception(&mut caller, exnptr, err)?;
                    return Ok(0);
                }
            };
            let state = caller.data_mut();
            let (pending, handle) = state.new_pending();
            state.schedule(Task::ParseJson { response, pending });
            Ok(handle as i32)
        },
    )?;
    Ok(())
}

fn register_response_text(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "response_text",
        |mut caller: Caller<'_, BridgeState>, resp: i32, exnptr: i32| -> anyhow::Result<i32> {
            let response = match caller.data().arena.get(resp as u32).expect_response() {
                Ok(response) => response.clone(),
                Err(err) => {
                    deliver_exception(&mut caller, exnptr, err)?;
                    return Ok(0);
                }
            };
            let state = caller.data_mut();
            let (pending, handle) = state.new_pending();
            state.schedule(Task::ReadText { response, pending });
            Ok(handle as i32)
        },
    )?;
    Ok(())
}

fn register_promise_resolve(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "promise_resolve",
        |mut caller: Caller<'_, BridgeState>, handle: i32| -> i32 {
            let value = caller.data_mut().arena.take(handle as u32);
            let pending = match value {
                // Resolving with a pending adopts it rather than nesting.
                HostValue::Pending(inner) => inner,
                other => Pending::settled(Ok(other)),
            };
            caller.data_mut().arena.alloc(HostValue::Pending(pending)) as i32
        },
    )?;
    Ok(())
}

fn register_promise_then(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "promise_then",
        |mut caller: Caller<'_, BridgeState>, pending: i32, on_ok: i32| -> anyhow::Result<i32> {
            let upstream = caller
                .data()
                .arena
                .get(pending as u32)
                .expect_pending()
                .map_err(BridgeError::Host)?
                .clone();
            let callback = caller
                .data()
                .arena
                .get(on_ok as u32)
                .expect_closure()
                .map_err(BridgeError::Host)?
                .clone();
            let downstream = Pending::new();
            let sub = Subscriber {
                on_ok: Some(callback),
                on_err: None,
                downstream: downstream.clone(),
            };
            let state = caller.data_mut();
            reactor::attach(state, &upstream, sub);
            Ok(state.arena.alloc(HostValue::Pending(downstream)) as i32)
        },
    )?;
    Ok(())
}

fn register_promise_then2(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "promise_then2",
        |mut caller: Caller<'_, BridgeState>,
         pending: i32,
         on_ok: i32,
         on_err: i32|
         -> anyhow::Result<i32> {
            let upstream = caller
                .data()
                .arena
                .get(pending as u32)
                .expect_pending()
                .map_err(BridgeError::Host)?
                .clone();
            let ok_cb = caller
                .data()
                .arena
                .get(on_ok as u32)
                .expect_closure()
                .map_err(BridgeError::Host)?
                .clone();
            let err_cb = caller
                .data()
                .arena
                .get(on_err as u32)
                .expect_closure()
                .map_err(BridgeError::Host)?
                .clone();
            let downstream = Pending::new();
            let sub = Subscriber {
                on_ok: Some(ok_cb),
                on_err: Some(err_cb),
                downstream: downstream.clone(),
            };
            let state = caller.data_mut();
            reactor::attach(state, &upstream, sub);
            Ok(state.arena.alloc(HostValue::Pending(downstream)) as i32)
        },
    )?;
    Ok(())
}

fn register_closure_new(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "closure_new",
        |mut caller: Caller<'_, BridgeState>,
         fn_idx: i32,
         dtor_idx: i32,
         env_a: i32,
         env_b: i32,
         mode: i32|
         -> anyhow::Result<i32> {
            let mode = FireMode::from_raw(mode)
                .ok_or_else(|| BridgeError::Validation(format!("unknown fire mode {mode}")))?;
            // env_a == 0 is the released sentinel and cannot name a live
            // environment.
            if env_a == 0 {
                return Err(BridgeError::Validation(
                    "closure environment word must be non-zero".to_string(),
                )
                .into());
            }
            let record = ClosureRecord::new(fn_idx as u32, dtor_idx as u32, env_a, env_b, mode);
            let value = HostValue::Closure(Rc::new(RefCell::new(record)));
            Ok(caller.data_mut().arena.alloc(value) as i32)
        },
    )?;
    Ok(())
}

fn register_closure_drop(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "closure_drop",
        |mut caller: Caller<'_, BridgeState>, handle: i32| -> anyhow::Result<i32> {
            let value = caller.data_mut().arena.take(handle as u32);
            let closure = value.expect_closure().map_err(BridgeError::Host)?;
            let action = closure.borrow_mut().drop_ref();
            Ok(matches!(action, ReleaseAction::GuestFrees) as i32)
        },
    )?;
    Ok(())
}

fn register_json_parse(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "json_parse",
        |mut caller: Caller<'_, BridgeState>,
         ptr: i32,
         len: i32,
         exnptr: i32|
         -> anyhow::Result<i32> {
            let mem = caller_memory(&mut caller)?;
            let text = codec::read_str(mem.data(&caller), ptr, len)?;
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => Ok(caller.data_mut().arena.alloc(HostValue::Json(value)) as i32),
                Err(err) => {
                    deliver_exception(&mut caller, exnptr, HostError::Json(err.to_string()))?;
                    Ok(0)
                }
            }
        },
    )?;
    Ok(())
}

fn register_json_serialize(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "json_serialize",
        |mut caller: Caller<'_, BridgeState>, handle: i32, ptrptr: i32| -> anyhow::Result<i32> {
            let value = caller.data().arena.get(handle as u32).clone();
            let text = value
                .to_json()
                .map_err(BridgeError::Host)?
                .to_string();
            let (ptr, len) = pass_string(&mut caller, &text)?;
            let mem = caller_memory(&mut caller)?;
            memory::write_u32(mem.data_mut(&mut caller), ptrptr, ptr)?;
            Ok(len as i32)
        },
    )?;
    Ok(())
}

fn register_debug_string(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "debug_string",
        |mut caller: Caller<'_, BridgeState>, handle: i32, lenptr: i32| -> anyhow::Result<i32> {
            let text = caller.data().arena.get(handle as u32).debug_string();
            let (ptr, len) = pass_string(&mut caller, &text)?;
            let mem = caller_memory(&mut caller)?;
            memory::write_u32(mem.data_mut(&mut caller), lenptr, len)?;
            Ok(ptr as i32)
        },
    )?;
    Ok(())
}

fn register_throw(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "throw",
        |mut caller: Caller<'_, BridgeState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let mem = caller_memory(&mut caller)?;
            let message = codec::read_str(mem.data(&caller), ptr, len)?;
            Err(BridgeError::GuestThrow(message).into())
        },
    )?;
    Ok(())
}

fn register_log(linker: &mut Linker<BridgeState>) -> Result<(), BridgeError> {
    linker.func_wrap(
        IMPORT_MODULE,
        "log",
        |mut caller: Caller<'_, BridgeState>, level: i32, ptr: i32, len: i32| -> anyhow::Result<()> {
            let mem = caller_memory(&mut caller)?;
            let message = codec::read_str(mem.data(&caller), ptr, len)?;
            caller.data_mut().add_log(level as u32, message);
            Ok(())
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use std::sync::Arc;
    use wasmtime::{Engine, Module, Store};
    use weft_hostapi::MockHttp;

    // A module importing every host function with its exact signature;
    // instantiation fails if any registration is missing or mistyped.
    const FULL_IMPORT_SURFACE: &str = r#"
        (module
          (import "weft_host" "object_drop" (func (param i32)))
          (import "weft_host" "object_clone" (func (param i32) (result i32)))
          (import "weft_host" "string_new" (func (param i32 i32) (result i32)))
          (import "weft_host" "object_new" (func (result i32)))
          (import "weft_host" "object_set" (func (param i32 i32 i32 i32) (result i32)))
          (import "weft_host" "request_new" (func (param i32 i32 i32 i32) (result i32)))
          (import "weft_host" "request_headers" (func (param i32) (result i32)))
          (import "weft_host" "headers_set" (func (param i32 i32 i32 i32 i32 i32)))
          (import "weft_host" "fetch" (func (param i32) (result i32)))
          (import "weft_host" "is_response" (func (param i32) (result i32)))
          (import "weft_host" "response_json" (func (param i32 i32) (result i32)))
          (import "weft_host" "response_text" (func (param i32 i32) (result i32)))
          (import "weft_host" "promise_resolve" (func (param i32) (result i32)))
          (import "weft_host" "promise_then" (func (param i32 i32) (result i32)))
          (import "weft_host" "promise_then2" (func (param i32 i32 i32) (result i32)))
          (import "weft_host" "closure_new" (func (param i32 i32 i32 i32 i32) (result i32)))
          (import "weft_host" "closure_drop" (func (param i32) (result i32)))
          (import "weft_host" "json_parse" (func (param i32 i32 i32) (result i32)))
          (import "weft_host" "json_serialize" (func (param i32 i32) (result i32)))
          (import "weft_host" "debug_string" (func (param i32 i32) (result i32)))
          (import "weft_host" "throw" (func (param i32 i32)))
          (import "weft_host" "log" (func (param i32 i32 i32)))
          (memory (export "memory") 1)
          (table (export "__indirect_function_table") 4 funcref)
          (func (export "alloc") (param i32) (result i32) (i32.const 0)))
    "#;

    #[test]
    fn test_every_import_is_registered() {
        let engine = Engine::default();
        let module = Module::new(&engine, FULL_IMPORT_SURFACE).unwrap();
        let mut linker = Linker::new(&engine);
        register_host_functions(&mut linker).unwrap();

        let state = BridgeState::new(Arc::new(MockHttp::new()), BridgeConfig::default());
        let mut store = Store::new(&engine, state);
        linker.instantiate(&mut store, &module).unwrap();
    }
}
