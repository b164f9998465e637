//! Bridge and session — the embedding surface.
//!
//! A [`Bridge`] owns a compiled, validated module and its engine; it is
//! cheap to instantiate many times. A [`Session`] is one live guest: the
//! store holding [`BridgeState`], the instance, and the resolved required
//! exports. Guest calls go through [`Session::invoke`]; deferred work
//! settles when the embedder turns the event loop with
//! [`Session::run_until_idle`].

use std::path::Path;
use std::sync::Arc;

use wasmtime::{Config, Engine, Instance, Linker, Memory, Module, Store, Table, TypedFunc, Val};

use weft_hostapi::{HostValue, HttpBackend, Outcome};

use crate::codec;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::linker::register_host_functions;
use crate::memory;
use crate::reactor;
use crate::state::{BridgeState, LogLine};
use crate::validation::{self, ALLOC_EXPORT, MEMORY_EXPORT, TABLE_EXPORT};

/// A compiled and validated guest module.
pub struct Bridge {
    engine: Engine,
    module: Module,
    config: BridgeConfig,
}

impl Bridge {
    /// Compile and validate a guest module from bytes (binary or WAT).
    pub fn new(wasm: impl AsRef<[u8]>, config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm)?;
        validation::validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    /// Compile and validate a guest module from a file on disk.
    pub fn from_file(path: impl AsRef<Path>, config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine(&config)?;
        let module = Module::from_file(&engine, path)?;
        validation::validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    /// Instantiate a fresh session over `backend`.
    pub fn instantiate(&self, backend: Arc<dyn HttpBackend>) -> Result<Session, BridgeError> {
        let state = BridgeState::new(backend, self.config.clone());
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;
        let instance = linker.instantiate(&mut store, &self.module)?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| BridgeError::MissingExport(MEMORY_EXPORT.to_string()))?;
        let table = instance
            .get_table(&mut store, TABLE_EXPORT)
            .ok_or_else(|| BridgeError::MissingExport(TABLE_EXPORT.to_string()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, ALLOC_EXPORT)
            .map_err(|_| BridgeError::MissingExport(ALLOC_EXPORT.to_string()))?;

        // Seed the view cache with the initial buffer identity.
        let ident = memory::buffer_ident(&memory, &store);
        store.data_mut().views.note(ident);

        Ok(Session {
            store,
            instance,
            memory,
            table,
            alloc,
        })
    }
}

fn create_engine(config: &BridgeConfig) -> Result<Engine, BridgeError> {
    let mut cfg = Config::new();
    cfg.wasm_reference_types(true);
    cfg.wasm_threads(false);
    cfg.wasm_multi_memory(false);
    if config.fuel_limit.is_some() {
        cfg.consume_fuel(true);
    }
    Ok(Engine::new(&cfg)?)
}

/// One instantiated guest plus its store, arena, and task queue.
pub struct Session {
    store: Store<BridgeState>,
    instance: Instance,
    memory: Memory,
    table: Table,
    alloc: TypedFunc<i32, i32>,
}

impl Session {
    /// Call an exported guest function with `i32` arguments.
    ///
    /// Returns the first result, if the export has one.
    pub fn invoke(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, BridgeError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| BridgeError::MissingExport(name.to_string()))?;
        let params: Vec<Val> = args.iter().map(|&a| Val::I32(a)).collect();
        let result_count = func.ty(&self.store).results().len();
        let mut results = vec![Val::I32(0); result_count];
        func.call(&mut self.store, &params, &mut results)
            .map_err(handle_trap)?;
        Ok(results.first().and_then(|v| v.i32()))
    }

    /// Copy a host string into guest memory, returning `(ptr, len)`.
    pub fn pass_string(&mut self, text: &str) -> Result<(u32, u32), BridgeError> {
        codec::write_str(&mut self.store, &self.memory, &self.alloc, text)
    }

    /// Byte length of the last string transferred to the guest.
    pub fn last_string_len(&self) -> u32 {
        self.store.data().codec.last_len
    }

    /// Decode a guest string at `(ptr, len)`.
    pub fn read_string(&self, ptr: i32, len: i32) -> Result<String, BridgeError> {
        codec::read_str(self.memory.data(&self.store), ptr, len)
    }

    /// Write raw bytes into guest memory.
    pub fn write_memory(&mut self, ptr: i32, data: &[u8]) -> Result<(), BridgeError> {
        memory::write_bytes(self.memory.data_mut(&mut self.store), ptr, data)
    }

    /// Read a little-endian u32 word from guest memory.
    pub fn read_word(&self, ptr: i32) -> Result<u32, BridgeError> {
        memory::read_u32(self.memory.data(&self.store), ptr)
    }

    /// Drain the task queue: run backend calls, settle pendings, fire
    /// continuations. Returns the number of tasks processed.
    pub fn run_until_idle(&mut self) -> Result<usize, BridgeError> {
        reactor::drain(&mut self.store, &self.table)
    }

    /// Invoke a wrapped guest closure from the host side.
    pub fn fire_closure(&mut self, handle: u32, arg: HostValue) -> Result<Outcome, BridgeError> {
        let callback = self
            .store
            .data()
            .arena
            .get(handle)
            .expect_closure()
            .map_err(BridgeError::Host)?
            .clone();
        reactor::invoke(&mut self.store, &self.table, &callback, arg)
    }

    pub fn state(&self) -> &BridgeState {
        self.store.data()
    }

    pub fn state_mut(&mut self) -> &mut BridgeState {
        self.store.data_mut()
    }

    /// Drain collected guest log lines.
    pub fn take_logs(&mut self) -> Vec<LogLine> {
        self.store.data_mut().take_logs()
    }
}

fn handle_trap(err: anyhow::Error) -> BridgeError {
    for cause in err.chain() {
        if let Some(BridgeError::GuestThrow(message)) = cause.downcast_ref::<BridgeError>() {
            return BridgeError::GuestThrow(message.clone());
        }
    }
    BridgeError::GuestTrapped(err.to_string())
}
