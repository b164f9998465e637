//! Per-instance bridge state stored inside the Wasmtime `Store`.

use std::collections::VecDeque;
use std::sync::Arc;

use wasmtime::{StoreLimits, StoreLimitsBuilder};
use weft_hostapi::{HandleTable, HostValue, HttpBackend, Pending, PendingRef};

use crate::config::BridgeConfig;
use crate::memory::ViewCache;
use crate::reactor::Task;

/// One guest log line captured through the `log` import.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub level: u32,
    pub message: String,
}

/// String codec scratch state.
///
/// `last_len` mirrors the glue convention of returning (ptr, len) through a
/// return value plus a side register: `string_new` style imports hand the
/// pointer back and the guest fetches the length separately.
#[derive(Debug, Default)]
pub struct CodecState {
    pub last_len: u32,
}

/// Everything a live bridge instance owns besides the Wasmtime objects.
///
/// Lives in `Store<BridgeState>` so host import closures reach it through
/// `Caller::data_mut`.
pub struct BridgeState {
    /// Handle arena shared between host and guest.
    pub arena: HandleTable,
    /// String passing scratch.
    pub codec: CodecState,
    /// Cached linear memory view identity.
    pub views: ViewCache,
    /// FIFO task queue drained by the reactor between guest calls.
    pub tasks: VecDeque<Task>,
    /// Embedder's network stack.
    pub backend: Arc<dyn HttpBackend>,
    /// Captured guest log lines (bounded, see config).
    pub logs: Vec<LogLine>,
    /// Resource limits enforced by the store (memory page cap).
    pub limits: StoreLimits,
    pub config: BridgeConfig,
}

impl BridgeState {
    pub fn new(backend: Arc<dyn HttpBackend>, config: BridgeConfig) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_pages as usize * 65536)
            .build();
        Self {
            arena: HandleTable::new(),
            codec: CodecState::default(),
            views: ViewCache::new(),
            tasks: VecDeque::new(),
            backend,
            logs: Vec::new(),
            limits,
            config,
        }
    }

    /// Queue a task for the next reactor drain.
    pub fn schedule(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    /// Create a fresh waiting pending result and hand out its handle.
    pub fn new_pending(&mut self) -> (PendingRef, u32) {
        let pending = Pending::new();
        let handle = self.arena.alloc(HostValue::Pending(pending.clone()));
        (pending, handle)
    }

    /// Capture a guest log line, subject to configured caps.
    pub fn add_log(&mut self, level: u32, message: String) {
        if !self.config.enable_guest_logs {
            return;
        }
        if self.logs.len() >= self.config.max_log_lines {
            return;
        }
        if message.len() > self.config.max_log_line_len {
            return;
        }
        self.logs.push(LogLine { level, message });
    }

    /// Drain and return the captured log lines.
    pub fn take_logs(&mut self) -> Vec<LogLine> {
        std::mem::take(&mut self.logs)
    }
}
