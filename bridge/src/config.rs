//! Bridge configuration.

/// Configuration for a [`Bridge`](crate::runtime::Bridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 256 pages = 16 MiB.
    pub max_memory_pages: u32,

    /// Optional Wasmtime fuel limit (instruction metering). `None`
    /// disables fuel accounting entirely.
    pub fuel_limit: Option<u64>,

    /// Whether to collect log lines from the guest `log` import.
    pub enable_guest_logs: bool,

    /// Maximum collected guest log lines; further lines are dropped.
    pub max_log_lines: usize,

    /// Maximum length of a single guest log line; longer lines are dropped.
    pub max_log_line_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256, // 16 MiB
            fuel_limit: None,
            enable_guest_logs: false,
            max_log_lines: 1024,
            max_log_line_len: 4096,
        }
    }
}
