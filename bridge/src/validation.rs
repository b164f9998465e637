//! Module validation — the export/import contract a guest must satisfy.
//!
//! Validation runs at load time, before any instantiation, so a guest that
//! cannot possibly work is rejected with a clear message instead of failing
//! mid-call.

use wasmtime::{ExternType, Module, RefType, ValType};

use crate::error::BridgeError;

/// Import module every host function lives under.
pub const IMPORT_MODULE: &str = "weft_host";

/// Required guest memory export.
pub const MEMORY_EXPORT: &str = "memory";

/// Required guest allocator export, `(i32) -> i32`.
pub const ALLOC_EXPORT: &str = "alloc";

/// Required guest function table export; trampolines and destructors are
/// resolved through it by index.
pub const TABLE_EXPORT: &str = "__indirect_function_table";

/// Check that a compiled module satisfies the guest contract.
pub fn validate_module(module: &Module) -> Result<(), BridgeError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

fn validate_exports(module: &Module) -> Result<(), BridgeError> {
    let mut has_memory = false;
    let mut has_alloc = false;
    let mut has_table = false;

    for export in module.exports() {
        match (export.name(), export.ty()) {
            (MEMORY_EXPORT, ExternType::Memory(_)) => has_memory = true,
            (ALLOC_EXPORT, ExternType::Func(func)) => {
                let params: Vec<ValType> = func.params().collect();
                let results: Vec<ValType> = func.results().collect();
                if !matches!(params.as_slice(), [ValType::I32])
                    || !matches!(results.as_slice(), [ValType::I32])
                {
                    return Err(BridgeError::Validation(format!(
                        "export '{ALLOC_EXPORT}' must be (i32) -> i32, got {func}"
                    )));
                }
                has_alloc = true;
            }
            (TABLE_EXPORT, ExternType::Table(table)) => {
                if !table.element().matches(&RefType::FUNCREF) {
                    return Err(BridgeError::Validation(format!(
                        "export '{TABLE_EXPORT}' must be a funcref table"
                    )));
                }
                has_table = true;
            }
            _ => {}
        }
    }

    if !has_memory {
        return Err(BridgeError::Validation(format!(
            "missing required export '{MEMORY_EXPORT}'"
        )));
    }
    if !has_alloc {
        return Err(BridgeError::Validation(format!(
            "missing required export '{ALLOC_EXPORT}'"
        )));
    }
    if !has_table {
        return Err(BridgeError::Validation(format!(
            "missing required export '{TABLE_EXPORT}'"
        )));
    }
    Ok(())
}

fn validate_imports(module: &Module) -> Result<(), BridgeError> {
    for import in module.imports() {
        let module_name = import.module();
        if module_name.starts_with("wasi") {
            return Err(BridgeError::Validation(format!(
                "WASI imports are not supported: {}::{}",
                module_name,
                import.name()
            )));
        }
        if module_name != IMPORT_MODULE {
            return Err(BridgeError::Validation(format!(
                "unknown import module '{}' (only '{IMPORT_MODULE}' is provided)",
                module_name
            )));
        }
        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(BridgeError::Validation(format!(
                "import {}::{} must be a function",
                module_name,
                import.name()
            )));
        }
    }
    Ok(())
}
