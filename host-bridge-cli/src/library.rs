//! Loading a real host from a shared library
//!
//! The library exports a function returning its callback table:
//!
//! ```c
//! HostCallbackTable host_bridge_callback_table(void);
//! ```

use anyhow::{Context, Result};
use host_bridge::{HostCallbackTable, HostCallbacks};
use libloading::{Library, Symbol};
use std::path::Path;

/// Symbol looked up when the profile does not name one
pub const DEFAULT_SYMBOL: &str = "host_bridge_callback_table";

type TableFn = unsafe extern "C" fn() -> HostCallbackTable;

pub struct HostLibrary {
    // Declared before `_library` so the table is dropped before unloading.
    callbacks: HostCallbacks,
    _library: Library,
}

impl HostLibrary {
    /// Load `path` and read its callback table through `symbol`
    pub fn load(path: &Path, symbol: &str) -> Result<Self> {
        log::info!("Loading host library: {:?}", path);

        // SAFETY: loading runs the library's initialisers; the user chose it.
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("Failed to load host library: {:?}", path))?;

        let table = unsafe {
            let table_fn: Symbol<TableFn> = library
                .get(symbol.as_bytes())
                .with_context(|| format!("Symbol {} not found in {:?}", symbol, path))?;
            table_fn()
        };

        // SAFETY: the entries point into `library`, which outlives `callbacks`.
        let callbacks = unsafe { HostCallbacks::from_table(&table) };
        log::debug!("Host library capabilities: {:?}", callbacks.available());

        Ok(Self {
            callbacks,
            _library: library,
        })
    }

    pub fn callbacks(&self) -> &HostCallbacks {
        &self.callbacks
    }
}
