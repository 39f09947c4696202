//! Module-loading seam.
//!
//! # Responsibilities
//! - Resolve a named entry point from a library path
//! - Keep the core independent of any particular loading mechanism
//!
//! # Design Decisions
//! - `BuiltinLoader` is an in-process symbol table; it backs the bundled
//!   modules and doubles as the fake loader in tests
//! - Lookups are by (library, symbol), mirroring a dynamic loader

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::inspect::error::LoadError;
use crate::inspect::module::{module_fn, EntryPoint, ModuleArgument};
use crate::inspect::record::{StatusCode, TransferRecord};
use crate::modules::dump::DumpModule;

/// Library path under which the bundled modules are registered.
pub const BUILTIN_LIBRARY: &str = "builtin";

/// Resolves module entry points.
pub trait ModuleLoader: Send + Sync {
    fn resolve(&self, library: &Path, symbol: &str) -> Result<EntryPoint, LoadError>;
}

/// In-process module table.
#[derive(Default)]
pub struct BuiltinLoader {
    libraries: HashMap<PathBuf, HashMap<String, EntryPoint>>,
}

impl BuiltinLoader {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table with every bundled module under `BUILTIN_LIBRARY`.
    pub fn with_builtins() -> Self {
        let mut loader = Self::new();
        loader.register(BUILTIN_LIBRARY, "dump", Arc::new(DumpModule::new()));
        loader
    }

    /// Register `module` as `symbol` in `library`, replacing any previous entry.
    pub fn register(&mut self, library: impl Into<PathBuf>, symbol: impl Into<String>, module: EntryPoint) {
        self.libraries
            .entry(library.into())
            .or_default()
            .insert(symbol.into(), module);
    }

    /// Register a closure entry point.
    pub fn register_fn<F>(&mut self, library: impl Into<PathBuf>, symbol: impl Into<String>, f: F)
    where
        F: Fn(&TransferRecord<'_>, &[ModuleArgument]) -> StatusCode + Send + Sync + 'static,
    {
        self.register(library, symbol, module_fn(f));
    }

    /// Close every registered module. Called once at process shutdown.
    pub fn close_all(&self) {
        for (library, symbols) in &self.libraries {
            for (symbol, module) in symbols {
                tracing::debug!(library = %library.display(), symbol = %symbol, "Closing module");
                module.close();
            }
        }
    }
}

impl ModuleLoader for BuiltinLoader {
    fn resolve(&self, library: &Path, symbol: &str) -> Result<EntryPoint, LoadError> {
        let symbols = self
            .libraries
            .get(library)
            .ok_or_else(|| LoadError::LibraryNotFound(library.to_path_buf()))?;

        symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| LoadError::SymbolNotFound {
                library: library.to_path_buf(),
                symbol: symbol.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let mut loader = BuiltinLoader::new();
        loader.register_fn("/opt/mods/libids.so", "ids", |_, _| StatusCode::Ok);

        assert!(loader.resolve(Path::new("/opt/mods/libids.so"), "ids").is_ok());
        assert_eq!(
            loader.resolve(Path::new("/opt/mods/libids.so"), "dump").err(),
            Some(LoadError::SymbolNotFound {
                library: PathBuf::from("/opt/mods/libids.so"),
                symbol: "dump".into(),
            })
        );
        assert_eq!(
            loader.resolve(Path::new("/missing.so"), "ids").err(),
            Some(LoadError::LibraryNotFound(PathBuf::from("/missing.so")))
        );
    }

    #[test]
    fn test_builtins_present() {
        let loader = BuiltinLoader::with_builtins();
        assert!(loader.resolve(Path::new(BUILTIN_LIBRARY), "dump").is_ok());
    }
}
