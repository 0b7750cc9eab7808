//! Dynamic module loading.
//!
//! The orchestrator only talks to the [`ModuleLoader`] trait, so it never
//! branches on platform. [`LibraryLoader`] is the libloading backend used
//! in production; tests plug in their own implementations.
//!
//! # Module ABI
//!
//! A script module exports exactly one function the host cares about:
//!
//! ```ignore
//! #[no_mangle]
//! pub extern "C-unwind" fn relive_script_main(scheduler: *const std::ffi::c_void) {
//!     // ...
//! }
//! ```
//!
//! The argument is an opaque pointer to the [`Scheduler`](crate::graph::Scheduler)
//! running the reload, valid for the duration of the call.
//!
//! A fault raised inside a module cannot unwind into the host: the module
//! carries its own language runtime, and the host aborts on foreign
//! exceptions. The compiler therefore also builds a guard into every
//! module, exported as `<entry>_guarded` (see [`GuardedEntryFn`]), which
//! catches the fault on the module's side and hands back a status and a
//! message. The host prefers the guard and only calls the bare entry when
//! a module has none.

mod library;
mod shadow;

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;

pub use library::LibraryLoader;
pub use shadow::{ShadowCopies, ShadowMode};

/// Name of the entry point every script module must export.
pub const ENTRY_SYMBOL: &str = "relive_script_main";

/// Signature of the script entry point.
pub type ScriptEntryFn = unsafe extern "C-unwind" fn(*const c_void);

/// Signature of the guard exported around the entry point.
///
/// Arguments are the scheduler pointer, a message buffer, its capacity and
/// an out-parameter for the message length. Returns 0 when the entry
/// returned normally; otherwise the fault message (truncated to the
/// capacity) is in the buffer and the status is nonzero.
pub type GuardedEntryFn = unsafe extern "C" fn(*const c_void, *mut u8, usize, *mut usize) -> i32;

/// Name of the guard exported next to the entry point `entry`.
pub fn guard_symbol(entry: &str) -> String {
    format!("{}_guarded", entry)
}

/// Loader failures. All of them leave the process in a usable state.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module file does not exist.
    #[error("module not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The OS loader rejected the file.
    #[error("failed to load module {}: {message}", path.display())]
    Open { path: PathBuf, message: String },

    /// The module does not export the requested symbol.
    #[error("entry symbol '{symbol}' not found in {}", path.display())]
    MissingSymbol { path: PathBuf, symbol: String },

    /// The handle was already unloaded.
    #[error("module {} is not loaded", path.display())]
    NotLoaded { path: PathBuf },

    /// The shadow copy of the module could not be created.
    #[error("failed to copy module {}: {source}", path.display())]
    Shadow {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A loaded (or formerly loaded) module.
///
/// Dropping a live handle closes the library as well, but the reload
/// path always goes through [`ModuleLoader::unload`] so that ordering is
/// explicit.
#[derive(Debug)]
pub struct ModuleHandle {
    /// Build artifact the module was loaded from
    path: PathBuf,
    /// File actually handed to the OS loader (a shadow copy or `path`)
    opened_path: PathBuf,
    library: Option<Library>,
    live: bool,
}

impl ModuleHandle {
    pub(crate) fn from_library(path: PathBuf, opened_path: PathBuf, library: Library) -> Self {
        Self {
            path,
            opened_path,
            library: Some(library),
            live: true,
        }
    }

    /// A live handle with no OS library behind it, for loaders that
    /// manage modules some other way.
    pub fn detached(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            opened_path: path.clone(),
            path,
            library: None,
            live: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn opened_path(&self) -> &Path {
        &self.opened_path
    }

    /// Whether the module is still loaded.
    pub fn is_loaded(&self) -> bool {
        self.live
    }

    pub(crate) fn library(&self) -> Option<&Library> {
        self.library.as_ref()
    }

    /// Mark the handle unloaded and hand back the library, if any.
    ///
    /// Returns `None` on every call after the first.
    pub fn close(&mut self) -> Option<Library> {
        self.live = false;
        self.library.take()
    }
}

/// Opens modules, resolves their entry point, and closes them.
pub trait ModuleLoader: Send + Sync {
    /// Open the module at `path`. Must fail cleanly for missing or invalid files.
    fn load(&self, path: &Path) -> Result<ModuleHandle, LoadError>;

    /// Look up an exported function with the script entry signature.
    ///
    /// The returned pointer is only valid while `handle` stays loaded.
    fn resolve_entry(&self, handle: &ModuleHandle, symbol: &str) -> Result<ScriptEntryFn, LoadError>;

    /// Look up an exported guard with the [`GuardedEntryFn`] signature.
    ///
    /// Loaders that never see compiled modules can keep the default, which
    /// reports the guard as missing.
    fn resolve_guarded(
        &self,
        handle: &ModuleHandle,
        symbol: &str,
    ) -> Result<GuardedEntryFn, LoadError> {
        Err(LoadError::MissingSymbol {
            path: handle.path().to_path_buf(),
            symbol: symbol.to_string(),
        })
    }

    /// Close the module. Idempotent on an already unloaded handle.
    fn unload(&self, handle: &mut ModuleHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle_close_is_idempotent() {
        let mut handle = ModuleHandle::detached("scripts/a.so");
        assert!(handle.is_loaded());
        assert_eq!(handle.path(), handle.opened_path());

        assert!(handle.close().is_none());
        assert!(!handle.is_loaded());
        assert!(handle.close().is_none());
        assert!(!handle.is_loaded());
    }

    #[test]
    fn test_load_error_messages() {
        let err = LoadError::MissingSymbol {
            path: PathBuf::from("a.so"),
            symbol: ENTRY_SYMBOL.to_string(),
        };
        assert_eq!(
            err.to_string(),
            "entry symbol 'relive_script_main' not found in a.so"
        );
    }

    #[test]
    fn test_guard_symbol() {
        assert_eq!(guard_symbol(ENTRY_SYMBOL), "relive_script_main_guarded");
    }
}
