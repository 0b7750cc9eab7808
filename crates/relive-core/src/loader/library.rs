//! libloading-backed module loader.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use libloading::{Library, Symbol};

use super::shadow::{ShadowCopies, ShadowMode};
use super::{GuardedEntryFn, LoadError, ModuleHandle, ModuleLoader, ScriptEntryFn};

/// Loads script modules with the platform's dynamic loader.
pub struct LibraryLoader {
    shadow: Mutex<ShadowCopies>,
}

impl LibraryLoader {
    /// Create a loader keeping shadow copies in `shadow_dir`.
    pub fn new(shadow_dir: impl Into<PathBuf>, mode: ShadowMode) -> Self {
        Self {
            shadow: Mutex::new(ShadowCopies::new(shadow_dir.into(), mode)),
        }
    }

    /// A loader that opens build artifacts directly.
    pub fn in_place() -> Self {
        Self::new(PathBuf::new(), ShadowMode::InPlace)
    }

    fn shadow(&self) -> MutexGuard<'_, ShadowCopies> {
        self.shadow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delete shadow copies left behind by earlier runs.
    pub fn cleanup_stale_copies(&self) -> std::io::Result<usize> {
        self.shadow().cleanup_stale()
    }

    /// Number of shadow copies currently mapped.
    pub fn active_copies(&self) -> usize {
        self.shadow().active_count()
    }
}

impl ModuleLoader for LibraryLoader {
    fn load(&self, path: &Path) -> Result<ModuleHandle, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let opened = self
            .shadow()
            .prepare_for_load(path)
            .map_err(|source| LoadError::Shadow {
                path: path.to_path_buf(),
                source,
            })?;

        // Safety: loading runs the module's initializers. Script modules
        // are built by us from the user's own sources.
        match unsafe { Library::new(&opened) } {
            Ok(library) => {
                tracing::debug!("Loaded {}", opened.display());
                Ok(ModuleHandle::from_library(path.to_path_buf(), opened, library))
            }
            Err(e) => {
                self.shadow().release(&opened);
                Err(LoadError::Open {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn resolve_entry(&self, handle: &ModuleHandle, symbol: &str) -> Result<ScriptEntryFn, LoadError> {
        // Safety: the ABI contract fixes the entry signature.
        unsafe { lookup(handle, symbol) }
    }

    fn resolve_guarded(
        &self,
        handle: &ModuleHandle,
        symbol: &str,
    ) -> Result<GuardedEntryFn, LoadError> {
        // Safety: guards are generated by the compiler with this signature.
        unsafe { lookup(handle, symbol) }
    }

    fn unload(&self, handle: &mut ModuleHandle) {
        let Some(library) = handle.close() else {
            return;
        };

        if let Err(e) = library.close() {
            tracing::warn!("Failed to close {}: {}", handle.opened_path().display(), e);
        }
        self.shadow().release(handle.opened_path());
        tracing::debug!("Unloaded {}", handle.path().display());
    }
}

/// Copy a function pointer of type `T` out of a loaded module.
///
/// # Safety
/// `T` must match the exported symbol's real type. The pointer is only
/// valid while `handle` stays loaded.
unsafe fn lookup<T: Copy>(handle: &ModuleHandle, symbol: &str) -> Result<T, LoadError> {
    let library = handle.library().ok_or_else(|| LoadError::NotLoaded {
        path: handle.path().to_path_buf(),
    })?;

    let found: Symbol<T> = unsafe { library.get(symbol.as_bytes()) }.map_err(|_| {
        LoadError::MissingSymbol {
            path: handle.path().to_path_buf(),
            symbol: symbol.to_string(),
        }
    })?;

    Ok(*found)
}
