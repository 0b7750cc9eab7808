//! Shadow copies of script modules.
//!
//! Windows refuses to overwrite a DLL that is mapped into a process, and
//! on every platform the OS loader may hand back a cached mapping when the
//! same path is opened again. Loading a uniquely named copy avoids both:
//!
//! 1. Copy `<stem>.<ext>` to `<shadow_dir>/<stem>-<uuid>.<ext>`
//! 2. Load the copy instead of the build artifact
//! 3. Delete the copy once the module is unloaded
//! 4. Sweep copies left behind by crashed runs with [`ShadowCopies::cleanup_stale`]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rustc_hash::FxHashMap;
use uuid::Uuid;

/// Whether modules are loaded from a copy or in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowMode {
    /// Load a uniquely named copy.
    #[default]
    Copy,
    /// Load the build artifact directly.
    InPlace,
}

/// Tracks shadow copies that are currently loaded.
#[derive(Debug)]
pub struct ShadowCopies {
    /// Directory holding the copies.
    dir: PathBuf,

    mode: ShadowMode,

    /// Loaded copy → original module path.
    active: FxHashMap<PathBuf, PathBuf>,

    /// Age after which an inactive copy is considered stale.
    max_age: Duration,
}

impl ShadowCopies {
    pub fn new(dir: PathBuf, mode: ShadowMode) -> Self {
        Self {
            dir,
            mode,
            active: FxHashMap::default(),
            max_age: Duration::from_secs(3600),
        }
    }

    /// Set the age used by [`cleanup_stale`](Self::cleanup_stale).
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn mode(&self) -> ShadowMode {
        self.mode
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path to hand to the OS loader for `module`.
    pub fn prepare_for_load(&mut self, module: &Path) -> io::Result<PathBuf> {
        if self.mode == ShadowMode::InPlace {
            return Ok(module.to_path_buf());
        }

        fs::create_dir_all(&self.dir)?;

        let stem = module
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("script");
        let copy = match module.extension().and_then(|s| s.to_str()) {
            Some(ext) => self.dir.join(format!("{}-{}.{}", stem, Uuid::new_v4(), ext)),
            None => self.dir.join(format!("{}-{}", stem, Uuid::new_v4())),
        };

        fs::copy(module, &copy)?;
        self.active.insert(copy.clone(), module.to_path_buf());

        tracing::debug!("Shadow copy {} -> {}", module.display(), copy.display());
        Ok(copy)
    }

    /// Forget a copy after its library was closed, and delete it.
    ///
    /// Deletion failures are only logged; the sweep picks them up later.
    pub fn release(&mut self, opened: &Path) {
        if self.active.remove(opened).is_none() {
            return;
        }
        if let Err(e) = fs::remove_file(opened) {
            tracing::debug!("Could not remove shadow copy {}: {}", opened.display(), e);
        }
    }

    pub fn is_active(&self, path: &Path) -> bool {
        self.active.contains_key(path)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Delete inactive copies older than the configured max age.
    ///
    /// Returns how many files were removed.
    pub fn cleanup_stale(&self) -> io::Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let cutoff = SystemTime::now()
            .checked_sub(self.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut cleaned = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if self.active.contains_key(&path) {
                continue;
            }

            let is_old = fs::metadata(&path)
                .and_then(|m| m.modified())
                .is_ok_and(|modified| modified <= cutoff);

            if is_old && fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            tracing::info!("Removed {} stale shadow copies", cleaned);
        }
        Ok(cleaned)
    }
}
