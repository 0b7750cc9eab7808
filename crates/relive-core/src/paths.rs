//! Script directory layout.
//!
//! Gives the library and the CLI one definition of where sources, built
//! modules and shadow copies live.

use std::fs;
use std::path::PathBuf;

use crate::error::Result;

/// Directory structure for a scripts directory.
///
/// Sources and built modules sit side by side; relive's own files are
/// kept under a hidden `.relive` directory:
///
/// ```text
/// src/scripts/
/// ├── player.rs      # script source
/// ├── player.so      # built module
/// └── .relive/
///     └── shadow/    # copies of loaded modules
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDirs {
    /// Directory holding script sources and modules.
    pub scripts_dir: PathBuf,

    /// The `.relive` directory itself.
    pub relive_dir: PathBuf,

    /// Where loaded modules are copied to.
    pub shadow_dir: PathBuf,
}

impl ScriptDirs {
    /// Compute the layout for `scripts_dir` without touching the disk.
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        let scripts_dir = scripts_dir.into();
        let relive_dir = scripts_dir.join(".relive");
        let shadow_dir = relive_dir.join("shadow");

        Self {
            scripts_dir,
            relive_dir,
            shadow_dir,
        }
    }

    /// Compute the layout and create the directories that do not exist yet.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn create(scripts_dir: impl Into<PathBuf>) -> Result<Self> {
        let dirs = Self::new(scripts_dir);
        fs::create_dir_all(&dirs.shadow_dir)?;
        Ok(dirs)
    }

    /// `<scripts_dir>/<name>.<ext>`
    pub fn script_file(&self, name: &str, ext: &str) -> PathBuf {
        let file = if ext.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", name, ext)
        };
        self.scripts_dir.join(file)
    }

    /// Remove shadow copies and recreate the empty layout.
    ///
    /// Only safe while no module is loaded from the shadow directory.
    pub fn clean(&self) -> Result<()> {
        if self.relive_dir.exists() {
            fs::remove_dir_all(&self.relive_dir)?;
        }
        fs::create_dir_all(&self.shadow_dir)?;
        Ok(())
    }
}

/// Whether `name` is usable as a script name.
///
/// Names map straight to file names, so anything that could climb out of
/// the scripts directory is rejected.
pub fn is_valid_script_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}
