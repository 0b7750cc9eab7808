//! Script compiler: one source file in, one loadable module out.
//!
//! When a script defines the entry point, the compiler does not build the
//! file directly. It feeds the toolchain a short translation unit on stdin
//! that includes the script and adds `<entry>_guarded`, an exported
//! wrapper that catches panics (Rust) or exceptions (C++) on the module's
//! side of the boundary. The included script must therefore not use
//! crate-level inner attributes (`#![...]`).

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use crate::error::Result;
use crate::loader::{ENTRY_SYMBOL, guard_symbol};

use super::errors::{CompileError, DiagnosticLevel, parse_diagnostics};
use super::toolchain::ToolchainManager;
use super::types::{CompileOutput, CompilerConfig, CompilerFlavor};

/// Turns a script source into a dynamically loadable module.
///
/// Implementations run exactly one build per call and never retry.
pub trait ScriptCompiler: Send + Sync {
    /// Build `source` into `output`.
    ///
    /// The caller guarantees `source` exists and the parent directory of
    /// `output` exists.
    fn compile(&self, source: &Path, output: &Path) -> std::result::Result<CompileOutput, CompileError>;
}

/// [`ScriptCompiler`] that spawns an external toolchain.
#[derive(Debug, Clone)]
pub struct ToolchainCompiler {
    /// Compiler configuration
    config: CompilerConfig,

    /// Compiler executable
    program: PathBuf,

    /// Entry point to wrap in a guard; `None` builds sources as they are
    entry_symbol: Option<String>,
}

impl ToolchainCompiler {
    /// Create a compiler for a detected toolchain.
    pub fn new(config: CompilerConfig, toolchain: &ToolchainManager) -> Self {
        Self {
            config: CompilerConfig {
                flavor: toolchain.flavor(),
                ..config
            },
            program: toolchain.program().to_path_buf(),
            entry_symbol: Some(ENTRY_SYMBOL.to_string()),
        }
    }

    /// Detect the toolchain from `config` and create a compiler for it.
    pub fn detect(config: CompilerConfig) -> Result<Self> {
        let toolchain = ToolchainManager::new(&config)?;
        Ok(Self::new(config, &toolchain))
    }

    /// Use `program` without probing it first.
    pub fn with_program(config: CompilerConfig, program: impl Into<PathBuf>) -> Self {
        Self {
            config,
            program: program.into(),
            entry_symbol: Some(ENTRY_SYMBOL.to_string()),
        }
    }

    /// Guard `symbol` instead of the default entry point.
    pub fn with_entry_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.entry_symbol = Some(symbol.into());
        self
    }

    /// Build every source exactly as written, with no guard.
    pub fn without_guard(mut self) -> Self {
        self.entry_symbol = None;
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The full argument list for building `source` as written.
    pub fn args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        self.build_args(source, source.as_os_str(), output)
    }

    /// The translation unit compiled in place of `source`, or `None` if
    /// the source is built as written.
    ///
    /// Sources that never mention the entry symbol get no guard, so a
    /// missing entry surfaces as a missing symbol at load time rather
    /// than as a compile error.
    pub fn guard_source(&self, source: &Path) -> Option<String> {
        let entry = self.entry_symbol.as_deref()?;
        let text = fs::read_to_string(source).ok()?;
        if !text.contains(entry) {
            return None;
        }
        let source = std::path::absolute(source).ok()?;

        Some(match self.config.flavor {
            CompilerFlavor::Rustc => rust_guard(&source, entry),
            CompilerFlavor::Cxx => cxx_guard(&source, entry),
        })
    }

    /// Arguments for one compile reading `input`, which is either the
    /// source path or `-` for stdin.
    fn build_args(&self, source: &Path, input: &OsStr, output: &Path) -> Vec<OsString> {
        let config = &self.config;
        let mut args: Vec<OsString> = Vec::new();

        match config.flavor {
            CompilerFlavor::Rustc => {
                args.push("--edition".into());
                args.push(config.standard.clone().into());
                args.push("--crate-type".into());
                args.push("cdylib".into());
                args.push("--crate-name".into());
                args.push(crate_name(source).into());
                args.push("-C".into());
                args.push(format!("opt-level={}", config.opt_level).into());
                // Script panics must unwind so the host can catch them.
                args.push("-C".into());
                args.push("panic=unwind".into());
                if config.debug_info {
                    args.push("-C".into());
                    args.push("debuginfo=2".into());
                }
                for dir in &config.include_dirs {
                    args.push("-L".into());
                    args.push(dir.clone().into_os_string());
                }
                args.push("--error-format=json".into());
            }
            CompilerFlavor::Cxx => {
                args.push(format!("-std={}", config.standard).into());
                args.push(format!("-O{}", config.opt_level).into());
                args.push("-shared".into());
                args.push("-fPIC".into());
                if config.debug_info {
                    args.push("-g".into());
                }
                for dir in &config.include_dirs {
                    args.push("-I".into());
                    args.push(dir.clone().into_os_string());
                }
                args.push("-fexceptions".into());
                args.push("-frtti".into());
            }
        }

        args.extend(config.extra_flags.iter().map(OsString::from));
        if config.flavor == CompilerFlavor::Cxx && input == "-" {
            args.push("-x".into());
            args.push("c++".into());
        }
        args.push(input.to_os_string());
        args.push("-o".into());
        args.push(output.as_os_str().to_os_string());
        args
    }
}

impl ScriptCompiler for ToolchainCompiler {
    fn compile(&self, source: &Path, output: &Path) -> std::result::Result<CompileOutput, CompileError> {
        let guard = self.guard_source(source);
        let input = if guard.is_some() {
            OsStr::new("-")
        } else {
            source.as_os_str()
        };
        let args = self.build_args(source, input, output);
        tracing::debug!("Running {} {:?}", self.program.display(), args);

        let spawn_error = |source: std::io::Error| CompileError::Spawn {
            program: self.program.clone(),
            source,
        };

        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if guard.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;

        if let Some(unit) = &guard
            && let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(unit.as_bytes())
        {
            // The exit status reports whatever went wrong.
            tracing::debug!("Could not write guard to {}: {}", self.program.display(), e);
        }

        let result = child.wait_with_output().map_err(spawn_error)?;
        let elapsed = start.elapsed();

        let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
        let diagnostics = parse_diagnostics(self.config.flavor, &stderr);

        if !result.status.success() {
            tracing::debug!("Compiler stderr:\n{}", stderr);
            return Err(CompileError::Failed {
                exit_code: result.status.code(),
                diagnostics,
                stderr,
            });
        }

        tracing::info!(
            "Compiled {} in {:.2}s",
            source.display(),
            elapsed.as_secs_f64()
        );

        Ok(CompileOutput {
            module_path: output.to_path_buf(),
            warnings: diagnostics
                .into_iter()
                .filter(|d| d.level != DiagnosticLevel::Error)
                .collect(),
            elapsed,
        })
    }
}

/// Guarded Rust unit: the script plus an exported wrapper that runs the
/// entry under the module's own `catch_unwind`.
fn rust_guard(source: &Path, entry: &str) -> String {
    format!(
        r#"include!({source:?});

#[doc(hidden)]
pub mod __relive_guard {{
    #[allow(unused_unsafe)]
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn {guard}(
        scheduler: *const ::std::ffi::c_void,
        message: *mut u8,
        capacity: usize,
        written: *mut usize,
    ) -> i32 {{
        let run = ::std::panic::AssertUnwindSafe(|| unsafe {{ super::{entry}(scheduler) }});
        let Err(payload) = ::std::panic::catch_unwind(run) else {{
            return 0;
        }};
        let text = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<::std::string::String>().map(|s| s.as_str()))
            .unwrap_or("script panicked");
        let len = text.len().min(capacity);
        if !message.is_null() {{
            unsafe {{ ::std::ptr::copy_nonoverlapping(text.as_ptr(), message, len) }};
        }}
        if !written.is_null() {{
            unsafe {{ *written = len }};
        }}
        1
    }}
}}
"#,
        source = source.display().to_string(),
        guard = guard_symbol(entry),
    )
}

/// Guarded C++ unit: the script plus an `extern "C"` wrapper that catches
/// every exception.
fn cxx_guard(source: &Path, entry: &str) -> String {
    let include = source.display().to_string().replace('\\', "/");
    format!(
        r#"#include <cstddef>
#include <cstring>
#include <exception>

#include "{include}"

namespace {{
void relive_guard_message(const char* text, char* message, std::size_t capacity, std::size_t* written) {{
    std::size_t len = std::strlen(text);
    if (len > capacity) len = capacity;
    if (message != nullptr) std::memcpy(message, text, len);
    if (written != nullptr) *written = len;
}}
}}

extern "C" int {guard}(const void* scheduler, char* message, std::size_t capacity, std::size_t* written) {{
    try {{
        {entry}(const_cast<void*>(scheduler));
        return 0;
    }} catch (const std::exception& e) {{
        relive_guard_message(e.what(), message, capacity, written);
    }} catch (...) {{
        relive_guard_message("unknown C++ exception", message, capacity, written);
    }}
    return 1;
}}
"#,
        guard = guard_symbol(entry),
    )
}

/// Crate name derived from the file stem; rustc rejects `-` and leading digits.
fn crate_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "script_");
    }
    name
}
