//! Integration tests for the reload pipeline with a real compiler.
//!
//! Each test skips itself when `rustc` is not on PATH.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use relive_core::{
    CompilerConfig, CompilerFlavor, HostConfig, LibraryLoader, ModuleLoader, Report, Scheduler,
    SchedulerConfig, ScriptCompiler, ScriptHost, ShadowMode, ToolchainCompiler,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

fn have_rustc() -> bool {
    which::which("rustc").is_ok()
}

/// Script that appends `tag` to `marker` each time it runs.
fn marker_script(marker: &Path, tag: &str) -> String {
    format!(
        r#"
use std::io::Write;

#[unsafe(no_mangle)]
pub extern "C-unwind" fn relive_script_main(_scheduler: *const std::ffi::c_void) {{
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open({marker:?})
        .unwrap();
    writeln!(file, "{tag}").unwrap();
}}
"#
    )
}

const PANICKING_SCRIPT: &str = r#"
#[unsafe(no_mangle)]
pub extern "C-unwind" fn relive_script_main(_scheduler: *const std::ffi::c_void) {
    panic!("script blew up");
}
"#;

struct TestScripts {
    dir: TempDir,
    host: ScriptHost,
    scheduler: Scheduler,
}

impl TestScripts {
    fn new() -> Self {
        Self::with_flavor(CompilerFlavor::Rustc).expect("Failed to create script host")
    }

    /// `None` when no toolchain of this flavor is installed.
    fn with_flavor(flavor: CompilerFlavor) -> Option<Self> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let host = ScriptHost::new(HostConfig::for_scripts_dir(dir.path()).with_flavor(flavor)).ok()?;
        let scheduler =
            Scheduler::new(SchedulerConfig::with_workers(2)).expect("Failed to start scheduler");
        Some(Self {
            dir,
            host,
            scheduler,
        })
    }

    fn path(&self, file: &str) -> std::path::PathBuf {
        self.dir.path().join(file)
    }

    fn write(&self, name: &str, source: &str) {
        let ext = &self.host.config().source_ext;
        fs::write(self.path(&format!("{}.{}", name, ext)), source).expect("Failed to write script");
    }

    fn reload(&self, name: &str) -> (bool, Arc<Report>) {
        let report = Arc::new(Report::new());
        let ok = self
            .host
            .load_or_reload_script(name, &self.scheduler, Some(report.clone()));
        (ok, report)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_round_trip_and_reload() {
    if !have_rustc() {
        eprintln!("skipping: rustc not found");
        return;
    }

    let scripts = TestScripts::new();
    let marker = scripts.path("marker.txt");

    scripts.write("counter", &marker_script(&marker, "v1"));
    let (ok, report) = scripts.reload("counter");
    assert!(ok, "first reload failed: {:?}", report.messages());
    assert!(scripts.host.is_loaded("counter"));

    scripts.write("counter", &marker_script(&marker, "v2"));
    let (ok, report) = scripts.reload("counter");
    assert!(ok, "second reload failed: {:?}", report.messages());
    assert!(
        report
            .messages()
            .iter()
            .any(|m| m.contains("Unloaded previous module"))
    );

    // The second run executed the new code, not a cached mapping.
    let runs = fs::read_to_string(&marker).unwrap();
    assert_eq!(runs.lines().collect::<Vec<_>>(), vec!["v1", "v2"]);

    assert_eq!(scripts.host.loaded_scripts(), vec!["counter"]);
    assert!(scripts.scheduler.is_empty());

    // Only the live module's shadow copy remains.
    let shadow = fs::read_dir(&scripts.host.dirs().shadow_dir).unwrap().count();
    assert_eq!(shadow, 1);

    assert!(scripts.host.unload_script("counter"));
    let shadow = fs::read_dir(&scripts.host.dirs().shadow_dir).unwrap().count();
    assert_eq!(shadow, 0);
}

#[test]
fn test_missing_source() {
    if !have_rustc() {
        eprintln!("skipping: rustc not found");
        return;
    }

    let scripts = TestScripts::new();
    let (ok, report) = scripts.reload("nope");

    assert!(!ok);
    assert!(report.scheduled());
    assert!(!report.compiled());
    assert!(report.failed());
    assert!(
        report
            .messages()
            .iter()
            .any(|m| m.contains("missing") || m.contains("not found"))
    );
}

#[test]
fn test_compile_error_is_reported() {
    if !have_rustc() {
        eprintln!("skipping: rustc not found");
        return;
    }

    let scripts = TestScripts::new();
    scripts.write("broken", "pub fn broken() -> u32 { \"not a number\" }");

    let (ok, report) = scripts.reload("broken");
    assert!(!ok);
    assert!(!report.compiled());
    assert!(report.failed());
    assert!(!scripts.host.is_loaded("broken"));

    let messages = report.messages();
    assert!(messages.iter().any(|m| m.contains("compile failure")));
    assert!(messages.iter().any(|m| m.contains("E0308")), "{:?}", messages);
}

#[test]
fn test_missing_entry_symbol() {
    if !have_rustc() {
        eprintln!("skipping: rustc not found");
        return;
    }

    let scripts = TestScripts::new();
    scripts.write("noentry", "#[unsafe(no_mangle)] pub extern \"C\" fn something_else() {}");

    let (ok, report) = scripts.reload("noentry");
    assert!(!ok);
    assert!(report.compiled());
    assert!(report.loaded());
    assert!(!report.executed());
    assert!(
        report
            .messages()
            .iter()
            .any(|m| m.contains("relive_script_main"))
    );
    assert!(!scripts.host.is_loaded("noentry"));
}

#[test]
fn test_script_panic_is_caught() {
    if !have_rustc() {
        eprintln!("skipping: rustc not found");
        return;
    }

    let scripts = TestScripts::new();
    let marker = scripts.path("marker.txt");
    scripts.write("boom", PANICKING_SCRIPT);

    let (ok, report) = scripts.reload("boom");
    assert!(!ok);
    assert!(report.compiled());
    assert!(report.loaded());
    assert!(!report.executed());
    assert!(report.failed());
    assert!(
        report.messages().iter().any(|m| m.contains("script blew up")),
        "{:?}",
        report.messages()
    );

    // The host survives and picks up the fixed script.
    scripts.write("boom", &marker_script(&marker, "fixed"));
    let (ok, report) = scripts.reload("boom");
    assert!(ok, "{:?}", report.messages());
    assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "fixed");
}

#[test]
fn test_cxx_exception_is_caught() {
    let Some(scripts) = TestScripts::with_flavor(CompilerFlavor::Cxx) else {
        eprintln!("skipping: no C++ compiler found");
        return;
    };

    scripts.write(
        "thrower",
        r#"
#include <stdexcept>

extern "C" void relive_script_main(void*) {
    throw std::runtime_error("cxx blew up");
}
"#,
    );

    let (ok, report) = scripts.reload("thrower");
    assert!(!ok);
    assert!(report.loaded());
    assert!(!report.executed());
    assert!(
        report.messages().iter().any(|m| m.contains("cxx blew up")),
        "{:?}",
        report.messages()
    );

    scripts.write("thrower", r#"extern "C" void relive_script_main(void*) {}"#);
    let (ok, report) = scripts.reload("thrower");
    assert!(ok, "{:?}", report.messages());
}

#[test]
fn test_independent_scripts_reload_together() {
    if !have_rustc() {
        eprintln!("skipping: rustc not found");
        return;
    }

    let scripts = TestScripts::new();
    let marker = scripts.path("marker.txt");
    scripts.write("alpha", &marker_script(&marker, "alpha"));
    scripts.write("beta", &marker_script(&marker, "beta"));

    let reports = scripts
        .host
        .reload_many(["alpha", "beta"], &scripts.scheduler);
    for (name, report) in &reports {
        assert!(report.succeeded(), "{}: {:?}", name, report.messages());
    }

    let mut runs: Vec<String> = fs::read_to_string(&marker)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    runs.sort();
    assert_eq!(runs, vec!["alpha", "beta"]);
}

#[test]
fn test_compiler_and_loader_directly() {
    if !have_rustc() {
        eprintln!("skipping: rustc not found");
        return;
    }

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("direct.rs");
    let module = dir
        .path()
        .join(format!("direct.{}", relive_core::compile::dylib_extension()));
    fs::write(&source, marker_script(&dir.path().join("m.txt"), "x")).unwrap();

    let compiler = ToolchainCompiler::detect(CompilerConfig::development()).unwrap();
    let output = compiler.compile(&source, &module).unwrap();
    assert_eq!(output.module_path, module);
    assert!(module.exists());

    let loader = LibraryLoader::new(dir.path().join("shadow"), ShadowMode::Copy);
    let mut handle = loader.load(&module).unwrap();
    assert!(handle.is_loaded());
    assert_ne!(handle.opened_path(), module.as_path());
    loader
        .resolve_entry(&handle, relive_core::ENTRY_SYMBOL)
        .unwrap();
    loader
        .resolve_guarded(&handle, &relive_core::guard_symbol(relive_core::ENTRY_SYMBOL))
        .unwrap();

    loader.unload(&mut handle);
    assert!(!handle.is_loaded());
    loader.unload(&mut handle);
    assert!(module.exists());
}
