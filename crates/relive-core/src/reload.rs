//! Script hot reload.
//!
//! [`ScriptHost`] owns the per-name module registry and turns every reload
//! request into one scheduler node. The node runs the whole pipeline:
//!
//! 1. Unload the module currently registered under the name
//! 2. Compile `<name>.<source_ext>` into `<name>.<module_ext>`
//! 3. Load the new module and register it
//! 4. Resolve the entry symbol and call it with the scheduler
//!
//! Modules built by the toolchain are called through their exported guard,
//! so a panic or exception in the script ends the attempt instead of the
//! process. Bare entry points are called under `catch_unwind`, which only
//! helps when they share the host's runtime.
//!
//! Every failure is written to the attempt's [`Report`]; callers only get
//! a boolean back.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::compile::{
    CompileError, CompilerConfig, CompilerFlavor, ScriptCompiler, ToolchainCompiler,
    dylib_extension,
};
use crate::error::{Error, Result};
use crate::graph::{Node, NodeId, NodeOutcome, Scheduler, panic_message};
use crate::loader::{
    ENTRY_SYMBOL, GuardedEntryFn, LibraryLoader, LoadError, ModuleHandle, ModuleLoader,
    ScriptEntryFn, ShadowMode, guard_symbol,
};
use crate::paths::{ScriptDirs, is_valid_script_name};
use crate::report::Report;

/// Configuration for a [`ScriptHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Directory holding script sources and built modules
    pub scripts_dir: PathBuf,

    /// Source file extension, without the dot
    pub source_ext: String,

    /// Module file extension, without the dot
    pub module_ext: String,

    /// Symbol every module must export
    pub entry_symbol: String,

    /// How modules are handed to the OS loader
    pub shadow_mode: ShadowMode,

    /// Compiler settings for the production backend
    pub compiler: CompilerConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::for_scripts_dir("src/scripts")
    }
}

impl HostConfig {
    /// Defaults rooted at `scripts_dir`.
    pub fn for_scripts_dir(scripts_dir: impl Into<PathBuf>) -> Self {
        let compiler = CompilerConfig::development();
        Self {
            scripts_dir: scripts_dir.into(),
            source_ext: compiler.flavor.source_extension().to_string(),
            module_ext: dylib_extension().to_string(),
            entry_symbol: ENTRY_SYMBOL.to_string(),
            shadow_mode: ShadowMode::default(),
            compiler,
        }
    }

    /// Switch the toolchain family, along with the source extension and
    /// language standard that go with it.
    pub fn with_flavor(mut self, flavor: CompilerFlavor) -> Self {
        self.source_ext = flavor.source_extension().to_string();
        self.compiler = CompilerConfig {
            flavor,
            standard: flavor.default_standard().to_string(),
            ..self.compiler
        };
        self
    }
}

/// Source and module paths for one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPaths {
    pub source: PathBuf,
    pub module: PathBuf,
}

/// At most one loaded module per script name. The lock is held for the
/// whole reload attempt.
type ModuleSlot = Arc<Mutex<Option<ModuleHandle>>>;

struct HostInner {
    config: HostConfig,
    dirs: ScriptDirs,
    compiler: Arc<dyn ScriptCompiler>,
    loader: Arc<dyn ModuleLoader>,
    registry: Mutex<FxHashMap<String, ModuleSlot>>,
}

/// Compiles, loads and runs scripts, replacing modules in place.
///
/// Reloads of different names run in parallel on the scheduler's workers;
/// reloads of the same name queue up behind each other. Dropping the host
/// unloads every module.
pub struct ScriptHost {
    inner: Arc<HostInner>,
}

impl ScriptHost {
    /// Create a host that builds with the detected toolchain and loads
    /// modules with the system loader.
    ///
    /// # Errors
    /// Returns [`Error::Toolchain`] if no compiler can be found.
    pub fn new(config: HostConfig) -> Result<Self> {
        let compiler =
            ToolchainCompiler::detect(config.compiler.clone())?.with_entry_symbol(&config.entry_symbol);
        let dirs = ScriptDirs::new(&config.scripts_dir);
        let loader = LibraryLoader::new(&dirs.shadow_dir, config.shadow_mode);

        match loader.cleanup_stale_copies() {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Swept {} stale shadow copies", n),
            Err(e) => tracing::warn!("Could not sweep {}: {}", dirs.shadow_dir.display(), e),
        }

        Ok(Self::with_backends(config, Arc::new(compiler), Arc::new(loader)))
    }

    /// Create a host with explicit compiler and loader backends.
    pub fn with_backends(
        config: HostConfig,
        compiler: Arc<dyn ScriptCompiler>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let dirs = ScriptDirs::new(&config.scripts_dir);
        Self {
            inner: Arc::new(HostInner {
                config,
                dirs,
                compiler,
                loader,
                registry: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn dirs(&self) -> &ScriptDirs {
        &self.inner.dirs
    }

    /// Where the source and module for `name` live.
    pub fn script_paths(&self, name: &str) -> ScriptPaths {
        self.inner.script_paths(name)
    }

    /// Rebuild and rerun one script.
    ///
    /// Submits a single node to `scheduler`, runs the graph to completion
    /// and prunes the node. If `report` is given it is reset and filled in;
    /// otherwise a fresh one is used. Returns [`Report::succeeded`].
    ///
    /// Must not be called from inside a scheduler task.
    pub fn load_or_reload_script(
        &self,
        name: &str,
        scheduler: &Scheduler,
        report: Option<Arc<Report>>,
    ) -> bool {
        let report = report.unwrap_or_default();
        report.reset();

        let node = self.reload_node(name, Arc::clone(&report));
        let scheduled = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Option<NodeOutcome>> {
            let id = scheduler.add_node(node)?;
            scheduler.execute();
            scheduler.wait_all();
            // Other callers may share the scheduler, so only this node is pruned.
            let outcome = scheduler.wait_for(id)?;
            scheduler.prune(id);
            Ok(outcome)
        }));

        match scheduled {
            Ok(Ok(outcome)) => record_worker_panic(&report, outcome),
            Ok(Err(e)) => {
                report.log_error(format!("failed to schedule reload of '{}': {}", name, e));
            }
            Err(payload) => {
                let err = Error::Scheduling(panic_message(payload.as_ref()));
                report.log_error(format!("reload of '{}' aborted: {}", name, err));
            }
        }

        report.succeeded()
    }

    /// Rebuild and rerun several scripts as one graph execution.
    ///
    /// Returns one report per requested name, in request order.
    pub fn reload_many<I, S>(&self, names: I, scheduler: &Scheduler) -> Vec<(String, Arc<Report>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut attempts: Vec<(String, Arc<Report>, Option<NodeId>)> = Vec::new();

        for name in names {
            let name = name.as_ref().to_string();
            let report = Arc::new(Report::new());
            let node = self.reload_node(&name, Arc::clone(&report));
            match scheduler.add_node(node) {
                Ok(id) => attempts.push((name, report, Some(id))),
                Err(e) => {
                    report.log_error(format!("failed to schedule reload of '{}': {}", name, e));
                    attempts.push((name, report, None));
                }
            }
        }

        let ran = panic::catch_unwind(AssertUnwindSafe(|| {
            scheduler.execute();
            scheduler.wait_all();
            let outcomes: Vec<Option<NodeOutcome>> = attempts
                .iter()
                .map(|(_, _, id)| id.and_then(|id| scheduler.wait_for(id).ok().flatten()))
                .collect();
            for id in attempts.iter().filter_map(|(_, _, id)| *id) {
                scheduler.prune(id);
            }
            outcomes
        }));

        match ran {
            Ok(outcomes) => {
                for ((_, report, _), outcome) in attempts.iter().zip(outcomes) {
                    record_worker_panic(report, outcome);
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                for (name, report, _) in &attempts {
                    report.log_error(format!("reload of '{}' aborted: {}", name, message));
                }
            }
        }

        attempts
            .into_iter()
            .map(|(name, report, _)| (name, report))
            .collect()
    }

    /// Build the unit of work for one reload attempt.
    fn reload_node(&self, name: &str, report: Arc<Report>) -> Node {
        let inner = Arc::clone(&self.inner);
        let script = name.to_string();
        Node::new(format!("script:{}", name), move |scheduler: &Scheduler| {
            inner.reload(&script, scheduler, &report)
        })
    }

    /// Unload the module registered under `name`.
    ///
    /// Returns whether a module was loaded. Waits for a reload of the same
    /// name that is in progress.
    pub fn unload_script(&self, name: &str) -> bool {
        self.inner.unload_script(name)
    }

    /// Unload every module.
    pub fn unload_all(&self) {
        self.inner.unload_all();
    }

    /// Whether a module is currently loaded for `name`.
    ///
    /// A module that fails to export the entry symbol is unloaded again, so
    /// this is only true after a load whose entry point resolved.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.inner
            .existing_slot(name)
            .is_some_and(|slot| lock_slot(&slot).as_ref().is_some_and(ModuleHandle::is_loaded))
    }

    /// Names with a loaded module, sorted.
    pub fn loaded_scripts(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .slots()
            .into_iter()
            .filter(|(_, slot)| lock_slot(slot).as_ref().is_some_and(ModuleHandle::is_loaded))
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("scripts_dir", &self.inner.config.scripts_dir)
            .field("loaded", &self.loaded_scripts())
            .finish_non_exhaustive()
    }
}

/// A node that panicked outside the entry call never reached the report.
fn record_worker_panic(report: &Report, outcome: Option<NodeOutcome>) {
    if let Some(NodeOutcome::Panicked(message)) = outcome
        && !report.failed()
    {
        report.log_error(format!("reload task panicked: {}", message));
    }
}

fn lock_slot(slot: &ModuleSlot) -> MutexGuard<'_, Option<ModuleHandle>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HostInner {
    fn script_paths(&self, name: &str) -> ScriptPaths {
        ScriptPaths {
            source: self.dirs.script_file(name, &self.config.source_ext),
            module: self.dirs.script_file(name, &self.config.module_ext),
        }
    }

    fn registry(&self) -> MutexGuard<'_, FxHashMap<String, ModuleSlot>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, name: &str) -> ModuleSlot {
        Arc::clone(self.registry().entry(name.to_string()).or_default())
    }

    fn existing_slot(&self, name: &str) -> Option<ModuleSlot> {
        self.registry().get(name).cloned()
    }

    /// Snapshot of the registry, so no slot is locked under the registry lock.
    fn slots(&self) -> Vec<(String, ModuleSlot)> {
        self.registry()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect()
    }

    fn unload_script(&self, name: &str) -> bool {
        let Some(slot) = self.existing_slot(name) else {
            return false;
        };
        let Some(mut handle) = lock_slot(&slot).take() else {
            return false;
        };
        self.loader.unload(&mut handle);
        tracing::info!("Unloaded script '{}'", name);
        true
    }

    fn unload_all(&self) {
        for (name, slot) in self.slots() {
            if let Some(mut handle) = lock_slot(&slot).take() {
                self.loader.unload(&mut handle);
                tracing::debug!("Unloaded script '{}'", name);
            }
        }
    }

    /// One reload attempt. Stage failures are logged to `report` and end
    /// the attempt; the error is also returned so the node records it.
    fn reload(&self, name: &str, scheduler: &Scheduler, report: &Report) -> Result<()> {
        report.mark_scheduled();
        report.log_info(format!("Scheduled reload of script '{}'", name));

        if !is_valid_script_name(name) {
            report.log_error(format!(
                "source file missing: '{}' is not a valid script name (names cannot contain path separators or '..')",
                name
            ));
            return Err(Error::MissingSource {
                path: PathBuf::from(name),
            });
        }

        let paths = self.script_paths(name);
        if !paths.source.is_file() {
            return fail(report, Error::MissingSource { path: paths.source });
        }

        let slot = self.slot(name);
        let mut current = lock_slot(&slot);

        if let Some(mut previous) = current.take() {
            self.loader.unload(&mut previous);
            report.log_info(format!("Unloaded previous module for '{}'", name));
        }

        match self.compiler.compile(&paths.source, &paths.module) {
            Ok(output) => {
                for warning in &output.warnings {
                    report.log_info(warning.to_string());
                }
                report.mark_compiled();
                report.log_info(format!(
                    "Compiled {} in {:.2}s",
                    paths.source.display(),
                    output.elapsed.as_secs_f64()
                ));
            }
            Err(e) => return fail_compile(report, e),
        }

        if !paths.module.is_file() {
            return fail(report, Error::MissingOutputArtifact { path: paths.module });
        }

        let handle = match self.loader.load(&paths.module) {
            Ok(handle) => handle,
            Err(e) => return fail(report, e.into()),
        };
        report.mark_loaded();
        report.log_info(format!("Loaded {}", paths.module.display()));
        let handle = current.insert(handle);

        let entry = match self.resolve(handle) {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(mut module) = current.take() {
                    self.loader.unload(&mut module);
                }
                report.log_info(format!("Unloaded module for '{}' without an entry point", name));
                return fail(report, e.into());
            }
        };

        let arg = scheduler as *const Scheduler as *const c_void;
        // Safety: the handle stays loaded while the slot lock is held, and
        // `arg` outlives the call.
        if let Err(message) = unsafe { entry.call(arg) } {
            return fail(
                report,
                Error::EntryRuntime {
                    script: name.to_string(),
                    message,
                },
            );
        }

        report.mark_executed();
        report.log_info(format!("Script '{}' executed", name));
        Ok(())
    }
}

impl HostInner {
    /// The guard if the module exports one, the bare entry otherwise.
    fn resolve(&self, handle: &ModuleHandle) -> std::result::Result<Entry, LoadError> {
        let guard = guard_symbol(&self.config.entry_symbol);
        if let Ok(guarded) = self.loader.resolve_guarded(handle, &guard) {
            return Ok(Entry::Guarded(guarded));
        }
        self.loader
            .resolve_entry(handle, &self.config.entry_symbol)
            .map(Entry::Bare)
    }
}

/// Room for the fault message a guard hands back.
const FAULT_MESSAGE_CAPACITY: usize = 4096;

enum Entry {
    Guarded(GuardedEntryFn),
    Bare(ScriptEntryFn),
}

impl Entry {
    /// Run the script; `Err` carries the fault message.
    ///
    /// # Safety
    /// The module the pointer came from must stay loaded for the call.
    unsafe fn call(self, arg: *const c_void) -> std::result::Result<(), String> {
        match self {
            Self::Guarded(guarded) => {
                let mut message = vec![0u8; FAULT_MESSAGE_CAPACITY];
                let mut written = 0usize;
                let status =
                    unsafe { guarded(arg, message.as_mut_ptr(), message.len(), &mut written) };
                if status == 0 {
                    return Ok(());
                }
                message.truncate(written.min(FAULT_MESSAGE_CAPACITY));
                Err(String::from_utf8_lossy(&message).into_owned())
            }
            Self::Bare(entry) => panic::catch_unwind(move || unsafe { entry(arg) })
                .map_err(|payload| panic_message(payload.as_ref())),
        }
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        self.unload_all();
    }
}

fn fail(report: &Report, err: Error) -> Result<()> {
    report.log_error(err.to_string());
    Err(err)
}

/// Log the failure line and then each compiler error on its own line.
fn fail_compile(report: &Report, err: CompileError) -> Result<()> {
    report.log_error(err.to_string());
    for diagnostic in err.errors() {
        report.log_error(diagnostic.to_string());
    }
    Err(err.into())
}

/// Script name for a changed file, if it is a script source.
pub fn script_name_for(config: &HostConfig, path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != config.source_ext {
        return None;
    }
    let name = path.file_stem()?.to_str()?;
    is_valid_script_name(name).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::compile::{CompileOutput, Diagnostic, DiagnosticLevel};
    use crate::graph::SchedulerConfig;

    /// Compiler double: copies the source to the module path.
    ///
    /// Sources containing `compile_error` fail, `no_output` succeeds
    /// without writing anything, `slow` sleeps first, `compiler_panic`
    /// panics.
    #[derive(Default)]
    struct FakeCompiler {
        compiles: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptCompiler for FakeCompiler {
        fn compile(
            &self,
            source: &Path,
            output: &Path,
        ) -> std::result::Result<CompileOutput, CompileError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let text = fs::read_to_string(source).unwrap();
            if text.contains("compiler_panic") {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("compiler crashed");
            }
            if text.contains("slow") {
                thread::sleep(Duration::from_millis(250));
            }

            let result = if text.contains("compile_error") {
                Err(CompileError::Failed {
                    exit_code: Some(1),
                    diagnostics: vec![Diagnostic {
                        level: DiagnosticLevel::Error,
                        message: "expected `;`".to_string(),
                        code: None,
                        location: None,
                    }],
                    stderr: String::new(),
                })
            } else {
                if !text.contains("no_output") {
                    fs::write(output, &text).unwrap();
                }
                Ok(CompileOutput {
                    module_path: output.to_path_buf(),
                    warnings: Vec::new(),
                    elapsed: Duration::ZERO,
                })
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Loader double: records events and picks an entry point from the
    /// module contents.
    #[derive(Default)]
    struct RecordingLoader {
        events: Mutex<Vec<String>>,
        live: AtomicUsize,
        max_live: AtomicUsize,
    }

    impl RecordingLoader {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn stem(path: &Path) -> String {
        path.file_stem().unwrap().to_string_lossy().into_owned()
    }

    unsafe extern "C-unwind" fn quiet_entry(_: *const c_void) {}

    extern "C-unwind" fn panicking_entry(_: *const c_void) {
        panic!("script blew up");
    }

    unsafe extern "C" fn passing_guard(
        _: *const c_void,
        _: *mut u8,
        _: usize,
        _: *mut usize,
    ) -> i32 {
        0
    }

    /// Stands in for a module-side guard that caught a foreign exception.
    unsafe extern "C" fn faulting_guard(
        _: *const c_void,
        message: *mut u8,
        capacity: usize,
        written: *mut usize,
    ) -> i32 {
        let text = b"std::runtime_error: cxx blew up";
        let len = text.len().min(capacity);
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr(), message, len);
            *written = len;
        }
        1
    }

    static SCHEDULER_WORKERS: AtomicUsize = AtomicUsize::new(0);

    extern "C-unwind" fn scheduler_entry(arg: *const c_void) {
        let scheduler = unsafe { &*(arg as *const Scheduler) };
        SCHEDULER_WORKERS.store(scheduler.workers(), Ordering::SeqCst);
    }

    impl ModuleLoader for RecordingLoader {
        fn load(&self, path: &Path) -> std::result::Result<ModuleHandle, LoadError> {
            if !path.exists() {
                return Err(LoadError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            self.record(format!("load {}", stem(path)));
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_live.fetch_max(now, Ordering::SeqCst);
            Ok(ModuleHandle::detached(path))
        }

        fn resolve_entry(
            &self,
            handle: &ModuleHandle,
            symbol: &str,
        ) -> std::result::Result<ScriptEntryFn, LoadError> {
            let text = fs::read_to_string(handle.path()).unwrap();
            if text.contains("no_entry") {
                return Err(LoadError::MissingSymbol {
                    path: handle.path().to_path_buf(),
                    symbol: symbol.to_string(),
                });
            }
            if text.contains("panic") {
                return Ok(panicking_entry);
            }
            if text.contains("scheduler") {
                return Ok(scheduler_entry);
            }
            Ok(quiet_entry)
        }

        fn resolve_guarded(
            &self,
            handle: &ModuleHandle,
            symbol: &str,
        ) -> std::result::Result<GuardedEntryFn, LoadError> {
            let text = fs::read_to_string(handle.path()).unwrap();
            if text.contains("guarded_fault") {
                return Ok(faulting_guard);
            }
            if text.contains("guarded") {
                return Ok(passing_guard);
            }
            Err(LoadError::MissingSymbol {
                path: handle.path().to_path_buf(),
                symbol: symbol.to_string(),
            })
        }

        fn unload(&self, handle: &mut ModuleHandle) {
            if handle.is_loaded() {
                handle.close();
                self.live.fetch_sub(1, Ordering::SeqCst);
                self.record(format!("unload {}", stem(handle.path())));
            }
        }
    }

    struct Fixture {
        temp: TempDir,
        compiler: Arc<FakeCompiler>,
        loader: Arc<RecordingLoader>,
        host: ScriptHost,
        scheduler: Scheduler,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let mut config = HostConfig::for_scripts_dir(temp.path());
            config.source_ext = "src".to_string();
            config.module_ext = "mod".to_string();

            let compiler = Arc::new(FakeCompiler::default());
            let loader = Arc::new(RecordingLoader::default());
            let host = ScriptHost::with_backends(config, compiler.clone(), loader.clone());
            let scheduler = Scheduler::new(SchedulerConfig::with_workers(4)).unwrap();

            Self {
                temp,
                compiler,
                loader,
                host,
                scheduler,
            }
        }

        fn write(&self, name: &str, contents: &str) {
            fs::write(self.temp.path().join(format!("{}.src", name)), contents).unwrap();
        }

        fn reload(&self, name: &str) -> (bool, Arc<Report>) {
            let report = Arc::new(Report::new());
            let ok = self
                .host
                .load_or_reload_script(name, &self.scheduler, Some(report.clone()));
            (ok, report)
        }
    }

    #[test]
    fn test_script_paths() {
        let config = HostConfig::for_scripts_dir("scripts");
        let host = ScriptHost::with_backends(
            config,
            Arc::new(FakeCompiler::default()),
            Arc::new(RecordingLoader::default()),
        );
        let paths = host.script_paths("player");
        assert_eq!(paths.source, PathBuf::from("scripts/player.rs"));
        assert_eq!(
            paths.module,
            PathBuf::from(format!("scripts/player.{}", dylib_extension()))
        );
    }

    #[test]
    fn test_with_flavor_switches_extension() {
        let config = HostConfig::default().with_flavor(CompilerFlavor::Cxx);
        assert_eq!(config.source_ext, "cpp");
        assert_eq!(config.compiler.flavor, CompilerFlavor::Cxx);
        assert_eq!(config.compiler.standard, "c++20");
        assert_eq!(config.scripts_dir, PathBuf::from("src/scripts"));
    }

    #[test]
    fn test_successful_reload() {
        let fx = Fixture::new();
        fx.write("player", "fn main() {}");

        let (ok, report) = fx.reload("player");
        assert!(ok, "messages: {:?}", report.messages());
        assert!(report.scheduled() && report.compiled() && report.loaded() && report.executed());
        assert!(!report.failed());
        assert!(fx.host.is_loaded("player"));
        assert_eq!(fx.host.loaded_scripts(), vec!["player".to_string()]);
        assert!(fx.scheduler.is_empty());
    }

    #[test]
    fn test_missing_source() {
        let fx = Fixture::new();

        let (ok, report) = fx.reload("ghost");
        assert!(!ok);
        assert!(report.scheduled());
        assert!(!report.compiled());
        assert!(report.failed());
        assert!(report.messages().iter().any(|m| m.contains("missing")));
        assert_eq!(fx.compiler.compiles.load(Ordering::SeqCst), 0);
        assert!(fx.loader.events().is_empty());
    }

    #[test]
    fn test_missing_source_without_report() {
        let fx = Fixture::new();
        assert!(!fx.host.load_or_reload_script("ghost", &fx.scheduler, None));
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        let fx = Fixture::new();
        let (ok, report) = fx.reload("../escape");
        assert!(!ok);
        assert!(report.failed());
        assert!(report.messages().iter().any(|m| m.contains("missing")));
        assert_eq!(fx.compiler.compiles.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_compile_failure() {
        let fx = Fixture::new();
        fx.write("broken", "compile_error");

        let (ok, report) = fx.reload("broken");
        assert!(!ok);
        assert!(report.scheduled());
        assert!(!report.compiled());
        assert!(report.failed());
        let messages = report.messages();
        assert!(messages.iter().any(|m| m.contains("exit code 1")));
        assert!(messages.iter().any(|m| m == "error: expected `;`"));
        assert!(!fx.host.is_loaded("broken"));
        assert!(fx.loader.events().is_empty());
    }

    #[test]
    fn test_compile_failure_after_success_leaves_nothing_loaded() {
        let fx = Fixture::new();
        fx.write("player", "v1");
        assert!(fx.reload("player").0);

        fx.write("player", "compile_error");
        let (ok, report) = fx.reload("player");
        assert!(!ok);
        assert!(!report.compiled());
        assert!(!fx.host.is_loaded("player"));
        assert_eq!(fx.loader.events(), vec!["load player", "unload player"]);
    }

    #[test]
    fn test_missing_output_artifact() {
        let fx = Fixture::new();
        fx.write("empty", "no_output");

        let (ok, report) = fx.reload("empty");
        assert!(!ok);
        assert!(report.compiled());
        assert!(!report.loaded());
        assert!(report.messages().iter().any(|m| m.contains("compiled module missing")));
    }

    #[test]
    fn test_missing_entry_symbol() {
        let fx = Fixture::new();
        fx.write("lib", "no_entry");

        let (ok, report) = fx.reload("lib");
        assert!(!ok);
        assert!(report.loaded());
        assert!(!report.executed());
        assert!(
            report
                .messages()
                .iter()
                .any(|m| m.contains("relive_script_main"))
        );

        // A module without an entry point is not kept mapped.
        assert!(!fx.host.is_loaded("lib"));
        assert!(fx.host.loaded_scripts().is_empty());
        assert_eq!(fx.loader.events(), vec!["load lib", "unload lib"]);
        assert_eq!(fx.loader.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_is_preferred_over_bare_entry() {
        let fx = Fixture::new();
        // The bare entry would panic; the guard returns cleanly.
        fx.write("wrapped", "guarded panic");

        let (ok, report) = fx.reload("wrapped");
        assert!(ok, "messages: {:?}", report.messages());
        assert!(report.executed());
    }

    #[test]
    fn test_fault_caught_by_guard_is_reported() {
        let fx = Fixture::new();
        fx.write("thrower", "guarded_fault");

        let (ok, report) = fx.reload("thrower");
        assert!(!ok);
        assert!(report.loaded());
        assert!(!report.executed());
        assert!(report.failed());
        assert!(
            report
                .messages()
                .iter()
                .any(|m| m.contains("thrower") && m.contains("std::runtime_error: cxx blew up"))
        );
        // The module itself stays loaded; only its run failed.
        assert!(fx.host.is_loaded("thrower"));
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let fx = Fixture::new();
        fx.write("crasher", "compiler_panic");

        let (ok, report) = fx.reload("crasher");
        assert!(!ok);
        assert!(report.failed());
        assert!(
            report
                .messages()
                .iter()
                .any(|m| m.contains("reload task panicked") && m.contains("compiler crashed"))
        );
    }

    #[test]
    fn test_worker_panic_survives_concurrent_callers() {
        let fx = Fixture::new();
        fx.write("crasher", "compiler_panic");
        fx.write("busy", "ok");

        let crashed = thread::scope(|s| {
            let busy = s.spawn(|| {
                for _ in 0..20 {
                    assert!(fx.reload("busy").0);
                }
            });
            let crashed: Vec<Arc<Report>> = (0..20).map(|_| fx.reload("crasher").1).collect();
            busy.join().unwrap();
            crashed
        });

        for report in crashed {
            assert!(
                report
                    .messages()
                    .iter()
                    .any(|m| m.contains("reload task panicked")),
                "messages: {:?}",
                report.messages()
            );
        }
        assert!(fx.scheduler.is_empty());
    }

    #[test]
    fn test_panicking_entry_is_caught() {
        let fx = Fixture::new();
        fx.write("crashy", "panic");

        let (ok, report) = fx.reload("crashy");
        assert!(!ok);
        assert!(report.loaded());
        assert!(!report.executed());
        assert!(report.failed());
        assert!(report.messages().iter().any(|m| m.contains("script blew up")));

        // The host and scheduler stay usable.
        fx.write("crashy", "fixed");
        assert!(fx.reload("crashy").0);
    }

    #[test]
    fn test_entry_receives_scheduler() {
        let fx = Fixture::new();
        fx.write("inspect", "scheduler");

        assert!(fx.reload("inspect").0);
        assert_eq!(SCHEDULER_WORKERS.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unload_before_load() {
        let fx = Fixture::new();
        fx.write("player", "v1");

        for _ in 0..3 {
            assert!(fx.reload("player").0);
        }

        assert_eq!(
            fx.loader.events(),
            vec![
                "load player",
                "unload player",
                "load player",
                "unload player",
                "load player",
            ]
        );
        assert_eq!(fx.loader.max_live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_independent_names_run_in_parallel() {
        let fx = Fixture::new();
        fx.write("a", "slow");
        fx.write("b", "slow");

        let (ra, rb) = thread::scope(|s| {
            let a = s.spawn(|| fx.reload("a"));
            let b = s.spawn(|| fx.reload("b"));
            (a.join().unwrap(), b.join().unwrap())
        });

        assert!(ra.0 && rb.0);
        assert_eq!(fx.compiler.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(fx.host.loaded_scripts(), vec!["a", "b"]);
    }

    #[test]
    fn test_same_name_reloads_serialize() {
        let fx = Fixture::new();
        fx.write("player", "slow");

        let results: Vec<bool> = thread::scope(|s| {
            let handles: Vec<_> = (0..3).map(|_| s.spawn(|| fx.reload("player").0)).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.into_iter().all(|ok| ok));
        assert_eq!(fx.compiler.compiles.load(Ordering::SeqCst), 3);
        assert_eq!(fx.compiler.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(fx.loader.max_live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reload_many() {
        let fx = Fixture::new();
        fx.write("a", "ok");
        fx.write("b", "compile_error");

        let reports = fx.host.reload_many(["a", "b", "c"], &fx.scheduler);
        let outcome: Vec<(&str, bool)> = reports
            .iter()
            .map(|(name, report)| (name.as_str(), report.succeeded()))
            .collect();
        assert_eq!(outcome, vec![("a", true), ("b", false), ("c", false)]);
        assert!(fx.scheduler.is_empty());
    }

    #[test]
    fn test_unload_script_and_all() {
        let fx = Fixture::new();
        fx.write("a", "ok");
        fx.write("b", "ok");
        assert!(fx.reload("a").0);
        assert!(fx.reload("b").0);

        assert!(fx.host.unload_script("a"));
        assert!(!fx.host.unload_script("a"));
        assert!(!fx.host.unload_script("never"));
        assert_eq!(fx.host.loaded_scripts(), vec!["b"]);

        fx.host.unload_all();
        assert!(fx.host.loaded_scripts().is_empty());
        assert_eq!(fx.loader.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_unloads_everything() {
        let fx = Fixture::new();
        fx.write("a", "ok");
        assert!(fx.reload("a").0);

        let loader = fx.loader.clone();
        drop(fx);
        assert_eq!(loader.live.load(Ordering::SeqCst), 0);
        assert_eq!(loader.events().last().map(String::as_str), Some("unload a"));
    }

    #[test]
    fn test_report_is_reset_between_attempts() {
        let fx = Fixture::new();
        let report = Arc::new(Report::new());

        assert!(!fx.host.load_or_reload_script("ghost", &fx.scheduler, Some(report.clone())));
        assert!(report.failed());

        fx.write("ghost", "ok");
        assert!(fx.host.load_or_reload_script("ghost", &fx.scheduler, Some(report.clone())));
        assert!(!report.failed());
        assert!(report.messages().iter().all(|m| !m.contains("missing")));
    }

    #[test]
    fn test_script_name_for() {
        let config = HostConfig::for_scripts_dir("scripts");
        assert_eq!(
            script_name_for(&config, Path::new("scripts/player.rs")),
            Some("player".to_string())
        );
        assert_eq!(script_name_for(&config, Path::new("scripts/player.so")), None);
        assert_eq!(script_name_for(&config, Path::new("scripts/README")), None);
    }
}
