// Platform bootstrap: locate, extract and load the native module for the
// running platform, exactly once.
//
// State machine:
//   Uninitialized -> Loading -> { Loaded, Skipped, Failed }
//
// The sequence runs inside a `OnceLock`, so concurrent first callers block
// until the single execution finishes and then all observe its outcome. A
// failure is cached too: later callers get a clone of the same error instead
// of retrying. A panic from a custom loader or namespace is caught and
// cached the same way.
//
// Steps:
// 1. `<base>/override` present (or forced by config) -> Skipped(Override)
// 2. Derive the platform identity
// 3. `<base>/<os>/<arch>/<bits>/<descriptor>` absent -> Skipped(NoDescriptor)
// 4. Read the descriptor as UTF-8, resolve the module path it names
// 5. Module resource absent -> DanglingDescriptor error
// 6. Copy to a temp file, hand it to the loader -> Loaded

use std::fmt;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use jamspell_core::platform::PlatformIdentity;
use jamspell_core::resource_path;
use jamspell_core::{JamSpellError, Result};
use libloading::Library;
use tempfile::TempPath;

use crate::config::BootstrapConfig;
use crate::loader::{DynamicLoader, ModuleLoader, extract_module};
use crate::reclaimer::panic_message;
use crate::resources::ResourceNamespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapState {
    Uninitialized,
    Loading,
    Loaded,
    Skipped,
    Failed,
}

impl BootstrapState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loading,
            2 => Self::Loaded,
            3 => Self::Skipped,
            4 => Self::Failed,
            _ => Self::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Loading => 1,
            Self::Loaded => 2,
            Self::Skipped => 3,
            Self::Failed => 4,
        }
    }

    /// Whether the bootstrap has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Skipped | Self::Failed)
    }
}

/// Why no module was loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The override marker is present; the embedder supplies the engine.
    Override,
    /// No descriptor exists for this platform.
    NoDescriptor,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => f.write_str("override marker present"),
            Self::NoDescriptor => f.write_str("no module descriptor for this platform"),
        }
    }
}

/// A module brought into the process by the bootstrap.
pub struct LoadedModule {
    descriptor: String,
    target: String,
    path: PathBuf,
    library: Option<Arc<Library>>,
    /// Keeps the extracted file alive where it cannot be unlinked while
    /// mapped. `None` once removed.
    _temp: Option<TempPath>,
}

impl LoadedModule {
    /// Resource path of the descriptor that named the module.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Resource path of the module inside the namespace.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Filesystem path the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The library handle, if the loader kept one.
    pub fn library(&self) -> Option<&Arc<Library>> {
        self.library.as_ref()
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("descriptor", &self.descriptor)
            .field("target", &self.target)
            .field("path", &self.path)
            .field("has_library", &self.library.is_some())
            .finish()
    }
}

/// Result of a completed bootstrap.
#[derive(Debug)]
pub enum Outcome {
    Loaded(LoadedModule),
    Skipped(SkipReason),
}

impl Outcome {
    pub fn state(&self) -> BootstrapState {
        match self {
            Self::Loaded(_) => BootstrapState::Loaded,
            Self::Skipped(_) => BootstrapState::Skipped,
        }
    }

    pub fn module(&self) -> Option<&LoadedModule> {
        match self {
            Self::Loaded(module) => Some(module),
            Self::Skipped(_) => None,
        }
    }
}

/// One-shot loader for the platform's native module.
pub struct Bootstrap {
    config: BootstrapConfig,
    platform: PlatformIdentity,
    namespace: Box<dyn ResourceNamespace>,
    loader: Box<dyn ModuleLoader>,
    state: AtomicU8,
    outcome: OnceLock<Result<Outcome>>,
}

impl Bootstrap {
    pub fn new(
        config: BootstrapConfig,
        namespace: impl ResourceNamespace + 'static,
        loader: impl ModuleLoader + 'static,
    ) -> Self {
        Self::with_platform(config, namespace, loader, PlatformIdentity::current())
    }

    /// Like [`new`](Self::new) with an explicit platform identity.
    pub fn with_platform(
        config: BootstrapConfig,
        namespace: impl ResourceNamespace + 'static,
        loader: impl ModuleLoader + 'static,
        platform: PlatformIdentity,
    ) -> Self {
        Self {
            config,
            platform,
            namespace: Box::new(namespace),
            loader: Box::new(loader),
            state: AtomicU8::new(BootstrapState::Uninitialized.as_u8()),
            outcome: OnceLock::new(),
        }
    }

    /// Bootstrap from the environment with the system dynamic loader.
    pub fn from_env() -> Self {
        let config = BootstrapConfig::from_env();
        let namespace = config.namespace();
        Self::new(config, namespace, DynamicLoader)
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    pub fn platform(&self) -> PlatformIdentity {
        self.platform
    }

    pub fn state(&self) -> BootstrapState {
        BootstrapState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run the bootstrap if nobody has yet; otherwise wait for and return
    /// the first run's outcome.
    pub fn initialize(&self) -> Result<&Outcome> {
        self.outcome
            .get_or_init(|| {
                self.set_state(BootstrapState::Loading);
                let result = panic::catch_unwind(AssertUnwindSafe(|| self.run()))
                    .unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref()).to_string();
                        tracing::error!(reason = %message, "native module bootstrap panicked");
                        Err(JamSpellError::BootstrapPanicked { message })
                    });
                self.set_state(match &result {
                    Ok(outcome) => outcome.state(),
                    Err(_) => BootstrapState::Failed,
                });
                result
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    fn set_state(&self, state: BootstrapState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn run(&self) -> Result<Outcome> {
        let base = self.config.base.as_str();

        let override_path = resource_path::override_path(base);
        if self.config.force_override || self.namespace.exists(&override_path) {
            tracing::info!(path = %override_path, "native module override present; skipping load");
            return Ok(Outcome::Skipped(SkipReason::Override));
        }

        let descriptor =
            resource_path::descriptor_path(base, &self.platform, &self.config.descriptor_name);
        tracing::debug!(platform = %self.platform, descriptor = %descriptor, "looking up module descriptor");

        let Some(contents) = self.read_resource(&descriptor)? else {
            tracing::info!(
                platform = %self.platform,
                descriptor = %descriptor,
                "no built-in native module for this platform"
            );
            return Ok(Outcome::Skipped(SkipReason::NoDescriptor));
        };

        let contents = String::from_utf8(contents).map_err(|_| {
            JamSpellError::MalformedDescriptor {
                descriptor: descriptor.clone(),
            }
        })?;
        let target = resource_path::resolve_target(&descriptor, &contents)?;

        let mut reader = self
            .namespace
            .open(&target)
            .map_err(|e| JamSpellError::resource(target.as_str(), e))?
            .ok_or_else(|| JamSpellError::DanglingDescriptor {
                descriptor: descriptor.clone(),
                target: target.clone(),
            })?;

        #[cfg(not(unix))]
        crate::loader::sweep_stale_modules(&std::env::temp_dir(), crate::loader::STALE_AFTER);

        let temp = extract_module(&mut reader, &target)?;
        drop(reader);
        tracing::debug!(target = %target, path = %temp.display(), "native module extracted");

        let path = temp.to_path_buf();
        let library = self.loader.load(&path)?.map(Arc::new);
        let temp = release_extracted(temp);

        tracing::info!(target = %target, path = %path.display(), "native module loaded");
        Ok(Outcome::Loaded(LoadedModule {
            descriptor,
            target,
            path,
            library,
            _temp: temp,
        }))
    }

    fn read_resource(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self
            .namespace
            .open(path)
            .map_err(|e| JamSpellError::resource(path, e))?
        else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| JamSpellError::resource(path, e))?;
        Ok(Some(buf))
    }
}

/// On Unix a mapped module survives unlinking, so the file goes away now.
#[cfg(unix)]
fn release_extracted(temp: TempPath) -> Option<TempPath> {
    let path = temp.to_path_buf();
    if let Err(e) = temp.close() {
        tracing::warn!(path = %path.display(), error = %e, "unable to remove extracted module");
    }
    None
}

/// Elsewhere the file stays while mapped. The process-wide copy outlives
/// the process; a later bootstrap sweeps it up.
#[cfg(not(unix))]
fn release_extracted(temp: TempPath) -> Option<TempPath> {
    Some(temp)
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("config", &self.config)
            .field("platform", &self.platform)
            .field("state", &self.state())
            .finish()
    }
}

// ── Process-wide bootstrap ───────────────────────────────────────

static GLOBAL: OnceLock<Bootstrap> = OnceLock::new();

/// Install the process-wide bootstrap. Must happen before the first
/// [`initialize`] call; otherwise the rejected bootstrap is handed back.
pub fn install(bootstrap: Bootstrap) -> std::result::Result<(), Bootstrap> {
    GLOBAL.set(bootstrap)
}

/// The process-wide bootstrap, configured from the environment unless one
/// was [`install`]ed.
pub fn global() -> &'static Bootstrap {
    GLOBAL.get_or_init(Bootstrap::from_env)
}

/// Load the native module for this process, once.
pub fn initialize() -> Result<&'static Outcome> {
    global().initialize()
}

/// State of the process-wide bootstrap.
pub fn global_state() -> BootstrapState {
    GLOBAL
        .get()
        .map_or(BootstrapState::Uninitialized, Bootstrap::state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::MemoryNamespace;
    use jamspell_core::platform::{ArchFamily, Bitness, OsFamily};
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    const LINUX64: PlatformIdentity =
        PlatformIdentity::new(OsFamily::Linux, ArchFamily::X86, Bitness::Bit64);

    #[derive(Default, Clone)]
    struct Recording {
        loaded: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ModuleLoader for Recording {
        fn load(&self, path: &Path) -> Result<Option<Library>> {
            let bytes = std::fs::read(path).unwrap();
            self.loaded.lock().unwrap().push(bytes);
            Ok(None)
        }
    }

    fn test_config() -> BootstrapConfig {
        BootstrapConfig {
            base: "root".into(),
            descriptor_name: "name".into(),
            ..BootstrapConfig::default()
        }
    }

    fn bootstrap(ns: MemoryNamespace, loader: Recording) -> Bootstrap {
        Bootstrap::with_platform(test_config(), ns, loader, LINUX64)
    }

    /// Serves the descriptor from memory but fails partway through reading
    /// the module it names.
    struct TruncatedModule;

    struct BrokenReader;

    impl Read for BrokenReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("archive truncated"))
        }
    }

    impl ResourceNamespace for TruncatedModule {
        fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
            let reader: Box<dyn Read> = match path {
                "root/linux/x86/bit64/name" => Box::new(&b"model.so"[..]),
                "root/linux/x86/bit64/model.so" => Box::new(BrokenReader),
                _ => return Ok(None),
            };
            Ok(Some(reader))
        }
    }

    #[test]
    fn starts_uninitialized() {
        let b = bootstrap(MemoryNamespace::new(), Recording::default());
        assert_eq!(b.state(), BootstrapState::Uninitialized);
        assert!(!b.state().is_terminal());
    }

    #[test]
    fn relative_descriptor_loads_sibling_module() {
        let ns = MemoryNamespace::new()
            .with("root/linux/x86/bit64/name", &b"model.so\n"[..])
            .with("root/linux/x86/bit64/model.so", &b"MODULE"[..]);
        let loader = Recording::default();
        let b = bootstrap(ns, loader.clone());

        let outcome = b.initialize().unwrap();
        let module = outcome.module().unwrap();
        assert_eq!(module.descriptor(), "root/linux/x86/bit64/name");
        assert_eq!(module.target(), "root/linux/x86/bit64/model.so");
        assert!(module.library().is_none());
        assert_eq!(*loader.loaded.lock().unwrap(), vec![b"MODULE".to_vec()]);
        assert_eq!(b.state(), BootstrapState::Loaded);
    }

    #[test]
    fn absolute_descriptor_resolves_from_root() {
        let ns = MemoryNamespace::new()
            .with("root/linux/x86/bit64/name", &b"/shared/model.so"[..])
            .with("shared/model.so", &b"SHARED"[..]);
        let loader = Recording::default();
        let b = bootstrap(ns, loader.clone());

        let module = b.initialize().unwrap().module().unwrap();
        assert_eq!(module.target(), "shared/model.so");
        assert_eq!(*loader.loaded.lock().unwrap(), vec![b"SHARED".to_vec()]);
    }

    #[test]
    fn override_marker_skips_without_loading() {
        let ns = MemoryNamespace::new()
            .with("root/override", &b""[..])
            .with("root/linux/x86/bit64/name", &b"model.so"[..])
            .with("root/linux/x86/bit64/model.so", &b"MODULE"[..]);
        let loader = Recording::default();
        let b = bootstrap(ns, loader.clone());

        assert!(matches!(b.initialize().unwrap(), Outcome::Skipped(SkipReason::Override)));
        assert!(loader.loaded.lock().unwrap().is_empty());
        assert_eq!(b.state(), BootstrapState::Skipped);
    }

    #[test]
    fn forced_override_skips_without_marker() {
        let ns = MemoryNamespace::new()
            .with("root/linux/x86/bit64/name", &b"model.so"[..])
            .with("root/linux/x86/bit64/model.so", &b"MODULE"[..]);
        let loader = Recording::default();
        let config = BootstrapConfig {
            base: "root".into(),
            descriptor_name: "name".into(),
            force_override: true,
            ..BootstrapConfig::default()
        };
        let b = Bootstrap::with_platform(config, ns, loader.clone(), LINUX64);
        assert!(matches!(b.initialize().unwrap(), Outcome::Skipped(SkipReason::Override)));
        assert!(loader.loaded.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_descriptor_skips_without_error() {
        let ns = MemoryNamespace::new().with("root/windows/x86/bit64/name", &b"x.dll"[..]);
        let b = bootstrap(ns, Recording::default());
        assert!(matches!(b.initialize().unwrap(), Outcome::Skipped(SkipReason::NoDescriptor)));
        assert_eq!(b.state(), BootstrapState::Skipped);
    }

    #[test]
    fn dangling_descriptor_fails_and_is_cached() {
        let ns = MemoryNamespace::new().with("root/linux/x86/bit64/name", &b"gone.so"[..]);
        let loader = Recording::default();
        let b = bootstrap(ns, loader.clone());

        let err = b.initialize().unwrap_err();
        match &err {
            JamSpellError::DanglingDescriptor { descriptor, target } => {
                assert_eq!(descriptor, "root/linux/x86/bit64/name");
                assert_eq!(target, "root/linux/x86/bit64/gone.so");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(b.state(), BootstrapState::Failed);

        let again = b.initialize().unwrap_err();
        assert_eq!(again.to_string(), err.to_string());
        assert!(loader.loaded.lock().unwrap().is_empty());
    }

    #[test]
    fn non_utf8_descriptor_is_malformed() {
        let ns = MemoryNamespace::new().with("root/linux/x86/bit64/name", &b"\xff\xfe\x00"[..]);
        let b = bootstrap(ns, Recording::default());
        let err = b.initialize().unwrap_err();
        assert!(matches!(err, JamSpellError::MalformedDescriptor { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn loader_failure_marks_failed() {
        struct Refusing;
        impl ModuleLoader for Refusing {
            fn load(&self, path: &Path) -> Result<Option<Library>> {
                Err(JamSpellError::Load {
                    path: path.display().to_string(),
                    message: "wrong ELF class".into(),
                })
            }
        }

        let ns = MemoryNamespace::new()
            .with("root/linux/x86/bit64/name", &b"model.so"[..])
            .with("root/linux/x86/bit64/model.so", &b"MODULE"[..]);
        let config = BootstrapConfig {
            base: "root".into(),
            descriptor_name: "name".into(),
            ..BootstrapConfig::default()
        };
        let b = Bootstrap::with_platform(config, ns, Refusing, LINUX64);
        assert!(matches!(b.initialize().unwrap_err(), JamSpellError::Load { .. }));
        assert_eq!(b.state(), BootstrapState::Failed);
    }

    #[test]
    fn module_read_failure_is_extract_error() {
        let loader = Recording::default();
        let b = Bootstrap::with_platform(test_config(), TruncatedModule, loader.clone(), LINUX64);

        let err = b.initialize().unwrap_err();
        match &err {
            JamSpellError::Extract { target, .. } => {
                assert_eq!(target, "root/linux/x86/bit64/model.so");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_configuration());
        assert_eq!(b.state(), BootstrapState::Failed);
        assert!(loader.loaded.lock().unwrap().is_empty());
    }

    #[test]
    fn blank_descriptor_is_empty_error() {
        let ns = MemoryNamespace::new().with("root/linux/x86/bit64/name", &b"  \r\n\t\n"[..]);
        let loader = Recording::default();
        let b = bootstrap(ns, loader.clone());

        let err = b.initialize().unwrap_err();
        match &err {
            JamSpellError::EmptyDescriptor { descriptor } => {
                assert_eq!(descriptor, "root/linux/x86/bit64/name");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_configuration());
        assert_eq!(b.state(), BootstrapState::Failed);
        assert!(loader.loaded.lock().unwrap().is_empty());
    }

    #[test]
    fn loader_panic_fails_once_and_is_cached() {
        #[derive(Default, Clone)]
        struct Panicking {
            calls: Arc<AtomicUsize>,
        }
        impl ModuleLoader for Panicking {
            fn load(&self, _path: &Path) -> Result<Option<Library>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                panic!("loader exploded");
            }
        }

        let ns = MemoryNamespace::new()
            .with("root/linux/x86/bit64/name", &b"model.so"[..])
            .with("root/linux/x86/bit64/model.so", &b"MODULE"[..]);
        let loader = Panicking::default();
        let b = Bootstrap::with_platform(test_config(), ns, loader.clone(), LINUX64);

        let err = b.initialize().unwrap_err();
        match &err {
            JamSpellError::BootstrapPanicked { message } => assert_eq!(message, "loader exploded"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(b.state(), BootstrapState::Failed);

        let again = b.initialize().unwrap_err();
        assert_eq!(again.to_string(), err.to_string());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn extracted_file_is_removed_after_load() {
        let ns = MemoryNamespace::new()
            .with("root/linux/x86/bit64/name", &b"model.so"[..])
            .with("root/linux/x86/bit64/model.so", &b"MODULE"[..]);
        let b = bootstrap(ns, Recording::default());
        let module = b.initialize().unwrap().module().unwrap();
        assert!(!module.path().exists());
    }
}
