// Module extraction and dynamic loading.
//
// This is the only module besides `engine` where `unsafe` is permitted.
// Every `unsafe` block carries a `// SAFETY:` comment.
//
// Loaded libraries are never unloaded: the module's exported symbols stay
// live for the rest of the process.
//
// Where a mapped module cannot be unlinked, its extracted copy outlives the
// process. `sweep_stale_modules` removes such leftovers on a later start.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, SystemTime};

use jamspell_core::resource_path;
use jamspell_core::{JamSpellError, Result};
use libloading::Library;
use tempfile::TempPath;

/// Prefix of every extracted module file name.
pub const TEMP_PREFIX: &str = "jamspell-module-";

/// Extracted modules older than this are taken as abandoned by
/// [`sweep_stale_modules`].
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Brings a module on the local filesystem into the process.
pub trait ModuleLoader: Send + Sync {
    /// Load the module at `path`.
    ///
    /// Returns the library handle, or `None` if the loader made the symbols
    /// process-visible without keeping a handle to them.
    fn load(&self, path: &Path) -> Result<Option<Library>>;
}

/// Loader backed by the platform's dynamic linker.
///
/// On Unix the module is opened with `RTLD_NOW | RTLD_GLOBAL` so its
/// symbols are also visible through the process-wide symbol table.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl ModuleLoader for DynamicLoader {
    fn load(&self, path: &Path) -> Result<Option<Library>> {
        open_library(path)
            .map(Some)
            .map_err(|e| JamSpellError::Load {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(unix)]
fn open_library(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    // SAFETY: loading a module runs its initialisers. The module is the one
    // shipped for this platform, which is trusted to the same degree as the
    // host binary.
    let library = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }?;
    Ok(library.into())
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> std::result::Result<Library, libloading::Error> {
    // SAFETY: see the Unix variant; the loader resolves `path` as given.
    unsafe { Library::new(path) }
}

/// Copy `reader` to a fresh, process-unique temporary file whose name ends
/// with the last segment of `target`.
///
/// The file is removed when the returned [`TempPath`] is dropped.
pub fn extract_module(reader: &mut dyn Read, target: &str) -> Result<TempPath> {
    let suffix = resource_path::file_name(target);
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(suffix)
        .tempfile()
        .map_err(|e| JamSpellError::extract(target, e))?;

    io::copy(reader, file.as_file_mut()).map_err(|e| JamSpellError::extract(target, e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| JamSpellError::extract(target, e))?;

    Ok(file.into_temp_path())
}

/// Remove extracted modules older than `max_age` from `dir`, returning how
/// many were deleted.
///
/// A copy still mapped by a running process cannot be deleted on Windows;
/// the failure is ignored and the file is retried on the next sweep.
pub fn sweep_stale_modules(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let stale = meta.is_file()
            && meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= max_age);
        if !stale {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "removed stale extracted module");
                removed += 1;
            }
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "stale module still in use");
            }
        }
    }
    removed
}
