// Bootstrap configuration: resource base, descriptor name and the
// directories searched for resources.
//
// Search order for `from_env`:
// 1. Every entry of `JAMSPELL_RESOURCE_PATH` (platform path-list syntax)
// 2. The directory containing the running executable
// 3. `~/.jamspell`, only with `JAMSPELL_SEARCH_USER_DIRS` set
// 4. Current working directory, only with `JAMSPELL_SEARCH_USER_DIRS` set
//
// Whatever these directories provide is loaded as native code, so locations
// other users or the invoking shell control stay out of the default list.

use std::env;
use std::ffi::OsStr;
use std::path::PathBuf;

use crate::resources::{DirNamespace, LayeredNamespace};

/// Default root of the JamSpell resource tree inside a namespace.
pub const DEFAULT_BASE: &str = "jamspell";

/// Default file name of the per-platform module descriptor.
pub const DEFAULT_DESCRIPTOR_NAME: &str = "jamspell-module-name";

/// Environment variable overriding [`BootstrapConfig::base`].
pub const ENV_RESOURCE_BASE: &str = "JAMSPELL_RESOURCE_BASE";

/// Environment variable listing resource directories.
pub const ENV_RESOURCE_PATH: &str = "JAMSPELL_RESOURCE_PATH";

/// Environment variable with the same effect as the override marker.
pub const ENV_NATIVE_OVERRIDE: &str = "JAMSPELL_NATIVE_OVERRIDE";

/// Environment variable adding `~/.jamspell` and the working directory to
/// the search path.
pub const ENV_SEARCH_USER_DIRS: &str = "JAMSPELL_SEARCH_USER_DIRS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Root of the resource tree (`<base>/override`, `<base>/<os>/...`).
    pub base: String,
    /// File name of the module descriptor in each platform directory.
    pub descriptor_name: String,
    /// Skip loading as if the override marker were present.
    pub force_override: bool,
    /// Directories searched, in order, by [`namespace`](Self::namespace).
    pub resource_dirs: Vec<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE.to_string(),
            descriptor_name: DEFAULT_DESCRIPTOR_NAME.to_string(),
            force_override: false,
            resource_dirs: Vec::new(),
        }
    }
}

impl BootstrapConfig {
    /// Defaults overlaid with the `JAMSPELL_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|key| env::var_os(key))
    }

    /// Like [`from_env`](Self::from_env), reading variables through `var`.
    pub fn from_vars(var: impl Fn(&str) -> Option<std::ffi::OsString>) -> Self {
        let mut config = Self::default();

        if let Some(base) = var(ENV_RESOURCE_BASE).and_then(|v| v.into_string().ok()) {
            let base = base.trim().trim_matches('/');
            if !base.is_empty() {
                config.base = base.to_string();
            }
        }

        if let Some(value) = var(ENV_NATIVE_OVERRIDE) {
            config.force_override = is_truthy(&value);
        }

        let user_dirs = var(ENV_SEARCH_USER_DIRS).is_some_and(|v| is_truthy(&v));
        config.resource_dirs = search_dirs(var(ENV_RESOURCE_PATH).as_deref(), user_dirs);
        config
    }

    /// Layered namespace over [`resource_dirs`](Self::resource_dirs).
    pub fn namespace(&self) -> LayeredNamespace {
        let mut layered = LayeredNamespace::new();
        for dir in &self.resource_dirs {
            layered.push(DirNamespace::new(dir.clone()));
        }
        layered
    }
}

fn is_truthy(value: &OsStr) -> bool {
    let value = value.to_string_lossy();
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

fn search_dirs(resource_path: Option<&OsStr>, user_dirs: bool) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(list) = resource_path {
        dirs.extend(env::split_paths(list).filter(|p| !p.as_os_str().is_empty()));
    }

    if let Some(exe_dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
    {
        dirs.push(exe_dir);
    }

    if user_dirs {
        if let Some(home) = home_dir() {
            dirs.push(home.join(".jamspell"));
        }
        if let Ok(cwd) = env::current_dir() {
            dirs.push(cwd);
        }
    }

    dirs.dedup();
    dirs
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
