// Resource path building and descriptor target resolution.
//
// Resource paths are `/`-separated and relative to a namespace root. They
// never start with `/` once normalized.

use crate::error::{JamSpellError, Result};
use crate::platform::PlatformIdentity;

/// Name of the presence-only marker that disables built-in module loading.
pub const OVERRIDE_NAME: &str = "override";

/// Join two path fragments with exactly one `/`. Empty fragments are skipped.
pub fn join(base: &str, segment: &str) -> String {
    let base = base.trim_end_matches('/');
    let segment = segment.trim_start_matches('/');
    match (base.is_empty(), segment.is_empty()) {
        (true, _) => segment.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{segment}"),
    }
}

/// `<base>/override`
pub fn override_path(base: &str) -> String {
    join(base, OVERRIDE_NAME)
}

/// `<base>/<os>/<arch>/<bits>`
pub fn platform_dir(base: &str, platform: &PlatformIdentity) -> String {
    join(base, &platform.path())
}

/// `<base>/<os>/<arch>/<bits>/<descriptor_name>`
pub fn descriptor_path(base: &str, platform: &PlatformIdentity, descriptor_name: &str) -> String {
    join(&platform_dir(base, platform), descriptor_name)
}

/// Directory part of a resource path (everything before the last `/`).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Last segment of a resource path.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Interpret descriptor contents as the path of the module resource.
///
/// The contents are trimmed. A leading `/` makes the path absolute within
/// the namespace; anything else is relative to the descriptor's directory.
pub fn resolve_target(descriptor: &str, contents: &str) -> Result<String> {
    let target = contents.trim();
    if target.is_empty() {
        return Err(JamSpellError::EmptyDescriptor {
            descriptor: descriptor.to_string(),
        });
    }

    match target.strip_prefix('/') {
        Some(absolute) => Ok(absolute.to_string()),
        None => Ok(join(parent(descriptor), target)),
    }
}
