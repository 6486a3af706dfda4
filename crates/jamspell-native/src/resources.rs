// Resource namespaces: hierarchical, `/`-separated stores the bootstrap
// reads descriptors and module binaries from.
//
// A namespace does not have to expose loadable file paths (it may live in
// memory), which is why modules are always copied out before loading.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Read-only view over a tree of named resources.
pub trait ResourceNamespace: Send + Sync {
    /// Open the resource at `path`, or `Ok(None)` if it does not exist.
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>>;

    /// Whether a resource exists at `path`.
    fn exists(&self, path: &str) -> bool {
        matches!(self.open(path), Ok(Some(_)))
    }
}

impl<N: ResourceNamespace + ?Sized> ResourceNamespace for Box<N> {
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        (**self).open(path)
    }

    fn exists(&self, path: &str) -> bool {
        (**self).exists(path)
    }
}

/// Split a resource path into segments, rejecting anything that could
/// escape the namespace root.
fn segments(path: &str) -> Option<Vec<&str>> {
    let mut out = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains(':') => return None,
            s => out.push(s),
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

// ── Filesystem directory ─────────────────────────────────────────

/// Namespace rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirNamespace {
    root: PathBuf,
}

impl DirNamespace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &str) -> Option<PathBuf> {
        let mut full = self.root.clone();
        for segment in segments(path)? {
            full.push(segment);
        }
        Some(full)
    }
}

impl ResourceNamespace for DirNamespace {
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        let Some(full) = self.file_path(path) else {
            return Ok(None);
        };
        if !full.is_file() {
            return Ok(None);
        }
        match File::open(&full) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.file_path(path).is_some_and(|p| p.is_file())
    }
}

// ── In-memory ────────────────────────────────────────────────────

/// Namespace backed by a map of byte buffers, typically filled with
/// `include_bytes!` so the module ships inside the host binary.
#[derive(Debug, Clone, Default)]
pub struct MemoryNamespace {
    entries: HashMap<String, Cow<'static, [u8]>>,
}

impl MemoryNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a resource. Leading `/` is ignored.
    pub fn insert(&mut self, path: &str, data: impl Into<Cow<'static, [u8]>>) {
        self.entries
            .insert(path.trim_start_matches('/').to_string(), data.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, path: &str, data: impl Into<Cow<'static, [u8]>>) -> Self {
        self.insert(path, data);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceNamespace for MemoryNamespace {
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        Ok(self
            .entries
            .get(path.trim_start_matches('/'))
            .map(|data| Box::new(data.as_ref()) as Box<dyn Read + '_>))
    }

    fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(path.trim_start_matches('/'))
    }
}

// ── Layered ──────────────────────────────────────────────────────

/// Ordered search over several namespaces; the first hit wins.
#[derive(Default)]
pub struct LayeredNamespace {
    layers: Vec<Box<dyn ResourceNamespace>>,
}

impl LayeredNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: impl ResourceNamespace + 'static) {
        self.layers.push(Box::new(layer));
    }

    pub fn with(mut self, layer: impl ResourceNamespace + 'static) -> Self {
        self.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ResourceNamespace for LayeredNamespace {
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        for layer in &self.layers {
            if let Some(reader) = layer.open(path)? {
                return Ok(Some(reader));
            }
        }
        Ok(None)
    }

    fn exists(&self, path: &str) -> bool {
        self.layers.iter().any(|layer| layer.exists(path))
    }
}
