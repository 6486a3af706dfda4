//! Native side of JamSpell: bootstrap of the platform module, reclamation
//! of native handles, and the [`SpellCorrector`] facade.
//!
//! # Architecture
//!
//! - [`resources`] -- Resource namespaces (directory, in-memory, layered)
//! - [`config`] -- Bootstrap configuration and environment overrides
//! - [`loader`] -- Module extraction to disk and dynamic loading
//! - [`bootstrap`] -- One-shot, process-wide module resolution and load
//! - [`reclaimer`] -- Background release of native handles
//! - [`engine`] -- The native engine capability over the module's C ABI
//! - [`corrector`] -- Spell corrector owning one native handle
//!
//! # Resource layout
//!
//! ```text
//! <base>/override                              presence-only marker
//! <base>/<os>/<arch>/<bits>/jamspell-module-name  descriptor naming the module
//! ```
//!
//! The descriptor holds a single path: relative to the descriptor's
//! directory, or absolute within the namespace when it starts with `/`.

pub mod bootstrap;
pub mod config;
pub mod corrector;
pub mod engine;
pub mod loader;
pub mod reclaimer;
pub mod resources;

pub use bootstrap::{Bootstrap, BootstrapState, Outcome, SkipReason, global_state, initialize};
pub use config::BootstrapConfig;
pub use corrector::SpellCorrector;
pub use engine::{NativeEngine, SymbolEngine};
pub use jamspell_core::{JamSpellError, NativeHandle, PlatformIdentity, Result};
pub use loader::{DynamicLoader, ModuleLoader};
pub use reclaimer::{Reclaimer, Tracked};
pub use resources::{DirNamespace, LayeredNamespace, MemoryNamespace, ResourceNamespace};
