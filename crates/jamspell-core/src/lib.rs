//! Shared types for the JamSpell native bridge.
//!
//! Nothing in this crate touches native code. It holds the vocabulary the
//! loader and the corrector facade agree on.
//!
//! # Architecture
//!
//! - [`handle`] -- Opaque native handle with a null sentinel
//! - [`platform`] -- Platform identity (OS family, architecture, bitness)
//! - [`resource_path`] -- Building and resolving `/`-separated resource paths
//! - [`error`] -- Error type shared by every JamSpell crate

pub mod error;
pub mod handle;
pub mod platform;
pub mod resource_path;

pub use error::{JamSpellError, Result};
pub use handle::NativeHandle;
pub use platform::PlatformIdentity;
