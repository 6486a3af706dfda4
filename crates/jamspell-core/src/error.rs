// Error type shared by every JamSpell crate.
//
// Bootstrap failures are cached for the lifetime of the process and handed
// to every later caller, so the error is `Clone`: I/O causes are kept
// behind an `Arc`.

use std::io;
use std::sync::Arc;

/// Errors raised while bootstrapping or driving the native engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JamSpellError {
    /// The descriptor names a module resource that does not exist.
    #[error("library descriptor '{descriptor}' pointed to a library at '{target}', but it doesn't exist")]
    DanglingDescriptor { descriptor: String, target: String },

    /// The descriptor contains nothing but whitespace.
    #[error("library descriptor '{descriptor}' is empty")]
    EmptyDescriptor { descriptor: String },

    /// The descriptor is not valid UTF-8.
    #[error("library descriptor '{descriptor}' is not valid UTF-8")]
    MalformedDescriptor { descriptor: String },

    /// Copying the module resource to disk failed.
    #[error("unable to extract native library '{target}': {source}")]
    Extract {
        target: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading a resource from a namespace failed.
    #[error("unable to read resource '{path}': {source}")]
    Resource {
        path: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// The dynamic loader rejected the extracted module.
    #[error("unable to load native library '{path}': {message}")]
    Load { path: String, message: String },

    /// A custom loader or namespace panicked during the bootstrap.
    #[error("native library bootstrap panicked: {message}")]
    BootstrapPanicked { message: String },

    /// A required entry point is not exported by the native module.
    #[error("native library does not export '{symbol}': {message}")]
    MissingSymbol { symbol: String, message: String },

    /// No native capability is available in the process.
    #[error("native library is not loaded")]
    NotLoaded,

    /// The native engine reported a failure.
    #[error("{0}")]
    Engine(String),

    /// Text with an interior NUL cannot cross the native boundary.
    #[error("string contains an interior NUL byte")]
    InvalidString,

    /// Writing a temporary file for the engine failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<io::Error>,
    },
}

impl JamSpellError {
    /// Whether this error comes from a broken deployment (bad descriptor,
    /// missing module, failed extraction) rather than from the engine.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DanglingDescriptor { .. }
                | Self::EmptyDescriptor { .. }
                | Self::MalformedDescriptor { .. }
                | Self::Extract { .. }
                | Self::Resource { .. }
                | Self::Load { .. }
                | Self::BootstrapPanicked { .. }
        )
    }

    pub fn extract(target: impl Into<String>, source: io::Error) -> Self {
        Self::Extract {
            target: target.into(),
            source: Arc::new(source),
        }
    }

    pub fn resource(path: impl Into<String>, source: io::Error) -> Self {
        Self::Resource {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, JamSpellError>;
