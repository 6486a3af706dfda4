// Platform identity: the (OS family, architecture family, bitness) triple
// that selects a built-in native module.
//
// Each component is drawn from a small closed set with an `other` bucket.
// The identity is derived once per process and never changes afterwards.

use std::fmt;
use std::sync::LazyLock;

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    /// Any Microsoft Windows version.
    Windows,
    /// Any system running the Linux kernel, Android included.
    Linux,
    /// Any Apple macOS version.
    Mac,
    /// Any FreeBSD version.
    FreeBsd,
    /// Anything not listed above.
    Other,
}

impl OsFamily {
    /// Classify a Rust target OS name (`std::env::consts::OS` vocabulary).
    pub fn from_target(os: &str) -> Self {
        match os {
            "windows" => Self::Windows,
            "linux" | "android" => Self::Linux,
            "macos" => Self::Mac,
            "freebsd" => Self::FreeBsd,
            _ => Self::Other,
        }
    }

    pub const fn identifier(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Mac => "mac",
            Self::FreeBsd => "freebsd",
            Self::Other => "other",
        }
    }
}

/// Processor architecture family, independent of word size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchFamily {
    /// x86-compatible processors, 32- and 64-bit.
    X86,
    /// Intel Itanium.
    Ia64,
    /// PowerPC, 32- and 64-bit.
    Ppc,
    Other,
}

impl ArchFamily {
    /// Classify a Rust target architecture name (`std::env::consts::ARCH`
    /// vocabulary).
    pub fn from_target(arch: &str) -> Self {
        match arch {
            "x86" | "x86_64" => Self::X86,
            "ia64" => Self::Ia64,
            "powerpc" | "powerpc64" => Self::Ppc,
            _ => Self::Other,
        }
    }

    pub const fn identifier(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::Ia64 => "ia64",
            Self::Ppc => "ppc",
            Self::Other => "other",
        }
    }
}

/// Pointer width class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitness {
    Bit32,
    Bit64,
    Other,
}

impl Bitness {
    pub fn from_pointer_width(bits: u32) -> Self {
        match bits {
            32 => Self::Bit32,
            64 => Self::Bit64,
            _ => Self::Other,
        }
    }

    pub const fn identifier(self) -> &'static str {
        match self {
            Self::Bit32 => "bit32",
            Self::Bit64 => "bit64",
            Self::Other => "other",
        }
    }
}

/// The platform triple used to look up a module descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformIdentity {
    pub os: OsFamily,
    pub arch: ArchFamily,
    pub bits: Bitness,
}

static CURRENT: LazyLock<PlatformIdentity> = LazyLock::new(|| {
    PlatformIdentity::from_parts(
        std::env::consts::OS,
        std::env::consts::ARCH,
        usize::BITS,
    )
});

impl PlatformIdentity {
    pub const fn new(os: OsFamily, arch: ArchFamily, bits: Bitness) -> Self {
        Self { os, arch, bits }
    }

    /// Classify from target names and pointer width in bits.
    pub fn from_parts(os: &str, arch: &str, pointer_width: u32) -> Self {
        Self {
            os: OsFamily::from_target(os),
            arch: ArchFamily::from_target(arch),
            bits: Bitness::from_pointer_width(pointer_width),
        }
    }

    /// Identity of the running process, derived on first call.
    pub fn current() -> Self {
        *CURRENT
    }

    /// `<os>/<arch>/<bits>`, with no leading or trailing `/`.
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.os.identifier(),
            self.arch.identifier(),
            self.bits.identifier()
        )
    }
}

impl fmt::Display for PlatformIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
