// Opaque native handle.
//
// A handle is the address of an allocation made by the native engine. It is
// never dereferenced on this side of the boundary; only the destructor that
// matches the allocating call gives it meaning.

use std::ffi::c_void;
use std::fmt;

/// Address of a native-side allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativeHandle(usize);

impl NativeHandle {
    /// The sentinel "no allocation" value.
    pub const NULL: NativeHandle = NativeHandle(0);

    pub const fn from_raw(addr: usize) -> Self {
        Self(addr)
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:#x})", self.0)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
