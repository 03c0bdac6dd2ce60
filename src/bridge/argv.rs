//! Argument-vector packing
//!
//! Encodes host strings into the module's heap following the C calling
//! convention: one NUL-terminated allocation per string, then one array of
//! 4-byte little-endian pointers to them. The resulting [`ArgvHandle`] is
//! the scoped owner of every allocation made; it is created immediately
//! before a call, consumed by exactly one invocation, and released exactly
//! once no matter which path the call leaves by.

use super::error::BridgeResult;
use super::heap::{ForeignPtr, HeapViewMut};
use super::module::ModuleInstance;

/// Pointer width of the 32-bit linear memory model
pub const POINTER_SIZE: u32 = 4;

/// Scoped owner of one packed argument vector.
///
/// Holds the pointer-array address, the element count, and every sub
/// allocation. [`release`](Self::release) frees all of them exactly once;
/// calling it again is a no-op, which lets cleanup run unconditionally on
/// both the success and the error path without double-freeing.
#[derive(Debug)]
pub struct ArgvHandle {
    argc: i32,
    argv: ForeignPtr,
    strings: Vec<ForeignPtr>,
    released: bool,
}

impl ArgvHandle {
    /// Number of packed arguments
    pub fn argc(&self) -> i32 {
        self.argc
    }

    /// Address of the pointer array
    pub fn argv(&self) -> ForeignPtr {
        self.argv
    }

    /// Whether the handle has already been released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Free the pointer array and every string allocation.
    ///
    /// Idempotent: only the first call deallocates.
    pub fn release<M: ModuleInstance + ?Sized>(&mut self, module: &mut M) {
        if self.released {
            return;
        }
        self.released = true;
        module.free(self.argv);
        for ptr in self.strings.drain(..) {
            module.free(ptr);
        }
    }
}

/// Encode `args` onto the module's heap as an `argc`/`argv` pair.
///
/// For each string, allocates `len + 1` bytes and writes the bytes followed
/// by a NUL terminator; a string that itself contains a NUL byte is
/// truncated there from the module's point of view. After all strings are
/// written, allocates `count * 4` bytes for the pointer array. An empty
/// `args` yields `argc == 0` and a zero-length array that must still be
/// released.
///
/// If an allocation fails mid-pack, everything already allocated is freed
/// before the error surfaces.
pub fn pack_argv<M: ModuleInstance + ?Sized>(
    module: &mut M,
    args: &[&str],
) -> BridgeResult<ArgvHandle> {
    let mut strings: Vec<ForeignPtr> = Vec::with_capacity(args.len());

    match write_argv(module, args, &mut strings) {
        Ok(argv) => Ok(ArgvHandle {
            argc: args.len() as i32,
            argv,
            strings,
            released: false,
        }),
        Err(e) => {
            for ptr in strings {
                module.free(ptr);
            }
            Err(e)
        }
    }
}

/// Write the strings and the pointer array; every allocation made before a
/// failure is recorded in `strings` (or freed here, for the array itself) so
/// the caller can unwind.
fn write_argv<M: ModuleInstance + ?Sized>(
    module: &mut M,
    args: &[&str],
    strings: &mut Vec<ForeignPtr>,
) -> BridgeResult<ForeignPtr> {
    for arg in args {
        let ptr = module.malloc(arg.len() as u32 + 1)?;
        strings.push(ptr);

        let mut bytes = Vec::with_capacity(arg.len() + 1);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);
        HeapViewMut::new(&mut *module).write_bytes(ptr, &bytes)?;
    }

    let argv = module.malloc(args.len() as u32 * POINTER_SIZE)?;
    let addrs: Vec<u32> = strings.iter().map(|p| p.addr()).collect();
    match HeapViewMut::new(&mut *module).write_u32_slice(argv, &addrs) {
        Ok(()) => Ok(argv),
        Err(e) => {
            module.free(argv);
            Err(e)
        }
    }
}
