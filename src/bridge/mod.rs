//! Marshaling core for Emscripten-style CLI modules
//!
//! An Emscripten-built tool does not expose a library API. It exposes the
//! classic command-line entry point, compiled against a flat 32-bit linear
//! memory:
//!
//! ```text
//! main(argc: i32, argv: i32) -> i32
//! ```
//!
//! where `argv` is the address of an array of `argc` 4-byte pointers, each
//! pointing to a NUL-terminated byte string, and the returned integer is the
//! process exit status (0 = success). Input and output files go through the
//! module's own in-memory filesystem, because the entry point communicates
//! only through `argc`/`argv`, not return values.
//!
//! # Calling protocol
//!
//! For an invocation `cmd arg1 arg2`:
//!
//! 1. For each of `["cmd", "arg1", "arg2"]`, allocate `len + 1` bytes with
//!    the *module's* allocator and write the bytes plus a NUL terminator.
//! 2. Allocate `3 * 4` bytes and write the three addresses, little-endian.
//! 3. Call the entry point with `(3, pointer_array_address)`.
//! 4. Free the pointer array and every string allocation, exactly once,
//!    whether the call returned 0, returned nonzero, or erred mid-dispatch.
//!
//! Step 4 is the reason this module exists. The module's heap is invisible
//! to the host: nothing reclaims these allocations if the bridge loses track
//! of them, so every acquisition here is paired with a release reachable on
//! every exit path.
//!
//! # Memory model
//!
//! All addresses are offsets into the module's linear memory, never host
//! pointers. They are represented by the non-dereferenceable [`ForeignPtr`];
//! reads and writes go through [`HeapView`]/[`HeapViewMut`], which are
//! re-acquired per use because an allocation may grow (and relocate) the
//! backing memory, invalidating any previously obtained window.
//!
//! # Concurrency
//!
//! One in-flight call per instance. The module's memory, allocator, and
//! filesystem are unguarded shared state; callers that need parallelism run
//! independent instances.

mod argv;
mod error;
mod fs;
mod heap;
mod invoke;
mod module;

#[cfg(target_arch = "wasm32")]
mod emscripten;

pub use argv::{ArgvHandle, POINTER_SIZE, pack_argv};
pub use error::{BridgeError, BridgeResult};
pub use fs::{FileStat, VfsBridge, temp_name, temp_token};
pub use heap::{ForeignPtr, HeapView, HeapViewMut};
pub use module::{Bridge, CallArg, CallRet, CallValue, ModuleConfig, ModuleInstance};

#[cfg(target_arch = "wasm32")]
pub use emscripten::EmscriptenModule;

#[cfg(test)]
mod tests;
