//! embridge - drive Emscripten-built CLI modules from Rust
//!
//! Many native tools ship as Emscripten builds: a WASM linear memory image
//! plus a JS module object exposing the C allocator (`_malloc`/`_free`), a
//! `ccall` dispatcher, and an in-memory filesystem (`FS`). This crate turns
//! such a module into an ordinary library call: it marshals string arguments
//! into the module's heap following the C `argc`/`argv` convention, invokes
//! a `main(argc, argv) -> status` entry point, and exchanges input/output
//! buffers through the module's virtual filesystem.
//!
//! The crate has two layers:
//! - [`bridge`]: the marshaling core (heap views, allocator facade, argv
//!   packer, call invoker, filesystem pass-through, module lifecycle)
//! - [`basisu`]: a front-end for the Basis Universal encoder built on it
//!
//! Platform support:
//! - Browser (wasm32-unknown-unknown): binds a real Emscripten module object
//! - Native: any [`bridge::ModuleInstance`] implementation (used by tests)

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod basisu;
pub mod bridge;

pub use basisu::{Basisu, PackOptions};
pub use bridge::{Bridge, BridgeError, BridgeResult, ForeignPtr, ModuleConfig, ModuleInstance};

/// Install the panic hook for better error messages in the browser console
#[cfg(target_arch = "wasm32")]
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Console logging helper
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    pub fn log(s: &str);
}

/// Log to browser console (WASM)
#[cfg(target_arch = "wasm32")]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        $crate::log(&format!($($t)*))
    };
}

/// Log to stderr (native)
#[cfg(not(target_arch = "wasm32"))]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}
