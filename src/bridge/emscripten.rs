//! Browser-side binding to an Emscripten module object
//!
//! An Emscripten build exports a factory function resolving to a module
//! object that carries typed heap views (`HEAPU8`, ...), the C allocator
//! (`_malloc`/`_free`), a `ccall` dispatcher, and the in-memory `FS`
//! object. This module adapts that object to [`ModuleInstance`].
//!
//! The heap view is re-fetched from the module object on every access:
//! growing the heap makes Emscripten swap the backing buffer and republish
//! fresh views, so caching one here would read from a detached buffer.

use js_sys::{Array, Function, Object, Promise, Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use super::error::{BridgeError, BridgeResult};
use super::fs::FileStat;
use super::heap::ForeignPtr;
use super::module::{CallArg, CallRet, CallValue, ModuleConfig, ModuleInstance};

fn js_reason(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

/// An instantiated Emscripten module object
pub struct EmscriptenModule {
    raw: JsValue,
}

impl EmscriptenModule {
    /// Call the factory with `{ noInitialRun }` and await its promise.
    ///
    /// Fails with [`InitializationFailed`](BridgeError::InitializationFailed)
    /// if `factory` is not a function, does not return a promise, or the
    /// promise rejects.
    pub async fn instantiate(factory: &JsValue, config: ModuleConfig) -> BridgeResult<Self> {
        let factory: &Function =
            factory
                .dyn_ref()
                .ok_or_else(|| BridgeError::InitializationFailed {
                    reason: "module factory is not a function".to_string(),
                })?;

        let options = Object::new();
        Reflect::set(
            &options,
            &JsValue::from_str("noInitialRun"),
            &JsValue::from_bool(config.no_initial_run),
        )
        .map_err(|e| BridgeError::InitializationFailed {
            reason: js_reason(&e),
        })?;

        let pending =
            factory
                .call1(&JsValue::NULL, &options)
                .map_err(|e| BridgeError::InitializationFailed {
                    reason: js_reason(&e),
                })?;

        let promise: Promise =
            pending
                .dyn_into()
                .map_err(|_| BridgeError::InitializationFailed {
                    reason: "module factory did not return a promise".to_string(),
                })?;

        let raw = JsFuture::from(promise)
            .await
            .map_err(|e| BridgeError::InitializationFailed {
                reason: js_reason(&e),
            })?;

        Ok(Self { raw })
    }

    fn get(&self, name: &'static str) -> BridgeResult<JsValue> {
        let value = Reflect::get(&self.raw, &JsValue::from_str(name))
            .map_err(|_| BridgeError::MissingExport { name })?;
        if value.is_undefined() {
            return Err(BridgeError::MissingExport { name });
        }
        Ok(value)
    }

    fn function(&self, name: &'static str) -> BridgeResult<Function> {
        self.get(name)?
            .dyn_into()
            .map_err(|_| BridgeError::MissingExport { name })
    }

    fn heap_u8(&self) -> BridgeResult<Uint8Array> {
        self.get("HEAPU8")?
            .dyn_into()
            .map_err(|_| BridgeError::MissingExport { name: "HEAPU8" })
    }

    fn fs_method(&self, name: &'static str) -> BridgeResult<(JsValue, Function)> {
        let fs = self.get("FS")?;
        let method: Function = Reflect::get(&fs, &JsValue::from_str(name))
            .ok()
            .and_then(|v| v.dyn_into().ok())
            .ok_or(BridgeError::MissingExport { name })?;
        Ok((fs, method))
    }
}

impl ModuleInstance for EmscriptenModule {
    fn memory_size(&self) -> u32 {
        self.heap_u8().map(|h| h.length()).unwrap_or(0)
    }

    fn memory_read(&self, ptr: ForeignPtr, len: u32) -> BridgeResult<Vec<u8>> {
        let heap = self.heap_u8()?;
        let end = ptr.addr() + len;
        if end > heap.length() {
            return Err(BridgeError::OutOfBounds {
                address: ptr.addr(),
                len,
                memory_size: heap.length(),
            });
        }
        let mut out = vec![0u8; len as usize];
        heap.subarray(ptr.addr(), end).copy_to(&mut out);
        Ok(out)
    }

    fn memory_write(&mut self, ptr: ForeignPtr, data: &[u8]) -> BridgeResult<()> {
        let heap = self.heap_u8()?;
        let end = ptr.addr() + data.len() as u32;
        if end > heap.length() {
            return Err(BridgeError::OutOfBounds {
                address: ptr.addr(),
                len: data.len() as u32,
                memory_size: heap.length(),
            });
        }
        for (i, &byte) in data.iter().enumerate() {
            heap.set_index(ptr.addr() + i as u32, byte);
        }
        Ok(())
    }

    fn malloc(&mut self, size: u32) -> BridgeResult<ForeignPtr> {
        let malloc = self.function("_malloc")?;
        let result = malloc
            .call1(&self.raw, &JsValue::from(size))
            .map_err(|e| BridgeError::Aborted {
                entry: "_malloc".to_string(),
                reason: js_reason(&e),
            })?;
        let addr = result.as_f64().unwrap_or(0.0) as u32;
        if addr == 0 {
            return Err(BridgeError::AllocationFailed { requested: size });
        }
        Ok(ForeignPtr::new(addr))
    }

    fn free(&mut self, ptr: ForeignPtr) {
        // Best-effort: a failed free cannot be recovered from, and must not
        // mask whatever error triggered the unwind that called us.
        if let Ok(free) = self.function("_free") {
            let _ = free.call1(&self.raw, &JsValue::from(ptr.addr()));
        }
    }

    fn call(&mut self, entry: &str, ret: CallRet, args: &[CallArg]) -> BridgeResult<CallValue> {
        let ccall = self.function("ccall")?;

        let types = Array::new();
        let values = Array::new();
        for arg in args {
            match arg {
                CallArg::Text(s) => {
                    types.push(&JsValue::from_str("string"));
                    values.push(&JsValue::from_str(s));
                }
                CallArg::Integer(v) => {
                    types.push(&JsValue::from_str("number"));
                    values.push(&JsValue::from(*v));
                }
                CallArg::Real(v) => {
                    types.push(&JsValue::from_str("number"));
                    values.push(&JsValue::from(*v));
                }
                CallArg::Boolean(b) => {
                    types.push(&JsValue::from_str("boolean"));
                    values.push(&JsValue::from_bool(*b));
                }
                CallArg::Bytes(bytes) => {
                    let array = Uint8Array::new_with_length(bytes.len() as u32);
                    array.copy_from(bytes);
                    types.push(&JsValue::from_str("array"));
                    values.push(array.as_ref());
                }
            }
        }

        let ret_type: JsValue = match ret {
            CallRet::Nothing => JsValue::NULL,
            CallRet::Integer | CallRet::Real => JsValue::from_str("number"),
            CallRet::Boolean => JsValue::from_str("boolean"),
        };

        let call_args = Array::of4(&JsValue::from_str(entry), &ret_type, &types, &values);
        let result = ccall
            .apply(&self.raw, &call_args)
            .map_err(|e| BridgeError::Aborted {
                entry: entry.to_string(),
                reason: js_reason(&e),
            })?;

        match ret {
            CallRet::Nothing => Ok(CallValue::Nothing),
            CallRet::Integer => {
                result
                    .as_f64()
                    .map(|v| CallValue::Integer(v as i32))
                    .ok_or_else(|| BridgeError::Aborted {
                        entry: entry.to_string(),
                        reason: "entry point returned a non-numeric status".to_string(),
                    })
            }
            CallRet::Real => {
                result
                    .as_f64()
                    .map(CallValue::Real)
                    .ok_or_else(|| BridgeError::Aborted {
                        entry: entry.to_string(),
                        reason: "entry point returned a non-numeric value".to_string(),
                    })
            }
            CallRet::Boolean => Ok(CallValue::Boolean(result.is_truthy())),
        }
    }

    fn fs_write(&mut self, path: &str, data: &[u8]) -> BridgeResult<()> {
        let (fs, write_file) = self.fs_method("writeFile")?;
        let array = Uint8Array::new_with_length(data.len() as u32);
        array.copy_from(data);
        write_file
            .call2(&fs, &JsValue::from_str(path), &array)
            .map_err(|e| BridgeError::Fs {
                op: "write",
                path: path.to_string(),
                reason: js_reason(&e),
            })?;
        Ok(())
    }

    fn fs_read(&self, path: &str) -> BridgeResult<Vec<u8>> {
        let (fs, read_file) = self.fs_method("readFile")?;
        let result = read_file
            .call1(&fs, &JsValue::from_str(path))
            .map_err(|e| BridgeError::Fs {
                op: "read",
                path: path.to_string(),
                reason: js_reason(&e),
            })?;
        let array: Uint8Array = result.dyn_into().map_err(|_| BridgeError::Fs {
            op: "read",
            path: path.to_string(),
            reason: "file contents are not a byte buffer".to_string(),
        })?;
        Ok(array.to_vec())
    }

    fn fs_remove(&mut self, path: &str) -> BridgeResult<()> {
        let (fs, unlink) = self.fs_method("unlink")?;
        unlink
            .call1(&fs, &JsValue::from_str(path))
            .map_err(|e| BridgeError::Fs {
                op: "remove",
                path: path.to_string(),
                reason: js_reason(&e),
            })?;
        Ok(())
    }

    fn fs_exists(&self, path: &str) -> bool {
        let Ok((fs, analyze_path)) = self.fs_method("analyzePath") else {
            return false;
        };
        analyze_path
            .call1(&fs, &JsValue::from_str(path))
            .ok()
            .and_then(|info| Reflect::get(&info, &JsValue::from_str("exists")).ok())
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn fs_stat(&self, path: &str) -> Option<FileStat> {
        let (fs, stat) = self.fs_method("stat").ok()?;
        let info = stat.call1(&fs, &JsValue::from_str(path)).ok()?;
        let size = Reflect::get(&info, &JsValue::from_str("size"))
            .ok()?
            .as_f64()?;
        Some(FileStat { size: size as u64 })
    }
}
