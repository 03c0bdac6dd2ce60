//! Module lifecycle and the instance contract
//!
//! [`ModuleInstance`] is the seam between the marshaling core and whatever
//! actually hosts the foreign module: in the browser that is an Emscripten
//! module object, in native tests a scripted stand-in. [`Bridge`] owns one
//! instance for its whole life, created by a one-time asynchronous factory,
//! and refuses every operation until that initialization has completed.

use std::future::Future;

use super::argv::{self, ArgvHandle};
use super::error::{BridgeError, BridgeResult};
use super::fs::{FileStat, VfsBridge};
use super::heap::{ForeignPtr, HeapView, HeapViewMut};
use super::invoke;

/// Configuration handed to the module factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Suppress any automatic entry-point run at load time. CLI-style
    /// modules would otherwise execute `main` with no arguments as soon as
    /// the factory resolves.
    pub no_initial_run: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            no_initial_run: true,
        }
    }
}

/// The closed set of marshalable argument kinds for a named call
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Text(String),
    Integer(i32),
    Real(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
}

/// Expected return kind of a named call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRet {
    Nothing,
    Integer,
    Real,
    Boolean,
}

/// Value produced by a named call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallValue {
    Nothing,
    Integer(i32),
    Real(f64),
    Boolean(bool),
}

impl CallValue {
    pub fn integer(self) -> Option<i32> {
        match self {
            Self::Integer(v) => Some(v),
            _ => None,
        }
    }
}

/// An instantiated foreign module.
///
/// Everything the marshaling core needs from a module: its linear memory,
/// its allocator, a named-call dispatcher, and its private filesystem.
/// Addresses returned by [`malloc`](Self::malloc) belong to the module's
/// heap and must be released through [`free`](Self::free), never through the
/// host allocator.
pub trait ModuleInstance {
    /// Current size of linear memory in bytes
    fn memory_size(&self) -> u32;

    /// Copy `len` bytes out of linear memory starting at `ptr`
    fn memory_read(&self, ptr: ForeignPtr, len: u32) -> BridgeResult<Vec<u8>>;

    /// Copy `data` into linear memory starting at `ptr`
    fn memory_write(&mut self, ptr: ForeignPtr, data: &[u8]) -> BridgeResult<()>;

    /// Allocate `size` bytes on the module's heap.
    ///
    /// `malloc(0)` is permitted and returns an address that must still be
    /// released.
    fn malloc(&mut self, size: u32) -> BridgeResult<ForeignPtr>;

    /// Release an address previously returned by [`malloc`](Self::malloc).
    ///
    /// Releasing an address that is not currently allocated is undefined
    /// behavior at the module level; callers uphold a single-release
    /// discipline (see [`ArgvHandle`]).
    fn free(&mut self, ptr: ForeignPtr);

    /// Invoke the named entry point with typed arguments
    fn call(&mut self, entry: &str, ret: CallRet, args: &[CallArg]) -> BridgeResult<CallValue>;

    /// Write a file into the module's filesystem, replacing any existing one
    fn fs_write(&mut self, path: &str, data: &[u8]) -> BridgeResult<()>;

    /// Read a file from the module's filesystem
    fn fs_read(&self, path: &str) -> BridgeResult<Vec<u8>>;

    /// Delete a file from the module's filesystem
    fn fs_remove(&mut self, path: &str) -> BridgeResult<()>;

    /// Whether a file exists in the module's filesystem
    fn fs_exists(&self, path: &str) -> bool;

    /// File metadata, or `None` if the path does not exist
    fn fs_stat(&self, path: &str) -> Option<FileStat>;
}

/// Owner of one module instance and front door to the marshaling core.
///
/// ```ignore
/// let mut bridge = Bridge::new();
/// bridge.init(|config| factory(config)).await?;
/// bridge.fs()?.write("in.png", &image)?;
/// bridge.call_cli("main", &["-info", "in.png"])?;
/// ```
pub struct Bridge<M: ModuleInstance> {
    module: Option<M>,
}

impl<M: ModuleInstance> Bridge<M> {
    /// Create an uninitialized bridge
    pub fn new() -> Self {
        Self { module: None }
    }

    /// Run the asynchronous module factory and store the instance.
    ///
    /// Called once per bridge; the instance lives for the rest of the
    /// bridge's life (the module holds no external resources, so there is
    /// no teardown).
    pub async fn init<F, Fut>(&mut self, factory: F) -> BridgeResult<()>
    where
        F: FnOnce(ModuleConfig) -> Fut,
        Fut: Future<Output = BridgeResult<M>>,
    {
        let module = factory(ModuleConfig::default()).await?;
        self.module = Some(module);
        Ok(())
    }

    /// Whether initialization has completed
    pub fn is_ready(&self) -> bool {
        self.module.is_some()
    }

    /// Borrow the instance, failing before readiness
    pub fn module(&self) -> BridgeResult<&M> {
        self.module.as_ref().ok_or(BridgeError::NotInitialized)
    }

    /// Mutably borrow the instance, failing before readiness
    pub fn module_mut(&mut self) -> BridgeResult<&mut M> {
        self.module.as_mut().ok_or(BridgeError::NotInitialized)
    }

    /// Allocate on the module's heap
    pub fn alloc(&mut self, size: u32) -> BridgeResult<ForeignPtr> {
        self.module_mut()?.malloc(size)
    }

    /// Release a module-heap allocation
    pub fn release(&mut self, ptr: ForeignPtr) -> BridgeResult<()> {
        self.module_mut()?.free(ptr);
        Ok(())
    }

    /// Current read-only heap view. Re-acquire after any allocator call.
    pub fn heap(&self) -> BridgeResult<HeapView<'_, M>> {
        Ok(HeapView::new(self.module()?))
    }

    /// Current mutable heap view. Re-acquire after any allocator call.
    pub fn heap_mut(&mut self) -> BridgeResult<HeapViewMut<'_, M>> {
        Ok(HeapViewMut::new(self.module_mut()?))
    }

    /// The module's virtual filesystem
    pub fn fs(&mut self) -> BridgeResult<VfsBridge<'_, M>> {
        Ok(VfsBridge::new(self.module_mut()?))
    }

    /// Encode arguments onto the module's heap as an `argc`/`argv` pair
    pub fn pack_argv(&mut self, args: &[&str]) -> BridgeResult<ArgvHandle> {
        argv::pack_argv(self.module_mut()?, args)
    }

    /// Invoke `entry` with `[command, ...args]` as its argument vector
    pub fn invoke(&mut self, entry: &str, command: &str, args: &[&str]) -> BridgeResult<()> {
        invoke::invoke(self.module_mut()?, entry, command, args)
    }

    /// Invoke an entry point whose name doubles as the command name,
    /// matching the usual `main`-style convention
    pub fn call_cli(&mut self, command: &str, args: &[&str]) -> BridgeResult<()> {
        self.invoke(command, command, args)
    }
}

impl<M: ModuleInstance> Default for Bridge<M> {
    fn default() -> Self {
        Self::new()
    }
}
