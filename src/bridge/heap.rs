//! Foreign addresses and typed views over module linear memory
//!
//! All manual byte manipulation lives here. Addresses into the module's heap
//! are plain `u32` offsets wrapped in [`ForeignPtr`] so they cannot be
//! confused with host references, and every read or write goes through a
//! view that is borrowed from the instance at the point of use. Views are
//! deliberately transient: an allocation can grow the module's memory and
//! relocate its backing buffer, so a window obtained before an allocator
//! call must never be reused after it.

use super::error::{BridgeError, BridgeResult};
use super::module::ModuleInstance;

/// An address in the module's linear memory.
///
/// Meaningful only together with the instance that produced it. Not a host
/// reference: it cannot be dereferenced, and arithmetic plus bounds are the
/// caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignPtr(u32);

impl ForeignPtr {
    /// The null address
    pub const NULL: ForeignPtr = ForeignPtr(0);

    pub fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Raw offset into linear memory
    pub fn addr(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `delta` bytes past this one
    pub fn offset(self, delta: u32) -> Self {
        Self(self.0 + delta)
    }
}

/// Read chunk size when scanning for a NUL terminator
const CSTR_CHUNK: u32 = 64;

fn read_exact<M: ModuleInstance + ?Sized>(
    module: &M,
    ptr: ForeignPtr,
    len: u32,
) -> BridgeResult<Vec<u8>> {
    let bytes = module.memory_read(ptr, len)?;
    if bytes.len() != len as usize {
        return Err(BridgeError::OutOfBounds {
            address: ptr.addr(),
            len,
            memory_size: module.memory_size(),
        });
    }
    Ok(bytes)
}

/// Read-only typed window over an instance's linear memory.
///
/// Every width aliases the same underlying bytes: a write through a
/// [`HeapViewMut`] at some offset is immediately visible through any view at
/// the corresponding offset. Values are interpreted little-endian, matching
/// the wasm32 memory model (the supported hosts are little-endian, so pod
/// reads need no byte swapping).
pub struct HeapView<'m, M: ModuleInstance + ?Sized> {
    module: &'m M,
}

impl<'m, M: ModuleInstance + ?Sized> HeapView<'m, M> {
    pub fn new(module: &'m M) -> Self {
        Self { module }
    }

    /// Read one pod value (i8/u8/i16/u16/i32/u32/f32/f64) at `ptr`
    pub fn get<T: bytemuck::AnyBitPattern>(&self, ptr: ForeignPtr) -> BridgeResult<T> {
        let bytes = read_exact(self.module, ptr, size_of::<T>() as u32)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Copy `len` raw bytes out of memory
    pub fn bytes(&self, ptr: ForeignPtr, len: u32) -> BridgeResult<Vec<u8>> {
        read_exact(self.module, ptr, len)
    }

    /// Read a NUL-terminated byte string at `ptr` (terminator excluded).
    ///
    /// Stops at the end of memory if no terminator is found.
    pub fn cstr(&self, ptr: ForeignPtr) -> BridgeResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut addr = ptr;
        let size = self.module.memory_size();
        while addr.addr() < size {
            let chunk_len = CSTR_CHUNK.min(size - addr.addr());
            let chunk = read_exact(self.module, addr, chunk_len)?;
            match chunk.iter().position(|&b| b == 0) {
                Some(i) => {
                    out.extend_from_slice(&chunk[..i]);
                    return Ok(out);
                }
                None => {
                    out.extend_from_slice(&chunk);
                    addr = addr.offset(chunk_len);
                }
            }
        }
        Ok(out)
    }

    /// Read `count` consecutive 32-bit words starting at `ptr`
    pub fn u32_slice(&self, ptr: ForeignPtr, count: u32) -> BridgeResult<Vec<u32>> {
        let bytes = read_exact(self.module, ptr, count * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Mutable typed window over an instance's linear memory
pub struct HeapViewMut<'m, M: ModuleInstance + ?Sized> {
    module: &'m mut M,
}

impl<'m, M: ModuleInstance + ?Sized> HeapViewMut<'m, M> {
    pub fn new(module: &'m mut M) -> Self {
        Self { module }
    }

    /// Reborrow as a read-only view
    pub fn as_view(&self) -> HeapView<'_, M> {
        HeapView::new(self.module)
    }

    /// Write one pod value at `ptr`
    pub fn set<T: bytemuck::NoUninit>(&mut self, ptr: ForeignPtr, value: T) -> BridgeResult<()> {
        self.module.memory_write(ptr, bytemuck::bytes_of(&value))
    }

    /// Copy raw bytes into memory at `ptr`
    pub fn write_bytes(&mut self, ptr: ForeignPtr, data: &[u8]) -> BridgeResult<()> {
        self.module.memory_write(ptr, data)
    }

    /// Write consecutive 32-bit words starting at `ptr`
    pub fn write_u32_slice(&mut self, ptr: ForeignPtr, words: &[u32]) -> BridgeResult<()> {
        self.module.memory_write(ptr, bytemuck::cast_slice(words))
    }
}
