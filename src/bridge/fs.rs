//! Pass-through to the module's virtual filesystem
//!
//! The invoked entry point communicates only through `argc`/`argv`, so
//! input and output buffers travel through the module's private in-memory
//! filesystem instead. This is a thin, synchronous pass-through: the bridge
//! performs no automatic cleanup, and callers delete every entry they
//! create on both the success and the failure path.

use super::error::BridgeResult;
use super::module::ModuleInstance;

/// File metadata as reported by the module's filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// File size in bytes
    pub size: u64,
}

/// Borrowed view of one instance's filesystem
pub struct VfsBridge<'m, M: ModuleInstance + ?Sized> {
    module: &'m mut M,
}

impl<'m, M: ModuleInstance + ?Sized> VfsBridge<'m, M> {
    pub fn new(module: &'m mut M) -> Self {
        Self { module }
    }

    /// Write a file, replacing any existing entry at `path`
    pub fn write(&mut self, path: &str, data: &[u8]) -> BridgeResult<()> {
        self.module.fs_write(path, data)
    }

    /// Read a file's full contents
    pub fn read(&mut self, path: &str) -> BridgeResult<Vec<u8>> {
        self.module.fs_read(path)
    }

    /// Delete a file
    pub fn remove(&mut self, path: &str) -> BridgeResult<()> {
        self.module.fs_remove(path)
    }

    /// Whether `path` names an existing file
    pub fn exists(&mut self, path: &str) -> bool {
        self.module.fs_exists(path)
    }

    /// File metadata, or `None` if the path does not exist
    pub fn stat(&mut self, path: &str) -> Option<FileStat> {
        self.module.fs_stat(path)
    }
}

/// Length of generated temporary-name tokens
const TOKEN_LEN: usize = 8;

/// Alphabet for temporary-name tokens
const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[cfg(target_arch = "wasm32")]
fn random_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| (js_sys::Math::random() * 256.0) as u8)
        .collect()
}

#[cfg(not(target_arch = "wasm32"))]
fn random_bytes(len: usize) -> Vec<u8> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    // Uniqueness matters here, not unpredictability: tokens only need to
    // avoid clobbering unrelated filesystem entries.
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut result = Vec::with_capacity(len);
    let mut hasher = DefaultHasher::new();

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    seed.hash(&mut hasher);
    COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);

    for i in 0..len {
        (i as u64).hash(&mut hasher);
        result.push(hasher.finish() as u8);
    }

    result
}

/// A fresh collision-resistant token for temporary filenames
pub fn temp_token() -> String {
    random_bytes(TOKEN_LEN)
        .iter()
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

/// A fresh temporary filename with the given extension (e.g. `".png"`)
pub fn temp_name(ext: &str) -> String {
    format!("{}{}", temp_token(), ext)
}
