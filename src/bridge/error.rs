//! Error types for the module bridge
//!
//! Cleanup (freeing argv allocations, deleting temp files) always runs before
//! these surface, so an error never implies a leak.

use std::fmt;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while driving a foreign module
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The module factory is not invokable, or its promise rejected
    InitializationFailed {
        reason: String,
    },

    /// An operation was attempted before `init` completed
    NotInitialized,

    /// The module's allocator could not satisfy a request
    AllocationFailed {
        requested: u32,
    },

    /// The entry point ran to completion but returned a nonzero status
    CallFailed {
        entry: String,
        status: i32,
    },

    /// The dispatcher itself erred mid-call (trap, thrown exception)
    Aborted {
        entry: String,
        reason: String,
    },

    /// The module object lacks a required export
    MissingExport {
        name: &'static str,
    },

    /// A linear-memory access fell outside the current memory size
    OutOfBounds {
        address: u32,
        len: u32,
        memory_size: u32,
    },

    /// A virtual-filesystem operation failed
    Fs {
        op: &'static str,
        path: String,
        reason: String,
    },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed { reason } => {
                write!(f, "module initialization failed: {}", reason)
            }
            Self::NotInitialized => {
                write!(f, "module is not initialized")
            }
            Self::AllocationFailed { requested } => {
                write!(f, "foreign allocator refused {} bytes", requested)
            }
            Self::CallFailed { entry, status } => {
                write!(f, "entry point '{}' exited with status {}", entry, status)
            }
            Self::Aborted { entry, reason } => {
                write!(f, "entry point '{}' aborted: {}", entry, reason)
            }
            Self::MissingExport { name } => {
                write!(f, "missing required export: '{}'", name)
            }
            Self::OutOfBounds {
                address,
                len,
                memory_size,
            } => {
                write!(
                    f,
                    "memory access out of bounds: address {} + len {} > memory size {}",
                    address, len, memory_size
                )
            }
            Self::Fs { op, path, reason } => {
                write!(f, "filesystem {} failed for '{}': {}", op, path, reason)
            }
        }
    }
}

impl std::error::Error for BridgeError {}
