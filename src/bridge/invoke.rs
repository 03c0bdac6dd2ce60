//! Typed invocation of CLI-style entry points
//!
//! Every entry point reached through here has the conventional signature
//! `(argc: i32, argv: i32) -> i32` with status 0 meaning success. The
//! argument vector is packed immediately before the call and released
//! immediately after it, on the success, nonzero-status, and dispatcher
//! error paths alike.

use super::argv::pack_argv;
use super::error::{BridgeError, BridgeResult};
use super::module::{CallArg, CallRet, CallValue, ModuleInstance};

/// Invoke `entry` with the argument vector `[command, ...args]`.
///
/// Position 0 conventionally holds the invoked command's own name, matching
/// C `main` semantics. A nonzero status surfaces as
/// [`CallFailed`](BridgeError::CallFailed) carrying the exact status value;
/// it is terminal and never retried here.
pub fn invoke<M: ModuleInstance + ?Sized>(
    module: &mut M,
    entry: &str,
    command: &str,
    args: &[&str],
) -> BridgeResult<()> {
    let mut full_args: Vec<&str> = Vec::with_capacity(args.len() + 1);
    full_args.push(command);
    full_args.extend_from_slice(args);

    let mut handle = pack_argv(module, &full_args)?;

    crate::console_log!(">>> call {}: {}", command, args.join(" "));

    let result = module.call(
        entry,
        CallRet::Integer,
        &[
            CallArg::Integer(handle.argc()),
            CallArg::Integer(handle.argv().addr() as i32),
        ],
    );

    // Argument memory is released before any error can propagate.
    handle.release(module);

    let status = match result? {
        CallValue::Integer(status) => status,
        other => {
            return Err(BridgeError::Aborted {
                entry: entry.to_string(),
                reason: format!("entry point returned {:?} instead of a status", other),
            });
        }
    };

    if status != 0 {
        return Err(BridgeError::CallFailed {
            entry: entry.to_string(),
            status,
        });
    }

    Ok(())
}
