//! Tests for the marshaling core
//!
//! Built around a scripted stand-in module whose allocator counts every
//! call and tracks live allocations, so the leak-freedom and
//! single-release properties can be asserted directly rather than
//! inferred.

use super::*;
use std::collections::HashMap;
use std::rc::Rc;

// =============================================================================
// Mock module
// =============================================================================

/// Lowest address the mock allocator hands out (0 stays NULL)
const HEAP_BASE: u32 = 1024;

/// Allocator, memory, and filesystem state of the mock module
pub struct MockCore {
    memory: Vec<u8>,
    next: u32,
    live: HashMap<u32, u32>,
    pub alloc_calls: usize,
    pub free_calls: usize,
    pub bad_frees: usize,
    /// Fail every allocation once this many have succeeded
    pub fail_allocs_from: Option<usize>,
    fs: HashMap<String, Vec<u8>>,
}

impl MockCore {
    fn new() -> Self {
        Self {
            memory: vec![0u8; 64 * 1024],
            next: HEAP_BASE,
            live: HashMap::new(),
            alloc_calls: 0,
            free_calls: 0,
            bad_frees: 0,
            fail_allocs_from: None,
            fs: HashMap::new(),
        }
    }

    fn malloc(&mut self, size: u32) -> BridgeResult<ForeignPtr> {
        if let Some(limit) = self.fail_allocs_from
            && self.alloc_calls >= limit
        {
            return Err(BridgeError::AllocationFailed { requested: size });
        }

        let addr = self.next;
        // Zero-size allocations still get a distinct releasable address.
        self.next += size.max(1).next_multiple_of(8);
        if self.next as usize > self.memory.len() {
            self.memory.resize(self.next as usize, 0);
        }
        self.live.insert(addr, size);
        self.alloc_calls += 1;
        Ok(ForeignPtr::new(addr))
    }

    fn free(&mut self, ptr: ForeignPtr) {
        self.free_calls += 1;
        if self.live.remove(&ptr.addr()).is_none() {
            self.bad_frees += 1;
        }
    }

    /// Allocations that have not been released yet
    pub fn outstanding(&self) -> usize {
        self.live.len()
    }

    fn check_bounds(&self, ptr: ForeignPtr, len: u32) -> BridgeResult<()> {
        if ptr.addr() as usize + len as usize > self.memory.len() {
            return Err(BridgeError::OutOfBounds {
                address: ptr.addr(),
                len,
                memory_size: self.memory.len() as u32,
            });
        }
        Ok(())
    }

    /// Read the argument vector the way the module's `main` would
    pub fn read_args(&self, argc: i32, argv: ForeignPtr) -> Vec<String> {
        let mut args = Vec::with_capacity(argc as usize);
        for i in 0..argc as u32 {
            let slot = argv.addr() as usize + (i * 4) as usize;
            let addr = u32::from_le_bytes([
                self.memory[slot],
                self.memory[slot + 1],
                self.memory[slot + 2],
                self.memory[slot + 3],
            ]);
            let mut end = addr as usize;
            while end < self.memory.len() && self.memory[end] != 0 {
                end += 1;
            }
            args.push(String::from_utf8_lossy(&self.memory[addr as usize..end]).into_owned());
        }
        args
    }
}

type EntryFn = Rc<dyn Fn(&mut MockCore, i32, ForeignPtr) -> BridgeResult<i32>>;

/// Scripted stand-in for an instantiated module
pub struct MockModule {
    pub core: MockCore,
    entries: HashMap<String, EntryFn>,
}

impl MockModule {
    pub fn new() -> Self {
        Self {
            core: MockCore::new(),
            entries: HashMap::new(),
        }
    }

    /// Script the behavior of a named entry point
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut MockCore, i32, ForeignPtr) -> BridgeResult<i32> + 'static,
    {
        self.entries.insert(name.to_string(), Rc::new(f));
    }
}

impl ModuleInstance for MockModule {
    fn memory_size(&self) -> u32 {
        self.core.memory.len() as u32
    }

    fn memory_read(&self, ptr: ForeignPtr, len: u32) -> BridgeResult<Vec<u8>> {
        self.core.check_bounds(ptr, len)?;
        let start = ptr.addr() as usize;
        Ok(self.core.memory[start..start + len as usize].to_vec())
    }

    fn memory_write(&mut self, ptr: ForeignPtr, data: &[u8]) -> BridgeResult<()> {
        self.core.check_bounds(ptr, data.len() as u32)?;
        let start = ptr.addr() as usize;
        self.core.memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn malloc(&mut self, size: u32) -> BridgeResult<ForeignPtr> {
        self.core.malloc(size)
    }

    fn free(&mut self, ptr: ForeignPtr) {
        self.core.free(ptr);
    }

    fn call(&mut self, entry: &str, ret: CallRet, args: &[CallArg]) -> BridgeResult<CallValue> {
        let f = self
            .entries
            .get(entry)
            .cloned()
            .ok_or_else(|| BridgeError::Aborted {
                entry: entry.to_string(),
                reason: "unknown entry point".to_string(),
            })?;

        let (argc, argv) = match args {
            [CallArg::Integer(argc), CallArg::Integer(argv)] => {
                (*argc, ForeignPtr::new(*argv as u32))
            }
            _ => {
                return Err(BridgeError::Aborted {
                    entry: entry.to_string(),
                    reason: "unsupported argument kinds".to_string(),
                });
            }
        };

        let status = f(&mut self.core, argc, argv)?;
        match ret {
            CallRet::Integer => Ok(CallValue::Integer(status)),
            CallRet::Nothing => Ok(CallValue::Nothing),
            _ => Err(BridgeError::Aborted {
                entry: entry.to_string(),
                reason: "unsupported return kind".to_string(),
            }),
        }
    }

    fn fs_write(&mut self, path: &str, data: &[u8]) -> BridgeResult<()> {
        self.core.fs.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn fs_read(&self, path: &str) -> BridgeResult<Vec<u8>> {
        self.core.fs.get(path).cloned().ok_or(BridgeError::Fs {
            op: "read",
            path: path.to_string(),
            reason: "no such file".to_string(),
        })
    }

    fn fs_remove(&mut self, path: &str) -> BridgeResult<()> {
        self.core
            .fs
            .remove(path)
            .map(|_| ())
            .ok_or(BridgeError::Fs {
                op: "remove",
                path: path.to_string(),
                reason: "no such file".to_string(),
            })
    }

    fn fs_exists(&self, path: &str) -> bool {
        self.core.fs.contains_key(path)
    }

    fn fs_stat(&self, path: &str) -> Option<FileStat> {
        self.core.fs.get(path).map(|data| FileStat {
            size: data.len() as u64,
        })
    }
}

// =============================================================================
// Argv packer
// =============================================================================

mod pack_tests {
    use super::*;

    #[test]
    fn test_pack_layout_roundtrip() {
        let mut module = MockModule::new();
        let args = ["basisu", "-ktx2", "file.png"];
        let mut handle = pack_argv(&mut module, &args).unwrap();

        assert_eq!(handle.argc(), 3);

        let view = HeapView::new(&module);
        let ptrs = view.u32_slice(handle.argv(), 3).unwrap();
        assert_eq!(ptrs.len(), 3);
        for (ptr, expected) in ptrs.iter().zip(args.iter()) {
            let p = ForeignPtr::new(*ptr);
            assert_eq!(view.cstr(p).unwrap(), expected.as_bytes());
            // The terminator itself is one zero byte.
            let raw = view.bytes(p, expected.len() as u32 + 1).unwrap();
            assert_eq!(raw[expected.len()], 0);
        }

        handle.release(&mut module);
        assert_eq!(module.core.outstanding(), 0);
    }

    #[test]
    fn test_pack_allocation_pairing_across_calls() {
        let mut module = MockModule::new();
        let args = ["a", "bb", "ccc"];

        let mut handle = pack_argv(&mut module, &args).unwrap();
        handle.release(&mut module);
        assert_eq!(module.core.alloc_calls, 4); // 3 strings + pointer array
        assert_eq!(module.core.free_calls, 4);

        let mut handle = pack_argv(&mut module, &args).unwrap();
        handle.release(&mut module);
        assert_eq!(module.core.alloc_calls, 8);
        assert_eq!(module.core.free_calls, 8);
        assert_eq!(module.core.bad_frees, 0);
        assert_eq!(module.core.outstanding(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut module = MockModule::new();
        let mut handle = pack_argv(&mut module, &["x", "y"]).unwrap();

        handle.release(&mut module);
        let frees_after_first = module.core.free_calls;
        handle.release(&mut module);
        handle.release(&mut module);

        assert!(handle.is_released());
        assert_eq!(module.core.free_calls, frees_after_first);
        assert_eq!(module.core.bad_frees, 0);
        assert_eq!(module.core.outstanding(), 0);
    }

    #[test]
    fn test_pack_empty_sequence() {
        let mut module = MockModule::new();
        let mut handle = pack_argv(&mut module, &[]).unwrap();

        assert_eq!(handle.argc(), 0);
        // The zero-length pointer array is still a real allocation.
        assert_eq!(module.core.alloc_calls, 1);

        handle.release(&mut module);
        assert_eq!(module.core.free_calls, 1);
        assert_eq!(module.core.outstanding(), 0);
    }

    #[test]
    fn test_pack_empty_string_is_one_terminator_byte() {
        let mut module = MockModule::new();
        let mut handle = pack_argv(&mut module, &[""]).unwrap();

        let view = HeapView::new(&module);
        let ptr = ForeignPtr::new(view.u32_slice(handle.argv(), 1).unwrap()[0]);
        assert_eq!(view.bytes(ptr, 1).unwrap(), vec![0u8]);
        assert_eq!(view.cstr(ptr).unwrap(), Vec::<u8>::new());

        handle.release(&mut module);
        assert_eq!(module.core.outstanding(), 0);
    }

    #[test]
    fn test_pack_embedded_nul_truncates() {
        let mut module = MockModule::new();
        let mut handle = pack_argv(&mut module, &["ab\0cd"]).unwrap();

        let view = HeapView::new(&module);
        let ptr = ForeignPtr::new(view.u32_slice(handle.argv(), 1).unwrap()[0]);
        // The module stops at the embedded zero; the packer does not correct this.
        assert_eq!(view.cstr(ptr).unwrap(), b"ab");

        handle.release(&mut module);
    }

    #[test]
    fn test_pack_midway_failure_releases_partial_work() {
        let mut module = MockModule::new();
        module.core.fail_allocs_from = Some(2);

        let result = pack_argv(&mut module, &["one", "two", "three"]);
        assert!(matches!(
            result,
            Err(BridgeError::AllocationFailed { .. })
        ));
        assert_eq!(module.core.outstanding(), 0);
        assert_eq!(module.core.bad_frees, 0);
    }
}

// =============================================================================
// Call invoker
// =============================================================================

mod invoke_tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_invoke_success_leaves_no_allocations() {
        let mut module = MockModule::new();
        module.register("main", |_, _, _| Ok(0));

        invoke::invoke(&mut module, "main", "basisu", &["-info", "a.png"]).unwrap();
        assert_eq!(module.core.outstanding(), 0);
        assert_eq!(module.core.alloc_calls, module.core.free_calls);
    }

    #[test]
    fn test_invoke_nonzero_status_is_call_failed() {
        let mut module = MockModule::new();
        module.register("main", |_, _, _| Ok(13));

        let err = invoke::invoke(&mut module, "main", "basisu", &[]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::CallFailed {
                entry: "main".to_string(),
                status: 13,
            }
        );
        assert_eq!(module.core.outstanding(), 0);
    }

    #[test]
    fn test_invoke_aborting_entry_still_releases() {
        let mut module = MockModule::new();
        module.register("main", |_, _, _| {
            Err(BridgeError::Aborted {
                entry: "main".to_string(),
                reason: "trap".to_string(),
            })
        });

        let err = invoke::invoke(&mut module, "main", "basisu", &["x"]).unwrap_err();
        assert!(matches!(err, BridgeError::Aborted { .. }));
        assert_eq!(module.core.outstanding(), 0);
        assert_eq!(module.core.bad_frees, 0);
    }

    #[test]
    fn test_invoke_passes_command_then_args() {
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let mut module = MockModule::new();
        let sink = Rc::clone(&seen);
        module.register("main", move |core, argc, argv| {
            *sink.borrow_mut() = core.read_args(argc, argv);
            Ok(0)
        });

        invoke::invoke(&mut module, "main", "tool", &["-a", "-b"]).unwrap();
        assert_eq!(*seen.borrow(), vec!["tool", "-a", "-b"]);
    }

    #[test]
    fn test_invoke_empty_args_is_command_name_alone() {
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let mut module = MockModule::new();
        let sink = Rc::clone(&seen);
        module.register("main", move |core, argc, argv| {
            *sink.borrow_mut() = core.read_args(argc, argv);
            Ok(0)
        });

        invoke::invoke(&mut module, "main", "tool", &[]).unwrap();
        assert_eq!(*seen.borrow(), vec!["tool"]);
        assert_eq!(module.core.outstanding(), 0);
    }

    #[test]
    fn test_invoke_unknown_entry() {
        let mut module = MockModule::new();
        let err = invoke::invoke(&mut module, "missing", "tool", &[]).unwrap_err();
        assert!(matches!(err, BridgeError::Aborted { .. }));
        assert_eq!(module.core.outstanding(), 0);
    }
}

// =============================================================================
// Bridge lifecycle
// =============================================================================

mod bridge_tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_operations_before_init_are_rejected() {
        let mut bridge: Bridge<MockModule> = Bridge::new();
        assert!(!bridge.is_ready());
        assert_eq!(bridge.alloc(16).unwrap_err(), BridgeError::NotInitialized);
        assert!(matches!(bridge.fs(), Err(BridgeError::NotInitialized)));
        assert!(matches!(bridge.heap(), Err(BridgeError::NotInitialized)));
        assert!(matches!(
            bridge.call_cli("main", &[]),
            Err(BridgeError::NotInitialized)
        ));
    }

    #[test]
    fn test_init_stores_instance() {
        let mut bridge: Bridge<MockModule> = Bridge::new();
        block_on(bridge.init(|config| async move {
            assert!(config.no_initial_run);
            Ok(MockModule::new())
        }))
        .unwrap();
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_init_failure_leaves_bridge_unready() {
        let mut bridge: Bridge<MockModule> = Bridge::new();
        let err = block_on(bridge.init(|_| async {
            Err(BridgeError::InitializationFailed {
                reason: "factory rejected".to_string(),
            })
        }))
        .unwrap_err();
        assert!(matches!(err, BridgeError::InitializationFailed { .. }));
        assert!(!bridge.is_ready());
    }

    #[test]
    fn test_alloc_zero_is_releasable() {
        let mut bridge: Bridge<MockModule> = Bridge::new();
        block_on(bridge.init(|_| async { Ok(MockModule::new()) })).unwrap();

        let ptr = bridge.alloc(0).unwrap();
        assert!(!ptr.is_null());
        bridge.release(ptr).unwrap();

        let module = bridge.module().unwrap();
        assert_eq!(module.core.outstanding(), 0);
        assert_eq!(module.core.bad_frees, 0);
    }
}

// =============================================================================
// Heap views
// =============================================================================

mod heap_tests {
    use super::*;

    #[test]
    fn test_views_alias_the_same_bytes() {
        let mut module = MockModule::new();
        let ptr = module.malloc(8).unwrap();

        HeapViewMut::new(&mut module)
            .set::<u32>(ptr, 0x01020304)
            .unwrap();

        let view = HeapView::new(&module);
        assert_eq!(view.get::<u32>(ptr).unwrap(), 0x01020304);
        // Little-endian halves through the 16-bit window.
        assert_eq!(view.get::<u16>(ptr).unwrap(), 0x0304);
        assert_eq!(view.get::<u16>(ptr.offset(2)).unwrap(), 0x0102);
        assert_eq!(view.bytes(ptr, 4).unwrap(), vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_float_roundtrip() {
        let mut module = MockModule::new();
        let ptr = module.malloc(16).unwrap();

        let mut view = HeapViewMut::new(&mut module);
        view.set::<f32>(ptr, 1.5).unwrap();
        view.set::<f64>(ptr.offset(8), -2.25).unwrap();

        let view = HeapView::new(&module);
        assert_eq!(view.get::<f32>(ptr).unwrap(), 1.5);
        assert_eq!(view.get::<f64>(ptr.offset(8)).unwrap(), -2.25);
    }

    #[test]
    fn test_signed_views() {
        let mut module = MockModule::new();
        let ptr = module.malloc(4).unwrap();

        HeapViewMut::new(&mut module).set::<i32>(ptr, -1).unwrap();
        let view = HeapView::new(&module);
        assert_eq!(view.get::<i32>(ptr).unwrap(), -1);
        assert_eq!(view.get::<u32>(ptr).unwrap(), u32::MAX);
        assert_eq!(view.get::<i8>(ptr).unwrap(), -1);
    }

    #[test]
    fn test_out_of_bounds_read() {
        let module = MockModule::new();
        let size = module.memory_size();
        let view = HeapView::new(&module);
        let err = view.bytes(ForeignPtr::new(size - 2), 4).unwrap_err();
        assert!(matches!(err, BridgeError::OutOfBounds { .. }));
    }

    #[test]
    fn test_write_u32_slice_layout() {
        let mut module = MockModule::new();
        let ptr = module.malloc(12).unwrap();

        HeapViewMut::new(&mut module)
            .write_u32_slice(ptr, &[1, 2, 3])
            .unwrap();

        let view = HeapView::new(&module);
        assert_eq!(view.u32_slice(ptr, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(view.get::<u32>(ptr.offset(4)).unwrap(), 2);
    }
}

// =============================================================================
// Filesystem pass-through
// =============================================================================

mod fs_tests {
    use super::*;

    #[test]
    fn test_fs_roundtrip() {
        let mut module = MockModule::new();
        let mut fs = VfsBridge::new(&mut module);

        assert!(!fs.exists("a.png"));
        fs.write("a.png", &[1, 2, 3]).unwrap();
        assert!(fs.exists("a.png"));
        assert_eq!(fs.stat("a.png"), Some(FileStat { size: 3 }));
        assert_eq!(fs.read("a.png").unwrap(), vec![1, 2, 3]);

        fs.remove("a.png").unwrap();
        assert!(!fs.exists("a.png"));
        assert_eq!(fs.stat("a.png"), None);
    }

    #[test]
    fn test_fs_read_missing_file() {
        let mut module = MockModule::new();
        let mut fs = VfsBridge::new(&mut module);
        let err = fs.read("nope.bin").unwrap_err();
        assert!(matches!(err, BridgeError::Fs { op: "read", .. }));
    }

    #[test]
    fn test_fs_write_replaces() {
        let mut module = MockModule::new();
        let mut fs = VfsBridge::new(&mut module);
        fs.write("f", &[1]).unwrap();
        fs.write("f", &[2, 3]).unwrap();
        assert_eq!(fs.read("f").unwrap(), vec![2, 3]);
    }
}
