//! IR, registry, and runtime ABI for the simulator's JIT.
//!
//! This crate owns the pieces every execution engine shares: the register IR
//! (`ir`), its control-flow analysis (`cfg`), the function registry (`Jit`),
//! and the calling convention (`FrameAnchor`, `EntryFn`, `JIT_MAX_ARGS`)
//! compiled code and the runtime agree on.

use std::ffi::c_void;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

pub mod build;
pub mod cfg;
pub mod ir;

use ir::{JitFunc, JitIr};

/// Maximum number of i64 slots in the argument array.
pub const JIT_MAX_ARGS: usize = 64;

/// Bumped whenever the object ABI changes; AOT objects embed it so the
/// loader can refuse stale files.
pub const ABI_VERSION: u32 = 19;

/// Identifies a function in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JitHandle(pub u32);

/// Identifies a foreign-function record in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ForeignId(pub u32);

/// Identifies an interned source file name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// Stack-resident record linking an invocation to its caller and current IR
/// position. The runtime walks the `caller` chain for backtraces, keyed by
/// `ir_position` into the per-function debug stream.
///
/// Field order is load-bearing: compiled code addresses fields by index.
#[repr(C)]
pub struct FrameAnchor {
    pub caller: *mut FrameAnchor,
    pub function: *const JitFunc,
    pub ir_position: u32,
}

impl FrameAnchor {
    /// An anchor for a top-level invocation.
    pub fn root() -> Self {
        FrameAnchor {
            caller: std::ptr::null_mut(),
            function: std::ptr::null(),
            ir_position: 0,
        }
    }
}

/// Signature of every compiled entry function.
pub type EntryFn = unsafe extern "C" fn(*const JitFunc, *mut FrameAnchor, *mut i64);

/// A foreign function the IR can dispatch to through the runtime.
pub struct JitForeign {
    pub sym: String,
    pub spec: u64,
    pub entry: *const c_void,
}

// SAFETY: `entry` is an opaque address handed to the runtime dispatcher;
// nothing in this crate dereferences it.
unsafe impl Send for JitForeign {}
unsafe impl Sync for JitForeign {}

/// The function registry shared by the interpreter and the compilers.
///
/// Functions are immutable once installed apart from their published entry
/// pointer; handles are stable indices.
pub struct Jit {
    funcs: RwLock<Vec<Arc<JitFunc>>>,
    names: RwLock<FxHashMap<String, JitHandle>>,
    foreigns: RwLock<Vec<Arc<JitForeign>>>,
    files: RwLock<Vec<String>>,
}

impl Jit {
    pub fn new() -> Self {
        Jit {
            funcs: RwLock::new(vec![]),
            names: RwLock::new(FxHashMap::default()),
            foreigns: RwLock::new(vec![]),
            files: RwLock::new(vec![]),
        }
    }

    pub fn install_func(
        &self,
        name: String,
        nregs: u32,
        framesz: u32,
        cpool: Vec<u8>,
        irbuf: Vec<JitIr>,
    ) -> JitHandle {
        let mut funcs = self.funcs.write().unwrap();
        let mut names = self.names.write().unwrap();
        assert!(
            !names.contains_key(&name),
            "function {name} installed twice"
        );
        let handle = JitHandle(funcs.len() as u32);
        names.insert(name.clone(), handle);
        funcs.push(Arc::new(JitFunc::new(
            name, handle, nregs, framesz, cpool, irbuf,
        )));
        handle
    }

    pub fn get_func(&self, handle: JitHandle) -> Arc<JitFunc> {
        Arc::clone(&self.funcs.read().unwrap()[handle.0 as usize])
    }

    pub fn find_func(&self, name: &str) -> Option<JitHandle> {
        self.names.read().unwrap().get(name).copied()
    }

    pub fn install_foreign(&self, sym: &str, spec: u64, entry: *const c_void) -> ForeignId {
        let mut foreigns = self.foreigns.write().unwrap();
        let id = ForeignId(foreigns.len() as u32);
        foreigns.push(Arc::new(JitForeign {
            sym: sym.to_string(),
            spec,
            entry,
        }));
        id
    }

    pub fn get_foreign(&self, id: ForeignId) -> Arc<JitForeign> {
        Arc::clone(&self.foreigns.read().unwrap()[id.0 as usize])
    }

    pub fn intern_file(&self, path: &str) -> FileId {
        let mut files = self.files.write().unwrap();
        if let Some(ix) = files.iter().position(|f| f == path) {
            FileId(ix as u32)
        } else {
            files.push(path.to_string());
            FileId(files.len() as u32 - 1)
        }
    }

    pub fn file_name(&self, id: FileId) -> String {
        self.files.read().unwrap()[id.0 as usize].clone()
    }
}

impl Default for Jit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::IrBuilder;
    use crate::ir::JitValue;

    #[test]
    fn registry_round_trip() {
        let jit = Jit::new();
        let mut b = IrBuilder::new("unit");
        let r0 = b.reg();
        b.recv(r0, 0);
        b.send(0, JitValue::Reg(r0));
        b.ret();
        let handle = b.install(&jit);

        assert_eq!(jit.find_func("unit"), Some(handle));
        let f = jit.get_func(handle);
        assert_eq!(f.name, "unit");
        assert_eq!(f.nregs, 1);
        assert_eq!(f.nirs(), 3);
    }

    #[test]
    fn file_interning_dedupes() {
        let jit = Jit::new();
        let a = jit.intern_file("pack.vhd");
        let b = jit.intern_file("top.vhd");
        let c = jit.intern_file("pack.vhd");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(jit.file_name(b), "top.vhd");
    }
}
