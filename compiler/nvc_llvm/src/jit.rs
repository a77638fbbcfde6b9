//! Lazy per-function JIT session.
//!
//! Every compile job owns its backend state — context, module, builder — so
//! jobs can run on any worker thread. The only cross-thread hand-off is the
//! entry pointer published on the source function with release ordering.
//! Compiled engines are retained until `shutdown` so published code stays
//! executable.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::targets::{CodeModel, RelocMode};
use inkwell::OptimizationLevel;

use nvc_jit::{FrameAnchor, Jit, JitForeign, JitHandle};

use crate::context::CodegenCx;
use crate::lower::{lower_function, JitMode};

/// Runtime entry points mapped into compiled code.
///
/// By default the execution engine resolves `__nvc_*` symbols from the host
/// process; embedders (and tests) can hand in explicit functions instead.
#[derive(Clone, Copy)]
pub struct RuntimeHooks {
    pub do_exit: unsafe extern "C" fn(i32, *mut FrameAnchor, *mut i64),
    pub do_fficall: unsafe extern "C" fn(*const JitForeign, *mut FrameAnchor, *mut i64),
    pub getpriv: unsafe extern "C" fn(i32) -> *mut c_void,
    pub putpriv: unsafe extern "C" fn(i32, *mut c_void),
    pub mspace_alloc: unsafe extern "C" fn(i32, i32) -> *mut c_void,
}

/// Keeps one compiled module executable: the engine owns the code, the
/// leaked context owns the engine's IR.
struct CompiledUnit {
    ee: ManuallyDrop<ExecutionEngine<'static>>,
    module: ManuallyDrop<Module<'static>>,
    llcx: *mut Context,
}

// SAFETY: a CompiledUnit is never used after construction, only dropped; the
// LLVM objects it owns are not touched from other threads.
unsafe impl Send for CompiledUnit {}

impl Drop for CompiledUnit {
    fn drop(&mut self) {
        // Engine first, then the module, then the context that owns both.
        unsafe {
            ManuallyDrop::drop(&mut self.ee);
            ManuallyDrop::drop(&mut self.module);
            drop(Box::from_raw(self.llcx));
        }
    }
}

/// A JIT compilation session shared by the worker pool.
pub struct JitSession {
    hooks: Option<RuntimeHooks>,
    only: Option<String>,
    units: Mutex<Vec<CompiledUnit>>,
}

impl JitSession {
    pub fn new() -> Self {
        Self::with_config(None, only_filter())
    }

    pub fn with_hooks(hooks: RuntimeHooks) -> Self {
        Self::with_config(Some(hooks), only_filter())
    }

    pub(crate) fn with_config(hooks: Option<RuntimeHooks>, only: Option<String>) -> Self {
        JitSession {
            hooks,
            only,
            units: Mutex::new(vec![]),
        }
    }

    /// Compile one function and publish its entry pointer.
    ///
    /// Runs to completion or panics; there is no partial success. After this
    /// returns, other threads that acquire the entry pointer may execute the
    /// code.
    pub fn compile(&self, jit: &Jit, handle: JitHandle) {
        let func = jit.get_func(handle);
        if let Some(only) = &self.only {
            if *only != func.name {
                return;
            }
        }

        let start = Instant::now();

        let llcx_ptr = Box::into_raw(Box::new(Context::create()));
        // SAFETY: the context is freed by CompiledUnit::drop, after
        // everything derived from it.
        let llcx: &'static Context = unsafe { &*llcx_ptr };

        let cx = CodegenCx::new(llcx, &func.name, RelocMode::Default, CodeModel::JITDefault);
        lower_function(&cx, &JitMode, jit, Arc::clone(&func));
        cx.finalise();

        let ee = cx
            .llmod()
            .create_jit_execution_engine(OptimizationLevel::None)
            .unwrap_or_else(|e| {
                panic!("failed to create execution engine for {}: {e}", func.name)
            });

        if let Some(hooks) = &self.hooks {
            let map = |name: &str, addr: usize| {
                if let Some(decl) = cx.llmod().get_function(name) {
                    ee.add_global_mapping(&decl, addr);
                }
            };
            map("__nvc_do_exit", hooks.do_exit as usize);
            map("__nvc_do_fficall", hooks.do_fficall as usize);
            map("__nvc_getpriv", hooks.getpriv as usize);
            map("__nvc_putpriv", hooks.putpriv as usize);
            map("__nvc_mspace_alloc", hooks.mspace_alloc as usize);
        }

        let addr = ee
            .get_function_address(&func.name)
            .unwrap_or_else(|e| panic!("failed to resolve {}: {e}", func.name));

        func.publish_entry(addr);

        tracing::debug!(
            func = %func.name,
            addr = addr as u64,
            us = start.elapsed().as_micros() as u64,
            "compiled"
        );

        let module = cx.scx.llmod;
        self.units.lock().unwrap().push(CompiledUnit {
            ee: ManuallyDrop::new(ee),
            module: ManuallyDrop::new(module),
            llcx: llcx_ptr,
        });
    }

    /// Tear down every compiled engine. Published entry pointers dangle
    /// after this; callers stop execution first.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Default for JitSession {
    fn default() -> Self {
        Self::new()
    }
}

fn only_filter() -> Option<String> {
    std::env::var("NVC_JIT_ONLY").ok().filter(|s| !s.is_empty())
}

/// The tiering threshold from `NVC_JIT_THRESHOLD`.
///
/// Non-positive values disable native compilation; negative or unparseable
/// settings additionally log a warning.
pub fn jit_threshold() -> Option<u32> {
    let raw = std::env::var("NVC_JIT_THRESHOLD").ok()?;
    match raw.trim().parse::<i64>() {
        Ok(t) if t > 0 => Some(t as u32),
        Ok(t) => {
            if t < 0 {
                tracing::warn!("invalid NVC_JIT_THRESHOLD setting {t}");
            }
            None
        }
        Err(_) => {
            tracing::warn!("invalid NVC_JIT_THRESHOLD setting {raw:?}");
            None
        }
    }
}
