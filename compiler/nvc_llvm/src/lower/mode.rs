//! Mode capability: the few operations where JIT and AOT lowering differ.
//!
//! The JIT bakes absolute pointers into the code it is about to run; the AOT
//! unit must stay position-independent, so every outside reference goes
//! through a private global initialized by the module constructor at load
//! time. The lowering driver takes the mode as a parameter and is otherwise
//! identical in both.

use std::sync::Arc;

use inkwell::module::Linkage;
use inkwell::values::{
    BasicValueEnum, FunctionValue, GlobalValue, PointerValue, UnnamedAddress,
};

use nvc_jit::ir::JitFunc;
use nvc_jit::JitForeign;

use crate::builder::Builder;
use crate::context::CodegenCx;
use crate::intrinsics::RtFn;

/// How a call site reaches its callee.
pub(crate) enum CalleeRef<'ll> {
    /// Direct call to the runtime trampoline with the late-bound handle.
    Direct {
        entry: FunctionValue<'ll>,
        func: PointerValue<'ll>,
    },
    /// Indirect call through a baked entry address.
    Indirect {
        entry: PointerValue<'ll>,
        func: PointerValue<'ll>,
    },
}

pub(crate) trait Mode<'ll> {
    /// Hook run when a function's shell exists but before its body is
    /// lowered. Returns the constant-pool global when the pool is emitted
    /// into the module rather than addressed absolutely.
    fn publish(
        &self,
        bx: &Builder<'_, 'll>,
        func: &JitFunc,
        llfn: FunctionValue<'ll>,
        debug_bytes: &[u8],
    ) -> Option<GlobalValue<'ll>>;

    /// Reference to another function in the registry.
    fn function_ref(&self, bx: &Builder<'_, 'll>, callee: &Arc<JitFunc>) -> CalleeRef<'ll>;

    /// Reference to a foreign-function record.
    fn foreign_ref(&self, bx: &Builder<'_, 'll>, foreign: &Arc<JitForeign>) -> PointerValue<'ll>;

    /// An absolute address, if this mode permits it.
    fn absolute(&self, bx: &Builder<'_, 'll>, addr: u64) -> Option<PointerValue<'ll>>;
}

/// Lazy per-function JIT: the registry is live in this process, so entry
/// pointers, function records, and foreign records are compile-time
/// constants.
pub(crate) struct JitMode;

impl<'ll> Mode<'ll> for JitMode {
    fn publish(
        &self,
        _bx: &Builder<'_, 'll>,
        _func: &JitFunc,
        _llfn: FunctionValue<'ll>,
        _debug_bytes: &[u8],
    ) -> Option<GlobalValue<'ll>> {
        None
    }

    fn function_ref(&self, bx: &Builder<'_, 'll>, callee: &Arc<JitFunc>) -> CalleeRef<'ll> {
        CalleeRef::Indirect {
            entry: bx.const_ptr(callee.entry_raw() as usize, ""),
            func: bx.const_ptr(Arc::as_ptr(callee) as usize, ""),
        }
    }

    fn foreign_ref(&self, bx: &Builder<'_, 'll>, foreign: &Arc<JitForeign>) -> PointerValue<'ll> {
        bx.const_ptr(Arc::as_ptr(foreign) as usize, "")
    }

    fn absolute(&self, bx: &Builder<'_, 'll>, addr: u64) -> Option<PointerValue<'ll>> {
        Some(bx.const_ptr(addr as usize, ""))
    }
}

/// Whole-unit AOT: references resolve at load time through the module
/// constructor.
pub(crate) struct AotMode<'ll> {
    pub ctor: FunctionValue<'ll>,
}

impl<'ll> Mode<'ll> for AotMode<'ll> {
    fn publish(
        &self,
        bx: &Builder<'_, 'll>,
        func: &JitFunc,
        llfn: FunctionValue<'ll>,
        debug_bytes: &[u8],
    ) -> Option<GlobalValue<'ll>> {
        let cpool = bytes_global(bx.cx, &format!("{}.cpool", func.name), &func.cpool);
        let debug = bytes_global(bx.cx, &format!("{}.debug", func.name), debug_bytes);

        let _guard = bx.save_position();
        self.position_in_ctor(bx);

        let name = bx.cx.const_string(&func.name);
        bx.call_rt(
            RtFn::Register,
            &[
                name.into(),
                llfn.as_global_value().as_pointer_value().into(),
                debug.as_pointer_value().into(),
                bx.cx.const_i32(func.nirs()).into(),
            ],
            "",
        );

        Some(cpool)
    }

    fn function_ref(&self, bx: &Builder<'_, 'll>, callee: &Arc<JitFunc>) -> CalleeRef<'ll> {
        let global = self.lazy_ref_global(bx, &format!("{}.func", callee.name), |bx| {
            let name = bx.cx.const_string(&callee.name);
            bx.call_rt(RtFn::GetFunc, &[name.into()], "")
                .expect("get_func returns a pointer")
        });

        let func = bx
            .load(bx.cx.types().ptr.into(), global.as_pointer_value(), "")
            .into_pointer_value();

        CalleeRef::Direct {
            entry: bx.cx.rt_fn(RtFn::Trampoline),
            func,
        }
    }

    fn foreign_ref(&self, bx: &Builder<'_, 'll>, foreign: &Arc<JitForeign>) -> PointerValue<'ll> {
        let global = self.lazy_ref_global(bx, &format!("{}.ffi", foreign.sym), |bx| {
            let sym = bx.cx.const_string(&foreign.sym);
            bx.call_rt(
                RtFn::GetForeign,
                &[sym.into(), bx.cx.const_i64(foreign.spec as i64).into()],
                "",
            )
            .expect("get_foreign returns a pointer")
        });

        bx.load(bx.cx.types().ptr.into(), global.as_pointer_value(), "")
            .into_pointer_value()
    }

    fn absolute(&self, bx: &Builder<'_, 'll>, addr: u64) -> Option<PointerValue<'ll>> {
        // Real addresses mean nothing in another process; only null survives.
        (addr == 0).then(|| bx.cx.types().ptr.const_null())
    }
}

impl<'ll> AotMode<'ll> {
    fn position_in_ctor(&self, bx: &Builder<'_, 'll>) {
        let block = self
            .ctor
            .get_last_basic_block()
            .expect("constructor entry block");
        bx.position_at_end(block);
    }

    /// Get or create a private pointer global whose value is computed in
    /// the module constructor.
    fn lazy_ref_global<'a>(
        &self,
        bx: &Builder<'a, 'll>,
        name: &str,
        init: impl FnOnce(&Builder<'a, 'll>) -> BasicValueEnum<'ll>,
    ) -> GlobalValue<'ll> {
        if let Some(global) = bx.cx.llmod().get_global(name) {
            return global;
        }

        let global = bx.cx.llmod().add_global(bx.cx.types().ptr, None, name);
        global.set_linkage(Linkage::Private);
        global.set_unnamed_address(UnnamedAddress::Global);
        global.set_initializer(&bx.cx.types().ptr.const_null());

        let _guard = bx.save_position();
        self.position_in_ctor(bx);
        let value = init(bx);
        bx.store(value, global.as_pointer_value());

        global
    }
}

/// A private constant byte-array global.
fn bytes_global<'ll>(cx: &CodegenCx<'ll>, name: &str, bytes: &[u8]) -> GlobalValue<'ll> {
    let init = cx.llcx().const_string(bytes, false);
    let global = cx.llmod().add_global(init.get_type(), None, name);
    global.set_initializer(&init);
    global.set_constant(true);
    global.set_linkage(Linkage::Private);
    global.set_unnamed_address(UnnamedAddress::Global);
    global
}
