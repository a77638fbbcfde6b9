//! Lazily materialized prototypes for LLVM intrinsics and runtime helpers.
//!
//! Each signature is built on first use and cached for the lifetime of the
//! module; repeated lookups return the same declaration.

use inkwell::values::FunctionValue;

use nvc_jit::ir::JitSize;

use crate::context::CodegenCx;

/// The functions the backend can call without the IR naming them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum RtFn {
    SaddOverflow(JitSize),
    UaddOverflow(JitSize),
    SsubOverflow(JitSize),
    UsubOverflow(JitSize),
    SmulOverflow(JitSize),
    UmulOverflow(JitSize),
    PowF64,
    RoundF64,
    DoExit,
    DoFficall,
    GetPriv,
    PutPriv,
    MspaceAlloc,
    Trampoline,
    Register,
    GetFunc,
    GetForeign,
}

impl RtFn {
    fn symbol(self) -> String {
        match self {
            RtFn::SaddOverflow(sz) => format!("llvm.sadd.with.overflow.i{}", sz.bits()),
            RtFn::UaddOverflow(sz) => format!("llvm.uadd.with.overflow.i{}", sz.bits()),
            RtFn::SsubOverflow(sz) => format!("llvm.ssub.with.overflow.i{}", sz.bits()),
            RtFn::UsubOverflow(sz) => format!("llvm.usub.with.overflow.i{}", sz.bits()),
            RtFn::SmulOverflow(sz) => format!("llvm.smul.with.overflow.i{}", sz.bits()),
            RtFn::UmulOverflow(sz) => format!("llvm.umul.with.overflow.i{}", sz.bits()),
            RtFn::PowF64 => "llvm.pow.f64".to_string(),
            RtFn::RoundF64 => "llvm.round.f64".to_string(),
            RtFn::DoExit => "__nvc_do_exit".to_string(),
            RtFn::DoFficall => "__nvc_do_fficall".to_string(),
            RtFn::GetPriv => "__nvc_getpriv".to_string(),
            RtFn::PutPriv => "__nvc_putpriv".to_string(),
            RtFn::MspaceAlloc => "__nvc_mspace_alloc".to_string(),
            RtFn::Trampoline => "__nvc_trampoline".to_string(),
            RtFn::Register => "__nvc_register".to_string(),
            RtFn::GetFunc => "__nvc_get_func".to_string(),
            RtFn::GetForeign => "__nvc_get_foreign".to_string(),
        }
    }
}

impl<'ll> CodegenCx<'ll> {
    /// The declaration for a runtime helper or intrinsic, materializing it
    /// on first use.
    pub(crate) fn rt_fn(&self, which: RtFn) -> FunctionValue<'ll> {
        if let Some(fnval) = self.protos.borrow().get(&which) {
            return *fnval;
        }

        let t = self.types();
        let ty = match which {
            RtFn::SaddOverflow(sz)
            | RtFn::UaddOverflow(sz)
            | RtFn::SsubOverflow(sz)
            | RtFn::UsubOverflow(sz)
            | RtFn::SmulOverflow(sz)
            | RtFn::UmulOverflow(sz) => {
                let int = t.int(sz);
                t.pair(sz).fn_type(&[int.into(), int.into()], false)
            }
            RtFn::PowF64 => t.f64.fn_type(&[t.f64.into(), t.f64.into()], false),
            RtFn::RoundF64 => t.f64.fn_type(&[t.f64.into()], false),
            RtFn::DoExit => t
                .void
                .fn_type(&[t.i32.into(), t.ptr.into(), t.ptr.into()], false),
            RtFn::DoFficall => t
                .void
                .fn_type(&[t.ptr.into(), t.ptr.into(), t.ptr.into()], false),
            RtFn::GetPriv => t.ptr.fn_type(&[t.i32.into()], false),
            RtFn::PutPriv => t.void.fn_type(&[t.i32.into(), t.ptr.into()], false),
            RtFn::MspaceAlloc => t.ptr.fn_type(&[t.i32.into(), t.i32.into()], false),
            RtFn::Trampoline => t.entry_fn,
            RtFn::Register => t.void.fn_type(
                &[t.ptr.into(), t.ptr.into(), t.ptr.into(), t.i32.into()],
                false,
            ),
            RtFn::GetFunc => t.ptr.fn_type(&[t.ptr.into()], false),
            RtFn::GetForeign => t.ptr.fn_type(&[t.ptr.into(), t.i64.into()], false),
        };

        let name = which.symbol();
        let fnval = self
            .llmod()
            .get_function(&name)
            .unwrap_or_else(|| self.llmod().add_function(&name, ty, None));

        self.protos.borrow_mut().insert(which, fnval);
        fnval
    }
}
