//! One handler per opcode.
//!
//! Handlers share the narrow `FuncLower` state and are dispatched through a
//! table keyed by opcode. Any operand shape outside the contract is a
//! front-end bug and aborts with the marked IR dump.

use inkwell::{FloatPredicate, IntPredicate};

use nvc_jit::ir::{JitCc, JitIr, JitOp, JitSize, JitValue};
use nvc_jit::JIT_MAX_ARGS;

use super::mode::CalleeRef;
use super::FuncLower;
use crate::intrinsics::RtFn;

pub(super) type OpFn<'a, 'll> = fn(&mut FuncLower<'a, 'll>, usize, &JitIr);

/// Map an opcode to its handler.
pub(super) fn op_table<'a, 'll>(op: JitOp) -> OpFn<'a, 'll> {
    match op {
        JitOp::Recv => FuncLower::op_recv,
        JitOp::Send => FuncLower::op_send,
        JitOp::Store => FuncLower::op_store,
        JitOp::Load | JitOp::Uload => FuncLower::op_load,
        JitOp::Add | JitOp::Sub | JitOp::Mul => FuncLower::op_int_arith,
        JitOp::Div => FuncLower::op_div,
        JitOp::Rem => FuncLower::op_rem,
        JitOp::Fadd | JitOp::Fsub | JitOp::Fmul | JitOp::Fdiv => FuncLower::op_float_arith,
        JitOp::Fneg => FuncLower::op_fneg,
        JitOp::Fcvtns => FuncLower::op_fcvtns,
        JitOp::Scvtf => FuncLower::op_scvtf,
        JitOp::Not => FuncLower::op_not,
        JitOp::And | JitOp::Or | JitOp::Xor => FuncLower::op_logical,
        JitOp::Ret => FuncLower::op_ret,
        JitOp::Jump => FuncLower::op_jump,
        JitOp::Cmp => FuncLower::op_cmp,
        JitOp::Fcmp => FuncLower::op_fcmp,
        JitOp::Cset => FuncLower::op_cset,
        JitOp::Csel => FuncLower::op_csel,
        JitOp::Call => FuncLower::op_call,
        JitOp::Lea => FuncLower::op_lea,
        JitOp::Mov => FuncLower::op_mov,
        JitOp::Neg => FuncLower::op_neg,
        JitOp::Debug => FuncLower::op_debug,
        JitOp::MacroExp => FuncLower::macro_exp,
        JitOp::MacroFexp => FuncLower::macro_fexp,
        JitOp::MacroCopy => FuncLower::macro_copy,
        JitOp::MacroBzero => FuncLower::macro_bzero,
        JitOp::MacroExit => FuncLower::macro_exit,
        JitOp::MacroFficall => FuncLower::macro_fficall,
        JitOp::MacroGalloc => FuncLower::macro_galloc,
        JitOp::MacroGetpriv => FuncLower::macro_getpriv,
        JitOp::MacroPutpriv => FuncLower::macro_putpriv,
    }
}

impl<'a, 'll> FuncLower<'a, 'll> {
    fn arg_index(&self, index: usize, v: JitValue) -> i64 {
        let nth = match v {
            JitValue::Int64(n) => n,
            other => self.abort_at(index, &format!("argument index is {other:?}")),
        };
        if nth < 0 || nth >= JIT_MAX_ARGS as i64 {
            self.abort_at(index, &format!("argument index {nth} out of range"));
        }
        nth
    }

    fn op_recv(&mut self, index: usize, ir: &JitIr) {
        let nth = self.arg_index(index, ir.arg1);
        let ptr = self
            .bx
            .arg_gep(self.args, self.cx.const_i32(nth as u32), &self.arg_name(nth));
        let value = self
            .bx
            .load(self.cx.types().i64.into(), ptr, &self.reg_name(ir.result))
            .into_int_value();
        self.set_out(ir.result, value);
    }

    fn op_send(&mut self, index: usize, ir: &JitIr) {
        let nth = self.arg_index(index, ir.arg1);
        let value = self.value(index, ir.arg2);
        let ptr = self
            .bx
            .arg_gep(self.args, self.cx.const_i32(nth as u32), &self.arg_name(nth));
        self.bx.store(value, ptr);
    }

    fn op_store(&mut self, index: usize, ir: &JitIr) {
        let ty = self.cx.types().int(ir.size);
        let value = self.coerce_int(index, ir.arg1, ty);
        let ptr = self.coerce_ptr(index, ir.arg2);
        self.bx.store(value.into(), ptr);
    }

    fn op_load(&mut self, index: usize, ir: &JitIr) {
        let ty = self.cx.types().int(ir.size);
        let ptr = self.coerce_ptr(index, ir.arg1);

        if ir.size == JitSize::S64 {
            let value = self
                .bx
                .load(ty.into(), ptr, &self.reg_name(ir.result))
                .into_int_value();
            self.set_out(ir.result, value);
        } else {
            let tmp = self.bx.load(ty.into(), ptr, "");
            if ir.op == JitOp::Uload {
                self.zext_result(index, ir, tmp);
            } else {
                self.sext_result(index, ir, tmp);
            }
        }
    }

    fn op_int_arith(&mut self, index: usize, ir: &JitIr) {
        let intrinsic = match (ir.op, ir.cc) {
            (JitOp::Add, JitCc::O) => Some(RtFn::SaddOverflow(ir.size)),
            (JitOp::Add, JitCc::C) => Some(RtFn::UaddOverflow(ir.size)),
            (JitOp::Sub, JitCc::O) => Some(RtFn::SsubOverflow(ir.size)),
            (JitOp::Sub, JitCc::C) => Some(RtFn::UsubOverflow(ir.size)),
            (JitOp::Mul, JitCc::O) => Some(RtFn::SmulOverflow(ir.size)),
            (JitOp::Mul, JitCc::C) => Some(RtFn::UmulOverflow(ir.size)),
            _ => None,
        };

        if let Some(which) = intrinsic {
            let ty = self.cx.types().int(ir.size);
            let arg1 = self.coerce_int(index, ir.arg1, ty);
            let arg2 = self.coerce_int(index, ir.arg2, ty);

            let pair = self
                .bx
                .call_rt(which, &[arg1.into(), arg2.into()], "")
                .expect("overflow intrinsic returns a pair")
                .into_struct_value();

            let result = self.bx.extract(pair, 0, "");
            let flags = self.bx.extract(pair, 1, "FLAGS").into_int_value();
            self.set_flags(flags);

            if ir.cc == JitCc::C {
                self.zext_result(index, ir, result);
            } else {
                self.sext_result(index, ir, result);
            }
        } else {
            let arg1 = self.expect_int(index, ir.arg1);
            let arg2 = self.expect_int(index, ir.arg2);
            let name = self.reg_name(ir.result);
            let value = match ir.op {
                JitOp::Add => self.bx.add(arg1, arg2, &name),
                JitOp::Sub => self.bx.sub(arg1, arg2, &name),
                JitOp::Mul => self.bx.mul(arg1, arg2, &name),
                _ => unreachable!(),
            };
            self.set_out(ir.result, value);
        }
    }

    fn op_div(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.expect_int(index, ir.arg1);
        let arg2 = self.expect_int(index, ir.arg2);
        let value = self.bx.sdiv(arg1, arg2, &self.reg_name(ir.result));
        self.set_out(ir.result, value);
    }

    fn op_rem(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.expect_int(index, ir.arg1);
        let arg2 = self.expect_int(index, ir.arg2);
        let value = self.bx.srem(arg1, arg2, &self.reg_name(ir.result));
        self.set_out(ir.result, value);
    }

    fn op_float_arith(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.coerce_f64(index, ir.arg1);
        let arg2 = self.coerce_f64(index, ir.arg2);
        let real = match ir.op {
            JitOp::Fadd => self.bx.fadd(arg1, arg2, ""),
            JitOp::Fsub => self.bx.fsub(arg1, arg2, ""),
            JitOp::Fmul => self.bx.fmul(arg1, arg2, ""),
            JitOp::Fdiv => self.bx.fdiv(arg1, arg2, ""),
            _ => unreachable!(),
        };
        self.sext_result(index, ir, real.into());
    }

    fn op_fneg(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.coerce_f64(index, ir.arg1);
        let real = self.bx.fneg(arg1, "");
        self.sext_result(index, ir, real.into());
    }

    fn op_fcvtns(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.coerce_f64(index, ir.arg1);
        let rounded = self
            .bx
            .call_rt(RtFn::RoundF64, &[arg1.into()], "")
            .expect("round returns a double")
            .into_float_value();
        let value = self
            .bx
            .fptosi(rounded, self.cx.types().i64, &self.reg_name(ir.result));
        self.set_out(ir.result, value);
    }

    fn op_scvtf(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.expect_int(index, ir.arg1);
        let real = self.bx.sitofp(arg1, "");
        self.sext_result(index, ir, real.into());
    }

    fn op_not(&mut self, index: usize, ir: &JitIr) {
        let i1 = self.cx.types().i1;
        let arg1 = self.coerce_int(index, ir.arg1, i1);
        let logical = self.bx.not(arg1, "");
        self.zext_result(index, ir, logical.into());
    }

    fn op_logical(&mut self, index: usize, ir: &JitIr) {
        let i1 = self.cx.types().i1;
        let arg1 = self.coerce_int(index, ir.arg1, i1);
        let arg2 = self.coerce_int(index, ir.arg2, i1);
        let logical = match ir.op {
            JitOp::And => self.bx.and(arg1, arg2, ""),
            JitOp::Or => self.bx.or(arg1, arg2, ""),
            JitOp::Xor => self.bx.xor(arg1, arg2, ""),
            _ => unreachable!(),
        };
        self.zext_result(index, ir, logical.into());
    }

    fn op_ret(&mut self, _index: usize, _ir: &JitIr) {
        self.bx.ret_void();
    }

    fn op_jump(&mut self, index: usize, ir: &JitIr) {
        let out = &self.cfg.blocks[self.cur].out_edges;
        match ir.cc {
            JitCc::None => {
                assert_eq!(out.len(), 1);
                self.bx.br(self.blocks[out[0] as usize].bb);
            }
            JitCc::T => {
                assert_eq!(out.len(), 2);
                let dest_t = self.blocks[out[1] as usize].bb;
                let dest_f = self.blocks[self.cur + 1].bb;
                self.bx.cond_br(self.flags(), dest_t, dest_f);
            }
            JitCc::F => {
                assert_eq!(out.len(), 2);
                let dest_t = self.blocks[out[1] as usize].bb;
                let dest_f = self.blocks[self.cur + 1].bb;
                self.bx.cond_br(self.flags(), dest_f, dest_t);
            }
            _ => self.abort_at(index, "unhandled jump condition code"),
        }
    }

    fn op_cmp(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.expect_int(index, ir.arg1);
        let arg2 = self.expect_int(index, ir.arg2);

        let pred = match ir.cc {
            JitCc::Eq => IntPredicate::EQ,
            JitCc::Ne => IntPredicate::NE,
            JitCc::Gt => IntPredicate::SGT,
            JitCc::Lt => IntPredicate::SLT,
            JitCc::Le => IntPredicate::SLE,
            JitCc::Ge => IntPredicate::SGE,
            _ => self.abort_at(index, "unhandled cmp condition code"),
        };

        let flags = self.bx.icmp(pred, arg1, arg2, "FLAGS");
        self.set_flags(flags);
    }

    fn op_fcmp(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.coerce_f64(index, ir.arg1);
        let arg2 = self.coerce_f64(index, ir.arg2);

        // Unordered predicates: comparisons involving NaN come out true.
        let pred = match ir.cc {
            JitCc::Eq => FloatPredicate::UEQ,
            JitCc::Ne => FloatPredicate::UNE,
            JitCc::Gt => FloatPredicate::UGT,
            JitCc::Lt => FloatPredicate::ULT,
            JitCc::Le => FloatPredicate::ULE,
            JitCc::Ge => FloatPredicate::UGE,
            _ => self.abort_at(index, "unhandled fcmp condition code"),
        };

        let flags = self.bx.fcmp(pred, arg1, arg2, "FLAGS");
        self.set_flags(flags);
    }

    fn op_cset(&mut self, index: usize, ir: &JitIr) {
        let flags = self.flags();
        self.zext_result(index, ir, flags.into());
    }

    fn op_csel(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.value(index, ir.arg1);
        let arg2 = self.value(index, ir.arg2);
        let result = self.bx.select(self.flags(), arg1, arg2, "");
        self.sext_result(index, ir, result);
    }

    fn op_call(&mut self, index: usize, ir: &JitIr) {
        self.sync_irpos(index);

        let handle = match ir.arg1 {
            JitValue::Handle(h) => h,
            other => self.abort_at(index, &format!("call target is {other:?}")),
        };
        let callee = self.jit.get_func(handle);

        let args = |func: inkwell::values::BasicValueEnum<'ll>| {
            [func, self.anchor.into(), self.args.into()]
        };
        match self.mode.function_ref(&self.bx, &callee) {
            CalleeRef::Direct { entry, func } => {
                self.bx.call(entry, &args(func.into()), "");
            }
            CalleeRef::Indirect { entry, func } => {
                self.bx
                    .call_indirect(self.cx.types().entry_fn, entry, &args(func.into()), "");
            }
        }
    }

    fn op_lea(&mut self, index: usize, ir: &JitIr) {
        match self.value(index, ir.arg1) {
            inkwell::values::BasicValueEnum::PointerValue(p) => {
                let value = self
                    .bx
                    .ptr_to_int(p, self.cx.types().i64, &self.reg_name(ir.result));
                self.set_out(ir.result, value);
            }
            other => self.zext_result(index, ir, other),
        }
    }

    fn op_mov(&mut self, index: usize, ir: &JitIr) {
        let value = self.value(index, ir.arg1);
        self.sext_result(index, ir, value);
    }

    fn op_neg(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.expect_int(index, ir.arg1);
        let value = self.bx.neg(arg1, &self.reg_name(ir.result));
        self.set_out(ir.result, value);
    }

    fn op_debug(&mut self, _index: usize, _ir: &JitIr) {
        // No code; DEBUG only contributes to the debug stream.
    }

    fn macro_exp(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.expect_int(index, ir.arg1);
        let arg2 = self.expect_int(index, ir.arg2);

        // TODO: integer exponentiation without the round trip through pow
        let base = self.bx.uitofp(arg1, "");
        let power = self.bx.uitofp(arg2, "");
        let real = self
            .bx
            .call_rt(RtFn::PowF64, &[base.into(), power.into()], "")
            .expect("pow returns a double")
            .into_float_value();

        let value = self
            .bx
            .fptoui(real, self.cx.types().i64, &self.reg_name(ir.result));
        self.set_out(ir.result, value);
    }

    fn macro_fexp(&mut self, index: usize, ir: &JitIr) {
        let arg1 = self.coerce_f64(index, ir.arg1);
        let arg2 = self.coerce_f64(index, ir.arg2);
        let real = self
            .bx
            .call_rt(RtFn::PowF64, &[arg1.into(), arg2.into()], "")
            .expect("pow returns a double")
            .into_float_value();
        self.sext_result(index, ir, real.into());
    }

    fn macro_copy(&mut self, index: usize, ir: &JitIr) {
        let count = self.reg_value(index, ir.result);
        let dest = self.coerce_ptr(index, ir.arg1);
        let src = self.coerce_ptr(index, ir.arg2);
        self.bx.memmove(dest, src, count);
    }

    fn macro_bzero(&mut self, index: usize, ir: &JitIr) {
        let count = self.reg_value(index, ir.result);
        let dest = self.coerce_ptr(index, ir.arg1);
        self.bx.memset_zero(dest, count);
    }

    fn macro_exit(&mut self, index: usize, ir: &JitIr) {
        self.sync_irpos(index);

        let which = self.expect_int(index, ir.arg1);
        self.bx.call_rt(
            RtFn::DoExit,
            &[which.into(), self.anchor.into(), self.args.into()],
            "",
        );
    }

    fn macro_fficall(&mut self, index: usize, ir: &JitIr) {
        self.sync_irpos(index);

        let id = match ir.arg1 {
            JitValue::Foreign(id) => id,
            other => self.abort_at(index, &format!("FFI target is {other:?}")),
        };
        let foreign = self.jit.get_foreign(id);
        let ffptr = self.mode.foreign_ref(&self.bx, &foreign);

        self.bx.call_rt(
            RtFn::DoFficall,
            &[ffptr.into(), self.anchor.into(), self.args.into()],
            "",
        );
    }

    fn macro_galloc(&mut self, index: usize, ir: &JitIr) {
        self.sync_irpos(index);

        let size = self.expect_int(index, ir.arg1);
        let size32 = self.bx.trunc(size, self.cx.types().i32, "");
        let ptr = self
            .bx
            .call_rt(
                RtFn::MspaceAlloc,
                &[size32.into(), self.cx.const_i32(1).into()],
                "",
            )
            .expect("mspace_alloc returns a pointer")
            .into_pointer_value();

        let value = self
            .bx
            .ptr_to_int(ptr, self.cx.types().i64, &self.reg_name(ir.result));
        self.set_out(ir.result, value);
    }

    fn macro_getpriv(&mut self, index: usize, ir: &JitIr) {
        let slot = self.coerce_int(index, ir.arg1, self.cx.types().i32);
        let ptr = self
            .bx
            .call_rt(RtFn::GetPriv, &[slot.into()], "")
            .expect("getpriv returns a pointer")
            .into_pointer_value();

        let value = self
            .bx
            .ptr_to_int(ptr, self.cx.types().i64, &self.reg_name(ir.result));
        self.set_out(ir.result, value);
    }

    fn macro_putpriv(&mut self, index: usize, ir: &JitIr) {
        let slot = self.coerce_int(index, ir.arg1, self.cx.types().i32);
        let ptr = self.coerce_ptr(index, ir.arg2);
        self.bx
            .call_rt(RtFn::PutPriv, &[slot.into(), ptr.into()], "");
    }
}
