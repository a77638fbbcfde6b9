//! Operand materialization and coercion.
//!
//! Register slots are always i64: narrower integers are sign- or
//! zero-extended on definition, doubles are bit-cast, and pointers live as
//! integers after `ptrtoint`. Coercion back to the width a use site needs
//! happens here.

use inkwell::values::{BasicValueEnum, FloatValue, IntValue, PointerValue};
use inkwell::IntPredicate;

use nvc_jit::ir::{JitIr, JitReg, JitValue};

use super::FuncLower;

impl<'a, 'll> FuncLower<'a, 'll> {
    /// Materialize an operand.
    pub(super) fn value(&mut self, index: usize, v: JitValue) -> BasicValueEnum<'ll> {
        match v {
            JitValue::Reg(r) => self.reg_value(index, r).into(),
            JitValue::Int64(i) => self.cx.const_i64(i).into(),
            JitValue::Double(d) => self.cx.const_f64(d).into(),
            JitValue::Frame(off) => {
                if off < 0 || off >= i64::from(self.source.framesz) {
                    self.abort_at(index, &format!("frame offset {off} out of range"));
                }
                let Some(base) = self.frame else {
                    self.abort_at(index, "frame address in function with no frame");
                };
                let offset = self.cx.types().iptr.const_int(off as u64, false);
                self.bx.byte_gep(base, offset, "").into()
            }
            JitValue::Cpool(off) => {
                if off < 0 || off > self.source.cpool.len() as i64 {
                    self.abort_at(index, &format!("constant pool offset {off} out of range"));
                }
                match self.cpool {
                    Some(global) => {
                        let offset = self.cx.types().iptr.const_int(off as u64, false);
                        self.bx.byte_gep(global.as_pointer_value(), offset, "").into()
                    }
                    // The pool is live in this process; address it directly.
                    None => {
                        let addr = self.source.cpool.as_ptr() as usize + off as usize;
                        self.bx.const_ptr(addr, "").into()
                    }
                }
            }
            JitValue::RegAddr { base, disp } => {
                let mut addr = self.reg_value(index, base);
                if disp != 0 {
                    addr = self.bx.add(addr, self.cx.const_i64(disp), "");
                }
                addr.into()
            }
            JitValue::Exit(x) => self.cx.const_i32(x).into(),
            JitValue::Handle(h) => self.cx.const_i32(h.0).into(),
            JitValue::Abs(addr) => match self.mode.absolute(&self.bx, addr) {
                Some(ptr) => ptr.into(),
                None => self.abort_at(
                    index,
                    &format!("absolute address {addr:#x} in ahead-of-time unit"),
                ),
            },
            JitValue::Foreign(id) => {
                let foreign = self.jit.get_foreign(id);
                self.mode.foreign_ref(&self.bx, &foreign).into()
            }
            JitValue::None | JitValue::Label(_) | JitValue::Loc { .. } => {
                self.abort_at(index, &format!("cannot materialize operand {v:?}"))
            }
        }
    }

    pub(super) fn reg_value(&self, index: usize, reg: JitReg) -> IntValue<'ll> {
        if reg.0 >= self.source.nregs {
            self.abort_at(index, &format!("{reg} out of range"));
        }
        self.blocks[self.cur].outregs[reg.0 as usize]
            .unwrap_or_else(|| self.abort_at(index, &format!("{reg} used before definition")))
    }

    /// Materialize an operand that must already be an integer.
    pub(super) fn expect_int(&mut self, index: usize, v: JitValue) -> IntValue<'ll> {
        match self.value(index, v) {
            BasicValueEnum::IntValue(i) => i,
            other => self.abort_at(index, &format!("expected integer operand, got {other:?}")),
        }
    }

    /// Coerce an operand to the given integer width.
    pub(super) fn coerce_int(
        &mut self,
        index: usize,
        v: JitValue,
        ty: inkwell::types::IntType<'ll>,
    ) -> IntValue<'ll> {
        match self.value(index, v) {
            BasicValueEnum::IntValue(i) => self.resize_int(i, ty),
            BasicValueEnum::PointerValue(p) => {
                let int = self.bx.ptr_to_int(p, self.cx.types().i64, "");
                self.resize_int(int, ty)
            }
            BasicValueEnum::FloatValue(f) => {
                let int = self
                    .bx
                    .bitcast(f.into(), self.cx.types().i64.into(), "")
                    .into_int_value();
                self.resize_int(int, ty)
            }
            other => self.abort_at(index, &format!("cannot coerce {other:?} to integer")),
        }
    }

    fn resize_int(&self, i: IntValue<'ll>, ty: inkwell::types::IntType<'ll>) -> IntValue<'ll> {
        let from = i.get_type().get_bit_width();
        let to = ty.get_bit_width();
        if to == 1 {
            self.bx
                .icmp(IntPredicate::NE, i, i.get_type().const_zero(), "")
        } else if from < to {
            self.bx.sext(i, ty, "")
        } else if from == to {
            i
        } else {
            self.bx.trunc(i, ty, "")
        }
    }

    /// Coerce an operand to a pointer.
    pub(super) fn coerce_ptr(&mut self, index: usize, v: JitValue) -> PointerValue<'ll> {
        match self.value(index, v) {
            BasicValueEnum::PointerValue(p) => p,
            BasicValueEnum::IntValue(i) => self.bx.int_to_ptr(i, self.cx.types().ptr, ""),
            other => self.abort_at(index, &format!("cannot coerce {other:?} to pointer")),
        }
    }

    /// Coerce an operand to a double, by bit-cast only.
    pub(super) fn coerce_f64(&mut self, index: usize, v: JitValue) -> FloatValue<'ll> {
        match self.value(index, v) {
            BasicValueEnum::FloatValue(f) => f,
            BasicValueEnum::IntValue(i) if i.get_type().get_bit_width() == 64 => self
                .bx
                .bitcast(i.into(), self.cx.types().f64.into(), "")
                .into_float_value(),
            other => self.abort_at(index, &format!("cannot bit-cast {other:?} to double")),
        }
    }

    /// Store a result, widening to i64 by sign-extension (bit-cast for
    /// doubles).
    pub(super) fn sext_result(&mut self, index: usize, ir: &JitIr, value: BasicValueEnum<'ll>) {
        let i64_ty = self.cx.types().i64;
        let out = match value {
            BasicValueEnum::IntValue(i) if i.get_type().get_bit_width() == 64 => {
                if cfg!(debug_assertions) {
                    value.set_name(&self.reg_name(ir.result));
                }
                i
            }
            BasicValueEnum::IntValue(i) => self.bx.sext(i, i64_ty, &self.reg_name(ir.result)),
            BasicValueEnum::FloatValue(f) => self
                .bx
                .bitcast(f.into(), i64_ty.into(), &self.reg_name(ir.result))
                .into_int_value(),
            other => self.abort_at(index, &format!("unhandled result kind {other:?}")),
        };
        self.set_out(ir.result, out);
    }

    /// Store a result, widening to i64 by zero-extension.
    pub(super) fn zext_result(&mut self, index: usize, ir: &JitIr, value: BasicValueEnum<'ll>) {
        let i64_ty = self.cx.types().i64;
        let out = match value {
            BasicValueEnum::IntValue(i) if i.get_type().get_bit_width() == 64 => {
                if cfg!(debug_assertions) {
                    value.set_name(&self.reg_name(ir.result));
                }
                i
            }
            BasicValueEnum::IntValue(i) => self.bx.zext(i, i64_ty, &self.reg_name(ir.result)),
            other => self.abort_at(index, &format!("unhandled result kind {other:?}")),
        };
        self.set_out(ir.result, out);
    }
}
