//! LLVM instruction builder.
//!
//! Thin wrapper over `inkwell::builder::Builder` carrying the codegen
//! context. Builder failures are invariant violations here, so every method
//! unwraps them.

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder as LLVMBuilder;
use inkwell::types::{BasicTypeEnum, FunctionType, IntType, PointerType, StructType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, BasicValueEnum, FloatValue, FunctionValue, IntValue,
    PhiValue, PointerValue, StructValue,
};
use inkwell::{FloatPredicate, IntPredicate};

use crate::context::CodegenCx;
use crate::intrinsics::RtFn;

pub(crate) struct Builder<'a, 'll> {
    ll: LLVMBuilder<'ll>,
    pub cx: &'a CodegenCx<'ll>,
}

/// Restores the builder's position when dropped. Used while emitting
/// constructor-time initialization from the middle of a function body.
pub(crate) struct PositionGuard<'a, 'b, 'll> {
    builder: &'a Builder<'b, 'll>,
    saved: Option<BasicBlock<'ll>>,
}

impl Drop for PositionGuard<'_, '_, '_> {
    fn drop(&mut self) {
        if let Some(block) = self.saved {
            self.builder.position_at_end(block);
        }
    }
}

impl<'a, 'll> Builder<'a, 'll> {
    pub fn new(cx: &'a CodegenCx<'ll>, bb: BasicBlock<'ll>) -> Self {
        let ll = cx.llcx().create_builder();
        ll.position_at_end(bb);
        Builder { ll, cx }
    }

    pub fn position_at_end(&self, bb: BasicBlock<'ll>) {
        self.ll.position_at_end(bb);
    }

    pub fn current_block(&self) -> Option<BasicBlock<'ll>> {
        self.ll.get_insert_block()
    }

    pub fn save_position(&self) -> PositionGuard<'_, 'a, 'll> {
        PositionGuard {
            builder: self,
            saved: self.current_block(),
        }
    }

    // -- Terminators --

    pub fn ret_void(&self) {
        self.ll.build_return(None).expect("build_return");
    }

    pub fn br(&self, dest: BasicBlock<'ll>) {
        self.ll.build_unconditional_branch(dest).expect("build_br");
    }

    pub fn cond_br(&self, cond: IntValue<'ll>, then_bb: BasicBlock<'ll>, else_bb: BasicBlock<'ll>) {
        self.ll
            .build_conditional_branch(cond, then_bb, else_bb)
            .expect("build_cond_br");
    }

    pub fn unreachable(&self) {
        self.ll.build_unreachable().expect("build_unreachable");
    }

    // -- Phis --

    pub fn phi(&self, ty: BasicTypeEnum<'ll>, name: &str) -> PhiValue<'ll> {
        self.ll.build_phi(ty, name).expect("build_phi")
    }

    // -- Integer arithmetic --

    pub fn add(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_add(lhs, rhs, name).expect("add")
    }

    pub fn sub(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_sub(lhs, rhs, name).expect("sub")
    }

    pub fn mul(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_mul(lhs, rhs, name).expect("mul")
    }

    pub fn sdiv(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_signed_div(lhs, rhs, name).expect("sdiv")
    }

    pub fn srem(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_signed_rem(lhs, rhs, name).expect("srem")
    }

    pub fn neg(&self, val: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_neg(val, name).expect("neg")
    }

    pub fn not(&self, val: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_not(val, name).expect("not")
    }

    pub fn and(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_and(lhs, rhs, name).expect("and")
    }

    pub fn or(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_or(lhs, rhs, name).expect("or")
    }

    pub fn xor(&self, lhs: IntValue<'ll>, rhs: IntValue<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_xor(lhs, rhs, name).expect("xor")
    }

    // -- Floating point --

    pub fn fadd(&self, lhs: FloatValue<'ll>, rhs: FloatValue<'ll>, name: &str) -> FloatValue<'ll> {
        self.ll.build_float_add(lhs, rhs, name).expect("fadd")
    }

    pub fn fsub(&self, lhs: FloatValue<'ll>, rhs: FloatValue<'ll>, name: &str) -> FloatValue<'ll> {
        self.ll.build_float_sub(lhs, rhs, name).expect("fsub")
    }

    pub fn fmul(&self, lhs: FloatValue<'ll>, rhs: FloatValue<'ll>, name: &str) -> FloatValue<'ll> {
        self.ll.build_float_mul(lhs, rhs, name).expect("fmul")
    }

    pub fn fdiv(&self, lhs: FloatValue<'ll>, rhs: FloatValue<'ll>, name: &str) -> FloatValue<'ll> {
        self.ll.build_float_div(lhs, rhs, name).expect("fdiv")
    }

    pub fn fneg(&self, val: FloatValue<'ll>, name: &str) -> FloatValue<'ll> {
        self.ll.build_float_neg(val, name).expect("fneg")
    }

    // -- Comparisons and selection --

    pub fn icmp(
        &self,
        pred: IntPredicate,
        lhs: IntValue<'ll>,
        rhs: IntValue<'ll>,
        name: &str,
    ) -> IntValue<'ll> {
        self.ll.build_int_compare(pred, lhs, rhs, name).expect("icmp")
    }

    pub fn fcmp(
        &self,
        pred: FloatPredicate,
        lhs: FloatValue<'ll>,
        rhs: FloatValue<'ll>,
        name: &str,
    ) -> IntValue<'ll> {
        self.ll
            .build_float_compare(pred, lhs, rhs, name)
            .expect("fcmp")
    }

    pub fn select(
        &self,
        cond: IntValue<'ll>,
        then_val: BasicValueEnum<'ll>,
        else_val: BasicValueEnum<'ll>,
        name: &str,
    ) -> BasicValueEnum<'ll> {
        self.ll
            .build_select(cond, then_val, else_val, name)
            .expect("select")
    }

    // -- Casts --

    pub fn sext(&self, val: IntValue<'ll>, ty: IntType<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_s_extend(val, ty, name).expect("sext")
    }

    pub fn zext(&self, val: IntValue<'ll>, ty: IntType<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_z_extend(val, ty, name).expect("zext")
    }

    pub fn trunc(&self, val: IntValue<'ll>, ty: IntType<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_int_truncate(val, ty, name).expect("trunc")
    }

    pub fn bitcast(
        &self,
        val: BasicValueEnum<'ll>,
        ty: BasicTypeEnum<'ll>,
        name: &str,
    ) -> BasicValueEnum<'ll> {
        self.ll.build_bit_cast(val, ty, name).expect("bitcast")
    }

    pub fn sitofp(&self, val: IntValue<'ll>, name: &str) -> FloatValue<'ll> {
        self.ll
            .build_signed_int_to_float(val, self.cx.types().f64, name)
            .expect("sitofp")
    }

    pub fn uitofp(&self, val: IntValue<'ll>, name: &str) -> FloatValue<'ll> {
        self.ll
            .build_unsigned_int_to_float(val, self.cx.types().f64, name)
            .expect("uitofp")
    }

    pub fn fptosi(&self, val: FloatValue<'ll>, ty: IntType<'ll>, name: &str) -> IntValue<'ll> {
        self.ll
            .build_float_to_signed_int(val, ty, name)
            .expect("fptosi")
    }

    pub fn fptoui(&self, val: FloatValue<'ll>, ty: IntType<'ll>, name: &str) -> IntValue<'ll> {
        self.ll
            .build_float_to_unsigned_int(val, ty, name)
            .expect("fptoui")
    }

    pub fn ptr_to_int(&self, ptr: PointerValue<'ll>, ty: IntType<'ll>, name: &str) -> IntValue<'ll> {
        self.ll.build_ptr_to_int(ptr, ty, name).expect("ptr_to_int")
    }

    pub fn int_to_ptr(&self, val: IntValue<'ll>, ty: PointerType<'ll>, name: &str) -> PointerValue<'ll> {
        self.ll.build_int_to_ptr(val, ty, name).expect("int_to_ptr")
    }

    /// An absolute address as a pointer value.
    pub fn const_ptr(&self, addr: usize, name: &str) -> PointerValue<'ll> {
        let int = self.cx.types().iptr.const_int(addr as u64, false);
        self.int_to_ptr(int, self.cx.types().ptr, name)
    }

    // -- Memory --

    pub fn alloca(&self, ty: BasicTypeEnum<'ll>, name: &str) -> PointerValue<'ll> {
        self.ll.build_alloca(ty, name).expect("alloca")
    }

    pub fn alloca_aligned(&self, ty: BasicTypeEnum<'ll>, align: u32, name: &str) -> PointerValue<'ll> {
        let ptr = self.alloca(ty, name);
        ptr.as_instruction_value()
            .expect("alloca instruction")
            .set_alignment(align)
            .expect("set_alignment");
        ptr
    }

    pub fn load(&self, ty: BasicTypeEnum<'ll>, ptr: PointerValue<'ll>, name: &str) -> BasicValueEnum<'ll> {
        self.ll.build_load(ty, ptr, name).expect("load")
    }

    pub fn store(&self, val: BasicValueEnum<'ll>, ptr: PointerValue<'ll>) {
        self.ll.build_store(ptr, val).expect("store");
    }

    pub fn struct_gep(
        &self,
        ty: StructType<'ll>,
        ptr: PointerValue<'ll>,
        index: u32,
        name: &str,
    ) -> PointerValue<'ll> {
        self.ll
            .build_struct_gep(ty, ptr, index, name)
            .expect("struct_gep")
    }

    /// In-bounds byte offset from a base pointer.
    pub fn byte_gep(&self, base: PointerValue<'ll>, offset: IntValue<'ll>, name: &str) -> PointerValue<'ll> {
        // SAFETY: offsets come from the IR's own frame/cpool bounds, which
        // the caller checks before building the GEP.
        unsafe {
            self.ll
                .build_in_bounds_gep(self.cx.types().i8, base, &[offset], name)
                .expect("byte_gep")
        }
    }

    /// In-bounds index into an array of i64 slots.
    pub fn arg_gep(&self, base: PointerValue<'ll>, index: IntValue<'ll>, name: &str) -> PointerValue<'ll> {
        // SAFETY: argument indices are bounded by JIT_MAX_ARGS at lowering
        // time.
        unsafe {
            self.ll
                .build_in_bounds_gep(self.cx.types().i64, base, &[index], name)
                .expect("arg_gep")
        }
    }

    pub fn memmove(&self, dest: PointerValue<'ll>, src: PointerValue<'ll>, size: IntValue<'ll>) {
        self.ll
            .build_memmove(dest, 1, src, 1, size)
            .expect("memmove");
    }

    pub fn memset_zero(&self, dest: PointerValue<'ll>, size: IntValue<'ll>) {
        self.ll
            .build_memset(dest, 1, self.cx.const_i8(0), size)
            .expect("memset");
    }

    // -- Aggregates --

    pub fn extract(&self, agg: StructValue<'ll>, index: u32, name: &str) -> BasicValueEnum<'ll> {
        self.ll
            .build_extract_value(agg, index, name)
            .expect("extract_value")
    }

    // -- Calls --

    pub fn call(
        &self,
        callee: FunctionValue<'ll>,
        args: &[BasicValueEnum<'ll>],
        name: &str,
    ) -> Option<BasicValueEnum<'ll>> {
        let args_meta: Vec<BasicMetadataValueEnum<'ll>> = args.iter().map(|v| (*v).into()).collect();
        self.ll
            .build_call(callee, &args_meta, name)
            .expect("call")
            .try_as_basic_value()
            .left()
    }

    pub fn call_indirect(
        &self,
        fn_type: FunctionType<'ll>,
        fn_ptr: PointerValue<'ll>,
        args: &[BasicValueEnum<'ll>],
        name: &str,
    ) -> Option<BasicValueEnum<'ll>> {
        let args_meta: Vec<BasicMetadataValueEnum<'ll>> = args.iter().map(|v| (*v).into()).collect();
        self.ll
            .build_indirect_call(fn_type, fn_ptr, &args_meta, name)
            .expect("call_indirect")
            .try_as_basic_value()
            .left()
    }

    /// Call a runtime helper or intrinsic through the prototype cache.
    pub fn call_rt(
        &self,
        which: RtFn,
        args: &[BasicValueEnum<'ll>],
        name: &str,
    ) -> Option<BasicValueEnum<'ll>> {
        self.call(self.cx.rt_fn(which), args, name)
    }

    /// Add incoming values to a phi, one per predecessor.
    pub fn add_incoming(&self, phi: PhiValue<'ll>, incoming: &[(IntValue<'ll>, BasicBlock<'ll>)]) {
        let pairs: Vec<(&dyn BasicValue<'ll>, BasicBlock<'ll>)> = incoming
            .iter()
            .map(|(v, bb)| (v as &dyn BasicValue<'ll>, *bb))
            .collect();
        phi.add_incoming(&pairs);
    }
}
