//! Codegen context hierarchy.
//!
//! - `SimpleCx`: LLVM context, module, and the fixed type table.
//! - `CodegenCx`: adds the target machine, the runtime-prototype cache, and
//!   the string pool.
//!
//! One `CodegenCx` exists per compilation job; nothing here is shared across
//! threads.

use std::cell::RefCell;

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetData, TargetMachine,
};
use inkwell::types::{FloatType, FunctionType, IntType, PointerType, StructType, VoidType};
use inkwell::values::{FloatValue, FunctionValue, IntValue};
use inkwell::AddressSpace;
use inkwell::OptimizationLevel;
use rustc_hash::FxHashMap;

use nvc_jit::ir::JitSize;

use crate::intrinsics::RtFn;
use crate::strings::StringPool;

/// The fixed set of types the backend emits, filled once at context
/// creation.
pub struct Types<'ll> {
    pub void: VoidType<'ll>,
    pub i1: IntType<'ll>,
    pub i8: IntType<'ll>,
    pub i16: IntType<'ll>,
    pub i32: IntType<'ll>,
    pub i64: IntType<'ll>,
    /// Pointer-sized integer for the target.
    pub iptr: IntType<'ll>,
    pub ptr: PointerType<'ll>,
    pub f64: FloatType<'ll>,
    pair_i8: StructType<'ll>,
    pair_i16: StructType<'ll>,
    pair_i32: StructType<'ll>,
    pair_i64: StructType<'ll>,
    /// `void(ptr func, ptr caller_anchor, ptr args)`.
    pub entry_fn: FunctionType<'ll>,
    /// `void()`.
    pub ctor_fn: FunctionType<'ll>,
    /// `{ptr caller, ptr function, i32 ir_position}` — field order is
    /// load-bearing; the runtime unwinder walks this layout.
    pub anchor: StructType<'ll>,
    /// `{i32 priority, ptr ctor, ptr data}` for `llvm.global_ctors`.
    pub ctor_entry: StructType<'ll>,
}

impl<'ll> Types<'ll> {
    fn new(llcx: &'ll Context, data: &TargetData) -> Self {
        let void = llcx.void_type();
        let i1 = llcx.bool_type();
        let i8 = llcx.i8_type();
        let i16 = llcx.i16_type();
        let i32 = llcx.i32_type();
        let i64 = llcx.i64_type();
        let iptr = llcx.ptr_sized_int_type(data, None);
        let ptr = llcx.ptr_type(AddressSpace::default());
        let f64 = llcx.f64_type();

        let pair = |int: IntType<'ll>| llcx.struct_type(&[int.into(), i1.into()], false);

        let entry_fn = void.fn_type(&[ptr.into(), ptr.into(), ptr.into()], false);
        let ctor_fn = void.fn_type(&[], false);
        let anchor = llcx.struct_type(&[ptr.into(), ptr.into(), i32.into()], false);
        let ctor_entry = llcx.struct_type(&[i32.into(), ptr.into(), ptr.into()], false);

        Types {
            void,
            i1,
            i8,
            i16,
            i32,
            i64,
            iptr,
            ptr,
            f64,
            pair_i8: pair(i8),
            pair_i16: pair(i16),
            pair_i32: pair(i32),
            pair_i64: pair(i64),
            entry_fn,
            ctor_fn,
            anchor,
            ctor_entry,
        }
    }

    /// The integer type for an IR access width.
    pub fn int(&self, size: JitSize) -> IntType<'ll> {
        match size {
            JitSize::S8 => self.i8,
            JitSize::S16 => self.i16,
            JitSize::S32 => self.i32,
            JitSize::S64 => self.i64,
        }
    }

    /// The `{iN, i1}` result type of a checked-arithmetic intrinsic.
    pub fn pair(&self, size: JitSize) -> StructType<'ll> {
        match size {
            JitSize::S8 => self.pair_i8,
            JitSize::S16 => self.pair_i16,
            JitSize::S32 => self.pair_i32,
            JitSize::S64 => self.pair_i64,
        }
    }
}

/// Minimal LLVM context: the pieces type-building code needs.
pub struct SimpleCx<'ll> {
    pub llcx: &'ll Context,
    pub llmod: Module<'ll>,
    pub types: Types<'ll>,
}

/// Full per-job codegen context.
pub struct CodegenCx<'ll> {
    pub scx: SimpleCx<'ll>,
    pub tm: TargetMachine,
    pub(crate) protos: RefCell<FxHashMap<RtFn, FunctionValue<'ll>>>,
    pub(crate) strings: StringPool<'ll>,
}

impl<'ll> CodegenCx<'ll> {
    /// Create a context for one module on the host target.
    ///
    /// AOT callers pass `RelocMode::PIC`; the JIT uses the defaults.
    pub fn new(llcx: &'ll Context, name: &str, reloc: RelocMode, model: CodeModel) -> Self {
        let tm = host_target_machine(reloc, model);
        let data = tm.get_target_data();

        let llmod = llcx.create_module(name);
        llmod.set_triple(&tm.get_triple());
        llmod.set_data_layout(&data.get_data_layout());

        let types = Types::new(llcx, &data);

        CodegenCx {
            scx: SimpleCx { llcx, llmod, types },
            tm,
            protos: RefCell::new(FxHashMap::default()),
            strings: StringPool::new(),
        }
    }

    #[inline]
    pub fn llcx(&self) -> &'ll Context {
        self.scx.llcx
    }

    #[inline]
    pub fn llmod(&self) -> &Module<'ll> {
        &self.scx.llmod
    }

    #[inline]
    pub fn types(&self) -> &Types<'ll> {
        &self.scx.types
    }

    // -- Constants --

    pub fn const_bool(&self, b: bool) -> IntValue<'ll> {
        self.scx.types.i1.const_int(u64::from(b), false)
    }

    pub fn const_i8(&self, v: u8) -> IntValue<'ll> {
        self.scx.types.i8.const_int(u64::from(v), false)
    }

    pub fn const_i32(&self, v: u32) -> IntValue<'ll> {
        self.scx.types.i32.const_int(u64::from(v), false)
    }

    pub fn const_i64(&self, v: i64) -> IntValue<'ll> {
        self.scx.types.i64.const_int(v as u64, false)
    }

    pub fn const_f64(&self, v: f64) -> FloatValue<'ll> {
        self.scx.types.f64.const_float(v)
    }

    // -- Finalisation --

    /// Dump, verify, and optimise the module.
    ///
    /// Runs after all functions in the module are lowered, immediately
    /// before the module is handed to the execution engine or emitted.
    pub fn finalise(&self) {
        self.dump_module("initial");
        self.verify();
        self.optimise();
        self.dump_module("final");
    }

    /// Write the module IR to `<name>.<tag>.ll` when verbose output is
    /// enabled for this module.
    fn dump_module(&self, tag: &str) {
        if !self.verbose() {
            return;
        }

        let name = module_name(&self.scx.llmod);
        let path = format!("{name}.{tag}.ll");
        self.scx
            .llmod
            .print_to_file(&path)
            .unwrap_or_else(|e| panic!("failed to write LLVM IR file {path}: {e}"));
        tracing::debug!(module = %name, %path, "wrote LLVM IR");
    }

    fn verbose(&self) -> bool {
        match std::env::var("NVC_LLVM_VERBOSE") {
            Err(_) => false,
            Ok(v) if v.is_empty() || v == "1" => true,
            Ok(v) => module_name(&self.scx.llmod) == v,
        }
    }

    fn verify(&self) {
        if cfg!(debug_assertions) {
            if let Err(msg) = self.scx.llmod.verify() {
                panic!(
                    "LLVM verification failed for {}: {}",
                    module_name(&self.scx.llmod),
                    msg.to_string()
                );
            }
        }
    }

    fn optimise(&self) {
        use inkwell::passes::PassBuilderOptions;

        // The interpreter already ran its own cleanups on the IR; a short
        // function-level pipeline is enough here.
        const PASSES: &str = "function(sroa,instcombine,reassociate,gvn,simplifycfg)";

        self.scx
            .llmod
            .run_passes(PASSES, &self.tm, PassBuilderOptions::create())
            .unwrap_or_else(|e| {
                panic!(
                    "optimisation failed for {}: {}",
                    module_name(&self.scx.llmod),
                    e.to_string()
                )
            });
    }
}

fn module_name(llmod: &Module<'_>) -> String {
    llmod
        .get_name()
        .to_str()
        .unwrap_or("<module>")
        .to_string()
}

fn host_target_machine(reloc: RelocMode, model: CodeModel) -> TargetMachine {
    Target::initialize_native(&InitializationConfig::default())
        .unwrap_or_else(|e| panic!("failed to initialize native target: {e}"));

    let triple = TargetMachine::get_default_triple();
    let triple_str = triple.as_str().to_string_lossy().into_owned();
    let target = Target::from_triple(&triple)
        .unwrap_or_else(|e| panic!("failed to get LLVM target for {triple_str}: {e}"));

    target
        .create_target_machine(&triple, "", "", OptimizationLevel::Default, reloc, model)
        .unwrap_or_else(|| panic!("failed to create target machine for {triple_str}"))
}
