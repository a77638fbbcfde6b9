//! Ahead-of-time module assembly.
//!
//! All functions of a unit share one module and one private constructor.
//! The constructor registers each function with the runtime and resolves the
//! late-bound `<name>.func` / `<sym>.ffi` globals; `llvm.global_ctors` runs
//! it at load time.

use std::fmt;
use std::path::Path;
use std::time::Instant;

use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::targets::{CodeModel, FileType, RelocMode};

use nvc_jit::{Jit, JitHandle, ABI_VERSION};

use crate::builder::Builder;
use crate::context::CodegenCx;
use crate::lower::{lower_function, AotMode};

/// Error from the final object-emission step.
#[derive(Debug, Clone)]
pub enum EmitError {
    ObjectEmission { path: String, message: String },
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectEmission { path, message } => {
                write!(f, "failed to write object file '{path}': {message}")
            }
        }
    }
}

impl std::error::Error for EmitError {}

/// One ahead-of-time compilation unit.
pub struct AotModule<'ll> {
    cx: CodegenCx<'ll>,
    mode: AotMode<'ll>,
}

impl<'ll> AotModule<'ll> {
    /// Create the unit: empty constructor, `llvm.global_ctors` entry, and
    /// the exported ABI version the loader checks.
    pub fn new(llcx: &'ll Context, name: &str) -> AotModule<'ll> {
        let cx = CodegenCx::new(llcx, name, RelocMode::PIC, CodeModel::Default);
        let t = cx.types();

        let ctor = cx
            .llmod()
            .add_function("ctor", t.ctor_fn, Some(Linkage::Private));
        cx.llcx().append_basic_block(ctor, "entry");

        let entry = t.ctor_entry.const_named_struct(&[
            cx.const_i32(65535).into(),
            ctor.as_global_value().as_pointer_value().into(),
            t.ptr.const_null().into(),
        ]);
        let ctors = cx
            .llmod()
            .add_global(t.ctor_entry.array_type(1), None, "llvm.global_ctors");
        ctors.set_linkage(Linkage::Appending);
        ctors.set_initializer(&t.ctor_entry.const_array(&[entry]));

        let abi = cx.llmod().add_global(t.i32, None, "__nvc_abi_version");
        abi.set_initializer(&cx.const_i32(ABI_VERSION));
        abi.set_constant(true);

        AotModule {
            mode: AotMode { ctor },
            cx,
        }
    }

    /// Lower one function into the unit.
    pub fn compile(&self, jit: &Jit, handle: JitHandle) {
        let func = jit.get_func(handle);
        let start = Instant::now();

        lower_function(&self.cx, &self.mode, jit, func.clone());

        tracing::debug!(
            func = %func.name,
            us = start.elapsed().as_micros() as u64,
            "compiled"
        );
    }

    /// Finish the constructor, verify, optimise, and write the object file.
    pub fn emit(self, path: &Path) -> Result<(), EmitError> {
        {
            let entry = self
                .mode
                .ctor
                .get_last_basic_block()
                .expect("constructor entry block");
            let bx = Builder::new(&self.cx, entry);
            bx.ret_void();
        }

        self.cx.finalise();

        self.cx
            .tm
            .write_to_file(self.cx.llmod(), FileType::Object, path)
            .map_err(|e| EmitError::ObjectEmission {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    pub fn module(&self) -> &Module<'ll> {
        self.cx.llmod()
    }

    pub fn print_to_string(&self) -> String {
        self.cx.llmod().print_to_string().to_string()
    }
}
