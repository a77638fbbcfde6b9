//! LLVM backend for the simulator's JIT/AOT compiler.
//!
//! Lowers the register IR from `nvc_jit` into LLVM modules with the same
//! observable behavior as the interpreter. Two modes share one lowering
//! pipeline: the lazy per-function JIT (`jit::JitSession`) and whole-unit
//! ahead-of-time compilation (`aot::AotModule`).
//!
//! # Architecture
//!
//! - **Context** (`context.rs`): `SimpleCx` → `CodegenCx`, with the fixed
//!   type table and the target machine.
//! - **Builder** (`builder.rs`): instruction generation separated from
//!   context.
//! - **Lowering** (`lower/`): per-function driver, operand materialization,
//!   and one handler per opcode; the AOT/JIT split is a `Mode` capability
//!   passed into the driver.
//! - **Debug stream** (`debug.rs`): the compact location encoding consumed
//!   by the runtime unwinder.
//!
//! # Debugging
//!
//! Enable tracing with `RUST_LOG=nvc_llvm=debug`. Set `NVC_LLVM_VERBOSE` to
//! write `.ll` dumps before and after optimisation.

// Codegen threads many context values around and maps between LLVM's and the
// IR's integer widths; these lints fight that to no benefit.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::too_many_arguments,
    clippy::missing_panics_doc
)]

use std::sync::Once;

pub mod aot;
pub mod context;
pub mod debug;
pub mod jit;

mod builder;
mod intrinsics;
mod lower;
mod strings;

#[cfg(test)]
mod tests;

pub use aot::{AotModule, EmitError};
pub use debug::LineMap;
pub use jit::{jit_threshold, JitSession, RuntimeHooks};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call once at startup; safe to call repeatedly. Enable with
/// `RUST_LOG=nvc_llvm=debug` or `RUST_LOG=nvc_llvm=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
