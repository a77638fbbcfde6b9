//! Structural tests: lower into an AOT unit and assert on the module.

use inkwell::context::Context;

use nvc_jit::build::IrBuilder;
use nvc_jit::ir::{JitCc, JitSize, JitValue};
use nvc_jit::Jit;

use crate::aot::AotModule;

fn identity(jit: &Jit, name: &str) -> nvc_jit::JitHandle {
    let mut b = IrBuilder::new(name);
    let r0 = b.reg();
    b.recv(r0, 0);
    b.send(0, JitValue::Reg(r0));
    b.ret();
    b.install(jit)
}

#[test]
fn aot_unit_shape() {
    let jit = Jit::new();
    let foo = identity(&jit, "foo");

    let mut b = IrBuilder::new("bar");
    b.call(foo);
    b.ret();
    let bar = b.install(&jit);

    let llcx = Context::create();
    let aot = AotModule::new(&llcx, "unit");
    aot.compile(&jit, foo);
    aot.compile(&jit, bar);

    let ir = aot.print_to_string();

    // Per-function registration and pools.
    assert!(ir.contains("__nvc_register"));
    assert!(ir.contains("foo.cpool"));
    assert!(ir.contains("foo.debug"));
    assert!(ir.contains("bar.debug"));

    // Call via the late-bound handle and the trampoline.
    assert!(ir.contains("foo.func"));
    assert!(ir.contains("__nvc_get_func"));
    assert!(ir.contains("__nvc_trampoline"));

    // Module plumbing.
    assert!(ir.contains("llvm.global_ctors"));
    assert!(ir.contains("__nvc_abi_version"));

    // Entry symbols stay public, support globals do not.
    assert!(ir.contains("define void @foo(ptr"));
    assert!(ir.contains("@foo.func = private"));

    let path = std::env::temp_dir().join("nvc_llvm_aot_unit_shape.o");
    aot.emit(&path).expect("object emission");
    let meta = std::fs::metadata(&path).expect("object file written");
    assert!(meta.len() > 0);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn foreign_reference_goes_through_ctor() {
    let jit = Jit::new();
    let ffi = jit.install_foreign("pack_lib_fn", 0x1234, std::ptr::null());

    let mut b = IrBuilder::new("caller");
    b.fficall(ffi);
    b.ret();
    let caller = b.install(&jit);

    let llcx = Context::create();
    let aot = AotModule::new(&llcx, "ffiunit");
    aot.compile(&jit, caller);

    let ir = aot.print_to_string();
    assert!(ir.contains("pack_lib_fn.ffi"));
    assert!(ir.contains("__nvc_get_foreign"));
    assert!(ir.contains("__nvc_do_fficall"));

    let path = std::env::temp_dir().join("nvc_llvm_ffi_unit.o");
    aot.emit(&path).expect("object emission");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn aborting_block_gets_unreachable() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("bail");
    b.exit(3);
    let handle = b.install(&jit);

    let llcx = Context::create();
    let aot = AotModule::new(&llcx, "bailunit");
    aot.compile(&jit, handle);

    let ir = aot.print_to_string();
    assert!(ir.contains("unreachable"));
    assert!(ir.contains("__nvc_do_exit"));

    let path = std::env::temp_dir().join("nvc_llvm_bail_unit.o");
    aot.emit(&path).expect("object emission");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn frame_allocation_only_when_sized() {
    let jit = Jit::new();

    let small = identity(&jit, "noframe");

    let mut b = IrBuilder::new("framed");
    let r0 = b.reg();
    b.frame_size(24);
    b.recv(r0, 0);
    b.store(JitValue::Reg(r0), JitValue::Frame(8), JitSize::S64);
    b.ret();
    let framed = b.install(&jit);

    let llcx = Context::create();
    let aot = AotModule::new(&llcx, "frames");
    aot.compile(&jit, small);
    aot.compile(&jit, framed);

    let ir = aot.print_to_string();
    let noframe_body = &ir[ir.find("define void @noframe").unwrap()
        ..ir.find("define void @framed").unwrap_or(ir.len())];
    assert!(!noframe_body.contains("%frame"));
    assert!(ir.contains("alloca [24 x i8], align 8"));
}

#[test]
fn loop_gets_phis_for_live_registers() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("sum");
    let n = b.reg();
    let i = b.reg();
    let acc = b.reg();
    b.recv(n, 0);
    b.mov(i, JitValue::Int64(0));
    b.mov(acc, JitValue::Int64(0));
    let head = b.label();
    let done = b.label();
    b.bind(head);
    b.cmp(JitCc::Lt, JitValue::Reg(i), JitValue::Reg(n));
    b.jump_if(JitCc::F, done);
    b.add(acc, JitValue::Reg(acc), JitValue::Reg(i));
    b.add(i, JitValue::Reg(i), JitValue::Int64(1));
    b.jump(head);
    b.bind(done);
    b.send(0, JitValue::Reg(acc));
    b.ret();
    let handle = b.install(&jit);

    let llcx = Context::create();
    let aot = AotModule::new(&llcx, "loops");
    aot.compile(&jit, handle);

    let ir = aot.print_to_string();

    // The loop head joins two predecessors, so its phis carry two incoming
    // pairs; every phi has one pair per predecessor.
    assert!(ir.contains("phi i1"));
    assert!(ir
        .lines()
        .any(|l| l.contains("= phi i64") && l.matches('[').count() == 2));
    for line in ir.lines().filter(|l| l.contains("= phi ")) {
        assert!(line.matches('[').count() >= 1, "{line}");
    }

    // Verifier-clean end to end.
    let path = std::env::temp_dir().join("nvc_llvm_loop_unit.o");
    aot.emit(&path).expect("object emission");
    let _ = std::fs::remove_file(&path);
}

#[test]
#[should_panic(expected = "absolute address")]
fn aot_rejects_absolute_addresses() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("abs");
    let r0 = b.reg();
    b.mov(r0, JitValue::Abs(0x1234));
    b.send(0, JitValue::Reg(r0));
    b.ret();
    let handle = b.install(&jit);

    let llcx = Context::create();
    let aot = AotModule::new(&llcx, "absunit");
    aot.compile(&jit, handle);
}

#[test]
fn anchor_synced_before_exit() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("synced");
    let r0 = b.reg();
    b.recv(r0, 0); // index 0
    b.exit(7); // index 1
    b.ret();
    let handle = b.install(&jit);

    let llcx = Context::create();
    let aot = AotModule::new(&llcx, "syncunit");
    aot.compile(&jit, handle);

    let ir = aot.print_to_string();
    let store_pos = ir.find("store i32 1, ptr %irpos").expect("irpos store");
    let exit_pos = ir.find("call void @__nvc_do_exit").expect("exit call");
    assert!(store_pos < exit_pos);
}
