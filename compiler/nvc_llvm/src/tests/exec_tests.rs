//! End-to-end tests: compile through the JIT session and execute.

use std::sync::atomic::Ordering;

use nvc_jit::build::IrBuilder;
use nvc_jit::ir::{JitCc, JitSize, JitValue};
use nvc_jit::{Jit, JIT_MAX_ARGS};

use super::helper::{self, compile_and_run};
use crate::jit::JitSession;

fn args_with(values: &[i64]) -> [i64; JIT_MAX_ARGS] {
    let mut args = [0i64; JIT_MAX_ARGS];
    args[..values.len()].copy_from_slice(values);
    args
}

#[test]
fn identity_function() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("identity");
    let r0 = b.reg();
    b.recv(r0, 0);
    b.send(0, JitValue::Reg(r0));
    b.ret();
    let handle = b.install(&jit);

    // No runtime references at all, so process resolution suffices.
    let session = JitSession::new();
    let mut args = args_with(&[42]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 42);
}

#[test]
fn signed_overflow_sets_flags() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("addo32");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    let r3 = b.reg();
    b.recv(r0, 0);
    b.recv(r1, 1);
    b.add_cc(r2, JitValue::Reg(r0), JitValue::Reg(r1), JitCc::O, JitSize::S32);
    b.cset(r3);
    b.send(0, JitValue::Reg(r2));
    b.send(1, JitValue::Reg(r3));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[0x7FFF_FFFF, 1]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0] as u64, 0xFFFF_FFFF_8000_0000);
    assert_eq!(args[1], 1);

    // No overflow leaves the flag clear.
    let mut args = args_with(&[1, 2]);
    helper::run(&jit, handle, &mut args);
    assert_eq!(args[0], 3);
    assert_eq!(args[1], 0);
}

#[test]
fn unsigned_borrow_zero_extends() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("subc8");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    let r3 = b.reg();
    b.recv(r0, 0);
    b.recv(r1, 1);
    b.sub_cc(r2, JitValue::Reg(r0), JitValue::Reg(r1), JitCc::C, JitSize::S8);
    b.cset(r3);
    b.send(0, JitValue::Reg(r2));
    b.send(1, JitValue::Reg(r3));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[0, 1]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 0xFF);
    assert_eq!(args[1], 1);
}

#[test]
fn conditional_branch_and_fallthrough() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("less");
    let r0 = b.reg();
    let r1 = b.reg();
    b.recv(r0, 0);
    b.recv(r1, 1);
    b.cmp(JitCc::Lt, JitValue::Reg(r0), JitValue::Reg(r1));
    let taken = b.label();
    b.jump_if(JitCc::T, taken);
    b.send(0, JitValue::Int64(0));
    b.ret();
    b.bind(taken);
    b.send(0, JitValue::Int64(1));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[1, 2]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 1);

    let mut args = args_with(&[3, 2]);
    helper::run(&jit, handle, &mut args);
    assert_eq!(args[0], 0);
}

#[test]
fn loop_sums_with_phis() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("sumto");
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

    let session = helper::session();
    let mut args = args_with(&[5]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 0 + 1 + 2 + 3 + 4);

    let mut args = args_with(&[0]);
    helper::run(&jit, handle, &mut args);
    assert_eq!(args[0], 0);
}

#[test]
fn select_on_flags() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("pick");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    b.recv(r0, 0);
    b.recv(r1, 1);
    b.cmp(JitCc::Eq, JitValue::Reg(r0), JitValue::Reg(r1));
    b.csel(r2, JitValue::Int64(111), JitValue::Int64(222));
    b.send(0, JitValue::Reg(r2));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[7, 7]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 111);

    let mut args = args_with(&[7, 8]);
    helper::run(&jit, handle, &mut args);
    assert_eq!(args[0], 222);
}

#[test]
fn float_ops_bitcast_through_registers() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("fmix");
    let r0 = b.reg();
    let r1 = b.reg();
    b.recv(r0, 0);
    b.fadd(r1, JitValue::Reg(r0), JitValue::Double(2.5));
    b.send(0, JitValue::Reg(r1));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[f64::to_bits(1.5) as i64]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(f64::from_bits(args[0] as u64), 4.0);
}

#[test]
fn double_bit_patterns_survive() {
    // Bit-cast, never conversion: a NaN payload must come through intact.
    let payload = 0x7FF8_DEAD_BEEF_0001_u64;

    let jit = Jit::new();
    let mut b = IrBuilder::new("nanpass");
    b.send(0, JitValue::Double(f64::from_bits(payload)));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0] as u64, payload);
}

#[test]
fn float_compare_is_unordered() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("fcmpnan");
    let r0 = b.reg();
    let r1 = b.reg();
    b.recv(r0, 0);
    b.fcmp(JitCc::Lt, JitValue::Reg(r0), JitValue::Double(1.0));
    b.cset(r1);
    b.send(0, JitValue::Reg(r1));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[f64::to_bits(f64::NAN) as i64]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 1);

    let mut args = args_with(&[f64::to_bits(2.0) as i64]);
    helper::run(&jit, handle, &mut args);
    assert_eq!(args[0], 0);
}

#[test]
fn round_to_nearest_and_back() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("cvt");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    let r3 = b.reg();
    let r4 = b.reg();
    b.recv(r0, 0);
    b.scvtf(r1, JitValue::Reg(r0));
    b.fcvtns(r2, JitValue::Reg(r1));
    b.send(0, JitValue::Reg(r2));
    b.fcvtns(r3, JitValue::Double(2.5));
    b.send(1, JitValue::Reg(r3));
    b.fcvtns(r4, JitValue::Double(-2.5));
    b.send(2, JitValue::Reg(r4));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[7]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 7);
    // llvm.round rounds halfway cases away from zero.
    assert_eq!(args[1], 3);
    assert_eq!(args[2], -3);
}

#[test]
fn logical_ops_on_flags_domain() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("logic");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    let r3 = b.reg();
    let r4 = b.reg();
    let r5 = b.reg();
    b.recv(r0, 0);
    b.recv(r1, 1);
    b.and(r2, JitValue::Reg(r0), JitValue::Reg(r1));
    b.send(0, JitValue::Reg(r2));
    b.or(r3, JitValue::Reg(r0), JitValue::Reg(r1));
    b.send(1, JitValue::Reg(r3));
    b.not(r4, JitValue::Reg(r1));
    b.send(2, JitValue::Reg(r4));
    b.xor(r5, JitValue::Reg(r0), JitValue::Reg(r0));
    b.send(3, JitValue::Reg(r5));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[3, 0]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 0); // 3 && 0
    assert_eq!(args[1], 1); // 3 || 0
    assert_eq!(args[2], 1); // !0
    assert_eq!(args[3], 0); // 3 ^ 3 in the boolean domain
}

#[test]
fn division_truncates_toward_zero() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("divrem");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    let r3 = b.reg();
    let r4 = b.reg();
    b.recv(r0, 0);
    b.recv(r1, 1);
    b.div(r2, JitValue::Reg(r0), JitValue::Reg(r1));
    b.rem(r3, JitValue::Reg(r0), JitValue::Reg(r1));
    b.send(0, JitValue::Reg(r2));
    b.send(1, JitValue::Reg(r3));
    b.neg(r4, JitValue::Reg(r2));
    b.send(2, JitValue::Reg(r4));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[-7, 2]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], -3);
    assert_eq!(args[1], -1);
    assert_eq!(args[2], 3);
}

#[test]
fn loads_respect_signedness() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("loads");
    let r0 = b.reg();
    let r1 = b.reg();
    b.frame_size(8);
    b.store(JitValue::Int64(0x80), JitValue::Frame(0), JitSize::S8);
    b.load(r0, JitValue::Frame(0), JitSize::S8);
    b.uload(r1, JitValue::Frame(0), JitSize::S8);
    b.send(0, JitValue::Reg(r0));
    b.send(1, JitValue::Reg(r1));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], -128);
    assert_eq!(args[1], 128);
}

#[test]
fn lea_differences_measure_frame_layout() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("leas");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    b.frame_size(16);
    b.lea(r0, JitValue::Frame(12));
    b.lea(r1, JitValue::Frame(4));
    b.sub(r2, JitValue::Reg(r0), JitValue::Reg(r1));
    b.send(0, JitValue::Reg(r2));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 8);
}

#[test]
fn memmove_macro_preserves_count_register() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("blkcopy");
    let r0 = b.reg();
    let count = b.reg();
    let r2 = b.reg();
    let r3 = b.reg();
    b.frame_size(16);
    b.recv(r0, 0);
    b.store(JitValue::Reg(r0), JitValue::Frame(0), JitSize::S64);
    b.mov(count, JitValue::Int64(8));
    b.copy(count, JitValue::Frame(8), JitValue::Frame(0));
    b.load(r2, JitValue::Frame(8), JitSize::S64);
    b.send(0, JitValue::Reg(r2));
    b.send(1, JitValue::Reg(count));
    b.bzero(count, JitValue::Frame(0));
    b.load(r3, JitValue::Frame(0), JitSize::S64);
    b.send(2, JitValue::Reg(r3));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[0x1122_3344_5566_7788]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 0x1122_3344_5566_7788);
    assert_eq!(args[1], 8);
    assert_eq!(args[2], 0);
}

#[test]
fn exponent_macros() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("powers");
    let r0 = b.reg();
    let r1 = b.reg();
    b.exp(r0, JitValue::Int64(2), JitValue::Int64(10));
    b.send(0, JitValue::Reg(r0));
    b.fexp(r1, JitValue::Double(3.0), JitValue::Double(2.0));
    b.send(1, JitValue::Reg(r1));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 1024);
    assert_eq!(f64::from_bits(args[1] as u64), 9.0);
}

#[test]
fn call_passes_anchor_and_args() {
    let jit = Jit::new();

    let mut b = IrBuilder::new("succ");
    let r0 = b.reg();
    let r1 = b.reg();
    b.recv(r0, 0);
    b.add(r1, JitValue::Reg(r0), JitValue::Int64(1));
    b.send(0, JitValue::Reg(r1));
    b.ret();
    let succ = b.install(&jit);

    let mut b = IrBuilder::new("twice");
    b.call(succ);
    b.call(succ);
    b.ret();
    let twice = b.install(&jit);

    let session = helper::session();
    // The callee's entry address is baked at the caller's lowering, so
    // compile bottom-up.
    session.compile(&jit, succ);
    session.compile(&jit, twice);

    let mut args = args_with(&[40]);
    helper::run(&jit, twice, &mut args);
    assert_eq!(args[0], 42);
}

#[test]
fn exit_macro_reports_position() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("exiting");
    let r0 = b.reg();
    b.recv(r0, 0); // index 0
    b.exit(7); // index 1
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(helper::LAST_EXIT.load(Ordering::SeqCst), 7);
    assert_eq!(helper::LAST_EXIT_IRPOS.load(Ordering::SeqCst), 1);
}

#[test]
fn fficall_dispatches_through_runtime() {
    let jit = Jit::new();
    let foreign = jit.install_foreign("vhpi_hook", 0xABCD, std::ptr::null());

    let mut b = IrBuilder::new("ffi");
    b.fficall(foreign);
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(helper::LAST_FFI_SPEC.load(Ordering::SeqCst), 0xABCD);
    assert_eq!(args[0], 99);
}

#[test]
fn galloc_returns_usable_memory() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("alloc");
    let r0 = b.reg();
    let r1 = b.reg();
    let r2 = b.reg();
    b.recv(r0, 0);
    b.galloc(r1, JitValue::Int64(16));
    b.store(JitValue::Reg(r0), JitValue::RegAddr { base: r1, disp: 8 }, JitSize::S64);
    b.load(r2, JitValue::RegAddr { base: r1, disp: 8 }, JitSize::S64);
    b.send(0, JitValue::Reg(r2));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[0xFEED]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 0xFEED);
}

#[test]
fn private_pointer_round_trips() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("privptr");
    let r0 = b.reg();
    let r1 = b.reg();
    b.recv(r0, 0);
    b.putpriv(2, JitValue::Reg(r0));
    b.getpriv(r1, 2);
    b.send(0, JitValue::Reg(r1));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[0x5A5A]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 0x5A5A);
}

#[test]
fn constant_pool_addressed_absolutely() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("pool");
    let r0 = b.reg();
    b.cpool(vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x08]);
    b.load(r0, JitValue::Cpool(0), JitSize::S64);
    b.send(0, JitValue::Reg(r0));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = args_with(&[]);
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0] as u64, 0x0877_6655_4433_2211);
}

#[test]
fn last_argument_slot_works() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("lastarg");
    let r0 = b.reg();
    b.recv(r0, (JIT_MAX_ARGS - 1) as u32);
    b.send(0, JitValue::Reg(r0));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    let mut args = [0i64; JIT_MAX_ARGS];
    args[JIT_MAX_ARGS - 1] = 77;
    compile_and_run(&session, &jit, handle, &mut args);
    assert_eq!(args[0], 77);
}

#[test]
#[should_panic(expected = "argument index")]
fn argument_slot_past_limit_aborts() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("overarg");
    let r0 = b.reg();
    b.recv(r0, JIT_MAX_ARGS as u32);
    b.send(0, JitValue::Reg(r0));
    b.ret();
    let handle = b.install(&jit);

    let session = helper::session();
    session.compile(&jit, handle);
}

#[test]
fn only_filter_skips_other_functions() {
    let jit = Jit::new();
    let mut b = IrBuilder::new("wanted");
    b.ret();
    let wanted = b.install(&jit);

    let mut b = IrBuilder::new("unwanted");
    b.ret();
    let unwanted = b.install(&jit);

    let session =
        JitSession::with_config(Some(helper::hooks()), Some("wanted".to_string()));
    session.compile(&jit, unwanted);
    session.compile(&jit, wanted);

    assert!(jit.get_func(unwanted).entry().is_none());
    assert!(jit.get_func(wanted).entry().is_some());
}

#[test]
fn threshold_env_parsing() {
    std::env::set_var("NVC_JIT_THRESHOLD", "50");
    assert_eq!(crate::jit::jit_threshold(), Some(50));

    std::env::set_var("NVC_JIT_THRESHOLD", "0");
    assert_eq!(crate::jit::jit_threshold(), None);

    std::env::set_var("NVC_JIT_THRESHOLD", "-3");
    assert_eq!(crate::jit::jit_threshold(), None);

    std::env::remove_var("NVC_JIT_THRESHOLD");
    assert_eq!(crate::jit::jit_threshold(), None);
}
