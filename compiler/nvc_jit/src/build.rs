//! Programmatic IR construction.
//!
//! The front-end's irgen produces buffers in this form; tests assemble their
//! golden programs through the same interface.

use crate::ir::{JitCc, JitIr, JitOp, JitReg, JitSize, JitValue};
use crate::{FileId, ForeignId, Jit, JitHandle};

/// An unresolved branch target.
#[derive(Clone, Copy, Debug)]
pub struct Label(u32);

/// Assembles one function's IR buffer.
pub struct IrBuilder {
    name: String,
    nregs: u32,
    framesz: u32,
    cpool: Vec<u8>,
    irbuf: Vec<JitIr>,
    labels: Vec<Option<u32>>,
}

impl IrBuilder {
    pub fn new(name: &str) -> Self {
        IrBuilder {
            name: name.to_string(),
            nregs: 0,
            framesz: 0,
            cpool: vec![],
            irbuf: vec![],
            labels: vec![],
        }
    }

    /// Allocate a fresh virtual register.
    pub fn reg(&mut self) -> JitReg {
        let r = JitReg(self.nregs);
        self.nregs += 1;
        r
    }

    pub fn frame_size(&mut self, bytes: u32) {
        self.framesz = bytes;
    }

    pub fn cpool(&mut self, bytes: Vec<u8>) {
        self.cpool = bytes;
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    /// Bind a label to the next instruction emitted.
    pub fn bind(&mut self, label: Label) {
        assert!(
            self.labels[label.0 as usize].is_none(),
            "{}: label L{} bound twice",
            self.name,
            label.0
        );
        self.labels[label.0 as usize] = Some(self.irbuf.len() as u32);
    }

    fn push(&mut self, ir: JitIr) {
        self.irbuf.push(ir);
    }

    fn push_result(&mut self, op: JitOp, result: JitReg, arg1: JitValue, arg2: JitValue) {
        let mut ir = JitIr::new(op);
        ir.result = result;
        ir.arg1 = arg1;
        ir.arg2 = arg2;
        self.push(ir);
    }

    pub fn recv(&mut self, result: JitReg, nth: u32) {
        self.push_result(JitOp::Recv, result, JitValue::Int64(i64::from(nth)), JitValue::None);
    }

    pub fn send(&mut self, nth: u32, value: JitValue) {
        let mut ir = JitIr::new(JitOp::Send);
        ir.arg1 = JitValue::Int64(i64::from(nth));
        ir.arg2 = value;
        self.push(ir);
    }

    pub fn load(&mut self, result: JitReg, addr: JitValue, size: JitSize) {
        let mut ir = JitIr::new(JitOp::Load);
        ir.size = size;
        ir.result = result;
        ir.arg1 = addr;
        self.push(ir);
    }

    pub fn uload(&mut self, result: JitReg, addr: JitValue, size: JitSize) {
        let mut ir = JitIr::new(JitOp::Uload);
        ir.size = size;
        ir.result = result;
        ir.arg1 = addr;
        self.push(ir);
    }

    pub fn store(&mut self, value: JitValue, addr: JitValue, size: JitSize) {
        let mut ir = JitIr::new(JitOp::Store);
        ir.size = size;
        ir.arg1 = value;
        ir.arg2 = addr;
        self.push(ir);
    }

    pub fn add(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Add, result, a, b);
    }

    pub fn add_cc(&mut self, result: JitReg, a: JitValue, b: JitValue, cc: JitCc, size: JitSize) {
        let mut ir = JitIr::new(JitOp::Add);
        ir.cc = cc;
        ir.size = size;
        ir.result = result;
        ir.arg1 = a;
        ir.arg2 = b;
        self.push(ir);
    }

    pub fn sub(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Sub, result, a, b);
    }

    pub fn sub_cc(&mut self, result: JitReg, a: JitValue, b: JitValue, cc: JitCc, size: JitSize) {
        let mut ir = JitIr::new(JitOp::Sub);
        ir.cc = cc;
        ir.size = size;
        ir.result = result;
        ir.arg1 = a;
        ir.arg2 = b;
        self.push(ir);
    }

    pub fn mul(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Mul, result, a, b);
    }

    pub fn mul_cc(&mut self, result: JitReg, a: JitValue, b: JitValue, cc: JitCc, size: JitSize) {
        let mut ir = JitIr::new(JitOp::Mul);
        ir.cc = cc;
        ir.size = size;
        ir.result = result;
        ir.arg1 = a;
        ir.arg2 = b;
        self.push(ir);
    }

    pub fn div(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Div, result, a, b);
    }

    pub fn rem(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Rem, result, a, b);
    }

    pub fn fadd(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Fadd, result, a, b);
    }

    pub fn fsub(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Fsub, result, a, b);
    }

    pub fn fmul(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Fmul, result, a, b);
    }

    pub fn fdiv(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Fdiv, result, a, b);
    }

    pub fn fneg(&mut self, result: JitReg, a: JitValue) {
        self.push_result(JitOp::Fneg, result, a, JitValue::None);
    }

    pub fn fcvtns(&mut self, result: JitReg, a: JitValue) {
        self.push_result(JitOp::Fcvtns, result, a, JitValue::None);
    }

    pub fn scvtf(&mut self, result: JitReg, a: JitValue) {
        self.push_result(JitOp::Scvtf, result, a, JitValue::None);
    }

    pub fn not(&mut self, result: JitReg, a: JitValue) {
        self.push_result(JitOp::Not, result, a, JitValue::None);
    }

    pub fn and(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::And, result, a, b);
    }

    pub fn or(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Or, result, a, b);
    }

    pub fn xor(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Xor, result, a, b);
    }

    pub fn cmp(&mut self, cc: JitCc, a: JitValue, b: JitValue) {
        let mut ir = JitIr::new(JitOp::Cmp);
        ir.cc = cc;
        ir.arg1 = a;
        ir.arg2 = b;
        self.push(ir);
    }

    pub fn fcmp(&mut self, cc: JitCc, a: JitValue, b: JitValue) {
        let mut ir = JitIr::new(JitOp::Fcmp);
        ir.cc = cc;
        ir.arg1 = a;
        ir.arg2 = b;
        self.push(ir);
    }

    pub fn cset(&mut self, result: JitReg) {
        self.push_result(JitOp::Cset, result, JitValue::None, JitValue::None);
    }

    pub fn csel(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::Csel, result, a, b);
    }

    pub fn jump(&mut self, target: Label) {
        let mut ir = JitIr::new(JitOp::Jump);
        ir.arg1 = JitValue::Label(target.0);
        self.push(ir);
    }

    pub fn jump_if(&mut self, cc: JitCc, target: Label) {
        assert!(matches!(cc, JitCc::T | JitCc::F));
        let mut ir = JitIr::new(JitOp::Jump);
        ir.cc = cc;
        ir.arg1 = JitValue::Label(target.0);
        self.push(ir);
    }

    pub fn call(&mut self, handle: JitHandle) {
        let mut ir = JitIr::new(JitOp::Call);
        ir.arg1 = JitValue::Handle(handle);
        self.push(ir);
    }

    pub fn lea(&mut self, result: JitReg, addr: JitValue) {
        self.push_result(JitOp::Lea, result, addr, JitValue::None);
    }

    pub fn mov(&mut self, result: JitReg, value: JitValue) {
        self.push_result(JitOp::Mov, result, value, JitValue::None);
    }

    pub fn neg(&mut self, result: JitReg, value: JitValue) {
        self.push_result(JitOp::Neg, result, value, JitValue::None);
    }

    pub fn ret(&mut self) {
        self.push(JitIr::new(JitOp::Ret));
    }

    pub fn debug(&mut self, file: FileId, line: u32) {
        let mut ir = JitIr::new(JitOp::Debug);
        ir.arg1 = JitValue::Loc { file, line };
        self.push(ir);
    }

    pub fn exp(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::MacroExp, result, a, b);
    }

    pub fn fexp(&mut self, result: JitReg, a: JitValue, b: JitValue) {
        self.push_result(JitOp::MacroFexp, result, a, b);
    }

    /// Copy `count` bytes (pre-loaded into `count`'s register) from `src`
    /// to `dst`.
    pub fn copy(&mut self, count: JitReg, dst: JitValue, src: JitValue) {
        self.push_result(JitOp::MacroCopy, count, dst, src);
    }

    pub fn bzero(&mut self, count: JitReg, dst: JitValue) {
        self.push_result(JitOp::MacroBzero, count, dst, JitValue::None);
    }

    pub fn exit(&mut self, which: u32) {
        let mut ir = JitIr::new(JitOp::MacroExit);
        ir.arg1 = JitValue::Exit(which);
        self.push(ir);
    }

    pub fn fficall(&mut self, foreign: ForeignId) {
        let mut ir = JitIr::new(JitOp::MacroFficall);
        ir.arg1 = JitValue::Foreign(foreign);
        self.push(ir);
    }

    pub fn galloc(&mut self, result: JitReg, size: JitValue) {
        self.push_result(JitOp::MacroGalloc, result, size, JitValue::None);
    }

    pub fn getpriv(&mut self, result: JitReg, slot: u32) {
        self.push_result(
            JitOp::MacroGetpriv,
            result,
            JitValue::Int64(i64::from(slot)),
            JitValue::None,
        );
    }

    pub fn putpriv(&mut self, slot: u32, value: JitValue) {
        let mut ir = JitIr::new(JitOp::MacroPutpriv);
        ir.arg1 = JitValue::Int64(i64::from(slot));
        ir.arg2 = value;
        self.push(ir);
    }

    /// Resolve labels and register the finished function.
    pub fn install(mut self, jit: &Jit) -> JitHandle {
        let mut targets = vec![];
        for ir in &mut self.irbuf {
            if ir.op == JitOp::Jump {
                if let JitValue::Label(id) = ir.arg1 {
                    let index = self.labels[id as usize]
                        .unwrap_or_else(|| panic!("{}: unbound label L{id}", self.name));
                    ir.arg1 = JitValue::Label(index);
                    targets.push(index);
                }
            }
        }
        for index in targets {
            self.irbuf[index as usize].target = true;
        }

        jit.install_func(self.name, self.nregs, self.framesz, self.cpool, self.irbuf)
    }
}
