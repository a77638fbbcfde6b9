//! Per-function lowering driver.
//!
//! Walks the CFG block by block, creating a flag phi and one phi per live-in
//! register at each block head, dispatching every instruction to its opcode
//! handler, then resolving phi incomings in a post-pass once all blocks have
//! out-values.

use std::cell::Cell;
use std::sync::Arc;

use inkwell::basic_block::BasicBlock;
use inkwell::values::{FunctionValue, GlobalValue, IntValue, PhiValue, PointerValue};

use nvc_jit::cfg::Cfg;
use nvc_jit::ir::{JitFunc, JitReg};
use nvc_jit::Jit;

use crate::builder::Builder;
use crate::context::CodegenCx;
use crate::debug;

pub(crate) mod mode;
mod ops;
mod value;

pub(crate) use mode::{AotMode, JitMode, Mode};

/// Lowering state for one CFG block.
///
/// `inregs` holds the phi created for each live-in register so the post-pass
/// can resolve predecessors; `outregs` holds the current definition of each
/// register and is mutated as the block is lowered. Register values are
/// always i64.
struct BlockState<'ll> {
    bb: BasicBlock<'ll>,
    inflags: Option<PhiValue<'ll>>,
    outflags: Option<IntValue<'ll>>,
    inregs: Vec<Option<PhiValue<'ll>>>,
    outregs: Vec<Option<IntValue<'ll>>>,
}

/// State threaded through every opcode handler.
pub(crate) struct FuncLower<'a, 'll> {
    cx: &'a CodegenCx<'ll>,
    mode: &'a dyn Mode<'ll>,
    jit: &'a Jit,
    source: Arc<JitFunc>,
    cfg: Cfg,
    bx: Builder<'a, 'll>,
    args: PointerValue<'ll>,
    anchor: PointerValue<'ll>,
    frame: Option<PointerValue<'ll>>,
    cpool: Option<GlobalValue<'ll>>,
    blocks: Vec<BlockState<'ll>>,
    cur: usize,
    uniq: Cell<u32>,
}

/// Lower one IR function into the context's module and return the backend
/// function.
pub(crate) fn lower_function<'ll>(
    cx: &CodegenCx<'ll>,
    mode: &dyn Mode<'ll>,
    jit: &Jit,
    source: Arc<JitFunc>,
) -> FunctionValue<'ll> {
    let t = cx.types();
    let llfn = cx.llmod().add_function(&source.name, t.entry_fn, None);
    let entry_bb = cx.llcx().append_basic_block(llfn, "entry");
    let bx = Builder::new(cx, entry_bb);

    let debug_bytes = debug::encode(&source, jit);
    let cpool = mode.publish(&bx, &source, llfn, &debug_bytes);

    let func_param = llfn.get_nth_param(0).expect("func param");
    func_param.set_name("func");
    let caller_param = llfn.get_nth_param(1).expect("caller param");
    caller_param.set_name("caller");
    let args_param = llfn.get_nth_param(2).expect("args param");
    args_param.set_name("args");

    let anchor = bx.alloca(t.anchor.into(), "anchor");
    bx.store(caller_param, bx.struct_gep(t.anchor, anchor, 0, ""));
    bx.store(func_param, bx.struct_gep(t.anchor, anchor, 1, ""));
    bx.store(cx.const_i32(0).into(), bx.struct_gep(t.anchor, anchor, 2, ""));

    let frame = (source.framesz > 0).then(|| {
        let frame_ty = t.i8.array_type(source.framesz);
        bx.alloca_aligned(frame_ty.into(), 8, "frame")
    });

    let cfg = Cfg::new(&source);
    let nregs = source.nregs as usize;
    let blocks: Vec<BlockState<'ll>> = (0..cfg.blocks.len())
        .map(|i| BlockState {
            bb: cx.llcx().append_basic_block(llfn, &format!("BB{i}")),
            inflags: None,
            outflags: None,
            inregs: vec![None; nregs],
            outregs: vec![None; nregs],
        })
        .collect();

    let mut lower = FuncLower {
        cx,
        mode,
        jit,
        source,
        cfg,
        bx,
        args: args_param.into_pointer_value(),
        anchor,
        frame,
        cpool,
        blocks,
        cur: 0,
        uniq: Cell::new(0),
    };

    lower.lower_blocks();
    lower.stitch_phis(entry_bb);

    lower.bx.position_at_end(entry_bb);
    lower.bx.br(lower.blocks[0].bb);

    llfn
}

impl<'a, 'll> FuncLower<'a, 'll> {
    fn lower_blocks(&mut self) {
        let i64_ty = self.cx.types().i64;
        let i1_ty = self.cx.types().i1;

        for b in 0..self.blocks.len() {
            self.cur = b;
            self.bx.position_at_end(self.blocks[b].bb);

            let flags = self.bx.phi(i1_ty.into(), "FLAGS");
            self.blocks[b].inflags = Some(flags);
            self.blocks[b].outflags = Some(flags.as_basic_value().into_int_value());

            for r in 0..self.source.nregs {
                if !self.cfg.blocks[b].livein.test(JitReg(r)) {
                    continue;
                }
                if b == 0 {
                    // The entry block substitutes zero for phi predecessors.
                    self.blocks[b].outregs[r as usize] = Some(i64_ty.const_zero());
                } else {
                    let phi = self.bx.phi(i64_ty.into(), &self.reg_name(JitReg(r)));
                    self.blocks[b].inregs[r as usize] = Some(phi);
                    self.blocks[b].outregs[r as usize] =
                        Some(phi.as_basic_value().into_int_value());
                }
            }

            let (first, last) = (self.cfg.blocks[b].first, self.cfg.blocks[b].last);
            for i in first..=last {
                self.lower_ir(i as usize);
            }

            if self.cfg.blocks[b].aborts {
                self.bx.unreachable();
            }

            if self.blocks[b].bb.get_terminator().is_none() {
                // Fall through to the next block in block order.
                assert!(!self.cfg.blocks[b].returns);
                assert!(b + 1 < self.blocks.len());
                self.bx.br(self.blocks[b + 1].bb);
            }
        }
    }

    fn lower_ir(&mut self, index: usize) {
        let ir = self.source.irbuf[index];
        let handler = ops::op_table(ir.op);
        handler(self, index, &ir);
    }

    /// Resolve phi incomings now that every block has out-values.
    fn stitch_phis(&mut self, entry_bb: BasicBlock<'ll>) {
        // Flags are clear on entry to the function's first block.
        let false_val = self.cx.const_bool(false);
        self.bx
            .add_incoming(self.blocks[0].inflags.expect("flags phi"), &[(false_val, entry_bb)]);

        for b in 0..self.blocks.len() {
            let preds = self.cfg.blocks[b].in_edges.clone();

            let flag_in: Vec<(IntValue<'ll>, BasicBlock<'ll>)> = preds
                .iter()
                .map(|&p| {
                    let pred = &self.blocks[p as usize];
                    (pred.outflags.expect("predecessor flags"), pred.bb)
                })
                .collect();
            self.bx
                .add_incoming(self.blocks[b].inflags.expect("flags phi"), &flag_in);

            for r in 0..self.source.nregs as usize {
                let Some(phi) = self.blocks[b].inregs[r] else {
                    continue;
                };
                let reg_in: Vec<(IntValue<'ll>, BasicBlock<'ll>)> = preds
                    .iter()
                    .map(|&p| {
                        let pred = &self.blocks[p as usize];
                        let value = pred.outregs[r].unwrap_or_else(|| {
                            panic!(
                                "{}: R{r} undefined on edge BB{p} -> BB{b}",
                                self.source.name
                            )
                        });
                        (value, pred.bb)
                    })
                    .collect();
                self.bx.add_incoming(phi, &reg_in);
            }
        }
    }

    /// Record the current IR position in the frame anchor. The unwinder
    /// relies on this being up to date at every call, exit, and FFI site.
    fn sync_irpos(&self, index: usize) {
        let ptr = self
            .bx
            .struct_gep(self.cx.types().anchor, self.anchor, 2, "irpos");
        self.bx.store(self.cx.const_i32(index as u32).into(), ptr);
    }

    /// Abort compilation, citing the offending instruction.
    fn abort_at(&self, index: usize, msg: &str) -> ! {
        panic!(
            "{}: {msg} at index {index}\n{}",
            self.source.name,
            self.source.dump_with_mark(index)
        );
    }

    fn flags(&self) -> IntValue<'ll> {
        self.blocks[self.cur].outflags.expect("block flags")
    }

    fn set_flags(&mut self, value: IntValue<'ll>) {
        self.blocks[self.cur].outflags = Some(value);
    }

    fn set_out(&mut self, reg: JitReg, value: IntValue<'ll>) {
        self.blocks[self.cur].outregs[reg.0 as usize] = Some(value);
    }

    fn reg_name(&self, reg: JitReg) -> String {
        if cfg!(debug_assertions) {
            let n = self.uniq.get();
            self.uniq.set(n + 1);
            format!("R{}.{n}", reg.0)
        } else {
            String::new()
        }
    }

    fn arg_name(&self, nth: i64) -> String {
        if cfg!(debug_assertions) {
            let n = self.uniq.get();
            self.uniq.set(n + 1);
            format!("A{nth}.{n}")
        } else {
            String::new()
        }
    }
}
