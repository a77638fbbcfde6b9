//! Register-based IR consumed by the code-generation backends.
//!
//! Each function is a flat buffer of three-address instructions over numbered
//! virtual registers carrying 64-bit payloads. The interpreter executes this
//! form directly; the LLVM backend lowers it.

use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::{EntryFn, FileId, ForeignId, JitHandle};

/// A numbered virtual register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JitReg(pub u32);

impl JitReg {
    /// Placeholder for instructions that do not produce a result.
    pub const INVALID: JitReg = JitReg(u32::MAX);
}

impl fmt::Display for JitReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Operand access width: 0..3 maps to 8..64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum JitSize {
    S8,
    S16,
    S32,
    #[default]
    S64,
}

impl JitSize {
    pub fn bits(self) -> u32 {
        match self {
            JitSize::S8 => 8,
            JitSize::S16 => 16,
            JitSize::S32 => 32,
            JitSize::S64 => 64,
        }
    }
}

/// Condition code modifier attached to an instruction.
///
/// `O` and `C` request the signed-overflow and unsigned-carry variants of
/// checked arithmetic; `T` and `F` select the branch sense of a jump; the
/// remainder are comparison predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum JitCc {
    #[default]
    None,
    T,
    F,
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    O,
    C,
}

impl fmt::Display for JitCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JitCc::None => "",
            JitCc::T => ".T",
            JitCc::F => ".F",
            JitCc::Eq => ".EQ",
            JitCc::Ne => ".NE",
            JitCc::Lt => ".LT",
            JitCc::Ge => ".GE",
            JitCc::Gt => ".GT",
            JitCc::Le => ".LE",
            JitCc::O => ".O",
            JitCc::C => ".C",
        };
        f.write_str(s)
    }
}

/// Instruction opcodes, including the macro forms expanded by the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JitOp {
    Recv,
    Send,
    Store,
    Load,
    Uload,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Fneg,
    Fcvtns,
    Scvtf,
    Not,
    And,
    Or,
    Xor,
    Ret,
    Jump,
    Cmp,
    Fcmp,
    Cset,
    Csel,
    Call,
    Lea,
    Mov,
    Neg,
    Debug,
    MacroExp,
    MacroFexp,
    MacroCopy,
    MacroBzero,
    MacroExit,
    MacroFficall,
    MacroGalloc,
    MacroGetpriv,
    MacroPutpriv,
}

impl JitOp {
    /// Does this opcode define its result register?
    pub fn writes_result(self) -> bool {
        matches!(
            self,
            JitOp::Recv
                | JitOp::Load
                | JitOp::Uload
                | JitOp::Add
                | JitOp::Sub
                | JitOp::Mul
                | JitOp::Div
                | JitOp::Rem
                | JitOp::Fadd
                | JitOp::Fsub
                | JitOp::Fmul
                | JitOp::Fdiv
                | JitOp::Fneg
                | JitOp::Fcvtns
                | JitOp::Scvtf
                | JitOp::Not
                | JitOp::And
                | JitOp::Or
                | JitOp::Xor
                | JitOp::Cset
                | JitOp::Csel
                | JitOp::Lea
                | JitOp::Mov
                | JitOp::Neg
                | JitOp::MacroExp
                | JitOp::MacroFexp
                | JitOp::MacroGalloc
                | JitOp::MacroGetpriv
        )
    }

    /// Does this opcode *read* its result register?
    ///
    /// The block-copy macros take their byte count from the result slot,
    /// pre-computed by an earlier instruction.
    pub fn reads_result(self) -> bool {
        matches!(self, JitOp::MacroCopy | JitOp::MacroBzero)
    }

    /// Does this opcode end a basic block?
    pub fn is_terminator(self) -> bool {
        matches!(self, JitOp::Jump | JitOp::Ret)
    }

    pub fn name(self) -> &'static str {
        match self {
            JitOp::Recv => "RECV",
            JitOp::Send => "SEND",
            JitOp::Store => "STORE",
            JitOp::Load => "LOAD",
            JitOp::Uload => "ULOAD",
            JitOp::Add => "ADD",
            JitOp::Sub => "SUB",
            JitOp::Mul => "MUL",
            JitOp::Div => "DIV",
            JitOp::Rem => "REM",
            JitOp::Fadd => "FADD",
            JitOp::Fsub => "FSUB",
            JitOp::Fmul => "FMUL",
            JitOp::Fdiv => "FDIV",
            JitOp::Fneg => "FNEG",
            JitOp::Fcvtns => "FCVTNS",
            JitOp::Scvtf => "SCVTF",
            JitOp::Not => "NOT",
            JitOp::And => "AND",
            JitOp::Or => "OR",
            JitOp::Xor => "XOR",
            JitOp::Ret => "RET",
            JitOp::Jump => "JUMP",
            JitOp::Cmp => "CMP",
            JitOp::Fcmp => "FCMP",
            JitOp::Cset => "CSET",
            JitOp::Csel => "CSEL",
            JitOp::Call => "CALL",
            JitOp::Lea => "LEA",
            JitOp::Mov => "MOV",
            JitOp::Neg => "NEG",
            JitOp::Debug => "DEBUG",
            JitOp::MacroExp => "$EXP",
            JitOp::MacroFexp => "$FEXP",
            JitOp::MacroCopy => "$COPY",
            JitOp::MacroBzero => "$BZERO",
            JitOp::MacroExit => "$EXIT",
            JitOp::MacroFficall => "$FFICALL",
            JitOp::MacroGalloc => "$GALLOC",
            JitOp::MacroGetpriv => "$GETPRIV",
            JitOp::MacroPutpriv => "$PUTPRIV",
        }
    }
}

/// An instruction operand.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum JitValue {
    #[default]
    None,
    /// A virtual register.
    Reg(JitReg),
    /// 64-bit integer literal.
    Int64(i64),
    /// Double literal.
    Double(f64),
    /// Byte offset into the function's frame.
    Frame(i64),
    /// Byte offset into the function's constant pool.
    Cpool(i64),
    /// Register-based address with a byte displacement.
    RegAddr { base: JitReg, disp: i64 },
    /// Branch target: an IR index once resolved.
    Label(u32),
    /// Exit tag passed to the runtime.
    Exit(u32),
    /// Handle of another function in the registry.
    Handle(JitHandle),
    /// Absolute address.
    Abs(u64),
    /// Foreign-function record.
    Foreign(ForeignId),
    /// Source location carried by a DEBUG instruction.
    Loc { file: FileId, line: u32 },
}

impl fmt::Display for JitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            JitValue::None => Ok(()),
            JitValue::Reg(r) => write!(f, "{r}"),
            JitValue::Int64(v) => write!(f, "#{v}"),
            JitValue::Double(v) => write!(f, "%{v}"),
            JitValue::Frame(off) => write!(f, "[FP+{off}]"),
            JitValue::Cpool(off) => write!(f, "[CP+{off}]"),
            JitValue::RegAddr { base, disp } => write!(f, "[{base}+{disp}]"),
            JitValue::Label(ix) => write!(f, "L{ix}"),
            JitValue::Exit(x) => write!(f, "{x}"),
            JitValue::Handle(h) => write!(f, "<fn {}>", h.0),
            JitValue::Abs(a) => write!(f, "${a:x}"),
            JitValue::Foreign(id) => write!(f, "<ffi {}>", id.0),
            JitValue::Loc { file, line } => write!(f, "@{}:{line}", file.0),
        }
    }
}

/// One IR instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JitIr {
    pub op: JitOp,
    pub size: JitSize,
    pub cc: JitCc,
    /// Set when this instruction is the destination of a branch.
    pub target: bool,
    pub result: JitReg,
    pub arg1: JitValue,
    pub arg2: JitValue,
}

impl JitIr {
    pub fn new(op: JitOp) -> Self {
        JitIr {
            op,
            size: JitSize::S64,
            cc: JitCc::None,
            target: false,
            result: JitReg::INVALID,
            arg1: JitValue::None,
            arg2: JitValue::None,
        }
    }
}

impl fmt::Display for JitIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.name(), self.cc)?;
        if self.size != JitSize::S64 {
            write!(f, ".{}", self.size.bits())?;
        }
        let mut sep = " ";
        if self.op.writes_result() || self.op.reads_result() {
            write!(f, "{sep}{}", self.result)?;
            sep = ", ";
        }
        if self.arg1 != JitValue::None {
            write!(f, "{sep}{}", self.arg1)?;
            sep = ", ";
        }
        if self.arg2 != JitValue::None {
            write!(f, "{sep}{}", self.arg2)?;
        }
        Ok(())
    }
}

/// A function in IR form, as produced by the front-end.
///
/// Everything here is read-only to the backends except the published entry
/// pointer, which is the single cross-thread hand-off (release on write,
/// acquire on read).
pub struct JitFunc {
    pub name: String,
    pub handle: JitHandle,
    pub nregs: u32,
    pub framesz: u32,
    pub cpool: Vec<u8>,
    pub irbuf: Vec<JitIr>,
    entry: AtomicPtr<()>,
}

impl JitFunc {
    pub(crate) fn new(
        name: String,
        handle: JitHandle,
        nregs: u32,
        framesz: u32,
        cpool: Vec<u8>,
        irbuf: Vec<JitIr>,
    ) -> Self {
        JitFunc {
            name,
            handle,
            nregs,
            framesz,
            cpool,
            irbuf,
            entry: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    pub fn nirs(&self) -> u32 {
        self.irbuf.len() as u32
    }

    /// Publish a freshly compiled entry point.
    pub fn publish_entry(&self, addr: usize) {
        self.entry.store(addr as *mut (), Ordering::Release);
    }

    /// The current entry address, possibly null.
    pub fn entry_raw(&self) -> *mut () {
        self.entry.load(Ordering::Acquire)
    }

    /// The current entry point as a callable, if one has been published.
    pub fn entry(&self) -> Option<EntryFn> {
        let ptr = self.entry_raw();
        if ptr.is_null() {
            None
        } else {
            // SAFETY: only publish_entry stores here, and it stores the
            // address of a function with the entry signature.
            Some(unsafe { std::mem::transmute::<*mut (), EntryFn>(ptr) })
        }
    }

    /// Render the IR buffer with a marker against one instruction.
    ///
    /// Backends use this to report the context of a lowering failure.
    pub fn dump_with_mark(&self, mark: usize) -> String {
        use fmt::Write;
        let mut out = String::new();
        let _ = writeln!(out, "{}:", self.name);
        for (i, ir) in self.irbuf.iter().enumerate() {
            let cursor = if i == mark { "=>" } else { "  " };
            let label = if ir.target { format!("L{i}:") } else { String::new() };
            let _ = writeln!(out, "{cursor} {label:>6} {ir}");
        }
        out
    }

    pub fn dump(&self) -> String {
        self.dump_with_mark(usize::MAX)
    }
}
