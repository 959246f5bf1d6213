//! MIPS64 instruction set.
//!
//! This module defines the decoded instruction values the pipeline executes:
//! 1. **Opcodes:** The supported MIPS64 subset, grouped into families that fix
//!    operand conventions and encoding skeletons.
//! 2. **Stage behaviors:** What each instruction does in IF, ID, EX, MEM, and WB.
//! 3. **Encoding:** `pack`/`decode` over the real R/I/J/COP1 field layouts
//!    (see [`encode`]) and a disassembler (see [`disasm`]).
//!
//! Decode (ID) reads source registers into the instruction's latches and
//! registers the destination as an in-flight writer; execute (EX) computes into
//! the result latch; memory (MEM) performs loads and stores; write-back (WB)
//! lands the result and retires the writer. With forwarding enabled, arithmetic
//! results land early at the end of EX and load results at the end of MEM, which
//! is what shortens RAW stalls: the cycle controller runs stages in reverse
//! order, so a value written early is visible to ID in the same cycle.

/// Disassembly back to parseable assembly text.
pub mod disasm;
/// 32-bit packing and unpacking.
pub mod encode;

use crate::common::bits::sign_extend;
use crate::common::error::ExceptionCode;
use crate::config::Rounding;
use crate::core::arch::fcsr::FpExceptionKind;
use crate::core::arch::{Fcsr, Fpr, Gpr, Reg64};
use crate::memory::Memory;

/// FP functional units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpUnit {
    /// Four-stage pipelined adder.
    Adder,
    /// Seven-stage pipelined multiplier.
    Multiplier,
    /// Non-pipelined iterative divider.
    Divider,
}

/// Instruction families.
///
/// A family fixes the encoding skeleton and the operand conventions; concrete
/// opcodes select the actual computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    /// Three-register ALU operations (including shifts, mult/div, HI/LO moves).
    AluR,
    /// Register-immediate ALU operations.
    AluI,
    /// Memory loads (integer and FP).
    Load,
    /// Memory stores (integer and FP).
    Store,
    /// Conditional branches (including FP condition-code branches).
    Branch,
    /// Unconditional jumps.
    Jump,
    /// FP arithmetic dispatched into a functional unit.
    FpArith(FpUnit),
    /// FP moves, conversions, and GPR↔FPR transfers (single-cycle EX).
    FpMove,
    /// Traps and pipeline control.
    Control,
}

/// The supported MIPS64 opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Opcode {
    // Three-register ALU
    Add, Addu, Sub, Subu, And, Or, Xor, Nor, Slt, Sltu,
    Sll, Srl, Sra, Sllv, Srlv, Srav,
    Mult, Multu, Div, Divu, Mfhi, Mflo,
    Dadd, Daddu, Dsub, Dsubu,
    // Immediate ALU
    Addi, Addiu, Daddi, Daddiu, Andi, Ori, Xori, Lui, Slti, Sltiu,
    // Loads and stores
    Lb, Lbu, Lh, Lhu, Lw, Lwu, Ld, Sb, Sh, Sw, Sd, Ldc1, Sdc1,
    // Branches and jumps
    Beq, Bne, Bgez, Bltz, J, Jal, Jr, Jalr, Bc1t, Bc1f,
    // FP arithmetic and compares
    AddD, SubD, MulD, DivD, CEqD, CLtD,
    // FP moves and conversions
    MovD, CvtDL, CvtLD, Dmtc1, Dmfc1,
    // Control
    Nop, Break, Syscall, Halt,
}

impl Opcode {
    /// Lowercase mnemonic.
    pub fn name(&self) -> &'static str {
        use Opcode::*;
        match self {
            Add => "add", Addu => "addu", Sub => "sub", Subu => "subu",
            And => "and", Or => "or", Xor => "xor", Nor => "nor",
            Slt => "slt", Sltu => "sltu",
            Sll => "sll", Srl => "srl", Sra => "sra",
            Sllv => "sllv", Srlv => "srlv", Srav => "srav",
            Mult => "mult", Multu => "multu", Div => "div", Divu => "divu",
            Mfhi => "mfhi", Mflo => "mflo",
            Dadd => "dadd", Daddu => "daddu", Dsub => "dsub", Dsubu => "dsubu",
            Addi => "addi", Addiu => "addiu", Daddi => "daddi", Daddiu => "daddiu",
            Andi => "andi", Ori => "ori", Xori => "xori", Lui => "lui",
            Slti => "slti", Sltiu => "sltiu",
            Lb => "lb", Lbu => "lbu", Lh => "lh", Lhu => "lhu",
            Lw => "lw", Lwu => "lwu", Ld => "ld",
            Sb => "sb", Sh => "sh", Sw => "sw", Sd => "sd",
            Ldc1 => "l.d", Sdc1 => "s.d",
            Beq => "beq", Bne => "bne", Bgez => "bgez", Bltz => "bltz",
            J => "j", Jal => "jal", Jr => "jr", Jalr => "jalr",
            Bc1t => "bc1t", Bc1f => "bc1f",
            AddD => "add.d", SubD => "sub.d", MulD => "mul.d", DivD => "div.d",
            CEqD => "c.eq.d", CLtD => "c.lt.d",
            MovD => "mov.d", CvtDL => "cvt.d.l", CvtLD => "cvt.l.d",
            Dmtc1 => "dmtc1", Dmfc1 => "dmfc1",
            Nop => "nop", Break => "break", Syscall => "syscall", Halt => "halt",
        }
    }

    /// Family classification.
    pub fn family(&self) -> Family {
        use Opcode::*;
        match self {
            Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Sll | Srl | Sra
            | Sllv | Srlv | Srav | Mult | Multu | Div | Divu | Mfhi | Mflo | Dadd | Daddu
            | Dsub | Dsubu => Family::AluR,
            Addi | Addiu | Daddi | Daddiu | Andi | Ori | Xori | Lui | Slti | Sltiu => {
                Family::AluI
            }
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Ldc1 => Family::Load,
            Sb | Sh | Sw | Sd | Sdc1 => Family::Store,
            Beq | Bne | Bgez | Bltz | Bc1t | Bc1f => Family::Branch,
            J | Jal | Jr | Jalr => Family::Jump,
            AddD | SubD | CEqD | CLtD => Family::FpArith(FpUnit::Adder),
            MulD => Family::FpArith(FpUnit::Multiplier),
            DivD => Family::FpArith(FpUnit::Divider),
            MovD | CvtDL | CvtLD | Dmtc1 | Dmfc1 => Family::FpMove,
            Nop | Break | Syscall | Halt => Family::Control,
        }
    }

    /// Operand syntax string validated by the parser.
    ///
    /// `%R` GPR, `%F` FPR, `%I` signed immediate, `%U` unsigned immediate,
    /// `%B` branch/jump target label, `%L(%R)` memory operand.
    pub fn syntax(&self) -> &'static str {
        use Opcode::*;
        match self {
            Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Sllv | Srlv
            | Srav | Dadd | Daddu | Dsub | Dsubu => "%R,%R,%R",
            Sll | Srl | Sra => "%R,%R,%U",
            Mult | Multu | Div | Divu => "%R,%R",
            Mfhi | Mflo => "%R",
            Addi | Addiu | Daddi | Daddiu | Slti | Sltiu => "%R,%R,%I",
            Andi | Ori | Xori => "%R,%R,%U",
            Lui => "%R,%U",
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Sb | Sh | Sw | Sd => "%R,%L(%R)",
            Ldc1 | Sdc1 => "%F,%L(%R)",
            Beq | Bne => "%R,%R,%B",
            Bgez | Bltz => "%R,%B",
            J | Jal => "%B",
            Jr | Jalr => "%R",
            Bc1t | Bc1f => "%U,%B",
            AddD | SubD | MulD | DivD => "%F,%F,%F",
            CEqD | CLtD => "%U,%F,%F",
            MovD | CvtDL | CvtLD => "%F,%F",
            Dmtc1 | Dmfc1 => "%R,%F",
            Syscall => "%U",
            Nop | Break | Halt => "",
        }
    }
}

/// Operand fields resolved by the parser.
///
/// Field roles follow the MIPS encoding conventions: R-type destinations live
/// in `rd`, I-type destinations in `rt`, memory bases in `rs`. FP registers
/// reuse the same fields (`fd`→`rd`, `fs`→`rs`, `ft`→`rt`). Condition codes and
/// shift amounts live in `imm`; resolved branch/jump targets in `target`.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Operands {
    /// `rs` field: first source, memory base, or FP `fs`.
    pub rs: usize,
    /// `rt` field: second source, I-type destination, or FP `ft`.
    pub rt: usize,
    /// `rd` field: R-type destination or FP `fd`.
    pub rd: usize,
    /// Immediate, shift amount, syscall code, or FP condition code.
    pub imm: i64,
    /// Resolved absolute branch/jump target address.
    pub target: u32,
}

/// Mutable architectural state a stage behavior may touch.
pub struct ExecContext<'a> {
    /// General-purpose registers.
    pub gpr: &'a mut Gpr,
    /// Floating-point registers.
    pub fpr: &'a mut Fpr,
    /// FP control and status register.
    pub fcsr: &'a mut Fcsr,
    /// HI accumulator.
    pub hi: &'a mut Reg64,
    /// LO accumulator.
    pub lo: &'a mut Reg64,
    /// Program counter.
    pub pc: &'a mut u64,
    /// Data memory.
    pub mem: &'a mut Memory,
    /// EX/MEM→EX forwarding enabled.
    pub forwarding: bool,
}

/// What the decode stage decided for an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdAction {
    /// Sources read, destination registered; move on to EX or an FP unit.
    Proceed,
    /// Like `Proceed`, but the instruction is terminating: stop fetching.
    Stopping,
    /// A source register has an in-flight writer that forwarding cannot cover.
    Raw,
    /// The FP destination register has an in-flight FP arithmetic writer.
    Waw,
    /// A taken branch updated the PC; the controller must flush fetch.
    Jump,
}

/// A decoded instruction flowing through the pipeline.
///
/// Carries its resolved operands plus the runtime latches filled in by the
/// stages (source values at ID, result at EX, loaded value at MEM).
#[derive(Clone, Debug)]
pub struct Instruction {
    opcode: Opcode,
    ops: Operands,
    address: u32,
    encoding: u32,
    a: u64,
    b: u64,
    result: u64,
    result_hi: u64,
    load_value: u64,
    wrote_back: bool,
}

impl Instruction {
    /// Creates an instruction from its opcode and resolved operands.
    pub fn new(opcode: Opcode, ops: Operands) -> Self {
        Self {
            opcode,
            ops,
            address: 0,
            encoding: 0,
            a: 0,
            b: 0,
            result: 0,
            result_hi: 0,
            load_value: 0,
            wrote_back: false,
        }
    }

    /// The opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The resolved operands.
    pub fn ops(&self) -> &Operands {
        &self.ops
    }

    /// Lowercase mnemonic.
    pub fn name(&self) -> &'static str {
        self.opcode.name()
    }

    /// Code address the instruction was loaded at.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// 32-bit encoding.
    pub fn encoding(&self) -> u32 {
        self.encoding
    }

    /// Sets the code address (assigned by the assembler).
    pub fn set_address(&mut self, address: u32) {
        self.address = address;
    }

    /// Sets the packed encoding (assigned by the assembler).
    pub fn set_encoding(&mut self, encoding: u32) {
        self.encoding = encoding;
    }

    /// The FP functional unit this instruction occupies, if any.
    pub fn fp_unit(&self) -> Option<FpUnit> {
        match self.opcode.family() {
            Family::FpArith(unit) => Some(unit),
            _ => None,
        }
    }

    /// True for the encodings that terminate execution when they retire:
    /// `halt` and `syscall 0`.
    pub fn is_terminating(&self) -> bool {
        match self.opcode {
            Opcode::Halt => true,
            Opcode::Syscall => self.ops.imm == 0,
            _ => false,
        }
    }

    /// IF behavior. Returns true when a breakpoint should surface.
    pub fn stage_if(&mut self) -> bool {
        matches!(self.opcode, Opcode::Break)
    }

    /// ID behavior: read sources, register the destination writer, and decide
    /// branches.
    ///
    /// Returns [`IdAction::Raw`]/[`IdAction::Waw`] without side effects when a
    /// hazard blocks dispatch, so the instruction can retry next cycle.
    pub fn stage_id(&mut self, ctx: &mut ExecContext) -> IdAction {
        use Opcode::*;
        match self.opcode {
            Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Dadd | Daddu
            | Dsub | Dsubu => {
                if ctx.gpr.busy(self.ops.rs) || ctx.gpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                self.b = ctx.gpr.read(self.ops.rt);
                ctx.gpr.add_writer(self.ops.rd);
                IdAction::Proceed
            }
            Sllv | Srlv | Srav => {
                if ctx.gpr.busy(self.ops.rs) || ctx.gpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rt);
                self.b = ctx.gpr.read(self.ops.rs);
                ctx.gpr.add_writer(self.ops.rd);
                IdAction::Proceed
            }
            Sll | Srl | Sra => {
                if ctx.gpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rt);
                self.b = self.ops.imm as u64;
                ctx.gpr.add_writer(self.ops.rd);
                IdAction::Proceed
            }
            Mult | Multu | Div | Divu => {
                if ctx.gpr.busy(self.ops.rs) || ctx.gpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                self.b = ctx.gpr.read(self.ops.rt);
                ctx.hi.add_writer();
                ctx.lo.add_writer();
                IdAction::Proceed
            }
            Mfhi => {
                if ctx.hi.busy() {
                    return IdAction::Raw;
                }
                self.a = ctx.hi.read();
                ctx.gpr.add_writer(self.ops.rd);
                IdAction::Proceed
            }
            Mflo => {
                if ctx.lo.busy() {
                    return IdAction::Raw;
                }
                self.a = ctx.lo.read();
                ctx.gpr.add_writer(self.ops.rd);
                IdAction::Proceed
            }
            Addi | Addiu | Daddi | Daddiu | Andi | Ori | Xori | Slti | Sltiu => {
                if ctx.gpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                ctx.gpr.add_writer(self.ops.rt);
                IdAction::Proceed
            }
            Lui => {
                ctx.gpr.add_writer(self.ops.rt);
                IdAction::Proceed
            }
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld => {
                if ctx.gpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                ctx.gpr.add_writer(self.ops.rt);
                IdAction::Proceed
            }
            Ldc1 => {
                if ctx.gpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                ctx.fpr.add_writer(self.ops.rt);
                IdAction::Proceed
            }
            Sb | Sh | Sw | Sd => {
                if ctx.gpr.busy(self.ops.rs) || ctx.gpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                self.b = ctx.gpr.read(self.ops.rt);
                IdAction::Proceed
            }
            Sdc1 => {
                if ctx.gpr.busy(self.ops.rs) || ctx.fpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                self.b = ctx.fpr.read(self.ops.rt);
                IdAction::Proceed
            }
            Beq | Bne => {
                if ctx.gpr.busy(self.ops.rs) || ctx.gpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                self.b = ctx.gpr.read(self.ops.rt);
                let taken = match self.opcode {
                    Beq => self.a == self.b,
                    _ => self.a != self.b,
                };
                if taken {
                    *ctx.pc = self.ops.target as u64;
                    IdAction::Jump
                } else {
                    IdAction::Proceed
                }
            }
            Bgez | Bltz => {
                if ctx.gpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                let taken = match self.opcode {
                    Bgez => (self.a as i64) >= 0,
                    _ => (self.a as i64) < 0,
                };
                if taken {
                    *ctx.pc = self.ops.target as u64;
                    IdAction::Jump
                } else {
                    IdAction::Proceed
                }
            }
            Bc1t | Bc1f => {
                let bit = ctx.fcsr.condition_code(self.ops.imm as usize);
                let taken = bit == matches!(self.opcode, Bc1t);
                if taken {
                    *ctx.pc = self.ops.target as u64;
                    IdAction::Jump
                } else {
                    IdAction::Proceed
                }
            }
            J => {
                *ctx.pc = self.ops.target as u64;
                IdAction::Jump
            }
            Jal => {
                ctx.gpr.add_writer(self.ops.rd);
                self.result = self.address as u64 + 4;
                *ctx.pc = self.ops.target as u64;
                IdAction::Jump
            }
            Jr => {
                if ctx.gpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                *ctx.pc = self.a;
                IdAction::Jump
            }
            Jalr => {
                if ctx.gpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rs);
                ctx.gpr.add_writer(self.ops.rd);
                self.result = self.address as u64 + 4;
                *ctx.pc = self.a;
                IdAction::Jump
            }
            AddD | SubD | MulD | DivD => {
                if ctx.fpr.busy(self.ops.rs) || ctx.fpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                if ctx.fpr.waw_busy(self.ops.rd) {
                    return IdAction::Waw;
                }
                self.a = ctx.fpr.read(self.ops.rs);
                self.b = ctx.fpr.read(self.ops.rt);
                ctx.fpr.add_writer(self.ops.rd);
                ctx.fpr.add_waw(self.ops.rd);
                IdAction::Proceed
            }
            CEqD | CLtD => {
                if ctx.fpr.busy(self.ops.rs) || ctx.fpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.fpr.read(self.ops.rs);
                self.b = ctx.fpr.read(self.ops.rt);
                IdAction::Proceed
            }
            MovD | CvtDL | CvtLD => {
                if ctx.fpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.fpr.read(self.ops.rs);
                ctx.fpr.add_writer(self.ops.rd);
                IdAction::Proceed
            }
            Dmtc1 => {
                if ctx.gpr.busy(self.ops.rt) {
                    return IdAction::Raw;
                }
                self.a = ctx.gpr.read(self.ops.rt);
                ctx.fpr.add_writer(self.ops.rd);
                IdAction::Proceed
            }
            Dmfc1 => {
                if ctx.fpr.busy(self.ops.rs) {
                    return IdAction::Raw;
                }
                self.a = ctx.fpr.read(self.ops.rs);
                ctx.gpr.add_writer(self.ops.rt);
                IdAction::Proceed
            }
            Halt => IdAction::Stopping,
            Syscall => {
                if self.ops.imm == 0 {
                    IdAction::Stopping
                } else {
                    IdAction::Proceed
                }
            }
            Break | Nop => IdAction::Proceed,
        }
    }

    /// EX behavior: compute the result or effective address.
    ///
    /// Synchronous exceptions are returned; the wrapped result is latched first
    /// so downstream stages stay deterministic. With forwarding on, the result
    /// lands in the register file here.
    pub fn stage_ex(&mut self, ctx: &mut ExecContext) -> Result<(), ExceptionCode> {
        use Opcode::*;
        match self.opcode {
            Add | Addi => {
                let x = self.a as i32 as i64;
                let y = if self.opcode == Add {
                    self.b as i32 as i64
                } else {
                    self.ops.imm
                };
                let sum = x + y;
                self.result = sum as i32 as i64 as u64;
                if !(i32::MIN as i64..=i32::MAX as i64).contains(&sum) {
                    return Err(ExceptionCode::IntegerOverflow);
                }
            }
            Sub => {
                let diff = (self.a as i32 as i64) - (self.b as i32 as i64);
                self.result = diff as i32 as i64 as u64;
                if !(i32::MIN as i64..=i32::MAX as i64).contains(&diff) {
                    return Err(ExceptionCode::IntegerOverflow);
                }
            }
            Addu | Addiu => {
                let y = if self.opcode == Addu {
                    self.b as i32
                } else {
                    self.ops.imm as i32
                };
                self.result = (self.a as i32).wrapping_add(y) as i64 as u64;
            }
            Subu => {
                self.result = (self.a as i32).wrapping_sub(self.b as i32) as i64 as u64;
            }
            Dadd | Daddi => {
                let y = if self.opcode == Dadd {
                    self.b as i64
                } else {
                    self.ops.imm
                };
                let (sum, overflow) = (self.a as i64).overflowing_add(y);
                self.result = sum as u64;
                if overflow {
                    return Err(ExceptionCode::IntegerOverflow);
                }
            }
            Dsub => {
                let (diff, overflow) = (self.a as i64).overflowing_sub(self.b as i64);
                self.result = diff as u64;
                if overflow {
                    return Err(ExceptionCode::IntegerOverflow);
                }
            }
            Daddu | Daddiu => {
                let y = if self.opcode == Daddu {
                    self.b
                } else {
                    self.ops.imm as u64
                };
                self.result = self.a.wrapping_add(y);
            }
            Dsubu => {
                self.result = self.a.wrapping_sub(self.b);
            }
            And => self.result = self.a & self.b,
            Or => self.result = self.a | self.b,
            Xor => self.result = self.a ^ self.b,
            Nor => self.result = !(self.a | self.b),
            Andi => self.result = self.a & (self.ops.imm as u64 & 0xFFFF),
            Ori => self.result = self.a | (self.ops.imm as u64 & 0xFFFF),
            Xori => self.result = self.a ^ (self.ops.imm as u64 & 0xFFFF),
            Slt => self.result = ((self.a as i64) < (self.b as i64)) as u64,
            Sltu => self.result = (self.a < self.b) as u64,
            Slti => self.result = ((self.a as i64) < self.ops.imm) as u64,
            Sltiu => self.result = (self.a < self.ops.imm as u64) as u64,
            Lui => self.result = ((self.ops.imm as u32) << 16) as i32 as i64 as u64,
            Sll | Sllv => {
                let sh = (self.b & 31) as u32;
                self.result = ((self.a as u32) << sh) as i32 as i64 as u64;
            }
            Srl | Srlv => {
                let sh = (self.b & 31) as u32;
                self.result = ((self.a as u32) >> sh) as i32 as i64 as u64;
            }
            Sra | Srav => {
                let sh = (self.b & 31) as u32;
                self.result = ((self.a as i32) >> sh) as i64 as u64;
            }
            Mult => {
                let p = (self.a as i32 as i64) * (self.b as i32 as i64);
                self.result = p as i32 as i64 as u64;
                self.result_hi = (p >> 32) as i32 as i64 as u64;
            }
            Multu => {
                let p = (self.a as u32 as u64) * (self.b as u32 as u64);
                self.result = p as u32 as i32 as i64 as u64;
                self.result_hi = (p >> 32) as u32 as i32 as i64 as u64;
            }
            Div => {
                let d = self.b as i32;
                if d == 0 {
                    self.result = 0;
                    self.result_hi = 0;
                    return Err(ExceptionCode::DivisionByZero);
                }
                let n = self.a as i32;
                self.result = n.wrapping_div(d) as i64 as u64;
                self.result_hi = n.wrapping_rem(d) as i64 as u64;
            }
            Divu => {
                let d = self.b as u32;
                if d == 0 {
                    self.result = 0;
                    self.result_hi = 0;
                    return Err(ExceptionCode::DivisionByZero);
                }
                let n = self.a as u32;
                self.result = (n / d) as i32 as i64 as u64;
                self.result_hi = (n % d) as i32 as i64 as u64;
            }
            Mfhi | Mflo => self.result = self.a,
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Ldc1 | Sb | Sh | Sw | Sd | Sdc1 => {
                self.result = self.a.wrapping_add(self.ops.imm as u64);
            }
            Beq | Bne | Bgez | Bltz | Bc1t | Bc1f | J | Jr => {}
            Jal | Jalr => {}
            AddD | SubD | MulD | DivD => {
                self.fp_arith(ctx)?;
            }
            CEqD | CLtD => {
                self.fp_compare(ctx)?;
            }
            MovD | Dmtc1 | Dmfc1 => self.result = self.a,
            CvtDL => self.result = ((self.a as i64) as f64).to_bits(),
            CvtLD => {
                let f = f64::from_bits(self.a);
                if f.is_nan() || f >= i64::MAX as f64 || f <= i64::MIN as f64 {
                    self.result = i64::MAX as u64;
                    return Self::raise_fp(ctx, FpExceptionKind::InvalidOperation);
                }
                let v = match ctx.fcsr.rounding() {
                    Rounding::Nearest => f.round_ties_even(),
                    Rounding::TowardZero => f.trunc(),
                    Rounding::TowardPlusInfinity => f.ceil(),
                    Rounding::TowardMinusInfinity => f.floor(),
                };
                self.result = (v as i64) as u64;
            }
            Syscall => {
                if self.ops.imm != 0 {
                    return Err(ExceptionCode::Trap(self.ops.imm as u32));
                }
            }
            Nop | Break | Halt => {}
        }
        if ctx.forwarding && !matches!(self.opcode.family(), Family::Load) {
            self.write_back(ctx);
        }
        Ok(())
    }

    /// MEM behavior: perform the load or store at the effective address.
    ///
    /// With forwarding on, a load result lands in the register file here; the
    /// dependent instruction one cycle behind still stalls once, because the
    /// value does not exist before the access completes.
    pub fn stage_mem(&mut self, ctx: &mut ExecContext) -> Result<(), ExceptionCode> {
        use Opcode::*;
        let addr = self.result;
        match self.opcode {
            Lb => self.load_value = sign_extend(ctx.mem.read_byte(addr)?, 8) as u64,
            Lbu => self.load_value = ctx.mem.read_byte(addr)?,
            Lh => self.load_value = sign_extend(ctx.mem.read_half(addr)?, 16) as u64,
            Lhu => self.load_value = ctx.mem.read_half(addr)?,
            Lw => self.load_value = sign_extend(ctx.mem.read_word(addr)?, 32) as u64,
            Lwu => self.load_value = ctx.mem.read_word(addr)?,
            Ld | Ldc1 => self.load_value = ctx.mem.read_double(addr)?,
            Sb => ctx.mem.write_byte(addr, self.b & 0xFF)?,
            Sh => ctx.mem.write_half(addr, self.b & 0xFFFF)?,
            Sw => ctx.mem.write_word(addr, self.b & 0xFFFF_FFFF)?,
            Sd | Sdc1 => ctx.mem.write_double(addr, self.b)?,
            _ => {}
        }
        if ctx.forwarding && matches!(self.opcode.family(), Family::Load) {
            self.write_back(ctx);
        }
        Ok(())
    }

    /// WB behavior: land the result unless forwarding already did.
    pub fn stage_wb(&mut self, ctx: &mut ExecContext) {
        self.write_back(ctx);
    }

    /// Writes the destination register and retires the in-flight writer.
    /// Idempotent: the first call wins, whether it happens at EX, MEM, or WB.
    fn write_back(&mut self, ctx: &mut ExecContext) {
        use Opcode::*;
        if self.wrote_back {
            return;
        }
        self.wrote_back = true;
        match self.opcode {
            Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Sll | Srl | Sra
            | Sllv | Srlv | Srav | Mfhi | Mflo | Dadd | Daddu | Dsub | Dsubu => {
                ctx.gpr.write(self.ops.rd, self.result);
                ctx.gpr.release_writer(self.ops.rd);
            }
            Addi | Addiu | Daddi | Daddiu | Andi | Ori | Xori | Lui | Slti | Sltiu => {
                ctx.gpr.write(self.ops.rt, self.result);
                ctx.gpr.release_writer(self.ops.rt);
            }
            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld => {
                ctx.gpr.write(self.ops.rt, self.load_value);
                ctx.gpr.release_writer(self.ops.rt);
            }
            Ldc1 => {
                ctx.fpr.write(self.ops.rt, self.load_value);
                ctx.fpr.release_writer(self.ops.rt);
            }
            Mult | Multu | Div | Divu => {
                ctx.hi.write(self.result_hi);
                ctx.hi.release_writer();
                ctx.lo.write(self.result);
                ctx.lo.release_writer();
            }
            Jal | Jalr => {
                ctx.gpr.write(self.ops.rd, self.result);
                ctx.gpr.release_writer(self.ops.rd);
            }
            AddD | SubD | MulD | DivD => {
                ctx.fpr.write(self.ops.rd, self.result);
                ctx.fpr.release_writer(self.ops.rd);
                ctx.fpr.release_waw(self.ops.rd);
            }
            MovD | CvtDL | CvtLD | Dmtc1 => {
                ctx.fpr.write(self.ops.rd, self.result);
                ctx.fpr.release_writer(self.ops.rd);
            }
            Dmfc1 => {
                ctx.gpr.write(self.ops.rt, self.result);
                ctx.gpr.release_writer(self.ops.rt);
            }
            Beq | Bne | Bgez | Bltz | Bc1t | Bc1f | J | Jr | Sb | Sh | Sw | Sd | Sdc1
            | CEqD | CLtD | Nop | Break | Syscall | Halt => {}
        }
    }

    /// Raises an FP exception kind: sets cause and flag bits, and returns a
    /// synchronous exception when the kind is enabled in the FCSR.
    fn raise_fp(ctx: &mut ExecContext, kind: FpExceptionKind) -> Result<(), ExceptionCode> {
        ctx.fcsr.set_cause(kind, true);
        ctx.fcsr.set_flag(kind, true);
        if ctx.fcsr.enabled(kind) {
            let code = match kind {
                FpExceptionKind::InvalidOperation => ExceptionCode::FpInvalidOperation,
                FpExceptionKind::DivideByZero => ExceptionCode::FpDivideByZero,
                FpExceptionKind::Overflow => ExceptionCode::FpOverflow,
                FpExceptionKind::Underflow => ExceptionCode::FpUnderflow,
                FpExceptionKind::Inexact => return Ok(()),
            };
            return Err(code);
        }
        Ok(())
    }

    /// Double-precision add/sub/mul/div with IEEE default results and FCSR
    /// exception handling.
    fn fp_arith(&mut self, ctx: &mut ExecContext) -> Result<(), ExceptionCode> {
        use Opcode::*;
        let fa = f64::from_bits(self.a);
        let fb = f64::from_bits(self.b);
        for kind in [
            FpExceptionKind::InvalidOperation,
            FpExceptionKind::DivideByZero,
            FpExceptionKind::Overflow,
            FpExceptionKind::Underflow,
        ] {
            ctx.fcsr.set_cause(kind, false);
        }

        let invalid = match self.opcode {
            DivD => fa == 0.0 && fb == 0.0,
            MulD => (fa == 0.0 && fb.is_infinite()) || (fa.is_infinite() && fb == 0.0),
            AddD => fa.is_infinite() && fb.is_infinite() && fa.signum() != fb.signum(),
            SubD => fa.is_infinite() && fb.is_infinite() && fa.signum() == fb.signum(),
            _ => false,
        };
        if invalid {
            self.result = f64::NAN.to_bits();
            return Self::raise_fp(ctx, FpExceptionKind::InvalidOperation);
        }

        if self.opcode == DivD && fb == 0.0 && fa.is_finite() && fa != 0.0 {
            self.result = (fa / fb).to_bits();
            return Self::raise_fp(ctx, FpExceptionKind::DivideByZero);
        }

        let raw = match self.opcode {
            AddD => fa + fb,
            SubD => fa - fb,
            MulD => fa * fb,
            _ => fa / fb,
        };
        self.result = raw.to_bits();

        if raw.is_infinite() && fa.is_finite() && fb.is_finite() {
            return Self::raise_fp(ctx, FpExceptionKind::Overflow);
        }
        if raw.is_subnormal() {
            return Self::raise_fp(ctx, FpExceptionKind::Underflow);
        }
        Ok(())
    }

    /// Double-precision compare writing an FCSR condition code.
    ///
    /// `c.lt.d` is a signaling comparison: an unordered operand raises invalid
    /// operation. `c.eq.d` is quiet and simply yields false on NaN.
    fn fp_compare(&mut self, ctx: &mut ExecContext) -> Result<(), ExceptionCode> {
        let fa = f64::from_bits(self.a);
        let fb = f64::from_bits(self.b);
        let cc = self.ops.imm as usize;
        if fa.is_nan() || fb.is_nan() {
            ctx.fcsr.set_condition_code(cc, false);
            if self.opcode == Opcode::CLtD {
                return Self::raise_fp(ctx, FpExceptionKind::InvalidOperation);
            }
            return Ok(());
        }
        let cond = match self.opcode {
            Opcode::CEqD => fa == fb,
            _ => fa < fb,
        };
        ctx.fcsr.set_condition_code(cc, cond);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct State {
        gpr: Gpr,
        fpr: Fpr,
        fcsr: Fcsr,
        hi: Reg64,
        lo: Reg64,
        pc: u64,
        mem: Memory,
    }

    impl State {
        fn new() -> Self {
            Self {
                gpr: Gpr::new(),
                fpr: Fpr::new(),
                fcsr: Fcsr::new(),
                hi: Reg64::default(),
                lo: Reg64::default(),
                pc: 0,
                mem: Memory::new(),
            }
        }

        fn ctx(&mut self, forwarding: bool) -> ExecContext<'_> {
            ExecContext {
                gpr: &mut self.gpr,
                fpr: &mut self.fpr,
                fcsr: &mut self.fcsr,
                hi: &mut self.hi,
                lo: &mut self.lo,
                pc: &mut self.pc,
                mem: &mut self.mem,
                forwarding,
            }
        }
    }

    fn run_alu(state: &mut State, opcode: Opcode, ops: Operands) -> Instruction {
        let mut instr = Instruction::new(opcode, ops);
        let mut ctx = state.ctx(false);
        assert_eq!(instr.stage_id(&mut ctx), IdAction::Proceed);
        instr.stage_ex(&mut ctx).unwrap();
        instr.stage_mem(&mut ctx).unwrap();
        instr.stage_wb(&mut ctx);
        instr
    }

    #[test]
    fn test_add_sign_extends_32_bits() {
        let mut state = State::new();
        state.gpr.write(1, 0x7FFF_FFFF);
        state.gpr.write(2, 1);
        let mut instr = Instruction::new(
            Opcode::Addu,
            Operands {
                rd: 3,
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        instr.stage_id(&mut ctx);
        instr.stage_ex(&mut ctx).unwrap();
        instr.stage_wb(&mut ctx);
        assert_eq!(state.gpr.read(3), 0xFFFF_FFFF_8000_0000);
    }

    #[test]
    fn test_add_overflow_raises() {
        let mut state = State::new();
        state.gpr.write(1, 0x7FFF_FFFF);
        state.gpr.write(2, 1);
        let mut instr = Instruction::new(
            Opcode::Add,
            Operands {
                rd: 3,
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        instr.stage_id(&mut ctx);
        assert_eq!(
            instr.stage_ex(&mut ctx),
            Err(ExceptionCode::IntegerOverflow)
        );
    }

    #[test]
    fn test_raw_detection_without_side_effects() {
        let mut state = State::new();
        state.gpr.add_writer(1);
        let mut instr = Instruction::new(
            Opcode::Add,
            Operands {
                rd: 3,
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        assert_eq!(instr.stage_id(&mut ctx), IdAction::Raw);
        // The stalled instruction must not have registered its destination.
        assert!(!state.gpr.busy(3));
    }

    #[test]
    fn test_mult_div_through_hi_lo() {
        let mut state = State::new();
        state.gpr.write(1, 7);
        state.gpr.write(2, 3);
        run_alu(
            &mut state,
            Opcode::Div,
            Operands {
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        assert_eq!(state.lo.read(), 2);
        assert_eq!(state.hi.read(), 1);
        run_alu(
            &mut state,
            Opcode::Mult,
            Operands {
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        assert_eq!(state.lo.read(), 21);
        assert_eq!(state.hi.read(), 0);
    }

    #[test]
    fn test_division_by_zero() {
        let mut state = State::new();
        state.gpr.write(1, 5);
        let mut instr = Instruction::new(
            Opcode::Div,
            Operands {
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        instr.stage_id(&mut ctx);
        assert_eq!(instr.stage_ex(&mut ctx), Err(ExceptionCode::DivisionByZero));
    }

    #[test]
    fn test_load_store_roundtrip() {
        let mut state = State::new();
        state.gpr.write(1, 0x1122_3344_5566_7788);
        run_alu(
            &mut state,
            Opcode::Sd,
            Operands {
                rt: 1,
                rs: 0,
                imm: 16,
                ..Default::default()
            },
        );
        run_alu(
            &mut state,
            Opcode::Ld,
            Operands {
                rt: 2,
                rs: 0,
                imm: 16,
                ..Default::default()
            },
        );
        assert_eq!(state.gpr.read(2), 0x1122_3344_5566_7788);
        run_alu(
            &mut state,
            Opcode::Lb,
            Operands {
                rt: 3,
                rs: 0,
                imm: 16,
                ..Default::default()
            },
        );
        assert_eq!(state.gpr.read(3), 0x11);
    }

    #[test]
    fn test_taken_branch_jumps() {
        let mut state = State::new();
        state.gpr.write(1, 5);
        state.gpr.write(2, 5);
        let mut instr = Instruction::new(
            Opcode::Beq,
            Operands {
                rs: 1,
                rt: 2,
                target: 64,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        assert_eq!(instr.stage_id(&mut ctx), IdAction::Jump);
        assert_eq!(state.pc, 64);
    }

    #[test]
    fn test_untaken_branch_proceeds() {
        let mut state = State::new();
        state.gpr.write(1, 5);
        let mut instr = Instruction::new(
            Opcode::Beq,
            Operands {
                rs: 1,
                rt: 2,
                target: 64,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        assert_eq!(instr.stage_id(&mut ctx), IdAction::Proceed);
        assert_eq!(state.pc, 0);
    }

    #[test]
    fn test_forwarding_writes_at_ex() {
        let mut state = State::new();
        state.gpr.write(1, 2);
        state.gpr.write(2, 3);
        let mut instr = Instruction::new(
            Opcode::Add,
            Operands {
                rd: 3,
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(true);
        instr.stage_id(&mut ctx);
        instr.stage_ex(&mut ctx).unwrap();
        assert_eq!(state.gpr.read(3), 5);
        assert!(!state.gpr.busy(3));
        // The later WB must not double-release.
        let mut ctx = state.ctx(true);
        instr.stage_wb(&mut ctx);
        assert!(!state.gpr.busy(3));
    }

    #[test]
    fn test_fp_divide_by_zero_disabled_gives_infinity() {
        let mut state = State::new();
        state.fpr.write_double(0, 1.0);
        state.fpr.write_double(1, 0.0);
        let mut instr = Instruction::new(
            Opcode::DivD,
            Operands {
                rd: 2,
                rs: 0,
                rt: 1,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        instr.stage_id(&mut ctx);
        assert_eq!(instr.stage_ex(&mut ctx), Ok(()));
        instr.stage_wb(&mut ctx);
        assert!(state.fpr.read_double(2).is_infinite());
        assert!(state.fcsr.flag(FpExceptionKind::DivideByZero));
    }

    #[test]
    fn test_fp_divide_by_zero_enabled_raises() {
        let mut state = State::new();
        state.fcsr.set_enabled(FpExceptionKind::DivideByZero, true);
        state.fpr.write_double(0, 1.0);
        state.fpr.write_double(1, 0.0);
        let mut instr = Instruction::new(
            Opcode::DivD,
            Operands {
                rd: 2,
                rs: 0,
                rt: 1,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        instr.stage_id(&mut ctx);
        assert_eq!(
            instr.stage_ex(&mut ctx),
            Err(ExceptionCode::FpDivideByZero)
        );
    }

    #[test]
    fn test_fp_compare_sets_condition_code() {
        let mut state = State::new();
        state.fpr.write_double(0, 1.5);
        state.fpr.write_double(1, 2.5);
        let mut instr = Instruction::new(
            Opcode::CLtD,
            Operands {
                imm: 3,
                rs: 0,
                rt: 1,
                ..Default::default()
            },
        );
        let mut ctx = state.ctx(false);
        instr.stage_id(&mut ctx);
        instr.stage_ex(&mut ctx).unwrap();
        assert!(state.fcsr.condition_code(3));
    }

    #[test]
    fn test_terminating_encodings() {
        assert!(Instruction::new(Opcode::Halt, Operands::default()).is_terminating());
        assert!(Instruction::new(Opcode::Syscall, Operands::default()).is_terminating());
        assert!(!Instruction::new(
            Opcode::Syscall,
            Operands {
                imm: 5,
                ..Default::default()
            }
        )
        .is_terminating());
        assert!(!Instruction::new(Opcode::Nop, Operands::default()).is_terminating());
    }
}
