//! 32-bit instruction packing and unpacking.
//!
//! `pack` produces the MIPS64 encoding of a decoded instruction from its
//! operands; `decode` reverses it. The two compose: for every instruction the
//! parser accepts, `decode(pack(i))` yields an equivalent instruction.
//!
//! Field layouts:
//! - R-type: `op(6) rs(5) rt(5) rd(5) shamt(5) funct(6)`
//! - I-type: `op(6) rs(5) rt(5) imm(16)`
//! - J-type: `op(6) target(26)`
//! - COP1:   `op(6) fmt(5) ft(5) fs(5) fd(5) funct(6)`

use std::fmt;

use crate::common::bits::{fits_signed, fits_unsigned};
use crate::isa::{Instruction, Opcode, Operands};

/// `halt` encoding.
pub const HALT_ENCODING: u32 = 0x0400_0000;

/// `syscall 0` encoding.
pub const SYSCALL0_ENCODING: u32 = 0x0000_000C;

const OP_SPECIAL: u32 = 0x00;
const OP_REGIMM: u32 = 0x01;
const OP_COP1: u32 = 0x11;

const FMT_D: u32 = 0x11;
const FMT_L: u32 = 0x15;
const FMT_BC: u32 = 0x08;
const FMT_DMFC1: u32 = 0x01;
const FMT_DMTC1: u32 = 0x05;

/// Packing failures, surfaced as per-instruction parse errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackError {
    /// Branch target unreachable with a 16-bit word offset.
    BranchTargetOutOfRange(u32),
    /// Immediate or resolved offset does not fit its field.
    ValueOutOfRange {
        /// The offending value.
        value: i64,
        /// Width of the destination field.
        bits: u32,
    },
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackError::BranchTargetOutOfRange(target) => {
                write!(f, "branch target {:#x} out of range", target)
            }
            PackError::ValueOutOfRange { value, bits } => {
                write!(f, "value {} does not fit in {} bits", value, bits)
            }
        }
    }
}

fn r_type(rs: u32, rt: u32, rd: u32, shamt: u32, funct: u32) -> u32 {
    (rs << 21) | (rt << 16) | (rd << 11) | (shamt << 6) | funct
}

fn i_type(op: u32, rs: u32, rt: u32, imm: u32) -> u32 {
    (op << 26) | (rs << 21) | (rt << 16) | (imm & 0xFFFF)
}

fn cop1(fmt: u32, ft: u32, fs: u32, fd: u32, funct: u32) -> u32 {
    (OP_COP1 << 26) | (fmt << 21) | (ft << 16) | (fs << 11) | (fd << 6) | funct
}

fn signed_imm(value: i64) -> Result<u32, PackError> {
    if !fits_signed(value, 16) {
        return Err(PackError::ValueOutOfRange { value, bits: 16 });
    }
    Ok(value as u32 & 0xFFFF)
}

fn unsigned_imm(value: i64) -> Result<u32, PackError> {
    if !fits_unsigned(value, 16) {
        return Err(PackError::ValueOutOfRange { value, bits: 16 });
    }
    Ok(value as u32)
}

fn branch_offset(address: u32, target: u32) -> Result<u32, PackError> {
    let rel = (target as i64 - (address as i64 + 4)) >> 2;
    if !fits_signed(rel, 16) {
        return Err(PackError::BranchTargetOutOfRange(target));
    }
    Ok(rel as u32 & 0xFFFF)
}

/// Packs an instruction into its 32-bit encoding.
///
/// The instruction's address must already be set: branch offsets are
/// PC-relative.
pub fn pack(instr: &Instruction) -> Result<u32, PackError> {
    use Opcode::*;
    let ops = instr.ops();
    let (rs, rt, rd) = (ops.rs as u32, ops.rt as u32, ops.rd as u32);
    let word = match instr.opcode() {
        Add => r_type(rs, rt, rd, 0, 0x20),
        Addu => r_type(rs, rt, rd, 0, 0x21),
        Sub => r_type(rs, rt, rd, 0, 0x22),
        Subu => r_type(rs, rt, rd, 0, 0x23),
        And => r_type(rs, rt, rd, 0, 0x24),
        Or => r_type(rs, rt, rd, 0, 0x25),
        Xor => r_type(rs, rt, rd, 0, 0x26),
        Nor => r_type(rs, rt, rd, 0, 0x27),
        Slt => r_type(rs, rt, rd, 0, 0x2A),
        Sltu => r_type(rs, rt, rd, 0, 0x2B),
        Dadd => r_type(rs, rt, rd, 0, 0x2C),
        Daddu => r_type(rs, rt, rd, 0, 0x2D),
        Dsub => r_type(rs, rt, rd, 0, 0x2E),
        Dsubu => r_type(rs, rt, rd, 0, 0x2F),
        Sll => r_type(0, rt, rd, ops.imm as u32 & 0x1F, 0x00),
        Srl => r_type(0, rt, rd, ops.imm as u32 & 0x1F, 0x02),
        Sra => r_type(0, rt, rd, ops.imm as u32 & 0x1F, 0x03),
        Sllv => r_type(rs, rt, rd, 0, 0x04),
        Srlv => r_type(rs, rt, rd, 0, 0x06),
        Srav => r_type(rs, rt, rd, 0, 0x07),
        Jr => r_type(rs, 0, 0, 0, 0x08),
        Jalr => r_type(rs, 0, rd, 0, 0x09),
        Syscall => ((ops.imm as u32 & 0xF_FFFF) << 6) | 0x0C,
        Break => 0x0D,
        Mfhi => r_type(0, 0, rd, 0, 0x10),
        Mflo => r_type(0, 0, rd, 0, 0x12),
        Mult => r_type(rs, rt, 0, 0, 0x18),
        Multu => r_type(rs, rt, 0, 0, 0x19),
        Div => r_type(rs, rt, 0, 0, 0x1A),
        Divu => r_type(rs, rt, 0, 0, 0x1B),
        Addi => i_type(0x08, rs, rt, signed_imm(ops.imm)?),
        Addiu => i_type(0x09, rs, rt, signed_imm(ops.imm)?),
        Slti => i_type(0x0A, rs, rt, signed_imm(ops.imm)?),
        Sltiu => i_type(0x0B, rs, rt, signed_imm(ops.imm)?),
        Andi => i_type(0x0C, rs, rt, unsigned_imm(ops.imm)?),
        Ori => i_type(0x0D, rs, rt, unsigned_imm(ops.imm)?),
        Xori => i_type(0x0E, rs, rt, unsigned_imm(ops.imm)?),
        Lui => i_type(0x0F, 0, rt, unsigned_imm(ops.imm)?),
        Daddi => i_type(0x18, rs, rt, signed_imm(ops.imm)?),
        Daddiu => i_type(0x19, rs, rt, signed_imm(ops.imm)?),
        Lb => i_type(0x20, rs, rt, signed_imm(ops.imm)?),
        Lh => i_type(0x21, rs, rt, signed_imm(ops.imm)?),
        Lw => i_type(0x23, rs, rt, signed_imm(ops.imm)?),
        Lbu => i_type(0x24, rs, rt, signed_imm(ops.imm)?),
        Lhu => i_type(0x25, rs, rt, signed_imm(ops.imm)?),
        Lwu => i_type(0x27, rs, rt, signed_imm(ops.imm)?),
        Ld => i_type(0x37, rs, rt, signed_imm(ops.imm)?),
        Sb => i_type(0x28, rs, rt, signed_imm(ops.imm)?),
        Sh => i_type(0x29, rs, rt, signed_imm(ops.imm)?),
        Sw => i_type(0x2B, rs, rt, signed_imm(ops.imm)?),
        Sd => i_type(0x3F, rs, rt, signed_imm(ops.imm)?),
        Ldc1 => i_type(0x35, rs, rt, signed_imm(ops.imm)?),
        Sdc1 => i_type(0x3D, rs, rt, signed_imm(ops.imm)?),
        Beq => i_type(0x04, rs, rt, branch_offset(instr.address(), ops.target)?),
        Bne => i_type(0x05, rs, rt, branch_offset(instr.address(), ops.target)?),
        Bltz => i_type(OP_REGIMM, rs, 0x00, branch_offset(instr.address(), ops.target)?),
        Bgez => i_type(OP_REGIMM, rs, 0x01, branch_offset(instr.address(), ops.target)?),
        J => (0x02 << 26) | ((ops.target >> 2) & 0x03FF_FFFF),
        Jal => (0x03 << 26) | ((ops.target >> 2) & 0x03FF_FFFF),
        Bc1t => {
            let flags = ((ops.imm as u32 & 0x7) << 2) | 1;
            i_type(OP_COP1, FMT_BC, flags, branch_offset(instr.address(), ops.target)?)
        }
        Bc1f => {
            let flags = (ops.imm as u32 & 0x7) << 2;
            i_type(OP_COP1, FMT_BC, flags, branch_offset(instr.address(), ops.target)?)
        }
        AddD => cop1(FMT_D, rt, rs, rd, 0x00),
        SubD => cop1(FMT_D, rt, rs, rd, 0x01),
        MulD => cop1(FMT_D, rt, rs, rd, 0x02),
        DivD => cop1(FMT_D, rt, rs, rd, 0x03),
        MovD => cop1(FMT_D, 0, rs, rd, 0x06),
        CvtLD => cop1(FMT_D, 0, rs, rd, 0x25),
        CvtDL => cop1(FMT_L, 0, rs, rd, 0x21),
        CEqD => cop1(FMT_D, rt, rs, (ops.imm as u32 & 0x7) << 2, 0x32),
        CLtD => cop1(FMT_D, rt, rs, (ops.imm as u32 & 0x7) << 2, 0x3C),
        Dmtc1 => cop1(FMT_DMTC1, rt, rd, 0, 0x00),
        Dmfc1 => cop1(FMT_DMFC1, rt, rs, 0, 0x00),
        Nop => 0x0000_0000,
        Halt => HALT_ENCODING,
    };
    Ok(word)
}

/// Decodes a 32-bit encoding at a code address back into an instruction.
///
/// Returns `None` for encodings outside the supported subset.
pub fn decode(word: u32, address: u32) -> Option<Instruction> {
    use crate::common::bits::{field, sign_extend};
    use Opcode::*;

    // Exact matches first: all-zero is the canonical nop, and the halt
    // encoding overlaps REGIMM.
    let (opcode, ops) = if word == 0 {
        (Nop, Operands::default())
    } else if word == HALT_ENCODING {
        (Halt, Operands::default())
    } else {
        let op = field(word, 26, 6);
        let rs = field(word, 21, 5) as usize;
        let rt = field(word, 16, 5) as usize;
        let rd = field(word, 11, 5) as usize;
        let shamt = field(word, 6, 5) as i64;
        let funct = field(word, 0, 6);
        let imm = sign_extend(field(word, 0, 16) as u64, 16);
        let uimm = field(word, 0, 16) as i64;
        let branch_target = (address as i64 + 4 + (imm << 2)) as u32;

        match op {
            OP_SPECIAL => {
                let opcode = match funct {
                    0x00 => Sll,
                    0x02 => Srl,
                    0x03 => Sra,
                    0x04 => Sllv,
                    0x06 => Srlv,
                    0x07 => Srav,
                    0x08 => Jr,
                    0x09 => Jalr,
                    0x0C => Syscall,
                    0x0D => Break,
                    0x10 => Mfhi,
                    0x12 => Mflo,
                    0x18 => Mult,
                    0x19 => Multu,
                    0x1A => Div,
                    0x1B => Divu,
                    0x20 => Add,
                    0x21 => Addu,
                    0x22 => Sub,
                    0x23 => Subu,
                    0x24 => And,
                    0x25 => Or,
                    0x26 => Xor,
                    0x27 => Nor,
                    0x2A => Slt,
                    0x2B => Sltu,
                    0x2C => Dadd,
                    0x2D => Daddu,
                    0x2E => Dsub,
                    0x2F => Dsubu,
                    _ => return None,
                };
                let ops = match opcode {
                    Sll | Srl | Sra => Operands {
                        rt,
                        rd,
                        imm: shamt,
                        ..Default::default()
                    },
                    Syscall => Operands {
                        imm: field(word, 6, 20) as i64,
                        ..Default::default()
                    },
                    Break => Operands::default(),
                    Jr => Operands {
                        rs,
                        ..Default::default()
                    },
                    Jalr => Operands {
                        rs,
                        rd,
                        ..Default::default()
                    },
                    Mfhi | Mflo => Operands {
                        rd,
                        ..Default::default()
                    },
                    Mult | Multu | Div | Divu => Operands {
                        rs,
                        rt,
                        ..Default::default()
                    },
                    _ => Operands {
                        rs,
                        rt,
                        rd,
                        ..Default::default()
                    },
                };
                (opcode, ops)
            }
            OP_REGIMM => {
                let opcode = match rt {
                    0x00 => Bltz,
                    0x01 => Bgez,
                    _ => return None,
                };
                (
                    opcode,
                    Operands {
                        rs,
                        target: branch_target,
                        ..Default::default()
                    },
                )
            }
            0x02 | 0x03 => {
                let target = (word & 0x03FF_FFFF) << 2;
                let opcode = if op == 0x02 { J } else { Jal };
                let ops = Operands {
                    rd: if op == 0x03 { 31 } else { 0 },
                    target,
                    ..Default::default()
                };
                (opcode, ops)
            }
            0x04 | 0x05 => (
                if op == 0x04 { Beq } else { Bne },
                Operands {
                    rs,
                    rt,
                    target: branch_target,
                    ..Default::default()
                },
            ),
            0x08 | 0x09 | 0x0A | 0x0B | 0x18 | 0x19 => {
                let opcode = match op {
                    0x08 => Addi,
                    0x09 => Addiu,
                    0x0A => Slti,
                    0x0B => Sltiu,
                    0x18 => Daddi,
                    _ => Daddiu,
                };
                (
                    opcode,
                    Operands {
                        rs,
                        rt,
                        imm,
                        ..Default::default()
                    },
                )
            }
            0x0C | 0x0D | 0x0E => {
                let opcode = match op {
                    0x0C => Andi,
                    0x0D => Ori,
                    _ => Xori,
                };
                (
                    opcode,
                    Operands {
                        rs,
                        rt,
                        imm: uimm,
                        ..Default::default()
                    },
                )
            }
            0x0F => (
                Lui,
                Operands {
                    rt,
                    imm: uimm,
                    ..Default::default()
                },
            ),
            0x20 | 0x21 | 0x23 | 0x24 | 0x25 | 0x27 | 0x37 | 0x28 | 0x29 | 0x2B | 0x3F
            | 0x35 | 0x3D => {
                let opcode = match op {
                    0x20 => Lb,
                    0x21 => Lh,
                    0x23 => Lw,
                    0x24 => Lbu,
                    0x25 => Lhu,
                    0x27 => Lwu,
                    0x37 => Ld,
                    0x28 => Sb,
                    0x29 => Sh,
                    0x2B => Sw,
                    0x3F => Sd,
                    0x35 => Ldc1,
                    _ => Sdc1,
                };
                (
                    opcode,
                    Operands {
                        rs,
                        rt,
                        imm,
                        ..Default::default()
                    },
                )
            }
            OP_COP1 => {
                let fmt = rs as u32;
                match fmt {
                    FMT_DMFC1 => (
                        Dmfc1,
                        Operands {
                            rt,
                            rs: rd,
                            ..Default::default()
                        },
                    ),
                    FMT_DMTC1 => (
                        Dmtc1,
                        Operands {
                            rt,
                            rd,
                            ..Default::default()
                        },
                    ),
                    FMT_BC => {
                        let opcode = if rt & 1 == 1 { Bc1t } else { Bc1f };
                        (
                            opcode,
                            Operands {
                                imm: (rt >> 2) as i64,
                                target: branch_target,
                                ..Default::default()
                            },
                        )
                    }
                    FMT_D => {
                        let (ft, fs, fd) = (rt, rd, shamt as usize);
                        let opcode = match funct {
                            0x00 => AddD,
                            0x01 => SubD,
                            0x02 => MulD,
                            0x03 => DivD,
                            0x06 => MovD,
                            0x25 => CvtLD,
                            0x32 => CEqD,
                            0x3C => CLtD,
                            _ => return None,
                        };
                        let ops = match opcode {
                            CEqD | CLtD => Operands {
                                rs: fs,
                                rt: ft,
                                imm: (fd >> 2) as i64,
                                ..Default::default()
                            },
                            MovD | CvtLD => Operands {
                                rs: fs,
                                rd: fd,
                                ..Default::default()
                            },
                            _ => Operands {
                                rs: fs,
                                rt: ft,
                                rd: fd,
                                ..Default::default()
                            },
                        };
                        (opcode, ops)
                    }
                    FMT_L => {
                        if funct != 0x21 {
                            return None;
                        }
                        (
                            CvtDL,
                            Operands {
                                rs: rd,
                                rd: shamt as usize,
                                ..Default::default()
                            },
                        )
                    }
                    _ => return None,
                }
            }
            _ => return None,
        }
    };

    let mut instr = Instruction::new(opcode, ops);
    instr.set_address(address);
    instr.set_encoding(word);
    Some(instr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(opcode: Opcode, ops: Operands, address: u32) {
        let mut instr = Instruction::new(opcode, ops);
        instr.set_address(address);
        let word = pack(&instr).unwrap();
        let back = decode(word, address).unwrap();
        assert_eq!(back.opcode(), opcode, "opcode for {}", opcode.name());
        assert_eq!(back.ops(), &ops, "operands for {}", opcode.name());
    }

    #[test]
    fn test_rtype_roundtrip() {
        roundtrip(
            Opcode::Add,
            Operands {
                rd: 3,
                rs: 1,
                rt: 2,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::Sll,
            Operands {
                rd: 4,
                rt: 5,
                imm: 13,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::Mult,
            Operands {
                rs: 6,
                rt: 7,
                ..Default::default()
            },
            0,
        );
    }

    #[test]
    fn test_itype_roundtrip() {
        roundtrip(
            Opcode::Addi,
            Operands {
                rt: 1,
                rs: 0,
                imm: -42,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::Ori,
            Operands {
                rt: 2,
                rs: 3,
                imm: 0xBEEF,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::Ld,
            Operands {
                rt: 8,
                rs: 9,
                imm: 256,
                ..Default::default()
            },
            0,
        );
    }

    #[test]
    fn test_branch_roundtrip() {
        roundtrip(
            Opcode::Beq,
            Operands {
                rs: 1,
                rt: 2,
                target: 64,
                ..Default::default()
            },
            16,
        );
        roundtrip(
            Opcode::Bltz,
            Operands {
                rs: 4,
                target: 0,
                ..Default::default()
            },
            32,
        );
        roundtrip(
            Opcode::J,
            Operands {
                target: 128,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::Jal,
            Operands {
                rd: 31,
                target: 128,
                ..Default::default()
            },
            0,
        );
    }

    #[test]
    fn test_cop1_roundtrip() {
        roundtrip(
            Opcode::AddD,
            Operands {
                rd: 2,
                rs: 0,
                rt: 1,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::CEqD,
            Operands {
                imm: 3,
                rs: 4,
                rt: 5,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::Bc1t,
            Operands {
                imm: 2,
                target: 24,
                ..Default::default()
            },
            8,
        );
        roundtrip(
            Opcode::Dmtc1,
            Operands {
                rt: 7,
                rd: 9,
                ..Default::default()
            },
            0,
        );
        roundtrip(
            Opcode::CvtDL,
            Operands {
                rd: 2,
                rs: 4,
                ..Default::default()
            },
            0,
        );
    }

    #[test]
    fn test_terminating_encodings() {
        let halt = Instruction::new(Opcode::Halt, Operands::default());
        assert_eq!(pack(&halt).unwrap(), HALT_ENCODING);
        let syscall = Instruction::new(Opcode::Syscall, Operands::default());
        assert_eq!(pack(&syscall).unwrap(), SYSCALL0_ENCODING);
        assert_eq!(
            decode(HALT_ENCODING, 0).unwrap().opcode(),
            Opcode::Halt
        );
        assert_eq!(
            decode(SYSCALL0_ENCODING, 0).unwrap().opcode(),
            Opcode::Syscall
        );
    }

    #[test]
    fn test_branch_out_of_range() {
        let mut instr = Instruction::new(
            Opcode::Beq,
            Operands {
                rs: 1,
                rt: 2,
                target: 0x0004_0000,
                ..Default::default()
            },
        );
        instr.set_address(0);
        assert!(matches!(
            pack(&instr),
            Err(PackError::BranchTargetOutOfRange(_))
        ));
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        // Opcode 0x07 is unused in the supported subset.
        assert!(decode(0x1C00_0000, 0).is_none());
        // SPECIAL with an unused funct.
        assert!(decode(0x0000_003F, 0).is_none());
    }
}
