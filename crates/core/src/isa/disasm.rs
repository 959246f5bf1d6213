//! Disassembly back to parseable assembly text.
//!
//! The output uses numeric branch targets and memory offsets, so feeding a
//! disassembled program back through the parser reproduces the same encodings.

use crate::isa::{Instruction, Opcode};

/// Formats an instruction as one line of assembly.
pub fn disasm(instr: &Instruction) -> String {
    use Opcode::*;
    let ops = instr.ops();
    let name = instr.name();
    match instr.opcode() {
        Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Dadd | Daddu | Dsub
        | Dsubu => format!("{} r{}, r{}, r{}", name, ops.rd, ops.rs, ops.rt),
        Sllv | Srlv | Srav => format!("{} r{}, r{}, r{}", name, ops.rd, ops.rt, ops.rs),
        Sll | Srl | Sra => format!("{} r{}, r{}, {}", name, ops.rd, ops.rt, ops.imm),
        Mult | Multu | Div | Divu => format!("{} r{}, r{}", name, ops.rs, ops.rt),
        Mfhi | Mflo => format!("{} r{}", name, ops.rd),
        Addi | Addiu | Daddi | Daddiu | Andi | Ori | Xori | Slti | Sltiu => {
            format!("{} r{}, r{}, {}", name, ops.rt, ops.rs, ops.imm)
        }
        Lui => format!("{} r{}, {}", name, ops.rt, ops.imm),
        Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Sb | Sh | Sw | Sd => {
            format!("{} r{}, {}(r{})", name, ops.rt, ops.imm, ops.rs)
        }
        Ldc1 | Sdc1 => format!("{} f{}, {}(r{})", name, ops.rt, ops.imm, ops.rs),
        Beq | Bne => format!("{} r{}, r{}, {}", name, ops.rs, ops.rt, ops.target),
        Bgez | Bltz => format!("{} r{}, {}", name, ops.rs, ops.target),
        J | Jal => format!("{} {}", name, ops.target),
        Jr | Jalr => format!("{} r{}", name, ops.rs),
        Bc1t | Bc1f => format!("{} {}, {}", name, ops.imm, ops.target),
        AddD | SubD | MulD | DivD => {
            format!("{} f{}, f{}, f{}", name, ops.rd, ops.rs, ops.rt)
        }
        CEqD | CLtD => format!("{} {}, f{}, f{}", name, ops.imm, ops.rs, ops.rt),
        MovD | CvtDL | CvtLD => format!("{} f{}, f{}", name, ops.rd, ops.rs),
        Dmtc1 | Dmfc1 => {
            let fpr = if instr.opcode() == Dmtc1 {
                ops.rd
            } else {
                ops.rs
            };
            format!("{} r{}, f{}", name, ops.rt, fpr)
        }
        Syscall => format!("{} {}", name, ops.imm),
        Nop | Break | Halt => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Operands;

    #[test]
    fn test_disasm_formats() {
        let instr = Instruction::new(
            Opcode::Add,
            Operands {
                rd: 3,
                rs: 1,
                rt: 2,
                ..Default::default()
            },
        );
        assert_eq!(disasm(&instr), "add r3, r1, r2");

        let instr = Instruction::new(
            Opcode::Ld,
            Operands {
                rt: 1,
                rs: 0,
                imm: 8,
                ..Default::default()
            },
        );
        assert_eq!(disasm(&instr), "ld r1, 8(r0)");

        let instr = Instruction::new(
            Opcode::AddD,
            Operands {
                rd: 2,
                rs: 0,
                rt: 1,
                ..Default::default()
            },
        );
        assert_eq!(disasm(&instr), "add.d f2, f0, f1");

        let instr = Instruction::new(Opcode::Halt, Operands::default());
        assert_eq!(disasm(&instr), "halt");
    }
}
