//! Two-pass assembly parser.
//!
//! Pass 1 walks the source line by line: `;` starts a comment, `.data` and
//! `.code` (alias `.text`) switch the active section strategy, labels are
//! registered in the symbol table, data directives lay out bytes at naturally
//! aligned addresses, and instructions are validated against their mnemonic's
//! syntax string and queued with their code address.
//!
//! Pass 2 runs once the symbol table is complete: label operands are resolved,
//! every instruction is packed into its 32-bit encoding, and the result is
//! stored into the instruction memory.
//!
//! All errors are accumulated into a [`ParseReport`](errors::ParseReport) and
//! surfaced together; a failed line never aborts the parse.

/// Parse error types and the multi-error report.
pub mod errors;

use crate::isa::{encode, Instruction, Opcode, Operands};
use crate::memory::{Memory, SymbolKind, SymbolTable};
use errors::{ParseError, ParseErrorKind, ParseReport};

/// A successfully assembled program.
#[derive(Debug)]
pub struct Program {
    /// Data memory and instruction store, fully loaded.
    pub memory: Memory,
    /// Labels resolved during the parse.
    pub symbols: SymbolTable,
}

/// Assembles a source file into a loaded [`Program`].
///
/// # Errors
///
/// Returns the accumulated [`ParseReport`](errors::ParseReport) when any line
/// failed to parse, resolve, or pack.
pub fn assemble(source: &str) -> Result<Program, ParseReport> {
    let mut asm = Assembler::new();
    for (i, line) in source.lines().enumerate() {
        asm.line(i + 1, line);
    }
    asm.finish()
}

/// The active section strategy.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    /// Before any directive: only section switches are legal.
    None,
    /// Inside `.data`.
    Data,
    /// Inside `.code`/`.text`.
    Code,
}

/// How an instruction operand uses a label.
enum LabelUse {
    /// Branch or jump target: the label's address replaces the target field.
    Branch,
    /// Memory operand: the label's address is added to the offset.
    Memory,
}

struct LabelRef {
    name: String,
    usage: LabelUse,
    column: usize,
}

/// An instruction awaiting pass 2.
struct PendingInstruction {
    opcode: Opcode,
    ops: Operands,
    label_ref: Option<LabelRef>,
    address: u32,
    line: usize,
    column: usize,
}

/// An operand parsed against one syntax position.
enum ParsedOp {
    Gpr(usize),
    Fpr(usize),
    Imm(i64),
    Target(TargetRef),
    Mem { offset: OffsetRef, base: usize },
}

enum TargetRef {
    Addr(u32),
    Label(String),
}

enum OffsetRef {
    Imm(i64),
    Label(String),
}

/// Data directive payload kinds.
enum DataKind {
    Int { width: u64, min: i64, max: i64 },
    Double,
    Float,
    Ascii { nul: bool },
    Space,
}

struct Assembler {
    memory: Memory,
    symbols: SymbolTable,
    report: ParseReport,
    section: Section,
    data_addr: u64,
    code_addr: u32,
    pending: Vec<PendingInstruction>,
    pending_labels: Vec<(String, usize, usize)>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            memory: Memory::new(),
            symbols: SymbolTable::new(),
            report: ParseReport::new(),
            section: Section::None,
            data_addr: 0,
            code_addr: 0,
            pending: Vec::new(),
            pending_labels: Vec::new(),
        }
    }

    fn error(&mut self, line: usize, column: usize, kind: ParseErrorKind) {
        self.report.push(ParseError::new(kind, line, column));
    }

    fn line(&mut self, line_no: usize, raw: &str) {
        let code = match raw.find(';') {
            Some(i) => &raw[..i],
            None => raw,
        };
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return;
        }
        let col0 = code.len() - code.trim_start().len() + 1;

        let first = trimmed.split_whitespace().next().unwrap_or("");
        let lower = first.to_ascii_lowercase();
        if lower == ".data" || lower == ".code" || lower == ".text" {
            let rest = trimmed[first.len()..].trim();
            if !rest.is_empty() {
                self.error(
                    line_no,
                    col0 + first.len(),
                    ParseErrorKind::TrailingTokens(rest.to_string()),
                );
            }
            self.section = if lower == ".data" {
                Section::Data
            } else {
                Section::Code
            };
            return;
        }

        match self.section {
            Section::None => self.error(line_no, col0, ParseErrorKind::StatementOutsideSection),
            Section::Data => self.data_line(line_no, trimmed, col0),
            Section::Code => self.code_line(line_no, trimmed, col0),
        }
    }

    // ---------------------------------------------------------------- labels

    fn take_labels<'a>(&mut self, line_no: usize, mut text: &'a str, mut col: usize) -> (&'a str, usize) {
        while let Some((label, rest, consumed)) = split_label(text) {
            self.pending_labels.push((label.to_string(), line_no, col));
            text = rest;
            col += consumed;
        }
        (text, col)
    }

    fn flush_labels(&mut self, address: u32, kind: SymbolKind) {
        for (name, line, col) in std::mem::take(&mut self.pending_labels) {
            if let Err(dup) = self.symbols.insert(&name, address, kind, line) {
                self.report.push(ParseError::new(
                    ParseErrorKind::DuplicateLabel {
                        name: dup.name,
                        first_line: dup.first_line,
                    },
                    line,
                    col,
                ));
            }
        }
    }

    // ------------------------------------------------------------------ data

    fn data_line(&mut self, line_no: usize, text: &str, col0: usize) {
        let (text, col) = self.take_labels(line_no, text, col0);
        if text.is_empty() {
            return;
        }

        let word = text.split_whitespace().next().unwrap_or("");
        let rest = text[word.len()..].trim_start();
        let rest_col = col + text.len() - text[word.len()..].trim_start().len();

        let kind = match word.to_ascii_lowercase().as_str() {
            ".byte" => DataKind::Int {
                width: 1,
                min: i8::MIN as i64,
                max: u8::MAX as i64,
            },
            ".word16" => DataKind::Int {
                width: 2,
                min: i16::MIN as i64,
                max: u16::MAX as i64,
            },
            ".word32" => DataKind::Int {
                width: 4,
                min: i32::MIN as i64,
                max: u32::MAX as i64,
            },
            ".word64" | ".word" => DataKind::Int {
                width: 8,
                min: i64::MIN,
                max: i64::MAX,
            },
            ".double" => DataKind::Double,
            ".float" => DataKind::Float,
            ".ascii" => DataKind::Ascii { nul: false },
            ".asciiz" => DataKind::Ascii { nul: true },
            ".space" => DataKind::Space,
            _ => {
                self.error(line_no, col, ParseErrorKind::UnknownDirective(word.to_string()));
                return;
            }
        };

        let alignment = match &kind {
            DataKind::Int { width, .. } => *width,
            DataKind::Double => 8,
            DataKind::Float => 4,
            DataKind::Ascii { .. } | DataKind::Space => 1,
        };
        self.data_addr = self.data_addr.div_ceil(alignment) * alignment;
        self.flush_labels(self.data_addr as u32, SymbolKind::Data);

        let values = split_operands(rest, rest_col);
        if values.is_empty() {
            self.error(
                line_no,
                rest_col,
                ParseErrorKind::InvalidLiteral(String::new()),
            );
            return;
        }

        for (tok, tcol) in values {
            match &kind {
                DataKind::Int { width, min, max } => match parse_int(&tok) {
                    Some(v) if (*min..=*max).contains(&v) => {
                        self.emit_bytes(line_no, tcol, v as u64, *width);
                    }
                    Some(v) => self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::ValueOutOfRange {
                            value: v,
                            bits: (*width * 8) as u32,
                        },
                    ),
                    None => self.error(line_no, tcol, ParseErrorKind::InvalidLiteral(tok)),
                },
                DataKind::Double => match tok.parse::<f64>() {
                    Ok(v) => self.emit_bytes(line_no, tcol, v.to_bits(), 8),
                    Err(_) => self.error(line_no, tcol, ParseErrorKind::InvalidLiteral(tok)),
                },
                DataKind::Float => match tok.parse::<f32>() {
                    Ok(v) => self.emit_bytes(line_no, tcol, v.to_bits() as u64, 4),
                    Err(_) => self.error(line_no, tcol, ParseErrorKind::InvalidLiteral(tok)),
                },
                DataKind::Ascii { nul } => match parse_string(&tok) {
                    Some(bytes) => {
                        for b in bytes {
                            self.emit_bytes(line_no, tcol, b as u64, 1);
                        }
                        if *nul {
                            self.emit_bytes(line_no, tcol, 0, 1);
                        }
                    }
                    None => self.error(line_no, tcol, ParseErrorKind::UnterminatedString),
                },
                DataKind::Space => match parse_int(&tok) {
                    Some(n) if n >= 0 => {
                        let end = self.data_addr + n as u64;
                        if end > self.memory.data_size() {
                            self.error(line_no, tcol, ParseErrorKind::AddressOutOfRange(end));
                        } else {
                            self.data_addr = end;
                        }
                    }
                    _ => self.error(line_no, tcol, ParseErrorKind::InvalidLiteral(tok)),
                },
            }
        }
    }

    /// Writes `width` big-endian bytes at the data cursor and advances it.
    fn emit_bytes(&mut self, line_no: usize, col: usize, value: u64, width: u64) {
        for i in 0..width {
            let shift = (width - 1 - i) * 8;
            let byte = (value >> shift) as u8;
            if self.memory.poke_byte(self.data_addr + i, byte).is_err() {
                self.error(
                    line_no,
                    col,
                    ParseErrorKind::AddressOutOfRange(self.data_addr + i),
                );
                return;
            }
        }
        self.data_addr += width;
    }

    // ------------------------------------------------------------------ code

    fn code_line(&mut self, line_no: usize, text: &str, col0: usize) {
        let (text, col) = self.take_labels(line_no, text, col0);
        self.flush_labels(self.code_addr, SymbolKind::Code);
        if text.is_empty() {
            return;
        }

        let mnemonic = text.split_whitespace().next().unwrap_or("");
        let rest = text[mnemonic.len()..].trim_start();
        let rest_col = col + mnemonic.len() + 1;

        let Some((opcode, syntax, zero_rt)) = mnemonic_spec(&mnemonic.to_ascii_lowercase())
        else {
            self.error(
                line_no,
                col,
                ParseErrorKind::UnknownMnemonic(mnemonic.to_string()),
            );
            return;
        };

        let parts: Vec<&str> = if syntax.is_empty() {
            Vec::new()
        } else {
            syntax.split(',').collect()
        };
        let operand_toks = split_operands(rest, rest_col);
        if operand_toks.len() != parts.len() {
            self.error(
                line_no,
                rest_col,
                ParseErrorKind::WrongOperandCount {
                    expected: parts.len(),
                    found: operand_toks.len(),
                },
            );
            return;
        }

        let mut parsed = Vec::with_capacity(parts.len());
        for (part, (tok, tcol)) in parts.iter().zip(&operand_toks) {
            match self.parse_operand(line_no, part, tok, *tcol) {
                Some(op) => parsed.push(op),
                None => return,
            }
        }

        let Some((ops, label_ref)) = self.assign_operands(line_no, opcode, zero_rt, parsed, &operand_toks)
        else {
            return;
        };

        if (self.code_addr / 4) as usize >= crate::memory::CODE_SLOTS {
            self.error(
                line_no,
                col,
                ParseErrorKind::AddressOutOfRange(self.code_addr as u64),
            );
            return;
        }

        self.pending.push(PendingInstruction {
            opcode,
            ops,
            label_ref,
            address: self.code_addr,
            line: line_no,
            column: col,
        });
        self.code_addr += 4;
    }

    fn parse_operand(
        &mut self,
        line_no: usize,
        part: &str,
        tok: &str,
        tcol: usize,
    ) -> Option<ParsedOp> {
        match part {
            "%R" => match parse_gpr(tok) {
                Some(n) => Some(ParsedOp::Gpr(n)),
                None => {
                    self.error(line_no, tcol, ParseErrorKind::InvalidRegister(tok.to_string()));
                    None
                }
            },
            "%F" => match parse_fpr(tok) {
                Some(n) => Some(ParsedOp::Fpr(n)),
                None => {
                    self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::InvalidFpRegister(tok.to_string()),
                    );
                    None
                }
            },
            "%I" => match parse_int(tok) {
                Some(v) if (-32768..=32767).contains(&v) => Some(ParsedOp::Imm(v)),
                Some(v) => {
                    self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::ValueOutOfRange { value: v, bits: 16 },
                    );
                    None
                }
                None => {
                    self.error(line_no, tcol, ParseErrorKind::InvalidLiteral(tok.to_string()));
                    None
                }
            },
            "%U" => match parse_int(tok) {
                Some(v) if v >= 0 => Some(ParsedOp::Imm(v)),
                Some(v) => {
                    self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::ValueOutOfRange { value: v, bits: 16 },
                    );
                    None
                }
                None => {
                    self.error(line_no, tcol, ParseErrorKind::InvalidLiteral(tok.to_string()));
                    None
                }
            },
            "%B" => {
                if let Some(v) = parse_int(tok) {
                    if v >= 0 {
                        Some(ParsedOp::Target(TargetRef::Addr(v as u32)))
                    } else {
                        self.error(
                            line_no,
                            tcol,
                            ParseErrorKind::ValueOutOfRange { value: v, bits: 32 },
                        );
                        None
                    }
                } else if is_identifier(tok) {
                    Some(ParsedOp::Target(TargetRef::Label(tok.to_string())))
                } else {
                    self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::OperandMismatch {
                            expected: "a label or address",
                            found: tok.to_string(),
                        },
                    );
                    None
                }
            }
            "%L(%R)" => {
                let open = tok.find('(');
                let close = tok.rfind(')');
                let (Some(open), Some(close)) = (open, close) else {
                    self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::OperandMismatch {
                            expected: "offset(base) memory operand",
                            found: tok.to_string(),
                        },
                    );
                    return None;
                };
                if close != tok.len() - 1 || open >= close {
                    self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::OperandMismatch {
                            expected: "offset(base) memory operand",
                            found: tok.to_string(),
                        },
                    );
                    return None;
                }
                let offset_text = tok[..open].trim();
                let base_text = tok[open + 1..close].trim();
                let Some(base) = parse_gpr(base_text) else {
                    self.error(
                        line_no,
                        tcol + open + 1,
                        ParseErrorKind::InvalidRegister(base_text.to_string()),
                    );
                    return None;
                };
                let offset = if offset_text.is_empty() {
                    OffsetRef::Imm(0)
                } else if let Some(v) = parse_int(offset_text) {
                    OffsetRef::Imm(v)
                } else if is_identifier(offset_text) {
                    OffsetRef::Label(offset_text.to_string())
                } else {
                    self.error(
                        line_no,
                        tcol,
                        ParseErrorKind::InvalidLiteral(offset_text.to_string()),
                    );
                    return None;
                };
                Some(ParsedOp::Mem { offset, base })
            }
            _ => None,
        }
    }

    /// Maps syntax-ordered operands into encoding fields, with the per-opcode
    /// extra range checks the generic parse cannot know about.
    fn assign_operands(
        &mut self,
        line_no: usize,
        opcode: Opcode,
        zero_rt: bool,
        parsed: Vec<ParsedOp>,
        toks: &[(String, usize)],
    ) -> Option<(Operands, Option<LabelRef>)> {
        use Opcode::*;
        let mut ops = Operands::default();
        let mut label_ref = None;

        let bind_target = |ops: &mut Operands, label_ref: &mut Option<LabelRef>, t: &ParsedOp, col: usize| {
            if let ParsedOp::Target(target) = t {
                match target {
                    TargetRef::Addr(a) => ops.target = *a,
                    TargetRef::Label(name) => {
                        *label_ref = Some(LabelRef {
                            name: name.clone(),
                            usage: LabelUse::Branch,
                            column: col,
                        })
                    }
                }
            }
        };

        match (opcode, parsed.as_slice()) {
            (
                Add | Addu | Sub | Subu | And | Or | Xor | Nor | Slt | Sltu | Dadd | Daddu
                | Dsub | Dsubu,
                [ParsedOp::Gpr(rd), ParsedOp::Gpr(rs), ParsedOp::Gpr(rt)],
            ) => {
                ops.rd = *rd;
                ops.rs = *rs;
                ops.rt = *rt;
            }
            (Sllv | Srlv | Srav, [ParsedOp::Gpr(rd), ParsedOp::Gpr(rt), ParsedOp::Gpr(rs)]) => {
                ops.rd = *rd;
                ops.rt = *rt;
                ops.rs = *rs;
            }
            (Sll | Srl | Sra, [ParsedOp::Gpr(rd), ParsedOp::Gpr(rt), ParsedOp::Imm(sh)]) => {
                if !(0..=31).contains(sh) {
                    self.error(
                        line_no,
                        toks[2].1,
                        ParseErrorKind::ValueOutOfRange {
                            value: *sh,
                            bits: 5,
                        },
                    );
                    return None;
                }
                ops.rd = *rd;
                ops.rt = *rt;
                ops.imm = *sh;
            }
            (Mult | Multu | Div | Divu, [ParsedOp::Gpr(rs), ParsedOp::Gpr(rt)]) => {
                ops.rs = *rs;
                ops.rt = *rt;
            }
            (Mfhi | Mflo, [ParsedOp::Gpr(rd)]) => ops.rd = *rd,
            (
                Addi | Addiu | Daddi | Daddiu | Slti | Sltiu | Andi | Ori | Xori,
                [ParsedOp::Gpr(rt), ParsedOp::Gpr(rs), ParsedOp::Imm(imm)],
            ) => {
                if matches!(opcode, Andi | Ori | Xori) && *imm > 0xFFFF {
                    self.error(
                        line_no,
                        toks[2].1,
                        ParseErrorKind::ValueOutOfRange {
                            value: *imm,
                            bits: 16,
                        },
                    );
                    return None;
                }
                ops.rt = *rt;
                ops.rs = *rs;
                ops.imm = *imm;
            }
            (Lui, [ParsedOp::Gpr(rt), ParsedOp::Imm(imm)]) => {
                if *imm > 0xFFFF {
                    self.error(
                        line_no,
                        toks[1].1,
                        ParseErrorKind::ValueOutOfRange {
                            value: *imm,
                            bits: 16,
                        },
                    );
                    return None;
                }
                ops.rt = *rt;
                ops.imm = *imm;
            }
            (
                Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Sb | Sh | Sw | Sd,
                [ParsedOp::Gpr(rt), ParsedOp::Mem { offset, base }],
            ) => {
                ops.rt = *rt;
                ops.rs = *base;
                match offset {
                    OffsetRef::Imm(v) => ops.imm = *v,
                    OffsetRef::Label(name) => {
                        label_ref = Some(LabelRef {
                            name: name.clone(),
                            usage: LabelUse::Memory,
                            column: toks[1].1,
                        })
                    }
                }
            }
            (Ldc1 | Sdc1, [ParsedOp::Fpr(ft), ParsedOp::Mem { offset, base }]) => {
                ops.rt = *ft;
                ops.rs = *base;
                match offset {
                    OffsetRef::Imm(v) => ops.imm = *v,
                    OffsetRef::Label(name) => {
                        label_ref = Some(LabelRef {
                            name: name.clone(),
                            usage: LabelUse::Memory,
                            column: toks[1].1,
                        })
                    }
                }
            }
            (Beq | Bne, [ParsedOp::Gpr(rs), ParsedOp::Gpr(rt), target @ ParsedOp::Target(_)]) => {
                ops.rs = *rs;
                ops.rt = *rt;
                bind_target(&mut ops, &mut label_ref, target, toks[2].1);
            }
            (Beq | Bne, [ParsedOp::Gpr(rs), target @ ParsedOp::Target(_)]) if zero_rt => {
                ops.rs = *rs;
                ops.rt = 0;
                bind_target(&mut ops, &mut label_ref, target, toks[1].1);
            }
            (Bgez | Bltz, [ParsedOp::Gpr(rs), target @ ParsedOp::Target(_)]) => {
                ops.rs = *rs;
                bind_target(&mut ops, &mut label_ref, target, toks[1].1);
            }
            (J, [target @ ParsedOp::Target(_)]) => {
                bind_target(&mut ops, &mut label_ref, target, toks[0].1);
            }
            (Jal, [target @ ParsedOp::Target(_)]) => {
                ops.rd = 31;
                bind_target(&mut ops, &mut label_ref, target, toks[0].1);
            }
            (Jr, [ParsedOp::Gpr(rs)]) => ops.rs = *rs,
            (Jalr, [ParsedOp::Gpr(rs)]) => {
                ops.rs = *rs;
                ops.rd = 31;
            }
            (Bc1t | Bc1f, [ParsedOp::Imm(cc), target @ ParsedOp::Target(_)]) => {
                if !(0..=7).contains(cc) {
                    self.error(
                        line_no,
                        toks[0].1,
                        ParseErrorKind::ValueOutOfRange {
                            value: *cc,
                            bits: 3,
                        },
                    );
                    return None;
                }
                ops.imm = *cc;
                bind_target(&mut ops, &mut label_ref, target, toks[1].1);
            }
            (
                AddD | SubD | MulD | DivD,
                [ParsedOp::Fpr(fd), ParsedOp::Fpr(fs), ParsedOp::Fpr(ft)],
            ) => {
                ops.rd = *fd;
                ops.rs = *fs;
                ops.rt = *ft;
            }
            (CEqD | CLtD, [ParsedOp::Imm(cc), ParsedOp::Fpr(fs), ParsedOp::Fpr(ft)]) => {
                if !(0..=7).contains(cc) {
                    self.error(
                        line_no,
                        toks[0].1,
                        ParseErrorKind::ValueOutOfRange {
                            value: *cc,
                            bits: 3,
                        },
                    );
                    return None;
                }
                ops.imm = *cc;
                ops.rs = *fs;
                ops.rt = *ft;
            }
            (MovD | CvtDL | CvtLD, [ParsedOp::Fpr(fd), ParsedOp::Fpr(fs)]) => {
                ops.rd = *fd;
                ops.rs = *fs;
            }
            (Dmtc1, [ParsedOp::Gpr(rt), ParsedOp::Fpr(fs)]) => {
                ops.rt = *rt;
                ops.rd = *fs;
            }
            (Dmfc1, [ParsedOp::Gpr(rt), ParsedOp::Fpr(fs)]) => {
                ops.rt = *rt;
                ops.rs = *fs;
            }
            (Syscall, [ParsedOp::Imm(code)]) => {
                if *code > 0xF_FFFF {
                    self.error(
                        line_no,
                        toks[0].1,
                        ParseErrorKind::ValueOutOfRange {
                            value: *code,
                            bits: 20,
                        },
                    );
                    return None;
                }
                ops.imm = *code;
            }
            (Nop | Break | Halt, []) => {}
            _ => {
                // Operand kinds did not line up with the syntax positions;
                // individual operand errors were already recorded.
                return None;
            }
        }
        Some((ops, label_ref))
    }

    // ---------------------------------------------------------------- pass 2

    fn finish(mut self) -> Result<Program, ParseReport> {
        for p in std::mem::take(&mut self.pending) {
            let mut ops = p.ops;
            if let Some(r) = &p.label_ref {
                match self.symbols.lookup(&r.name) {
                    Some(sym) => match r.usage {
                        LabelUse::Branch => ops.target = sym.address,
                        LabelUse::Memory => ops.imm += sym.address as i64,
                    },
                    None => {
                        self.report.push(ParseError::new(
                            ParseErrorKind::UndefinedLabel(r.name.clone()),
                            p.line,
                            r.column,
                        ));
                        continue;
                    }
                }
            }
            let mut instr = Instruction::new(p.opcode, ops);
            instr.set_address(p.address);
            match encode::pack(&instr) {
                Ok(word) => {
                    instr.set_encoding(word);
                    if self.memory.add_instruction(instr, p.address).is_err() {
                        self.report.push(ParseError::new(
                            ParseErrorKind::AddressOutOfRange(p.address as u64),
                            p.line,
                            p.column,
                        ));
                    }
                }
                Err(e) => {
                    self.report
                        .push(ParseError::new(ParseErrorKind::Pack(e), p.line, p.column));
                }
            }
        }

        if self.report.is_empty() {
            Ok(Program {
                memory: self.memory,
                symbols: self.symbols,
            })
        } else {
            Err(self.report)
        }
    }
}

// -------------------------------------------------------------------- lexing

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(is_ident_char)
        && !s.chars().next().unwrap_or('0').is_ascii_digit()
}

/// Splits a leading `label:` off a statement, returning the label, the
/// remaining text, and how many bytes were consumed.
fn split_label(s: &str) -> Option<(&str, &str, usize)> {
    let mut end = 0;
    for c in s.chars() {
        if is_ident_char(c) {
            end += c.len_utf8();
        } else {
            break;
        }
    }
    if end == 0 || !s[end..].starts_with(':') {
        return None;
    }
    let label = &s[..end];
    if label.chars().next().unwrap_or('0').is_ascii_digit() {
        return None;
    }
    let rest = &s[end + 1..];
    let rest_trimmed = rest.trim_start();
    let consumed = end + 1 + (rest.len() - rest_trimmed.len());
    Some((label, rest_trimmed, consumed))
}

/// Splits comma-separated operands, honoring string literals. Returns each
/// operand with its starting column.
fn split_operands(s: &str, base_col: usize) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    if s.trim().is_empty() {
        return out;
    }
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;
    let bytes: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ',' {
            let tok: String = bytes[start..i].iter().collect();
            let lead = tok.len() - tok.trim_start().len();
            out.push((tok.trim().to_string(), base_col + start + lead));
            start = i + 1;
        }
        i += 1;
    }
    let tok: String = bytes[start..].iter().collect();
    let lead = tok.len() - tok.trim_start().len();
    out.push((tok.trim().to_string(), base_col + start + lead));
    out
}

fn parse_gpr(tok: &str) -> Option<usize> {
    let t = tok.trim();
    let rest = t
        .strip_prefix('$')
        .or_else(|| t.strip_prefix('r'))
        .or_else(|| t.strip_prefix('R'))?;
    let n: usize = rest.parse().ok()?;
    (n < 32).then_some(n)
}

fn parse_fpr(tok: &str) -> Option<usize> {
    let t = tok.trim();
    let t = t.strip_prefix('$').unwrap_or(t);
    let rest = t.strip_prefix('f').or_else(|| t.strip_prefix('F'))?;
    let n: usize = rest.parse().ok()?;
    (n < 32).then_some(n)
}

/// Parses a decimal or `0x`-prefixed literal, optionally negated.
fn parse_int(tok: &str) -> Option<i64> {
    let t = tok.trim();
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    let v = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else {
        if t.is_empty() || !t.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        t.parse::<u64>().ok()? as i64
    };
    Some(if neg { v.wrapping_neg() } else { v })
}

/// Parses a quoted string literal with `\n \t \0 \\ \"` escapes.
fn parse_string(tok: &str) -> Option<Vec<u8>> {
    let t = tok.trim();
    let inner = t.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push(b'\n'),
                't' => out.push(b'\t'),
                '0' => out.push(0),
                '\\' => out.push(b'\\'),
                '"' => out.push(b'"'),
                other => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
            }
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    Some(out)
}

/// Resolves a mnemonic to its opcode, syntax, and whether it is a
/// zero-`rt` alias (`beqz`/`bnez`).
fn mnemonic_spec(m: &str) -> Option<(Opcode, &'static str, bool)> {
    use Opcode::*;
    let opcode = match m {
        "add" => Add,
        "addu" => Addu,
        "sub" => Sub,
        "subu" => Subu,
        "and" => And,
        "or" => Or,
        "xor" => Xor,
        "nor" => Nor,
        "slt" => Slt,
        "sltu" => Sltu,
        "sll" => Sll,
        "srl" => Srl,
        "sra" => Sra,
        "sllv" => Sllv,
        "srlv" => Srlv,
        "srav" => Srav,
        "mult" => Mult,
        "multu" => Multu,
        "div" => Div,
        "divu" => Divu,
        "mfhi" => Mfhi,
        "mflo" => Mflo,
        "dadd" => Dadd,
        "daddu" => Daddu,
        "dsub" => Dsub,
        "dsubu" => Dsubu,
        "addi" => Addi,
        "addiu" => Addiu,
        "daddi" => Daddi,
        "daddiu" => Daddiu,
        "andi" => Andi,
        "ori" => Ori,
        "xori" => Xori,
        "lui" => Lui,
        "slti" => Slti,
        "sltiu" => Sltiu,
        "lb" => Lb,
        "lbu" => Lbu,
        "lh" => Lh,
        "lhu" => Lhu,
        "lw" => Lw,
        "lwu" => Lwu,
        "ld" => Ld,
        "sb" => Sb,
        "sh" => Sh,
        "sw" => Sw,
        "sd" => Sd,
        "l.d" => Ldc1,
        "s.d" => Sdc1,
        "beq" => Beq,
        "bne" => Bne,
        "beqz" => return Some((Beq, "%R,%B", true)),
        "bnez" => return Some((Bne, "%R,%B", true)),
        "bgez" => Bgez,
        "bltz" => Bltz,
        "j" => J,
        "jal" => Jal,
        "jr" => Jr,
        "jalr" => Jalr,
        "bc1t" => Bc1t,
        "bc1f" => Bc1f,
        "add.d" => AddD,
        "sub.d" => SubD,
        "mul.d" => MulD,
        "div.d" => DivD,
        "c.eq.d" => CEqD,
        "c.lt.d" => CLtD,
        "mov.d" => MovD,
        "cvt.d.l" => CvtDL,
        "cvt.l.d" => CvtLD,
        "dmtc1" => Dmtc1,
        "dmfc1" => Dmfc1,
        "nop" => Nop,
        "break" => Break,
        "syscall" => Syscall,
        // trap shares the syscall encoding and semantics
        "trap" => Syscall,
        "halt" => Halt,
        _ => return None,
    };
    Some((opcode, opcode.syntax(), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SymbolKind;

    #[test]
    fn test_minimal_program() {
        let program = assemble(
            "; increment then stop\n\
             .code\n\
             addi r1, r0, 5\n\
             halt\n",
        )
        .unwrap();
        assert_eq!(program.memory.instruction_count(), 2);
        let first = program.memory.instruction_at(0).unwrap();
        assert_eq!(first.opcode(), Opcode::Addi);
        assert_eq!(first.ops().rt, 1);
        assert_eq!(first.ops().imm, 5);
        let second = program.memory.instruction_at(4).unwrap();
        assert_eq!(second.opcode(), Opcode::Halt);
        assert_eq!(second.encoding(), 0x0400_0000);
    }

    #[test]
    fn test_data_layout_and_labels() {
        let program = assemble(
            ".data\n\
             x: .word64 7\n\
             y: .byte 1, 2\n\
             z: .word32 66000\n\
             .code\n\
             ld r1, x(r0)\n\
             halt\n",
        )
        .unwrap();
        let x = program.symbols.lookup("x").unwrap();
        assert_eq!(x.address, 0);
        assert_eq!(x.kind, SymbolKind::Data);
        let y = program.symbols.lookup("Y").unwrap();
        assert_eq!(y.address, 8);
        // .word32 aligns to the next 4-byte boundary after two bytes.
        assert_eq!(program.symbols.lookup("z").unwrap().address, 12);
        assert_eq!(program.memory.read_double(0).unwrap(), 7);
        assert_eq!(program.memory.read_byte(8).unwrap(), 1);
        assert_eq!(program.memory.read_byte(9).unwrap(), 2);
        assert_eq!(program.memory.read_word(12).unwrap(), 66000);
    }

    #[test]
    fn test_branch_label_resolution() {
        let program = assemble(
            ".code\n\
             j skip\n\
             addi r1, r0, 1\n\
             skip: halt\n",
        )
        .unwrap();
        let j = program.memory.instruction_at(0).unwrap();
        assert_eq!(j.ops().target, 8);
    }

    #[test]
    fn test_errors_accumulate() {
        let err = assemble(
            ".code\n\
             frobnicate r1, r2\n\
             addi r1, r0\n\
             add r1, r2, r99\n\
             halt\n",
        )
        .unwrap_err();
        assert_eq!(err.len(), 3);
        let text = err.to_string();
        assert!(text.contains("unknown mnemonic 'frobnicate'"));
        assert!(text.contains("expected 3 operands, found 2"));
        assert!(text.contains("invalid register 'r99'"));
    }

    #[test]
    fn test_duplicate_label_reported() {
        let err = assemble(
            ".code\n\
             loop: nop\n\
             loop: halt\n",
        )
        .unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err.to_string().contains("duplicate label 'loop'"));
    }

    #[test]
    fn test_undefined_label_reported() {
        let err = assemble(
            ".code\n\
             j nowhere\n\
             halt\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("undefined label 'nowhere'"));
    }

    #[test]
    fn test_statement_outside_section() {
        let err = assemble("addi r1, r0, 1\n").unwrap_err();
        assert!(err.to_string().contains("outside .data/.code"));
    }

    #[test]
    fn test_ascii_directive() {
        let program = assemble(
            ".data\n\
             msg: .asciiz \"hi, there\"\n\
             .code\n\
             halt\n",
        )
        .unwrap();
        assert_eq!(program.memory.read_byte(0).unwrap(), b'h' as u64);
        assert_eq!(program.memory.read_byte(1).unwrap(), b'i' as u64);
        // The comma inside the string is not an operand separator.
        assert_eq!(program.memory.read_byte(2).unwrap(), b',' as u64);
        assert_eq!(program.memory.read_byte(9).unwrap(), 0);
    }

    #[test]
    fn test_dollar_register_names() {
        let program = assemble(
            ".code\n\
             add $3, $1, $2\n\
             halt\n",
        )
        .unwrap();
        let add = program.memory.instruction_at(0).unwrap();
        assert_eq!(add.ops().rd, 3);
        assert_eq!(add.ops().rs, 1);
        assert_eq!(add.ops().rt, 2);
    }

    #[test]
    fn test_beqz_alias() {
        let program = assemble(
            ".code\n\
             beqz r4, end\n\
             nop\n\
             end: halt\n",
        )
        .unwrap();
        let b = program.memory.instruction_at(0).unwrap();
        assert_eq!(b.opcode(), Opcode::Beq);
        assert_eq!(b.ops().rs, 4);
        assert_eq!(b.ops().rt, 0);
        assert_eq!(b.ops().target, 8);
    }

    #[test]
    fn test_fp_program_parses() {
        let program = assemble(
            ".data\n\
             a: .double 1.5\n\
             b: .double 2.5\n\
             .code\n\
             l.d f0, a(r0)\n\
             l.d f1, b(r0)\n\
             add.d f2, f0, f1\n\
             s.d f2, 16(r0)\n\
             halt\n",
        )
        .unwrap();
        assert_eq!(program.memory.instruction_count(), 5);
        let addd = program.memory.instruction_at(8).unwrap();
        assert_eq!(addd.opcode(), Opcode::AddD);
        assert_eq!(addd.ops().rd, 2);
    }
}
