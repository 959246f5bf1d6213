//! MIPS64 pipeline simulator library.
//!
//! This crate implements a cycle-accurate educational MIPS64 simulator with the following:
//! 1. **Core:** Five-stage integer pipeline (IF, ID, EX, MEM, WB), GPR/FPR/FCSR state,
//!    and a multi-unit floating-point sub-pipeline (adder, multiplier, divider).
//! 2. **Memory:** Byte-addressable data segment, instruction store, and symbol table.
//! 3. **ISA:** Decoded instruction values with per-stage behavior, 32-bit packing
//!    and unpacking over the real MIPS64 field layouts.
//! 4. **Parser:** Two-pass assembler over `.data`/`.code` sections with multi-error
//!    reporting.
//! 5. **Simulation:** Owner type wiring the pieces together, per-cycle snapshots,
//!    configuration, and statistics collection.

/// Common helpers (bit-field manipulation, error taxonomy).
pub mod common;
/// Simulator configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// CPU core (pipeline controller, register files, FP sub-pipeline).
pub mod core;
/// Instruction set (opcodes, stage behaviors, encode/decode, disassembly).
pub mod isa;
/// Data memory, instruction store, and symbol table.
pub mod memory;
/// Two-pass assembly parser.
pub mod parser;
/// Top-level simulator and cycle snapshots.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// Main CPU type; holds the integer pipeline, FP pipeline, and registers.
pub use crate::core::Cpu;
/// Top-level simulator; construct with `Simulator::new`, feed it a program with `load`.
pub use crate::sim::Simulator;
