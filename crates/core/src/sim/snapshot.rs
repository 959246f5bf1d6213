//! Per-cycle state capture.
//!
//! After each `step()` a caller may capture where every instruction sits and
//! what the architectural state looks like. The snapshot is a plain value:
//! taking one between cycles is the only supported way to observe the machine,
//! and mid-cycle state is never exposed.

use crate::core::fp::{ADDER_STAGES, MULTIPLIER_STAGES};
use crate::core::pipeline::{Slot, Stage};
use crate::isa::Instruction;
use crate::sim::Simulator;
use crate::stats::SimStats;

/// An instruction (or bubble) occupying a pipeline position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Occupant {
    /// Mnemonic, or `"bubble"`.
    pub name: String,
    /// 32-bit encoding (zero for bubbles).
    pub encoding: u32,
    /// True for bubbles.
    pub bubble: bool,
}

impl Occupant {
    fn from_slot(slot: &Slot) -> Option<Self> {
        match slot {
            Slot::Empty => None,
            Slot::Bubble => Some(Self {
                name: "bubble".to_string(),
                encoding: 0,
                bubble: true,
            }),
            Slot::Full(instr) => Some(Self::from_instruction(instr)),
        }
    }

    fn from_instruction(instr: &Instruction) -> Self {
        Self {
            name: instr.name().to_string(),
            encoding: instr.encoding(),
            bubble: false,
        }
    }
}

/// A consistent view of the machine between two cycles.
#[derive(Clone, Debug)]
pub struct CycleSnapshot {
    /// Cycles executed so far.
    pub cycle: u64,
    /// Integer pipeline occupants in stage order IF, ID, EX, MEM, WB.
    pub stages: [Option<Occupant>; 5],
    /// FP adder positions A1..A4.
    pub adder: [Option<Occupant>; ADDER_STAGES],
    /// FP multiplier positions M1..M7.
    pub multiplier: [Option<Occupant>; MULTIPLIER_STAGES],
    /// FP divider occupant.
    pub divider: Option<Occupant>,
    /// Remaining divider cycles while occupied.
    pub divider_counter: Option<u8>,
    /// All counters, including per-cause stalls.
    pub stats: SimStats,
    /// Program counter (next fetch address).
    pub pc: u64,
    /// Address of the most recently fetched instruction.
    pub old_pc: u64,
    /// HI accumulator.
    pub hi: u64,
    /// LO accumulator.
    pub lo: u64,
    /// General-purpose register values.
    pub gpr: [u64; 32],
    /// Floating-point register values (raw bit patterns).
    pub fpr: [u64; 32],
    /// FCSR contents.
    pub fcsr: u32,
}

impl CycleSnapshot {
    /// Captures the current state of a simulator.
    pub fn capture(sim: &Simulator) -> Self {
        let cpu = &sim.cpu;
        let stages = [
            Occupant::from_slot(cpu.pipe.get(Stage::If)),
            Occupant::from_slot(cpu.pipe.get(Stage::Id)),
            Occupant::from_slot(cpu.pipe.get(Stage::Ex)),
            Occupant::from_slot(cpu.pipe.get(Stage::Mem)),
            Occupant::from_slot(cpu.pipe.get(Stage::Wb)),
        ];
        let adder_slots = cpu.fp_pipe.adder_slots();
        let adder: [Option<Occupant>; ADDER_STAGES] =
            std::array::from_fn(|i| adder_slots[i].as_ref().map(Occupant::from_instruction));
        let mul_slots = cpu.fp_pipe.multiplier_slots();
        let multiplier: [Option<Occupant>; MULTIPLIER_STAGES] =
            std::array::from_fn(|i| mul_slots[i].as_ref().map(Occupant::from_instruction));
        Self {
            cycle: cpu.stats.cycles,
            stages,
            adder,
            multiplier,
            divider: cpu.fp_pipe.divider_slot().map(Occupant::from_instruction),
            divider_counter: cpu.fp_pipe.divider_counter(),
            stats: cpu.stats.clone(),
            pc: cpu.pc,
            old_pc: cpu.old_pc,
            hi: cpu.hi.read(),
            lo: cpu.lo.read(),
            gpr: cpu.gpr.dump(),
            fpr: cpu.fpr.dump(),
            fcsr: cpu.fcsr.bits(),
        }
    }

    /// Occupant of an integer pipeline stage.
    pub fn stage(&self, stage: Stage) -> Option<&Occupant> {
        self.stages[stage as usize].as_ref()
    }
}
