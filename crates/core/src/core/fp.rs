//! Floating-point sub-pipeline.
//!
//! Three functional units share one entry (from ID) and one exit (towards MEM):
//! 1. **Adder** — four pipelined positions A1..A4.
//! 2. **Multiplier** — seven pipelined positions M1..M7.
//! 3. **Divider** — a single non-pipelined slot with a countdown; it rejects new
//!    instructions until idle.
//!
//! Every cycle each unit shifts its instructions one position towards completion
//! unless blocked by an occupied downstream position. At most one completed
//! instruction per cycle is handed to the integer pipeline; when several units
//! are ready in the same cycle the winner is chosen in the fixed priority order
//! Divider > Multiplier > Adder and the losers retain their instruction.

use crate::isa::{FpUnit, Instruction};

/// Number of adder positions.
pub const ADDER_STAGES: usize = 4;

/// Number of multiplier positions.
pub const MULTIPLIER_STAGES: usize = 7;

/// Divider countdown in cycles.
pub const DIVIDER_LATENCY: u8 = 24;

/// The FP functional units and their slots.
#[derive(Clone, Default)]
pub struct FpPipeline {
    adder: [Option<Instruction>; ADDER_STAGES],
    multiplier: [Option<Instruction>; MULTIPLIER_STAGES],
    divider: Option<Instruction>,
    divider_counter: u8,
}

impl FpPipeline {
    /// Creates an empty FP pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no unit holds an instruction.
    pub fn is_empty(&self) -> bool {
        self.adder.iter().all(Option::is_none)
            && self.multiplier.iter().all(Option::is_none)
            && self.divider.is_none()
    }

    /// Number of instructions currently in flight across all units.
    pub fn occupancy(&self) -> usize {
        self.adder.iter().flatten().count()
            + self.multiplier.iter().flatten().count()
            + usize::from(self.divider.is_some())
    }

    /// True when the unit can take a new instruction this cycle.
    pub fn can_accept(&self, unit: FpUnit) -> bool {
        match unit {
            FpUnit::Adder => self.adder[0].is_none(),
            FpUnit::Multiplier => self.multiplier[0].is_none(),
            FpUnit::Divider => self.divider.is_none(),
        }
    }

    /// Inserts an instruction into its unit's entry position.
    ///
    /// The caller must have checked [`can_accept`](Self::can_accept) first; an
    /// occupied entry position silently drops the old occupant otherwise.
    pub fn issue(&mut self, instr: Instruction) {
        match instr.fp_unit() {
            Some(FpUnit::Adder) => self.adder[0] = Some(instr),
            Some(FpUnit::Multiplier) => self.multiplier[0] = Some(instr),
            Some(FpUnit::Divider) => {
                self.divider = Some(instr);
                self.divider_counter = DIVIDER_LATENCY;
            }
            None => {}
        }
    }

    /// Advances every unit by one cycle.
    ///
    /// Pipelined units shift from the exit backwards so a blocked exit position
    /// holds up everything behind it. The divider decrements its countdown.
    pub fn step(&mut self) {
        for i in (0..ADDER_STAGES - 1).rev() {
            if self.adder[i + 1].is_none() {
                self.adder[i + 1] = self.adder[i].take();
            }
        }
        for i in (0..MULTIPLIER_STAGES - 1).rev() {
            if self.multiplier[i + 1].is_none() {
                self.multiplier[i + 1] = self.multiplier[i].take();
            }
        }
        if self.divider.is_some() && self.divider_counter > 0 {
            self.divider_counter -= 1;
        }
    }

    /// Number of units holding an instruction that is ready to exit.
    pub fn ready_count(&self) -> usize {
        usize::from(self.divider.is_some() && self.divider_counter == 0)
            + usize::from(self.multiplier[MULTIPLIER_STAGES - 1].is_some())
            + usize::from(self.adder[ADDER_STAGES - 1].is_some())
    }

    /// Removes and returns the highest-priority completed instruction.
    ///
    /// Priority is Divider > Multiplier > Adder; units that lose retain their
    /// instruction for a later cycle.
    pub fn take_completed(&mut self) -> Option<Instruction> {
        if self.divider.is_some() && self.divider_counter == 0 {
            return self.divider.take();
        }
        if let Some(instr) = self.multiplier[MULTIPLIER_STAGES - 1].take() {
            return Some(instr);
        }
        self.adder[ADDER_STAGES - 1].take()
    }

    /// Adder positions A1..A4 for snapshots.
    pub fn adder_slots(&self) -> &[Option<Instruction>; ADDER_STAGES] {
        &self.adder
    }

    /// Multiplier positions M1..M7 for snapshots.
    pub fn multiplier_slots(&self) -> &[Option<Instruction>; MULTIPLIER_STAGES] {
        &self.multiplier
    }

    /// Divider occupant for snapshots.
    pub fn divider_slot(&self) -> Option<&Instruction> {
        self.divider.as_ref()
    }

    /// Remaining divider cycles while an instruction occupies it.
    pub fn divider_counter(&self) -> Option<u8> {
        self.divider.as_ref().map(|_| self.divider_counter)
    }

    /// Empties every unit.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Instruction, Opcode, Operands};

    fn fp_instr(opcode: Opcode) -> Instruction {
        Instruction::new(opcode, Operands::default())
    }

    #[test]
    fn test_adder_latency() {
        let mut fp = FpPipeline::new();
        fp.issue(fp_instr(Opcode::AddD));
        for _ in 0..3 {
            assert_eq!(fp.ready_count(), 0);
            fp.step();
        }
        assert_eq!(fp.ready_count(), 1);
        assert!(fp.take_completed().is_some());
        assert!(fp.is_empty());
    }

    #[test]
    fn test_multiplier_latency() {
        let mut fp = FpPipeline::new();
        fp.issue(fp_instr(Opcode::MulD));
        for _ in 0..6 {
            assert_eq!(fp.ready_count(), 0);
            fp.step();
        }
        assert_eq!(fp.ready_count(), 1);
    }

    #[test]
    fn test_divider_countdown_and_rejection() {
        let mut fp = FpPipeline::new();
        assert!(fp.can_accept(FpUnit::Divider));
        fp.issue(fp_instr(Opcode::DivD));
        assert!(!fp.can_accept(FpUnit::Divider));
        for _ in 0..DIVIDER_LATENCY {
            assert_eq!(fp.ready_count(), 0);
            fp.step();
        }
        assert_eq!(fp.ready_count(), 1);
        assert!(fp.take_completed().is_some());
        assert!(fp.can_accept(FpUnit::Divider));
    }

    #[test]
    fn test_entry_busy_until_shift() {
        let mut fp = FpPipeline::new();
        fp.issue(fp_instr(Opcode::AddD));
        assert!(!fp.can_accept(FpUnit::Adder));
        fp.step();
        assert!(fp.can_accept(FpUnit::Adder));
    }

    #[test]
    fn test_completion_priority_divider_first() {
        let mut fp = FpPipeline::new();
        fp.issue(fp_instr(Opcode::DivD));
        // Let the divider almost finish, then fill the multiplier and adder so
        // all three are ready in the same cycle.
        for _ in 0..DIVIDER_LATENCY - 7 {
            fp.step();
        }
        fp.issue(fp_instr(Opcode::MulD));
        for _ in 0..3 {
            fp.step();
        }
        fp.issue(fp_instr(Opcode::AddD));
        for _ in 0..4 {
            fp.step();
        }
        assert_eq!(fp.ready_count(), 3);
        assert_eq!(fp.take_completed().unwrap().opcode(), Opcode::DivD);
        assert_eq!(fp.ready_count(), 2);
        assert_eq!(fp.take_completed().unwrap().opcode(), Opcode::MulD);
        assert_eq!(fp.take_completed().unwrap().opcode(), Opcode::AddD);
    }

    #[test]
    fn test_blocked_exit_stalls_shift() {
        let mut fp = FpPipeline::new();
        fp.issue(fp_instr(Opcode::AddD));
        fp.step();
        fp.issue(fp_instr(Opcode::AddD));
        for _ in 0..3 {
            fp.step();
        }
        // First occupies A4, second is right behind in A3.
        assert_eq!(fp.ready_count(), 1);
        fp.step();
        // A4 still occupied, so the second stays in A3.
        assert_eq!(fp.ready_count(), 1);
        assert_eq!(fp.occupancy(), 2);
        assert!(fp.take_completed().is_some());
        fp.step();
        assert_eq!(fp.ready_count(), 1);
    }
}
