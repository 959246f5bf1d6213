//! Simulation statistics collection and reporting.
//!
//! This module tracks the counters the pipeline exposes after every cycle:
//! 1. **Cycle and commit counts:** Total cycles and retired (non-bubble) instructions.
//! 2. **Stalls:** One counter per cause — RAW, WAW, and the structural conflicts
//!    on the divider, the FP adder/multiplier, the EX slot, and the MEM path.

/// Simulation statistics tracked by the CPU.
///
/// Each stall counter is incremented exactly once per occurrence by the cycle
/// controller's end-of-cycle handling.
#[derive(Clone, Default, Debug)]
pub struct SimStats {
    /// Total simulator cycles elapsed.
    pub cycles: u64,
    /// Number of instructions committed (non-bubble WB retirements).
    pub instructions: u64,

    /// Stall cycles due to Read-After-Write hazards.
    pub raw_stalls: u64,
    /// Stall cycles due to Write-After-Write hazards in the FP pipe.
    pub waw_stalls: u64,
    /// Stall cycles because the FP divider was busy.
    pub divider_stalls: u64,
    /// Stall cycles because the FP adder or multiplier entry was busy.
    pub fp_unit_stalls: u64,
    /// Stall cycles because the integer EX slot was occupied.
    pub ex_stalls: u64,
    /// Stall cycles on the shared MEM path (FP completion conflicts).
    pub memory_stalls: u64,
}

impl SimStats {
    /// Sum of every stall counter.
    pub fn total_stalls(&self) -> u64 {
        self.raw_stalls
            + self.waw_stalls
            + self.divider_stalls
            + self.fp_unit_stalls
            + self.ex_stalls
            + self.memory_stalls
    }

    /// Prints the statistics report to stdout.
    pub fn print(&self) {
        let cyc = if self.cycles == 0 { 1 } else { self.cycles };
        let cpi = cyc as f64
            / if self.instructions == 0 {
                1
            } else {
                self.instructions
            } as f64;
        println!("\n==========================================================");
        println!("MIPS64 PIPELINE SIMULATION STATISTICS");
        println!("==========================================================");
        println!("sim_cycles               {}", self.cycles);
        println!("sim_insts                {}", self.instructions);
        println!("sim_cpi                  {:.4}", cpi);
        println!("----------------------------------------------------------");
        println!("STALL BREAKDOWN");
        let print_stall = |name: &str, count: u64| {
            println!(
                "  {:<22} {} ({:.2}%)",
                name,
                count,
                (count as f64 / cyc as f64) * 100.0
            );
        };
        print_stall("stalls.raw", self.raw_stalls);
        print_stall("stalls.waw", self.waw_stalls);
        print_stall("stalls.divider", self.divider_stalls);
        print_stall("stalls.fp_unit", self.fp_unit_stalls);
        print_stall("stalls.ex", self.ex_stalls);
        print_stall("stalls.memory", self.memory_stalls);
        println!("==========================================================");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_stalls() {
        let stats = SimStats {
            raw_stalls: 2,
            waw_stalls: 1,
            divider_stalls: 3,
            ..Default::default()
        };
        assert_eq!(stats.total_stalls(), 6);
    }
}
