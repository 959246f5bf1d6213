//! Top-level simulator.
//!
//! [`Simulator`] owns the CPU, the memory, and the symbol table side by side
//! and wires them together for each cycle. Nothing here is global: several
//! simulators can run in the same process without sharing state.

/// Per-cycle state capture for external consumers.
pub mod snapshot;

pub use snapshot::CycleSnapshot;

use crate::common::error::{ExceptionCode, SimError, StepOutcome};
use crate::config::Config;
use crate::core::pipeline::Stage;
use crate::core::Cpu;
use crate::memory::{Memory, SymbolTable};
use crate::parser::{self, errors::ParseReport};

/// Outcome of a bounded [`Simulator::run_to_halt`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunResult {
    /// True when the CPU reached `Halted`; false when the cycle budget ran out.
    pub halted: bool,
    /// Total cycles executed so far.
    pub cycles: u64,
    /// Unmasked synchronous exceptions surfaced along the way, in order.
    pub exceptions: Vec<ExceptionCode>,
    /// Number of `break` instructions that reached decode.
    pub breakpoints: u64,
}

/// The simulator: CPU architectural state, memory, and symbols.
pub struct Simulator {
    /// CPU state and pipelines.
    pub cpu: Cpu,
    /// Data memory and instruction store.
    pub memory: Memory,
    /// Labels from the loaded program.
    pub symbols: SymbolTable,
}

impl Simulator {
    /// Creates a simulator with empty memory in the `Ready` state.
    pub fn new(config: Config) -> Self {
        Self {
            cpu: Cpu::new(config),
            memory: Memory::new(),
            symbols: SymbolTable::new(),
        }
    }

    /// Assembles `source` and loads it, resetting any previous run.
    ///
    /// On success the CPU transitions to `Running` and is ready to step.
    ///
    /// # Errors
    ///
    /// Returns the accumulated parse report when the source fails to assemble;
    /// the simulator keeps its previous program in that case.
    pub fn load(&mut self, source: &str) -> Result<(), ParseReport> {
        let program = parser::assemble(source)?;
        self.memory = program.memory;
        self.symbols = program.symbols;
        self.cpu.reset();
        self.cpu.start();
        // Prime the fetch stage: the first instruction occupies IF now and
        // decodes on the first stepped cycle.
        self.cpu
            .pipe
            .set(Stage::If, self.memory.fetch(self.cpu.pc));
        self.cpu.pc += 4;
        Ok(())
    }

    /// Executes one clock cycle.
    pub fn step(&mut self) -> Result<StepOutcome, SimError> {
        self.cpu.step(&mut self.memory)
    }

    /// Steps until the CPU halts or `max_cycles` total cycles have elapsed.
    ///
    /// Breakpoints and unmasked synchronous exceptions are collected and the
    /// run continues; terminate-mode exceptions and a stopped CPU surface as
    /// errors.
    pub fn run_to_halt(&mut self, max_cycles: u64) -> Result<RunResult, SimError> {
        let mut exceptions = Vec::new();
        let mut breakpoints = 0;
        while self.cpu.stats.cycles < max_cycles {
            match self.step()? {
                StepOutcome::Halted => {
                    return Ok(RunResult {
                        halted: true,
                        cycles: self.cpu.stats.cycles,
                        exceptions,
                        breakpoints,
                    });
                }
                StepOutcome::Breakpoint => breakpoints += 1,
                StepOutcome::SyncException(code) => exceptions.push(code),
                StepOutcome::Ok => {}
            }
        }
        Ok(RunResult {
            halted: false,
            cycles: self.cpu.stats.cycles,
            exceptions,
            breakpoints,
        })
    }

    /// Captures a consistent snapshot of the machine between cycles.
    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot::capture(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;

    #[test]
    fn test_step_before_load_fails() {
        let mut sim = Simulator::new(Config::default());
        assert_eq!(sim.step(), Err(SimError::StoppedCpu));
    }

    #[test]
    fn test_load_starts_cpu() {
        let mut sim = Simulator::new(Config::default());
        sim.load(".code\nhalt\n").unwrap();
        assert_eq!(sim.cpu.status(), Status::Running);
    }

    #[test]
    fn test_step_after_halt_fails() {
        let mut sim = Simulator::new(Config::default());
        sim.load(".code\nhalt\n").unwrap();
        let result = sim.run_to_halt(100).unwrap();
        assert!(result.halted);
        assert_eq!(sim.cpu.status(), Status::Halted);
        assert_eq!(sim.step(), Err(SimError::StoppedCpu));
    }

    #[test]
    fn test_failed_load_keeps_state() {
        let mut sim = Simulator::new(Config::default());
        sim.load(".code\nhalt\n").unwrap();
        assert!(sim.load(".code\nbogus r1\n").is_err());
        // The previous program is still loaded.
        assert_eq!(sim.memory.instruction_count(), 1);
    }
}
