//! CPU core: the five-stage integer pipeline controller.
//!
//! One call to [`Cpu::step`] executes a single clock cycle. Stages run in
//! reverse order — WB, MEM, EX, ID, IF — so a slot is consumed only after its
//! downstream slot has been emptied, which makes intra-cycle movement safe.
//!
//! 1. **WB** retires the oldest instruction and counts it, gating terminating
//!    instructions while the FP pipe or MEM path is still busy. When the
//!    pipeline drains in the `Stopping` state the CPU halts.
//! 2. **MEM** performs the memory access and moves its slot to WB.
//! 3. **EX** first pulls a completed FP instruction if one is ready, recording
//!    a memory-path structural stall when it competes with the integer EX slot,
//!    then executes and advances the FP units by one shift.
//! 4. **ID** dispatches: FP arithmetic into its functional unit, everything
//!    else towards EX, stalling on RAW/WAW hazards and structural conflicts.
//! 5. **IF** moves the fetched instruction to ID and fetches at the PC, or
//!    injects bubbles once the CPU is stopping.
//!
//! Stalls, jumps, breakpoints, and the halt are ordinary results of the stage
//! helpers; the cycle loop matches on them instead of unwinding.

/// Architectural register state (GPR, FPR, FCSR, HI/LO).
pub mod arch;
/// FP functional units.
pub mod fp;
/// Integer pipeline slots.
pub mod pipeline;

use crate::common::error::{ExceptionCode, SimError, StepOutcome};
use crate::config::Config;
use crate::core::arch::fcsr::FpExceptionKind;
use crate::core::arch::{Fcsr, Fpr, Gpr, Reg64};
use crate::core::fp::FpPipeline;
use crate::core::pipeline::{Pipeline, Slot, Stage};
use crate::isa::{ExecContext, Family, IdAction, Opcode};
use crate::memory::Memory;
use crate::stats::SimStats;

/// CPU execution state machine.
///
/// `Ready` → (program loaded, start) → `Running` → (terminating instruction
/// decoded) → `Stopping` → (pipelines drained at WB) → `Halted`. `reset` moves
/// any state back to `Ready`. Stepping in `Ready` or `Halted` fails with
/// [`SimError::StoppedCpu`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Initialized, no program started.
    Ready,
    /// Fetching and executing instructions.
    Running,
    /// A terminating instruction was decoded; the pipeline is draining.
    Stopping,
    /// Execution finished.
    Halted,
}

/// Stall causes recorded by the decode stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StallKind {
    Raw,
    Waw,
    Divider,
    FpUnit,
    Ex,
}

/// What the decode stage did this cycle.
enum IdOutcome {
    /// Nothing occupied ID.
    Idle,
    /// The occupant moved on (or a bubble flowed through).
    Dispatched,
    /// The occupant stays in ID; a bubble covers EX.
    Stall(StallKind),
    /// A taken branch or jump updated the PC.
    Jump,
}

/// The MIPS64 CPU: registers, pipelines, statistics, and the status FSM.
pub struct Cpu {
    /// General-purpose registers.
    pub gpr: Gpr,
    /// Floating-point registers.
    pub fpr: Fpr,
    /// FP control and status register.
    pub fcsr: Fcsr,
    /// HI accumulator (mult/div high result).
    pub hi: Reg64,
    /// LO accumulator (mult/div low result).
    pub lo: Reg64,
    /// Program counter (next fetch address).
    pub pc: u64,
    /// Address of the most recently fetched instruction.
    pub old_pc: u64,
    /// Integer pipeline slots.
    pub pipe: Pipeline,
    /// FP functional units.
    pub fp_pipe: FpPipeline,
    /// Cycle, commit, and stall counters.
    pub stats: SimStats,
    status: Status,
    config: Config,
}

impl Cpu {
    /// Creates a CPU in the `Ready` state.
    pub fn new(config: Config) -> Self {
        Self {
            gpr: Gpr::new(),
            fpr: Fpr::new(),
            fcsr: Fcsr::new(),
            hi: Reg64::default(),
            lo: Reg64::default(),
            pc: 0,
            old_pc: 0,
            pipe: Pipeline::new(),
            fp_pipe: FpPipeline::new(),
            stats: SimStats::default(),
            status: Status::Ready,
            config,
        }
    }

    /// Current execution state.
    pub fn status(&self) -> Status {
        self.status
    }

    /// The configuration the CPU was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transitions `Ready` → `Running` once a program is loaded.
    pub fn start(&mut self) {
        if self.status == Status::Ready {
            self.status = Status::Running;
        }
    }

    /// Resets registers, pipelines, statistics, and the status FSM.
    pub fn reset(&mut self) {
        self.gpr.reset();
        self.fpr.reset();
        self.fcsr = Fcsr::new();
        self.hi.reset();
        self.lo.reset();
        self.pc = 0;
        self.old_pc = 0;
        self.pipe.clear();
        self.fp_pipe.reset();
        self.stats = SimStats::default();
        self.status = Status::Ready;
    }

    /// True when ID, EX, MEM, and the FP units hold no live instruction.
    ///
    /// WB is deliberately not checked: the caller runs before the WB occupant
    /// is removed.
    fn pipelines_empty(&self) -> bool {
        self.pipe.get(Stage::Id).is_empty_or_bubble()
            && self.pipe.get(Stage::Ex).is_empty_or_bubble()
            && self.pipe.get(Stage::Mem).is_empty_or_bubble()
            && self.fp_pipe.is_empty()
    }

    /// Executes one clock cycle.
    ///
    /// Returns the cycle's outcome, or an error when the CPU is stopped or an
    /// unmasked exception occurs with the terminate option set.
    pub fn step(&mut self, mem: &mut Memory) -> Result<StepOutcome, SimError> {
        self.sync_fcsr();

        if !matches!(self.status, Status::Running | Status::Stopping) {
            return Err(SimError::StoppedCpu);
        }

        self.stats.cycles += 1;
        if self.config.general.trace {
            self.trace_cycle();
        }

        if self.step_wb(mem) {
            return Ok(StepOutcome::Halted);
        }

        let mut pending = self.step_mem(mem)?;
        if let Some(code) = self.step_ex(mem)? {
            // The MEM-stage occupant is older; its exception wins.
            if pending.is_none() {
                pending = Some(code);
            }
        }

        let mut breaking = false;
        match self.step_id(mem) {
            IdOutcome::Stall(kind) => {
                match kind {
                    StallKind::Raw => self.stats.raw_stalls += 1,
                    StallKind::Waw => self.stats.waw_stalls += 1,
                    StallKind::Divider => self.stats.divider_stalls += 1,
                    StallKind::FpUnit => self.stats.fp_unit_stalls += 1,
                    StallKind::Ex => self.stats.ex_stalls += 1,
                }
                if kind != StallKind::Ex && self.pipe.get(Stage::Ex).is_empty() {
                    self.pipe.set(Stage::Ex, Slot::Bubble);
                }
            }
            IdOutcome::Jump => self.handle_jump(mem),
            IdOutcome::Idle | IdOutcome::Dispatched => {
                breaking = self.step_if(mem);
            }
        }

        if let Some(code) = pending {
            return Ok(StepOutcome::SyncException(code));
        }
        if breaking {
            return Ok(StepOutcome::Breakpoint);
        }
        Ok(StepOutcome::Ok)
    }

    /// WB stage. Returns true when the CPU halted this cycle.
    fn step_wb(&mut self, mem: &mut Memory) -> bool {
        if self.pipe.get(Stage::Wb).is_empty() {
            return false;
        }

        let terminator = self
            .pipe
            .get(Stage::Wb)
            .instruction()
            .is_some_and(|i| i.is_terminating());
        // A terminating instruction must not retire its behavior while the FP
        // pipe still works or MEM carries something other than a bubble.
        let not_wbable = terminator
            && (!self.fp_pipe.is_empty() || !self.pipe.get(Stage::Mem).is_bubble());

        {
            let Cpu {
                pipe,
                gpr,
                fpr,
                fcsr,
                hi,
                lo,
                pc,
                stats,
                config,
                ..
            } = self;
            if let Slot::Full(instr) = pipe.get_mut(Stage::Wb) {
                stats.instructions += 1;
                if !not_wbable {
                    let mut ctx = ExecContext {
                        gpr,
                        fpr,
                        fcsr,
                        hi,
                        lo,
                        pc,
                        mem,
                        forwarding: config.pipeline.forwarding,
                    };
                    instr.stage_wb(&mut ctx);
                }
            }
        }
        self.pipe.set(Stage::Wb, Slot::Empty);

        if self.status == Status::Stopping && self.pipelines_empty() {
            self.status = Status::Halted;
            return true;
        }
        false
    }

    /// MEM stage: access memory and move the slot to WB.
    fn step_mem(&mut self, mem: &mut Memory) -> Result<Option<ExceptionCode>, SimError> {
        let Cpu {
            pipe,
            gpr,
            fpr,
            fcsr,
            hi,
            lo,
            pc,
            config,
            ..
        } = self;

        let mut pending = None;
        if let Slot::Full(instr) = pipe.get_mut(Stage::Mem) {
            let mut ctx = ExecContext {
                gpr,
                fpr,
                fcsr,
                hi,
                lo,
                pc,
                mem,
                forwarding: config.pipeline.forwarding,
            };
            if let Err(code) = instr.stage_mem(&mut ctx) {
                pending = Self::dispose_exception(config, code)?;
            }
        }
        let slot = pipe.take(Stage::Mem);
        pipe.set(Stage::Wb, slot);
        Ok(pending)
    }

    /// EX stage: pull a completed FP instruction or execute the integer EX
    /// occupant, then advance the FP units.
    fn step_ex(&mut self, mem: &mut Memory) -> Result<Option<ExceptionCode>, SimError> {
        let Cpu {
            pipe,
            fp_pipe,
            gpr,
            fpr,
            fcsr,
            hi,
            lo,
            pc,
            stats,
            config,
            ..
        } = self;

        let mut pending = None;
        if fp_pipe.ready_count() > 0 {
            // An FP completion takes the MEM path. If the integer EX slot also
            // wanted to move, or several units finished together, that is a
            // structural conflict on the shared path.
            if matches!(pipe.get(Stage::Ex), Slot::Full(_)) || fp_pipe.ready_count() > 1 {
                stats.memory_stalls += 1;
            }
            if let Some(mut instr) = fp_pipe.take_completed() {
                let mut ctx = ExecContext {
                    gpr,
                    fpr,
                    fcsr,
                    hi,
                    lo,
                    pc,
                    mem,
                    forwarding: config.pipeline.forwarding,
                };
                if let Err(code) = instr.stage_ex(&mut ctx) {
                    pending = Self::dispose_exception(config, code)?;
                }
                pipe.set(Stage::Mem, Slot::Full(instr));
            }
        } else {
            let slot = pipe.take(Stage::Ex);
            match slot {
                Slot::Full(mut instr) => {
                    let mut ctx = ExecContext {
                        gpr,
                        fpr,
                        fcsr,
                        hi,
                        lo,
                        pc,
                        mem,
                        forwarding: config.pipeline.forwarding,
                    };
                    if let Err(code) = instr.stage_ex(&mut ctx) {
                        pending = Self::dispose_exception(config, code)?;
                    }
                    pipe.set(Stage::Mem, Slot::Full(instr));
                }
                other => pipe.set(Stage::Mem, other),
            }
        }
        fp_pipe.step();
        Ok(pending)
    }

    /// ID stage: dispatch towards EX or an FP unit.
    fn step_id(&mut self, mem: &mut Memory) -> IdOutcome {
        let Cpu {
            pipe,
            fp_pipe,
            gpr,
            fpr,
            fcsr,
            hi,
            lo,
            pc,
            status,
            config,
            ..
        } = self;

        let (fp_unit, is_divider) = match pipe.get(Stage::Id) {
            Slot::Empty => return IdOutcome::Idle,
            Slot::Bubble => {
                if matches!(pipe.get(Stage::Ex), Slot::Full(_)) {
                    return IdOutcome::Stall(StallKind::Ex);
                }
                let bubble = pipe.take(Stage::Id);
                pipe.set(Stage::Ex, bubble);
                return IdOutcome::Dispatched;
            }
            Slot::Full(instr) => match instr.opcode().family() {
                Family::FpArith(unit) => (Some(unit), instr.opcode() == Opcode::DivD),
                _ => (None, false),
            },
        };

        // Structural checks come before the decode behavior runs.
        match fp_unit {
            Some(unit) => {
                if !fp_pipe.can_accept(unit) {
                    return IdOutcome::Stall(if is_divider {
                        StallKind::Divider
                    } else {
                        StallKind::FpUnit
                    });
                }
            }
            None => {
                if matches!(pipe.get(Stage::Ex), Slot::Full(_)) {
                    return IdOutcome::Stall(StallKind::Ex);
                }
            }
        }

        let action = {
            let mut ctx = ExecContext {
                gpr,
                fpr,
                fcsr,
                hi,
                lo,
                pc,
                mem,
                forwarding: config.pipeline.forwarding,
            };
            match pipe.get_mut(Stage::Id) {
                Slot::Full(instr) => instr.stage_id(&mut ctx),
                _ => return IdOutcome::Idle,
            }
        };

        match action {
            IdAction::Raw => IdOutcome::Stall(StallKind::Raw),
            IdAction::Waw => IdOutcome::Stall(StallKind::Waw),
            IdAction::Jump => IdOutcome::Jump,
            IdAction::Proceed | IdAction::Stopping => {
                if action == IdAction::Stopping {
                    *status = Status::Stopping;
                }
                if let Slot::Full(instr) = pipe.take(Stage::Id) {
                    match fp_unit {
                        Some(_) => fp_pipe.issue(instr),
                        None => pipe.set(Stage::Ex, Slot::Full(instr)),
                    }
                }
                IdOutcome::Dispatched
            }
        }
    }

    /// IF stage: move the fetched instruction to ID and fetch at the PC.
    /// Returns true when a breakpoint surfaced.
    fn step_if(&mut self, mem: &mut Memory) -> bool {
        if self.status != Status::Running {
            self.pipe.set(Stage::Id, Slot::Bubble);
            return false;
        }
        let mut breaking = false;
        if let Slot::Full(instr) = self.pipe.get_mut(Stage::If) {
            breaking = instr.stage_if();
        }
        let fetched = self.pipe.take(Stage::If);
        self.pipe.set(Stage::Id, fetched);
        self.pipe.set(Stage::If, mem.fetch(self.pc));
        self.old_pc = self.pc;
        self.pc += 4;
        breaking
    }

    /// Unwinds a taken branch decided in ID.
    ///
    /// The stale instruction in IF runs its IF behavior (a `break` there is
    /// ignored), then is either replaced by the branch target (flush semantics)
    /// or retained for execution (delayed branches). The branch itself moves to
    /// EX and fetch resumes from the target.
    fn handle_jump(&mut self, mem: &mut Memory) {
        if let Slot::Full(instr) = self.pipe.get_mut(Stage::If) {
            let _ = instr.stage_if();
        }
        let branch = self.pipe.take(Stage::Id);
        if self.config.pipeline.delayed_branches {
            let shadow = self.pipe.take(Stage::If);
            self.pipe.set(Stage::Ex, branch);
            self.pipe.set(Stage::Id, shadow);
        } else {
            self.pipe.set(Stage::Ex, branch);
            self.pipe.set(Stage::Id, Slot::Bubble);
        }
        self.pipe.set(Stage::If, mem.fetch(self.pc));
        self.old_pc = self.pc;
        self.pc += 4;
        if self.config.general.trace {
            eprintln!(">> JUMP: fetching from {:#x}", self.old_pc);
        }
    }

    /// Copies the FP exception enables and rounding mode from the
    /// configuration into the FCSR.
    fn sync_fcsr(&mut self) {
        let fpu = &self.config.fpu;
        self.fcsr
            .set_enabled(FpExceptionKind::InvalidOperation, fpu.invalid_operation);
        self.fcsr.set_enabled(FpExceptionKind::Overflow, fpu.overflow);
        self.fcsr.set_enabled(FpExceptionKind::Underflow, fpu.underflow);
        self.fcsr
            .set_enabled(FpExceptionKind::DivideByZero, fpu.divide_by_zero);
        self.fcsr.set_rounding(fpu.rounding);
    }

    /// Routes a synchronous exception through the masked/terminate policy.
    fn dispose_exception(
        config: &Config,
        code: ExceptionCode,
    ) -> Result<Option<ExceptionCode>, SimError> {
        if config.exceptions.masked {
            return Ok(None);
        }
        if config.exceptions.terminate {
            return Err(SimError::SyncException(code));
        }
        Ok(Some(code))
    }

    fn trace_cycle(&self) {
        let name = |stage: Stage| -> &str {
            match self.pipe.get(stage) {
                Slot::Empty => "-",
                Slot::Bubble => "bubble",
                Slot::Full(instr) => instr.name(),
            }
        };
        eprintln!(
            "[cycle {}] IF={} ID={} EX={} MEM={} WB={}",
            self.stats.cycles,
            name(Stage::If),
            name(Stage::Id),
            name(Stage::Ex),
            name(Stage::Mem),
            name(Stage::Wb),
        );
    }
}
