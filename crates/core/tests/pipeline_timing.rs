//! End-to-end pipeline timing: cycle counts, RAW stalls, branch flushes,
//! and halt draining.

mod common;

use common::{forwarding, run, run_with};
use mips64_core::config::Config;
use mips64_core::core::Status;

#[test]
fn writes_to_r0_are_discarded() {
    let (sim, result) = run(
        ".code\n\
         addi r0, r0, 5\n\
         halt\n",
    );
    assert!(result.halted);
    assert_eq!(sim.cpu.stats.instructions, 2);
    assert_eq!(sim.snapshot().gpr[0], 0);
    assert_eq!(sim.cpu.stats.cycles, 6);
}

#[test]
fn raw_hazard_stalls_twice_without_forwarding() {
    let (sim, result) = run(
        ".code\n\
         addi r1, r0, 1\n\
         add r2, r1, r1\n\
         halt\n",
    );
    assert!(result.halted);
    assert_eq!(sim.cpu.stats.cycles, 9);
    assert_eq!(sim.cpu.stats.raw_stalls, 2);
    assert_eq!(sim.cpu.stats.instructions, 3);
    assert_eq!(sim.snapshot().gpr[2], 2);
}

#[test]
fn forwarding_removes_arithmetic_raw_stalls() {
    let (sim, result) = run_with(
        ".code\n\
         addi r1, r0, 1\n\
         add r2, r1, r1\n\
         halt\n",
        forwarding(),
    );
    assert!(result.halted);
    assert_eq!(sim.cpu.stats.cycles, 7);
    assert_eq!(sim.cpu.stats.raw_stalls, 0);
    assert_eq!(sim.snapshot().gpr[2], 2);
}

#[test]
fn load_use_still_stalls_once_with_forwarding() {
    let (sim, result) = run_with(
        ".data\n\
         x: .word64 7\n\
         .code\n\
         ld r1, x(r0)\n\
         add r2, r1, r1\n\
         halt\n",
        forwarding(),
    );
    assert!(result.halted);
    assert_eq!(sim.cpu.stats.raw_stalls, 1);
    assert_eq!(sim.cpu.stats.cycles, 8);
    assert_eq!(sim.snapshot().gpr[2], 14);
}

#[test]
fn load_use_stalls_twice_without_forwarding() {
    let (sim, result) = run(
        ".data\n\
         x: .word64 7\n\
         .code\n\
         ld r1, x(r0)\n\
         add r2, r1, r1\n\
         halt\n",
    );
    assert!(result.halted);
    assert_eq!(sim.cpu.stats.raw_stalls, 2);
    assert_eq!(sim.cpu.stats.cycles, 9);
    assert_eq!(sim.snapshot().gpr[2], 14);
}

#[test]
fn taken_branch_flushes_the_fetched_instruction() {
    let (sim, result) = run(
        ".code\n\
         j target\n\
         addi r1, r0, 1\n\
         target: addi r2, r0, 2\n\
         halt\n",
    );
    assert!(result.halted);
    let snap = sim.snapshot();
    assert_eq!(snap.gpr[1], 0, "the branch shadow must not execute");
    assert_eq!(snap.gpr[2], 2);
    assert_eq!(sim.cpu.stats.instructions, 3);
    assert_eq!(sim.cpu.stats.cycles, 8);
}

#[test]
fn delayed_branches_execute_the_shadow_instruction() {
    let mut config = Config::default();
    config.pipeline.delayed_branches = true;
    let (sim, result) = run_with(
        ".code\n\
         j target\n\
         addi r1, r0, 1\n\
         target: addi r2, r0, 2\n\
         halt\n",
        config,
    );
    assert!(result.halted);
    let snap = sim.snapshot();
    assert_eq!(snap.gpr[1], 1, "the delay slot must execute");
    assert_eq!(snap.gpr[2], 2);
}

#[test]
fn untaken_branch_does_not_flush() {
    let (sim, result) = run(
        ".code\n\
         addi r1, r0, 1\n\
         beq r0, r1, skip\n\
         addi r2, r0, 2\n\
         skip: halt\n",
    );
    assert!(result.halted);
    assert_eq!(sim.snapshot().gpr[2], 2);
}

#[test]
fn conditional_branch_taken_backwards() {
    // Counts r1 down from 3; r2 accumulates one per iteration.
    let (sim, result) = run(
        ".code\n\
         addi r1, r0, 3\n\
         loop: addi r2, r2, 1\n\
         addi r1, r1, -1\n\
         bnez r1, loop\n\
         halt\n",
    );
    assert!(result.halted);
    let snap = sim.snapshot();
    assert_eq!(snap.gpr[1], 0);
    assert_eq!(snap.gpr[2], 3);
}

#[test]
fn nothing_fetched_after_halt_decodes() {
    let (sim, result) = run(
        ".code\n\
         addi r1, r0, 1\n\
         halt\n\
         addi r2, r0, 9\n",
    );
    assert!(result.halted);
    let snap = sim.snapshot();
    assert_eq!(snap.gpr[1], 1);
    assert_eq!(snap.gpr[2], 0, "instructions after halt must not execute");
    assert_eq!(sim.cpu.stats.instructions, 2);
    assert_eq!(sim.cpu.status(), Status::Halted);
}

#[test]
fn jal_links_and_jr_returns() {
    let (sim, result) = run(
        ".code\n\
         jal sub\n\
         halt\n\
         sub: addi r1, r0, 7\n\
         jr r31\n",
    );
    assert!(result.halted);
    let snap = sim.snapshot();
    assert_eq!(snap.gpr[1], 7);
    assert_eq!(snap.gpr[31], 4, "link register holds the return address");
    assert_eq!(sim.cpu.stats.instructions, 4);
}

#[test]
fn stall_and_commit_counts_fit_in_cycles() {
    let (sim, result) = run(
        ".data\n\
         x: .word64 21\n\
         .code\n\
         ld r1, x(r0)\n\
         add r2, r1, r1\n\
         sub r3, r2, r1\n\
         halt\n",
    );
    assert!(result.halted);
    let stats = &sim.cpu.stats;
    assert!(
        stats.total_stalls() + stats.instructions <= stats.cycles,
        "a cycle commits at most one instruction"
    );
    assert_eq!(sim.snapshot().gpr[3], 21);
}

#[test]
fn mult_and_mfhi_mflo() {
    let (sim, result) = run(
        ".code\n\
         addi r1, r0, 6\n\
         addi r2, r0, 7\n\
         mult r1, r2\n\
         mflo r3\n\
         mfhi r4\n\
         halt\n",
    );
    assert!(result.halted);
    let snap = sim.snapshot();
    assert_eq!(snap.gpr[3], 42);
    assert_eq!(snap.gpr[4], 0);
    assert_eq!(snap.lo, 42);
}
