//! MIPS64 General-Purpose Register File.
//!
//! This module implements the General-Purpose Register (GPR) file. It performs
//! the following:
//! 1. **Storage:** Maintains 32 integer registers (`r0`-`r31`).
//! 2. **Invariant Enforcement:** Register `r0` is hardwired to zero; writes to it
//!    are silently discarded.
//! 3. **Hazard Tracking:** Carries a per-register pending-writer count used by
//!    the decode stage for RAW detection.

use crate::common::bits::fits_signed;
use crate::common::error::SimError;

/// General-Purpose Register file.
///
/// Contains 32 general-purpose 64-bit registers. Register `r0` is hardwired to
/// zero, cannot be modified, and never counts pending writers.
#[derive(Clone)]
pub struct Gpr {
    regs: [u64; 32],
    writers: [u8; 32],
}

impl Default for Gpr {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpr {
    /// Creates a register file with all registers zeroed.
    pub fn new() -> Self {
        Self {
            regs: [0; 32],
            writers: [0; 32],
        }
    }

    /// Reads a register value. Register `r0` always returns 0.
    pub fn read(&self, idx: usize) -> u64 {
        if idx == 0 { 0 } else { self.regs[idx] }
    }

    /// Writes a 64-bit value. Writes to `r0` are discarded.
    pub fn write(&mut self, idx: usize, val: u64) {
        if idx != 0 {
            self.regs[idx] = val;
        }
    }

    /// Writes a sign-extended word, failing when the value overflows the
    /// signed 32-bit range.
    pub fn write_word(&mut self, idx: usize, val: i64) -> Result<(), SimError> {
        if !fits_signed(val, 32) {
            return Err(SimError::IrregularWrite { value: val, bits: 32 });
        }
        self.write(idx, val as u64);
        Ok(())
    }

    /// Writes a sign-extended half word, failing when the value overflows the
    /// signed 16-bit range.
    pub fn write_half(&mut self, idx: usize, val: i64) -> Result<(), SimError> {
        if !fits_signed(val, 16) {
            return Err(SimError::IrregularWrite { value: val, bits: 16 });
        }
        self.write(idx, val as u64);
        Ok(())
    }

    /// Writes a sign-extended byte, failing when the value overflows the
    /// signed 8-bit range.
    pub fn write_byte(&mut self, idx: usize, val: i64) -> Result<(), SimError> {
        if !fits_signed(val, 8) {
            return Err(SimError::IrregularWrite { value: val, bits: 8 });
        }
        self.write(idx, val as u64);
        Ok(())
    }

    /// True while an in-flight instruction will write this register.
    /// `r0` is never busy.
    pub fn busy(&self, idx: usize) -> bool {
        idx != 0 && self.writers[idx] > 0
    }

    /// Registers an in-flight writer. No-op for `r0`.
    pub fn add_writer(&mut self, idx: usize) {
        if idx != 0 {
            self.writers[idx] += 1;
        }
    }

    /// Retires an in-flight writer. No-op for `r0`.
    pub fn release_writer(&mut self, idx: usize) {
        if idx != 0 {
            self.writers[idx] = self.writers[idx].saturating_sub(1);
        }
    }

    /// Snapshot of all register values.
    pub fn dump(&self) -> [u64; 32] {
        let mut out = self.regs;
        out[0] = 0;
        out
    }

    /// Zeroes all registers and writer counts.
    pub fn reset(&mut self) {
        self.regs = [0; 32];
        self.writers = [0; 32];
    }
}
