//! MIPS64 Floating-Point Register File.
//!
//! Mirrors the general-purpose file (32 64-bit registers with a pending-writer
//! count), with one addition: a per-register WAW count maintained by the FP
//! pipe. Because FP instructions retire out of issue order across the adder,
//! multiplier, and divider, a second in-flight write to the same destination
//! must stall at decode.

/// Floating-point register file.
#[derive(Clone)]
pub struct Fpr {
    regs: [u64; 32],
    writers: [u8; 32],
    waw: [u8; 32],
}

impl Default for Fpr {
    fn default() -> Self {
        Self::new()
    }
}

impl Fpr {
    /// Creates a register file with all registers zeroed.
    pub fn new() -> Self {
        Self {
            regs: [0; 32],
            writers: [0; 32],
            waw: [0; 32],
        }
    }

    /// Reads the raw 64-bit pattern of a register.
    pub fn read(&self, idx: usize) -> u64 {
        self.regs[idx]
    }

    /// Reads a register as an IEEE 754 double.
    pub fn read_double(&self, idx: usize) -> f64 {
        f64::from_bits(self.regs[idx])
    }

    /// Writes a raw 64-bit pattern.
    pub fn write(&mut self, idx: usize, val: u64) {
        self.regs[idx] = val;
    }

    /// Writes an IEEE 754 double.
    pub fn write_double(&mut self, idx: usize, val: f64) {
        self.regs[idx] = val.to_bits();
    }

    /// True while an in-flight instruction will write this register.
    pub fn busy(&self, idx: usize) -> bool {
        self.writers[idx] > 0
    }

    /// Registers an in-flight writer.
    pub fn add_writer(&mut self, idx: usize) {
        self.writers[idx] += 1;
    }

    /// Retires an in-flight writer.
    pub fn release_writer(&mut self, idx: usize) {
        self.writers[idx] = self.writers[idx].saturating_sub(1);
    }

    /// True while an in-flight FP arithmetic targets this register.
    pub fn waw_busy(&self, idx: usize) -> bool {
        self.waw[idx] > 0
    }

    /// Registers an in-flight FP arithmetic write for WAW tracking.
    pub fn add_waw(&mut self, idx: usize) {
        self.waw[idx] += 1;
    }

    /// Retires an in-flight FP arithmetic write.
    pub fn release_waw(&mut self, idx: usize) {
        self.waw[idx] = self.waw[idx].saturating_sub(1);
    }

    /// Snapshot of all register values.
    pub fn dump(&self) -> [u64; 32] {
        self.regs
    }

    /// Zeroes all registers and counters.
    pub fn reset(&mut self) {
        self.regs = [0; 32];
        self.writers = [0; 32];
        self.waw = [0; 32];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_roundtrip() {
        let mut fpr = Fpr::new();
        fpr.write_double(3, -2.5);
        assert_eq!(fpr.read_double(3), -2.5);
        assert_eq!(fpr.read(3), (-2.5f64).to_bits());
    }

    #[test]
    fn test_waw_independent_of_writers() {
        let mut fpr = Fpr::new();
        fpr.add_writer(4);
        assert!(fpr.busy(4));
        assert!(!fpr.waw_busy(4));
        fpr.add_waw(4);
        assert!(fpr.waw_busy(4));
        fpr.release_writer(4);
        assert!(!fpr.busy(4));
        assert!(fpr.waw_busy(4));
    }
}
