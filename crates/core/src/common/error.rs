//! Error and outcome taxonomy for the simulation core.
//!
//! Three layers are distinguished:
//! 1. **Synchronous exceptions** ([`ExceptionCode`]) raised by stage behavior and
//!    routed through the masked/terminate configuration.
//! 2. **Step outcomes** ([`StepOutcome`]) — what a completed cycle reports back
//!    to the caller.
//! 3. **Hard errors** ([`SimError`]) — API misuse and terminate-mode exceptions
//!    that abort the run.

use std::fmt;

/// Synchronous exception codes raised by stage behavior during a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionCode {
    /// Signed overflow in a 32- or 64-bit checked add/subtract.
    IntegerOverflow,
    /// Integer division by zero.
    DivisionByZero,
    /// Data access outside the bounds of the data segment.
    AddressError(u64),
    /// Data access misaligned for its width.
    NotAligned(u64),
    /// Explicit trap (`syscall` with a non-zero code).
    Trap(u32),
    /// Floating-point invalid operation (enabled in the FCSR).
    FpInvalidOperation,
    /// Floating-point division by zero (enabled in the FCSR).
    FpDivideByZero,
    /// Floating-point overflow (enabled in the FCSR).
    FpOverflow,
    /// Floating-point underflow (enabled in the FCSR).
    FpUnderflow,
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::IntegerOverflow => write!(f, "IntegerOverflow"),
            ExceptionCode::DivisionByZero => write!(f, "DivisionByZero"),
            ExceptionCode::AddressError(addr) => write!(f, "AddressError({:#x})", addr),
            ExceptionCode::NotAligned(addr) => write!(f, "NotAligned({:#x})", addr),
            ExceptionCode::Trap(code) => write!(f, "Trap({})", code),
            ExceptionCode::FpInvalidOperation => write!(f, "FpInvalidOperation"),
            ExceptionCode::FpDivideByZero => write!(f, "FpDivideByZero"),
            ExceptionCode::FpOverflow => write!(f, "FpOverflow"),
            ExceptionCode::FpUnderflow => write!(f, "FpUnderflow"),
        }
    }
}

/// What a completed `step()` reports back to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Normal cycle, including internally-absorbed stall cycles.
    Ok,
    /// A `break` instruction reached the fetch/decode boundary; the cycle completed.
    Breakpoint,
    /// The pipeline drained after a terminating instruction; the CPU is halted.
    Halted,
    /// An unmasked synchronous exception occurred; the cycle completed first.
    SyncException(ExceptionCode),
}

/// Hard simulation errors: API misuse and terminate-mode exceptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimError {
    /// `step()` was called while the CPU was in `Ready` or `Halted`.
    StoppedCpu,
    /// A sub-word register write did not fit the signed range of its width.
    IrregularWrite { value: i64, bits: u32 },
    /// Unmasked synchronous exception with the terminate option set.
    SyncException(ExceptionCode),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::StoppedCpu => write!(f, "CPU is not running"),
            SimError::IrregularWrite { value, bits } => {
                write!(f, "value {} does not fit a signed {}-bit write", value, bits)
            }
            SimError::SyncException(code) => write!(f, "synchronous exception: {}", code),
        }
    }
}

impl std::error::Error for SimError {}
