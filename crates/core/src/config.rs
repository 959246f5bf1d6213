//! Configuration system for the MIPS64 simulator.
//!
//! This module defines all configuration structures and enums used to parameterize
//! the simulator. It provides:
//! 1. **Defaults:** Baseline behavior (no forwarding, flush-on-branch, exceptions enabled).
//! 2. **Structures:** Hierarchical config for general, pipeline, exception, and FPU settings.
//! 3. **Enums:** The FCSR rounding mode.
//!
//! Configuration is supplied as JSON (`--config` on the CLI) or built in code with
//! `Config::default()`.

use serde::Deserialize;

/// Default configuration constants for the simulator.
mod defaults {
    /// EX/MEM→EX forwarding for RAW resolution is off by default, so hazards
    /// are visible in their rawest form.
    pub const FORWARDING: bool = false;

    /// The instruction fetched after a taken branch is flushed by default;
    /// enabling delayed branches retains and executes it.
    pub const DELAYED_BRANCHES: bool = false;

    /// Synchronous exceptions are reported (not masked) by default.
    pub const SYNC_EXCEPTIONS_MASKED: bool = false;

    /// An unmasked synchronous exception completes the cycle and is surfaced;
    /// it does not terminate the run unless this is set.
    pub const SYNC_EXCEPTIONS_TERMINATE: bool = false;

    /// FP invalid-operation exception enable.
    pub const FP_INVALID_OPERATION: bool = true;

    /// FP overflow exception enable.
    pub const FP_OVERFLOW: bool = true;

    /// FP underflow exception enable.
    pub const FP_UNDERFLOW: bool = true;

    /// FP divide-by-zero exception enable.
    pub const FP_DIVIDE_BY_ZERO: bool = true;
}

/// FCSR rounding mode.
///
/// Exactly one mode is active at a time; it governs FP arithmetic results and
/// float-to-integer conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Rounding {
    /// Round to nearest, ties to even.
    #[default]
    Nearest,
    /// Round towards zero (truncate).
    TowardZero,
    /// Round up (towards positive infinity).
    TowardPlusInfinity,
    /// Round down (towards negative infinity).
    TowardMinusInfinity,
}

/// Root configuration structure containing all simulator settings.
///
/// # Examples
///
/// Creating a default configuration:
///
/// ```
/// use mips64_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.pipeline.forwarding, false);
/// assert_eq!(config.fpu.divide_by_zero, true);
/// ```
///
/// Deserializing from JSON:
///
/// ```
/// use mips64_core::config::{Config, Rounding};
///
/// let json = r#"{
///     "general": { "trace": false },
///     "pipeline": { "forwarding": true, "delayed_branches": false },
///     "exceptions": { "masked": false, "terminate": true },
///     "fpu": { "divide_by_zero": false, "rounding": "TowardZero" }
/// }"#;
///
/// let config: Config = serde_json::from_str(json).unwrap();
/// assert_eq!(config.pipeline.forwarding, true);
/// assert_eq!(config.exceptions.terminate, true);
/// assert_eq!(config.fpu.rounding, Rounding::TowardZero);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// General simulation settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Integer pipeline behavior.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Synchronous exception policy.
    #[serde(default)]
    pub exceptions: ExceptionConfig,
    /// FPU exception enables and rounding mode.
    #[serde(default)]
    pub fpu: FpuConfig,
}

/// General simulation settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneralConfig {
    /// Enable cycle/stage tracing to stderr.
    #[serde(default)]
    pub trace: bool,
}

/// Integer pipeline behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Enable EX/MEM→EX forwarding for RAW resolution.
    #[serde(default = "PipelineConfig::default_forwarding")]
    pub forwarding: bool,

    /// Execute the instruction in the branch shadow instead of flushing it.
    #[serde(default = "PipelineConfig::default_delayed_branches")]
    pub delayed_branches: bool,
}

impl PipelineConfig {
    fn default_forwarding() -> bool {
        defaults::FORWARDING
    }

    fn default_delayed_branches() -> bool {
        defaults::DELAYED_BRANCHES
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            forwarding: defaults::FORWARDING,
            delayed_branches: defaults::DELAYED_BRANCHES,
        }
    }
}

/// Synchronous exception policy.
///
/// `masked` silently suppresses exceptions; `terminate` aborts the run on the
/// first unmasked exception. With both false, the cycle completes and the
/// exception is surfaced in the step outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct ExceptionConfig {
    /// Suppress synchronous exceptions silently.
    #[serde(default = "ExceptionConfig::default_masked")]
    pub masked: bool,

    /// Abort the run on an unmasked exception.
    #[serde(default = "ExceptionConfig::default_terminate")]
    pub terminate: bool,
}

impl ExceptionConfig {
    fn default_masked() -> bool {
        defaults::SYNC_EXCEPTIONS_MASKED
    }

    fn default_terminate() -> bool {
        defaults::SYNC_EXCEPTIONS_TERMINATE
    }
}

impl Default for ExceptionConfig {
    fn default() -> Self {
        Self {
            masked: defaults::SYNC_EXCEPTIONS_MASKED,
            terminate: defaults::SYNC_EXCEPTIONS_TERMINATE,
        }
    }
}

/// FPU exception enables and rounding mode.
///
/// A disabled FP exception sets the corresponding FCSR flag and produces the
/// IEEE default result instead of raising a synchronous exception.
#[derive(Debug, Clone, Deserialize)]
pub struct FpuConfig {
    /// Raise a synchronous exception on invalid FP operations.
    #[serde(default = "FpuConfig::default_invalid_operation")]
    pub invalid_operation: bool,

    /// Raise a synchronous exception on FP overflow.
    #[serde(default = "FpuConfig::default_overflow")]
    pub overflow: bool,

    /// Raise a synchronous exception on FP underflow.
    #[serde(default = "FpuConfig::default_underflow")]
    pub underflow: bool,

    /// Raise a synchronous exception on FP division by zero.
    #[serde(default = "FpuConfig::default_divide_by_zero")]
    pub divide_by_zero: bool,

    /// Active rounding mode.
    #[serde(default)]
    pub rounding: Rounding,
}

impl FpuConfig {
    fn default_invalid_operation() -> bool {
        defaults::FP_INVALID_OPERATION
    }

    fn default_overflow() -> bool {
        defaults::FP_OVERFLOW
    }

    fn default_underflow() -> bool {
        defaults::FP_UNDERFLOW
    }

    fn default_divide_by_zero() -> bool {
        defaults::FP_DIVIDE_BY_ZERO
    }
}

impl Default for FpuConfig {
    fn default() -> Self {
        Self {
            invalid_operation: defaults::FP_INVALID_OPERATION,
            overflow: defaults::FP_OVERFLOW,
            underflow: defaults::FP_UNDERFLOW,
            divide_by_zero: defaults::FP_DIVIDE_BY_ZERO,
            rounding: Rounding::default(),
        }
    }
}
