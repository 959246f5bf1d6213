//! Common types shared by every subsystem.

/// Bit-field extraction, insertion, and sign-extension helpers.
pub mod bits;
/// Error and outcome taxonomy for the simulation core.
pub mod error;
