//! Error types for sidelink-core.
//!
//! One enum for the whole crate. Transient exhaustion (too few candidates)
//! is not an error: the exclusion engine relaxes its threshold and, at
//! saturation, returns an empty candidate set.
//!
//! Programming-contract violations (an empty candidate set reaching the
//! allocator) panic instead of returning one of these.

/// Unified error type for all sidelink-core operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// Setup invariant violated; fatal to the run.
    #[error("Config error: {0}")]
    Config(String),

    /// Hand-off encoding or decoding failure (text form or binary frame).
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Decoded external instructions cannot be applied to the candidate set.
    #[error("Instruction error: {0}")]
    Instruction(String),

    /// Sensing data rejected on ingestion.
    #[error("Sensing error: {0}")]
    Sensing(String),
}
