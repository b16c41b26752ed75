//! Error types for sidelink-handoff.
//!
//! `Timeout` is the only recoverable variant: the scheduler driver
//! degrades to uniform-random selection. Everything else is fatal to the
//! current decision.

use sidelink_core::SchedError;

use crate::channel::Phase;

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    /// No reply within the configured bound.
    #[error("Timeout error: no reply to request {request_id} within {waited_ms} ms")]
    Timeout { request_id: u32, waited_ms: u64 },

    /// Phase machine asked for an illegal transition.
    #[error("Phase error: cannot move from {from:?} to {to:?}")]
    InvalidPhase { from: Phase, to: Phase },

    /// Another live channel already owns this (decision type, operator) pair.
    #[error("Channel error: {0} is already claimed")]
    ChannelInUse(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Frame arrived but cannot be used (bad header, wrong direction, wrong operation).
    #[error("Frame error: {0}")]
    Frame(String),

    #[error(transparent)]
    Core(#[from] SchedError),
}

impl HandoffError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
