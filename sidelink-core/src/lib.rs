//! Sidelink Core — slot scheduling for a shared sidelink channel.
//!
//! Pure, deterministic building blocks of one scheduling opportunity.
//! Nothing in this crate performs IO; randomness is always injected by the
//! caller. The decision channel and the per-opportunity driver live in
//! `sidelink-handoff`.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`constants`] | Procedure constants and legacy field widths |
//! | [`errors`] | `SchedError` |
//! | [`types`] | Slots, reservations, plan entries |
//! | [`sensing`] | Sensing buffer and reservation projection |
//! | [`exclusion`] | RSRP-based candidate exclusion with threshold search |
//! | [`availability`] | Contiguous free sub-band analysis |
//! | [`amc`] | Transport block sizing |
//! | [`allocator`] | Candidate set → transmission plan |
//! | [`encoding`] | Legacy fixed-width decimal codec |
//! | [`protocol`] | Policy request/reply messages and binary frames |
//! | [`config`] | `SchedulerConfig` |
//!
//! # Flow
//!
//! ```text
//! window ──► exclusion ──► candidates ──► allocator ──► TransmissionPlan
//!               ▲                             ▲
//!         SensingBuffer               SelectionMode (random / policy)
//! ```

/// Scheduler constants — procedure values and legacy text widths.
pub mod constants;

/// Error types for sidelink-core operations.
pub mod errors;

/// Data model shared by every stage.
pub mod types;

/// Sensing buffer and reservation projection.
pub mod sensing;

/// Occupancy exclusion engine.
pub mod exclusion;

/// Sub-band availability analyzer.
pub mod availability;

/// Transport block sizing (MCS table 1).
pub mod amc;

/// Resource allocator.
pub mod allocator;

/// Legacy decimal codec for observations and instructions.
pub mod encoding;

/// Hand-off messages and binary frame layout.
pub mod protocol;

/// Scheduler configuration and validation.
pub mod config;

pub use allocator::{allocate, SelectionMode, SlotPick};
pub use config::{DecisionMode, SchedulerConfig};
pub use errors::SchedError;
pub use exclusion::{select_candidates, ExclusionOutcome, ExclusionParams, ExclusionStrategy};
pub use types::{SlotIndex, SlotInfo, TransmissionPlan};
