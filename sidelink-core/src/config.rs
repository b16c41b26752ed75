//! Scheduler configuration.
//!
//! Defaults reproduce the reference V2X scenario. Every field can be
//! overridden from JSON when the `serde` feature is on; missing fields
//! keep their defaults.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::amc::MAX_MCS;
use crate::errors::SchedError;
use crate::exclusion::{ExclusionParams, ExclusionStrategy};

/// Who picks the slot subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DecisionMode {
    /// Uniform random draw, no external policy.
    #[default]
    Random,
    /// An external policy returns overwrite or fallback instructions.
    External,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Sensing window T0 (ms).
    pub sensing_window_ms: u32,
    /// Selection window start, in slots after now.
    pub t1: u16,
    /// Selection window end, in slots after now.
    pub t2: u16,
    /// Initial RSRP exclusion threshold (dBm).
    pub rsrp_threshold_dbm: i32,
    /// Maximum transmissions per transport block.
    pub max_repeats: u8,
    /// Share of the window that must survive exclusion (percent).
    pub resource_percentage: u8,
    /// Own reservation period (ms).
    pub reservation_period_ms: u16,
    /// Slot duration is 1 ms / 2^numerology.
    pub numerology: u8,
    /// Resource blocks per sub-band.
    pub sub_band_size: u16,
    pub total_sub_bands: u8,
    pub reselection_counter: u16,
    pub projection_count: u16,
    /// Sensing processing delay (slots).
    pub tproc0_slots: u16,
    /// Fixed MCS index (table 1).
    pub mcs: u8,
    pub decision_mode: DecisionMode,
    /// Unset: whole-slot for random mode, per-sub-band for external mode.
    pub exclusion_strategy: Option<ExclusionStrategy>,
    pub operator_id: String,
    pub decision_type: String,
    /// Bounded wait for a policy reply (ms).
    pub reply_timeout_ms: u64,
    /// Mirror observations and instructions into legacy text files here.
    pub sideband_dir: Option<std::path::PathBuf>,
    /// Sensing buffer capacity (entries).
    pub sensing_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sensing_window_ms: 1100,
            t1: 2,
            t2: 33,
            rsrp_threshold_dbm: -128,
            max_repeats: 2,
            resource_percentage: 20,
            reservation_period_ms: 100,
            numerology: 2,
            sub_band_size: 10,
            total_sub_bands: 5,
            reselection_counter: 1,
            projection_count: 1,
            tproc0_slots: 1,
            mcs: 10,
            decision_mode: DecisionMode::Random,
            exclusion_strategy: None,
            operator_id: "111".into(),
            decision_type: "ORE".into(),
            reply_timeout_ms: 100,
            sideband_dir: None,
            sensing_capacity: 4096,
        }
    }
}

impl SchedulerConfig {
    /// Check setup invariants. Violations are fatal for the run.
    ///
    /// # Errors
    /// `SchedError::Config` naming the first violated rule.
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.total_sub_bands == 0 {
            return Err(SchedError::Config("total_sub_bands must be non-zero".into()));
        }
        if self.sub_band_size == 0 {
            return Err(SchedError::Config("sub_band_size must be non-zero".into()));
        }
        if self.t1 > self.t2 {
            return Err(SchedError::Config(format!(
                "t1 ({}) must not exceed t2 ({})",
                self.t1, self.t2
            )));
        }
        if self.numerology > 6 {
            return Err(SchedError::Config(format!(
                "numerology {} outside 0..=6",
                self.numerology
            )));
        }
        let window_ms = f64::from(u32::from(self.t2) - u32::from(self.t1) + 1) / f64::from(self.slots_per_ms());
        if window_ms > f64::from(self.reservation_period_ms) {
            return Err(SchedError::Config(format!(
                "selection window of {window_ms} ms is wider than the {} ms reservation period",
                self.reservation_period_ms
            )));
        }
        if self.resource_percentage == 0 || self.resource_percentage > 100 {
            return Err(SchedError::Config(format!(
                "resource_percentage {} outside (0, 100]",
                self.resource_percentage
            )));
        }
        if self.max_repeats == 0 {
            return Err(SchedError::Config("max_repeats must be non-zero".into()));
        }
        if self.mcs > MAX_MCS {
            return Err(SchedError::Config(format!("mcs {} above {MAX_MCS}", self.mcs)));
        }
        if u32::from(self.reservation_period_ms) * self.slots_per_ms() > u32::from(u16::MAX) {
            return Err(SchedError::Config(
                "reservation period does not fit in a u16 slot count".into(),
            ));
        }
        if self.operator_id.is_empty() || self.decision_type.is_empty() {
            return Err(SchedError::Config(
                "operator_id and decision_type must be non-empty".into(),
            ));
        }
        Ok(())
    }

    pub fn slots_per_ms(&self) -> u32 {
        1u32 << self.numerology.min(6)
    }

    /// Own reservation period in slots, saturating at `u16::MAX`.
    pub fn reservation_period_slots(&self) -> u16 {
        let slots = u32::from(self.reservation_period_ms) * self.slots_per_ms();
        u16::try_from(slots).unwrap_or(u16::MAX)
    }

    pub fn sensing_window_slots(&self) -> u64 {
        u64::from(self.sensing_window_ms) * u64::from(self.slots_per_ms())
    }

    pub fn target_yield(&self) -> f64 {
        f64::from(self.resource_percentage) / 100.0
    }

    pub fn effective_strategy(&self) -> ExclusionStrategy {
        self.exclusion_strategy.unwrap_or(match self.decision_mode {
            DecisionMode::Random => ExclusionStrategy::WholeSlot,
            DecisionMode::External => ExclusionStrategy::PerSubBand,
        })
    }

    pub fn exclusion_params(&self) -> ExclusionParams {
        ExclusionParams {
            initial_threshold_dbm: self.rsrp_threshold_dbm,
            target_yield: self.target_yield(),
            strategy: self.effective_strategy(),
            total_sub_bands: self.total_sub_bands,
            own_reservation_period_slots: self.reservation_period_slots(),
            reselection_counter: self.reselection_counter,
            projection_count: self.projection_count,
            tproc0_slots: self.tproc0_slots,
        }
    }
}
