//! Occupancy exclusion engine — sensing-based candidate filtering.
//!
//! Given the candidate window and the sensed reservations of other
//! terminals, predict which candidate slots (or sub-bands) will collide
//! and exclude them. When exclusion leaves fewer than the target yield of
//! the window, the RSRP threshold is relaxed by 3 dB and the whole pass is
//! redone from the unfiltered window. Past 0 dBm the channel is saturated
//! and the result is empty.
//!
//! ## Working set
//! The caller's window is treated as an immutable arena. Each pass builds
//! fresh working copies addressed by arena index, so no pass can observe
//! marks left by an earlier one and the caller's slots are never touched.

use tracing::{debug, warn};

use crate::constants::{
    MAX_THRESHOLD_DBM, OBSERVATION_SLOT_MODULO, THRESHOLD_STEP_DB,
};
use crate::sensing::{project_future, ProjectedTx, SensingBuffer};
use crate::types::{Observation, SlotIndex, SlotInfo};

/// How a predicted collision is turned into an exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExclusionStrategy {
    /// Mark the reservation's whole span; drop the slot once it is fully
    /// occupied and the triggering reservation is above threshold.
    WholeSlot,
    /// Accumulate power per sub-band and mark only sub-bands whose summed
    /// power is above threshold. Slots stay in the candidate set.
    PerSubBand,
}

/// Inputs of one exclusion run besides the window and the sensing buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionParams {
    /// Starting RSRP threshold (dBm).
    pub initial_threshold_dbm: i32,
    /// Fraction of the window that must survive, in (0, 1].
    pub target_yield: f64,
    pub strategy: ExclusionStrategy,
    pub total_sub_bands: u8,
    /// Our own reservation period, used to project candidate reuse.
    pub own_reservation_period_slots: u16,
    /// How many of our own future reservations are checked per candidate.
    pub reselection_counter: u16,
    /// How many future repeats are projected per sensed reservation.
    pub projection_count: u16,
    /// Reservations sensed within this many slots of `now` are ignored.
    pub tproc0_slots: u16,
}

/// Result of [`select_candidates`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionOutcome {
    /// Filtered candidates in timing order.
    pub candidates: Vec<SlotInfo>,
    /// Threshold the returned set was produced with.
    pub final_threshold_dbm: i32,
    /// Exclusion events in the returned pass (slots for
    /// [`ExclusionStrategy::WholeSlot`], sub-bands for
    /// [`ExclusionStrategy::PerSubBand`]).
    pub excluded_count: u32,
    /// Number of passes run; zero when no sensing data applied.
    pub passes: u32,
    /// Threshold search hit the ceiling; `candidates` is empty.
    pub saturated: bool,
    /// Non-corrupt reservations that overlapped a candidate in the first pass.
    pub observations: Vec<Observation>,
}

struct PassResult {
    kept: Vec<SlotInfo>,
    usable: usize,
    excluded: u32,
}

/// Filter `window` against the sensed reservations in `sensing`.
///
/// The output keeps the input's slot order. With no applicable sensing data
/// the window is returned unfiltered.
pub fn select_candidates(
    window: &[SlotInfo],
    sensing: &SensingBuffer,
    params: &ExclusionParams,
    now: SlotIndex,
) -> ExclusionOutcome {
    debug_assert!(params.target_yield > 0.0 && params.target_yield <= 1.0);

    let sensed = sensing.snapshot(now, params.tproc0_slots);
    if window.is_empty() || sensed.is_empty() {
        return ExclusionOutcome {
            candidates: window.to_vec(),
            final_threshold_dbm: params.initial_threshold_dbm,
            excluded_count: 0,
            passes: 0,
            saturated: false,
            observations: Vec::new(),
        };
    }

    let projected: Vec<Vec<ProjectedTx>> = sensed
        .iter()
        .map(|r| project_future(r, params.projection_count))
        .collect();

    let required = params.target_yield * window.len() as f64;
    let mut threshold = params.initial_threshold_dbm;
    let mut observations = Vec::new();
    let mut passes = 0u32;

    loop {
        passes += 1;
        let obs = if passes == 1 { Some(&mut observations) } else { None };
        let pass = run_pass(window, &projected, params, threshold, obs);
        debug!(
            pass = passes,
            threshold_dbm = threshold,
            usable = pass.usable,
            total = window.len(),
            excluded = pass.excluded,
            "exclusion pass"
        );

        if pass.usable as f64 >= required {
            return ExclusionOutcome {
                candidates: pass.kept,
                final_threshold_dbm: threshold,
                excluded_count: pass.excluded,
                passes,
                saturated: false,
                observations,
            };
        }

        if threshold + THRESHOLD_STEP_DB > MAX_THRESHOLD_DBM {
            warn!(
                threshold_dbm = threshold,
                "RSRP threshold ceiling reached, no resources selectable"
            );
            return ExclusionOutcome {
                candidates: Vec::new(),
                final_threshold_dbm: threshold,
                excluded_count: pass.excluded,
                passes,
                saturated: true,
                observations,
            };
        }
        threshold += THRESHOLD_STEP_DB;
    }
}

fn run_pass(
    arena: &[SlotInfo],
    projected: &[Vec<ProjectedTx>],
    params: &ExclusionParams,
    threshold: i32,
    mut observations: Option<&mut Vec<Observation>>,
) -> PassResult {
    let total = params.total_sub_bands;
    let own_period = u64::from(params.own_reservation_period_slots);
    let reuse = u64::from(params.reselection_counter.max(1));

    let mut kept = Vec::with_capacity(arena.len());
    let mut usable = 0usize;
    let mut excluded = 0u32;

    for candidate in arena {
        let mut working = candidate.clone();
        let futures: Vec<SlotIndex> = (0..reuse).map(|i| candidate.slot + i * own_period).collect();
        // linear power per (own future, sub-band)
        let mut power_mw = vec![vec![0.0f64; usize::from(total)]; futures.len()];
        let mut erased = false;

        'sensed: for txs in projected {
            for (fi, &future_slot) in futures.iter().enumerate() {
                for tx in txs.iter().filter(|tx| tx.slot == future_slot) {
                    if !tx.corrupt {
                        if let Some(obs) = observations.as_deref_mut() {
                            obs.push(Observation {
                                src_id: tx.src_id,
                                retx_counter: tx.retx_counter,
                                slot: (future_slot % OBSERVATION_SLOT_MODULO) as u8,
                                sub_band: tx.sub_band_start,
                            });
                        }
                    }
                    let sub_bands = span(tx, total);
                    match params.strategy {
                        ExclusionStrategy::WholeSlot => {
                            working.occupied_sub_bands.extend(sub_bands);
                            if working.is_fully_occupied(total) && tx.rsrp_dbm > f64::from(threshold) {
                                debug!(
                                    slot = candidate.slot,
                                    rsrp_dbm = tx.rsrp_dbm,
                                    threshold_dbm = threshold,
                                    "slot excluded"
                                );
                                erased = true;
                                excluded += 1;
                                break 'sensed;
                            }
                        }
                        ExclusionStrategy::PerSubBand => {
                            let linear = 10f64.powf(tx.rsrp_dbm / 10.0);
                            for sb in sub_bands {
                                let acc = &mut power_mw[fi][usize::from(sb)];
                                *acc += linear;
                                if 10.0 * acc.log10() > f64::from(threshold)
                                    && working.occupied_sub_bands.insert(sb)
                                {
                                    excluded += 1;
                                }
                            }
                        }
                    }
                }
            }
        }

        if erased {
            continue;
        }
        if !working.is_fully_occupied(total) {
            usable += 1;
        }
        kept.push(working);
    }

    if params.strategy == ExclusionStrategy::WholeSlot {
        usable = kept.len();
    }
    PassResult {
        kept,
        usable,
        excluded,
    }
}

/// Sub-band span of a projected transmission, clipped to the channel.
fn span(tx: &ProjectedTx, total: u8) -> impl Iterator<Item = u8> {
    let end = tx.sub_band_start.saturating_add(tx.sub_band_len).min(total);
    tx.sub_band_start..end
}
