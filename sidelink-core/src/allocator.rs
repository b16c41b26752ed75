//! Resource allocator — candidate set to transmission plan.
//!
//! One entry point, [`allocate`], switching on a [`SelectionMode`]:
//!
//! | Mode | Slot subset | Sub-band start |
//! |------|-------------|----------------|
//! | `UniformRandom` | `max_repeats` drawn without replacement | random contiguous start |
//! | `Overwrite` | instructed offsets, random top-up | instructed, random top-up |
//! | `Fallback` | `target_tx` drawn, free slots preferred | random contiguous start |
//!
//! After the subset is fixed the grant is sized one sub-band at a time until
//! the transport block covers the buffer plus the SCI 2-A overhead, bounded
//! by the narrowest contiguous free run across the chosen slots.

use rand::Rng;
use tracing::{debug, info};

use crate::amc::tb_size_bytes;
use crate::availability::{analyze, SubBandAvailability};
use crate::constants::{RV_SEQUENCE, SCI2A_OVERHEAD_BYTES};
use crate::errors::SchedError;
use crate::types::{
    AllocationRequest, LcGrant, RlcPduInfo, SlotAlloc, SlotInfo, TransmissionPlan,
};

/// One externally chosen (slot offset, sub-band) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPick {
    /// Index into the candidate set.
    pub offset: u8,
    /// Starting sub-band.
    pub sub_band: u8,
}

/// Slot-subset selection strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionMode {
    /// Draw `max_repeats` slots uniformly without replacement.
    UniformRandom,
    /// Use the external policy's picks; fill up randomly once they run out.
    Overwrite { total_tx: u8, picks: Vec<SlotPick> },
    /// External policy chose only how many transmissions to make.
    Fallback { target_tx: u8 },
}

/// Build a transmission plan for `request` over `candidates`.
///
/// Returns `Ok(None)` when the buffer is empty. The number of transmissions
/// never exceeds `request.max_repeats`.
///
/// # Errors
/// `SchedError::Instruction` when overwrite picks point outside the
/// candidate set or the channel, or an instructed count is zero.
/// `SchedError::Config` for an MCS outside table 1.
///
/// # Panics
/// When `candidates` is empty. Callers short-circuit on an empty candidate
/// set before reaching the allocator.
pub fn allocate<R: Rng + ?Sized>(
    candidates: &[SlotInfo],
    request: &AllocationRequest,
    mode: &SelectionMode,
    total_sub_bands: u8,
    rng: &mut R,
) -> Result<Option<TransmissionPlan>, SchedError> {
    let lc = request.logical_channel;
    if lc.buffer_bytes == 0 {
        return Ok(None);
    }
    assert!(
        !candidates.is_empty(),
        "allocator received an empty candidate set"
    );

    // Step 1: slot subset, paired with explicit starts in overwrite mode.
    let (selected, explicit_starts) = match mode {
        SelectionMode::UniformRandom => {
            (select_uniform(candidates, request.max_repeats, rng), None)
        }
        SelectionMode::Overwrite { total_tx, picks } => {
            let total_tx = instructed_count(*total_tx, request.max_repeats)?;
            let (slots, starts) =
                select_instructed(candidates, total_tx, picks, total_sub_bands, rng)?;
            (slots, Some(starts))
        }
        SelectionMode::Fallback { target_tx } => {
            let target = instructed_count(*target_tx, request.max_repeats)?;
            (
                select_preferring_free(candidates, target, total_sub_bands, rng),
                None,
            )
        }
    };
    assert!(
        !selected.is_empty(),
        "scheduler must select at least one slot from the candidate set"
    );

    // Step 2: bandwidth sizing.
    let avail = analyze(&selected, total_sub_bands);
    let symbols = u32::from(selected[0].pssch_sym_len);
    let sub_band_size = u32::from(selected[0].sub_band_size);
    let needed = lc.buffer_bytes.saturating_add(SCI2A_OVERHEAD_BYTES);
    let mut assigned = 0u8;
    let mut tbs;
    loop {
        assigned += 1;
        tbs = tb_size_bytes(request.mcs, sub_band_size * u32::from(assigned) * symbols)?;
        if tbs >= needed || assigned >= avail.min_contiguous_run {
            break;
        }
    }
    // The overhead only sized the grant; it is not logical-channel payload.
    let tb_size = tbs.saturating_sub(SCI2A_OVERHEAD_BYTES);
    debug!(
        assigned,
        tb_size,
        min_run = avail.min_contiguous_run,
        buffer = lc.buffer_bytes,
        "grant sized"
    );

    // Step 3: sub-band start per slot.
    let starts = match explicit_starts {
        Some(starts) => starts
            .into_iter()
            .map(|s| s.min(total_sub_bands.saturating_sub(assigned)))
            .collect(),
        None => random_starts(&avail, assigned, total_sub_bands, rng),
    };

    // Step 4: plan emission.
    let count = selected.len();
    let mut entries = Vec::with_capacity(count);
    for (position, (slot, start)) in selected.iter().zip(starts).enumerate() {
        let per_reserve = usize::from(slot.max_num_per_reserve.max(1));
        let (carries_reservation, future_slots_indicated) = if position % per_reserve == 0 {
            let indicated = if position + per_reserve <= count {
                per_reserve
            } else {
                count - position
            };
            (true, indicated as u8)
        } else {
            // Without SCI 1-A no future transmission can be indicated.
            (false, 0)
        };

        entries.push(SlotAlloc {
            slot: slot.slot,
            dst_l2_id: request.dst_l2_id,
            priority: lc.priority,
            rlc_pdus: vec![RlcPduInfo {
                lcid: lc.lcid,
                size: tb_size,
            }],
            mcs: request.mcs,
            pscch_rbs: slot.pscch_rbs,
            pscch_sym_start: slot.pscch_sym_start,
            pscch_sym_len: slot.pscch_sym_len,
            pssch_sym_start: slot.pssch_sym_start,
            pssch_sym_len: selected[0].pssch_sym_len,
            sub_band_start: start,
            sub_band_len: assigned,
            max_num_per_reserve: slot.max_num_per_reserve,
            ndi: position == 0,
            rv: RV_SEQUENCE[position % RV_SEQUENCE.len()],
            carries_reservation,
            future_slots_indicated,
        });
    }

    info!(
        dst = request.dst_l2_id,
        transmissions = entries.len(),
        tb_size,
        sub_bands = assigned,
        "transmission plan built"
    );

    Ok(Some(TransmissionPlan {
        entries,
        tb_size_bytes: tb_size,
        assigned_sub_bands: assigned,
        grant: LcGrant {
            lcid: lc.lcid,
            bytes: tb_size,
        },
    }))
}

fn instructed_count(count: u8, max_repeats: u8) -> Result<u8, SchedError> {
    if count == 0 {
        return Err(SchedError::Instruction(
            "instructed transmission count is zero".into(),
        ));
    }
    Ok(count.min(max_repeats))
}

/// Uniform draw without replacement; result in timing order.
fn select_uniform<R: Rng + ?Sized>(candidates: &[SlotInfo], total: u8, rng: &mut R) -> Vec<SlotInfo> {
    let total = usize::from(total);
    if candidates.len() <= total {
        return candidates.to_vec();
    }
    let mut pool: Vec<usize> = (0..candidates.len()).collect();
    let mut chosen = Vec::with_capacity(total);
    while chosen.len() < total {
        let at = rng.gen_range(0..pool.len());
        chosen.push(pool.swap_remove(at));
    }
    chosen.sort_unstable();
    chosen.into_iter().map(|i| candidates[i].clone()).collect()
}

/// Uniform draw preferring slots with at least one free sub-band. Fully
/// occupied slots are only used when the rest cannot reach `total`.
fn select_preferring_free<R: Rng + ?Sized>(
    candidates: &[SlotInfo],
    total: u8,
    total_sub_bands: u8,
    rng: &mut R,
) -> Vec<SlotInfo> {
    let total = usize::from(total);
    if candidates.len() <= total {
        return candidates.to_vec();
    }
    let mut pool: Vec<usize> = (0..candidates.len()).collect();
    let mut chosen = Vec::with_capacity(total);
    let mut set_aside = Vec::new();
    while chosen.len() < total && !pool.is_empty() {
        let idx = pool.swap_remove(rng.gen_range(0..pool.len()));
        if candidates[idx].is_fully_occupied(total_sub_bands) {
            set_aside.push(idx);
        } else {
            chosen.push(idx);
        }
    }
    let missing = total - chosen.len();
    chosen.extend(set_aside.into_iter().take(missing));
    chosen.sort_unstable();
    chosen.into_iter().map(|i| candidates[i].clone()).collect()
}

/// Walk the candidate set at the instructed offsets, then top up with
/// random slots and random free sub-bands. Slots and sub-bands are sorted
/// together so each slot keeps its sub-band.
fn select_instructed<R: Rng + ?Sized>(
    candidates: &[SlotInfo],
    total_tx: u8,
    picks: &[SlotPick],
    total_sub_bands: u8,
    rng: &mut R,
) -> Result<(Vec<SlotInfo>, Vec<u8>), SchedError> {
    let total = usize::from(total_tx);
    for pick in picks {
        if usize::from(pick.offset) >= candidates.len() {
            return Err(SchedError::Instruction(format!(
                "slot offset {} outside candidate set of {}",
                pick.offset,
                candidates.len()
            )));
        }
        if pick.sub_band >= total_sub_bands {
            return Err(SchedError::Instruction(format!(
                "sub-band {} outside channel of {total_sub_bands}",
                pick.sub_band
            )));
        }
    }

    let mut chosen: Vec<(usize, u8)> = Vec::with_capacity(total);
    if candidates.len() > total {
        chosen.extend(
            picks
                .iter()
                .take(total)
                .map(|p| (usize::from(p.offset), p.sub_band)),
        );
        let mut pool: Vec<usize> = (0..candidates.len())
            .filter(|i| !chosen.iter().any(|(c, _)| c == i))
            .filter(|&i| !candidates[i].is_fully_occupied(total_sub_bands))
            .collect();
        while chosen.len() < total && !pool.is_empty() {
            let idx = pool.swap_remove(rng.gen_range(0..pool.len()));
            chosen.push((idx, random_free_sub_band(&candidates[idx], total_sub_bands, rng)));
        }
    } else {
        for (idx, slot) in candidates.iter().enumerate() {
            let sub_band = match picks.get(idx) {
                Some(p) => p.sub_band,
                None => random_free_sub_band(slot, total_sub_bands, rng),
            };
            chosen.push((idx, sub_band));
        }
    }

    chosen.sort_unstable();
    chosen.dedup_by_key(|(idx, _)| *idx);
    debug!(picks = picks.len(), selected = chosen.len(), "instructed selection");
    Ok(chosen
        .into_iter()
        .map(|(idx, sb)| (candidates[idx].clone(), sb))
        .unzip())
}

fn random_free_sub_band<R: Rng + ?Sized>(slot: &SlotInfo, total_sub_bands: u8, rng: &mut R) -> u8 {
    let free: Vec<u8> = (0..total_sub_bands)
        .filter(|sb| !slot.occupied_sub_bands.contains(sb))
        .collect();
    if free.is_empty() {
        rng.gen_range(0..total_sub_bands)
    } else {
        free[rng.gen_range(0..free.len())]
    }
}

/// Random start per slot such that `assigned` contiguous free sub-bands
/// follow it. Uniform over the valid starts of each slot.
fn random_starts<R: Rng + ?Sized>(
    avail: &SubBandAvailability,
    assigned: u8,
    total_sub_bands: u8,
    rng: &mut R,
) -> Vec<u8> {
    avail
        .free_per_slot
        .iter()
        .map(|free| {
            if avail.min_contiguous_run == total_sub_bands && assigned == 1 {
                return rng.gen_range(0..total_sub_bands);
            }
            let valid: Vec<u8> = (0..free.len())
                .filter(|&i| run_from(free, i) >= assigned)
                .map(|i| free[i])
                .collect();
            // assigned never exceeds the narrowest slot's longest run
            if valid.is_empty() {
                return free[0];
            }
            valid[rng.gen_range(0..valid.len())]
        })
        .collect()
}

/// Length of the consecutive run in `free` starting at position `at`.
fn run_from(free: &[u8], at: usize) -> u8 {
    let mut run = 1u8;
    for w in free[at..].windows(2) {
        if w[0].checked_add(1) != Some(w[1]) {
            break;
        }
        run += 1;
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogicalChannel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn window(n: u64) -> Vec<SlotInfo> {
        (0..n).map(|i| SlotInfo::free(100 + i, 10)).collect()
    }

    fn request(buffer: u32, max_repeats: u8) -> AllocationRequest {
        AllocationRequest {
            dst_l2_id: 255,
            mcs: 14,
            logical_channel: LogicalChannel {
                lcid: 4,
                priority: 1,
                buffer_bytes: buffer,
            },
            max_repeats,
        }
    }

    #[test]
    fn empty_buffer_allocates_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let plan = allocate(&window(10), &request(0, 2), &SelectionMode::UniformRandom, 5, &mut rng).unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn two_repeats_over_free_window() {
        let mut rng = StdRng::seed_from_u64(7);
        let plan = allocate(&window(10), &request(50, 2), &SelectionMode::UniformRandom, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.entries.len(), 2);
        assert!(plan.entries[0].ndi);
        assert!(!plan.entries[1].ndi);
        // max_num_per_reserve = 3: first entry announces both, second none
        assert!(plan.entries[0].carries_reservation);
        assert_eq!(plan.entries[0].future_slots_indicated, 2);
        assert!(!plan.entries[1].carries_reservation);
        assert_eq!(plan.entries[1].future_slots_indicated, 0);
        assert!(plan.entries[0].slot < plan.entries[1].slot);
        assert!(plan.tb_size_bytes >= 50);
        assert_eq!(plan.grant, LcGrant { lcid: 4, bytes: plan.tb_size_bytes });
    }

    #[test]
    fn rv_follows_sequence() {
        let mut rng = StdRng::seed_from_u64(3);
        let plan = allocate(&window(8), &request(20, 4), &SelectionMode::UniformRandom, 5, &mut rng)
            .unwrap()
            .unwrap();
        let rvs: Vec<u8> = plan.entries.iter().map(|e| e.rv).collect();
        assert_eq!(rvs, vec![0, 2, 3, 1]);
        // every third entry carries SCI 1-A, clipped to what remains
        let sci: Vec<(bool, u8)> = plan
            .entries
            .iter()
            .map(|e| (e.carries_reservation, e.future_slots_indicated))
            .collect();
        assert_eq!(sci, vec![(true, 3), (false, 0), (false, 0), (true, 1)]);
    }

    #[test]
    fn small_window_uses_every_slot() {
        let mut rng = StdRng::seed_from_u64(3);
        let win = window(1);
        let plan = allocate(&win, &request(20, 2), &SelectionMode::UniformRandom, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.slots(), vec![100]);
    }

    #[test]
    fn grant_grows_to_cover_buffer_within_min_run() {
        let mut win = window(4);
        // slot 1 only has a 3-wide free run
        win[1].occupied_sub_bands.extend([3, 4]);
        let mut rng = StdRng::seed_from_u64(11);
        let plan = allocate(&win, &request(5000, 4), &SelectionMode::UniformRandom, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.assigned_sub_bands, 3);
        let entry = plan.entries.iter().find(|e| e.slot == 101).unwrap();
        assert!(entry.sub_band_start + entry.sub_band_len <= 3);
    }

    #[test]
    fn random_start_fits_free_run() {
        let mut win = window(2);
        win[0].occupied_sub_bands.extend([0, 2]);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let plan = allocate(&win, &request(700, 2), &SelectionMode::UniformRandom, 5, &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(plan.assigned_sub_bands, 2);
            // slot 100 free: 1, 3, 4 -> only start 3 fits two sub-bands
            assert_eq!(plan.entries[0].sub_band_start, 3);
        }
    }

    #[test]
    fn overwrite_uses_instructed_picks_in_order() {
        let mut rng = StdRng::seed_from_u64(9);
        let mode = SelectionMode::Overwrite {
            total_tx: 2,
            picks: vec![
                SlotPick { offset: 12, sub_band: 7 },
                SlotPick { offset: 5, sub_band: 3 },
            ],
        };
        let plan = allocate(&window(20), &request(50, 2), &mode, 10, &mut rng)
            .unwrap()
            .unwrap();
        let got: Vec<(u64, u8)> = plan
            .entries
            .iter()
            .map(|e| (e.slot, e.sub_band_start))
            .collect();
        assert_eq!(got, vec![(105, 3), (112, 7)]);
    }

    #[test]
    fn overwrite_tops_up_when_picks_run_out() {
        let mut rng = StdRng::seed_from_u64(2);
        let mode = SelectionMode::Overwrite {
            total_tx: 3,
            picks: vec![SlotPick { offset: 0, sub_band: 1 }],
        };
        let plan = allocate(&window(10), &request(50, 3), &mode, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.entries.len(), 3);
        assert_eq!((plan.entries[0].slot, plan.entries[0].sub_band_start), (100, 1));
    }

    #[test]
    fn overwrite_offset_outside_window_rejected() {
        let mut rng = StdRng::seed_from_u64(2);
        let mode = SelectionMode::Overwrite {
            total_tx: 1,
            picks: vec![SlotPick { offset: 40, sub_band: 0 }],
        };
        let err = allocate(&window(10), &request(50, 2), &mode, 5, &mut rng).unwrap_err();
        assert!(matches!(err, SchedError::Instruction(_)));
    }

    #[test]
    fn overwrite_never_exceeds_max_repeats() {
        let mut rng = StdRng::seed_from_u64(2);
        let mode = SelectionMode::Overwrite {
            total_tx: 4,
            picks: vec![
                SlotPick { offset: 1, sub_band: 0 },
                SlotPick { offset: 2, sub_band: 0 },
                SlotPick { offset: 3, sub_band: 0 },
            ],
        };
        let plan = allocate(&window(10), &request(50, 2), &mode, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.slots(), vec![101, 102]);
    }

    #[test]
    fn fallback_prefers_slots_with_free_sub_bands() {
        let mut win = window(6);
        for (i, slot) in win.iter_mut().enumerate() {
            if i != 4 {
                slot.occupied_sub_bands.extend(0..5);
            }
        }
        let mut rng = StdRng::seed_from_u64(4);
        let plan = allocate(&win, &request(50, 2), &SelectionMode::Fallback { target_tx: 1 }, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.slots(), vec![104]);
    }

    #[test]
    fn fallback_zero_target_rejected() {
        let mut rng = StdRng::seed_from_u64(4);
        let err = allocate(&window(4), &request(50, 2), &SelectionMode::Fallback { target_tx: 0 }, 5, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SchedError::Instruction(_)));
    }

    #[test]
    #[should_panic(expected = "empty candidate set")]
    fn empty_candidates_panic() {
        let mut rng = StdRng::seed_from_u64(1);
        let _ = allocate(&[], &request(10, 2), &SelectionMode::UniformRandom, 5, &mut rng);
    }

    #[test]
    fn huge_buffer_is_capped_by_narrowest_run() {
        let mut rng = StdRng::seed_from_u64(12);
        let plan = allocate(&window(10), &request(u32::MAX - 1, 2), &SelectionMode::UniformRandom, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.assigned_sub_bands, 5);
        assert!(plan.tb_size_bytes < u32::MAX - 1);
        assert_eq!(plan.entries.len(), 2);
    }

    #[test]
    fn fully_occupied_slot_still_gets_a_start() {
        let mut win = window(1);
        win[0].occupied_sub_bands.extend(0..5);
        let mut rng = StdRng::seed_from_u64(6);
        let plan = allocate(&win, &request(50, 2), &SelectionMode::UniformRandom, 5, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(plan.assigned_sub_bands, 1);
        assert!(plan.entries[0].sub_band_start < 5);
    }

    #[test]
    fn run_from_counts_consecutive_values() {
        assert_eq!(run_from(&[1, 3, 4], 0), 1);
        assert_eq!(run_from(&[1, 3, 4], 1), 2);
        assert_eq!(run_from(&[0, 1, 2, 3, 4], 2), 3);
    }
}
