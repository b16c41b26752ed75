//! Sub-band availability analysis over a candidate set.
//!
//! Bounds how wide a single allocation can be made uniformly across every
//! slot of the set, and keeps each slot's free indices for picking a start
//! offset later.

use crate::types::SlotInfo;

/// Free sub-bands of a slot set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBandAvailability {
    /// Minimum over slots of the longest contiguous free run.
    pub min_contiguous_run: u8,
    /// Ascending free sub-band indices, one list per slot, in input order.
    pub free_per_slot: Vec<Vec<u8>>,
}

/// Analyze `slots` against a channel of `total_sub_bands` sub-bands.
///
/// A slot whose sub-bands are all occupied is treated as entirely free:
/// exclusion may legitimately hand over such slots once the RSRP threshold
/// has been relaxed, and they remain usable at higher collision risk.
pub fn analyze(slots: &[SlotInfo], total_sub_bands: u8) -> SubBandAvailability {
    let mut min_run = total_sub_bands;
    let mut free_per_slot = Vec::with_capacity(slots.len());

    for slot in slots {
        let mut free: Vec<u8> = (0..total_sub_bands)
            .filter(|sb| !slot.occupied_sub_bands.contains(sb))
            .collect();
        if free.is_empty() {
            free = (0..total_sub_bands).collect();
        }
        min_run = min_run.min(max_contiguous_run(&free));
        free_per_slot.push(free);
    }

    SubBandAvailability {
        min_contiguous_run: min_run,
        free_per_slot,
    }
}

/// Longest run of consecutive values in an ascending index list.
/// Runs do not wrap around the channel edge.
pub fn max_contiguous_run(indices: &[u8]) -> u8 {
    let mut best = 0u8;
    let mut run = 0u8;
    let mut prev: Option<u8> = None;
    for &idx in indices {
        run = match prev {
            Some(p) if p.checked_add(1) == Some(idx) => run + 1,
            _ => 1,
        };
        best = best.max(run);
        prev = Some(idx);
    }
    best
}
