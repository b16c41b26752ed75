//! Scheduler data model.
//!
//! Slots are produced fresh by the lower layer each scheduling
//! opportunity, marked by the exclusion engine, and consumed by the
//! allocator into plan entries. Nothing here outlives one opportunity
//! except sensed reservations, which live in the
//! [`SensingBuffer`](crate::sensing::SensingBuffer).

use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Absolute, monotonically increasing slot index.
pub type SlotIndex = u64;

/// One candidate transmission opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotInfo {
    /// Absolute slot index.
    pub slot: SlotIndex,
    /// Sub-band indices already known to be occupied.
    pub occupied_sub_bands: BTreeSet<u8>,
    /// Resource blocks used by the control channel.
    pub pscch_rbs: u16,
    /// First control-channel symbol.
    pub pscch_sym_start: u16,
    /// Control-channel symbol count.
    pub pscch_sym_len: u16,
    /// First data-channel symbol.
    pub pssch_sym_start: u16,
    /// Data-channel symbol count.
    pub pssch_sym_len: u16,
    /// Resource blocks per sub-band.
    pub sub_band_size: u16,
    /// Maximum number of reserved transmissions one SCI 1-A may indicate.
    pub max_num_per_reserve: u16,
}

impl SlotInfo {
    /// A slot with every sub-band free and typical NR sidelink timing.
    pub fn free(slot: SlotIndex, sub_band_size: u16) -> Self {
        Self {
            slot,
            occupied_sub_bands: BTreeSet::new(),
            pscch_rbs: 10,
            pscch_sym_start: 1,
            pscch_sym_len: 3,
            pssch_sym_start: 1,
            pssch_sym_len: 12,
            sub_band_size,
            max_num_per_reserve: 3,
        }
    }

    /// True once every sub-band of the channel is marked occupied.
    pub fn is_fully_occupied(&self, total_sub_bands: u8) -> bool {
        self.occupied_sub_bands.len() >= usize::from(total_sub_bands)
    }
}

/// One reservation announcement sensed from another terminal.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensedReservation {
    /// Transmitting terminal.
    pub src_id: u16,
    /// Retransmission counter announced by the sender.
    pub retx_counter: u8,
    /// Absolute slot the announcement was received in.
    pub slot: SlotIndex,
    /// First reserved sub-band.
    pub sub_band_start: u8,
    /// Number of reserved sub-bands.
    pub sub_band_len: u8,
    /// Measured received power (dBm).
    pub rsrp_dbm: f64,
    /// Payload failed decoding; power still counts, identity does not.
    pub corrupt: bool,
    /// Sender's reservation period in slots. Zero means one-shot.
    pub reservation_period_slots: u16,
}

/// Observation of a sensed reservation, as reported to the external policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Observation {
    /// Transmitting terminal.
    pub src_id: u16,
    /// Retransmission counter.
    pub retx_counter: u8,
    /// Projected slot, modulo [`OBSERVATION_SLOT_MODULO`](crate::constants::OBSERVATION_SLOT_MODULO).
    pub slot: u8,
    /// First reserved sub-band.
    pub sub_band: u8,
}

/// The single logical channel served by an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogicalChannel {
    pub lcid: u8,
    pub priority: u8,
    /// Bytes waiting in the RLC buffer.
    pub buffer_bytes: u32,
}

/// Everything the allocator needs besides the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AllocationRequest {
    /// Destination layer-2 identifier.
    pub dst_l2_id: u32,
    /// Fixed modulation and coding scheme index (MCS table 1).
    pub mcs: u8,
    pub logical_channel: LogicalChannel,
    /// Configured maximum number of transmissions per transport block.
    pub max_repeats: u8,
}

/// RLC PDU descriptor carried by a plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RlcPduInfo {
    pub lcid: u8,
    pub size: u32,
}

/// One concrete grant: a slot and the resources used in it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotAlloc {
    pub slot: SlotIndex,
    pub dst_l2_id: u32,
    pub priority: u8,
    pub rlc_pdus: Vec<RlcPduInfo>,
    pub mcs: u8,
    pub pscch_rbs: u16,
    pub pscch_sym_start: u16,
    pub pscch_sym_len: u16,
    pub pssch_sym_start: u16,
    pub pssch_sym_len: u16,
    pub sub_band_start: u8,
    pub sub_band_len: u8,
    pub max_num_per_reserve: u16,
    /// New-data indicator; set only on the first transmission.
    pub ndi: bool,
    /// Redundancy version.
    pub rv: u8,
    /// This transmission carries SCI 1-A announcing future slots.
    pub carries_reservation: bool,
    /// Number of slots (this one included) the SCI 1-A indicates.
    pub future_slots_indicated: u8,
}

/// Bytes granted to one logical channel, reported downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LcGrant {
    pub lcid: u8,
    pub bytes: u32,
}

/// Final allocator output for one opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransmissionPlan {
    /// Entries in timing order, at most one per slot.
    pub entries: Vec<SlotAlloc>,
    /// Transport block size after the SCI 2-A overhead is removed.
    pub tb_size_bytes: u32,
    /// Sub-bands assigned in every entry.
    pub assigned_sub_bands: u8,
    pub grant: LcGrant,
}

impl TransmissionPlan {
    /// Slot indices of the plan, in order.
    pub fn slots(&self) -> Vec<SlotIndex> {
        self.entries.iter().map(|e| e.slot).collect()
    }
}
