//! Scheduler constants — values fixed by the sidelink resource-selection
//! procedure and by the legacy hand-off text format.
//!
//! Every width constant here is shared with external policy processes that
//! still parse the fixed-width decimal form. Changing one breaks interop.

/// SCI format 2-A overhead carried inside every transport block (bytes).
pub const SCI2A_OVERHEAD_BYTES: u32 = 5;

/// RSRP threshold increment applied after each failed exclusion pass (dB).
pub const THRESHOLD_STEP_DB: i32 = 3;

/// Highest RSRP threshold the exclusion search may reach (dBm).
/// Past this the channel is considered saturated.
pub const MAX_THRESHOLD_DBM: i32 = 0;

/// Redundancy version sequence, indexed by transmission number modulo 4.
pub const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

/// Subcarriers per resource block.
pub const SUBCARRIERS_PER_RB: u32 = 12;

/// Slot index field in observations is the absolute slot modulo this.
pub const OBSERVATION_SLOT_MODULO: u64 = 100;

// ── Legacy text format field widths ─────────────────────────────────

/// Source identifier width (decimal digits).
pub const SRC_ID_DIGITS: usize = 3;

/// Retransmission counter width (decimal digits).
pub const RETX_COUNTER_DIGITS: usize = 2;

/// Observation slot width (decimal digits).
pub const SLOT_DIGITS: usize = 2;

/// Sub-band index width (decimal digits).
pub const SUB_BAND_DIGITS: usize = 1;

/// Instruction mode selector width.
pub const MODE_DIGITS: usize = 1;

/// Instruction repeat-count width.
pub const REPEAT_DIGITS: usize = 1;

/// Instruction slot-offset width.
pub const SLOT_OFFSET_DIGITS: usize = 2;

/// Sentinel digit prepended to each encoded observation string so leading
/// zeros survive numeric conversion on the policy side.
pub const ENCODED_SENTINEL: char = '1';

// ── Binary frame ────────────────────────────────────────────────────

/// Frame magic for the binary hand-off layout.
pub const FRAME_MAGIC: [u8; 4] = *b"SLHO";

/// Binary hand-off layout version.
pub const FRAME_VERSION: u16 = 1;

/// Frame header: magic(4) + version(2) + kind(2) + request_id(4) + payload_len(4).
pub const FRAME_HEADER_LEN: usize = 16;

/// Largest payload a frame may announce.
pub const FRAME_MAX_PAYLOAD: u32 = 64 * 1024;
