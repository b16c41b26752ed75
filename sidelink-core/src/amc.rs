//! Transport block sizing for a fixed MCS.
//!
//! TS 38.214 §5.1.3.2 on MCS index table 1 (up to 64QAM), single layer.
//! The resource count is given as resource-block-symbols; DMRS and other
//! overhead are not subtracted.

use crate::constants::SUBCARRIERS_PER_RB;
use crate::errors::SchedError;

/// (modulation order, target code rate × 1024) for MCS 0..=28.
const MCS_TABLE_1: [(u8, u16); 29] = [
    (2, 120), (2, 157), (2, 193), (2, 251), (2, 308), (2, 379), (2, 449), (2, 526),
    (2, 602), (2, 679), (4, 340), (4, 378), (4, 434), (4, 490), (4, 553), (4, 616),
    (4, 658), (6, 438), (6, 466), (6, 517), (6, 567), (6, 616), (6, 666), (6, 719),
    (6, 772), (6, 822), (6, 873), (6, 910), (6, 948),
];

/// TBS table for N'info ≤ 3824 (bits).
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176,
    184, 192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480,
    504, 528, 552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064,
    1128, 1160, 1192, 1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800,
    1864, 1928, 2024, 2088, 2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856,
    2976, 3104, 3240, 3368, 3496, 3624, 3752, 3824,
];

/// Highest MCS index of table 1.
pub const MAX_MCS: u8 = 28;

/// Transport block size in bytes for `mcs` over `rb_symbols` resource-block-symbols.
///
/// # Errors
/// Returns `SchedError::Config` for an MCS outside table 1.
pub fn tb_size_bytes(mcs: u8, rb_symbols: u32) -> Result<u32, SchedError> {
    let &(qm, r1024) = MCS_TABLE_1
        .get(usize::from(mcs))
        .ok_or_else(|| SchedError::Config(format!("MCS {mcs} outside table 1 (0..={MAX_MCS})")))?;
    if rb_symbols == 0 {
        return Ok(0);
    }
    let rate = f64::from(r1024) / 1024.0;
    let n_re = f64::from(SUBCARRIERS_PER_RB) * f64::from(rb_symbols);
    let n_info = n_re * rate * f64::from(qm);
    Ok(tbs_bits(n_info, rate) / 8)
}

fn tbs_bits(n_info: f64, rate: f64) -> u32 {
    if n_info <= 3824.0 {
        let n = (n_info.log2().floor() as i32 - 6).max(3);
        let step = 2f64.powi(n);
        let n_info_q = (step * (n_info / step).floor()).max(24.0) as u32;
        return TBS_TABLE
            .iter()
            .copied()
            .find(|&tbs| tbs >= n_info_q)
            .unwrap_or(TBS_TABLE[TBS_TABLE.len() - 1]);
    }

    let n = ((n_info - 24.0).log2().floor() as i32 - 5).max(0);
    let step = 2f64.powi(n);
    let n_info_q = (step * ((n_info - 24.0) / step).round()).max(3840.0);
    let code_blocks = if rate <= 0.25 {
        ((n_info_q + 24.0) / 3816.0).ceil()
    } else if n_info_q > 8424.0 {
        ((n_info_q + 24.0) / 8424.0).ceil()
    } else {
        1.0
    };
    (8.0 * code_blocks * ((n_info_q + 24.0) / (8.0 * code_blocks)).ceil() - 24.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_block_uses_table() {
        // 1440 RE, QPSK r=120/1024: Ninfo 337.5 -> N'info 336 -> 336 bits
        assert_eq!(tb_size_bytes(0, 120).unwrap(), 42);
        // 1440 RE, 16QAM r=553/1024: N'info 3104 -> 3104 bits
        assert_eq!(tb_size_bytes(14, 120).unwrap(), 388);
    }

    #[test]
    fn large_block_uses_formula() {
        // 7200 RE, 64QAM r=948/1024: 5 code blocks, 39936 bits
        assert_eq!(tb_size_bytes(28, 600).unwrap(), 4992);
    }

    #[test]
    fn size_grows_with_resources() {
        let mut last = 0;
        for sub_bands in 1..=10u32 {
            let tbs = tb_size_bytes(14, 10 * sub_bands * 12).unwrap();
            assert!(tbs > last, "tbs must grow: {tbs} <= {last}");
            last = tbs;
        }
    }

    #[test]
    fn zero_resources_give_zero() {
        assert_eq!(tb_size_bytes(5, 0).unwrap(), 0);
    }

    #[test]
    fn mcs_outside_table_rejected() {
        assert!(tb_size_bytes(29, 120).is_err());
    }
}
