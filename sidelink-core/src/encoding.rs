//! Legacy fixed-width decimal codec.
//!
//! Existing policy processes exchange observations as four parallel
//! decimal strings and read back a compact instruction string. Widths are
//! fixed by convention (see [`constants`](crate::constants)); values that
//! do not fit are rejected instead of being silently truncated.
//!
//! Each observation string starts with [`ENCODED_SENTINEL`] so that leading
//! zeros survive a numeric round trip on the policy side.

use std::fmt::Write as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::allocator::{SelectionMode, SlotPick};
use crate::constants::{
    ENCODED_SENTINEL, MODE_DIGITS, REPEAT_DIGITS, RETX_COUNTER_DIGITS, SLOT_DIGITS,
    SLOT_OFFSET_DIGITS, SRC_ID_DIGITS, SUB_BAND_DIGITS,
};
use crate::errors::SchedError;
use crate::types::Observation;

const MODE_OVERWRITE: u8 = 1;
const MODE_FALLBACK: u8 = 2;

/// Observation batch in the four-string legacy form.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EncodedObservations {
    pub src_ids: String,
    pub retx_counters: String,
    pub slots: String,
    pub sub_bands: String,
}

impl EncodedObservations {
    /// Strings of an empty batch: the bare sentinel in each field.
    pub fn empty() -> Self {
        let s = ENCODED_SENTINEL.to_string();
        Self {
            src_ids: s.clone(),
            retx_counters: s.clone(),
            slots: s.clone(),
            sub_bands: s,
        }
    }
}

/// Encode observations into the legacy four-string form.
///
/// # Errors
/// `SchedError::Encoding` when a value needs more digits than its field has.
pub fn encode_observations(observations: &[Observation]) -> Result<EncodedObservations, SchedError> {
    let mut out = EncodedObservations::empty();
    for obs in observations {
        push_field(&mut out.src_ids, "source id", u32::from(obs.src_id), SRC_ID_DIGITS)?;
        push_field(
            &mut out.retx_counters,
            "retransmission counter",
            u32::from(obs.retx_counter),
            RETX_COUNTER_DIGITS,
        )?;
        push_field(&mut out.slots, "slot", u32::from(obs.slot), SLOT_DIGITS)?;
        push_field(&mut out.sub_bands, "sub-band", u32::from(obs.sub_band), SUB_BAND_DIGITS)?;
    }
    Ok(out)
}

fn push_field(buf: &mut String, name: &str, value: u32, width: usize) -> Result<(), SchedError> {
    if value >= 10u32.pow(width as u32) {
        return Err(SchedError::Encoding(format!(
            "{name} {value} does not fit in {width} digit(s)"
        )));
    }
    // Writing into a String cannot fail.
    let _ = write!(buf, "{value:0width$}");
    Ok(())
}

/// Decode the four-string form back into observations.
///
/// Trailing newlines are ignored. All four fields must carry the sentinel
/// and describe the same number of observations.
///
/// # Errors
/// `SchedError::Encoding` on a missing sentinel, a non-digit character, or
/// field lengths that disagree.
pub fn decode_observations(encoded: &EncodedObservations) -> Result<Vec<Observation>, SchedError> {
    let src = field_body(&encoded.src_ids, "source id")?;
    let retx = field_body(&encoded.retx_counters, "retransmission counter")?;
    let slot = field_body(&encoded.slots, "slot")?;
    let sub = field_body(&encoded.sub_bands, "sub-band")?;

    if src.len() % SRC_ID_DIGITS != 0 {
        return Err(SchedError::Encoding(format!(
            "source id field length {} is not a multiple of {SRC_ID_DIGITS}",
            src.len()
        )));
    }
    let count = src.len() / SRC_ID_DIGITS;
    for (name, body, width) in [
        ("retransmission counter", retx, RETX_COUNTER_DIGITS),
        ("slot", slot, SLOT_DIGITS),
        ("sub-band", sub, SUB_BAND_DIGITS),
    ] {
        if body.len() != count * width {
            return Err(SchedError::Encoding(format!(
                "{name} field holds {} digit(s), expected {} for {count} observation(s)",
                body.len(),
                count * width
            )));
        }
    }

    (0..count)
        .map(|i| {
            Ok(Observation {
                src_id: digits(src, i * SRC_ID_DIGITS, SRC_ID_DIGITS)? as u16,
                retx_counter: digits(retx, i * RETX_COUNTER_DIGITS, RETX_COUNTER_DIGITS)? as u8,
                slot: digits(slot, i * SLOT_DIGITS, SLOT_DIGITS)? as u8,
                sub_band: digits(sub, i * SUB_BAND_DIGITS, SUB_BAND_DIGITS)? as u8,
            })
        })
        .collect()
}

fn field_body<'a>(field: &'a str, name: &str) -> Result<&'a str, SchedError> {
    let field = field.trim_end_matches(['\n', '\r']);
    let body = field.strip_prefix(ENCODED_SENTINEL).ok_or_else(|| {
        SchedError::Encoding(format!("{name} field is missing the leading sentinel"))
    })?;
    if let Some(bad) = body.chars().find(|c| !c.is_ascii_digit()) {
        return Err(SchedError::Encoding(format!(
            "{name} field contains non-digit {bad:?}"
        )));
    }
    Ok(body)
}

/// Parse `width` ASCII digits of `s` starting at byte `at`.
fn digits(s: &str, at: usize, width: usize) -> Result<u32, SchedError> {
    s.get(at..at + width)
        .and_then(|d| d.parse::<u32>().ok())
        .ok_or_else(|| SchedError::Encoding(format!("no {width}-digit field at offset {at}")))
}

/// Decoded reply of an external policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionInstructions {
    /// Explicit slot offsets and sub-bands.
    Overwrite { total_tx: u8, picks: Vec<SlotPick> },
    /// Only the number of transmissions.
    Fallback { target_tx: u8 },
}

impl SelectionInstructions {
    pub fn into_selection_mode(self) -> SelectionMode {
        match self {
            Self::Overwrite { total_tx, picks } => SelectionMode::Overwrite { total_tx, picks },
            Self::Fallback { target_tx } => SelectionMode::Fallback { target_tx },
        }
    }
}

/// Parse an instruction string.
///
/// Layout: mode digit (1 overwrite, 2 fallback). Overwrite continues with
/// a repeat-count digit and then (2-digit slot offset, 1-digit sub-band)
/// pairs up to the end. Fallback continues with the target count only.
///
/// # Errors
/// `SchedError::Instruction` on any field that does not parse. A malformed
/// reply is fatal to the current decision.
pub fn decode_instructions(raw: &str) -> Result<SelectionInstructions, SchedError> {
    let s = raw.trim_end_matches(['\n', '\r']);
    let mut at = 0;
    let mut take = |width: usize, what: &str| -> Result<u8, SchedError> {
        let value = s
            .get(at..at + width)
            .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|d| d.parse::<u8>().ok())
            .ok_or_else(|| {
                SchedError::Instruction(format!("cannot parse {what} at offset {at} of {s:?}"))
            })?;
        at += width;
        Ok(value)
    };

    match take(MODE_DIGITS, "mode")? {
        MODE_OVERWRITE => {
            let total_tx = take(REPEAT_DIGITS, "repeat count")?;
            let pair = SLOT_OFFSET_DIGITS + SUB_BAND_DIGITS;
            let rest = s.len() - MODE_DIGITS - REPEAT_DIGITS;
            if rest % pair != 0 {
                return Err(SchedError::Instruction(format!(
                    "trailing partial slot pick in {s:?}"
                )));
            }
            let mut picks = Vec::with_capacity(rest / pair);
            for _ in 0..rest / pair {
                let offset = take(SLOT_OFFSET_DIGITS, "slot offset")?;
                let sub_band = take(SUB_BAND_DIGITS, "sub-band")?;
                picks.push(SlotPick { offset, sub_band });
            }
            Ok(SelectionInstructions::Overwrite { total_tx, picks })
        }
        MODE_FALLBACK => {
            let target_tx = take(REPEAT_DIGITS, "target count")?;
            if s.len() != MODE_DIGITS + REPEAT_DIGITS {
                return Err(SchedError::Instruction(format!(
                    "unexpected content after fallback count in {s:?}"
                )));
            }
            Ok(SelectionInstructions::Fallback { target_tx })
        }
        other => Err(SchedError::Instruction(format!("unknown selection mode {other}"))),
    }
}

/// Render instructions in the legacy layout.
///
/// # Errors
/// `SchedError::Instruction` when a count, offset or sub-band does not fit
/// its field.
pub fn encode_instructions(instructions: &SelectionInstructions) -> Result<String, SchedError> {
    let mut out = String::new();
    let put = |out: &mut String, name: &str, value: u8, width: usize| {
        push_field(out, name, u32::from(value), width).map_err(|e| match e {
            SchedError::Encoding(msg) => SchedError::Instruction(msg),
            other => other,
        })
    };
    match instructions {
        SelectionInstructions::Overwrite { total_tx, picks } => {
            put(&mut out, "mode", MODE_OVERWRITE, MODE_DIGITS)?;
            put(&mut out, "repeat count", *total_tx, REPEAT_DIGITS)?;
            for pick in picks {
                put(&mut out, "slot offset", pick.offset, SLOT_OFFSET_DIGITS)?;
                put(&mut out, "sub-band", pick.sub_band, SUB_BAND_DIGITS)?;
            }
        }
        SelectionInstructions::Fallback { target_tx } => {
            put(&mut out, "mode", MODE_FALLBACK, MODE_DIGITS)?;
            put(&mut out, "target count", *target_tx, REPEAT_DIGITS)?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(src_id: u16, retx_counter: u8, slot: u8, sub_band: u8) -> Observation {
        Observation {
            src_id,
            retx_counter,
            slot,
            sub_band,
        }
    }

    #[test]
    fn encode_pads_and_prefixes_sentinel() {
        let enc = encode_observations(&[obs(7, 1, 3, 2), obs(123, 45, 99, 9)]).unwrap();
        assert_eq!(enc.src_ids, "1007123");
        assert_eq!(enc.retx_counters, "10145");
        assert_eq!(enc.slots, "10399");
        assert_eq!(enc.sub_bands, "129");
    }

    #[test]
    fn empty_batch_is_bare_sentinel() {
        let enc = encode_observations(&[]).unwrap();
        assert_eq!(enc, EncodedObservations::empty());
        assert!(decode_observations(&enc).unwrap().is_empty());
    }

    #[test]
    fn overflow_is_rejected() {
        assert!(matches!(
            encode_observations(&[obs(1000, 0, 0, 0)]),
            Err(SchedError::Encoding(_))
        ));
        assert!(encode_observations(&[obs(1, 100, 0, 0)]).is_err());
        assert!(encode_observations(&[obs(1, 0, 0, 10)]).is_err());
    }

    #[test]
    fn decode_reverses_encode() {
        let batch = vec![obs(0, 0, 0, 0), obs(999, 99, 99, 9), obs(42, 3, 17, 4)];
        let enc = encode_observations(&batch).unwrap();
        assert_eq!(decode_observations(&enc).unwrap(), batch);
    }

    #[test]
    fn decode_tolerates_trailing_newline() {
        let enc = EncodedObservations {
            src_ids: "1042\n".into(),
            retx_counters: "103\n".into(),
            slots: "117\n".into(),
            sub_bands: "14\n".into(),
        };
        assert_eq!(decode_observations(&enc).unwrap(), vec![obs(42, 3, 17, 4)]);
    }

    #[test]
    fn decode_rejects_mismatched_fields() {
        let mut enc = encode_observations(&[obs(1, 1, 1, 1)]).unwrap();
        enc.slots.push('5');
        assert!(decode_observations(&enc).is_err());
    }

    #[test]
    fn decode_rejects_missing_sentinel() {
        let mut enc = encode_observations(&[obs(1, 1, 1, 1)]).unwrap();
        enc.sub_bands = "1".into();
        enc.src_ids = "001".into();
        assert!(decode_observations(&enc).is_err());
    }

    #[test]
    fn overwrite_reply_decodes_pairs_in_order() {
        let got = decode_instructions("1205031207").unwrap();
        assert_eq!(
            got,
            SelectionInstructions::Overwrite {
                total_tx: 2,
                picks: vec![
                    SlotPick { offset: 5, sub_band: 3 },
                    SlotPick { offset: 12, sub_band: 7 },
                ],
            }
        );
    }

    #[test]
    fn fallback_reply_decodes_count() {
        assert_eq!(
            decode_instructions("21\n").unwrap(),
            SelectionInstructions::Fallback { target_tx: 1 }
        );
    }

    #[test]
    fn malformed_replies_rejected() {
        for raw in ["", "3", "1", "1205", "1x0503", "2", "2a", "215"] {
            assert!(
                matches!(decode_instructions(raw), Err(SchedError::Instruction(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn instructions_encode_in_legacy_layout() {
        let ins = SelectionInstructions::Overwrite {
            total_tx: 2,
            picks: vec![SlotPick { offset: 5, sub_band: 3 }, SlotPick { offset: 12, sub_band: 7 }],
        };
        assert_eq!(encode_instructions(&ins).unwrap(), "1205031207");
        assert_eq!(
            encode_instructions(&SelectionInstructions::Fallback { target_tx: 3 }).unwrap(),
            "23"
        );
        let too_wide = SelectionInstructions::Fallback { target_tx: 12 };
        assert!(matches!(encode_instructions(&too_wide), Err(SchedError::Instruction(_))));
    }

    #[test]
    fn instructions_map_to_selection_mode() {
        let mode = SelectionInstructions::Fallback { target_tx: 2 }.into_selection_mode();
        assert_eq!(mode, SelectionMode::Fallback { target_tx: 2 });
    }
}
