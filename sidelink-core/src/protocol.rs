//! Decision hand-off messages and their binary frame layout.
//!
//! ```text
//! magic "SLHO" (4) | version u16 | kind u16 | request_id u32 | payload_len u32 | payload
//! ```
//!
//! All integers are big-endian. `kind` is the operation's flag bit; replies
//! additionally set [`REPLY_BIT`]. Observations travel as a `u16` count and
//! fixed 5-byte records, so no field depends on decimal widths.

use crate::constants::{FRAME_HEADER_LEN, FRAME_MAGIC, FRAME_MAX_PAYLOAD, FRAME_VERSION};
use crate::errors::SchedError;
use crate::types::Observation;

/// Set in `kind` for frames travelling policy → scheduler.
pub const REPLY_BIT: u16 = 0x8000;

const OBSERVATION_RECORD_LEN: usize = 5;

/// Request kinds understood by a policy process. Each maps to one flag bit
/// that tells the policy which reply field is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Occupancy estimate update (threshold, exclusion count).
    EstimatorUpdate,
    /// One decoded packet from a neighbour.
    AddReceivedPacket,
    /// Ask which selection mode to use.
    SelectionMode,
    /// Ask how many transmissions to make.
    NseQuery,
    NumResourcesSelected,
    ChosenSlot,
    ChosenSubChannel,
    /// Batch of observations from one exclusion run.
    SensingData,
    /// Ask for the encoded selection instructions.
    ResourceSelections,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Self::EstimatorUpdate,
        Self::AddReceivedPacket,
        Self::SelectionMode,
        Self::NseQuery,
        Self::NumResourcesSelected,
        Self::ChosenSlot,
        Self::ChosenSubChannel,
        Self::SensingData,
        Self::ResourceSelections,
    ];

    /// Wire flag bit.
    #[must_use]
    pub const fn flag(self) -> u16 {
        1 << match self {
            Self::EstimatorUpdate => 0,
            Self::AddReceivedPacket => 1,
            Self::SelectionMode => 2,
            Self::NseQuery => 3,
            Self::NumResourcesSelected => 4,
            Self::ChosenSlot => 5,
            Self::ChosenSubChannel => 6,
            Self::SensingData => 7,
            Self::ResourceSelections => 8,
        }
    }

    #[must_use]
    pub fn from_flag(flag: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.flag() == flag)
    }

    /// Whether the policy answers this operation. The rest are one-way
    /// notifications.
    #[must_use]
    pub const fn expects_reply(self) -> bool {
        !matches!(
            self,
            Self::EstimatorUpdate | Self::AddReceivedPacket | Self::SensingData
        )
    }
}

/// Scheduler → policy message.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRequest {
    pub op: Operation,
    pub request_id: u32,
    /// Terminal issuing the request.
    pub terminal_id: u32,
    /// Simulation time in milliseconds.
    pub time_ms: f64,
    /// RSRP threshold the last exclusion run settled on.
    pub rsrp_threshold_dbm: i32,
    /// Slots excluded or marked in the last exclusion run.
    pub occupied_resources: u32,
    /// Position queried by `ChosenSlot` / `ChosenSubChannel`.
    pub index: u16,
    pub first_call: bool,
    pub observations: Vec<Observation>,
}

impl PolicyRequest {
    /// A request carrying nothing but the operation.
    pub fn new(op: Operation, request_id: u32) -> Self {
        Self {
            op,
            request_id,
            terminal_id: 0,
            time_ms: 0.0,
            rsrp_threshold_dbm: 0,
            occupied_resources: 0,
            index: 0,
            first_call: false,
            observations: Vec::new(),
        }
    }
}

/// Policy → scheduler message. Only the field selected by `op` is meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyReply {
    pub op: Operation,
    pub request_id: u32,
    pub selection_mode: u8,
    pub nse: u8,
    pub num_resources_selected: u8,
    pub chosen_slot: u8,
    pub chosen_sub_band: u8,
    /// Legacy instruction string, see [`decode_instructions`](crate::encoding::decode_instructions).
    pub instructions: String,
}

impl PolicyReply {
    pub fn new(op: Operation, request_id: u32) -> Self {
        Self {
            op,
            request_id,
            selection_mode: 0,
            nse: 0,
            num_resources_selected: 0,
            chosen_slot: 0,
            chosen_sub_band: 0,
            instructions: String::new(),
        }
    }
}

/// Either direction of the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(PolicyRequest),
    Reply(PolicyReply),
}

impl Frame {
    pub fn request_id(&self) -> u32 {
        match self {
            Self::Request(r) => r.request_id,
            Self::Reply(r) => r.request_id,
        }
    }
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: u16,
    pub request_id: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Parse and validate the first [`FRAME_HEADER_LEN`] bytes of `buf`.
    ///
    /// # Errors
    /// `SchedError::Encoding` on a short buffer, wrong magic or version, or
    /// an announced payload above [`FRAME_MAX_PAYLOAD`].
    pub fn parse(buf: &[u8]) -> Result<Self, SchedError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(SchedError::Encoding(format!(
                "frame header needs {FRAME_HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }
        if buf[..4] != FRAME_MAGIC {
            return Err(SchedError::Encoding("bad frame magic".into()));
        }
        let mut r = Reader::new(&buf[4..FRAME_HEADER_LEN]);
        let version = r.u16()?;
        if version != FRAME_VERSION {
            return Err(SchedError::Encoding(format!(
                "unsupported frame version {version}"
            )));
        }
        let header = Self {
            kind: r.u16()?,
            request_id: r.u32()?,
            payload_len: r.u32()?,
        };
        if header.payload_len > FRAME_MAX_PAYLOAD {
            return Err(SchedError::Encoding(format!(
                "payload length {} exceeds {FRAME_MAX_PAYLOAD}",
                header.payload_len
            )));
        }
        Ok(header)
    }

    pub fn is_reply(&self) -> bool {
        self.kind & REPLY_BIT != 0
    }

    /// Total frame length this header announces.
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload_len as usize
    }
}

/// Serialize a frame.
///
/// # Errors
/// `SchedError::Encoding` when the observation count or instruction string
/// does not fit its length prefix, or the payload exceeds the frame limit.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, SchedError> {
    let mut payload = Vec::new();
    let (kind, request_id) = match frame {
        Frame::Request(req) => {
            payload.extend_from_slice(&req.terminal_id.to_be_bytes());
            payload.extend_from_slice(&req.time_ms.to_bits().to_be_bytes());
            payload.extend_from_slice(&req.rsrp_threshold_dbm.to_be_bytes());
            payload.extend_from_slice(&req.occupied_resources.to_be_bytes());
            payload.extend_from_slice(&req.index.to_be_bytes());
            payload.push(u8::from(req.first_call));
            let count = u16::try_from(req.observations.len()).map_err(|_| {
                SchedError::Encoding(format!(
                    "{} observations exceed the u16 count",
                    req.observations.len()
                ))
            })?;
            payload.extend_from_slice(&count.to_be_bytes());
            for obs in &req.observations {
                payload.extend_from_slice(&obs.src_id.to_be_bytes());
                payload.extend_from_slice(&[obs.retx_counter, obs.slot, obs.sub_band]);
            }
            (req.op.flag(), req.request_id)
        }
        Frame::Reply(rep) => {
            payload.extend_from_slice(&[
                rep.selection_mode,
                rep.nse,
                rep.num_resources_selected,
                rep.chosen_slot,
                rep.chosen_sub_band,
            ]);
            let len = u16::try_from(rep.instructions.len()).map_err(|_| {
                SchedError::Encoding("instruction string exceeds the u16 length".into())
            })?;
            payload.extend_from_slice(&len.to_be_bytes());
            payload.extend_from_slice(rep.instructions.as_bytes());
            (rep.op.flag() | REPLY_BIT, rep.request_id)
        }
    };

    let payload_len = u32::try_from(payload.len())
        .ok()
        .filter(|&n| n <= FRAME_MAX_PAYLOAD)
        .ok_or_else(|| {
            SchedError::Encoding(format!("payload of {} bytes exceeds frame limit", payload.len()))
        })?;

    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.extend_from_slice(&FRAME_VERSION.to_be_bytes());
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&request_id.to_be_bytes());
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Parse one complete frame. Trailing bytes past the announced payload are
/// rejected.
///
/// # Errors
/// `SchedError::Encoding` on any header or payload inconsistency.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, SchedError> {
    let header = FrameHeader::parse(buf)?;
    if buf.len() != header.frame_len() {
        return Err(SchedError::Encoding(format!(
            "frame announces {} bytes, buffer holds {}",
            header.frame_len(),
            buf.len()
        )));
    }
    let op = Operation::from_flag(header.kind & !REPLY_BIT)
        .ok_or_else(|| SchedError::Encoding(format!("unknown frame kind {:#06x}", header.kind)))?;
    let mut r = Reader::new(&buf[FRAME_HEADER_LEN..]);

    let frame = if header.is_reply() {
        let mut rep = PolicyReply::new(op, header.request_id);
        rep.selection_mode = r.u8()?;
        rep.nse = r.u8()?;
        rep.num_resources_selected = r.u8()?;
        rep.chosen_slot = r.u8()?;
        rep.chosen_sub_band = r.u8()?;
        let len = usize::from(r.u16()?);
        rep.instructions = String::from_utf8(r.take(len)?.to_vec())
            .map_err(|_| SchedError::Encoding("instruction string is not UTF-8".into()))?;
        Frame::Reply(rep)
    } else {
        let mut req = PolicyRequest::new(op, header.request_id);
        req.terminal_id = r.u32()?;
        req.time_ms = f64::from_bits(r.u64()?);
        req.rsrp_threshold_dbm = r.u32()? as i32;
        req.occupied_resources = r.u32()?;
        req.index = r.u16()?;
        req.first_call = r.u8()? != 0;
        let count = usize::from(r.u16()?);
        req.observations.reserve(count);
        for _ in 0..count {
            let rec = r.take(OBSERVATION_RECORD_LEN)?;
            req.observations.push(Observation {
                src_id: u16::from_be_bytes([rec[0], rec[1]]),
                retx_counter: rec[2],
                slot: rec[3],
                sub_band: rec[4],
            });
        }
        Frame::Request(req)
    };

    if !r.is_empty() {
        return Err(SchedError::Encoding(format!(
            "{} unread payload byte(s)",
            r.remaining()
        )));
    }
    Ok(frame)
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SchedError> {
        let end = self.at.checked_add(n).filter(|&e| e <= self.buf.len()).ok_or_else(|| {
            SchedError::Encoding(format!(
                "payload truncated: need {n} byte(s) at offset {}",
                self.at
            ))
        })?;
        let out = &self.buf[self.at..end];
        self.at = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, SchedError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SchedError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, SchedError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, SchedError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.at
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
