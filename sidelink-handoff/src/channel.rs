//! Decision channel — strictly ordered request/reply with a policy.
//!
//! ## Naming and ownership
//! A channel is namespaced by `(decision type, operator id)` so independent
//! campaigns never share one. Within a process each pair can be claimed
//! once; the claim is released when the channel drops.
//!
//! ## Phases
//! ```text
//! Idle → SendBegin → FieldsWritten → SendEnd ─┬─► RecvBegin → FieldsRead → RecvEnd → Idle
//!                                             └─► Idle            (notifications)
//! ```
//! `&mut self` on every call rules out a second request in flight. A
//! failed call returns the machine to `Idle`.
//!
//! ## Timeouts
//! Replies carry the request id. A reply that arrives after its call timed
//! out is discarded by the next call, keeping the 1:1 pairing intact.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sidelink_core::protocol::{decode_frame, encode_frame, Frame, PolicyReply, PolicyRequest};
use sidelink_core::SchedError;
use tracing::{debug, warn};

use crate::errors::HandoffError;
use crate::transport::PolicyTransport;

static CLAIMED: Mutex<BTreeSet<String>> = parking_lot::const_mutex(BTreeSet::new());

/// Deterministic channel name for one (decision type, operator) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName {
    decision_type: String,
    operator_id: String,
    name: String,
}

impl ChannelName {
    /// # Errors
    /// `SchedError::Config` (wrapped) when either part is empty or contains
    /// characters unusable in a socket or segment name.
    pub fn new(decision_type: &str, operator_id: &str) -> Result<Self, HandoffError> {
        for (what, part) in [("decision type", decision_type), ("operator id", operator_id)] {
            if part.is_empty() {
                return Err(SchedError::Config(format!("{what} must be non-empty")).into());
            }
            if !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
                return Err(SchedError::Config(format!(
                    "{what} {part:?} may only hold ASCII letters, digits, '_' and '.'"
                ))
                .into());
            }
        }
        Ok(Self {
            decision_type: decision_type.to_owned(),
            operator_id: operator_id.to_owned(),
            name: format!("sidelink-{decision_type}-{operator_id}"),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn decision_type(&self) -> &str {
        &self.decision_type
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    /// Take exclusive ownership of this name for the life of the guard.
    ///
    /// # Errors
    /// `HandoffError::ChannelInUse` while another guard for the same name lives.
    pub fn claim(&self) -> Result<ChannelClaim, HandoffError> {
        if !CLAIMED.lock().insert(self.name.clone()) {
            return Err(HandoffError::ChannelInUse(self.name.clone()));
        }
        Ok(ChannelClaim {
            name: self.name.clone(),
        })
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Releases the claimed name on drop.
#[derive(Debug)]
pub struct ChannelClaim {
    name: String,
}

impl Drop for ChannelClaim {
    fn drop(&mut self) {
        CLAIMED.lock().remove(&self.name);
    }
}

/// Per-call phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SendBegin,
    FieldsWritten,
    SendEnd,
    RecvBegin,
    FieldsRead,
    RecvEnd,
}

impl Phase {
    pub fn can_advance_to(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (Idle, SendBegin)
                | (SendBegin, FieldsWritten)
                | (FieldsWritten, SendEnd)
                | (SendEnd, RecvBegin)
                | (SendEnd, Idle)
                | (RecvBegin, FieldsRead)
                | (FieldsRead, RecvEnd)
                | (RecvEnd, Idle)
        )
    }
}

/// Blocking request/reply client over a [`PolicyTransport`].
pub struct DecisionChannel<T: PolicyTransport> {
    name: ChannelName,
    _claim: ChannelClaim,
    transport: T,
    phase: Phase,
    next_request_id: u32,
    reply_timeout: Duration,
}

impl<T: PolicyTransport> DecisionChannel<T> {
    /// Claim `name` and wrap `transport`.
    ///
    /// # Errors
    /// `HandoffError::ChannelInUse` if the name is already claimed.
    pub fn open(name: ChannelName, transport: T, reply_timeout: Duration) -> Result<Self, HandoffError> {
        let claim = name.claim()?;
        debug!(channel = %name, timeout_ms = reply_timeout.as_millis() as u64, "decision channel open");
        Ok(Self {
            name,
            _claim: claim,
            transport,
            phase: Phase::Idle,
            next_request_id: 1,
            reply_timeout,
        })
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Send `request` and wait for its reply. The request id is assigned
    /// here; the one in `request` is ignored.
    ///
    /// # Errors
    /// `Timeout` when no matching reply arrives in time, `Frame` for a
    /// notification-only operation or a reply to a different operation,
    /// plus any transport failure.
    pub fn call(&mut self, request: &PolicyRequest) -> Result<PolicyReply, HandoffError> {
        if !request.op.expects_reply() {
            return Err(HandoffError::Frame(format!(
                "{:?} is a notification; use notify",
                request.op
            )));
        }
        let result = self.round_trip(request);
        if result.is_err() {
            self.phase = Phase::Idle;
        }
        result
    }

    /// Send a one-way notification.
    ///
    /// # Errors
    /// `Frame` for an operation that expects a reply, plus any transport failure.
    pub fn notify(&mut self, request: &PolicyRequest) -> Result<(), HandoffError> {
        if request.op.expects_reply() {
            return Err(HandoffError::Frame(format!(
                "{:?} expects a reply; use call",
                request.op
            )));
        }
        let result = self.send(request).and_then(|_| self.advance(Phase::Idle));
        if result.is_err() {
            self.phase = Phase::Idle;
        }
        result
    }

    fn round_trip(&mut self, request: &PolicyRequest) -> Result<PolicyReply, HandoffError> {
        let id = self.send(request)?;
        self.advance(Phase::RecvBegin)?;
        let reply = self.wait_reply(id, request)?;
        self.advance(Phase::FieldsRead)?;
        self.advance(Phase::RecvEnd)?;
        self.advance(Phase::Idle)?;
        Ok(reply)
    }

    fn send(&mut self, request: &PolicyRequest) -> Result<u32, HandoffError> {
        self.advance(Phase::SendBegin)?;
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        let frame = encode_frame(&Frame::Request(PolicyRequest {
            request_id: id,
            ..request.clone()
        }))?;
        self.advance(Phase::FieldsWritten)?;
        self.transport.send_frame(&frame)?;
        self.advance(Phase::SendEnd)?;
        Ok(id)
    }

    fn wait_reply(&mut self, id: u32, request: &PolicyRequest) -> Result<PolicyReply, HandoffError> {
        let started = Instant::now();
        let deadline = started + self.reply_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = match self.transport.recv_frame(remaining)? {
                Some(frame) => frame,
                None => {
                    warn!(
                        channel = %self.name,
                        request_id = id,
                        op = ?request.op,
                        "policy reply timed out"
                    );
                    return Err(HandoffError::Timeout {
                        request_id: id,
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
            };
            let reply = match decode_frame(&frame)? {
                Frame::Reply(reply) => reply,
                Frame::Request(_) => {
                    return Err(HandoffError::Frame("policy sent a request frame".into()))
                }
            };
            if reply.request_id != id {
                debug!(expected = id, got = reply.request_id, "discarding stale reply");
                continue;
            }
            if reply.op != request.op {
                return Err(HandoffError::Frame(format!(
                    "reply to {:?} answers {:?}",
                    request.op, reply.op
                )));
            }
            return Ok(reply);
        }
    }

    fn advance(&mut self, to: Phase) -> Result<(), HandoffError> {
        if !self.phase.can_advance_to(to) {
            return Err(HandoffError::InvalidPhase {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_deterministic() {
        let a = ChannelName::new("ORE", "111").unwrap();
        let b = ChannelName::new("ORE", "111").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "sidelink-ORE-111");
        assert_ne!(a, ChannelName::new("DRE", "111").unwrap());
    }

    #[test]
    fn bad_name_parts_rejected() {
        assert!(ChannelName::new("", "111").is_err());
        assert!(ChannelName::new("ORE", "a/b").is_err());
    }

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let name = ChannelName::new("claimtest", "1").unwrap();
        let guard = name.claim().unwrap();
        assert!(matches!(name.claim(), Err(HandoffError::ChannelInUse(_))));
        drop(guard);
        assert!(name.claim().is_ok());
    }

    #[test]
    fn phase_transitions() {
        use Phase::*;
        let call = [Idle, SendBegin, FieldsWritten, SendEnd, RecvBegin, FieldsRead, RecvEnd, Idle];
        assert!(call.windows(2).all(|w| w[0].can_advance_to(w[1])));
        assert!(SendEnd.can_advance_to(Idle));
        assert!(!Idle.can_advance_to(RecvBegin));
        assert!(!SendBegin.can_advance_to(SendBegin));
        assert!(!FieldsRead.can_advance_to(Idle));
    }
}
