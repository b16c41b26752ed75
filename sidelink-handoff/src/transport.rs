//! Frame transports between the scheduler and a policy process.
//!
//! A transport moves whole frames and knows nothing about phases or
//! request ids. Two implementations:
//!
//! - [`LoopbackTransport`]: the policy is a closure in this process.
//! - [`UnixSocketTransport`]: frames over a Unix domain stream socket.
//!   Frames are self-delimiting through the header's `payload_len`.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sidelink_core::constants::FRAME_HEADER_LEN;
use sidelink_core::protocol::{decode_frame, encode_frame, Frame, FrameHeader, PolicyReply, PolicyRequest};
use tracing::trace;

use crate::channel::ChannelName;
use crate::errors::HandoffError;

/// Moves encoded frames to and from a policy.
pub trait PolicyTransport: Send {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), HandoffError>;

    /// Next complete frame, or `None` when nothing arrived within `timeout`.
    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, HandoffError>;
}

impl<T: PolicyTransport + ?Sized> PolicyTransport for Box<T> {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), HandoffError> {
        (**self).send_frame(frame)
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, HandoffError> {
        (**self).recv_frame(timeout)
    }
}

type PolicyFn = Box<dyn FnMut(&PolicyRequest) -> Vec<PolicyReply> + Send>;

/// In-process policy. Every request frame is decoded and handed to the
/// closure; the replies it returns are queued for `recv_frame` in order.
/// An empty queue reads as a timeout without waiting.
pub struct LoopbackTransport {
    policy: PolicyFn,
    replies: VecDeque<Vec<u8>>,
}

impl LoopbackTransport {
    /// Policy may answer with any number of frames, including stale ones.
    pub fn new(policy: impl FnMut(&PolicyRequest) -> Vec<PolicyReply> + Send + 'static) -> Self {
        Self {
            policy: Box::new(policy),
            replies: VecDeque::new(),
        }
    }

    /// Policy answers each request with at most one reply.
    pub fn answering(
        mut policy: impl FnMut(&PolicyRequest) -> Option<PolicyReply> + Send + 'static,
    ) -> Self {
        Self::new(move |req| policy(req).into_iter().collect())
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

impl PolicyTransport for LoopbackTransport {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), HandoffError> {
        let Frame::Request(req) = decode_frame(frame)? else {
            return Err(HandoffError::Frame("loopback policy received a reply frame".into()));
        };
        for reply in (self.policy)(&req) {
            self.replies.push_back(encode_frame(&Frame::Reply(reply))?);
        }
        Ok(())
    }

    fn recv_frame(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>, HandoffError> {
        Ok(self.replies.pop_front())
    }
}

/// Frames over a connected Unix stream socket.
///
/// Partial reads are buffered across calls, so a timeout in the middle of
/// a frame does not lose stream sync.
pub struct UnixSocketTransport {
    stream: UnixStream,
    pending: Vec<u8>,
}

impl UnixSocketTransport {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, HandoffError> {
        let stream = UnixStream::connect(path.as_ref())?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    /// Connected pair, one end per side.
    pub fn pair() -> Result<(Self, Self), HandoffError> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_stream(a), Self::from_stream(b)))
    }

    /// Socket path for `name` under `dir`.
    pub fn socket_path(dir: impl AsRef<Path>, name: &ChannelName) -> PathBuf {
        dir.as_ref().join(format!("{}.sock", name.as_str()))
    }

    fn take_complete(&mut self) -> Result<Option<Vec<u8>>, HandoffError> {
        if self.pending.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::parse(&self.pending).map_err(|e| HandoffError::Frame(e.to_string()))?;
        let len = header.frame_len();
        if self.pending.len() < len {
            return Ok(None);
        }
        let rest = self.pending.split_off(len);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }
}

impl PolicyTransport for UnixSocketTransport {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), HandoffError> {
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        trace!(bytes = frame.len(), "frame sent");
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, HandoffError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.take_complete()? {
                trace!(bytes = frame.len(), "frame received");
                return Ok(Some(frame));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.stream.set_read_timeout(Some(deadline - now))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(HandoffError::Transport(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "policy closed the channel",
                    )))
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
