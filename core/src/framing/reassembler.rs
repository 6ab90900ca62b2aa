use crate::codec;
use crate::framing::buffer::ReassemblyBuffer;
use crate::prelude::{FixRecord, LinkConfig, ReassemblyError};
use crate::telemetry::log::LogManager;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    /// Nothing buffered.
    Idle,
    /// At least one frame of an incomplete message is buffered.
    Accumulating,
}

/// Rebuilds messages from notification frames using frame length alone.
///
/// A frame shorter than the MTU ends the message; the buffered bytes are then
/// decoded and the buffer is cleared whether or not decoding succeeds. A
/// full-size frame keeps the message open. This means a payload whose length
/// is a multiple of the MTU stays open until another frame arrives, which is
/// why senders close such payloads with an empty frame.
pub struct Reassembler {
    buffer: ReassemblyBuffer,
    mtu: usize,
    idle_timeout: Option<Duration>,
    state: ReassemblyState,
    last_frame_at: Option<Instant>,
    logger: LogManager,
}

impl Reassembler {
    pub fn new(mtu: usize, max_message_len: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            buffer: ReassemblyBuffer::with_capacity(max_message_len),
            mtu: mtu.max(1),
            idle_timeout,
            state: ReassemblyState::Idle,
            last_frame_at: None,
            logger: LogManager::new("reassembler"),
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.mtu, config.max_message_len, config.idle_timeout())
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consumes one frame. Returns the decoded record when the frame ends a
    /// message, `Ok(None)` while the message is still open.
    pub fn feed(
        &mut self,
        frame: &[u8],
        now: Instant,
    ) -> Result<Option<FixRecord>, ReassemblyError> {
        if frame.len() > self.mtu {
            self.reset();
            return Err(ReassemblyError::Oversized {
                len: frame.len(),
                mtu: self.mtu,
            });
        }
        if frame.is_empty() && self.state == ReassemblyState::Idle {
            self.logger.detail("empty frame with no message in progress");
            return Ok(None);
        }

        if let Err(err) = self.buffer.append(frame) {
            self.reset();
            return Err(err);
        }
        self.state = ReassemblyState::Accumulating;
        self.last_frame_at = Some(now);

        if frame.len() == self.mtu {
            return Ok(None);
        }

        let decoded = codec::decode(self.buffer.contents());
        self.reset();
        decoded.map(Some).map_err(ReassemblyError::from)
    }

    /// Drops a partially received message once no frame has arrived for the
    /// idle timeout. Returns the number of bytes discarded.
    pub fn expire(&mut self, now: Instant) -> Option<usize> {
        let timeout = self.idle_timeout?;
        let last = self.last_frame_at?;
        if self.state != ReassemblyState::Accumulating
            || now.saturating_duration_since(last) <= timeout
        {
            return None;
        }
        let discarded = self.buffer.len();
        self.logger.warn(&format!(
            "discarding {} stale bytes after {:?} without a frame",
            discarded, timeout
        ));
        self.reset();
        Some(discarded)
    }

    pub fn reset(&mut self) {
        self.buffer.reset();
        self.state = ReassemblyState::Idle;
        self.last_frame_at = None;
    }
}
