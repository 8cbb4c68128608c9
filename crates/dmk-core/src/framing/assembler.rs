//! Stateful reassembly of received frames.
//!
//! One [`FrameAssembler`] tracks one exchange at a time.  After a reply has
//! been produced, or after any error, it is back in its initial state and
//! expects a new frame 0.

use tracing::trace;

use super::{FrameConfig, FrameHeader, FramingError, SequenceError};
use crate::apdu::ApduResponse;

/// Accumulates frame chunks until a full reply is available.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    config: FrameConfig,
    expected_index: u16,
    total_length: usize,
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            config: *config,
            expected_index: 0,
            total_length: 0,
            buffer: Vec::new(),
        }
    }

    /// Feeds one received frame.
    ///
    /// Returns `Ok(Some(reply))` once the last frame of a reply arrived and
    /// `Ok(None)` while more frames are expected.
    ///
    /// # Errors
    ///
    /// - [`FramingError::TruncatedHeader`] if the frame ends inside its header.
    /// - [`FramingError::Sequence`] on a channel, tag or index mismatch.
    /// - [`FramingError::MissingStatusWord`] if the declared length is below 2.
    ///
    /// The assembler is reset after every error.
    pub fn feed(&mut self, frame: &[u8]) -> Result<Option<ApduResponse>, FramingError> {
        let Some(raw) = self.feed_raw(frame)? else {
            return Ok(None);
        };
        ApduResponse::from_bytes(&raw)
            .map(Some)
            .ok_or(FramingError::MissingStatusWord(raw.len()))
    }

    /// Like [`FrameAssembler::feed`] but returns the reassembled bytes
    /// without splitting off a status word.
    ///
    /// Used on the device side of a link, where incoming frames carry a
    /// command rather than a reply.
    ///
    /// # Errors
    ///
    /// Same as [`FrameAssembler::feed`], minus the status word check.
    pub fn feed_raw(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, FramingError> {
        let result = self.accept(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    /// `true` while part of a reply has been received.
    pub fn is_in_progress(&self) -> bool {
        self.expected_index != 0
    }

    /// Drops any partial reply.
    pub fn reset(&mut self) {
        self.expected_index = 0;
        self.total_length = 0;
        self.buffer.clear();
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn accept(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, FramingError> {
        let (header, offset) = FrameHeader::parse(frame, &self.config)?;
        self.check_sequence(&header)?;

        if let Some(total_length) = header.total_length {
            self.total_length = usize::from(total_length);
            self.buffer = Vec::with_capacity(self.total_length);
        }
        self.buffer.extend_from_slice(&frame[offset..]);
        self.expected_index = self.expected_index.wrapping_add(1);

        if self.buffer.len() < self.total_length {
            trace!(
                "frame {} accepted, {}/{} bytes",
                header.index,
                self.buffer.len(),
                self.total_length
            );
            return Ok(None);
        }

        let mut raw = std::mem::take(&mut self.buffer);
        raw.truncate(self.total_length);
        self.reset();
        Ok(Some(raw))
    }

    fn check_sequence(&self, header: &FrameHeader) -> Result<(), SequenceError> {
        if let (Some(expected), Some(actual)) = (self.config.channel, header.channel) {
            if expected != actual {
                return Err(SequenceError::ChannelMismatch { expected, actual });
            }
        }
        if header.tag != self.config.tag {
            return Err(SequenceError::TagMismatch {
                expected: self.config.tag,
                actual: header.tag,
            });
        }
        if header.index != self.expected_index {
            return Err(SequenceError::IndexMismatch {
                expected: self.expected_index,
                actual: header.index,
            });
        }
        Ok(())
    }
}
