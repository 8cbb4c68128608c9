//! Transport frame codec.
//!
//! Wire format of one frame:
//! ```text
//! [channel:2]? [tag:1] [index:2] [total_length:2]? [chunk] [zero padding]?
//! ```
//! `channel` is present only on multiplexed transports (USB HID).
//! `total_length` is present only on frame 0.  All integers are big-endian.
//!
//! # Why frames? (for beginners)
//!
//! A USB HID endpoint moves reports of exactly 64 bytes; a BLE link moves
//! notifications no bigger than its negotiated MTU.  An APDU can be much
//! longer than either, so the sender cuts it into numbered chunks and the
//! receiver glues them back together, checking that every chunk belongs to
//! the same exchange and arrives in order.  A gap or a stray chunk is never
//! repaired: the whole exchange fails and must be retried by the caller.
//!
//! # Sub-modules
//!
//! - **`frame`** – Frame header layout and wire serialisation.
//! - **`segmenter`** – Lazily cuts a payload into frames.
//! - **`assembler`** – Stateful reassembly of frames into a reply.

pub mod assembler;
pub mod frame;
pub mod segmenter;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use assembler::FrameAssembler;
pub use frame::{Frame, FrameHeader};
pub use segmenter::{segment, FrameSegmenter};

/// Tag used by Ledger devices for APDU frames on every transport.
pub const APDU_FRAME_TAG: u8 = 0x05;

/// Size of a USB HID report.
pub const USB_HID_FRAME_SIZE: u16 = 64;

/// Channel id written by the host on USB HID.
pub const USB_HID_DEFAULT_CHANNEL: [u8; 2] = [0x01, 0x01];

/// Size of the `total_length` field carried by frame 0.
pub const TOTAL_LENGTH_SIZE: usize = 2;

/// Errors raised when the received frames of one exchange are inconsistent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("unexpected channel: expected {expected:02X?}, got {actual:02X?}")]
    ChannelMismatch { expected: [u8; 2], actual: [u8; 2] },

    #[error("unexpected tag: expected 0x{expected:02X}, got 0x{actual:02X}")]
    TagMismatch { expected: u8, actual: u8 },

    #[error("unexpected frame index: expected {expected}, got {actual}")]
    IndexMismatch { expected: u16, actual: u16 },
}

/// Errors raised while segmenting or reassembling frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The configured frame size cannot carry frame 0's header plus one byte.
    #[error("frame size {frame_size} too small: need at least {minimum} bytes")]
    FrameSizeTooSmall { frame_size: u16, minimum: usize },

    /// The payload length does not fit in the 16-bit `total_length` field.
    #[error("payload of {0} bytes exceeds the 65535-byte frame limit")]
    PayloadTooLarge(usize),

    /// A received frame is shorter than its own header.
    #[error("truncated frame header: need {needed} bytes, got {available}")]
    TruncatedHeader { needed: usize, available: usize },

    #[error("frame sequence error: {0}")]
    Sequence(#[from] SequenceError),

    /// The reassembled reply is too short to carry a status word.
    #[error("reply of {0} byte(s) is missing its status word")]
    MissingStatusWord(usize),
}

/// Per-connection framing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Size of every frame on the wire (the transport MTU).
    pub frame_size: u16,
    /// Channel id for multiplexed transports; `None` on point-to-point links.
    pub channel: Option<[u8; 2]>,
    pub tag: u8,
    /// Zero-pad the final frame up to `frame_size`.
    pub pad_final_frame: bool,
}

impl FrameConfig {
    /// USB HID framing: 64-byte reports on channel `0x0101`, padded.
    pub fn usb_hid() -> Self {
        Self {
            frame_size: USB_HID_FRAME_SIZE,
            channel: Some(USB_HID_DEFAULT_CHANNEL),
            tag: APDU_FRAME_TAG,
            pad_final_frame: true,
        }
    }

    /// BLE framing: MTU-sized notifications, no channel, no padding.
    pub fn ble(mtu: u16) -> Self {
        Self {
            frame_size: mtu,
            channel: None,
            tag: APDU_FRAME_TAG,
            pad_final_frame: false,
        }
    }

    /// Header size of the frame at `index`.
    pub fn header_len(&self, index: u16) -> usize {
        let channel = if self.channel.is_some() { 2 } else { 0 };
        let length = if index == 0 { TOTAL_LENGTH_SIZE } else { 0 };
        channel + 1 + 2 + length
    }

    /// Chunk capacity of the frame at `index`.
    ///
    /// Only meaningful once [`FrameConfig::validate`] has succeeded.
    pub fn capacity(&self, index: u16) -> usize {
        usize::from(self.frame_size).saturating_sub(self.header_len(index))
    }

    /// Number of frames needed for a payload of `payload_len` bytes.
    ///
    /// Equals `ceil((payload_len + 2) / capacity(1))` since frame 0 spends two
    /// bytes of the same room on `total_length`.
    pub fn frame_count(&self, payload_len: usize) -> usize {
        let first = self.capacity(0);
        if payload_len <= first {
            return 1;
        }
        let rest = self.capacity(1);
        1 + (payload_len - first).div_ceil(rest)
    }

    /// Checks that frame 0 can carry its header and at least one byte.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::FrameSizeTooSmall`] otherwise.
    pub fn validate(&self) -> Result<(), FramingError> {
        let minimum = self.header_len(0) + 1;
        if usize::from(self.frame_size) < minimum {
            return Err(FramingError::FrameSizeTooSmall {
                frame_size: self.frame_size,
                minimum,
            });
        }
        Ok(())
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self::usb_hid()
    }
}
