//! APDU command and reply types.
//!
//! Wire format of a command:
//! ```text
//! [cla:1][ins:1][p1:1][p2:1][len:1][data:len]
//! ```
//! Wire format of a reply (after frame reassembly):
//! ```text
//! [data:N][sw1:1][sw2:1]
//! ```
//!
//! # What is a status word? (for beginners)
//!
//! Every reply ends with two bytes that tell the host whether the command
//! succeeded.  `0x9000` is the only success value.  Anything else is a
//! failure whose meaning depends on the command (wrong parameters, user
//! refused on screen, device locked, ...).  Mapping those codes to typed
//! errors is the job of the [`crate::command`] layer; this module only
//! carries the raw value.

pub mod builder;
pub mod parser;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use builder::{ApduBuilder, ApduBuilderError};
pub use parser::{ApduParser, ApduParserError};

/// Size of the fixed APDU header: `cla`, `ins`, `p1`, `p2` and the length byte.
pub const APDU_HEADER_SIZE: usize = 5;

/// Largest payload a single APDU can carry (the length field is one byte).
pub const APDU_MAX_DATA_LENGTH: usize = 255;

/// Size of the trailing status word in a reply.
pub const STATUS_WORD_SIZE: usize = 2;

// ── Status word ───────────────────────────────────────────────────────────────

/// The two trailing bytes of a device reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusWord(pub u16);

impl StatusWord {
    /// The only status word that denotes success.
    pub const SUCCESS: StatusWord = StatusWord(0x9000);
    /// Returned by the OS for any command while the device is PIN-locked.
    pub const LOCKED_DEVICE: StatusWord = StatusWord(0x5515);

    /// Builds a status word from its big-endian byte pair.
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }

    /// Returns the big-endian byte pair.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// `true` iff the status word is exactly `0x9000`.
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn is_locked_device(self) -> bool {
        self == Self::LOCKED_DEVICE
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl From<[u8; 2]> for StatusWord {
    fn from(bytes: [u8; 2]) -> Self {
        Self::from_bytes(bytes)
    }
}

// ── Command ───────────────────────────────────────────────────────────────────

/// A serialisable APDU command.
///
/// Instances are immutable: construct them through [`Apdu::new`] or an
/// [`ApduBuilder`], both of which enforce the 255-byte payload limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
}

impl Apdu {
    /// Creates an APDU from its header bytes and payload.
    ///
    /// # Errors
    ///
    /// Returns [`ApduBuilderError::DataOverflow`] if `data` is longer than
    /// [`APDU_MAX_DATA_LENGTH`].
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Result<Self, ApduBuilderError> {
        if data.len() > APDU_MAX_DATA_LENGTH {
            return Err(ApduBuilderError::DataOverflow {
                requested: data.len(),
                available: APDU_MAX_DATA_LENGTH,
            });
        }
        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    /// Creates an APDU with an empty payload.  Cannot fail.
    pub fn without_data(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
        }
    }

    pub fn cla(&self) -> u8 {
        self.cla
    }

    pub fn ins(&self) -> u8 {
        self.ins
    }

    pub fn p1(&self) -> u8 {
        self.p1
    }

    pub fn p2(&self) -> u8 {
        self.p2
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serialises the command to `[cla, ins, p1, p2, len, data...]`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dmk_core::apdu::Apdu;
    ///
    /// let apdu = Apdu::new(0xE0, 0x01, 0x00, 0x00, vec![0xAB]).unwrap();
    /// assert_eq!(apdu.to_bytes(), vec![0xE0, 0x01, 0x00, 0x00, 0x01, 0xAB]);
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(APDU_HEADER_SIZE + self.data.len());
        buf.push(self.cla);
        buf.push(self.ins);
        buf.push(self.p1);
        buf.push(self.p2);
        // Length fits in one byte: enforced by `new` and the builder.
        buf.push(self.data.len() as u8);
        buf.extend_from_slice(&self.data);
        buf
    }
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// A reassembled device reply: payload plus trailing status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: StatusWord,
}

impl ApduResponse {
    pub fn new(data: Vec<u8>, status: StatusWord) -> Self {
        Self { data, status }
    }

    /// Splits a raw reply into payload and status word.
    ///
    /// Returns `None` when `bytes` is shorter than the status word.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < STATUS_WORD_SIZE {
            return None;
        }
        let split = bytes.len() - STATUS_WORD_SIZE;
        let status = StatusWord::from_bytes([bytes[split], bytes[split + 1]]);
        Some(Self {
            data: bytes[..split].to_vec(),
            status,
        })
    }

    /// Serialises the reply back to `[data..., sw1, sw2]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + STATUS_WORD_SIZE);
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.status.to_bytes());
        buf
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apdu_serializes_header_length_and_data() {
        // Arrange
        let apdu = Apdu::new(0x00, 0x00, 0x00, 0x00, vec![0x01, 0x02, 0x03]).unwrap();

        // Act
        let bytes = apdu.to_bytes();

        // Assert
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_apdu_with_empty_data_has_zero_length_byte() {
        let apdu = Apdu::new(0xB0, 0x01, 0x00, 0x00, Vec::new()).unwrap();
        assert_eq!(apdu.to_bytes(), vec![0xB0, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(Apdu::without_data(0xB0, 0x01, 0x00, 0x00), apdu);
    }

    #[test]
    fn test_apdu_new_rejects_data_longer_than_255_bytes() {
        // Act
        let result = Apdu::new(0xE0, 0x00, 0x00, 0x00, vec![0u8; 256]);

        // Assert
        assert_eq!(
            result,
            Err(ApduBuilderError::DataOverflow {
                requested: 256,
                available: 255
            })
        );
    }

    #[test]
    fn test_apdu_new_accepts_exactly_255_bytes() {
        let apdu = Apdu::new(0xE0, 0x00, 0x00, 0x00, vec![0xFF; 255]).unwrap();
        assert_eq!(apdu.to_bytes()[4], 0xFF);
        assert_eq!(apdu.to_bytes().len(), 260);
    }

    #[test]
    fn test_status_word_success_only_for_9000_over_all_values() {
        for raw in 0..=u16::MAX {
            let sw = StatusWord(raw);
            assert_eq!(sw.is_success(), raw == 0x9000, "status word {sw}");
        }
    }

    #[test]
    fn test_status_word_from_bytes_is_big_endian() {
        assert_eq!(StatusWord::from_bytes([0x55, 0x15]), StatusWord::LOCKED_DEVICE);
        assert_eq!(StatusWord::SUCCESS.to_bytes(), [0x90, 0x00]);
    }

    #[test]
    fn test_status_word_display_is_hex() {
        assert_eq!(StatusWord(0x6e00).to_string(), "0x6E00");
    }

    #[test]
    fn test_response_from_bytes_splits_trailing_status_word() {
        // Act
        let response = ApduResponse::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();

        // Assert
        assert_eq!(response.data, vec![0x01, 0x02]);
        assert!(response.is_success());
    }

    #[test]
    fn test_response_from_bytes_with_only_status_word_has_empty_data() {
        let response = ApduResponse::from_bytes(&[0x55, 0x15]).unwrap();
        assert!(response.data.is_empty());
        assert_eq!(response.status, StatusWord::LOCKED_DEVICE);
    }

    #[test]
    fn test_response_from_bytes_shorter_than_status_word_is_none() {
        assert_eq!(ApduResponse::from_bytes(&[0x90]), None);
        assert_eq!(ApduResponse::from_bytes(&[]), None);
    }
}
