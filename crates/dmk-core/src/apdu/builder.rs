//! Incremental construction of APDU payloads.
//!
//! Every `add_*` call checks the remaining room against the 255-byte payload
//! limit before touching the buffer, so a failed call leaves the builder
//! exactly as it was.
//!
//! ```rust
//! use dmk_core::apdu::ApduBuilder;
//!
//! # fn main() -> Result<(), dmk_core::apdu::ApduBuilderError> {
//! let mut builder = ApduBuilder::new(0xE0, 0xD8, 0x00, 0x00);
//! builder.add_u8(0x01)?.encode_lv_from_ascii("Bitcoin")?;
//! let apdu = builder.build();
//! assert_eq!(apdu.data()[..2], [0x01, 0x07]);
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

use super::{Apdu, APDU_MAX_DATA_LENGTH};

/// Errors raised while appending to an [`ApduBuilder`].
#[derive(Debug, Error, PartialEq)]
pub enum ApduBuilderError {
    /// The value does not fit in the remaining payload room.
    #[error("APDU data overflow: {requested} byte(s) requested, {available} available")]
    DataOverflow { requested: usize, available: usize },

    /// A length-value field cannot describe a value longer than 255 bytes.
    #[error("LV field too long: {0} bytes")]
    LvFieldTooLong(usize),
}

/// Builder for an [`Apdu`] with a bounded payload.
#[derive(Debug, Clone)]
pub struct ApduBuilder {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
}

impl ApduBuilder {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
        }
    }

    /// Appends one byte.
    ///
    /// # Errors
    ///
    /// Returns [`ApduBuilderError::DataOverflow`] if the payload is full.
    pub fn add_u8(&mut self, value: u8) -> Result<&mut Self, ApduBuilderError> {
        self.append(&[value])
    }

    /// Appends a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`ApduBuilderError::DataOverflow`] if fewer than 2 bytes remain.
    pub fn add_u16(&mut self, value: u16) -> Result<&mut Self, ApduBuilderError> {
        self.append(&value.to_be_bytes())
    }

    /// Appends a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`ApduBuilderError::DataOverflow`] if fewer than 4 bytes remain.
    pub fn add_u32(&mut self, value: u32) -> Result<&mut Self, ApduBuilderError> {
        self.append(&value.to_be_bytes())
    }

    /// Appends raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ApduBuilderError::DataOverflow`] if `value` does not fit.
    pub fn add_buffer(&mut self, value: &[u8]) -> Result<&mut Self, ApduBuilderError> {
        self.append(value)
    }

    /// Appends the ASCII bytes of `value` without a length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ApduBuilderError::DataOverflow`] if `value` does not fit.
    pub fn add_ascii(&mut self, value: &str) -> Result<&mut Self, ApduBuilderError> {
        self.append(value.as_bytes())
    }

    /// Appends `value` as a length-value field: one length byte, then the bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ApduBuilderError::LvFieldTooLong`] for values over 255 bytes
    /// and [`ApduBuilderError::DataOverflow`] if the field does not fit.
    pub fn encode_lv_from_buffer(&mut self, value: &[u8]) -> Result<&mut Self, ApduBuilderError> {
        let len = u8::try_from(value.len()).map_err(|_| ApduBuilderError::LvFieldTooLong(value.len()))?;
        self.ensure_room(1 + value.len())?;
        self.data.push(len);
        self.data.extend_from_slice(value);
        Ok(self)
    }

    /// Length-value encodes the ASCII bytes of `value`.
    ///
    /// # Errors
    ///
    /// See [`ApduBuilder::encode_lv_from_buffer`].
    pub fn encode_lv_from_ascii(&mut self, value: &str) -> Result<&mut Self, ApduBuilderError> {
        self.encode_lv_from_buffer(value.as_bytes())
    }

    /// Remaining room in the payload, in bytes.
    pub fn available_length(&self) -> usize {
        APDU_MAX_DATA_LENGTH - self.data.len()
    }

    pub fn build(&self) -> Apdu {
        Apdu {
            cla: self.cla,
            ins: self.ins,
            p1: self.p1,
            p2: self.p2,
            data: self.data.clone(),
        }
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn append(&mut self, bytes: &[u8]) -> Result<&mut Self, ApduBuilderError> {
        self.ensure_room(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(self)
    }

    fn ensure_room(&self, requested: usize) -> Result<(), ApduBuilderError> {
        let available = self.available_length();
        if requested > available {
            return Err(ApduBuilderError::DataOverflow {
                requested,
                available,
            });
        }
        Ok(())
    }
}
