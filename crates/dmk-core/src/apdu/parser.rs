//! Cursor-based reader over a reply payload.

use thiserror::Error;

/// Errors returned by [`ApduParser`] extractors.
#[derive(Debug, Error, PartialEq)]
pub enum ApduParserError {
    /// Fewer bytes remain than the field needs.
    #[error("unexpected end of reply: need {needed} bytes at offset {offset}, {available} left")]
    UnexpectedEnd {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A field expected to hold ASCII text contains other bytes.
    #[error("field at offset {0} is not valid ASCII")]
    InvalidAscii(usize),
}

/// Reads typed fields sequentially from a reply payload.
///
/// Every extractor either consumes exactly the bytes it returns or fails
/// without moving the cursor.
#[derive(Debug, Clone)]
pub struct ApduParser<'a> {
    buffer: &'a [u8],
    index: usize,
}

impl<'a> ApduParser<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, index: 0 }
    }

    pub fn extract_u8(&mut self) -> Result<u8, ApduParserError> {
        Ok(self.take(1)?[0])
    }

    pub fn extract_u16(&mut self) -> Result<u16, ApduParserError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn extract_u32(&mut self) -> Result<u32, ApduParserError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Extracts the next `length` bytes.
    pub fn extract_field_by_length(&mut self, length: usize) -> Result<&'a [u8], ApduParserError> {
        self.take(length)
    }

    /// Extracts a length-value field (one length byte followed by the value).
    pub fn extract_field_lv_encoded(&mut self) -> Result<&'a [u8], ApduParserError> {
        let start = self.index;
        let length = usize::from(self.extract_u8()?);
        self.take(length).map_err(|err| {
            self.index = start;
            err
        })
    }

    /// Extracts a length-value field and decodes it as ASCII.
    pub fn extract_ascii_lv_encoded(&mut self) -> Result<String, ApduParserError> {
        let start = self.index;
        let field = self.extract_field_lv_encoded()?;
        if !field.is_ascii() {
            self.index = start;
            return Err(ApduParserError::InvalidAscii(start));
        }
        Ok(String::from_utf8_lossy(field).into_owned())
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn remaining_length(&self) -> usize {
        self.buffer.len() - self.index
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn take(&mut self, needed: usize) -> Result<&'a [u8], ApduParserError> {
        let available = self.remaining_length();
        if needed > available {
            return Err(ApduParserError::UnexpectedEnd {
                offset: self.index,
                needed,
                available,
            });
        }
        let field = &self.buffer[self.index..self.index + needed];
        self.index += needed;
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_extracts_fields_in_order() {
        // Arrange: u8, u16, LV "nano", u32
        let payload = [
            0x01, 0x12, 0x34, 0x04, b'n', b'a', b'n', b'o', 0x00, 0x00, 0x01, 0x00,
        ];
        let mut parser = ApduParser::new(&payload);

        // Act / Assert
        assert_eq!(parser.extract_u8(), Ok(0x01));
        assert_eq!(parser.extract_u16(), Ok(0x1234));
        assert_eq!(parser.extract_ascii_lv_encoded(), Ok("nano".to_string()));
        assert_eq!(parser.extract_u32(), Ok(0x100));
        assert_eq!(parser.remaining_length(), 0);
    }

    #[test]
    fn test_parser_failure_does_not_move_cursor() {
        // Arrange: LV field declares 5 bytes but only 2 follow.
        let payload = [0x05, 0xAA, 0xBB];
        let mut parser = ApduParser::new(&payload);

        // Act
        let result = parser.extract_field_lv_encoded();

        // Assert
        assert_eq!(
            result,
            Err(ApduParserError::UnexpectedEnd {
                offset: 1,
                needed: 5,
                available: 2
            })
        );
        assert_eq!(parser.current_index(), 0);
    }

    #[test]
    fn test_parser_rejects_non_ascii_lv_field() {
        let payload = [0x02, 0xC3, 0xA9];
        let mut parser = ApduParser::new(&payload);
        assert_eq!(
            parser.extract_ascii_lv_encoded(),
            Err(ApduParserError::InvalidAscii(0))
        );
        assert_eq!(parser.current_index(), 0);
    }
}
