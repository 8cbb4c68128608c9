//! Frame header layout and wire serialisation.

use super::{FrameConfig, FramingError};

/// Decoded header of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: Option<[u8; 2]>,
    pub tag: u8,
    pub index: u16,
    /// Present on frame 0 only.
    pub total_length: Option<u16>,
}

impl FrameHeader {
    /// Number of bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        let channel = if self.channel.is_some() { 2 } else { 0 };
        let length = if self.total_length.is_some() { 2 } else { 0 };
        channel + 1 + 2 + length
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        if let Some(channel) = self.channel {
            buf.extend_from_slice(&channel);
        }
        buf.push(self.tag);
        buf.extend_from_slice(&self.index.to_be_bytes());
        if let Some(total_length) = self.total_length {
            buf.extend_from_slice(&total_length.to_be_bytes());
        }
    }

    /// Parses the header at the start of `bytes`.
    ///
    /// Whether a channel is present comes from `config`; whether a
    /// `total_length` follows depends on the decoded index.  Returns the
    /// header and the offset of the chunk that follows it.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::TruncatedHeader`] if `bytes` ends inside the header.
    pub fn parse(bytes: &[u8], config: &FrameConfig) -> Result<(Self, usize), FramingError> {
        let channel_len = if config.channel.is_some() { 2 } else { 0 };
        require_len(bytes, channel_len + 3)?;

        let channel = config.channel.map(|_| [bytes[0], bytes[1]]);
        let tag = bytes[channel_len];
        let index = u16::from_be_bytes([bytes[channel_len + 1], bytes[channel_len + 2]]);
        let mut offset = channel_len + 3;

        let total_length = if index == 0 {
            require_len(bytes, offset + 2)?;
            let value = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            offset += 2;
            Some(value)
        } else {
            None
        };

        Ok((
            Self {
                channel,
                tag,
                index,
                total_length,
            },
            offset,
        ))
    }
}

/// One frame ready to be written to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    /// Chunk bytes followed by any zero padding.
    data: Vec<u8>,
}

impl Frame {
    pub fn new(header: FrameHeader, data: Vec<u8>) -> Self {
        Self { header, data }
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Total size on the wire.
    pub fn len(&self) -> usize {
        self.header.encoded_len() + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialises header and data into the bytes handed to the transport.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());
        self.header.write_to(&mut buf);
        buf.extend_from_slice(&self.data);
        buf
    }
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), FramingError> {
    if bytes.len() < needed {
        return Err(FramingError::TruncatedHeader {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}
