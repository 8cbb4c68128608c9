//! Lazy segmentation of a payload into frames.

use super::{Frame, FrameConfig, FrameHeader, FramingError};

/// Cuts `payload` into frames according to `config`.
///
/// Frames are produced one per [`Iterator::next`] call so the session can
/// write each one as soon as it is built.  An empty payload still yields one
/// frame carrying `total_length = 0`.
///
/// # Errors
///
/// Returns [`FramingError::FrameSizeTooSmall`] if frame 0 cannot hold its
/// header plus one byte, or [`FramingError::PayloadTooLarge`] if the payload
/// length does not fit in 16 bits.
///
/// # Examples
///
/// ```rust
/// use dmk_core::framing::{segment, FrameConfig};
///
/// let frames: Vec<_> = segment(&[0xE0, 0x01, 0x00, 0x00, 0x00], &FrameConfig::usb_hid())
///     .unwrap()
///     .collect();
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].to_bytes().len(), 64);
/// ```
pub fn segment(payload: &[u8], config: &FrameConfig) -> Result<FrameSegmenter, FramingError> {
    config.validate()?;
    let total_length =
        u16::try_from(payload.len()).map_err(|_| FramingError::PayloadTooLarge(payload.len()))?;

    Ok(FrameSegmenter {
        config: *config,
        payload: payload.to_vec(),
        total_length,
        offset: 0,
        index: 0,
        finished: false,
    })
}

/// Iterator over the frames of one payload.
#[derive(Debug, Clone)]
pub struct FrameSegmenter {
    config: FrameConfig,
    payload: Vec<u8>,
    total_length: u16,
    offset: usize,
    index: u16,
    finished: bool,
}

impl FrameSegmenter {
    /// Total number of frames this segmenter produces.
    pub fn frame_count(&self) -> usize {
        self.config.frame_count(self.payload.len())
    }
}

impl Iterator for FrameSegmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }

        let capacity = self.config.capacity(self.index);
        let end = (self.offset + capacity).min(self.payload.len());
        let mut data = self.payload[self.offset..end].to_vec();

        let header = FrameHeader {
            channel: self.config.channel,
            tag: self.config.tag,
            index: self.index,
            total_length: (self.index == 0).then_some(self.total_length),
        };

        self.offset = end;
        if self.offset >= self.payload.len() {
            self.finished = true;
            if self.config.pad_final_frame {
                data.resize(capacity, 0);
            }
        }
        // frame_count() bounds the index well below u16::MAX for a u16 payload.
        self.index = self.index.wrapping_add(1);

        Some(Frame::new(header, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channelled(frame_size: u16) -> FrameConfig {
        FrameConfig {
            frame_size,
            channel: Some([0x12, 0x34]),
            tag: 0x05,
            pad_final_frame: true,
        }
    }

    #[test]
    fn test_empty_payload_yields_single_header_only_frame() {
        // Arrange
        let cfg = FrameConfig::ble(20);

        // Act
        let frames: Vec<Frame> = segment(&[], &cfg).unwrap().collect();

        // Assert
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header().total_length, Some(0));
        assert_eq!(frames[0].to_bytes(), vec![0x05, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_short_apdu_with_frame_size_ten_yields_two_frames() {
        // Arrange: 8-byte raw APDU, header 0 = 7 bytes, header N = 5 bytes.
        let apdu = [0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03];

        // Act
        let frames: Vec<Vec<u8>> = segment(&apdu, &channelled(10))
            .unwrap()
            .map(|f| f.to_bytes())
            .collect();

        // Assert
        assert_eq!(
            frames,
            vec![
                vec![0x12, 0x34, 0x05, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00],
                vec![0x12, 0x34, 0x05, 0x00, 0x01, 0x00, 0x03, 0x01, 0x02, 0x03],
            ]
        );
    }

    #[test]
    fn test_final_frame_is_padded_to_frame_size() {
        // Arrange
        let cfg = FrameConfig::usb_hid();

        // Act
        let frames: Vec<Frame> = segment(&[0xAB; 60], &cfg).unwrap().collect();

        // Assert
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(frame.to_bytes().len(), 64);
        }
        let last = frames[1].to_bytes();
        assert_eq!(&last[5..8], &[0xAB, 0xAB, 0xAB]);
        assert!(last[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpadded_final_frame_is_short() {
        let frames: Vec<Frame> = segment(&[0x01; 20], &FrameConfig::ble(20)).unwrap().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 20);
        assert_eq!(frames[1].len(), 3 + 5);
    }

    #[test]
    fn test_indices_increase_by_one_and_share_channel_and_tag() {
        let frames: Vec<Frame> = segment(&[0x42; 500], &FrameConfig::usb_hid()).unwrap().collect();
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(usize::from(frame.header().index), i);
            assert_eq!(frame.header().channel, Some([0x01, 0x01]));
            assert_eq!(frame.header().tag, 0x05);
            assert_eq!(frame.header().total_length.is_some(), i == 0);
        }
    }

    #[test]
    fn test_segmenter_yields_frame_count_frames() {
        for len in [0usize, 1, 2, 57, 58, 116, 117, 1000] {
            let segmenter = segment(&vec![0u8; len], &FrameConfig::usb_hid()).unwrap();
            let expected = segmenter.frame_count();
            assert_eq!(segmenter.count(), expected, "len {len}");
        }
    }

    #[test]
    fn test_frame_size_six_with_channel_is_rejected() {
        let result = segment(&[0x00; 8], &channelled(6));
        assert!(matches!(result, Err(FramingError::FrameSizeTooSmall { .. })));
    }

    #[test]
    fn test_payload_over_u16_is_rejected() {
        let result = segment(&vec![0u8; 70_000], &FrameConfig::usb_hid());
        assert!(matches!(result, Err(FramingError::PayloadTooLarge(70_000))));
    }
}
