//! Wire format encoding and decoding.
//!
//! Implements the 8-byte frame header:
//! ```text
//! ┌─────────┬──────────┬──────────┐
//! │ Channel │ Reserved │ Length   │
//! │ 1 byte  │ 3 bytes  │ 4 bytes  │
//! │         │ zero     │ uint32 BE│
//! └─────────┴──────────┴──────────┘
//! ```
//!
//! The header is followed by exactly `length` payload bytes.

use std::fmt;

use crate::error::{HijackError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum accepted payload size when decoding (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Default maximum payload carried by one encoded frame (32 KB).
///
/// Larger writes are split into several frames.
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 32 * 1024;

/// Logical channel carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Primary output (stdout).
    Stdout = 0,
    /// Error output (stderr).
    Stderr = 1,
}

impl Channel {
    /// Wire value of this channel.
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire selector byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Channel::Stdout),
            1 => Ok(Channel::Stderr),
            other => Err(HijackError::Framing(format!(
                "Unknown channel selector {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Stdout => f.write_str("stdout"),
            Channel::Stderr => f.write_str("stderr"),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Destination channel.
    pub channel: Channel,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(channel: Channel, payload_length: u32) -> Self {
        Self {
            channel,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian, reserved bytes zeroed).
    ///
    /// # Example
    ///
    /// ```
    /// use hijack_stream::protocol::{Channel, FrameHeader};
    ///
    /// let bytes = FrameHeader::new(Channel::Stderr, 5).encode();
    /// assert_eq!(bytes, [1, 0, 0, 0, 0, 0, 0, 5]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.channel.as_byte();
        buf[4..8].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes.
    ///
    /// Reserved bytes are ignored. An unknown channel selector is a framing
    /// error.
    ///
    /// # Example
    ///
    /// ```
    /// use hijack_stream::protocol::{Channel, FrameHeader};
    ///
    /// let header = FrameHeader::decode(&[0, 0, 0, 0, 0, 0, 1, 0]).unwrap();
    /// assert_eq!(header.channel, Channel::Stdout);
    /// assert_eq!(header.payload_length, 256);
    /// ```
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        Ok(Self {
            channel: Channel::from_byte(buf[0])?,
            payload_length: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the declared payload length against a maximum.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(HijackError::Framing(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        for channel in [Channel::Stdout, Channel::Stderr] {
            let original = FrameHeader::new(channel, 100);
            let decoded = FrameHeader::decode(&original.encode()).unwrap();
            assert_eq!(original, decoded);
        }
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let bytes = FrameHeader::new(Channel::Stderr, 0x0102_0304).encode();

        assert_eq!(bytes[0], 0x01);
        // Reserved
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        // Length: 0x01020304 in BE
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_reserved_bytes_ignored_on_decode() {
        let header = FrameHeader::decode(&[0, 0xAA, 0xBB, 0xCC, 0, 0, 0, 7]).unwrap();
        assert_eq!(header, FrameHeader::new(Channel::Stdout, 7));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let err = FrameHeader::decode(&[2, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
        assert!(err.to_string().contains("Unknown channel selector 2"));
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = FrameHeader::new(Channel::Stdout, 1_000_000);
        let result = header.validate(100);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_max_length() {
        let header = FrameHeader::new(Channel::Stdout, u32::MAX);
        assert!(header.validate(u32::MAX).is_ok());
        assert_eq!(FrameHeader::decode(&header.encode()).unwrap(), header);
    }

    #[test]
    fn test_channel_display() {
        assert_eq!(Channel::Stdout.to_string(), "stdout");
        assert_eq!(Channel::Stderr.to_string(), "stderr");
    }
}
