//! The fixed 16-byte frame header shared by every request and response.

use crate::error::CodecError;

/// `"WEVE"`.
pub const MAGIC: [u8; 4] = *b"WEVE";

/// Current wire protocol version.
pub const VERSION: u16 = 1;

/// Size in bytes of a frame header.
pub const HEADER_LEN: usize = 16;

/// Maximum payload size the codec will accept, independent of any message-specific limit.
pub const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Discriminates what a frame's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A generation request sent to the compute worker.
    Request,
    /// A successful generation result.
    ResponseOk,
    /// A generation failure.
    ResponseErr,
}

impl MessageType {
    fn to_u16(self) -> u16 {
        match self {
            MessageType::Request => 1,
            MessageType::ResponseOk => 2,
            MessageType::ResponseErr => 3,
        }
    }

    fn from_u16(v: u16) -> Result<Self, CodecError> {
        match v {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::ResponseOk),
            3 => Ok(MessageType::ResponseErr),
            other => Err(CodecError::UnsupportedMessageType(other)),
        }
    }
}

/// `magic(4) | version(2) | message_type(2) | payload_len(4) | reserved(4)`, all big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub message_type: MessageType,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn new(message_type: MessageType, payload_len: u32) -> Self {
        FrameHeader {
            version: VERSION,
            message_type,
            payload_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6..8].copy_from_slice(&self.message_type.to_u16().to_be_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[12..16].copy_from_slice(&0u32.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::FrameTooShort {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }
        if buf[0..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = u16::from_be_bytes([buf[4], buf[5]]);
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let message_type = MessageType::from_u16(u16::from_be_bytes([buf[6], buf[7]]))?;
        let payload_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if payload_len > MAX_FRAME_SIZE {
            return Err(CodecError::PayloadTooLarge(payload_len));
        }
        Ok(FrameHeader {
            version,
            message_type,
            payload_len,
        })
    }
}
