//! Decoding of generation responses received from the compute worker.

use crate::error::CodecError;
use crate::header::{FrameHeader, MessageType, HEADER_LEN, MAX_FRAME_SIZE};

/// A successful generation result.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResult {
    pub request_id: u64,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub generation_time_ms: u32,
    pub image_bytes: Vec<u8>,
}

/// A failed generation, as reported by the compute worker itself (distinct from a transport
/// failure, which surfaces as a `ComputeError` rather than a decoded frame).
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationError {
    pub request_id: u64,
    pub code: u16,
    pub message: String,
}

/// Either half of a decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResponse {
    Ok(ImageResult),
    Err(GenerationError),
}

impl GenerationResponse {
    pub fn request_id(&self) -> u64 {
        match self {
            GenerationResponse::Ok(r) => r.request_id,
            GenerationResponse::Err(r) => r.request_id,
        }
    }
}

/// Decodes a full response frame (header + payload) from the compute worker.
pub fn decode_response(frame: &[u8]) -> Result<GenerationResponse, CodecError> {
    let header = FrameHeader::decode(frame)?;
    let payload = &frame[HEADER_LEN..];
    if payload.len() != header.payload_len as usize {
        return Err(CodecError::TruncatedPayload {
            declared: header.payload_len,
            actual: payload.len(),
        });
    }

    match header.message_type {
        MessageType::ResponseOk => decode_ok(payload),
        MessageType::ResponseErr => decode_err(payload),
        MessageType::Request => Err(CodecError::UnsupportedMessageType(1)),
    }
}

fn decode_ok(payload: &[u8]) -> Result<GenerationResponse, CodecError> {
    if payload.len() < 21 {
        return Err(CodecError::MalformedResponse(
            "success payload shorter than fixed fields".into(),
        ));
    }
    let request_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
    let width = u32::from_be_bytes(payload[8..12].try_into().unwrap());
    let height = u32::from_be_bytes(payload[12..16].try_into().unwrap());
    let channels = payload[16];
    if channels != 3 && channels != 4 {
        return Err(CodecError::MalformedResponse(format!(
            "unsupported channel count: {channels}"
        )));
    }
    let generation_time_ms = u32::from_be_bytes(payload[17..21].try_into().unwrap());
    let image_bytes = payload[21..].to_vec();

    let expected_len = width as u64 * height as u64 * channels as u64;
    if expected_len > MAX_FRAME_SIZE as u64 {
        return Err(CodecError::PayloadTooLarge(MAX_FRAME_SIZE));
    }

    Ok(GenerationResponse::Ok(ImageResult {
        request_id,
        width,
        height,
        channels,
        generation_time_ms,
        image_bytes,
    }))
}

fn decode_err(payload: &[u8]) -> Result<GenerationResponse, CodecError> {
    if payload.len() < 12 {
        return Err(CodecError::MalformedResponse(
            "error payload shorter than fixed fields".into(),
        ));
    }
    let request_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
    let code = u16::from_be_bytes(payload[8..10].try_into().unwrap());
    let message = std::str::from_utf8(&payload[12..])
        .map_err(|e| CodecError::MalformedResponse(e.to_string()))?
        .to_owned();
    Ok(GenerationResponse::Err(GenerationError {
        request_id,
        code,
        message,
    }))
}

/// Encodes a success response. Used by the compute worker side and by tests fabricating
/// fixtures; the server only ever decodes.
pub fn encode_ok(result: &ImageResult) -> Vec<u8> {
    let mut payload = Vec::with_capacity(21 + result.image_bytes.len());
    payload.extend_from_slice(&result.request_id.to_be_bytes());
    payload.extend_from_slice(&result.width.to_be_bytes());
    payload.extend_from_slice(&result.height.to_be_bytes());
    payload.push(result.channels);
    payload.extend_from_slice(&result.generation_time_ms.to_be_bytes());
    payload.extend_from_slice(&result.image_bytes);

    let header = FrameHeader::new(MessageType::ResponseOk, payload.len() as u32);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&payload);
    frame
}

/// Encodes an error response.
pub fn encode_err(err: &GenerationError) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12 + err.message.len());
    payload.extend_from_slice(&err.request_id.to_be_bytes());
    payload.extend_from_slice(&err.code.to_be_bytes());
    payload.extend_from_slice(&0u16.to_be_bytes());
    payload.extend_from_slice(err.message.as_bytes());

    let header = FrameHeader::new(MessageType::ResponseErr, payload.len() as u32);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_success() {
        let result = ImageResult {
            request_id: 42,
            width: 512,
            height: 512,
            channels: 3,
            generation_time_ms: 1834,
            image_bytes: vec![1, 2, 3, 4],
        };
        let frame = encode_ok(&result);
        assert_eq!(decode_response(&frame).unwrap(), GenerationResponse::Ok(result));
    }

    #[test]
    fn round_trips_error() {
        let err = GenerationError {
            request_id: 7,
            code: 500,
            message: "out of memory".to_owned(),
        };
        let frame = encode_err(&err);
        assert_eq!(decode_response(&frame).unwrap(), GenerationResponse::Err(err));
    }

    #[test]
    fn rejects_bad_channel_count() {
        let result = ImageResult {
            request_id: 1,
            width: 64,
            height: 64,
            channels: 5,
            generation_time_ms: 0,
            image_bytes: vec![],
        };
        let frame = encode_ok(&result);
        assert!(matches!(
            decode_response(&frame),
            Err(CodecError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut frame = encode_ok(&ImageResult {
            request_id: 1,
            width: 64,
            height: 64,
            channels: 3,
            generation_time_ms: 0,
            image_bytes: vec![9, 9, 9],
        });
        frame.truncate(frame.len() - 2);
        assert!(matches!(
            decode_response(&frame),
            Err(CodecError::TruncatedPayload { .. })
        ));
    }
}
