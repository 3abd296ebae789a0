//! Encoding of generation requests sent to the compute worker.

use crate::error::CodecError;
use crate::header::{FrameHeader, MessageType, HEADER_LEN};

/// Minimum width/height, inclusive.
pub const MIN_DIMENSION: u32 = 64;
/// Maximum width/height, inclusive.
pub const MAX_DIMENSION: u32 = 2048;
/// Minimum step count, inclusive.
pub const MIN_STEPS: u32 = 1;
/// Maximum step count, inclusive.
pub const MAX_STEPS: u32 = 100;
/// Maximum cfg scale, inclusive.
pub const MAX_CFG: f32 = 20.0;
/// Maximum byte length of the prompt accepted by any single text encoder.
pub const MAX_PROMPT_LEN: usize = 2048;

const FIXED_FIELDS_LEN: usize = 8 + 4 + 4 + 4 + 4 + 4 + 8;
const OFFSET_TABLE_LEN: usize = 3 * 8;
const PROMPT_TABLE_OFFSET: usize = FIXED_FIELDS_LEN + OFFSET_TABLE_LEN;

/// A generation request addressed to a specific model on the compute worker.
///
/// `seed` of `-1` means "let the worker pick a random seed".
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeRequest {
    pub request_id: u64,
    pub model_id: u32,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f32,
    pub seed: i64,
    pub prompt: String,
}

fn validate(req: &EncodeRequest) -> Result<(), CodecError> {
    if req.width < MIN_DIMENSION
        || req.width > MAX_DIMENSION
        || req.width % 64 != 0
        || req.height < MIN_DIMENSION
        || req.height > MAX_DIMENSION
        || req.height % 64 != 0
    {
        return Err(CodecError::InvalidDimensions {
            width: req.width,
            height: req.height,
        });
    }
    if req.steps < MIN_STEPS || req.steps > MAX_STEPS {
        return Err(CodecError::InvalidSteps(req.steps));
    }
    if !req.cfg.is_finite() || req.cfg < 0.0 || req.cfg > MAX_CFG {
        return Err(CodecError::InvalidCfg(req.cfg));
    }
    if req.prompt.len() > MAX_PROMPT_LEN {
        return Err(CodecError::InvalidPrompt(format!(
            "prompt is {} bytes, limit is {}",
            req.prompt.len(),
            MAX_PROMPT_LEN
        )));
    }
    Ok(())
}

/// Encodes `req` into a full wire frame: 16-byte header followed by payload.
///
/// The payload carries the prompt once per text encoder (clip-l, clip-g, t5), each slice
/// addressed by a `(offset, length)` entry in a small table right after the fixed fields. Weave
/// currently encodes the same prompt text for all three encoders, but the table lets a future
/// model-specific client address each one independently.
pub fn encode_request(req: &EncodeRequest) -> Result<Vec<u8>, CodecError> {
    validate(req)?;

    let prompt_bytes = req.prompt.as_bytes();
    let payload_len = PROMPT_TABLE_OFFSET + prompt_bytes.len() * 3;
    let mut payload = Vec::with_capacity(payload_len);

    payload.extend_from_slice(&req.request_id.to_be_bytes());
    payload.extend_from_slice(&req.model_id.to_be_bytes());
    payload.extend_from_slice(&req.width.to_be_bytes());
    payload.extend_from_slice(&req.height.to_be_bytes());
    payload.extend_from_slice(&req.steps.to_be_bytes());
    payload.extend_from_slice(&req.cfg.to_be_bytes());
    payload.extend_from_slice(&req.seed.to_be_bytes());

    for slot in 0..3u32 {
        let offset = (PROMPT_TABLE_OFFSET + slot as usize * prompt_bytes.len()) as u32;
        payload.extend_from_slice(&offset.to_be_bytes());
        payload.extend_from_slice(&(prompt_bytes.len() as u32).to_be_bytes());
    }
    for _ in 0..3 {
        payload.extend_from_slice(prompt_bytes);
    }

    let payload_len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| CodecError::PayloadTooLarge(u32::MAX))?;
    let header = FrameHeader::new(MessageType::Request, payload_len);

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a request frame back into an [`EncodeRequest`]. Used by the compute worker side of
/// the protocol and by tests that assert on round-tripping.
pub fn decode_request(frame: &[u8]) -> Result<EncodeRequest, CodecError> {
    let header = FrameHeader::decode(frame)?;
    if header.message_type != MessageType::Request {
        return Err(CodecError::UnsupportedMessageType(0));
    }
    let payload = &frame[HEADER_LEN..];
    if payload.len() != header.payload_len as usize {
        return Err(CodecError::TruncatedPayload {
            declared: header.payload_len,
            actual: payload.len(),
        });
    }
    if payload.len() < PROMPT_TABLE_OFFSET {
        return Err(CodecError::InvalidPrompt("payload shorter than fixed fields".into()));
    }

    let request_id = u64::from_be_bytes(payload[0..8].try_into().unwrap());
    let model_id = u32::from_be_bytes(payload[8..12].try_into().unwrap());
    let width = u32::from_be_bytes(payload[12..16].try_into().unwrap());
    let height = u32::from_be_bytes(payload[16..20].try_into().unwrap());
    let steps = u32::from_be_bytes(payload[20..24].try_into().unwrap());
    let cfg = f32::from_be_bytes(payload[24..28].try_into().unwrap());
    let seed = i64::from_be_bytes(payload[28..36].try_into().unwrap());

    let clip_l_offset = u32::from_be_bytes(payload[36..40].try_into().unwrap()) as usize;
    let clip_l_len = u32::from_be_bytes(payload[40..44].try_into().unwrap()) as usize;
    let end = clip_l_offset
        .checked_add(clip_l_len)
        .ok_or_else(|| CodecError::InvalidPrompt("offset overflow".into()))?;
    let prompt_bytes = payload
        .get(clip_l_offset..end)
        .ok_or_else(|| CodecError::InvalidPrompt("offset table out of bounds".into()))?;
    let prompt = std::str::from_utf8(prompt_bytes)
        .map_err(|e| CodecError::InvalidPrompt(e.to_string()))?
        .to_owned();

    let req = EncodeRequest {
        request_id,
        model_id,
        width,
        height,
        steps,
        cfg,
        seed,
        prompt,
    };
    validate(&req)?;
    Ok(req)
}
