//! Error conditions raised while encoding or decoding compute wire frames.

use thiserror::Error;

/// Every way a request or response frame can fail to encode or decode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A dimension (width or height) was outside `64..=2048` or not a multiple of 64.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions {
        /// The offending width.
        width: u32,
        /// The offending height.
        height: u32,
    },

    /// `steps` was outside `1..=100`.
    #[error("invalid steps: {0}")]
    InvalidSteps(u32),

    /// `cfg` was outside `0.0..=20.0`, `NaN`, or infinite.
    #[error("invalid cfg: {0}")]
    InvalidCfg(f32),

    /// The prompt's offset table pointed outside the declared payload, or the prompt itself
    /// exceeded the per-encoder length limit.
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    /// `model_id` did not correspond to any known model.
    #[error("invalid model id: {0}")]
    InvalidModelId(u32),

    /// The buffer was shorter than a frame header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// The minimum number of bytes required.
        expected: usize,
        /// The number of bytes actually available.
        actual: usize,
    },

    /// The frame's magic bytes did not read `"WEVE"`.
    #[error("bad magic bytes")]
    BadMagic,

    /// The frame declared a protocol version this codec does not understand.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// The frame declared a message type this codec does not understand.
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(u16),

    /// The frame declared a payload length that would exceed [`crate::MAX_FRAME_SIZE`].
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u32),

    /// The buffer did not contain as many payload bytes as the header declared.
    #[error("truncated payload: declared {declared}, got {actual}")]
    TruncatedPayload {
        /// The number of bytes the header declared.
        declared: u32,
        /// The number of bytes actually available.
        actual: usize,
    },

    /// The response payload was malformed in a way specific to its variant (missing channel
    /// count, bad UTF-8 error message, etc).
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
